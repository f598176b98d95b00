// Network-activity counter — tracks in-flight transport tasks for UI hooks.

use std::sync::atomic::{AtomicI64, Ordering};

type VisibilityHook = Box<dyn Fn(bool) + Send + Sync>;

/// Counts live transport tasks. An optional hook fires with `true` when the
/// count leaves zero and `false` when it returns to zero, so an embedder can
/// drive a spinner or similar affordance. Injected into sessions; construct
/// one per scope that needs isolation.
#[derive(Default)]
pub struct ActivityIndicator {
    count: AtomicI64,
    hook: Option<VisibilityHook>,
}

impl ActivityIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(hook: impl Fn(bool) + Send + Sync + 'static) -> Self {
        Self {
            count: AtomicI64::new(0),
            hook: Some(Box::new(hook)),
        }
    }

    pub fn increase(&self) {
        if self.count.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Some(hook) = &self.hook {
                hook(true);
            }
        }
    }

    pub fn decrease(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(hook) = &self.hook {
                hook(false);
            }
        }
    }

    pub fn active(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_hook_fires_on_transitions() {
        let transitions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&transitions);
        let indicator = ActivityIndicator::with_hook(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        indicator.increase();
        indicator.increase();
        indicator.decrease();
        indicator.decrease();
        // Only 0->1 and 1->0 fire the hook.
        assert_eq!(transitions.load(Ordering::SeqCst), 2);
        assert_eq!(indicator.active(), 0);
    }
}
