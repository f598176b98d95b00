// Profile-driven resource layer — builds cycles from named resources whose
// URI templates and processors come from a declarative profile.

use std::path::Path;
use std::sync::Arc;

use reqwest::{Method, Url};
use serde::Deserialize;
use tracing::debug;

use crate::engine::cycle::{CompletionHandler, Cycle};
use crate::engine::session::Session;
use crate::error::CycleError;
use crate::processor::ProcessorRegistry;
use crate::template::{expand_uri_template, TemplateValues};

fn default_method() -> String {
    "GET".to_string()
}

/// One named resource of a service profile.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceProfile {
    pub name: String,
    pub uri_template: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub request_processors: Vec<String>,
    #[serde(default)]
    pub response_processors: Vec<String>,
}

/// Declarative description of a remote service: a base URL plus named
/// resources.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceProfile {
    pub base_url: String,
    #[serde(default)]
    pub resources: Vec<ResourceProfile>,
}

impl ServiceProfile {
    pub fn from_json(json: &str) -> Result<Self, CycleError> {
        serde_json::from_str(json).map_err(|e| CycleError::Profile {
            message: format!("cannot parse profile: {}", e),
        })
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, CycleError> {
        let text = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| CycleError::Profile {
                message: format!("cannot read profile: {}", e),
            })?;
        Self::from_json(&text)
    }

    /// Reject structurally broken profiles: unnamed resources, duplicate
    /// names, missing templates.
    pub fn verify(&self) -> Result<(), CycleError> {
        let mut names = std::collections::HashSet::new();
        for (index, resource) in self.resources.iter().enumerate() {
            if resource.name.is_empty() {
                return Err(CycleError::Profile {
                    message: format!("resource {} has no name", index),
                });
            }
            if !names.insert(resource.name.as_str()) {
                return Err(CycleError::Profile {
                    message: format!("duplicate resource name: {}", resource.name),
                });
            }
            if resource.uri_template.is_empty() {
                return Err(CycleError::Profile {
                    message: format!("resource {} has no URI template", resource.name),
                });
            }
        }
        Ok(())
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceProfile> {
        self.resources.iter().find(|r| r.name == name)
    }
}

/// What to do when a resource request names an identifier that is already
/// registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOption {
    /// Return the live cycle as-is.
    Reuse,
    /// Cancel the live cycle implicitly (its caller sees a cancellation
    /// error) and build a replacement.
    Replace,
}

/// Per-call inputs for building a resource cycle.
pub struct ResourceRequest {
    pub identifier: Option<String>,
    pub option: ResourceOption,
    pub values: TemplateValues,
    pub request_object: Option<serde_json::Value>,
    pub solicited: bool,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            identifier: None,
            option: ResourceOption::Reuse,
            values: TemplateValues::new(),
            request_object: None,
            solicited: false,
        }
    }
}

/// Builds and dispatches cycles against the named resources of a profile.
pub struct Service {
    session: Arc<Session>,
    profile: ServiceProfile,
    registry: ProcessorRegistry,
    base_url_override: Option<String>,
}

impl Service {
    pub fn new(session: Arc<Session>, profile: ServiceProfile) -> Result<Self, CycleError> {
        profile.verify()?;
        Ok(Self {
            session,
            profile,
            registry: ProcessorRegistry::with_builtins(),
            base_url_override: None,
        })
    }

    /// Resolve profile processor names through a custom registry.
    pub fn with_registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        self.base_url_override
            .as_deref()
            .unwrap_or(&self.profile.base_url)
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url_override = Some(base_url.into());
    }

    /// Expand a resource's template and join it onto the base URL with
    /// exactly one slash.
    fn url_for_resource(
        &self,
        resource: &ResourceProfile,
        values: &TemplateValues,
    ) -> Result<Url, CycleError> {
        let expanded = expand_uri_template(&resource.uri_template, values);
        let base = self.base_url().trim_end_matches('/');
        let fragment = expanded.trim_start_matches('/');
        let url_string = if fragment.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, fragment)
        };
        Url::parse(&url_string).map_err(|e| CycleError::InvalidUrl {
            message: format!("{}: {}", url_string, e),
        })
    }

    /// Build (or reuse) a cycle for the named resource.
    pub fn cycle_for_resource(
        &self,
        name: &str,
        request: ResourceRequest,
    ) -> Result<Arc<Cycle>, CycleError> {
        if let Some(identifier) = &request.identifier {
            if let Some(existing) = self.session.cycle_for_identifier(identifier) {
                match request.option {
                    ResourceOption::Reuse => {
                        debug!("reusing cycle for identifier {}", identifier);
                        return Ok(existing);
                    }
                    ResourceOption::Replace => {
                        debug!("replacing cycle for identifier {}", identifier);
                        existing.cancel(false);
                    }
                }
            }
        }

        let resource = self.profile.resource(name).ok_or_else(|| CycleError::Profile {
            message: format!("unknown resource: {}", name),
        })?;

        let url = self.url_for_resource(resource, &request.values)?;
        let method =
            Method::from_bytes(resource.method.as_bytes()).map_err(|_| CycleError::Profile {
                message: format!("invalid method for resource {}: {}", name, resource.method),
            })?;

        let mut builder = self.session.build_cycle(url).method(method);
        if let Some(identifier) = request.identifier {
            builder = builder.identifier(identifier);
        }
        if let Some(object) = request.request_object {
            builder = builder.request_object(object);
        }
        builder = builder.solicited(request.solicited);

        // Profile processors extend the session defaults, resolved now.
        if !resource.request_processors.is_empty() {
            let mut processors = self.session.request_processors();
            processors.extend(self.registry.make_all(&resource.request_processors)?);
            builder = builder.request_processors(processors);
        }
        if !resource.response_processors.is_empty() {
            let mut processors = self.session.response_processors();
            processors.extend(self.registry.make_all(&resource.response_processors)?);
            builder = builder.response_processors(processors);
        }

        Ok(builder.build())
    }

    /// Build a resource cycle and start it.
    pub fn request_resource(
        &self,
        name: &str,
        request: ResourceRequest,
        handler: CompletionHandler,
    ) -> Result<Arc<Cycle>, CycleError> {
        let cycle = self.cycle_for_resource(name, request)?;
        cycle.start(Some(handler));
        Ok(cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"{
        "base_url": "http://api.test/v1/",
        "resources": [
            {"name": "user", "uri_template": "users{/id}"},
            {"name": "search", "uri_template": "search{?q}", "method": "POST",
             "response_processors": ["JsonProcessor"]}
        ]
    }"#;

    #[test]
    fn test_profile_parsing_and_lookup() {
        let profile = ServiceProfile::from_json(PROFILE).unwrap();
        profile.verify().unwrap();
        assert_eq!(profile.resources.len(), 2);
        assert_eq!(profile.resource("user").unwrap().method, "GET");
        assert_eq!(profile.resource("search").unwrap().method, "POST");
        assert!(profile.resource("missing").is_none());
    }

    #[test]
    fn test_profile_verify_rejects_duplicates() {
        let profile = ServiceProfile::from_json(
            r#"{"base_url": "http://x.test",
                "resources": [
                    {"name": "a", "uri_template": "a"},
                    {"name": "a", "uri_template": "b"}
                ]}"#,
        )
        .unwrap();
        assert!(matches!(
            profile.verify(),
            Err(CycleError::Profile { .. })
        ));
    }

    #[test]
    fn test_profile_verify_rejects_missing_template() {
        let profile = ServiceProfile::from_json(
            r#"{"base_url": "http://x.test",
                "resources": [{"name": "a", "uri_template": ""}]}"#,
        )
        .unwrap();
        assert!(matches!(
            profile.verify(),
            Err(CycleError::Profile { .. })
        ));
    }

    #[tokio::test]
    async fn test_url_joining_single_slash() {
        let session = Session::new().unwrap();
        let profile = ServiceProfile::from_json(PROFILE).unwrap();
        let service = Service::new(session, profile).unwrap();

        let mut values = TemplateValues::new();
        values.set("id", "42");
        let resource = service.profile.resource("user").unwrap().clone();
        let url = service.url_for_resource(&resource, &values).unwrap();
        assert_eq!(url.as_str(), "http://api.test/v1/users/42");
    }
}
