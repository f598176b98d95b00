// Body codecs — the processor capability and its built-in implementations.
//
// Processors run on the worker context in list order: request processors
// turn `request.object` into body bytes before dispatch, response processors
// turn body bytes into `response.object` after a successful transfer. The
// first failure aborts the rest of the chain.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

use crate::error::CycleError;
use crate::message::{Request, Response};
use crate::query::{form_encode, Parameters};

/// Capability consumed by cycles. A processor that does not support one
/// direction reports `ObjectKindNotMatch` for it.
pub trait Processor: Send + Sync {
    fn process_request(&self, _request: &mut Request) -> Result<(), CycleError> {
        Err(CycleError::ObjectKindNotMatch)
    }

    fn process_response(&self, _response: &mut Response) -> Result<(), CycleError> {
        Err(CycleError::ObjectKindNotMatch)
    }
}

/// Raw passthrough: a string object becomes the body verbatim; the response
/// body is stored back as a string object (lossy for non-UTF-8 bytes).
pub struct DataProcessor;

impl Processor for DataProcessor {
    fn process_request(&self, request: &mut Request) -> Result<(), CycleError> {
        match &request.object {
            Some(Value::String(s)) => {
                request.set_body(s.clone().into_bytes());
                Ok(())
            }
            _ => Err(CycleError::ObjectKindNotMatch),
        }
    }

    fn process_response(&self, response: &mut Response) -> Result<(), CycleError> {
        let text = String::from_utf8_lossy(response.body()).into_owned();
        response.object = Some(Value::String(text));
        Ok(())
    }
}

/// Text codec: UTF-8 on the way out, charset-aware decoding on the way in.
pub struct TextProcessor;

impl Processor for TextProcessor {
    fn process_request(&self, request: &mut Request) -> Result<(), CycleError> {
        match &request.object {
            Some(Value::String(s)) => {
                request.set_body(s.clone().into_bytes());
                Ok(())
            }
            _ => Err(CycleError::ObjectKindNotMatch),
        }
    }

    fn process_response(&self, response: &mut Response) -> Result<(), CycleError> {
        let text = response.text();
        response.object = Some(Value::String(text));
        Ok(())
    }
}

/// JSON codec. Adds `Content-Type: application/json` to requests.
pub struct JsonProcessor;

impl Processor for JsonProcessor {
    fn process_request(&self, request: &mut Request) -> Result<(), CycleError> {
        let object = request.object.as_ref().ok_or(CycleError::ObjectKindNotMatch)?;
        let body = serde_json::to_vec(object).map_err(|e| CycleError::Processor {
            message: format!("JSON encoding failed: {}", e),
        })?;
        request.set_body(body);
        request.set_header("Content-Type", "application/json");
        Ok(())
    }

    fn process_response(&self, response: &mut Response) -> Result<(), CycleError> {
        let object: Value =
            serde_json::from_slice(response.body()).map_err(|e| CycleError::Processor {
                message: format!("JSON decoding failed: {}", e),
            })?;
        response.object = Some(object);
        Ok(())
    }
}

/// Form codec: the object must be a map of string to string-or-string-list.
/// Adds the form-urlencoded content type. Request direction only.
pub struct FormProcessor;

impl Processor for FormProcessor {
    fn process_request(&self, request: &mut Request) -> Result<(), CycleError> {
        let object = match &request.object {
            Some(Value::Object(map)) => map,
            _ => return Err(CycleError::ObjectKindNotMatch),
        };

        let mut parameters = Parameters::new();
        for (key, value) in object {
            let values = match value {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::String(s) => out.push(s.clone()),
                            _ => return Err(CycleError::ObjectKindNotMatch),
                        }
                    }
                    out
                }
                _ => return Err(CycleError::ObjectKindNotMatch),
            };
            parameters.insert(key.clone(), values);
        }

        request.set_body(form_encode(&parameters).into_bytes());
        request.set_header("Content-Type", "application/x-www-form-urlencoded");
        Ok(())
    }
}

/// Adds a Basic `Authorization` header to requests.
pub struct BasicAuthProcessor {
    username: String,
    password: String,
}

impl BasicAuthProcessor {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The `Basic <base64>` header value for a username/password pair.
    pub fn header_value(username: &str, password: &str) -> String {
        let encoded = BASE64.encode(format!("{}:{}", username, password));
        format!("Basic {}", encoded)
    }
}

impl Processor for BasicAuthProcessor {
    fn process_request(&self, request: &mut Request) -> Result<(), CycleError> {
        let header = Self::header_value(&self.username, &self.password);
        request.set_header("Authorization", &header);
        Ok(())
    }
}

type ProcessorFactory = Box<dyn Fn() -> Arc<dyn Processor> + Send + Sync>;

/// Name-to-constructor table used by the service layer to resolve the
/// processor names a profile mentions. Registered at startup; no runtime
/// reflection.
pub struct ProcessorRegistry {
    factories: HashMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with the built-in no-argument processors registered under
    /// their type names.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("DataProcessor", || Arc::new(DataProcessor));
        registry.register("TextProcessor", || Arc::new(TextProcessor));
        registry.register("JsonProcessor", || Arc::new(JsonProcessor));
        registry.register("FormProcessor", || Arc::new(FormProcessor));
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn Processor> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn make(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.factories.get(name).map(|f| f())
    }

    /// Resolve a list of names, failing on the first unknown one.
    pub fn make_all(&self, names: &[String]) -> Result<Vec<Arc<dyn Processor>>, CycleError> {
        names
            .iter()
            .map(|name| {
                self.make(name).ok_or_else(|| CycleError::Profile {
                    message: format!("unknown processor: {}", name),
                })
            })
            .collect()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
