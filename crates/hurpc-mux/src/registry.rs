use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::METHOD_NOT_FOUND_PREFIX;

/// Error a handler returns; its `Display` text is sent to the caller verbatim.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler produces: result payload or an application error.
pub type HandlerResult = std::result::Result<Bytes, HandlerError>;

/// A locally implemented method, invoked with the request payload.
pub type Handler = Arc<dyn Fn(Bytes) -> HandlerResult + Send + Sync>;

/// Method name → handler.
///
/// Register handlers before the peer starts calling them; registering later
/// works but calls that arrive first get a method-not-found reply.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `method`, replacing any previous one.
    pub fn register<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Bytes) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), Arc::new(handler));
    }

    /// Register a handler whose argument and result travel as JSON.
    pub fn register_json<A, R, F>(&self, method: impl Into<String>, handler: F)
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> std::result::Result<R, HandlerError> + Send + Sync + 'static,
    {
        self.register(method, move |payload: Bytes| {
            let args: A = serde_json::from_slice(&payload)?;
            let result = handler(args)?;
            Ok(Bytes::from(serde_json::to_vec(&result)?))
        });
    }

    /// Remove the handler for `method`. Returns whether one was registered.
    pub fn unregister(&self, method: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(method)
            .is_some()
    }

    pub fn get(&self, method: &str) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.get(method).is_some()
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        methods.sort();
        methods
    }

    /// Run the handler for `method`, turning every failure into reply text.
    ///
    /// A missing handler yields `method not found: <method>`; a panicking
    /// handler is reported rather than left to hang the caller. The returned
    /// error text is never empty.
    pub fn invoke(&self, method: &str, payload: Bytes) -> std::result::Result<Bytes, String> {
        // Clone the handler out so the lock isn't held while it runs.
        let Some(handler) = self.get(method) else {
            return Err(format!("{METHOD_NOT_FOUND_PREFIX}{method}"));
        };
        match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(Ok(result)) => Ok(result),
            // Empty error text would read as success on the other side.
            Ok(Err(err)) => match err.to_string() {
                text if text.is_empty() => Err(format!("handler for {method} failed")),
                text => Err(text),
            },
            Err(_) => Err(format!("handler for {method} panicked")),
        }
    }
}
