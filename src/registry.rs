//! Service registry and dispatch router.
//!
//! Maps (service, method) pairs to handlers. Anything not registered is
//! answered by [`UnimplementedHandler`].

use crate::handler::{
    MatchingHandler, MethodHandler, RpcCall, UnimplementedHandler, NOT_IMPLEMENTED_MESSAGE,
};
use crate::table::TableError;
use prost_reflect::{
    DescriptorPool, DeserializeOptions, DynamicMessage, MethodDescriptor, SerializeOptions,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tonic::{Code, Status};
use tracing::{debug, info, warn};

/// Errors raised while wiring handlers.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid matchers for {service}/{method}: {source}")]
    InvalidMatchers {
        service: String,
        method: String,
        #[source]
        source: TableError,
    },

    #[error("service {0} not found in descriptor pool")]
    UnknownService(String),
}

/// Logging switches applied while dispatching.
#[derive(Debug, Clone, Copy)]
pub struct DispatchLogging {
    /// Log successful calls
    pub log_matches: bool,
    /// Log calls answered with an error status
    pub log_unmatched: bool,
}

impl Default for DispatchLogging {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}

/// How a method of a bound service will be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundMethod {
    pub name: String,
    /// A handler is registered for this method
    pub registered: bool,
    /// Client or server streaming; always served by the fallback
    pub streaming: bool,
}

/// A service from the descriptor pool with its method bindings.
#[derive(Debug, Clone)]
pub struct BoundService {
    pub name: String,
    pub methods: Vec<BoundMethod>,
}

/// Registry of method handlers.
pub struct ServiceRegistry {
    handlers: HashMap<String, HashMap<String, Arc<dyn MethodHandler>>>,
    fallback: Arc<dyn MethodHandler>,
    logging: DispatchLogging,
    /// Total calls dispatched.
    calls_total: AtomicU64,
    /// Calls answered with a reply.
    calls_succeeded: AtomicU64,
    /// Calls answered with an error status.
    calls_failed: AtomicU64,
    /// Calls that reached the fallback handler.
    calls_unimplemented: AtomicU64,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(UnimplementedHandler),
            logging: DispatchLogging::default(),
            calls_total: AtomicU64::new(0),
            calls_succeeded: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
            calls_unimplemented: AtomicU64::new(0),
        }
    }

    pub fn with_logging(mut self, logging: DispatchLogging) -> Self {
        self.logging = logging;
        self
    }

    /// Register a handler, replacing any previous one for the same method.
    pub fn add_handler<H>(&mut self, service: &str, method: &str, handler: H)
    where
        H: MethodHandler + 'static,
    {
        self.add_shared_handler(service, method, Arc::new(handler));
    }

    pub fn add_shared_handler(
        &mut self,
        service: &str,
        method: &str,
        handler: Arc<dyn MethodHandler>,
    ) {
        debug!(service = %service, method = %method, "Registering handler");
        self.handlers
            .entry(service.to_string())
            .or_default()
            .insert(method.to_string(), handler);
    }

    /// Build a matcher table from `entries` and register it.
    ///
    /// Nothing is registered when the table is invalid.
    pub fn add_matchers(
        &mut self,
        service: &str,
        method: &str,
        entries: &[Value],
    ) -> Result<(), RegistryError> {
        let handler =
            MatchingHandler::from_entries(entries).map_err(|source| RegistryError::InvalidMatchers {
                service: service.to_string(),
                method: method.to_string(),
                source,
            })?;
        self.add_handler(service, method, handler);
        Ok(())
    }

    pub fn has_handler(&self, service: &str, method: &str) -> bool {
        self.registered(service, method).is_some()
    }

    fn registered(&self, service: &str, method: &str) -> Option<&Arc<dyn MethodHandler>> {
        self.handlers.get(service).and_then(|methods| methods.get(method))
    }

    /// Look up the handler for a method, falling back to unimplemented.
    pub fn handler(&self, service: &str, method: &str) -> Arc<dyn MethodHandler> {
        self.registered(service, method)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Route a call to its handler.
    pub async fn dispatch(&self, call: &RpcCall) -> Result<Value, Status> {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let handler = match self.registered(&call.service, &call.method) {
            Some(handler) => Arc::clone(handler),
            None => {
                self.calls_unimplemented.fetch_add(1, Ordering::Relaxed);
                if self.logging.log_unmatched {
                    warn!(
                        service = %call.service,
                        method = %call.method,
                        "No handler registered for method"
                    );
                }
                Arc::clone(&self.fallback)
            }
        };

        let result = handler.handle(call).await;

        match &result {
            Ok(_) => {
                self.calls_succeeded.fetch_add(1, Ordering::Relaxed);
                if self.logging.log_matches {
                    info!(service = %call.service, method = %call.method, "Call handled");
                }
            }
            Err(status) => {
                self.calls_failed.fetch_add(1, Ordering::Relaxed);
                if self.logging.log_unmatched && status.code() != Code::Unimplemented {
                    warn!(
                        service = %call.service,
                        method = %call.method,
                        code = ?status.code(),
                        message = %status.message(),
                        "Call failed"
                    );
                }
            }
        }

        result
    }

    /// Enumerate the methods of `services` from a loaded descriptor pool.
    pub fn bind_services(
        &self,
        pool: &DescriptorPool,
        services: &[String],
    ) -> Result<Vec<BoundService>, RegistryError> {
        services
            .iter()
            .map(|name| {
                let service = pool
                    .get_service_by_name(name)
                    .ok_or_else(|| RegistryError::UnknownService(name.clone()))?;

                let methods = service
                    .methods()
                    .map(|method| {
                        let streaming =
                            method.is_client_streaming() || method.is_server_streaming();
                        BoundMethod {
                            registered: !streaming && self.has_handler(name, method.name()),
                            name: method.name().to_string(),
                            streaming,
                        }
                    })
                    .collect();

                Ok(BoundService {
                    name: name.clone(),
                    methods,
                })
            })
            .collect()
    }

    /// Serve a protobuf request for `method`.
    ///
    /// The request is converted to a structured value using proto field
    /// names, with default values present and 64-bit integers as strings.
    /// The reply is converted back into the method's output type.
    pub async fn invoke(
        &self,
        method: &MethodDescriptor,
        request: &DynamicMessage,
    ) -> Result<DynamicMessage, Status> {
        if method.is_client_streaming() || method.is_server_streaming() {
            return Err(Status::unimplemented(NOT_IMPLEMENTED_MESSAGE));
        }
        let service = method.parent_service().full_name().to_string();

        let options = SerializeOptions::new()
            .use_proto_field_name(true)
            .skip_default_fields(false)
            .stringify_64_bit_integers(true);
        let payload = request
            .serialize_with_options(serde_json::value::Serializer, &options)
            .map_err(|e| Status::invalid_argument(format!("Failed to read request: {}", e)))?;

        let call = RpcCall::new(service, method.name(), payload);
        let reply = self.dispatch(&call).await?;

        let options = DeserializeOptions::new().deny_unknown_fields(false);
        DynamicMessage::deserialize_with_options(method.output(), reply, &options).map_err(|e| {
            Status::internal(format!(
                "Reply does not fit {}: {}",
                method.output().full_name(),
                e
            ))
        })
    }

    /// Get total calls dispatched.
    pub fn total_calls(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get calls answered with a reply.
    pub fn total_succeeded(&self) -> u64 {
        self.calls_succeeded.load(Ordering::Relaxed)
    }

    /// Get calls answered with an error status.
    pub fn total_failed(&self) -> u64 {
        self.calls_failed.load(Ordering::Relaxed)
    }

    /// Get calls served by the fallback.
    pub fn total_unimplemented(&self) -> u64 {
        self.calls_unimplemented.load(Ordering::Relaxed)
    }
}
