//! Method handlers.
//!
//! Every RPC method is served by a [`MethodHandler`]. Matcher-based handlers,
//! user closures and the unimplemented fallback share this one calling
//! convention so the registry can treat them interchangeably.

use crate::table::{MatcherTable, TableError};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tonic::{Code, Status};

/// Status message for requests no matcher accepted.
pub const NO_MATCH_MESSAGE: &str = "No match to request";
/// Status message returned by the fallback handler.
pub const NOT_IMPLEMENTED_MESSAGE: &str = "Not implemented";

/// An inbound RPC call as seen by handlers.
#[derive(Debug, Clone, Default)]
pub struct RpcCall {
    /// Fully qualified service name
    pub service: String,
    /// Method name within the service
    pub method: String,
    /// Request payload
    pub request: Value,
    /// Call metadata (ASCII headers)
    pub metadata: HashMap<String, String>,
}

impl RpcCall {
    pub fn new(service: impl Into<String>, method: impl Into<String>, request: Value) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            request,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Handler for a single RPC method.
///
/// The result is either the reply payload or a status carrying the error
/// code and detail.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, call: &RpcCall) -> Result<Value, Status>;
}

#[async_trait]
impl<F> MethodHandler for F
where
    F: Fn(&RpcCall) -> Result<Value, Status> + Send + Sync,
{
    async fn handle(&self, call: &RpcCall) -> Result<Value, Status> {
        self(call)
    }
}

/// Result of dispatching a request over a matcher table.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A rule matched; carries a copy of its reply
    Matched(Value),
    /// Nothing matched; carries the request for diagnostics
    NoMatch(Value),
}

impl DispatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, DispatchOutcome::Matched(_))
    }

    /// Convert into the handler result.
    ///
    /// A miss becomes an `Unknown` status whose details hold the request
    /// serialized as JSON.
    pub fn into_result(self) -> Result<Value, Status> {
        match self {
            DispatchOutcome::Matched(reply) => Ok(reply),
            DispatchOutcome::NoMatch(request) => Err(no_match_status(&request)),
        }
    }
}

fn no_match_status(request: &Value) -> Status {
    let details = serde_json::to_vec(request).unwrap_or_default();
    Status::with_details(Code::Unknown, NO_MATCH_MESSAGE, Bytes::from(details))
}

/// Serves a method from a matcher table.
#[derive(Debug, Clone)]
pub struct MatchingHandler {
    table: Arc<MatcherTable>,
}

impl MatchingHandler {
    pub fn new(table: MatcherTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    /// Validate `entries` and build a handler over them.
    pub fn from_entries(entries: &[Value]) -> Result<Self, TableError> {
        Ok(Self::new(MatcherTable::build(entries)?))
    }

    pub fn table(&self) -> &MatcherTable {
        &self.table
    }

    /// Return the reply of the first matching rule.
    pub fn dispatch(&self, request: &Value) -> DispatchOutcome {
        match self.table.first_match(request) {
            Some(rule) => DispatchOutcome::Matched(rule.response.clone()),
            None => DispatchOutcome::NoMatch(request.clone()),
        }
    }
}

#[async_trait]
impl MethodHandler for MatchingHandler {
    async fn handle(&self, call: &RpcCall) -> Result<Value, Status> {
        self.dispatch(&call.request).into_result()
    }
}

/// Fallback for methods without a registered handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnimplementedHandler;

#[async_trait]
impl MethodHandler for UnimplementedHandler {
    async fn handle(&self, _call: &RpcCall) -> Result<Value, Status> {
        Err(Status::unimplemented(NOT_IMPLEMENTED_MESSAGE))
    }
}
