//! gRPC Mock Server
//!
//! Serves gRPC methods from canned request/reply fixtures or from custom
//! handlers. Methods without a handler answer with `UNIMPLEMENTED`.
//!
//! # Features
//!
//! - **Partial Matching**: Requests match when they contain the fields of a
//!   pattern; nested messages match partially, lists must be equal
//! - **Ordered Tables**: The first matching entry wins, so a trailing empty
//!   `match` acts as a default reply
//! - **Custom Handlers**: Any `Fn(&RpcCall) -> Result<Value, Status>` can
//!   serve a method
//! - **Descriptor Binding**: Enumerate methods from a compiled descriptor
//!   set and serve dynamic protobuf messages
//!
//! # Example Configuration
//!
//! ```yaml
//! services:
//!   - name: demo.PlateService
//!     methods:
//!       - name: Lookup
//!         matchers:
//!           - match:
//!               plate: ABC1234
//!             reply:
//!               plate: ABC1234
//!               sum: 200
//! ```

pub mod config;
pub mod handler;
pub mod matcher;
pub mod registry;
pub mod table;

pub use config::MockServerConfig;
pub use handler::{DispatchOutcome, MatchingHandler, MethodHandler, RpcCall};
pub use matcher::matches;
pub use registry::ServiceRegistry;
pub use table::{MatchRule, MatcherTable, TableError};
