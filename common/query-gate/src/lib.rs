//! Query Gate - read-only safety layer for BigQuery MCP servers
//!
//! Decides whether an agent-supplied SQL query may run, and rewrites it into
//! its final form when it may:
//!
//! - **Pattern matching**: `*`-glob allow-lists for dataset names
//! - **Access policy**: which projects and datasets are reachable
//! - **SQL validation**: single read-only statement, banned keywords, row limits
//! - **Gate**: access first, then validation, returning the first rejection
//!
//! Everything here is synchronous and performs no I/O. Policies are immutable
//! once built; [`PolicyStore`] swaps whole snapshots for hot reload.
//!
//! # Example
//!
//! ```rust
//! use query_gate::{AccessPolicy, GateRequest, ProjectEntry, SecurityPolicy};
//!
//! let access = AccessPolicy::new(
//!     "proj1",
//!     vec![ProjectEntry::new("proj1", vec!["prod_*".into()])],
//! )
//! .unwrap();
//! let security = SecurityPolicy::default();
//!
//! let request = GateRequest::new("SELECT 1").project(Some("proj1")).dataset(Some("prod_sales"));
//! let allowed = query_gate::authorize(&request, &security, &access).unwrap();
//! assert_eq!(allowed.query, "SELECT 1 LIMIT 20");
//! ```

pub mod access;
pub mod error;
pub mod gate;
pub mod lexer;
pub mod pattern;
pub mod policy;
pub mod snapshot;
pub mod validator;

pub use access::{AccessPolicy, ProjectEntry};
pub use error::{PolicyError, Rejection, RejectionKind};
pub use gate::{authorize, Authorized, GateRequest};
pub use pattern::{matches, AccessPattern};
pub use policy::{SecurityPolicy, DEFAULT_BANNED_KEYWORDS, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT};
pub use snapshot::{PolicySnapshot, PolicyStore};
pub use validator::{validate, validate_with_row_limit, LimitAction, TableReference, ValidatedQuery};
