//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup and on reload):
//!     headers[] → cors[] → rest[]
//!     → builder.rs (validate, normalize, skip bad entries)
//!     → matcher.rs (compile wildcard / parameterized URLs)
//!     → RouteTable (immutable) swapped into SharedRouteTable
//!
//! Incoming Request (method, path)
//!     → router.rs (exact lookup, then sorted wildcard scan)
//!     → Return: AssignedRoute, MethodNotAllowed or NotFound
//! ```
//!
//! # Design Decisions
//! - Routes compiled up front, immutable at runtime
//! - No regex in hot path (segment comparison only)
//! - Deterministic: wildcard URLs are scanned in alphabetical order, first match wins

pub mod builder;
pub mod matcher;
pub mod route;
pub mod router;

pub use builder::{RouteConfigError, RouteTableBuilder};
pub use route::{AssignedRoute, CorsInfo, HeaderInfo, RouteInfo};
pub use router::{RouteMatch, RouteSummary, RouteTable, SharedRouteTable};
