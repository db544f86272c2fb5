//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Assembled request
//!     → auth.rs (select auth service, request/response with deadline)
//!     → correlator.rs (register pending entry under a new correlation id)
//!     → forwarder.rs (send to primary, best-effort copies to secondaries)
//!     → reply envelope arrives at the gateway reply address
//!     → correlator.rs completes the waiting HTTP request
//! ```
//!
//! # Design Decisions
//! - The auth call always completes before the primary send
//! - Secondary copies carry no reply address; their replies are never awaited
//! - A bus-side handler still running after a timeout is not cancelled

pub mod auth;
pub mod correlator;
pub mod forwarder;

pub use auth::{authenticate, select_auth_service};
pub use correlator::{Correlator, PendingReply, PendingSummary};
pub use forwarder::{forward, TraceContext, HTTP_REQUEST};
