//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, route lookup)
//!     → static_files.rs (unmatched GET only)
//!     → request.rs (sanitize path, build the request descriptor)
//!     → body.rs (pick a body strategy, buffer or spool)
//!     → [dispatch: auth, forward, wait for reply]
//!     → response.rs (render reply, response header transform)
//!     → headers.rs (CORS and trace headers on every outcome)
//!     → Send to client
//! ```

pub mod body;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;
pub mod static_files;

pub use request::AsyncHttpRequest;
pub use server::{AppState, HttpServer};
