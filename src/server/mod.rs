//! HTTP binding of the gateway, plus a read-only view of the commit index.

mod auth;
pub mod dto;
mod handlers;
pub mod response;
mod router;
mod validation;

pub use auth::{KEY_HEADER, SIGNATURE_HEADER, SignedRequest};
pub use router::{AppState, create_router};
pub use validation::validate_repo_name;
