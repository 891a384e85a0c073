//! Client side of the news transport (NNTP, RFC 3977).
//!
//! [`Session`] is the command/response state machine; it is generic over the
//! byte stream so tests can drive it with scripted server output.
//! [`framing`] holds the line and block primitives it is built on.

mod connector;
pub mod framing;
mod session;

pub use connector::{NetStream, TlsStream, open};
pub use session::{Article, Articles, ChannelInfo, Response, Session, SessionState};
