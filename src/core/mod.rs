//! # Core Engine Components
//!
//! Protocol-neutral building blocks shared by every transport.
//!
//! ## Components
//! - **Codec**: per-protocol wire format contract and message capabilities
//! - **Reader**: frame extraction from streams and datagram validation
//! - **Session**: per-request state, session builders and handler context
//! - **Registry**: protocol name to codec / session builder / module factory
//!
//! ## Security
//! - Frame length is validated from the header before any payload is buffered
//! - Datagrams must contain exactly one complete frame

pub mod codec;
pub mod reader;
pub mod registry;
pub mod session;
