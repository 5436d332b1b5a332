//! # Protocol Layer
//!
//! Request routing and the built-in wire protocols.
//!
//! ## Components
//! - **Router**: rpc name to `(service, handler)` resolution
//! - **JSON**: length-prefixed JSON frames, rpc name carried as a string
//! - **Binary**: magic/version/length packets with bincode payloads and integer commands
//!
//! Additional protocols plug in by implementing [`Codec`](crate::core::codec::Codec)
//! and [`SessionBuilder`](crate::core::session::SessionBuilder) and registering
//! both with the [`Registry`](crate::core::registry::Registry).

pub mod binary;
pub mod json;
pub mod router;

#[cfg(test)]
mod tests;
