//! # Protocol Registry
//!
//! Process-wide mapping from protocol name to its [`Codec`] and
//! [`SessionBuilder`], plus the factory that builds server modules for it.
//!
//! The registry is an explicit object: construct one at startup, register
//! protocols, then pass it by reference to module constructors.
//!
//! ## Concurrency
//! - Writers serialise on a mutex, copy the current tables, apply their change
//!   and publish the new tables atomically (last writer for a key wins).
//! - Readers load the published tables through [`ArcSwap`] without locking, so a
//!   lookup never blocks on registration and never observes a half-applied write.
//!
//! Entries are stored type-erased and recovered with the message type the caller
//! expects; asking for a protocol with the wrong message type is a
//! [`RpcError::ProtocolMismatch`] configuration error.

use arc_swap::ArcSwap;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::core::codec::{Codec, Message, SharedCodec};
use crate::core::session::{SessionBuilder, SharedSessionBuilder};
use crate::error::{RpcError, Result};
use crate::protocol::binary::{BinaryCodec, BinarySessionBuilder, BINARY_PROTOCOL};
use crate::protocol::json::{JsonCodec, JsonSessionBuilder, JSON_PROTOCOL};
use crate::transport::{ModuleFactory, ProtocolModules};

type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Clone, Default)]
struct Tables {
    codecs: HashMap<String, Entry>,
    builders: HashMap<String, Entry>,
    factories: HashMap<String, Arc<dyn ModuleFactory>>,
}

/// Codec, session builder and module factory tables keyed by protocol name.
pub struct Registry {
    tables: ArcSwap<Tables>,
    writer: Mutex<()>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            tables: ArcSwap::from_pointee(Tables::default()),
            writer: Mutex::new(()),
        }
    }

    /// Registry preloaded with the built-in `json` and `bin` protocols.
    ///
    /// The `bin` session builder starts with an empty command table; replace it
    /// with [`Registry::register_session_builder`] to map command ids.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register_protocol(JSON_PROTOCOL, JsonCodec, JsonSessionBuilder);
        registry.register_protocol(BINARY_PROTOCOL, BinaryCodec, BinarySessionBuilder::new());
        registry
    }

    fn update<F: FnOnce(&mut Tables)>(&self, apply: F) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Tables::clone(&self.tables.load());
        apply(&mut next);
        self.tables.store(Arc::new(next));
    }

    /// Register `codec` under `name`, replacing any previous entry.
    pub fn register_codec<C: Codec>(&self, name: &str, codec: C) {
        let shared: SharedCodec<C::Message> = Arc::new(codec);
        let entry: Entry = Arc::new(shared);
        self.update(|t| {
            t.codecs.insert(name.to_string(), entry);
        });
        debug!(protocol = name, "Codec registered");
    }

    /// Register `builder` under `name`, replacing any previous entry.
    pub fn register_session_builder<M, B>(&self, name: &str, builder: B)
    where
        M: Message,
        B: SessionBuilder<M>,
    {
        let shared: SharedSessionBuilder<M> = Arc::new(builder);
        let entry: Entry = Arc::new(shared);
        self.update(|t| {
            t.builders.insert(name.to_string(), entry);
        });
        debug!(protocol = name, "Session builder registered");
    }

    /// Register a codec and session builder together, and make the protocol
    /// available to configuration-driven module construction.
    pub fn register_protocol<C, B>(&self, name: &str, codec: C, builder: B)
    where
        C: Codec,
        B: SessionBuilder<C::Message>,
    {
        let codec: SharedCodec<C::Message> = Arc::new(codec);
        let builder: SharedSessionBuilder<C::Message> = Arc::new(builder);
        let factory: Arc<dyn ModuleFactory> = Arc::new(ProtocolModules::<C::Message>::new());
        let codec_entry: Entry = Arc::new(codec);
        let builder_entry: Entry = Arc::new(builder);
        self.update(|t| {
            t.codecs.insert(name.to_string(), codec_entry);
            t.builders.insert(name.to_string(), builder_entry);
            t.factories.insert(name.to_string(), factory);
        });
        debug!(protocol = name, "Protocol registered");
    }

    /// Codec registered under `name` for message type `M`.
    pub fn codec<M: Message>(&self, name: &str) -> Result<SharedCodec<M>> {
        let tables = self.tables.load();
        let entry = tables
            .codecs
            .get(name)
            .ok_or_else(|| RpcError::CodecNotFound(name.to_string()))?;
        entry
            .downcast_ref::<SharedCodec<M>>()
            .cloned()
            .ok_or_else(|| RpcError::ProtocolMismatch(name.to_string()))
    }

    /// Session builder registered under `name` for message type `M`.
    pub fn session_builder<M: Message>(&self, name: &str) -> Result<SharedSessionBuilder<M>> {
        let tables = self.tables.load();
        let entry = tables
            .builders
            .get(name)
            .ok_or_else(|| RpcError::SessionBuilderNotFound(name.to_string()))?;
        entry
            .downcast_ref::<SharedSessionBuilder<M>>()
            .cloned()
            .ok_or_else(|| RpcError::ProtocolMismatch(name.to_string()))
    }

    /// Module factory for a protocol registered with [`Registry::register_protocol`].
    pub fn module_factory(&self, name: &str) -> Result<Arc<dyn ModuleFactory>> {
        self.tables
            .load()
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| RpcError::CodecNotFound(name.to_string()))
    }

    pub fn has_codec(&self, name: &str) -> bool {
        self.tables.load().codecs.contains_key(name)
    }

    pub fn has_session_builder(&self, name: &str) -> bool {
        self.tables.load().builders.contains_key(name)
    }

    /// Names with a registered codec, sorted.
    pub fn protocols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.load().codecs.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::binary::BinaryFrame;
    use crate::protocol::json::JsonFrame;

    #[test]
    fn test_lookup_before_registration_is_not_found() {
        let registry = Registry::new();
        assert!(matches!(
            registry.codec::<JsonFrame>("json"),
            Err(RpcError::CodecNotFound(_))
        ));
        assert!(matches!(
            registry.session_builder::<JsonFrame>("json"),
            Err(RpcError::SessionBuilderNotFound(_))
        ));
        assert!(registry.module_factory("json").is_err());
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = Registry::new();
        registry.register_codec("wire", JsonCodec);
        registry.register_codec("wire", BinaryCodec);

        assert_eq!(registry.protocols(), vec!["wire".to_string()]);
        let codec = registry.codec::<BinaryFrame>("wire").unwrap();
        assert_eq!(codec.name(), BINARY_PROTOCOL);
        assert!(matches!(
            registry.codec::<JsonFrame>("wire"),
            Err(RpcError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn test_builtin_protocols() {
        let registry = Registry::with_builtin();
        assert_eq!(
            registry.protocols(),
            vec![BINARY_PROTOCOL.to_string(), JSON_PROTOCOL.to_string()]
        );
        assert!(registry.session_builder::<JsonFrame>(JSON_PROTOCOL).is_ok());
        assert!(registry.session_builder::<BinaryFrame>(BINARY_PROTOCOL).is_ok());
        assert!(registry.module_factory(JSON_PROTOCOL).is_ok());
    }

    #[test]
    fn test_session_builder_overwrite() {
        let registry = Registry::with_builtin();
        registry.register_session_builder(
            BINARY_PROTOCOL,
            BinarySessionBuilder::new().with_command(1, "Echo"),
        );
        assert!(registry.has_session_builder(BINARY_PROTOCOL));
        let builder = registry
            .session_builder::<BinaryFrame>(BINARY_PROTOCOL)
            .unwrap();
        let req = BinaryFrame::request(1, 1, b"hi".to_vec());
        assert_eq!(builder.rpc_name(&req).unwrap(), "Echo");
    }
}
