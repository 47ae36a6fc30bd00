//! # Shared Types Crate
//!
//! This crate contains the [`Message`] model, the wire envelopes, and the
//! adapter ports shared by every broker subsystem.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: All cross-subsystem types are defined here.
//! - **Envelope Authority**: `metadata.sender` is the sole source of identity;
//!   payloads MUST NOT duplicate it.
//! - **Ports, Not Products**: The transport and persistence traits describe
//!   what the host must provide; concrete adapters live in the runtime crate.

pub mod message;
pub mod persistence;
pub mod transport;
pub mod wire;

pub use message::{now_millis, ContextKind, Message, MessageMetadata, Priority, SenderInfo};
pub use persistence::{keys, PersistenceAdapter, PersistenceError};
pub use transport::{TransportAdapter, TransportError};
pub use wire::{
    ChunkEnvelope, CipherAlgorithm, CompressedEnvelope, CompressionAlgorithm, EncryptedEnvelope,
    FrameTarget, TransportFrame, WirePayload,
};
