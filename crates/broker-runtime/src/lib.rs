//! # Broker Runtime
//!
//! The composition root that turns the five subsystems into a running
//! message broker for one execution context. Embedders construct a
//! [`Broker`] over their transport and persistence adapters (or the bundled
//! in-memory ones), start it, and talk to the facade.
//!
//! ## Components
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `config` | [`BrokerConfig`] with env-var loading and validation |
//! | `pipeline` | [`WirePipeline`]: compression, encryption, chunking, inbound policy |
//! | `memory` | In-memory transport hub and persistence store |
//! | `broker` | The [`Broker`] facade, lifecycle, and background tasks |
//!
//! ## Design Principles
//!
//! - **One Broker Per Context**: each execution context runs its own broker;
//!   the only shared state is the transport between them and whatever the
//!   persistence store holds.
//! - **Adapters At The Edge**: the host supplies transport and persistence;
//!   everything inside is host-agnostic.
//! - **Fail Inward, Not Across**: a frame that fails any wire-pipeline stage
//!   is dropped and counted in this context; it never panics the pump or
//!   leaks partially decoded data to handlers.

pub mod broker;
pub mod config;
pub mod memory;
pub mod pipeline;

pub use broker::{Broker, BrokerStats, QueueSnapshot};
pub use config::BrokerConfig;
pub use memory::{MemoryHub, MemoryStore, MemoryTransport};
pub use pipeline::{PipelineConfig, WirePipeline};

use thiserror::Error;

/// Errors produced by broker construction, lifecycle, and the facade.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The configuration cannot be run safely.
    #[error("Invalid broker configuration: {0}")]
    Config(String),

    /// `start` was called on a broker that is already running.
    #[error("Broker already started")]
    AlreadyStarted,

    /// A bus operation failed.
    #[error("Bus error: {0}")]
    Bus(#[from] sb_01_channel_bus::BusError),

    /// A delivery queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] sb_02_delivery_queue::QueueError),

    /// Durable state could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(#[from] shared_types::PersistenceError),

    /// Durable state could not be encoded or decoded.
    #[error("State serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
