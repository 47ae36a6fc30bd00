//! # Switchboard Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── integration/        # Cross-subsystem choreography
//! │   ├── flows.rs        # Bus, queue, and router composed by hand
//! │   └── e2e_broker.rs   # Whole brokers talking across contexts
//! │
//! └── security/           # Hostile-wire simulations
//!     └── wire_hardening.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p switchboard-tests
//!
//! # By category
//! cargo test -p switchboard-tests integration::
//! cargo test -p switchboard-tests security::
//!
//! # Benchmarks
//! cargo bench -p switchboard-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
pub mod security;
