//! Cross-subsystem choreography tests.

pub mod e2e_broker;
pub mod flows;
