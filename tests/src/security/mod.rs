//! Hostile-wire simulations: forged, replayed, tampered, and flooding
//! frames injected straight onto the transport.

pub mod wire_hardening;
