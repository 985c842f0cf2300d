//! Infrastructure adapters and port definitions.

pub mod circuit_breaker;
pub mod clock;
pub mod event_bus;
pub mod memory;
pub mod ports;
pub mod resilient_generator;
