// Core trading domain
pub mod trading;

// Market data types
pub mod market;

// Risk management domain
pub mod risk;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Event stream
pub mod events;

// Domain-specific error types
pub mod errors;
