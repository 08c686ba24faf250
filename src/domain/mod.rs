//! Domain layer - Core types and port definitions
//!
//! This module defines the object model the reconciler works with and the
//! traits (ports) that adapters implement, following hexagonal architecture
//! principles.

pub mod component;
pub mod object;
pub mod ports;

pub use component::*;
pub use object::*;
pub use ports::*;
