//! Adapters
//!
//! Outbound implementations of the domain ports.

pub mod outbound;
