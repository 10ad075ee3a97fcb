//! Domain Layer
//!
//! Location values, address classification and the store port.

pub mod entities;
pub mod ports;
pub mod value_objects;
