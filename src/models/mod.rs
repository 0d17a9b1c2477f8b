//! Domain model module declarations.

pub mod client;
pub mod properties;
pub mod protocol;
