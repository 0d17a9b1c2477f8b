//! Session state that outlives a single client: records, deadlines and the
//! on-disk session file.

pub mod failsafe;
pub mod persistence;
pub mod store;
pub mod timers;
