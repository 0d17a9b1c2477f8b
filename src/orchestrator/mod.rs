//! Runtime around the session manager.
//!
//! Covers the reactor loop and the concrete collaborators: process
//! launching, power transitions, the headless desktop and prompts.

pub mod desktop;
pub mod dialogs;
pub mod power;
pub mod reactor;
pub mod spawner;
