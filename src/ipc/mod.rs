//! Local IPC layer.
//!
//! Two named pipes (Windows) or Unix domain sockets (Linux/macOS): one for
//! session protocol clients and one for `session-broker-ctl` commands.

pub mod client_link;
pub mod codec;
pub mod server;
