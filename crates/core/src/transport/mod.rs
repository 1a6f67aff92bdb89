//! Network transport for device connections.
//!
//! Devices connect over TCP, one connection per capture run. The listener
//! polls a non-blocking socket so [`crate::Server::stop`] is honoured
//! promptly, and hands every accepted connection to its own thread.

pub mod tcp;
