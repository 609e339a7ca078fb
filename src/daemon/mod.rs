// src/daemon/mod.rs

//! Control daemon and its request protocol
//!
//! The daemon is the only component that talks to clients. It owns the
//! registry handle, the cache manager and the installer, and runs one request
//! at a time:
//!
//! ```text
//! client ──► socket ──► Request::parse ──► Command ──► CacheManager / Installer
//!                                                           │
//!                                                       Registry
//! ```

pub mod protocol;
pub mod server;

pub use protocol::{Command, Request};
pub use server::{Daemon, Flow};
