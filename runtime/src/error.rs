//! Error taxonomy for the runtime's public API.
//!
//! Internally, requests travel between a fiber and the I/O thread carrying
//! plain `std::io::Result`s — that is the actual wire contract described in
//! the request protocol. `RuntimeError` only appears at the public API
//! boundary, where it replaces the original negative-integer return
//! convention with a typed error.

use thiserror::Error;

/// Error returned by the runtime's public, fiber-blocking API.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The underlying system or network call failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `Runtime::init` failed to allocate the resources it needs (queues,
    /// worker threads, or the I/O thread). The runtime is not usable after
    /// this error.
    #[error("failed to initialize runtime: {0}")]
    Init(std::io::Error),

    /// A child process could not be spawned.
    #[error("failed to spawn program: {0}")]
    Spawn(std::io::Error),
}

/// Result alias used throughout the public API.
pub type Result<T> = std::result::Result<T, RuntimeError>;
