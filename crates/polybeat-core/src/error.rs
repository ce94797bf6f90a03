//! Error types for the engine.
//!
//! The scheduling core itself has no fatal error paths; all engine inputs
//! are treated as valid once range-checked by the caller. Errors only arise
//! when constructing the native audio backend.

use thiserror::Error;

/// Errors from building or running the native audio backend.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No audio output device is available.
    #[error("no audio output device available")]
    NoOutputDevice,

    /// The output device rejected the requested stream configuration.
    #[error("unsupported stream configuration: {0}")]
    StreamConfig(String),

    /// Building the output stream failed.
    #[error("failed to build audio stream: {0}")]
    BuildStream(String),

    /// Starting the output stream failed.
    #[error("failed to start audio stream: {0}")]
    PlayStream(String),
}
