//! Error types for the AAP session daemon.
//!
//! This module defines the errors that can surface from the transport,
//! configuration and session layers. Decoding failures live in
//! [`crate::aap::parser::ProtoError`] and never leave the dispatcher.

use bluer::Address;
use thiserror::Error;

use crate::aap::capability::Capability;

/// Main error type for the daemon.
#[derive(Error, Debug)]
pub enum AapError {
   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Invalid address: {0}")]
   InvalidAddress(#[from] bluer::InvalidAddress),

   #[error("Device not configured: {0}")]
   DeviceNotConfigured(Address),

   #[error("No device configured")]
   NoDeviceConfigured,

   #[error("Feature not supported: {0}")]
   FeatureNotSupported(Capability),

   #[error("Session closed")]
   SessionClosed,

   #[error("Handshake not completed")]
   HandshakeIncomplete,

   #[error("Connection lost")]
   ConnectionLost,

   #[error("Connection closed")]
   ConnectionClosed,

   #[error("Outbound queue full")]
   QueueFull,

   #[error("Request timeout")]
   RequestTimeout,

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),
}

/// Convenience type alias for Results with `AapError`.
pub type Result<T> = std::result::Result<T, AapError>;
