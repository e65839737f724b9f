//! Accessory protocol (AAP) session layer.
//!
//! This module contains the protocol constants, decoders and command
//! encoders, plus the [`session::Session`] state machine that ties them
//! together and the tokio [`driver`] running it.

pub mod capability;
pub mod driver;
pub mod encoder;
pub mod parser;
pub mod protocol;
pub mod session;
