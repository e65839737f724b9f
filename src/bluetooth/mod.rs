//! Bluetooth communication layer.
//!
//! This module provides the L2CAP socket transport sessions run over.

pub mod l2cap;
