//! AAP session handling for true-wireless earbuds.
//!
//! The [`aap`] module holds a transport-independent session state machine
//! and its packet codecs; [`bluetooth`] carries it over an L2CAP channel.

pub mod aap;
pub mod bluetooth;
pub mod config;
pub mod error;
pub mod event;
