#![doc = include_str!("../README.md")]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]
// If this was in Cargo.toml, it would cover tests as well
#![warn(
    missing_docs,
    clippy::panic_in_result_fn,
    clippy::missing_assert_message,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

mod platform_check;

#[macro_use]
mod macros;

pub mod binding;
pub mod error;
pub mod iface;
pub mod listener;
pub mod multiplexer;
pub mod options;

mod interrupt;
mod select;

/// Platform-specific plumbing.
///
/// Only Unix is supported; everything in here is a thin layer over libc that the rest of the crate
/// builds its safe types on.
pub(crate) mod os {
    #[cfg(unix)]
    pub(crate) mod unix;
}

pub use {
    binding::{AddressFamily, BindSpec, BindTarget, BindingKind, SocketType},
    error::{BindReason, Error, ResourceReason, Result},
    iface::{
        InterfaceAddress, InterfaceEvent, InterfaceEventSink, InterfaceMonitor, InterfaceName,
        LinkRegistry,
    },
    listener::{Connection, Incoming, ListenerOptions, StreamListener},
    multiplexer::SocketMultiplexer,
    options::SocketOptions,
};

mod misc;
pub(crate) use misc::*;

#[cfg(test)]
#[path = "../tests/index.rs"]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects, clippy::indexing_slicing)]
mod tests;
