//! Directed-advertiser inventory protocol for Wirepas-style mesh stacks
//!
//! This crate implements the application side of the directed-advertiser
//! (DA) inventory system on top of a closed mesh stack:
//!
//! - [`Tag`]: battery-powered advertisers that periodically scan for a
//!   router, send it their telemetry and pick up new settings from its
//!   acknowledgment.
//! - [`Router`]: low-latency headnodes that collect tag telemetry and forward
//!   it to the sink in aggregate packets.
//! - [`control`]: control nodes that send application data on demand with a
//!   backup route, and the routers that serve them.
//!
//! The mesh stack is abstracted by the [`Stack`] trait. Real firmware glue
//! implements it on top of the stack's function table, while simulations
//! implement it on top of a model of the network. Events from the stack are
//! delivered by calling the `on_*` methods of the protocol objects, and their
//! tasks are run by a [`Scheduler`].
//!
//! The crate logs through the [`log`] facade and never installs a logger.
//!
//! [`log`]: https://docs.rs/log


#![cfg_attr(not(test), no_std)]

#![deny(missing_docs)]


pub mod aggregate;
pub mod configs;
pub mod control;
pub mod messages;
pub mod router;
pub mod scheduler;
pub mod stack;
pub mod tag;
pub mod time;
pub mod tlv;
pub mod util;

mod error;

#[cfg(test)]
mod mock;


pub use crate::{
    configs::{ControlNodeConfig, RouterConfig, TagConfig},
    control::{ControlNode, ControlRouter},
    error::Error,
    messages::Message,
    router::Router,
    scheduler::{Schedule, Scheduler},
    stack::Stack,
    tag::{Tag, TagApp},
    time::{Duration, Instant},
};
