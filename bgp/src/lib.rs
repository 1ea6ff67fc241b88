// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A transport-agnostic BGP-4 speaker engine. Hosts own the sockets and
//! the configuration; the engine consumes framed protocol bytes through
//! [`session::Session::run`], emits bytes through a host provided
//! [`session::ByteSink`], and keeps a shared Routing Information Base
//! current. Sessions within a process exchange reachability changes over
//! the [`fanout::Fanout`] event bus.

use crate::messages::PathAttribute;

pub mod clock;
pub mod config;
pub mod error;
pub mod fanout;
pub mod log;
pub mod messages;
pub mod planner;
pub mod policy;
pub mod session;
pub mod sink;

#[cfg(test)]
mod proptest;

#[cfg(test)]
mod test;

/// The well-known BGP port. The engine never opens it; hosts do.
pub const BGP_PORT: u16 = 179;

/// The IPv4 unicast Routing Information Base of a speaker, shared across
/// its sessions.
pub type Rib4 = rib::Rib<rib::Prefix4, Vec<PathAttribute>>;

/// The IPv6 unicast Routing Information Base.
pub type Rib6 = rib::Rib<rib::Prefix6, Vec<PathAttribute>>;

pub use error::Error;
pub use session::{
    ByteSink, FsmState, RunOutcome, Session, TickOutcome, subscribe,
    unsubscribe,
};

pub(crate) const COMPONENT_BGP: &str = "bgp";
