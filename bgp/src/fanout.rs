// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process-local fan-out of route events between sessions. Delivery is
//! synchronous, inside the publisher's call, in subscription order per
//! subscriber; there is no total order across subscribers. The bus holds
//! only weak references: unsubscribing a session before dropping it is the
//! documented precondition that keeps the session ↔ bus wiring acyclic.
//!
//! The bus is not thread-safe by itself. A host running sessions on
//! distinct threads must serialize bus access along with the session
//! locks.

use crate::messages::PathAttribute;
use rib::Prefix;
use slog::Logger;
use std::sync::{Arc, Mutex, Weak};

/// Routes became reachable, or a better path took over. `attrs` is the
/// shared attribute vector; receivers clone before mutating.
#[derive(Debug, Clone)]
pub struct RouteAddEvent {
    pub prefixes: Vec<Prefix>,
    pub attrs: Arc<Vec<PathAttribute>>,
}

/// Routes became unreachable.
#[derive(Debug, Clone)]
pub struct RouteWithdrawEvent {
    pub prefixes: Vec<Prefix>,
}

/// A second session claims a peer we are negotiating with.
#[derive(Debug, Clone, Copy)]
pub struct CollisionEvent {
    pub peer_bgp_id: u32,
}

#[derive(Debug, Clone)]
pub enum RouteEvent {
    Add(RouteAddEvent),
    Withdraw(RouteWithdrawEvent),
    Collision(CollisionEvent),
}

/// Implemented by anything that wants route events, i.e. sessions.
/// Returns whether the event was acted upon; publishers use the count
/// (collision resolution hinges on it).
pub trait RouteEventReceiver: Send {
    fn handle_route_event(&mut self, ev: &RouteEvent) -> bool;
}

pub struct Fanout {
    subscribers: Vec<(u64, Weak<Mutex<dyn RouteEventReceiver>>)>,
    next_id: u64,
    log: Logger,
}

impl Fanout {
    pub fn new(log: Logger) -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 1,
            log,
        }
    }

    /// Register a receiver, returning its subscription id. Ids increase
    /// monotonically and are never reused.
    pub fn subscribe(
        &mut self,
        recv: Weak<Mutex<dyn RouteEventReceiver>>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, recv));
        id
    }

    pub fn unsubscribe(&mut self, id: u64) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver an event to every live subscriber except the sender.
    /// Returns how many subscribers reported handling it. Publishers that
    /// are not subscribed (e.g. the host injecting routes) pass sender 0.
    pub fn publish(&mut self, sender: u64, ev: &RouteEvent) -> usize {
        self.subscribers.retain(|(id, recv)| {
            if recv.strong_count() == 0 {
                slog::debug!(self.log, "fanout: dropping dead subscriber {id}");
                return false;
            }
            true
        });

        let mut handled = 0;
        for (id, recv) in &self.subscribers {
            if *id == sender {
                continue;
            }
            let Some(recv) = recv.upgrade() else {
                continue;
            };
            let mut recv = recv.lock().expect("lock subscriber");
            if recv.handle_route_event(ev) {
                handled += 1;
            }
        }
        handled
    }
}
