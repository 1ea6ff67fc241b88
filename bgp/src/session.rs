// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-peer finite state machine. A session consumes framed protocol
//! bytes through [`Session::run`], writes outbound bytes to a host
//! provided [`ByteSink`], keeps the shared RIB current, and exchanges
//! route events with sibling sessions over the fanout bus. The engine
//! never blocks and never performs I/O of its own.
//!
//! Hosts must serialize calls into one session (`run`, `tick`, `start`,
//! `stop`, `reset_*`); sessions on distinct threads may share the RIB and
//! the bus through their mutexes.

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::Error;
use crate::fanout::{
    CollisionEvent, Fanout, RouteAddEvent, RouteEvent, RouteEventReceiver,
    RouteWithdrawEvent,
};
use crate::log::session_log;
use crate::messages::{
    Capability, CapabilityCode, CeaseErrorSubcode, ErrorCode, FsmErrorSubcode,
    Message, MessageType, NotificationMessage, OpenMessage, PathAttribute,
    PathAttributeTypeCode, UpdateErrorSubcode, UpdateMessage,
};
use crate::planner;
use crate::sink::MessageSink;
use crate::{Rib4, Rib6};
use rib::{Prefix, Prefix4, Prefix6, RouteSource, lock};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The states a session may be in. There is no Connect or Active state:
/// transport setup belongs to the host, a session first sees bytes once a
/// connection exists.
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, JsonSchema,
)]
pub enum FsmState {
    /// Initial state. Only `start` or an inbound Open moves us out.
    Idle,

    /// Our Open is on the wire, waiting for the peer's.
    OpenSent,

    /// Opens exchanged, waiting for the peer's Keepalive.
    OpenConfirm,

    /// Exchanging Update, Keepalive and Notification messages.
    Established,

    /// Terminal software-fault state, entered when the output sink fails
    /// or an internal invariant breaks. Only `reset_hard` escapes it.
    Broken,
}

impl FsmState {
    fn as_str(&self) -> &'static str {
        match self {
            FsmState::Idle => "idle",
            FsmState::OpenSent => "open sent",
            FsmState::OpenConfirm => "open confirm",
            FsmState::Established => "established",
            FsmState::Broken => "broken",
        }
    }
}

impl Display for FsmState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a `run` call amounted to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RunOutcome {
    /// Unrecoverable fault; the session is Broken until `reset_hard`.
    Fatal,

    /// The peer violated the protocol; a Notification was sent and the
    /// session is Idle.
    LocalProtocolError,

    /// Input processed.
    Ok,

    /// The peer reported an error; its Notification was consumed and the
    /// session is Idle.
    RemoteProtocolError,

    /// A partial message is buffered; feed more bytes.
    Incomplete,
}

/// What a `tick` call amounted to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TickOutcome {
    /// Nothing heard from the peer within the hold time; Notification
    /// sent, session Idle.
    HoldTimerExpired,

    Ok,

    KeepaliveSent,
}

/// Where outbound bytes go. The engine calls this synchronously from
/// within `run`/`tick`/`start`; implementations hand the bytes to their
/// transport. A failure is terminal for the session.
pub trait ByteSink: Send {
    fn send(&mut self, buf: &[u8]) -> Result<(), Error>;
}

/// Handy for tests and hosts that drain a buffer themselves.
impl ByteSink for Vec<u8> {
    fn send(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.extend_from_slice(buf);
        Ok(())
    }
}

impl ByteSink for std::sync::mpsc::Sender<Vec<u8>> {
    fn send(&mut self, buf: &[u8]) -> Result<(), Error> {
        std::sync::mpsc::Sender::send(self, buf.to_vec())
            .map_err(|_| Error::Disconnected)
    }
}

pub struct Session<Out: ByteSink> {
    config: SessionConfig,
    state: FsmState,
    sink: MessageSink,
    out: Out,
    rib4: Arc<Mutex<Rib4>>,
    rib6: Arc<Mutex<Rib6>>,
    fanout: Option<Arc<Mutex<Fanout>>>,
    subscription: u64,
    clock: Arc<dyn Clock>,
    log: Logger,

    peer_bgp_id: u32,
    peer_asn: u32,
    hold_time: u16,
    use_4b: bool,
    last_sent: Duration,
    last_recv: Duration,
}

impl<Out: ByteSink> Session<Out> {
    pub fn new(
        config: SessionConfig,
        out: Out,
        rib4: Arc<Mutex<Rib4>>,
        rib6: Arc<Mutex<Rib6>>,
        fanout: Option<Arc<Mutex<Fanout>>>,
        clock: Arc<dyn Clock>,
        log: Logger,
    ) -> Session<Out> {
        let now = clock.now();
        Session {
            config,
            state: FsmState::Idle,
            sink: MessageSink::default(),
            out,
            rib4,
            rib6,
            fanout,
            subscription: 0,
            clock,
            log,
            peer_bgp_id: 0,
            peer_asn: 0,
            hold_time: 0,
            use_4b: false,
            last_sent: now,
            last_recv: now,
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    /// Peer ASN learned from its Open; zero before that.
    pub fn peer_asn(&self) -> u32 {
        self.peer_asn
    }

    /// Peer BGP identifier learned from its Open; zero before that.
    pub fn peer_bgp_id(&self) -> u32 {
        self.peer_bgp_id
    }

    /// The negotiated hold time; zero before negotiation, and zero when
    /// both sides disabled timers.
    pub fn negotiated_hold(&self) -> u16 {
        self.hold_time
    }

    /// True once both sides advertised four-octet ASN support.
    pub fn uses_four_octet(&self) -> bool {
        self.use_4b
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn rib4(&self) -> Arc<Mutex<Rib4>> {
        Arc::clone(&self.rib4)
    }

    pub fn rib6(&self) -> Arc<Mutex<Rib6>> {
        Arc::clone(&self.rib6)
    }

    pub fn subscription_id(&self) -> u64 {
        self.subscription
    }

    /// Send our Open to the peer. Idle only.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.state != FsmState::Idle {
            return Err(Error::InternalInvariant(format!(
                "start in state {}",
                self.state
            )));
        }
        let open = self.make_open(self.config.four_octet, self.config.hold_time);
        self.last_recv = self.clock.now();
        self.state = FsmState::OpenSent;
        session_log!(self, info, "open sent to peer");
        self.write_message(Message::Open(open))
    }

    /// Shut the session down: Cease the peer when Established, flush
    /// buffers, go Idle. Idempotent; a Broken session stays Broken.
    pub fn stop(&mut self) -> Result<(), Error> {
        if self.state == FsmState::Broken {
            return Err(Error::InternalInvariant("stop on broken session".into()));
        }
        if self.state == FsmState::Established {
            self.send_notification(
                ErrorCode::Cease,
                CeaseErrorSubcode::AdministrativeShutdown as u8,
            )?;
        }
        self.sink.drain();
        self.state = FsmState::Idle;
        session_log!(self, info, "session stopped");
        Ok(())
    }

    /// Administrative reset: notify the peer, then hard-reset.
    pub fn reset_soft(&mut self) -> Result<(), Error> {
        if self.state == FsmState::Broken {
            return Err(Error::InternalInvariant(
                "soft reset on broken session".into(),
            ));
        }
        self.send_notification(
            ErrorCode::Cease,
            CeaseErrorSubcode::AdministrativeReset as u8,
        )?;
        self.reset_hard();
        Ok(())
    }

    /// Drop buffered input and return to Idle. Always safe, including
    /// from Broken.
    pub fn reset_hard(&mut self) {
        self.sink.drain();
        self.state = FsmState::Idle;
        session_log!(self, info, "session reset");
    }

    /// Feed received bytes into the state machine. Ticks the clock first,
    /// then processes every complete message buffered.
    pub fn run(&mut self, bytes: &[u8]) -> RunOutcome {
        if self.state == FsmState::Broken {
            session_log!(self, error, "run on broken session, reset required");
            return RunOutcome::Fatal;
        }

        if let Err(e) = self.sink.fill(bytes) {
            session_log!(self, error, "input sink overflow: {}", e);
            self.state = FsmState::Broken;
            return RunOutcome::Fatal;
        }

        match self.tick() {
            Err(_) => return RunOutcome::Fatal,
            Ok(TickOutcome::HoldTimerExpired) => {
                return RunOutcome::LocalProtocolError;
            }
            Ok(_) => {}
        }
        if !bytes.is_empty() {
            self.last_recv = self.clock.now();
        }

        let mut outcome = RunOutcome::Incomplete;
        loop {
            let frame = match self.sink.pour() {
                Ok(Some(frame)) => frame.to_vec(),
                Ok(None) => break,
                Err(e) => {
                    session_log!(self, error, "stream out of sync: {}", e);
                    let (code, subcode) = e.notification_codes();
                    self.sink.drain();
                    self.state = FsmState::Idle;
                    return match self.send_notification(code, subcode) {
                        Ok(()) => RunOutcome::LocalProtocolError,
                        Err(_) => RunOutcome::Fatal,
                    };
                }
            };

            let msg = match Message::from_wire(&frame, self.use_4b) {
                Ok(msg) => msg,
                Err(e) => {
                    if frame.len() > 18
                        && frame[18] == MessageType::Notification as u8
                    {
                        session_log!(self, error, "invalid notification received");
                        self.state = FsmState::Idle;
                        return RunOutcome::LocalProtocolError;
                    }
                    session_log!(self, error, "message parse failed: {}", e);
                    let (code, subcode) = e.notification_codes();
                    self.state = FsmState::Idle;
                    return match self.send_notification(code, subcode) {
                        Ok(()) => RunOutcome::LocalProtocolError,
                        Err(_) => RunOutcome::Fatal,
                    };
                }
            };

            let r = match self.handle_message(msg) {
                Ok(r) => r,
                Err(_) => return RunOutcome::Fatal,
            };
            outcome = merge_outcome(outcome, r);
            if matches!(
                outcome,
                RunOutcome::LocalProtocolError | RunOutcome::RemoteProtocolError
            ) && self.state == FsmState::Idle
            {
                // the session closed; whatever is buffered is stale
                self.sink.drain();
                break;
            }
        }
        outcome
    }

    /// Check time-based events: hold timer expiry in Established and
    /// OpenSent, keepalive emission every third of the hold time. `run`
    /// invokes this implicitly.
    pub fn tick(&mut self) -> Result<TickOutcome, Error> {
        let now = self.clock.now();
        match self.state {
            FsmState::Established => {
                if self.hold_time == 0 {
                    return Ok(TickOutcome::Ok);
                }
                let hold = Duration::from_secs(u64::from(self.hold_time));
                if now.saturating_sub(self.last_recv) > hold {
                    session_log!(self, error, "peer hold timer expired");
                    self.send_notification(ErrorCode::HoldTimerExpired, 0)?;
                    self.state = FsmState::Idle;
                    return Ok(TickOutcome::HoldTimerExpired);
                }
                if now.saturating_sub(self.last_sent) >= hold / 3 {
                    self.write_message(Message::KeepAlive)?;
                    return Ok(TickOutcome::KeepaliveSent);
                }
                Ok(TickOutcome::Ok)
            }
            FsmState::OpenSent => {
                if self.config.open_hold_time == 0 {
                    return Ok(TickOutcome::Ok);
                }
                let limit =
                    Duration::from_secs(u64::from(self.config.open_hold_time));
                if now.saturating_sub(self.last_recv) > limit {
                    session_log!(self, error, "no open from peer, giving up");
                    self.send_notification(ErrorCode::HoldTimerExpired, 0)?;
                    self.state = FsmState::Idle;
                    return Ok(TickOutcome::HoldTimerExpired);
                }
                Ok(TickOutcome::Ok)
            }
            _ => Ok(TickOutcome::Ok),
        }
    }

    fn make_open(&self, four_octet: bool, hold_time: u16) -> OpenMessage {
        let asn = self.config.asn.as_u32();
        let mut open = if four_octet {
            OpenMessage::new4(asn, hold_time, self.config.id)
        } else {
            let asn2 = if asn > u32::from(u16::MAX) {
                crate::messages::AS_TRANS
            } else {
                asn as u16
            };
            OpenMessage::new2(asn2, hold_time, self.config.id)
        };
        if self.config.ipv6_enabled {
            open.add_capability(Capability::MultiprotocolExtensions {
                afi: crate::messages::Afi::Ipv6 as u16,
                safi: crate::messages::Safi::Unicast as u8,
            });
        }
        for cap in &self.config.capabilities {
            open.add_capability(cap.clone());
        }
        open
    }

    fn write_message(&mut self, msg: Message) -> Result<(), Error> {
        let buf = match msg.to_wire() {
            Ok(buf) => buf,
            Err(e) => {
                session_log!(self, error, "message serialization failed: {}", e);
                self.state = FsmState::Broken;
                return Err(e);
            }
        };
        self.last_sent = self.clock.now();
        if let Err(e) = self.out.send(&buf) {
            session_log!(self, error, "output sink failed: {}", e);
            self.state = FsmState::Broken;
            return Err(e);
        }
        Ok(())
    }

    fn send_notification(
        &mut self,
        code: ErrorCode,
        subcode: u8,
    ) -> Result<(), Error> {
        self.write_message(Message::Notification(NotificationMessage::new(
            code, subcode,
        )))
    }

    fn handle_message(&mut self, msg: Message) -> Result<RunOutcome, Error> {
        if let Message::Notification(n) = &msg {
            session_log!(self, error, "notification from peer: {}", n);
            self.state = FsmState::Idle;
            return Ok(RunOutcome::RemoteProtocolError);
        }

        let legal = matches!(
            (self.state, msg.typ()),
            (FsmState::Idle, MessageType::Open)
                | (FsmState::OpenSent, MessageType::Open)
                | (FsmState::OpenConfirm, MessageType::KeepAlive)
                | (FsmState::Established, MessageType::KeepAlive)
                | (FsmState::Established, MessageType::Update)
        );
        if !legal {
            session_log!(
                self,
                error,
                "{:?} message not valid in this state",
                msg.typ()
            );
            let subcode = match self.state {
                // quietly discard in Idle
                FsmState::Idle => return Ok(RunOutcome::LocalProtocolError),
                FsmState::OpenSent => FsmErrorSubcode::InOpenSent,
                FsmState::OpenConfirm => FsmErrorSubcode::InOpenConfirm,
                FsmState::Established => FsmErrorSubcode::InEstablished,
                FsmState::Broken => FsmErrorSubcode::Unspecified,
            };
            self.state = FsmState::Idle;
            self.send_notification(ErrorCode::Fsm, subcode as u8)?;
            return Ok(RunOutcome::LocalProtocolError);
        }

        match (self.state, msg) {
            (FsmState::Idle, Message::Open(om)) => self.open_from_idle(om),
            (FsmState::OpenSent, Message::Open(om)) => {
                self.open_from_open_sent(om)
            }
            (FsmState::OpenConfirm, Message::KeepAlive) => {
                self.enter_established()
            }
            (FsmState::Established, Message::KeepAlive) => Ok(RunOutcome::Ok),
            (FsmState::Established, Message::Update(um)) => {
                self.update_recv(um)
            }
            _ => Err(self.broken("unreachable message dispatch")),
        }
    }

    fn broken(&mut self, what: &str) -> Error {
        session_log!(self, error, "internal fault: {}", what);
        self.state = FsmState::Broken;
        Error::InternalInvariant(what.into())
    }

    /// Common Open processing: peer identity checks, collision
    /// resolution, parameter negotiation.
    fn open_recv(&mut self, om: &OpenMessage) -> Result<RunOutcome, Error> {
        let remote_asn = om.asn();
        if let Some(expected) = self.config.remote_asn
            && remote_asn != expected
        {
            session_log!(
                self,
                error,
                "peer claims asn {}, expected {}",
                remote_asn,
                expected
            );
            self.state = FsmState::Idle;
            self.send_notification(
                ErrorCode::Open,
                crate::messages::OpenErrorSubcode::BadPeerAS as u8,
            )?;
            return Ok(RunOutcome::LocalProtocolError);
        }

        // RFC 4271 §6.2: a hold time of one or two seconds is not
        // acceptable, zero disables the timers.
        if om.hold_time != 0 && om.hold_time < 3 {
            session_log!(self, error, "unacceptable hold time {}", om.hold_time);
            self.state = FsmState::Idle;
            self.send_notification(
                ErrorCode::Open,
                crate::messages::OpenErrorSubcode::UnacceptableHoldTime as u8,
            )?;
            return Ok(RunOutcome::LocalProtocolError);
        }

        if !self.config.no_collision_detection
            && let Some(bus) = self.fanout.clone()
        {
            let objections = lock!(bus).publish(
                self.subscription,
                &RouteEvent::Collision(CollisionEvent {
                    peer_bgp_id: om.id,
                }),
            );
            if objections > 0 && !self.resolve_collision(om.id, true)? {
                return Ok(RunOutcome::LocalProtocolError);
            }
        }

        self.hold_time = self.config.hold_time.min(om.hold_time);
        self.peer_bgp_id = om.id;
        self.peer_asn = remote_asn;
        self.use_4b = self.config.four_octet
            && om.has_capability(CapabilityCode::FourOctetAs as u8);

        for cap in om.capabilities() {
            if let Capability::Unknown { code, .. } = cap {
                session_log!(
                    self,
                    info,
                    "peer offered unrecognized capability {}",
                    code
                );
            }
        }
        Ok(RunOutcome::Ok)
    }

    /// Decide a connection collision. The speaker with the numerically
    /// higher BGP identifier keeps its session. Returns true when this
    /// session survives; a losing session Ceases the peer and goes Idle.
    fn resolve_collision(
        &mut self,
        peer_bgp_id: u32,
        is_new: bool,
    ) -> Result<bool, Error> {
        let local_wins = self.config.id > peer_bgp_id;
        // For an inbound second session the local speaker winning means
        // this (new) FSM is the one to drop; the surviving FSM already
        // exists. For the existing FSM it is the other way around.
        let we_lose = if is_new { local_wins } else { !local_wins };
        if we_lose {
            session_log!(
                self,
                info,
                "connection collision with {:08x}, closing this session",
                peer_bgp_id
            );
            self.state = FsmState::Idle;
            self.send_notification(
                ErrorCode::Cease,
                CeaseErrorSubcode::ConnectionCollisionResolution as u8,
            )?;
            Ok(false)
        } else {
            Ok(true)
        }
    }

    /// Passive open: the peer spoke first. Reply with our Open and wait
    /// for its Keepalive. The reply advertises our own capability set,
    /// not the negotiated intersection: a four-octet speaker must still
    /// offer the capability (and carry its real ASN in it) even when the
    /// peer did not.
    fn open_from_idle(&mut self, om: OpenMessage) -> Result<RunOutcome, Error> {
        let r = self.open_recv(&om)?;
        if r != RunOutcome::Ok {
            return Ok(r);
        }
        let reply = self.make_open(self.config.four_octet, self.hold_time);
        self.state = FsmState::OpenConfirm;
        self.write_message(Message::Open(reply))?;
        Ok(RunOutcome::Ok)
    }

    fn open_from_open_sent(
        &mut self,
        om: OpenMessage,
    ) -> Result<RunOutcome, Error> {
        let r = self.open_recv(&om)?;
        if r != RunOutcome::Ok {
            return Ok(r);
        }
        self.state = FsmState::OpenConfirm;
        self.write_message(Message::KeepAlive)?;
        Ok(RunOutcome::Ok)
    }

    /// OpenConfirm plus the peer's Keepalive: the session is up. Confirm
    /// with our Keepalive and advertise the current table.
    fn enter_established(&mut self) -> Result<RunOutcome, Error> {
        self.state = FsmState::Established;
        session_log!(
            self,
            info,
            "session established with {:08x} (asn {})",
            self.peer_bgp_id,
            self.peer_asn
        );
        self.write_message(Message::KeepAlive)?;

        for (attrs, prefixes) in self.table_groups() {
            self.emit_routes(&attrs, prefixes, Vec::new())?;
        }
        Ok(RunOutcome::Ok)
    }

    /// Snapshot the RIB as advertisement groups: entries that entered
    /// together (same update id) with the same attribute vector pack into
    /// one group.
    #[allow(clippy::type_complexity)]
    fn table_groups(&self) -> Vec<(Arc<Vec<PathAttribute>>, Vec<Prefix>)> {
        let mut groups: BTreeMap<
            (u64, usize),
            (Arc<Vec<PathAttribute>>, Vec<Prefix>),
        > = BTreeMap::new();

        {
            let rib = lock!(self.rib4);
            for e in rib.iter() {
                groups
                    .entry((e.update_id, Arc::as_ptr(&e.attrs) as usize))
                    .or_insert_with(|| (Arc::clone(&e.attrs), Vec::new()))
                    .1
                    .push(Prefix::V4(e.prefix));
            }
        }
        {
            let rib = lock!(self.rib6);
            for e in rib.iter() {
                groups
                    .entry((e.update_id, Arc::as_ptr(&e.attrs) as usize))
                    .or_insert_with(|| (Arc::clone(&e.attrs), Vec::new()))
                    .1
                    .push(Prefix::V6(e.prefix));
            }
        }
        groups.into_values().collect()
    }

    fn is_ebgp(&self) -> bool {
        self.peer_asn != self.config.asn.as_u32()
    }

    /// Ingress Update processing in Established.
    fn update_recv(&mut self, um: UpdateMessage) -> Result<RunOutcome, Error> {
        if let Some(code) = um.missing_well_known() {
            session_log!(
                self,
                error,
                "update announces routes without attribute {}",
                code
            );
            self.state = FsmState::Idle;
            self.write_message(Message::Notification(NotificationMessage {
                error_code: ErrorCode::Update as u8,
                error_subcode: UpdateErrorSubcode::MissingWellKnownAttribute
                    as u8,
                data: vec![code],
            }))?;
            return Ok(RunOutcome::LocalProtocolError);
        }

        let mut um = um;
        if self.use_4b {
            // AS4_PATH has no business on a four-octet session
            if um.drop_attr(PathAttributeTypeCode::As4Path as u8) {
                session_log!(self, info, "dropped AS4_PATH from 4b peer");
            }
        } else if self.config.four_octet {
            if um.restore_as_path().is_err() {
                session_log!(self, error, "malformed AS4_PATH from peer");
                self.state = FsmState::Idle;
                self.send_notification(
                    ErrorCode::Update,
                    UpdateErrorSubcode::MalformedAsPath as u8,
                )?;
                return Ok(RunOutcome::LocalProtocolError);
            }
            um.restore_aggregator();
        }

        for a in &um.path_attributes {
            if let crate::messages::PathAttributeValue::Unknown {
                type_code,
                ..
            } = &a.value
            {
                session_log!(
                    self,
                    info,
                    "carrying unrecognized path attribute {}",
                    type_code
                );
            }
        }

        // Announcements with a nexthop outside the peering LAN are
        // ignored; their withdraws still count.
        let announcements_valid = if um.nlri.is_empty() {
            true
        } else {
            match (um.nexthop4(), &self.config.peering_lan) {
                (Some(nh), Some(lan))
                    if !self.config.no_nexthop_check && !lan.includes(nh) =>
                {
                    session_log!(
                        self,
                        warn,
                        "ignoring announcement with nexthop {} outside peering lan",
                        nh
                    );
                    false
                }
                _ => true,
            }
        };

        // Ingress policy. Prefixes the filter rejects are withdrawn from
        // the local view in case an earlier policy accepted them.
        let mut accepted4 = Vec::new();
        let mut rejected4 = Vec::new();
        if announcements_valid {
            for p in &um.nlri {
                if p.valid_for_rib() && self.config.allow_import4.allows(p) {
                    accepted4.push(*p);
                } else {
                    rejected4.push(*p);
                }
            }
        }
        let mut accepted6 = Vec::new();
        let mut rejected6 = Vec::new();
        if let Some(reach) = um.mp_reach() {
            for p in &reach.nlri {
                if p.valid_for_rib() && self.config.allow_import6.allows(p) {
                    accepted6.push(*p);
                } else {
                    rejected6.push(*p);
                }
            }
        }

        let withdrawn4: Vec<Prefix4> = um.withdrawn.clone();
        let withdrawn6: Vec<Prefix6> = um
            .mp_unreach()
            .map(|u| u.withdrawn.clone())
            .unwrap_or_default();

        // The stored attribute vector is shared by every entry from this
        // update; MP reachability attributes are per-message, not per-path.
        let mut stored = um.path_attributes.clone();
        stored.retain(|a| {
            a.type_code() != PathAttributeTypeCode::MpReachNlri as u8
                && a.type_code() != PathAttributeTypeCode::MpUnreachNlri as u8
        });
        let stored = Arc::new(stored);

        let source = if self.is_ebgp() {
            RouteSource::Ebgp
        } else {
            RouteSource::Ibgp
        };
        let ibgp_asn =
            (source == RouteSource::Ibgp).then_some(self.peer_asn);

        let mut gone: Vec<Prefix> = Vec::new();
        let mut adds: Vec<(Arc<Vec<PathAttribute>>, Prefix)> = Vec::new();
        {
            let mut rib = lock!(self.rib4);
            for p in withdrawn4.iter().chain(rejected4.iter()) {
                let w = rib.withdraw(self.peer_bgp_id, *p);
                if !w.still_reachable {
                    gone.push(Prefix::V4(*p));
                } else if let Some(r) = w.replacement {
                    adds.push((r.attrs, Prefix::V4(*p)));
                }
            }
            for e in rib.insert_many(
                self.peer_bgp_id,
                &accepted4,
                Arc::clone(&stored),
                self.config.weight,
                source,
                ibgp_asn,
            ) {
                adds.push((e.attrs, Prefix::V4(e.prefix)));
            }
        }
        {
            let mut rib = lock!(self.rib6);
            for p in withdrawn6.iter().chain(rejected6.iter()) {
                let w = rib.withdraw(self.peer_bgp_id, *p);
                if !w.still_reachable {
                    gone.push(Prefix::V6(*p));
                } else if let Some(r) = w.replacement {
                    adds.push((r.attrs, Prefix::V6(*p)));
                }
            }
            for e in rib.insert_many(
                self.peer_bgp_id,
                &accepted6,
                Arc::clone(&stored),
                self.config.weight,
                source,
                ibgp_asn,
            ) {
                adds.push((e.attrs, Prefix::V6(e.prefix)));
            }
        }

        if let Some(bus) = self.fanout.clone() {
            let mut bus = lock!(bus);
            if !gone.is_empty() {
                bus.publish(
                    self.subscription,
                    &RouteEvent::Withdraw(RouteWithdrawEvent {
                        prefixes: gone,
                    }),
                );
            }
            for ev in group_adds(adds) {
                bus.publish(self.subscription, &RouteEvent::Add(ev));
            }
        }

        Ok(RunOutcome::Ok)
    }

    /// Egress: prepare the attributes for this peer, run export policy,
    /// plan messages and put them on the wire. Returns whether anything
    /// was sent.
    fn emit_routes(
        &mut self,
        attrs: &[PathAttribute],
        announce: Vec<Prefix>,
        withdraw: Vec<Prefix>,
    ) -> Result<bool, Error> {
        let mut announce: Vec<Prefix> = announce
            .into_iter()
            .filter(|p| match p {
                Prefix::V4(p4) => self.config.allow_export4.allows(p4),
                Prefix::V6(p6) => self.config.allow_export6.allows(p6),
            })
            .collect();
        if self.config.nexthop6.is_none()
            && announce.iter().any(|p| !p.is_v4())
        {
            session_log!(self, warn, "no ipv6 nexthop, keeping v6 routes back");
            announce.retain(Prefix::is_v4);
        }
        if announce.is_empty() && withdraw.is_empty() {
            return Ok(false);
        }

        let mut tpl = UpdateMessage {
            path_attributes: attrs.to_vec(),
            ..Default::default()
        };

        if !announce.is_empty() {
            if self.is_ebgp() {
                tpl.drop_non_transitive();
                // LOCAL_PREF is meaningful only inside an AS
                tpl.drop_attr(PathAttributeTypeCode::LocalPref as u8);
            }
            tpl.mark_forwarded_unknowns();

            if announce.iter().any(Prefix::is_v4) {
                let rewrite = match tpl.nexthop4() {
                    _ if self.config.forced_default_nexthop => true,
                    None => true,
                    Some(nh) => match &self.config.peering_lan {
                        // third party nexthop: a nexthop already on the
                        // peering LAN is passed through
                        Some(lan) => !lan.includes(nh),
                        None => true,
                    },
                };
                if rewrite {
                    tpl.set_nexthop4(self.config.nexthop);
                }
            }

            let asn = self.config.asn.as_u32();
            if self.use_4b {
                // normalize to the four-octet view (upgrades a two-octet
                // stored path, folds in and removes any stray AS4_PATH)
                tpl.restore_as_path()?;
                tpl.restore_aggregator();
                tpl.prepend4(asn)?;
            } else if self.config.four_octet {
                tpl.downgrade_as_path()?;
                tpl.downgrade_aggregator();
                tpl.prepend2(asn, true)?;
            } else {
                // A two-octet-only speaker keeps a two-octet path. Locally
                // originated attribute sets start out four-octet; fold them
                // down and drop the companion rather than speak AS4_PATH.
                if tpl.as_path().map(|p| p.four_octet).unwrap_or(false) {
                    tpl.downgrade_as_path()?;
                    tpl.drop_attr(PathAttributeTypeCode::As4Path as u8);
                }
                tpl.prepend2(asn, false)?;
            }
        }

        let updates = planner::plan(
            &tpl.path_attributes,
            &announce,
            &withdraw,
            self.config.nexthop6,
        )?;
        let sent = !updates.is_empty();
        for update in updates {
            self.write_message(Message::Update(update))?;
        }
        Ok(sent)
    }
}

fn merge_outcome(acc: RunOutcome, r: RunOutcome) -> RunOutcome {
    match (acc, r) {
        (RunOutcome::LocalProtocolError, _) => RunOutcome::LocalProtocolError,
        (_, RunOutcome::LocalProtocolError) => RunOutcome::LocalProtocolError,
        (RunOutcome::RemoteProtocolError, _)
        | (_, RunOutcome::RemoteProtocolError) => {
            RunOutcome::RemoteProtocolError
        }
        _ => RunOutcome::Ok,
    }
}

fn group_adds(
    adds: Vec<(Arc<Vec<PathAttribute>>, Prefix)>,
) -> Vec<RouteAddEvent> {
    let mut groups: Vec<RouteAddEvent> = Vec::new();
    for (attrs, prefix) in adds {
        match groups.iter_mut().find(|g| Arc::ptr_eq(&g.attrs, &attrs)) {
            Some(g) => g.prefixes.push(prefix),
            None => groups.push(RouteAddEvent {
                prefixes: vec![prefix],
                attrs,
            }),
        }
    }
    groups
}

impl<Out: ByteSink> RouteEventReceiver for Session<Out> {
    fn handle_route_event(&mut self, ev: &RouteEvent) -> bool {
        match ev {
            RouteEvent::Add(add) => {
                if self.state != FsmState::Established {
                    return false;
                }
                self.emit_routes(&add.attrs, add.prefixes.clone(), Vec::new())
                    .unwrap_or(false)
            }
            RouteEvent::Withdraw(wd) => {
                if self.state != FsmState::Established {
                    return false;
                }
                self.emit_routes(&[], Vec::new(), wd.prefixes.clone())
                    .unwrap_or(false)
            }
            RouteEvent::Collision(c) => {
                if self.config.no_collision_detection
                    || c.peer_bgp_id != self.peer_bgp_id
                    || !matches!(
                        self.state,
                        FsmState::OpenSent | FsmState::OpenConfirm
                    )
                {
                    return false;
                }
                self.resolve_collision(c.peer_bgp_id, false).unwrap_or(false)
            }
        }
    }
}

/// Wire a session into the fanout bus, recording its subscription id.
/// Publishers identify themselves by this id so they never hear their own
/// events back.
pub fn subscribe<Out: ByteSink + 'static>(
    bus: &Arc<Mutex<Fanout>>,
    session: &Arc<Mutex<Session<Out>>>,
) -> u64 {
    let recv: Arc<Mutex<dyn RouteEventReceiver>> = session.clone();
    let id = lock!(bus).subscribe(Arc::downgrade(&recv));
    lock!(session).subscription = id;
    id
}

/// Detach a session from the bus. Must happen before the session is
/// dropped; the bus only holds weak references, but a stale entry would
/// linger until the next publish.
pub fn unsubscribe<Out: ByteSink>(
    bus: &Arc<Mutex<Fanout>>,
    session: &Arc<Mutex<Session<Out>>>,
) {
    let id = {
        let mut s = lock!(session);
        let id = s.subscription;
        s.subscription = 0;
        id
    };
    if id != 0 {
        lock!(bus).unsubscribe(id);
    }
}
