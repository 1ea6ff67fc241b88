// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::messages::Capability;
use crate::policy::{FilterSet4, FilterSet6};
use rib::{Asn, Prefix4};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Hold time proposed to peers when the host does not configure one.
pub const DEFAULT_HOLD_TIME: u16 = 180;

/// How long a session waits in OpenSent for the peer's Open before
/// presuming it dead. RFC 4271 §8 suggests a large value.
pub const DEFAULT_OPEN_HOLD_TIME: u16 = 240;

/// Per-peer engine configuration. The engine never reads files; hosts
/// build this from whatever configuration system they have.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionConfig {
    /// Name used to tag log entries for this session.
    pub name: String,

    /// Local autonomous system number.
    pub asn: Asn,

    /// Local BGP identifier, host byte order.
    pub id: u32,

    /// Hold time proposed in our Open. The negotiated value is the
    /// minimum of both sides; zero disables timers.
    pub hold_time: u16,

    /// Seconds to wait in OpenSent before giving up on the peer.
    pub open_hold_time: u16,

    /// Expected peer ASN. `None` accepts a peer with any ASN.
    pub remote_asn: Option<u32>,

    /// Advertise four-octet ASN support (RFC 6793).
    pub four_octet: bool,

    /// Advertise the IPv6 unicast multiprotocol capability and carry IPv6
    /// routes over this session.
    pub ipv6_enabled: bool,

    /// Additional capabilities to offer verbatim in our Open.
    pub capabilities: Vec<Capability>,

    /// Disable connection collision detection over the event bus.
    pub no_collision_detection: bool,

    /// Nexthop attached to routes advertised to this peer, unless
    /// third-party nexthop rules keep the original.
    pub nexthop: Ipv4Addr,

    /// Nexthop for IPv6 announcements.
    pub nexthop6: Option<Ipv6Addr>,

    /// The peering LAN. An egress route whose nexthop already lies inside
    /// it is forwarded with that nexthop untouched; an ingress route whose
    /// nexthop lies outside it is ignored.
    pub peering_lan: Option<Prefix4>,

    /// Always rewrite the nexthop to `nexthop`, peering LAN or not.
    pub forced_default_nexthop: bool,

    /// Accept ingress routes with any nexthop.
    pub no_nexthop_check: bool,

    /// Local administrative weight given to routes learned from this
    /// peer. Not exchanged on the wire.
    pub weight: u32,

    /// Ingress filter for IPv4 routes.
    pub allow_import4: FilterSet4,

    /// Egress filter for IPv4 routes.
    pub allow_export4: FilterSet4,

    /// Ingress filter for IPv6 routes.
    pub allow_import6: FilterSet6,

    /// Egress filter for IPv6 routes.
    pub allow_export6: FilterSet6,
}

impl SessionConfig {
    /// A config with every optional behavior at its default: 4-byte ASN
    /// support on, IPv4 only, no filters, no peering LAN restriction.
    pub fn new(name: impl Into<String>, asn: Asn, id: u32) -> Self {
        Self {
            name: name.into(),
            asn,
            id,
            hold_time: DEFAULT_HOLD_TIME,
            open_hold_time: DEFAULT_OPEN_HOLD_TIME,
            remote_asn: None,
            four_octet: true,
            ipv6_enabled: false,
            capabilities: Vec::new(),
            no_collision_detection: false,
            nexthop: Ipv4Addr::UNSPECIFIED,
            nexthop6: None,
            peering_lan: None,
            forced_default_nexthop: false,
            no_nexthop_check: false,
            weight: 0,
            allow_import4: FilterSet4::default(),
            allow_export4: FilterSet4::default(),
            allow_import6: FilterSet6::default(),
            allow_export6: FilterSet6::default(),
        }
    }
}
