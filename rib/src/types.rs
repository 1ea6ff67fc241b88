// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::Hash;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;

#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, JsonSchema,
)]
pub struct Prefix4 {
    pub value: Ipv4Addr,
    pub length: u8,
}

impl PartialOrd for Prefix4 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Prefix4 {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.value != other.value {
            return self.value.cmp(&other.value);
        }
        self.length.cmp(&other.length)
    }
}

impl Prefix4 {
    /// Create a new `Prefix4` from an address and mask length. Host bits
    /// below the mask are zeroed so equality is canonical.
    pub fn new(ip: Ipv4Addr, length: u8) -> Self {
        let mut new = Self { value: ip, length };
        new.unset_host_bits();
        new
    }

    fn mask(&self) -> u32 {
        match self.length {
            0 => 0,
            _ => (!0u32) << (32 - self.length),
        }
    }

    pub fn host_bits_are_unset(&self) -> bool {
        self.value.to_bits() & self.mask() == self.value.to_bits()
    }

    pub fn unset_host_bits(&mut self) {
        self.value = Ipv4Addr::from_bits(self.value.to_bits() & self.mask())
    }

    /// True if this prefix is equal to or more specific than `other`.
    pub fn within(&self, other: &Prefix4) -> bool {
        if self.length < other.length {
            return false;
        }
        self.value.to_bits() & other.mask() == other.value.to_bits()
    }

    /// True if the destination address falls inside this prefix, i.e. the
    /// high-order `length` bits of `addr` match.
    pub fn includes(&self, addr: Ipv4Addr) -> bool {
        addr.to_bits() & self.mask() == self.value.to_bits()
    }

    /// Check if a prefix is acceptable as a unicast RIB destination. Prefixes
    /// overlapping loopback or multicast space are not.
    pub fn valid_for_rib(&self) -> bool {
        !(self.value.is_loopback()
            || self.value.is_multicast()
            || self.value.is_unspecified() && self.length == 32)
    }
}

impl Display for Prefix4 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.length)
    }
}

impl FromStr for Prefix4 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, length) =
            s.split_once('/').ok_or("malformed prefix".to_string())?;

        let length: u8 = length
            .parse()
            .map_err(|_| "malformed length".to_string())?;
        if length > 32 {
            return Err("prefix length out of range".to_string());
        }
        Ok(Self::new(
            value.parse().map_err(|_| "malformed ip addr".to_string())?,
            length,
        ))
    }
}

#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, JsonSchema,
)]
pub struct Prefix6 {
    pub value: Ipv6Addr,
    pub length: u8,
}

impl PartialOrd for Prefix6 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Prefix6 {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.value != other.value {
            return self.value.cmp(&other.value);
        }
        self.length.cmp(&other.length)
    }
}

impl Prefix6 {
    /// Create a new `Prefix6` from an address and mask length, zeroing host
    /// bits below the mask.
    pub fn new(ip: Ipv6Addr, length: u8) -> Self {
        let mut new = Self { value: ip, length };
        new.unset_host_bits();
        new
    }

    fn mask(&self) -> u128 {
        match self.length {
            0 => 0,
            _ => (!0u128) << (128 - self.length),
        }
    }

    pub fn host_bits_are_unset(&self) -> bool {
        self.value.to_bits() & self.mask() == self.value.to_bits()
    }

    pub fn unset_host_bits(&mut self) {
        self.value = Ipv6Addr::from_bits(self.value.to_bits() & self.mask())
    }

    /// True if this prefix is equal to or more specific than `other`.
    pub fn within(&self, other: &Prefix6) -> bool {
        if self.length < other.length {
            return false;
        }
        self.value.to_bits() & other.mask() == other.value.to_bits()
    }

    /// True if the destination address falls inside this prefix.
    pub fn includes(&self, addr: Ipv6Addr) -> bool {
        addr.to_bits() & self.mask() == self.value.to_bits()
    }

    pub fn valid_for_rib(&self) -> bool {
        !(self.value.is_loopback()
            || self.value.is_multicast()
            || self.value.is_unicast_link_local()
            || self.value.is_unspecified() && self.length == 128)
    }
}

impl Display for Prefix6 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.length)
    }
}

impl FromStr for Prefix6 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, length) =
            s.split_once('/').ok_or("malformed prefix".to_string())?;

        let length: u8 = length
            .parse()
            .map_err(|_| "malformed length".to_string())?;
        if length > 128 {
            return Err("prefix length out of range".to_string());
        }
        Ok(Self::new(
            value.parse().map_err(|_| "malformed ip addr".to_string())?,
            length,
        ))
    }
}

#[derive(
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    JsonSchema,
    PartialOrd,
    Ord,
)]
pub enum Prefix {
    V4(Prefix4),
    V6(Prefix6),
}

impl Display for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::V4(p) => p.fmt(f),
            Prefix::V6(p) => p.fmt(f),
        }
    }
}

impl From<Prefix4> for Prefix {
    fn from(value: Prefix4) -> Self {
        Self::V4(value)
    }
}

impl From<Prefix6> for Prefix {
    fn from(value: Prefix6) -> Self {
        Self::V6(value)
    }
}

impl FromStr for Prefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(prefix4) = s.parse::<Prefix4>() {
            Ok(Self::V4(prefix4))
        } else if let Ok(prefix6) = s.parse::<Prefix6>() {
            Ok(Self::V6(prefix6))
        } else {
            Err("malformed prefix".to_string())
        }
    }
}

impl Prefix {
    pub fn new(ip: IpAddr, length: u8) -> Self {
        match ip {
            IpAddr::V4(ip4) => Self::V4(Prefix4::new(ip4, length)),
            IpAddr::V6(ip6) => Self::V6(Prefix6::new(ip6, length)),
        }
    }

    pub fn length(&self) -> u8 {
        match self {
            Self::V4(p4) => p4.length,
            Self::V6(p6) => p6.length,
        }
    }

    /// Containment check. Cross-family comparisons are always false.
    pub fn within(&self, other: &Prefix) -> bool {
        match (self, other) {
            (Prefix::V4(a), Prefix::V4(b)) => a.within(b),
            (Prefix::V6(a), Prefix::V6(b)) => a.within(b),
            _ => false,
        }
    }

    pub fn is_v4(&self) -> bool {
        matches!(self, Prefix::V4(_))
    }

    pub fn valid_for_rib(&self) -> bool {
        match self {
            Prefix::V4(p4) => p4.valid_for_rib(),
            Prefix::V6(p6) => p6.valid_for_rib(),
        }
    }
}

/// The address family of a route or session.
#[derive(
    Clone,
    Copy,
    Eq,
    Debug,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl From<&Prefix> for AddressFamily {
    fn from(value: &Prefix) -> Self {
        match value {
            Prefix::V4(_) => AddressFamily::Ipv4,
            Prefix::V6(_) => AddressFamily::Ipv6,
        }
    }
}

/// Prefix operations the route store needs from its key type.
pub trait RibPrefix:
    Copy + Eq + Hash + Ord + Display + Send + Sync + 'static
{
    type Addr: Copy;

    fn length(&self) -> u8;

    /// True if the high-order `length` bits of `addr` match this prefix.
    fn includes(&self, addr: Self::Addr) -> bool;

    /// True if this prefix is equal to or more specific than `other`.
    fn within(&self, other: &Self) -> bool;
}

impl RibPrefix for Prefix4 {
    type Addr = Ipv4Addr;

    fn length(&self) -> u8 {
        self.length
    }

    fn includes(&self, addr: Ipv4Addr) -> bool {
        Prefix4::includes(self, addr)
    }

    fn within(&self, other: &Self) -> bool {
        Prefix4::within(self, other)
    }
}

impl RibPrefix for Prefix6 {
    type Addr = Ipv6Addr;

    fn length(&self) -> u8 {
        self.length
    }

    fn includes(&self, addr: Ipv6Addr) -> bool {
        Prefix6::includes(self, addr)
    }

    fn within(&self, other: &Self) -> bool {
        Prefix6::within(self, other)
    }
}

#[derive(
    Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub enum Asn {
    TwoOctet(u16),
    FourOctet(u32),
}

impl Display for Asn {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Asn::TwoOctet(asn) => write!(f, "{}", asn),
            Asn::FourOctet(asn) => write!(f, "{}", asn),
        }
    }
}

impl From<u32> for Asn {
    fn from(value: u32) -> Asn {
        Asn::FourOctet(value)
    }
}

impl From<u16> for Asn {
    fn from(value: u16) -> Asn {
        Asn::TwoOctet(value)
    }
}

impl Asn {
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::TwoOctet(value) => u32::from(*value),
            Self::FourOctet(value) => *value,
        }
    }

    /// True if this ASN does not fit in a two octet field and must be
    /// represented by AS_TRANS on legacy sessions.
    pub fn is_four_octet(&self) -> bool {
        self.as_u32() > u32::from(u16::MAX)
    }
}

/// How a route entered the store. Best-path selection prefers locally
/// originated routes over EBGP-learned ones over IBGP-learned ones.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum RouteSource {
    Local,
    Ebgp,
    Ibgp,
}

impl RouteSource {
    pub(crate) fn rank(&self) -> u8 {
        match self {
            RouteSource::Local => 2,
            RouteSource::Ebgp => 1,
            RouteSource::Ibgp => 0,
        }
    }
}

impl Display for RouteSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RouteSource::Local => write!(f, "local"),
            RouteSource::Ebgp => write!(f, "ebgp"),
            RouteSource::Ibgp => write!(f, "ibgp"),
        }
    }
}

/// Selection-relevant properties of a path attribute set. The store holds
/// attributes as an opaque shared payload and consults them only through
/// this trait, so the wire-level attribute model lives with the protocol
/// crate.
pub trait PathInfo: Send + Sync + 'static {
    /// LOCAL_PREF, if attached.
    fn local_pref(&self) -> Option<u32>;

    /// MULTI_EXIT_DISC, if attached.
    fn multi_exit_disc(&self) -> Option<u32>;

    /// ORIGIN code (IGP=0 < EGP=1 < INCOMPLETE=2), if attached.
    fn origin(&self) -> Option<u8>;

    /// AS_PATH length: an AS_SEQUENCE contributes its ASN count, an AS_SET
    /// counts as one, confederation segments count zero.
    fn as_path_len(&self) -> usize;

    /// The neighboring AS this path was learned from, i.e. the leading ASN
    /// of AS_PATH. MED is only comparable between paths with equal
    /// neighboring AS.
    fn first_as(&self) -> Option<u32>;
}

/// A single candidate route. Identity is `(prefix, src_router_id)`;
/// multiple entries may exist for one prefix, one per source. Entries are
/// immutable once inserted, replacement is delete-then-insert.
#[derive(Debug)]
pub struct RibEntry<P, A> {
    pub prefix: P,

    /// Originating speaker's BGP identifier. Zero for locally originated
    /// routes.
    pub src_router_id: u32,

    /// Path attributes, shared with every other entry announced in the
    /// same update.
    pub attrs: Arc<A>,

    /// Local administrative weight. Not exchanged with peers.
    pub weight: u32,

    /// Entries that were announced or originated together carry the same
    /// update id, which lets an advertiser pack them into one message.
    pub update_id: u64,

    pub source: RouteSource,

    /// The remote ASN for IBGP-learned entries.
    pub ibgp_peer_asn: Option<u32>,
}

impl<P: Copy, A> Clone for RibEntry<P, A> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix,
            src_router_id: self.src_router_id,
            attrs: Arc::clone(&self.attrs),
            weight: self.weight,
            update_id: self.update_id,
            source: self.source,
            ibgp_peer_asn: self.ibgp_peer_asn,
        }
    }
}

impl<P: Display, A> Display for RibEntry<P, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[prefix={}, src={:08x}, source={}, group={}]",
            self.prefix, self.src_router_id, self.source, self.update_id
        )
    }
}
