// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use num_enum::TryFromPrimitive;
use rib::{Prefix4, Prefix6};
use std::fmt::{self, Display, Formatter};
use std::net::{Ipv4Addr, Ipv6Addr};

/// BGP Message types.
///
/// Ref: RFC 4271 §4.1
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Copy, Clone)]
#[repr(u8)]
pub enum MessageType {
    /// The first message sent by each side once a connection is
    /// established.
    Open = 1,

    /// Used to transfer routing information between BGP peers.
    Update = 2,

    /// Sent when an error condition is detected.
    Notification = 3,

    /// Exchanged between peers often enough not to cause the hold timer to
    /// expire.
    KeepAlive = 4,
}

/// According to RFC 4271 §4.1 the header marker is all ones.
pub const MARKER: [u8; 16] = [0xffu8; 16];

/// Length of the fixed message header: marker, length, type.
pub const HEADER_SIZE: usize = 19;

/// Largest message a BGP-4 speaker may emit or accept.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// The ASN used in two-octet fields as a placeholder for an ASN that does
/// not fit.
///
/// Ref: RFC 6793 §9
pub const AS_TRANS: u16 = 23456;

/// The version number for BGP-4.
pub const BGP4: u8 = 4;

/// Each BGP message has a fixed size header containing the all-ones
/// marker, total message length and message type.
///
/// Ref: RFC 4271 §4.1
#[derive(Debug, PartialEq, Eq)]
pub struct Header {
    /// Total length of the message, including the header. May be no larger
    /// than 4096.
    pub length: u16,

    /// Indicates the type of message.
    pub typ: MessageType,
}

impl Header {
    /// Create a new BGP message header. Length must be between 19 and 4096
    /// per RFC 4271 §4.1.
    pub fn new(length: u16, typ: MessageType) -> Result<Header, Error> {
        if (length as usize) < HEADER_SIZE {
            return Err(Error::BadMessageLength(length));
        }
        if length as usize > MAX_MESSAGE_SIZE {
            return Err(Error::BadMessageLength(length));
        }
        Ok(Header { length, typ })
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = MARKER.to_vec();
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.push(self.typ as u8);
        buf
    }

    pub fn from_wire(buf: &[u8]) -> Result<Header, Error> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::TooSmall("message header".into()));
        }
        if buf[..16] != MARKER {
            return Err(Error::NoMarker);
        }

        let length = u16::from_be_bytes([buf[16], buf[17]]);
        if (length as usize) < HEADER_SIZE
            || length as usize > MAX_MESSAGE_SIZE
        {
            return Err(Error::BadMessageLength(length));
        }

        let typ = MessageType::try_from(buf[18])
            .map_err(|_| Error::InvalidMessageType(buf[18]))?;

        Ok(Header { length, typ })
    }
}

/// One of the four BGP-4 message kinds, with whole-frame codec entry
/// points. `to_wire` produces the complete frame including the header;
/// `from_wire` consumes one.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Message {
    Open(OpenMessage),
    Update(UpdateMessage),
    Notification(NotificationMessage),
    KeepAlive,
}

impl From<OpenMessage> for Message {
    fn from(m: OpenMessage) -> Message {
        Message::Open(m)
    }
}
impl From<UpdateMessage> for Message {
    fn from(m: UpdateMessage) -> Message {
        Message::Update(m)
    }
}
impl From<NotificationMessage> for Message {
    fn from(m: NotificationMessage) -> Message {
        Message::Notification(m)
    }
}

impl Message {
    pub fn typ(&self) -> MessageType {
        match self {
            Message::Open(_) => MessageType::Open,
            Message::Update(_) => MessageType::Update,
            Message::Notification(_) => MessageType::Notification,
            Message::KeepAlive => MessageType::KeepAlive,
        }
    }

    /// Serialize to a complete frame, header included.
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let body = match self {
            Message::Open(m) => m.to_wire()?,
            Message::Update(m) => m.to_wire()?,
            Message::Notification(m) => m.to_wire(),
            Message::KeepAlive => Vec::new(),
        };
        let header =
            Header::new((body.len() + HEADER_SIZE) as u16, self.typ())?;
        let mut buf = header.to_wire();
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Parse one complete frame. `four_octet` selects the AS_PATH wire
    /// width negotiated for the session.
    pub fn from_wire(frame: &[u8], four_octet: bool) -> Result<Message, Error> {
        let header = Header::from_wire(frame)?;
        if frame.len() != header.length as usize {
            return Err(Error::BadMessageLength(header.length));
        }
        let body = &frame[HEADER_SIZE..];
        Ok(match header.typ {
            MessageType::Open => OpenMessage::from_wire(body)?.into(),
            MessageType::Update => {
                UpdateMessage::from_wire(body, four_octet)?.into()
            }
            MessageType::Notification => {
                NotificationMessage::from_wire(body)?.into()
            }
            MessageType::KeepAlive => {
                if !body.is_empty() {
                    return Err(Error::BadMessageLength(header.length));
                }
                Message::KeepAlive
            }
        })
    }
}

/// The first message sent by each side: version, sender ASN (two octets on
/// the wire, AS_TRANS when the real ASN needs four), proposed hold time,
/// BGP identifier, and optional parameters carrying capabilities.
///
/// Ref: RFC 4271 §4.2
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OpenMessage {
    /// BGP protocol version.
    pub version: u8,

    /// Autonomous system number of the sender. When the sender has a
    /// four-octet ASN this field carries AS_TRANS and the real value rides
    /// in the four-octet-AS capability.
    ///
    /// Ref: RFC 6793 §9
    pub asn: u16,

    /// Number of seconds the sender proposes for the hold timer.
    pub hold_time: u16,

    /// BGP identifier of the sender.
    pub id: u32,

    /// A list of optional parameters.
    pub parameters: Vec<OptionalParameter>,
}

impl OpenMessage {
    /// Create a new open message for a sender with a two-octet ASN.
    pub fn new2(asn: u16, hold_time: u16, id: u32) -> OpenMessage {
        OpenMessage {
            version: BGP4,
            asn,
            hold_time,
            id,
            parameters: Vec::new(),
        }
    }

    /// Create a new open message for a sender with a four-octet ASN.
    pub fn new4(asn: u32, hold_time: u16, id: u32) -> OpenMessage {
        let asn2 = if asn > u32::from(u16::MAX) {
            AS_TRANS
        } else {
            asn as u16
        };
        OpenMessage {
            version: BGP4,
            asn: asn2,
            hold_time,
            id,
            parameters: vec![OptionalParameter::Capabilities(vec![
                Capability::FourOctetAs { asn },
            ])],
        }
    }

    /// Append a capability to the capability parameter, creating the
    /// parameter if needed.
    pub fn add_capability(&mut self, cap: Capability) {
        for p in self.parameters.iter_mut() {
            if let OptionalParameter::Capabilities(caps) = p {
                caps.push(cap);
                return;
            }
        }
        self.parameters.push(OptionalParameter::Capabilities(vec![cap]));
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.parameters.iter().flat_map(|p| match p {
            OptionalParameter::Capabilities(caps) => caps.iter(),
        })
    }

    pub fn has_capability(&self, code: u8) -> bool {
        self.capabilities().any(|c| c.code() == code)
    }

    /// The effective sender ASN: the four-octet capability value when
    /// present, the header field otherwise.
    pub fn asn(&self) -> u32 {
        self.capabilities()
            .find_map(|c| match c {
                Capability::FourOctetAs { asn } => Some(*asn),
                _ => None,
            })
            .unwrap_or(u32::from(self.asn))
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        buf.push(self.version);
        buf.extend_from_slice(&self.asn.to_be_bytes());
        buf.extend_from_slice(&self.hold_time.to_be_bytes());
        buf.extend_from_slice(&self.id.to_be_bytes());

        let mut opt_buf = Vec::new();
        for p in &self.parameters {
            opt_buf.extend_from_slice(&p.to_wire()?);
        }
        if opt_buf.len() > u8::MAX as usize {
            return Err(Error::TooLarge("optional parameters".into()));
        }
        buf.push(opt_buf.len() as u8);
        buf.extend_from_slice(&opt_buf);
        Ok(buf)
    }

    pub fn from_wire(buf: &[u8]) -> Result<OpenMessage, Error> {
        if buf.len() < 10 {
            return Err(Error::TooSmall("open message".into()));
        }

        let version = buf[0];
        if version != BGP4 {
            return Err(Error::BadVersion(version));
        }

        let asn = u16::from_be_bytes([buf[1], buf[2]]);
        let hold_time = u16::from_be_bytes([buf[3], buf[4]]);
        let id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);

        let param_len = buf[9] as usize;
        if buf.len() < 10 + param_len {
            return Err(Error::TooSmall("open parameters".into()));
        }
        let mut pbuf = &buf[10..10 + param_len];
        let mut parameters = Vec::new();
        while !pbuf.is_empty() {
            let (param, n) = OptionalParameter::from_wire(pbuf)?;
            parameters.push(param);
            pbuf = &pbuf[n..];
        }

        Ok(OpenMessage {
            version,
            asn,
            hold_time,
            id,
            parameters,
        })
    }
}

/// Optional parameter codes defined by the IANA.
#[derive(Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum OptionalParameterCode {
    Reserved = 0,
    Authentication = 1,
    Capabilities = 2,
    ExtendedLength = 255,
}

/// The only optional parameter this speaker understands is the capability
/// list (RFC 5492). Anything else is rejected with
/// Open/Unsupported-Optional-Parameter.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum OptionalParameter {
    /// Code 2: RFC 5492. One parameter may carry several capabilities;
    /// the grouping is preserved for byte-exact re-emission.
    Capabilities(Vec<Capability>),
}

impl OptionalParameter {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Capabilities(caps) => {
                let mut cbuf = Vec::new();
                for c in caps {
                    cbuf.extend_from_slice(&c.to_wire()?);
                }
                if cbuf.len() > u8::MAX as usize {
                    return Err(Error::TooLarge("capability list".into()));
                }
                let mut buf =
                    vec![OptionalParameterCode::Capabilities as u8];
                buf.push(cbuf.len() as u8);
                buf.extend_from_slice(&cbuf);
                Ok(buf)
            }
        }
    }

    /// Parse one optional parameter, returning it and the bytes consumed.
    pub fn from_wire(buf: &[u8]) -> Result<(OptionalParameter, usize), Error> {
        if buf.len() < 2 {
            return Err(Error::TooSmall("optional parameter".into()));
        }
        let code = buf[0];
        let len = buf[1] as usize;
        if buf.len() < 2 + len {
            return Err(Error::TooSmall("optional parameter value".into()));
        }

        match OptionalParameterCode::try_from(code) {
            Ok(OptionalParameterCode::Capabilities) => {
                let mut cbuf = &buf[2..2 + len];
                let mut caps = Vec::new();
                while !cbuf.is_empty() {
                    let (cap, n) = Capability::from_wire(cbuf)?;
                    caps.push(cap);
                    cbuf = &cbuf[n..];
                }
                Ok((OptionalParameter::Capabilities(caps), 2 + len))
            }
            _ => Err(Error::UnsupportedOptionalParameter(code)),
        }
    }
}

/// Capability codes recognized by this speaker.
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Copy, Clone)]
#[repr(u8)]
pub enum CapabilityCode {
    /// RFC 2858
    MultiprotocolExtensions = 1,

    /// RFC 6793
    FourOctetAs = 65,
}

/// A capability offered in an Open message. Unrecognized capabilities are
/// carried verbatim so the host can inspect them and negotiation can echo
/// them; they never abort the session.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    schemars::JsonSchema,
)]
pub enum Capability {
    /// RFC 2858
    MultiprotocolExtensions { afi: u16, safi: u8 },

    /// RFC 6793
    FourOctetAs { asn: u32 },

    Unknown { code: u8, data: Vec<u8> },
}

impl Capability {
    pub fn code(&self) -> u8 {
        match self {
            Self::MultiprotocolExtensions { .. } => {
                CapabilityCode::MultiprotocolExtensions as u8
            }
            Self::FourOctetAs { .. } => CapabilityCode::FourOctetAs as u8,
            Self::Unknown { code, .. } => *code,
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::MultiprotocolExtensions { afi, safi } => {
                let mut buf =
                    vec![CapabilityCode::MultiprotocolExtensions as u8, 4];
                buf.extend_from_slice(&afi.to_be_bytes());
                buf.push(0);
                buf.push(*safi);
                Ok(buf)
            }
            Self::FourOctetAs { asn } => {
                let mut buf = vec![CapabilityCode::FourOctetAs as u8, 4];
                buf.extend_from_slice(&asn.to_be_bytes());
                Ok(buf)
            }
            Self::Unknown { code, data } => {
                if data.len() > u8::MAX as usize {
                    return Err(Error::TooLarge("capability value".into()));
                }
                let mut buf = vec![*code, data.len() as u8];
                buf.extend_from_slice(data);
                Ok(buf)
            }
        }
    }

    /// Parse one capability TLV, returning it and the bytes consumed.
    pub fn from_wire(buf: &[u8]) -> Result<(Capability, usize), Error> {
        if buf.len() < 2 {
            return Err(Error::TooSmall("capability".into()));
        }
        let code = buf[0];
        let len = buf[1] as usize;
        if buf.len() < 2 + len {
            return Err(Error::TooSmall("capability value".into()));
        }
        let value = &buf[2..2 + len];

        let cap = match CapabilityCode::try_from(code) {
            Ok(CapabilityCode::MultiprotocolExtensions) => {
                if len != 4 {
                    return Err(Error::BadLength {
                        expected: 4,
                        found: len as u8,
                    });
                }
                Capability::MultiprotocolExtensions {
                    afi: u16::from_be_bytes([value[0], value[1]]),
                    safi: value[3],
                }
            }
            Ok(CapabilityCode::FourOctetAs) => {
                if len != 4 {
                    return Err(Error::BadLength {
                        expected: 4,
                        found: len as u8,
                    });
                }
                Capability::FourOctetAs {
                    asn: u32::from_be_bytes([
                        value[0], value[1], value[2], value[3],
                    ]),
                }
            }
            Err(_) => Capability::Unknown {
                code,
                data: value.to_vec(),
            },
        };
        Ok((cap, 2 + len))
    }
}

/// Address family identifiers.
///
/// Ref: RFC 4760 §3
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Copy, Clone)]
#[repr(u16)]
pub enum Afi {
    Ipv4 = 1,
    Ipv6 = 2,
}

/// Subsequent address family identifiers.
///
/// Ref: RFC 4760 §3
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Copy, Clone)]
#[repr(u8)]
pub enum Safi {
    Unicast = 1,
}

fn prefix4_to_wire(p: &Prefix4) -> Vec<u8> {
    let n = (p.length as usize).div_ceil(8);
    let mut buf = vec![p.length];
    buf.extend_from_slice(&p.value.octets()[..n]);
    buf
}

fn prefix4_from_wire(buf: &[u8]) -> Result<(Prefix4, usize), Error> {
    if buf.is_empty() {
        return Err(Error::TooSmall("prefix".into()));
    }
    let length = buf[0];
    if length > 32 {
        return Err(Error::InvalidNlriPrefix(length));
    }
    let n = (length as usize).div_ceil(8);
    if buf.len() < 1 + n {
        return Err(Error::TooSmall("prefix bits".into()));
    }
    let mut octets = [0u8; 4];
    octets[..n].copy_from_slice(&buf[1..1 + n]);
    Ok((Prefix4::new(Ipv4Addr::from(octets), length), 1 + n))
}

fn prefix6_to_wire(p: &Prefix6) -> Vec<u8> {
    let n = (p.length as usize).div_ceil(8);
    let mut buf = vec![p.length];
    buf.extend_from_slice(&p.value.octets()[..n]);
    buf
}

fn prefix6_from_wire(buf: &[u8]) -> Result<(Prefix6, usize), Error> {
    if buf.is_empty() {
        return Err(Error::TooSmall("prefix".into()));
    }
    let length = buf[0];
    if length > 128 {
        return Err(Error::InvalidNlriPrefix(length));
    }
    let n = (length as usize).div_ceil(8);
    if buf.len() < 1 + n {
        return Err(Error::TooSmall("prefix bits".into()));
    }
    let mut octets = [0u8; 16];
    octets[..n].copy_from_slice(&buf[1..1 + n]);
    Ok((Prefix6::new(Ipv6Addr::from(octets), length), 1 + n))
}

/// An update message advertises feasible routes sharing common path
/// attributes, withdraws unfeasible ones, or both. IPv4 reachability uses
/// the top-level fields; other families ride in the MP_REACH_NLRI /
/// MP_UNREACH_NLRI attributes.
///
/// Ref: RFC 4271 §4.3, RFC 4760
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct UpdateMessage {
    pub withdrawn: Vec<Prefix4>,
    pub path_attributes: Vec<PathAttribute>,
    pub nlri: Vec<Prefix4>,
}

impl UpdateMessage {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        let mut withdrawn = Vec::new();
        for w in &self.withdrawn {
            withdrawn.extend_from_slice(&prefix4_to_wire(w));
        }
        if withdrawn.len() > u16::MAX as usize {
            return Err(Error::TooLarge("withdrawn routes".into()));
        }
        buf.extend_from_slice(&(withdrawn.len() as u16).to_be_bytes());
        buf.extend_from_slice(&withdrawn);

        let mut attrs = Vec::new();
        for a in &self.path_attributes {
            attrs.extend_from_slice(&a.to_wire()?);
        }
        if attrs.len() > u16::MAX as usize {
            return Err(Error::TooLarge("path attributes".into()));
        }
        buf.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
        buf.extend_from_slice(&attrs);

        for n in &self.nlri {
            buf.extend_from_slice(&prefix4_to_wire(n));
        }
        Ok(buf)
    }

    pub fn from_wire(
        buf: &[u8],
        four_octet: bool,
    ) -> Result<UpdateMessage, Error> {
        if buf.len() < 2 {
            return Err(Error::TooSmall("withdrawn length".into()));
        }
        let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let buf = &buf[2..];
        if buf.len() < len {
            return Err(Error::TooSmall("withdrawn routes".into()));
        }
        let withdrawn = Self::prefixes_from_wire(&buf[..len])?;
        let buf = &buf[len..];

        if buf.len() < 2 {
            return Err(Error::TooSmall("attribute length".into()));
        }
        let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let buf = &buf[2..];
        if buf.len() < len {
            return Err(Error::TooSmall("path attributes".into()));
        }
        let path_attributes =
            Self::path_attrs_from_wire(&buf[..len], four_octet)?;
        let buf = &buf[len..];

        let nlri = Self::prefixes_from_wire(buf)?;

        Ok(UpdateMessage {
            withdrawn,
            path_attributes,
            nlri,
        })
    }

    fn prefixes_from_wire(mut buf: &[u8]) -> Result<Vec<Prefix4>, Error> {
        let mut result = Vec::new();
        while !buf.is_empty() {
            let (pfx, n) = prefix4_from_wire(buf)?;
            result.push(pfx);
            buf = &buf[n..];
        }
        Ok(result)
    }

    fn path_attrs_from_wire(
        mut buf: &[u8],
        four_octet: bool,
    ) -> Result<Vec<PathAttribute>, Error> {
        let mut result: Vec<PathAttribute> = Vec::new();
        while !buf.is_empty() {
            let (pa, n) = PathAttribute::from_wire(buf, four_octet)?;
            if result.iter().any(|a| a.type_code() == pa.type_code()) {
                return Err(Error::DuplicateAttribute(pa.type_code()));
            }
            result.push(pa);
            buf = &buf[n..];
        }
        Ok(result)
    }

    pub fn attr(&self, code: u8) -> Option<&PathAttribute> {
        self.path_attributes.iter().find(|a| a.type_code() == code)
    }

    fn attr_mut(&mut self, code: u8) -> Option<&mut PathAttribute> {
        self.path_attributes
            .iter_mut()
            .find(|a| a.type_code() == code)
    }

    pub fn has_attr(&self, code: u8) -> bool {
        self.attr(code).is_some()
    }

    /// Add an attribute. The attribute list is a set keyed by type code;
    /// adding a duplicate fails.
    pub fn add_attr(&mut self, attr: PathAttribute) -> Result<(), Error> {
        if self.has_attr(attr.type_code()) {
            return Err(Error::DuplicateAttribute(attr.type_code()));
        }
        self.path_attributes.push(attr);
        Ok(())
    }

    /// Replace any attribute of the same type code.
    pub fn update_attr(&mut self, attr: PathAttribute) {
        self.drop_attr(attr.type_code());
        self.path_attributes.push(attr);
    }

    pub fn drop_attr(&mut self, code: u8) -> bool {
        let before = self.path_attributes.len();
        self.path_attributes.retain(|a| a.type_code() != code);
        self.path_attributes.len() != before
    }

    /// Remove every attribute whose transitive bit is clear, reporting
    /// whether any were removed. Invoked before re-advertising a route to
    /// an EBGP peer.
    pub fn drop_non_transitive(&mut self) -> bool {
        let before = self.path_attributes.len();
        self.path_attributes.retain(|a| a.is_transitive());
        self.path_attributes.len() != before
    }

    /// Set the partial bit on unknown optional-transitive attributes being
    /// passed along, per RFC 4271 §5.
    pub fn mark_forwarded_unknowns(&mut self) {
        for a in self.path_attributes.iter_mut() {
            if matches!(a.value, PathAttributeValue::Unknown { .. })
                && a.is_optional()
                && a.is_transitive()
            {
                a.flags |= PathAttributeFlags::Partial as u8;
            }
        }
    }

    pub fn nexthop4(&self) -> Option<Ipv4Addr> {
        self.attr(PathAttributeTypeCode::NextHop as u8).and_then(|a| {
            match a.value {
                PathAttributeValue::NextHop(addr) => Some(addr),
                _ => None,
            }
        })
    }

    pub fn set_nexthop4(&mut self, addr: Ipv4Addr) {
        self.update_attr(PathAttribute::next_hop(addr));
    }

    pub fn as_path(&self) -> Option<&AsPath> {
        self.attr(PathAttributeTypeCode::AsPath as u8).and_then(|a| {
            match &a.value {
                PathAttributeValue::AsPath(p) => Some(p),
                _ => None,
            }
        })
    }

    pub fn as4_path(&self) -> Option<&AsPath> {
        self.attr(PathAttributeTypeCode::As4Path as u8).and_then(|a| {
            match &a.value {
                PathAttributeValue::As4Path(p) => Some(p),
                _ => None,
            }
        })
    }

    pub fn origin(&self) -> Option<PathOrigin> {
        self.attr(PathAttributeTypeCode::Origin as u8).and_then(|a| {
            match a.value {
                PathAttributeValue::Origin(o) => Some(o),
                _ => None,
            }
        })
    }

    pub fn local_pref(&self) -> Option<u32> {
        self.attr(PathAttributeTypeCode::LocalPref as u8).and_then(|a| {
            match a.value {
                PathAttributeValue::LocalPref(v) => Some(v),
                _ => None,
            }
        })
    }

    pub fn multi_exit_discriminator(&self) -> Option<u32> {
        self.attr(PathAttributeTypeCode::MultiExitDisc as u8).and_then(|a| {
            match a.value {
                PathAttributeValue::MultiExitDisc(v) => Some(v),
                _ => None,
            }
        })
    }

    pub fn mp_reach(&self) -> Option<&MpReachNlri> {
        self.attr(PathAttributeTypeCode::MpReachNlri as u8).and_then(|a| {
            match &a.value {
                PathAttributeValue::MpReachNlri(v) => Some(v),
                _ => None,
            }
        })
    }

    pub fn mp_unreach(&self) -> Option<&MpUnreachNlri> {
        self.attr(PathAttributeTypeCode::MpUnreachNlri as u8).and_then(|a| {
            match &a.value {
                PathAttributeValue::MpUnreachNlri(v) => Some(v),
                _ => None,
            }
        })
    }

    /// The well-known mandatory attribute an announcement is missing, if
    /// any. Origin and AS path are required whenever anything is
    /// announced; a top-level nexthop only for top-level NLRI (MP
    /// announcements carry their own).
    pub fn missing_well_known(&self) -> Option<u8> {
        let announcing_v4 = !self.nlri.is_empty();
        let announcing_mp =
            self.mp_reach().map(|m| !m.nlri.is_empty()).unwrap_or(false);
        if !announcing_v4 && !announcing_mp {
            return None;
        }
        for code in
            [PathAttributeTypeCode::Origin, PathAttributeTypeCode::AsPath]
        {
            if !self.has_attr(code as u8) {
                return Some(code as u8);
            }
        }
        if announcing_v4 && !self.has_attr(PathAttributeTypeCode::NextHop as u8)
        {
            return Some(PathAttributeTypeCode::NextHop as u8);
        }
        None
    }

    /// Prepend an ASN on a session that negotiated four-octet ASNs. The
    /// path is four-octet and AS4_PATH must not be present.
    pub fn prepend4(&mut self, asn: u32) -> Result<(), Error> {
        if self.has_attr(PathAttributeTypeCode::As4Path as u8) {
            return Err(Error::MalformedAsPath);
        }
        match self.attr_mut(PathAttributeTypeCode::AsPath as u8) {
            Some(attr) => match &mut attr.value {
                PathAttributeValue::AsPath(path) => {
                    if !path.four_octet {
                        return Err(Error::MalformedAsPath);
                    }
                    path.prepend(asn);
                }
                _ => return Err(Error::MalformedAsPath),
            },
            None => {
                let mut path = AsPath::new(true);
                path.prepend(asn);
                self.update_attr(PathAttribute::as_path(path));
            }
        }
        Ok(())
    }

    /// Prepend an ASN on a two-octet session. The two-octet AS_PATH gets
    /// AS_TRANS when the ASN does not fit; when `with_as4` (the local
    /// speaker is four-octet capable) the true ASN is symmetrically
    /// prepended onto AS4_PATH, created if absent. Two-octet-only
    /// speakers never attach AS4_PATH.
    pub fn prepend2(&mut self, asn: u32, with_as4: bool) -> Result<(), Error> {
        match self.attr_mut(PathAttributeTypeCode::AsPath as u8) {
            Some(attr) => match &mut attr.value {
                PathAttributeValue::AsPath(path) => {
                    if path.four_octet {
                        return Err(Error::MalformedAsPath);
                    }
                    path.prepend(asn);
                }
                _ => return Err(Error::MalformedAsPath),
            },
            None => {
                let mut path = AsPath::new(false);
                path.prepend(asn);
                self.update_attr(PathAttribute::as_path(path));
            }
        }

        if with_as4 {
            match self.attr_mut(PathAttributeTypeCode::As4Path as u8) {
                Some(attr) => match &mut attr.value {
                    PathAttributeValue::As4Path(path) => path.prepend(asn),
                    _ => return Err(Error::MalformedAsPath),
                },
                None => {
                    let mut path = AsPath::new(true);
                    path.prepend(asn);
                    self.update_attr(PathAttribute::as4_path(path));
                }
            }
        }
        Ok(())
    }

    /// Recover the four-octet view of the AS path on ingress from a
    /// two-octet session. Without AS4_PATH the existing path is re-encoded
    /// four-octet unchanged; with AS4_PATH its sequence ASNs replace the
    /// matching tail of AS_PATH (surplus AS_SET segments in AS4_PATH are
    /// ignored, and an AS4_PATH longer than AS_PATH is disregarded per
    /// RFC 6793 §4.2.3).
    pub fn restore_as_path(&mut self) -> Result<(), Error> {
        let as4 = match self.attr(PathAttributeTypeCode::As4Path as u8) {
            Some(attr) => match &attr.value {
                PathAttributeValue::As4Path(p) => {
                    if !p.four_octet {
                        return Err(Error::MalformedAsPath);
                    }
                    Some(p.clone())
                }
                _ => return Err(Error::MalformedAsPath),
            },
            None => None,
        };
        self.drop_attr(PathAttributeTypeCode::As4Path as u8);

        let Some(attr) = self.attr_mut(PathAttributeTypeCode::AsPath as u8)
        else {
            return Ok(());
        };
        let PathAttributeValue::AsPath(path) = &mut attr.value else {
            return Err(Error::MalformedAsPath);
        };

        let Some(as4) = as4 else {
            path.four_octet = true;
            return Ok(());
        };

        let old: Vec<u32> = path.sequence_asns();
        let tail: Vec<u32> = as4.sequence_asns();
        let merged = if old.len() >= tail.len() {
            let mut merged = old[..old.len() - tail.len()].to_vec();
            merged.extend_from_slice(&tail);
            merged
        } else {
            old
        };

        *path = AsPath {
            four_octet: true,
            segments: vec![AsPathSegment {
                typ: AsSegmentType::AsSequence,
                value: merged,
            }],
        };
        Ok(())
    }

    /// Produce the two-octet egress form of the AS path: every ASN that
    /// does not fit becomes AS_TRANS, and a companion AS4_PATH preserving
    /// the four-octet values is attached.
    pub fn downgrade_as_path(&mut self) -> Result<(), Error> {
        let Some(attr) = self.attr_mut(PathAttributeTypeCode::AsPath as u8)
        else {
            return Ok(());
        };
        let PathAttributeValue::AsPath(path) = &mut attr.value else {
            return Err(Error::MalformedAsPath);
        };
        if !path.four_octet {
            return Ok(());
        }

        let four = path.clone();
        let segments = four
            .segments
            .iter()
            .map(|s| AsPathSegment {
                typ: s.typ,
                value: s
                    .value
                    .iter()
                    .map(|asn| {
                        if *asn > u32::from(u16::MAX) {
                            u32::from(AS_TRANS)
                        } else {
                            *asn
                        }
                    })
                    .collect(),
            })
            .collect();
        *path = AsPath {
            four_octet: false,
            segments,
        };
        self.update_attr(PathAttribute::as4_path(four));
        Ok(())
    }

    pub fn aggregator(&self) -> Option<&Aggregator> {
        self.attr(PathAttributeTypeCode::Aggregator as u8).and_then(|a| {
            match &a.value {
                PathAttributeValue::Aggregator(v) => Some(v),
                _ => None,
            }
        })
    }

    /// The AGGREGATOR analog of [`Self::restore_as_path`]: the four-octet
    /// AS4_AGGREGATOR value, when present, supersedes the two-octet one.
    pub fn restore_aggregator(&mut self) {
        let as4 = self
            .attr(PathAttributeTypeCode::As4Aggregator as u8)
            .and_then(|a| match &a.value {
                PathAttributeValue::As4Aggregator(v) => Some(v.clone()),
                _ => None,
            });
        self.drop_attr(PathAttributeTypeCode::As4Aggregator as u8);

        if let Some(attr) = self.attr_mut(PathAttributeTypeCode::Aggregator as u8)
            && let PathAttributeValue::Aggregator(agg) = &mut attr.value
        {
            match as4 {
                Some(v) => *agg = v,
                None => agg.four_octet = true,
            }
        }
    }

    /// The AGGREGATOR analog of [`Self::downgrade_as_path`].
    pub fn downgrade_aggregator(&mut self) {
        let Some(attr) = self.attr_mut(PathAttributeTypeCode::Aggregator as u8)
        else {
            return;
        };
        let PathAttributeValue::Aggregator(agg) = &mut attr.value else {
            return;
        };
        if !agg.four_octet {
            return;
        }
        let four = agg.clone();
        agg.four_octet = false;
        if agg.asn > u32::from(u16::MAX) {
            agg.asn = u32::from(AS_TRANS);
        }
        self.update_attr(PathAttribute::as4_aggregator(four));
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PathAttribute {
    pub flags: u8,
    pub value: PathAttributeValue,
}

impl PathAttribute {
    pub fn type_code(&self) -> u8 {
        self.value.type_code()
    }

    pub fn is_optional(&self) -> bool {
        self.flags & PathAttributeFlags::Optional as u8 != 0
    }

    pub fn is_transitive(&self) -> bool {
        self.flags & PathAttributeFlags::Transitive as u8 != 0
    }

    pub fn is_partial(&self) -> bool {
        self.flags & PathAttributeFlags::Partial as u8 != 0
    }

    pub fn origin(origin: PathOrigin) -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Transitive as u8,
            value: PathAttributeValue::Origin(origin),
        }
    }

    pub fn as_path(path: AsPath) -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Transitive as u8,
            value: PathAttributeValue::AsPath(path),
        }
    }

    pub fn next_hop(addr: Ipv4Addr) -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Transitive as u8,
            value: PathAttributeValue::NextHop(addr),
        }
    }

    pub fn multi_exit_disc(value: u32) -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Optional as u8,
            value: PathAttributeValue::MultiExitDisc(value),
        }
    }

    pub fn local_pref(value: u32) -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Transitive as u8,
            value: PathAttributeValue::LocalPref(value),
        }
    }

    pub fn atomic_aggregate() -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Transitive as u8,
            value: PathAttributeValue::AtomicAggregate,
        }
    }

    pub fn aggregator(agg: Aggregator) -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Optional
                | PathAttributeFlags::Transitive,
            value: PathAttributeValue::Aggregator(agg),
        }
    }

    pub fn communities(communities: Vec<u32>) -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Optional
                | PathAttributeFlags::Transitive,
            value: PathAttributeValue::Communities(communities),
        }
    }

    pub fn mp_reach(reach: MpReachNlri) -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Optional as u8,
            value: PathAttributeValue::MpReachNlri(reach),
        }
    }

    pub fn mp_unreach(unreach: MpUnreachNlri) -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Optional as u8,
            value: PathAttributeValue::MpUnreachNlri(unreach),
        }
    }

    pub fn as4_path(path: AsPath) -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Optional
                | PathAttributeFlags::Transitive,
            value: PathAttributeValue::As4Path(path),
        }
    }

    pub fn as4_aggregator(agg: Aggregator) -> PathAttribute {
        PathAttribute {
            flags: PathAttributeFlags::Optional
                | PathAttributeFlags::Transitive,
            value: PathAttributeValue::As4Aggregator(agg),
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let val = self.value.to_wire()?;
        let extended = self.flags & PathAttributeFlags::ExtendedLength as u8
            != 0
            || val.len() > u8::MAX as usize;

        let mut flags = self.flags;
        if extended {
            flags |= PathAttributeFlags::ExtendedLength as u8;
        }

        let mut buf = vec![flags, self.type_code()];
        if extended {
            if val.len() > u16::MAX as usize {
                return Err(Error::TooLarge("attribute value".into()));
            }
            buf.extend_from_slice(&(val.len() as u16).to_be_bytes());
        } else {
            buf.push(val.len() as u8);
        }
        buf.extend_from_slice(&val);
        Ok(buf)
    }

    /// Parse one attribute, returning it and the bytes consumed.
    pub fn from_wire(
        buf: &[u8],
        four_octet: bool,
    ) -> Result<(PathAttribute, usize), Error> {
        if buf.len() < 2 {
            return Err(Error::TooSmall("attribute header".into()));
        }
        let flags = buf[0];
        let type_code = buf[1];
        let mut buf = &buf[2..];
        let mut n = 2;

        let len = if flags & PathAttributeFlags::ExtendedLength as u8 != 0 {
            if buf.len() < 2 {
                return Err(Error::TooSmall("attribute length".into()));
            }
            let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
            buf = &buf[2..];
            n += 2;
            len
        } else {
            if buf.is_empty() {
                return Err(Error::TooSmall("attribute length".into()));
            }
            let len = buf[0] as usize;
            buf = &buf[1..];
            n += 1;
            len
        };
        if buf.len() < len {
            return Err(Error::TooSmall("attribute value".into()));
        }

        let value =
            PathAttributeValue::from_wire(&buf[..len], type_code, four_octet)?;
        Ok((PathAttribute { flags, value }, n + len))
    }
}

#[derive(Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PathAttributeFlags {
    Optional = 0b10000000,
    Transitive = 0b01000000,
    Partial = 0b00100000,
    ExtendedLength = 0b00010000,
}

impl std::ops::BitOr<PathAttributeFlags> for PathAttributeFlags {
    type Output = u8;
    fn bitor(self, other: PathAttributeFlags) -> u8 {
        self as u8 | other as u8
    }
}

impl std::ops::BitAnd<PathAttributeFlags> for PathAttributeFlags {
    type Output = u8;
    fn bitand(self, other: PathAttributeFlags) -> u8 {
        self as u8 & other as u8
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum PathAttributeTypeCode {
    /// RFC 4271
    Origin = 1,
    AsPath = 2,
    NextHop = 3,
    MultiExitDisc = 4,
    LocalPref = 5,
    AtomicAggregate = 6,
    Aggregator = 7,

    /// RFC 1997
    Communities = 8,

    /// RFC 4760
    MpReachNlri = 14,
    MpUnreachNlri = 15,

    /// RFC 6793
    As4Path = 17,
    As4Aggregator = 18,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PathAttributeValue {
    Origin(PathOrigin),
    AsPath(AsPath),
    NextHop(Ipv4Addr),
    MultiExitDisc(u32),
    LocalPref(u32),
    AtomicAggregate,
    Aggregator(Aggregator),
    Communities(Vec<u32>),
    MpReachNlri(MpReachNlri),
    MpUnreachNlri(MpUnreachNlri),
    As4Path(AsPath),
    As4Aggregator(Aggregator),

    /// An attribute this speaker does not model. The raw value is kept so
    /// optional-transitive attributes can be passed along bit-exact.
    Unknown { type_code: u8, data: Vec<u8> },
}

impl PathAttributeValue {
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Origin(_) => PathAttributeTypeCode::Origin as u8,
            Self::AsPath(_) => PathAttributeTypeCode::AsPath as u8,
            Self::NextHop(_) => PathAttributeTypeCode::NextHop as u8,
            Self::MultiExitDisc(_) => {
                PathAttributeTypeCode::MultiExitDisc as u8
            }
            Self::LocalPref(_) => PathAttributeTypeCode::LocalPref as u8,
            Self::AtomicAggregate => {
                PathAttributeTypeCode::AtomicAggregate as u8
            }
            Self::Aggregator(_) => PathAttributeTypeCode::Aggregator as u8,
            Self::Communities(_) => PathAttributeTypeCode::Communities as u8,
            Self::MpReachNlri(_) => PathAttributeTypeCode::MpReachNlri as u8,
            Self::MpUnreachNlri(_) => {
                PathAttributeTypeCode::MpUnreachNlri as u8
            }
            Self::As4Path(_) => PathAttributeTypeCode::As4Path as u8,
            Self::As4Aggregator(_) => {
                PathAttributeTypeCode::As4Aggregator as u8
            }
            Self::Unknown { type_code, .. } => *type_code,
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Origin(o) => Ok(vec![*o as u8]),
            Self::AsPath(p) => p.to_wire(),
            Self::NextHop(addr) => Ok(addr.octets().to_vec()),
            Self::MultiExitDisc(v) | Self::LocalPref(v) => {
                Ok(v.to_be_bytes().to_vec())
            }
            Self::AtomicAggregate => Ok(Vec::new()),
            Self::Aggregator(agg) => agg.to_wire(),
            Self::Communities(cs) => {
                let mut buf = Vec::with_capacity(cs.len() * 4);
                for c in cs {
                    buf.extend_from_slice(&c.to_be_bytes());
                }
                Ok(buf)
            }
            Self::MpReachNlri(v) => v.to_wire(),
            Self::MpUnreachNlri(v) => v.to_wire(),
            Self::As4Path(p) => {
                if !p.four_octet {
                    return Err(Error::MalformedAsPath);
                }
                p.to_wire()
            }
            Self::As4Aggregator(agg) => {
                let mut buf = agg.asn.to_be_bytes().to_vec();
                buf.extend_from_slice(&agg.addr.octets());
                Ok(buf)
            }
            Self::Unknown { data, .. } => Ok(data.clone()),
        }
    }

    pub fn from_wire(
        buf: &[u8],
        type_code: u8,
        four_octet: bool,
    ) -> Result<PathAttributeValue, Error> {
        let unknown = |buf: &[u8]| PathAttributeValue::Unknown {
            type_code,
            data: buf.to_vec(),
        };

        let code = match PathAttributeTypeCode::try_from(type_code) {
            Ok(code) => code,
            Err(_) => return Ok(unknown(buf)),
        };

        match code {
            PathAttributeTypeCode::Origin => {
                if buf.len() != 1 {
                    return Err(Error::BadLength {
                        expected: 1,
                        found: buf.len() as u8,
                    });
                }
                let origin = PathOrigin::try_from(buf[0])
                    .map_err(|_| Error::InvalidCode(buf[0]))?;
                Ok(PathAttributeValue::Origin(origin))
            }
            PathAttributeTypeCode::AsPath => Ok(PathAttributeValue::AsPath(
                AsPath::from_wire(buf, four_octet)?,
            )),
            PathAttributeTypeCode::NextHop => {
                if buf.len() != 4 {
                    return Err(Error::BadLength {
                        expected: 4,
                        found: buf.len() as u8,
                    });
                }
                Ok(PathAttributeValue::NextHop(Ipv4Addr::new(
                    buf[0], buf[1], buf[2], buf[3],
                )))
            }
            PathAttributeTypeCode::MultiExitDisc => {
                if buf.len() != 4 {
                    return Err(Error::BadLength {
                        expected: 4,
                        found: buf.len() as u8,
                    });
                }
                Ok(PathAttributeValue::MultiExitDisc(u32::from_be_bytes([
                    buf[0], buf[1], buf[2], buf[3],
                ])))
            }
            PathAttributeTypeCode::LocalPref => {
                if buf.len() != 4 {
                    return Err(Error::BadLength {
                        expected: 4,
                        found: buf.len() as u8,
                    });
                }
                Ok(PathAttributeValue::LocalPref(u32::from_be_bytes([
                    buf[0], buf[1], buf[2], buf[3],
                ])))
            }
            PathAttributeTypeCode::AtomicAggregate => {
                Ok(PathAttributeValue::AtomicAggregate)
            }
            PathAttributeTypeCode::Aggregator => Ok(
                PathAttributeValue::Aggregator(Aggregator::from_wire(
                    buf,
                    four_octet,
                )?),
            ),
            PathAttributeTypeCode::Communities => {
                if buf.len() % 4 != 0 {
                    return Err(Error::BadLength {
                        expected: 4,
                        found: (buf.len() % 4) as u8,
                    });
                }
                Ok(PathAttributeValue::Communities(
                    buf.chunks_exact(4)
                        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                ))
            }
            PathAttributeTypeCode::MpReachNlri => {
                match MpReachNlri::from_wire(buf) {
                    Ok(v) => Ok(PathAttributeValue::MpReachNlri(v)),
                    // Families we do not model are carried opaque.
                    Err(Error::InvalidCode(_)) => Ok(unknown(buf)),
                    Err(e) => Err(e),
                }
            }
            PathAttributeTypeCode::MpUnreachNlri => {
                match MpUnreachNlri::from_wire(buf) {
                    Ok(v) => Ok(PathAttributeValue::MpUnreachNlri(v)),
                    Err(Error::InvalidCode(_)) => Ok(unknown(buf)),
                    Err(e) => Err(e),
                }
            }
            PathAttributeTypeCode::As4Path => Ok(PathAttributeValue::As4Path(
                AsPath::from_wire(buf, true)?,
            )),
            PathAttributeTypeCode::As4Aggregator => {
                if buf.len() != 8 {
                    return Err(Error::BadLength {
                        expected: 8,
                        found: buf.len() as u8,
                    });
                }
                Ok(PathAttributeValue::As4Aggregator(Aggregator {
                    asn: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
                    addr: Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]),
                    four_octet: true,
                }))
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum PathOrigin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum AsSegmentType {
    AsSet = 1,
    AsSequence = 2,
    ConfedSequence = 3,
    ConfedSet = 4,
}

/// A segment may hold at most 255 ASNs per RFC 4271 §4.3.
const MAX_SEGMENT_ASNS: usize = 255;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsPathSegment {
    pub typ: AsSegmentType,
    pub value: Vec<u32>,
}

/// An ordered list of AS path segments. The wire width is uniform across
/// the whole path: either every ASN is two octets or every ASN is four,
/// tracked by `four_octet`. ASNs are always held as `u32` in memory.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsPath {
    pub four_octet: bool,
    pub segments: Vec<AsPathSegment>,
}

impl AsPath {
    pub fn new(four_octet: bool) -> AsPath {
        AsPath {
            four_octet,
            segments: Vec::new(),
        }
    }

    /// AS path length for best-path selection: a sequence contributes its
    /// ASN count, a set counts as one, confederation segments count zero.
    pub fn path_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s.typ {
                AsSegmentType::AsSequence => s.value.len(),
                AsSegmentType::AsSet => 1,
                AsSegmentType::ConfedSequence | AsSegmentType::ConfedSet => 0,
            })
            .sum()
    }

    /// The leading ASN, i.e. the neighboring AS the path was learned from.
    pub fn first_as(&self) -> Option<u32> {
        self.segments.first().and_then(|s| s.value.first()).copied()
    }

    /// All ASNs carried in AS_SEQUENCE segments, in path order.
    pub fn sequence_asns(&self) -> Vec<u32> {
        self.segments
            .iter()
            .filter(|s| s.typ == AsSegmentType::AsSequence)
            .flat_map(|s| s.value.iter().copied())
            .collect()
    }

    /// Push an ASN onto the front of the path per RFC 4271 §5.1.2: extend
    /// the leading AS_SEQUENCE, or open a new one when the path is empty,
    /// starts with a set, or the leading segment is full. On a two-octet
    /// path an ASN that does not fit is recorded as AS_TRANS.
    pub fn prepend(&mut self, asn: u32) {
        let asn = if !self.four_octet && asn > u32::from(u16::MAX) {
            u32::from(AS_TRANS)
        } else {
            asn
        };

        match self.segments.first_mut() {
            Some(seg)
                if seg.typ == AsSegmentType::AsSequence
                    && seg.value.len() < MAX_SEGMENT_ASNS =>
            {
                seg.value.insert(0, asn);
            }
            _ => {
                self.segments.insert(
                    0,
                    AsPathSegment {
                        typ: AsSegmentType::AsSequence,
                        value: vec![asn],
                    },
                );
            }
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        for seg in &self.segments {
            if seg.value.len() > MAX_SEGMENT_ASNS {
                return Err(Error::MalformedAsPath);
            }
            buf.push(seg.typ as u8);
            buf.push(seg.value.len() as u8);
            for asn in &seg.value {
                if self.four_octet {
                    buf.extend_from_slice(&asn.to_be_bytes());
                } else {
                    if *asn > u32::from(u16::MAX) {
                        return Err(Error::MalformedAsPath);
                    }
                    buf.extend_from_slice(&(*asn as u16).to_be_bytes());
                }
            }
        }
        Ok(buf)
    }

    pub fn from_wire(mut buf: &[u8], four_octet: bool) -> Result<AsPath, Error> {
        let width = if four_octet { 4 } else { 2 };
        let mut segments = Vec::new();
        while !buf.is_empty() {
            if buf.len() < 2 {
                return Err(Error::MalformedAsPath);
            }
            let typ = AsSegmentType::try_from(buf[0])
                .map_err(|_| Error::MalformedAsPath)?;
            let count = buf[1] as usize;
            buf = &buf[2..];
            if buf.len() < count * width {
                return Err(Error::MalformedAsPath);
            }
            let mut value = Vec::with_capacity(count);
            for i in 0..count {
                let chunk = &buf[i * width..(i + 1) * width];
                value.push(if four_octet {
                    u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
                } else {
                    u32::from(u16::from_be_bytes([chunk[0], chunk[1]]))
                });
            }
            buf = &buf[count * width..];
            segments.push(AsPathSegment { typ, value });
        }
        Ok(AsPath {
            four_octet,
            segments,
        })
    }
}

/// The AGGREGATOR attribute value: the AS and router that formed an
/// aggregate route. Two octets of ASN on legacy sessions, four otherwise;
/// `four_octet` tracks the wire form like [`AsPath`] does.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Aggregator {
    pub asn: u32,
    pub addr: Ipv4Addr,
    pub four_octet: bool,
}

impl Aggregator {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        if self.four_octet {
            buf.extend_from_slice(&self.asn.to_be_bytes());
        } else {
            if self.asn > u32::from(u16::MAX) {
                return Err(Error::TooLarge("two-octet aggregator".into()));
            }
            buf.extend_from_slice(&(self.asn as u16).to_be_bytes());
        }
        buf.extend_from_slice(&self.addr.octets());
        Ok(buf)
    }

    pub fn from_wire(buf: &[u8], four_octet: bool) -> Result<Aggregator, Error> {
        let expected: u8 = if four_octet { 8 } else { 6 };
        if buf.len() != expected as usize {
            return Err(Error::BadLength {
                expected,
                found: buf.len() as u8,
            });
        }
        let (asn, rest) = if four_octet {
            (
                u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
                &buf[4..],
            )
        } else {
            (
                u32::from(u16::from_be_bytes([buf[0], buf[1]])),
                &buf[2..],
            )
        };
        Ok(Aggregator {
            asn,
            addr: Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]),
            four_octet,
        })
    }
}

/// MP_REACH_NLRI for IPv6 unicast: the family's own nexthop (one global
/// address, optionally followed by a link-local one) and announced
/// prefixes. Other families are not modeled and stay opaque.
///
/// Ref: RFC 4760 §3
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct MpReachNlri {
    pub nexthop: Vec<Ipv6Addr>,
    pub nlri: Vec<Prefix6>,
}

impl MpReachNlri {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(Afi::Ipv6 as u16).to_be_bytes());
        buf.push(Safi::Unicast as u8);
        buf.push((self.nexthop.len() * 16) as u8);
        for nh in &self.nexthop {
            buf.extend_from_slice(&nh.octets());
        }
        buf.push(0);
        for p in &self.nlri {
            buf.extend_from_slice(&prefix6_to_wire(p));
        }
        Ok(buf)
    }

    pub fn from_wire(buf: &[u8]) -> Result<MpReachNlri, Error> {
        if buf.len() < 5 {
            return Err(Error::TooSmall("mp_reach_nlri".into()));
        }
        let afi = u16::from_be_bytes([buf[0], buf[1]]);
        let safi = buf[2];
        if afi != Afi::Ipv6 as u16 || safi != Safi::Unicast as u8 {
            return Err(Error::InvalidCode(safi));
        }
        let nh_len = buf[3] as usize;
        if nh_len % 16 != 0 || buf.len() < 5 + nh_len {
            return Err(Error::TooSmall("mp_reach nexthop".into()));
        }
        let nexthop = buf[4..4 + nh_len]
            .chunks_exact(16)
            .map(|c| {
                let octets: [u8; 16] = c.try_into().expect("16 byte chunk");
                Ipv6Addr::from(octets)
            })
            .collect();

        // one reserved octet after the nexthop
        let mut rest = &buf[4 + nh_len + 1..];
        let mut nlri = Vec::new();
        while !rest.is_empty() {
            let (p, n) = prefix6_from_wire(rest)?;
            nlri.push(p);
            rest = &rest[n..];
        }
        Ok(MpReachNlri { nexthop, nlri })
    }
}

/// MP_UNREACH_NLRI for IPv6 unicast.
///
/// Ref: RFC 4760 §4
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct MpUnreachNlri {
    pub withdrawn: Vec<Prefix6>,
}

impl MpUnreachNlri {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(Afi::Ipv6 as u16).to_be_bytes());
        buf.push(Safi::Unicast as u8);
        for p in &self.withdrawn {
            buf.extend_from_slice(&prefix6_to_wire(p));
        }
        Ok(buf)
    }

    pub fn from_wire(buf: &[u8]) -> Result<MpUnreachNlri, Error> {
        if buf.len() < 3 {
            return Err(Error::TooSmall("mp_unreach_nlri".into()));
        }
        let afi = u16::from_be_bytes([buf[0], buf[1]]);
        let safi = buf[2];
        if afi != Afi::Ipv6 as u16 || safi != Safi::Unicast as u8 {
            return Err(Error::InvalidCode(safi));
        }
        let mut rest = &buf[3..];
        let mut withdrawn = Vec::new();
        while !rest.is_empty() {
            let (p, n) = prefix6_from_wire(rest)?;
            withdrawn.push(p);
            rest = &rest[n..];
        }
        Ok(MpUnreachNlri { withdrawn })
    }
}

/// Notification error codes.
///
/// Ref: RFC 4271 §4.5
#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum ErrorCode {
    Header = 1,
    Open = 2,
    Update = 3,
    HoldTimerExpired = 4,
    Fsm = 5,
    Cease = 6,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum HeaderErrorSubcode {
    ConnectionNotSynchronized = 1,
    BadMessageLength = 2,
    BadMessageType = 3,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum OpenErrorSubcode {
    UnsupportedVersionNumber = 1,
    BadPeerAS = 2,
    BadBgpIdentifier = 3,
    UnsupportedOptionalParameter = 4,
    UnacceptableHoldTime = 6,
    UnsupportedCapability = 7,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum UpdateErrorSubcode {
    MalformedAttributeList = 1,
    UnrecognizedWellKnownAttribute = 2,
    MissingWellKnownAttribute = 3,
    AttributeFlags = 4,
    AttributeLength = 5,
    InvalidOriginAttribute = 6,
    InvalidNexthopAttribute = 8,
    OptionalAttribute = 9,
    InvalidNetworkField = 10,
    MalformedAsPath = 11,
}

/// Per-state FSM error subcodes.
///
/// Ref: RFC 6608
#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum FsmErrorSubcode {
    Unspecified = 0,
    InOpenSent = 1,
    InOpenConfirm = 2,
    InEstablished = 3,
}

/// Cease subcodes.
///
/// Ref: RFC 4486
#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum CeaseErrorSubcode {
    MaximumPrefixesReached = 1,
    AdministrativeShutdown = 2,
    PeerDeconfigured = 3,
    AdministrativeReset = 4,
    ConnectionRejected = 5,
    OtherConfigurationChange = 6,
    ConnectionCollisionResolution = 7,
    OutOfResources = 8,
}

/// Sent when an error condition is detected; the session is closed right
/// after.
///
/// Ref: RFC 4271 §4.5
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NotificationMessage {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

impl NotificationMessage {
    pub fn new(code: ErrorCode, subcode: u8) -> NotificationMessage {
        NotificationMessage {
            error_code: code as u8,
            error_subcode: subcode,
            data: Vec::new(),
        }
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = vec![self.error_code, self.error_subcode];
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn from_wire(buf: &[u8]) -> Result<NotificationMessage, Error> {
        if buf.len() < 2 {
            return Err(Error::TooSmall("notification".into()));
        }
        Ok(NotificationMessage {
            error_code: buf[0],
            error_subcode: buf[1],
            data: buf[2..].to_vec(),
        })
    }
}

impl Display for NotificationMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match ErrorCode::try_from(self.error_code) {
            Ok(code) => {
                write!(f, "{:?} ({})/{}", code, self.error_code, self.error_subcode)
            }
            Err(_) => {
                write!(f, "unknown ({})/{}", self.error_code, self.error_subcode)
            }
        }
    }
}

impl rib::PathInfo for Vec<PathAttribute> {
    fn local_pref(&self) -> Option<u32> {
        self.iter().find_map(|a| match a.value {
            PathAttributeValue::LocalPref(v) => Some(v),
            _ => None,
        })
    }

    fn multi_exit_disc(&self) -> Option<u32> {
        self.iter().find_map(|a| match a.value {
            PathAttributeValue::MultiExitDisc(v) => Some(v),
            _ => None,
        })
    }

    fn origin(&self) -> Option<u8> {
        self.iter().find_map(|a| match a.value {
            PathAttributeValue::Origin(o) => Some(o as u8),
            _ => None,
        })
    }

    fn as_path_len(&self) -> usize {
        self.iter()
            .find_map(|a| match &a.value {
                PathAttributeValue::AsPath(p) => Some(p.path_len()),
                _ => None,
            })
            .unwrap_or(0)
    }

    fn first_as(&self) -> Option<u32> {
        self.iter().find_map(|a| match &a.value {
            PathAttributeValue::AsPath(p) => p.first_as(),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pretty_hex::*;

    #[test]
    fn header_round_trip() {
        let h0 = Header {
            length: 0x0103,
            typ: MessageType::Notification,
        };

        let buf = h0.to_wire();
        println!("buf: {}", buf.hex_dump());

        assert_eq!(
            buf,
            vec![
                0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // marker
                0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, //
                0x01, 0x03, // length
                3,    // type
            ]
        );

        let h1 = Header::from_wire(&buf).expect("header from wire");
        assert_eq!(h0, h1);
    }

    #[test]
    fn header_rejects_garbage() {
        let mut buf = Header {
            length: 100,
            typ: MessageType::Update,
        }
        .to_wire();
        buf[3] = 0;
        assert!(matches!(Header::from_wire(&buf), Err(Error::NoMarker)));

        let mut buf = MARKER.to_vec();
        buf.extend_from_slice(&5000u16.to_be_bytes());
        buf.push(2);
        assert!(matches!(
            Header::from_wire(&buf),
            Err(Error::BadMessageLength(5000))
        ));

        let mut buf = MARKER.to_vec();
        buf.extend_from_slice(&19u16.to_be_bytes());
        buf.push(9);
        assert!(matches!(
            Header::from_wire(&buf),
            Err(Error::InvalidMessageType(9))
        ));
    }

    #[test]
    fn open_round_trip_4b() {
        let om0 = OpenMessage::new4(395849, 0x1234, 0xaabbccdd);

        let buf = om0.to_wire().expect("open message to wire");
        println!("buf: {}", buf.hex_dump());

        let om1 = OpenMessage::from_wire(&buf).expect("open message from wire");
        assert_eq!(om0, om1);
        assert_eq!(om1.asn, AS_TRANS);
        assert_eq!(om1.asn(), 395849);
        assert!(om1.has_capability(CapabilityCode::FourOctetAs as u8));
    }

    #[test]
    fn open_preserves_unknown_capability() {
        let mut om0 = OpenMessage::new2(64496, 90, 0x01020304);
        om0.add_capability(Capability::Unknown {
            code: 73,
            data: vec![4, b'c', b'o', b'r', b'e'],
        });
        om0.add_capability(Capability::MultiprotocolExtensions {
            afi: Afi::Ipv6 as u16,
            safi: Safi::Unicast as u8,
        });

        let buf = om0.to_wire().expect("open to wire");
        let om1 = OpenMessage::from_wire(&buf).expect("open from wire");
        assert_eq!(om0, om1);
        assert_eq!(om1.asn(), 64496);
        assert!(om1.has_capability(73));

        let buf1 = om1.to_wire().expect("open to wire again");
        assert_eq!(buf, buf1);
    }

    #[test]
    fn keepalive_round_trip() {
        let buf = Message::KeepAlive.to_wire().expect("keepalive to wire");
        assert_eq!(buf.len(), HEADER_SIZE);
        let m = Message::from_wire(&buf, true).expect("keepalive from wire");
        assert_eq!(m, Message::KeepAlive);
    }

    #[test]
    fn notification_round_trip() {
        let n0 = NotificationMessage::new(
            ErrorCode::Cease,
            CeaseErrorSubcode::AdministrativeReset as u8,
        );
        let m = Message::from_wire(
            &Message::Notification(n0.clone()).to_wire().unwrap(),
            false,
        )
        .expect("notification from wire");
        assert_eq!(m, Message::Notification(n0));
    }

    fn sample_update() -> UpdateMessage {
        let mut update = UpdateMessage {
            withdrawn: vec!["10.9.0.0/16".parse().unwrap()],
            ..Default::default()
        };
        update
            .add_attr(PathAttribute::origin(PathOrigin::Igp))
            .unwrap();
        update
            .add_attr(PathAttribute::as_path(AsPath {
                four_octet: true,
                segments: vec![AsPathSegment {
                    typ: AsSegmentType::AsSequence,
                    value: vec![395849, 123456, 987654],
                }],
            }))
            .unwrap();
        update
            .add_attr(PathAttribute::next_hop("203.0.113.1".parse().unwrap()))
            .unwrap();
        update
            .add_attr(PathAttribute::communities(vec![0xfde80001, 0xfde80002]))
            .unwrap();
        update.nlri.push("192.0.2.0/24".parse().unwrap());
        update.nlri.push("198.51.100.0/25".parse().unwrap());
        update
    }

    #[test]
    fn update_round_trip() {
        let um0 = sample_update();

        let buf = um0.to_wire().expect("update message to wire");
        println!("buf: {}", buf.hex_dump());

        let um1 =
            UpdateMessage::from_wire(&buf, true).expect("update from wire");
        assert_eq!(um0, um1);

        // byte exact on re-emission
        assert_eq!(buf, um1.to_wire().unwrap());
    }

    #[test]
    fn update_round_trip_2b() {
        let mut um0 = UpdateMessage::default();
        um0.add_attr(PathAttribute::origin(PathOrigin::Egp)).unwrap();
        um0.add_attr(PathAttribute::as_path(AsPath {
            four_octet: false,
            segments: vec![
                AsPathSegment {
                    typ: AsSegmentType::AsSequence,
                    value: vec![64496, 23456],
                },
                AsPathSegment {
                    typ: AsSegmentType::AsSet,
                    value: vec![64501, 64502],
                },
            ],
        }))
        .unwrap();
        um0.add_attr(PathAttribute::next_hop("198.51.100.9".parse().unwrap()))
            .unwrap();
        um0.nlri.push("10.0.0.0/8".parse().unwrap());

        let buf = um0.to_wire().unwrap();
        let um1 = UpdateMessage::from_wire(&buf, false).unwrap();
        assert_eq!(um0, um1);
        assert_eq!(um1.as_path().unwrap().path_len(), 3);
    }

    #[test]
    fn update_rejects_duplicate_attribute() {
        let mut update = UpdateMessage::default();
        update.add_attr(PathAttribute::origin(PathOrigin::Igp)).unwrap();
        assert!(matches!(
            update.add_attr(PathAttribute::origin(PathOrigin::Egp)),
            Err(Error::DuplicateAttribute(1))
        ));

        // and on the wire
        let attr = PathAttribute::origin(PathOrigin::Igp).to_wire().unwrap();
        let mut body = Vec::new();
        body.extend_from_slice(&0u16.to_be_bytes());
        body.extend_from_slice(&((attr.len() * 2) as u16).to_be_bytes());
        body.extend_from_slice(&attr);
        body.extend_from_slice(&attr);
        assert!(matches!(
            UpdateMessage::from_wire(&body, true),
            Err(Error::DuplicateAttribute(1))
        ));
    }

    #[test]
    fn update_attr_set_semantics() {
        let mut update = UpdateMessage::default();
        update.add_attr(PathAttribute::local_pref(50)).unwrap();
        update.update_attr(PathAttribute::local_pref(200));
        assert_eq!(update.local_pref(), Some(200));
        assert_eq!(update.path_attributes.len(), 1);

        assert!(update.drop_attr(PathAttributeTypeCode::LocalPref as u8));
        assert!(!update.drop_attr(PathAttributeTypeCode::LocalPref as u8));
    }

    #[test]
    fn drop_non_transitive_keeps_mandatory() {
        let mut update = sample_update();
        update.add_attr(PathAttribute::multi_exit_disc(50)).unwrap();
        update
            .add_attr(PathAttribute {
                flags: PathAttributeFlags::Optional as u8,
                value: PathAttributeValue::Unknown {
                    type_code: 99,
                    data: vec![1, 2, 3],
                },
            })
            .unwrap();

        assert!(update.drop_non_transitive());
        assert!(!update.drop_non_transitive());
        assert!(update.has_attr(PathAttributeTypeCode::Origin as u8));
        assert!(update.has_attr(PathAttributeTypeCode::AsPath as u8));
        assert!(update.has_attr(PathAttributeTypeCode::NextHop as u8));
        assert!(update.has_attr(PathAttributeTypeCode::Communities as u8));
        assert!(!update.has_attr(PathAttributeTypeCode::MultiExitDisc as u8));
        assert!(!update.has_attr(99));
    }

    #[test]
    fn unknown_transitive_attribute_survives_and_gets_partial() {
        let mut um0 = sample_update();
        um0.add_attr(PathAttribute {
            flags: PathAttributeFlags::Optional
                | PathAttributeFlags::Transitive,
            value: PathAttributeValue::Unknown {
                type_code: 200,
                data: vec![0xde, 0xad],
            },
        })
        .unwrap();

        let buf = um0.to_wire().unwrap();
        let mut um1 = UpdateMessage::from_wire(&buf, true).unwrap();
        assert_eq!(um0, um1);

        um1.drop_non_transitive();
        um1.mark_forwarded_unknowns();
        let attr = um1.attr(200).unwrap();
        assert!(attr.is_partial());
    }

    #[test]
    fn mp_attrs_round_trip() {
        let mut um0 = UpdateMessage::default();
        um0.add_attr(PathAttribute::origin(PathOrigin::Igp)).unwrap();
        um0.add_attr(PathAttribute::as_path(AsPath {
            four_octet: true,
            segments: vec![AsPathSegment {
                typ: AsSegmentType::AsSequence,
                value: vec![64496],
            }],
        }))
        .unwrap();
        um0.add_attr(PathAttribute::mp_reach(MpReachNlri {
            nexthop: vec!["2001:db8::1".parse().unwrap()],
            nlri: vec!["2001:db8:100::/48".parse().unwrap()],
        }))
        .unwrap();
        um0.add_attr(PathAttribute::mp_unreach(MpUnreachNlri {
            withdrawn: vec!["2001:db8:200::/48".parse().unwrap()],
        }))
        .unwrap();

        let buf = um0.to_wire().unwrap();
        let um1 = UpdateMessage::from_wire(&buf, true).unwrap();
        assert_eq!(um0, um1);
        assert!(um1.missing_well_known().is_none());
    }

    #[test]
    fn missing_well_known_detection() {
        let mut update = UpdateMessage {
            nlri: vec!["192.0.2.0/24".parse().unwrap()],
            ..Default::default()
        };
        assert_eq!(
            update.missing_well_known(),
            Some(PathAttributeTypeCode::Origin as u8)
        );
        update.add_attr(PathAttribute::origin(PathOrigin::Igp)).unwrap();
        update
            .add_attr(PathAttribute::as_path(AsPath::new(true)))
            .unwrap();
        assert_eq!(
            update.missing_well_known(),
            Some(PathAttributeTypeCode::NextHop as u8)
        );
        update.set_nexthop4("203.0.113.1".parse().unwrap());
        assert_eq!(update.missing_well_known(), None);

        // withdraw-only updates need nothing
        let update = UpdateMessage {
            withdrawn: vec!["192.0.2.0/24".parse().unwrap()],
            ..Default::default()
        };
        assert_eq!(update.missing_well_known(), None);
    }

    #[test]
    fn prepend4_rejects_lingering_as4_path() {
        let mut update = UpdateMessage::default();
        update
            .add_attr(PathAttribute::as4_path(AsPath {
                four_octet: true,
                segments: vec![],
            }))
            .unwrap();
        assert!(matches!(
            update.prepend4(65550),
            Err(Error::MalformedAsPath)
        ));
    }

    #[test]
    fn prepend2_substitutes_as_trans() {
        let mut update = UpdateMessage::default();
        update.prepend2(131072, true).unwrap();
        update.prepend2(64496, true).unwrap();

        let path = update.as_path().unwrap();
        assert!(!path.four_octet);
        assert_eq!(
            path.segments[0].value,
            vec![64496, u32::from(AS_TRANS)]
        );

        let as4 = update.as4_path().unwrap();
        assert!(as4.four_octet);
        assert_eq!(as4.segments[0].value, vec![64496, 131072]);
    }

    #[test]
    fn prepend2_without_as4_never_attaches_as4_path() {
        let mut update = UpdateMessage::default();
        update.prepend2(131072, false).unwrap();
        assert!(update.as_path().is_some());
        assert!(update.as4_path().is_none());
    }

    #[test]
    fn restore_as_path_merges_as4() {
        // Peer announced AS_PATH=[64496, 23456], AS4_PATH=[64496, 131072].
        let mut update = UpdateMessage::default();
        update
            .add_attr(PathAttribute::as_path(AsPath {
                four_octet: false,
                segments: vec![AsPathSegment {
                    typ: AsSegmentType::AsSequence,
                    value: vec![64496, u32::from(AS_TRANS)],
                }],
            }))
            .unwrap();
        update
            .add_attr(PathAttribute::as4_path(AsPath {
                four_octet: true,
                segments: vec![AsPathSegment {
                    typ: AsSegmentType::AsSequence,
                    value: vec![64496, 131072],
                }],
            }))
            .unwrap();

        update.restore_as_path().unwrap();

        let path = update.as_path().unwrap();
        assert!(path.four_octet);
        assert_eq!(path.segments[0].value, vec![64496, 131072]);
        assert!(update.as4_path().is_none());
    }

    #[test]
    fn restore_as_path_without_as4_reencodes() {
        let mut update = UpdateMessage::default();
        update
            .add_attr(PathAttribute::as_path(AsPath {
                four_octet: false,
                segments: vec![AsPathSegment {
                    typ: AsSegmentType::AsSequence,
                    value: vec![64496, 64497],
                }],
            }))
            .unwrap();

        update.restore_as_path().unwrap();
        let path = update.as_path().unwrap();
        assert!(path.four_octet);
        assert_eq!(path.segments[0].value, vec![64496, 64497]);
    }

    #[test]
    fn restore_ignores_oversized_as4_path() {
        let mut update = UpdateMessage::default();
        update
            .add_attr(PathAttribute::as_path(AsPath {
                four_octet: false,
                segments: vec![AsPathSegment {
                    typ: AsSegmentType::AsSequence,
                    value: vec![64496],
                }],
            }))
            .unwrap();
        update
            .add_attr(PathAttribute::as4_path(AsPath {
                four_octet: true,
                segments: vec![AsPathSegment {
                    typ: AsSegmentType::AsSequence,
                    value: vec![131072, 131073],
                }],
            }))
            .unwrap();

        update.restore_as_path().unwrap();
        assert_eq!(update.as_path().unwrap().segments[0].value, vec![64496]);
    }

    #[test]
    fn downgrade_then_restore_is_identity() {
        let mut update = UpdateMessage::default();
        update
            .add_attr(PathAttribute::as_path(AsPath {
                four_octet: true,
                segments: vec![AsPathSegment {
                    typ: AsSegmentType::AsSequence,
                    value: vec![4200000001, 64496, 131072],
                }],
            }))
            .unwrap();

        update.downgrade_as_path().unwrap();
        let path = update.as_path().unwrap();
        assert!(!path.four_octet);
        assert_eq!(
            path.segments[0].value,
            vec![u32::from(AS_TRANS), 64496, u32::from(AS_TRANS)]
        );

        update.restore_as_path().unwrap();
        let path = update.as_path().unwrap();
        assert!(path.four_octet);
        assert_eq!(path.segments[0].value, vec![4200000001, 64496, 131072]);
    }

    #[test]
    fn aggregator_reconciliation() {
        let mut update = UpdateMessage::default();
        update
            .add_attr(PathAttribute::aggregator(Aggregator {
                asn: 4200000001,
                addr: "203.0.113.7".parse().unwrap(),
                four_octet: true,
            }))
            .unwrap();

        update.downgrade_aggregator();
        let agg = update.aggregator().unwrap();
        assert_eq!(agg.asn, u32::from(AS_TRANS));
        assert!(!agg.four_octet);
        assert!(update.has_attr(PathAttributeTypeCode::As4Aggregator as u8));

        update.restore_aggregator();
        let agg = update.aggregator().unwrap();
        assert_eq!(agg.asn, 4200000001);
        assert!(agg.four_octet);
        assert!(!update.has_attr(PathAttributeTypeCode::As4Aggregator as u8));
    }

    #[test]
    fn as_path_prepend_segment_rules() {
        let mut path = AsPath::new(true);
        path.prepend(3);
        path.prepend(2);
        path.prepend(1);
        assert_eq!(path.segments.len(), 1);
        assert_eq!(path.segments[0].value, vec![1, 2, 3]);
        assert_eq!(path.path_len(), 3);
        assert_eq!(path.first_as(), Some(1));

        // a leading set forces a fresh sequence
        let mut path = AsPath {
            four_octet: true,
            segments: vec![AsPathSegment {
                typ: AsSegmentType::AsSet,
                value: vec![7, 8],
            }],
        };
        path.prepend(1);
        assert_eq!(path.segments.len(), 2);
        assert_eq!(path.segments[0].typ, AsSegmentType::AsSequence);
        assert_eq!(path.path_len(), 2);
    }
}
