// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::messages::{
    ErrorCode, HeaderErrorSubcode, OpenErrorSubcode, UpdateErrorSubcode,
};
use std::fmt::Display;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("too small: {0}")]
    TooSmall(String),

    #[error("too large: {0}")]
    TooLarge(String),

    #[error("no marker")]
    NoMarker,

    #[error("bad message length {0}")]
    BadMessageLength(u16),

    #[error("invalid message type {0}")]
    InvalidMessageType(u8),

    #[error("bad version {0}")]
    BadVersion(u8),

    #[error("unexpected ASN {0}")]
    UnexpectedAsn(ExpectationMismatch<u32>),

    #[error("hold time too small")]
    HoldTimeTooSmall,

    #[error("unsupported optional parameter {0}")]
    UnsupportedOptionalParameter(u8),

    #[error("invalid code {0}")]
    InvalidCode(u8),

    #[error("bad length: expected {expected}, found {found}")]
    BadLength { expected: u8, found: u8 },

    #[error("duplicate path attribute {0}")]
    DuplicateAttribute(u8),

    #[error("missing well-known attribute {0}")]
    MissingWellKnownAttribute(u8),

    #[error("malformed AS path")]
    MalformedAsPath,

    #[error("nexthop missing")]
    MissingNexthop,

    #[error("invalid NLRI prefix length {0}")]
    InvalidNlriPrefix(u8),

    #[error("stream sink lost synchronization")]
    OutOfSync,

    #[error("output sink disconnected")]
    Disconnected,

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

#[derive(Debug)]
pub struct ExpectationMismatch<T: Display> {
    pub expected: T,
    pub got: T,
}

impl<T: Display> Display for ExpectationMismatch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected: {} got: {}", self.expected, self.got)
    }
}

impl Error {
    /// Map an engine-internal error to the BGP Notification (code,
    /// subcode) reported to the peer when the error was their doing.
    pub fn notification_codes(&self) -> (ErrorCode, u8) {
        match self {
            Error::NoMarker | Error::OutOfSync => (
                ErrorCode::Header,
                HeaderErrorSubcode::ConnectionNotSynchronized as u8,
            ),
            Error::TooSmall(_)
            | Error::TooLarge(_)
            | Error::BadMessageLength(_)
            | Error::BadLength { .. } => (
                ErrorCode::Header,
                HeaderErrorSubcode::BadMessageLength as u8,
            ),
            Error::InvalidMessageType(_) => (
                ErrorCode::Header,
                HeaderErrorSubcode::BadMessageType as u8,
            ),
            Error::BadVersion(_) => (
                ErrorCode::Open,
                OpenErrorSubcode::UnsupportedVersionNumber as u8,
            ),
            Error::UnexpectedAsn(_) => {
                (ErrorCode::Open, OpenErrorSubcode::BadPeerAS as u8)
            }
            Error::HoldTimeTooSmall => (
                ErrorCode::Open,
                OpenErrorSubcode::UnacceptableHoldTime as u8,
            ),
            Error::UnsupportedOptionalParameter(_) => (
                ErrorCode::Open,
                OpenErrorSubcode::UnsupportedOptionalParameter as u8,
            ),
            Error::DuplicateAttribute(_) => (
                ErrorCode::Update,
                UpdateErrorSubcode::MalformedAttributeList as u8,
            ),
            Error::MissingWellKnownAttribute(_) => (
                ErrorCode::Update,
                UpdateErrorSubcode::MissingWellKnownAttribute as u8,
            ),
            Error::MalformedAsPath => (
                ErrorCode::Update,
                UpdateErrorSubcode::MalformedAsPath as u8,
            ),
            Error::MissingNexthop => (
                ErrorCode::Update,
                UpdateErrorSubcode::InvalidNexthopAttribute as u8,
            ),
            Error::InvalidNlriPrefix(_) => (
                ErrorCode::Update,
                UpdateErrorSubcode::InvalidNetworkField as u8,
            ),
            Error::InvalidCode(_) => (
                ErrorCode::Update,
                UpdateErrorSubcode::MalformedAttributeList as u8,
            ),
            _ => (
                ErrorCode::Header,
                HeaderErrorSubcode::ConnectionNotSynchronized as u8,
            ),
        }
    }
}
