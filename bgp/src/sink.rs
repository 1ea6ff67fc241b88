// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resynchronizing message framer. Arbitrary byte chunks go in through
//! [`MessageSink::fill`]; complete BGP frames, 19-byte header intact, come
//! out one at a time through [`MessageSink::pour`]. A marker or length
//! violation taints the sink until the caller drains it.

use crate::error::Error;
use crate::messages::{HEADER_SIZE, MARKER, MAX_MESSAGE_SIZE};

/// Default sink capacity. Twice the largest message, so a full message can
/// always land behind a partial one.
pub const SINK_SIZE: usize = 8192;

/// Single-producer, single-consumer per session. The session owns its
/// sink; hosts never touch it directly.
pub struct MessageSink {
    buffer: Vec<u8>,
    start: usize,
    end: usize,
    synchronized: bool,
}

impl Default for MessageSink {
    fn default() -> Self {
        Self::with_capacity(SINK_SIZE)
    }
}

impl MessageSink {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            start: 0,
            end: 0,
            synchronized: true,
        }
    }

    /// Bytes buffered and not yet poured.
    pub fn pending(&self) -> usize {
        self.end - self.start
    }

    /// Append a chunk of stream bytes. Fails only when the chunk cannot
    /// fit next to the unconsumed residue, which a host feeding chunks of
    /// at most one sink-capacity cannot trigger between pours.
    pub fn fill(&mut self, buf: &[u8]) -> Result<(), Error> {
        if self.end + buf.len() > self.buffer.len() {
            self.settle();
            if self.end + buf.len() > self.buffer.len() {
                return Err(Error::TooLarge(format!(
                    "sink overflow: {} pending + {} in",
                    self.pending(),
                    buf.len()
                )));
            }
        }
        self.buffer[self.end..self.end + buf.len()].copy_from_slice(buf);
        self.end += buf.len();
        Ok(())
    }

    /// Take one complete frame out of the sink. `Ok(None)` means more
    /// bytes are needed. A marker mismatch or invalid length returns an
    /// error and taints the sink: every subsequent pour fails until
    /// [`Self::drain`].
    pub fn pour(&mut self) -> Result<Option<&[u8]>, Error> {
        if !self.synchronized {
            return Err(Error::OutOfSync);
        }
        if self.pending() < HEADER_SIZE {
            return Ok(None);
        }

        let cur = self.start;
        if self.buffer[cur..cur + 16] != MARKER {
            self.synchronized = false;
            return Err(Error::NoMarker);
        }

        let length =
            u16::from_be_bytes([self.buffer[cur + 16], self.buffer[cur + 17]]);
        if (length as usize) < HEADER_SIZE
            || length as usize > MAX_MESSAGE_SIZE
        {
            self.synchronized = false;
            return Err(Error::BadMessageLength(length));
        }

        if length as usize > self.pending() {
            return Ok(None);
        }

        self.start += length as usize;
        Ok(Some(&self.buffer[cur..cur + length as usize]))
    }

    /// Discard everything buffered and clear the out-of-sync taint.
    pub fn drain(&mut self) {
        self.start = 0;
        self.end = 0;
        self.synchronized = true;
    }

    /// Move the unconsumed residue to the front of the buffer.
    fn settle(&mut self) {
        if self.start > 0 {
            self.buffer.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Message, OpenMessage};

    fn frame() -> Vec<u8> {
        Message::Open(OpenMessage::new4(395849, 90, 0x01020304))
            .to_wire()
            .unwrap()
    }

    #[test]
    fn pours_one_message_at_a_time() {
        let mut sink = MessageSink::default();
        let f = frame();
        let mut both = f.clone();
        both.extend_from_slice(&f);
        sink.fill(&both).unwrap();

        let got = sink.pour().unwrap().unwrap().to_vec();
        assert_eq!(got, f);
        let got = sink.pour().unwrap().unwrap().to_vec();
        assert_eq!(got, f);
        assert!(sink.pour().unwrap().is_none());
    }

    #[test]
    fn reassembles_split_frames() {
        let mut sink = MessageSink::default();
        let f = frame();

        sink.fill(&f[..7]).unwrap();
        assert!(sink.pour().unwrap().is_none());
        sink.fill(&f[7..21]).unwrap();
        assert!(sink.pour().unwrap().is_none());
        sink.fill(&f[21..]).unwrap();
        let got = sink.pour().unwrap().unwrap().to_vec();
        assert_eq!(got, f);
    }

    #[test]
    fn taints_on_bad_marker_until_drained() {
        let mut sink = MessageSink::default();
        let mut f = frame();
        f[0] = 0;
        sink.fill(&f).unwrap();

        assert!(matches!(sink.pour(), Err(Error::NoMarker)));
        assert!(matches!(sink.pour(), Err(Error::OutOfSync)));

        sink.drain();
        let f = frame();
        sink.fill(&f).unwrap();
        assert!(sink.pour().unwrap().is_some());
    }

    #[test]
    fn taints_on_bad_length() {
        let mut sink = MessageSink::default();
        let mut f = frame();
        f[16] = 0xff;
        f[17] = 0xff;
        sink.fill(&f).unwrap();
        assert!(matches!(sink.pour(), Err(Error::BadMessageLength(0xffff))));
        assert!(matches!(sink.pour(), Err(Error::OutOfSync)));
    }

    #[test]
    fn settles_to_make_room() {
        let mut sink = MessageSink::with_capacity(64);
        let keep = Message::KeepAlive.to_wire().unwrap();

        // Fill and pour enough keepalives to wrap the write offset past
        // the capacity if residue were never compacted.
        for _ in 0..10 {
            sink.fill(&keep).unwrap();
            assert!(sink.pour().unwrap().is_some());
        }

        // Overflow is still detected when residue genuinely cannot fit.
        let big = vec![0u8; 65];
        assert!(matches!(sink.fill(&big), Err(Error::TooLarge(_))));
    }
}
