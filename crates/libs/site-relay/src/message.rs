use std::collections::HashMap;

use crate::address::Address;
use crate::header::RelayHeader;

/// Ordering/delivery flags carried by every message. `OOB` messages may be
/// delivered concurrently with, and ahead of, regular ones; `DONT_LOOPBACK`
/// and `NO_RELAY` suppress specific hops described in the relay core and
/// bundler sections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    pub oob: bool,
    pub dont_loopback: bool,
    pub no_relay: bool,
}

/// An application message as seen by the relay layer. The payload itself is
/// opaque; serialization of payloads and header maps belongs to the
/// transport, not this crate.
#[derive(Debug, Clone)]
pub struct Message {
    pub dest: Option<Address>,
    pub src: Option<Address>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, Vec<u8>>,
    pub flags: MessageFlags,
    /// Present once a message has been wrapped for a bridge hop; absent on
    /// an application-originated message.
    pub relay_header: Option<RelayHeader>,
}

impl Message {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            dest: None,
            src: None,
            payload,
            headers: HashMap::new(),
            flags: MessageFlags::default(),
            relay_header: None,
        }
    }

    pub fn with_dest(mut self, dest: impl Into<Address>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    pub fn with_src(mut self, src: impl Into<Address>) -> Self {
        self.src = Some(src.into());
        self
    }

    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Pre-serialization byte estimate including the transport's fixed
    /// per-message overhead, as used by the bundler's byte budget.
    pub fn estimated_size(&self, per_message_overhead: usize) -> usize {
        self.payload.len() + per_message_overhead
    }

    /// A clean copy addressed with `(dest, sender)` and no relay header,
    /// as handed to local cluster delivery.
    pub fn stripped_for_delivery(&self, dest: Address, sender: Address) -> Message {
        Message {
            dest: Some(dest),
            src: Some(sender),
            payload: self.payload.clone(),
            headers: self.headers.clone(),
            flags: self.flags,
            relay_header: None,
        }
    }
}
