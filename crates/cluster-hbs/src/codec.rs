//! Wire codec for heartbeat agent cluster messages and outbound queries.
//!
//! Cluster messages use the agent's fixed binary layout in host byte order:
//! a 12 byte header followed by `histories` records of 64 bytes each. Every
//! index taken from the payload is range checked before it is used.

use crate::constants::{
    HEADER_SIZE, HISTORY_CAPACITY, INVALID_REQ_ID, MAX_HISTORY_ELEMENTS, MAX_NETWORKS,
    N_CONTROLLERS, RECORD_SIZE,
};
use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

const STORAGE0_ENABLED_BIT: u8 = 0x01;
const HEARTBEAT_FAIL_BIT: u8 = 0x01;
const STORAGE0_RESPONDING_BIT: u8 = 0x02;

/// One slot of a history circular buffer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HistoryEntry {
    /// Hosts being monitored.
    pub hosts_enabled: u16,
    /// Hosts that responded.
    pub hosts_responding: u16,
}

/// One controller's reachability history for one network.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HistoryRecord {
    /// Controller the history was collected by.
    pub controller: u8,
    /// Network the history was collected on.
    pub network: u8,
    /// Raw SM heartbeat failure flag.
    pub sm_heartbeat_fail: u8,
    /// Whether storage-0 responded to this controller.
    pub storage0_responding: bool,
    /// Number of valid slots in `entry`.
    pub entries: u8,
    /// Index of the oldest valid slot.
    pub oldest_entry_index: u8,
    /// Circular buffer of samples.
    pub entry: [HistoryEntry; HISTORY_CAPACITY],
}

/// Index of the most recently written slot of a circular history buffer.
///
/// Computed as `(oldest + entries - 1) mod HISTORY_CAPACITY` without
/// underflowing when `entries` is zero.
#[must_use]
pub const fn newest_entry_index(oldest_entry_index: u8, entries: u8) -> usize {
    (oldest_entry_index as usize + entries as usize + HISTORY_CAPACITY - 1) % HISTORY_CAPACITY
}

impl HistoryRecord {
    /// Check every payload-derived field against its bound.
    ///
    /// # Errors
    ///
    /// Returns the first field found out of range.
    pub const fn validate(&self) -> std::result::Result<(), ProtocolError> {
        if self.controller as usize >= N_CONTROLLERS {
            return Err(ProtocolError::InvalidController(self.controller));
        }
        if self.network as usize >= MAX_NETWORKS {
            return Err(ProtocolError::InvalidNetwork(self.network));
        }
        if self.entries as usize > HISTORY_CAPACITY {
            return Err(ProtocolError::InvalidEntries(self.entries));
        }
        if self.oldest_entry_index as usize > HISTORY_CAPACITY {
            return Err(ProtocolError::InvalidOldestIndex(self.oldest_entry_index));
        }
        Ok(())
    }

    /// Index of the newest sample.
    #[must_use]
    pub const fn newest_index(&self) -> usize {
        newest_entry_index(self.oldest_entry_index, self.entries)
    }

    /// The newest sample.
    #[must_use]
    pub const fn newest_entry(&self) -> &HistoryEntry {
        &self.entry[self.newest_index()]
    }

    /// Whether the controller reported an SM heartbeat failure.
    #[must_use]
    pub const fn heartbeat_failed(&self) -> bool {
        self.sm_heartbeat_fail == 1
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let ids = buf.get_u8();
        let flags = buf.get_u8();
        let entries = buf.get_u8();
        let oldest_entry_index = buf.get_u8();

        let mut entry = [HistoryEntry::default(); HISTORY_CAPACITY];
        for slot in &mut entry {
            slot.hosts_enabled = buf.get_u16_ne();
            slot.hosts_responding = buf.get_u16_ne();
        }

        Self {
            controller: ids & 0x0F,
            network: ids >> 4,
            sm_heartbeat_fail: flags & HEARTBEAT_FAIL_BIT,
            storage0_responding: flags & STORAGE0_RESPONDING_BIT != 0,
            entries,
            oldest_entry_index,
            entry,
        }
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8((self.controller & 0x0F) | (self.network << 4));
        let mut flags = self.sm_heartbeat_fail & HEARTBEAT_FAIL_BIT;
        if self.storage0_responding {
            flags |= STORAGE0_RESPONDING_BIT;
        }
        buf.put_u8(flags);
        buf.put_u8(self.entries);
        buf.put_u8(self.oldest_entry_index);
        for slot in &self.entry {
            buf.put_u16_ne(slot.hosts_enabled);
            buf.put_u16_ne(slot.hosts_responding);
        }
    }
}

/// Fixed header of a cluster message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MessageHeader {
    /// Protocol version.
    pub version: u8,
    /// Protocol revision.
    pub revision: u8,
    /// Agent magic number.
    pub magic_number: u16,
    /// Request id this message answers, 0 if unsolicited.
    pub reqid: u16,
    /// Agent heartbeat period.
    pub period_msec: u16,
    /// Total message size as stated by the agent.
    pub bytes: u16,
    /// Whether storage-0 is provisioned.
    pub storage0_enabled: bool,
    /// Number of history records that follow.
    pub histories: u8,
}

impl MessageHeader {
    fn decode(buf: &mut impl Buf) -> Self {
        let version = buf.get_u8();
        let revision = buf.get_u8();
        let magic_number = buf.get_u16_ne();
        let reqid = buf.get_u16_ne();
        let period_msec = buf.get_u16_ne();
        let bytes = buf.get_u16_ne();
        let flags = buf.get_u8();
        let histories = buf.get_u8();

        Self {
            version,
            revision,
            magic_number,
            reqid,
            period_msec,
            bytes,
            storage0_enabled: flags & STORAGE0_ENABLED_BIT != 0,
            histories,
        }
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.revision);
        buf.put_u16_ne(self.magic_number);
        buf.put_u16_ne(self.reqid);
        buf.put_u16_ne(self.period_msec);
        buf.put_u16_ne(self.bytes);
        buf.put_u8(if self.storage0_enabled {
            STORAGE0_ENABLED_BIT
        } else {
            0
        });
        buf.put_u8(self.histories);
    }
}

/// A decoded and validated cluster message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClusterMessage {
    /// Message header.
    pub header: MessageHeader,
    /// History records, `header.histories` of them.
    pub histories: Vec<HistoryRecord>,
}

/// Expected total length for a message declaring `histories` records.
#[must_use]
pub const fn expected_size(histories: usize) -> usize {
    HEADER_SIZE + histories * RECORD_SIZE
}

impl ClusterMessage {
    /// Build a message whose header counts and sizes match `histories`.
    ///
    /// The header count field is one byte wide, so at most 255 records fit.
    /// Longer inputs saturate the header fields and no longer decode.
    #[must_use]
    pub fn new(storage0_enabled: bool, histories: Vec<HistoryRecord>) -> Self {
        debug_assert!(
            histories.len() <= usize::from(u8::MAX),
            "{} history records do not fit the header count",
            histories.len()
        );
        let header = MessageHeader {
            version: 1,
            revision: 1,
            bytes: u16::try_from(expected_size(histories.len())).unwrap_or(u16::MAX),
            storage0_enabled,
            histories: u8::try_from(histories.len()).unwrap_or(u8::MAX),
            ..MessageHeader::default()
        };
        Self { header, histories }
    }

    /// Decode a received datagram.
    ///
    /// The whole message is rejected if its length does not exactly match the
    /// declared record count or if any record fails validation.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] describing the first problem found.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, ProtocolError> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::Undersized {
                size: data.len(),
                header: HEADER_SIZE,
            });
        }

        let mut buf = data;
        let header = MessageHeader::decode(&mut buf);
        let count = usize::from(header.histories);

        if count == 0 {
            return Ok(Self {
                header,
                histories: Vec::new(),
            });
        }

        let expected = expected_size(count);
        if data.len() != expected {
            return Err(ProtocolError::SizeMismatch {
                size: data.len(),
                expected,
            });
        }
        if count > MAX_HISTORY_ELEMENTS {
            return Err(ProtocolError::TooManyHistories {
                count,
                max: MAX_HISTORY_ELEMENTS,
            });
        }

        let mut histories = Vec::with_capacity(count);
        for _ in 0..count {
            let record = HistoryRecord::decode(&mut buf);
            record.validate()?;
            histories.push(record);
        }

        Ok(Self { header, histories })
    }

    /// Encode into the agent's wire layout.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(expected_size(self.histories.len()));
        self.header.encode(&mut buf);
        for record in &self.histories {
            record.encode(&mut buf);
        }
        buf.freeze()
    }
}

/// Text-encoded query sent to the heartbeat agent.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Requesting service.
    pub origin: String,
    /// Target service.
    pub service: String,
    /// Requested operation.
    pub request: String,
    /// Request id as a decimal string.
    pub reqid: String,
}

impl QueryRequest {
    /// A cluster info query carrying `reqid`.
    #[must_use]
    pub fn cluster_info(reqid: u16) -> Self {
        Self {
            origin: "sm".to_string(),
            service: "heartbeat".to_string(),
            request: "cluster_info".to_string(),
            reqid: reqid.to_string(),
        }
    }

    /// Parsed request id, if well formed.
    #[must_use]
    pub fn reqid(&self) -> Option<u16> {
        self.reqid.parse().ok()
    }

    /// Whether the sender expects no response.
    #[must_use]
    pub fn is_alive_pulse(&self) -> bool {
        self.reqid() == Some(INVALID_REQ_ID)
    }

    /// Serialize into a datagram payload.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse a datagram payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid query.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
