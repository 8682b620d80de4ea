//! NetFlow v5 datagram decoding.
//!
//! A v5 datagram is a 24-byte header followed by `count` fixed 48-byte
//! records, all fields in network byte order. Only the fields carried by
//! [`FlowHeader`] and [`FlowRecord`] are decoded; the rest of each structure
//! is skipped.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const NETFLOW_V5_VERSION: u16 = 5;
pub const HEADER_SIZE: usize = 24;
pub const RECORD_SIZE: usize = 48;
pub const MIN_RECORD_COUNT: u16 = 1;
/// A 1500-byte datagram holds at most 30 records; anything above this is
/// corrupt or not v5 at all.
pub const MAX_RECORD_COUNT: u16 = 1000;

pub const PROTOCOL_ICMP: u8 = 1;
pub const PROTOCOL_TCP: u8 = 6;
pub const PROTOCOL_UDP: u8 = 17;

// Header offsets.
const VERSION_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 2;
const UPTIME_OFFSET: usize = 4;
const UNIX_SECS_OFFSET: usize = 8;

// Record offsets, relative to the record base.
const SRC_ADDR_OFFSET: usize = 0;
const DST_ADDR_OFFSET: usize = 4;
const PACKETS_OFFSET: usize = 16;
const BYTES_OFFSET: usize = 20;
const FIRST_OFFSET: usize = 24;
const LAST_OFFSET: usize = 28;
const SRC_PORT_OFFSET: usize = 32;
const DST_PORT_OFFSET: usize = 34;
const PROTOCOL_OFFSET: usize = 38;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("datagram too short for a netflow v5 header: {len} bytes, need {need}", need = HEADER_SIZE)]
    HeaderTooShort { len: usize },

    #[error("not a netflow v5 datagram: version {0}")]
    UnsupportedVersion(u16),

    #[error(
        "invalid netflow v5 record count {0}, expected {min}..={max}",
        min = MIN_RECORD_COUNT,
        max = MAX_RECORD_COUNT
    )]
    InvalidRecordCount(u16),

    #[error(
        "netflow v5 datagram truncated: header declares {declared} records, payload holds {available}"
    )]
    TruncatedRecords { declared: u16, available: u16 },
}

impl DecodeError {
    /// Short label used for counters and structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HeaderTooShort { .. } | Self::InvalidRecordCount(_) => "malformed_header",
            Self::UnsupportedVersion(_) => "unsupported_version",
            Self::TruncatedRecords { .. } => "truncated_records",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowHeader {
    pub version: u16,
    pub record_count: u16,
    pub uptime_ms: u32,
    pub unix_seconds: u32,
}

impl FlowHeader {
    pub fn export_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(u64::from(self.unix_seconds))
    }

    /// Bytes a complete datagram with this header occupies.
    pub fn expected_len(&self) -> usize {
        HEADER_SIZE + usize::from(self.record_count) * RECORD_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowRecord {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub packet_count: u32,
    pub byte_count: u32,
    pub start_uptime_ms: u32,
    pub end_uptime_ms: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

impl FlowRecord {
    pub fn is_tcp(&self) -> bool {
        self.protocol == PROTOCOL_TCP
    }

    pub fn is_udp(&self) -> bool {
        self.protocol == PROTOCOL_UDP
    }

    pub fn protocol_name(&self) -> String {
        match self.protocol {
            PROTOCOL_ICMP => "icmp".to_string(),
            PROTOCOL_TCP => "tcp".to_string(),
            PROTOCOL_UDP => "udp".to_string(),
            other => other.to_string(),
        }
    }

    /// Flow duration in device uptime. Counters that wrapped report zero.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(u64::from(
            self.end_uptime_ms.saturating_sub(self.start_uptime_ms),
        ))
    }
}

impl fmt::Display for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} # {} - {}",
            self.src_addr,
            self.src_port,
            self.dst_addr,
            self.dst_port,
            self.packet_count,
            self.byte_count
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub header: FlowHeader,
    pub records: Vec<FlowRecord>,
}

impl Datagram {
    pub fn is_complete(&self) -> bool {
        self.records.len() == usize::from(self.header.record_count)
    }

    /// The truncation error for a datagram that held fewer records than declared.
    pub fn truncation(&self) -> Option<DecodeError> {
        if self.is_complete() {
            return None;
        }
        Some(DecodeError::TruncatedRecords {
            declared: self.header.record_count,
            available: self.records.len() as u16,
        })
    }
}

pub fn parse_header(payload: &[u8]) -> Result<FlowHeader, DecodeError> {
    let too_short = DecodeError::HeaderTooShort { len: payload.len() };
    if payload.len() < HEADER_SIZE {
        return Err(too_short);
    }

    let version = read_u16(payload, VERSION_OFFSET).ok_or(too_short)?;
    if version != NETFLOW_V5_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let record_count = read_u16(payload, COUNT_OFFSET).ok_or(too_short)?;
    if !(MIN_RECORD_COUNT..=MAX_RECORD_COUNT).contains(&record_count) {
        return Err(DecodeError::InvalidRecordCount(record_count));
    }

    Ok(FlowHeader {
        version,
        record_count,
        uptime_ms: read_u32(payload, UPTIME_OFFSET).ok_or(too_short)?,
        unix_seconds: read_u32(payload, UNIX_SECS_OFFSET).ok_or(too_short)?,
    })
}

/// Decode one record from a slice starting at the record base.
///
/// Returns `None` when fewer than [`RECORD_SIZE`] bytes are available.
pub fn parse_record(data: &[u8]) -> Option<FlowRecord> {
    let data = data.get(..RECORD_SIZE)?;
    Some(FlowRecord {
        src_addr: Ipv4Addr::from(read_u32(data, SRC_ADDR_OFFSET)?),
        dst_addr: Ipv4Addr::from(read_u32(data, DST_ADDR_OFFSET)?),
        packet_count: read_u32(data, PACKETS_OFFSET)?,
        byte_count: read_u32(data, BYTES_OFFSET)?,
        start_uptime_ms: read_u32(data, FIRST_OFFSET)?,
        end_uptime_ms: read_u32(data, LAST_OFFSET)?,
        src_port: read_u16(data, SRC_PORT_OFFSET)?,
        dst_port: read_u16(data, DST_PORT_OFFSET)?,
        protocol: *data.get(PROTOCOL_OFFSET)?,
    })
}

/// Parse a whole datagram.
///
/// Header problems are errors. A payload that ends before the declared record
/// count still parses: the records that fit are returned in wire order and
/// [`Datagram::truncation`] reports the shortfall.
pub fn parse_datagram(payload: &[u8]) -> Result<Datagram, DecodeError> {
    let header = parse_header(payload)?;

    let mut records = Vec::with_capacity(usize::from(header.record_count));
    for index in 0..usize::from(header.record_count) {
        let base = HEADER_SIZE + index * RECORD_SIZE;
        let Some(record) = payload.get(base..).and_then(parse_record) else {
            break;
        };
        records.push(record);
    }

    Ok(Datagram { header, records })
}

/// Decode the records of a datagram, logging instead of failing.
///
/// Malformed datagrams yield an empty vector; truncated ones yield the
/// records that were complete.
pub fn decode_datagram(payload: &[u8]) -> Vec<FlowRecord> {
    match parse_datagram(payload) {
        Ok(datagram) => {
            if let Some(err) = datagram.truncation() {
                tracing::warn!(kind = err.kind(), "{}", err);
            }
            datagram.records
        }
        Err(err) => {
            tracing::warn!(kind = err.kind(), "discarding datagram: {}", err);
            Vec::new()
        }
    }
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
