//! Shared CrowdStream overlay protocol helpers.
//!
//! The protocol sends a fixed-size header followed by a MessagePack payload.
//! This crate keeps the framing logic in one place so the engine and any
//! overlay subscriber stay interoperable.

use std::collections::BTreeMap;
use std::convert::TryFrom;

use bytes::Buf;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

/// Bytes that prefix every CrowdStream message ("CRWD").
pub const HEADER_MAGIC: [u8; 4] = *b"CRWD";

/// Protocol revision understood by this crate.
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// Length of the binary header in bytes.
pub const HEADER_LEN: usize = 4 + 2 + 2 + 4;

/// Message kinds understood by CrowdStream v1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr, Hash)]
#[repr(u16)]
pub enum MessageKind {
    Hello = 0x0001,
    VoteUpdate = 0x0002,
    CommandExecuted = 0x0003,
    ComboLanded = 0x0004,
    Achievement = 0x0005,
    Heartbeat = 0x0006,
}

/// Envelope describing the upcoming payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u16,
    pub kind: MessageKind,
    pub length: u32,
}

impl MessageHeader {
    /// Encode the header as big-endian bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&HEADER_MAGIC);
        out[4..6].copy_from_slice(&self.version.to_be_bytes());
        out[6..8].copy_from_slice(&(self.kind as u16).to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Decode a header from raw bytes.
    pub fn decode(input: &[u8]) -> Result<Self, ProtocolError> {
        if input.len() < HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader);
        }
        if input[..4] != HEADER_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let mut version_bytes = &input[4..6];
        let version = version_bytes.get_u16();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let mut kind_bytes = &input[6..8];
        let kind_raw = kind_bytes.get_u16();
        let kind = MessageKind::try_from(kind_raw)
            .map_err(|_| ProtocolError::UnknownMessageKind(kind_raw))?;
        let mut len_bytes = &input[8..12];
        let length = len_bytes.get_u32();
        Ok(Self {
            version,
            kind,
            length,
        })
    }
}

impl TryFrom<u16> for MessageKind {
    type Error = ();

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Hello),
            0x0002 => Ok(Self::VoteUpdate),
            0x0003 => Ok(Self::CommandExecuted),
            0x0004 => Ok(Self::ComboLanded),
            0x0005 => Ok(Self::Achievement),
            0x0006 => Ok(Self::Heartbeat),
            _ => Err(()),
        }
    }
}

/// Minimal handshake message that opens a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: String,
    pub producer: String,
    pub build: Option<String>,
}

impl Hello {
    pub fn new(producer: impl Into<String>, build: Option<String>) -> Self {
        Self {
            protocol: "CrowdStream".to_string(),
            producer: producer.into(),
            build,
        }
    }
}

/// Tallies for one team pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamTally {
    pub team: u8,
    pub votes: BTreeMap<String, f64>,
}

fn vec_is_empty<T>(vec: &Vec<T>) -> bool {
    vec.is_empty()
}

/// Live vote window state pushed after every accepted vote and window open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteUpdate {
    pub seq: u64,
    pub host_time_ns: u64,
    pub phase: String,
    pub window: u64,
    pub window_ms: u64,
    pub time_remaining_ms: u64,
    pub votes: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "vec_is_empty", default)]
    pub teams: Vec<TeamTally>,
    pub voter_count: u32,
    pub multiplayer: bool,
}

/// A command that was handed to the emulator, voted or injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedCommand {
    pub id: u64,
    pub key: String,
    pub button: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<u8>,
    pub vote_count: f64,
    pub first_voter: String,
    pub total_voters: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<u64>,
    pub source: String,
    pub timestamp_ms: u64,
}

/// Crowd finished a registered button sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComboLanded {
    pub combo_id: String,
    pub name: String,
    pub description: String,
    pub bonus: u32,
    pub bonus_points: u32,
    pub finisher: String,
}

/// Identity crossed an achievement threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub identity: String,
    pub display_name: String,
    pub achievement: String,
    pub description: String,
}

/// Keep-alive sent while nothing else is happening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub seq: u64,
    pub host_time_ns: u64,
}

/// Error conditions returned by the protocol helpers.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("header smaller than {HEADER_LEN} bytes")]
    TruncatedHeader,
    #[error("header magic mismatch")]
    BadMagic,
    #[error("protocol version {0:#06x} is not supported")]
    UnsupportedVersion(u16),
    #[error("message kind {0:#06x} is unknown")]
    UnknownMessageKind(u16),
    #[error("payload length mismatch: header declared {expected} bytes but read {actual}")]
    LengthMismatch { expected: u32, actual: usize },
    #[error("payload decode error: {0}")]
    PayloadDecode(#[from] rmp_serde::decode::Error),
    #[error("payload encode error: {0}")]
    PayloadEncode(#[from] rmp_serde::encode::Error),
}

/// Wraps a payload with framing suitable for the wire.
pub fn encode_message<T>(kind: MessageKind, payload: &T) -> Result<Vec<u8>, ProtocolError>
where
    T: Serialize,
{
    let payload_bytes = rmp_serde::to_vec_named(payload)?;
    let header = MessageHeader {
        version: PROTOCOL_VERSION,
        kind,
        length: u32::try_from(payload_bytes.len()).map_err(|_| ProtocolError::LengthMismatch {
            expected: u32::MAX,
            actual: payload_bytes.len(),
        })?,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload_bytes.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&payload_bytes);
    Ok(out)
}

/// Decodes a framed message returning both header and payload bytes.
pub fn decode_envelope(bytes: &[u8]) -> std::result::Result<(MessageHeader, &[u8]), ProtocolError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::TruncatedHeader);
    }
    let header = MessageHeader::decode(&bytes[..HEADER_LEN])?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != header.length as usize {
        return Err(ProtocolError::LengthMismatch {
            expected: header.length,
            actual: payload.len(),
        });
    }
    Ok((header, payload))
}

/// Decode a payload straight into the requested type.
pub fn decode_payload<T>(payload: &[u8]) -> std::result::Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    let value = rmp_serde::from_slice(payload)?;
    Ok(value)
}
