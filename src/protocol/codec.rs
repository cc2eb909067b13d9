//! Length-prefixed framing and JSON encoding of envelopes.
//!
//! A frame is a 4-byte little-endian payload length followed by the UTF-8 JSON payload.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::message::Envelope;
use crate::error::{Result, SimError};

pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub fn write_frame<W: Write>(out: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(payload)?;
    out.flush()
}

/// Reads one frame. A zero-length or oversized frame is reported as `InvalidData`.
pub fn read_frame<R: Read>(input: &mut R) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    input.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if len == 0 || len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid frame length {len}"),
        ));
    }
    let mut payload = vec![0u8; len];
    input.read_exact(&mut payload)?;
    Ok(payload)
}

pub fn encode<T: Serialize>(envelope: &Envelope<T>) -> Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(|e| SimError::MalformedMessage(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<Envelope<T>> {
    serde_json::from_slice(payload).map_err(|e| SimError::MalformedMessage(e.to_string()))
}
