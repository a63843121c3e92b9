//! Wire framing for envelope batches on the upstream TCP stream.
//!
//! Every batch is written as a fixed-size binary header followed by a
//! variable-length JSON payload. Frames follow one another back to back for
//! the life of the connection.
//!
//! ```text
//! +-------+-------+-------------------+-----------------------------+
//! | magic | ver   | payload_len (u32) | payload (payload_len bytes) |
//! | 0x46  | 0x01  | big-endian        | UTF-8 JSON EnvelopeBatch    |
//! +-------+-------+-------------------+-----------------------------+
//!   1 byte  1 byte      4 bytes          variable
//!                  ← fixed 6 bytes →
//! ```
//!
//! The agent only ever encodes. `write_batch` and `read_batch` are the
//! stream-level halves the aggregator side would use; they are compiled for
//! tests, where they check frames end to end.

#[cfg(test)]
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ---

use ferry_domain::{EnvelopeBatch, FerryError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic byte, 'F' for Ferry.  Lets the receiver detect misaligned reads.
pub const MAGIC: u8 = 0x46;

/// Wire format version.  Bump when the fixed header layout changes.
pub const VERSION: u8 = 0x01;

/// Fixed header size in bytes: magic(1) + ver(1) + payload_len(4).
pub const FIXED_HEADER_LEN: usize = 6;

/// Largest payload either side will produce or accept.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// encode_batch
// ---------------------------------------------------------------------------

/// Serialize `batch` into one complete frame.
///
/// Callers that share a stream encode outside their lock and then write the
/// frame with a single `write_all`.
pub fn encode_batch(batch: &EnvelopeBatch) -> Result<Vec<u8>> {
    // ---
    let payload = serde_json::to_vec(batch)
        .map_err(|e| FerryError::Transport(format!("framing serialize error: {e}")))?;

    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FerryError::Transport(format!(
            "batch payload of {} bytes exceeds {MAX_PAYLOAD_LEN}",
            payload.len()
        )));
    }
    // Bounded by MAX_PAYLOAD_LEN above.
    let payload_len = payload.len() as u32;

    let mut frame = Vec::with_capacity(FIXED_HEADER_LEN + payload.len());
    frame.push(MAGIC);
    frame.push(VERSION);
    frame.extend_from_slice(&payload_len.to_be_bytes());
    frame.extend_from_slice(&payload);

    Ok(frame)
}

// ---------------------------------------------------------------------------
// write_batch
// ---------------------------------------------------------------------------

/// Encode `batch` and write the frame to `stream`.
#[cfg(test)]
pub async fn write_batch<W>(stream: &mut W, batch: &EnvelopeBatch) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_batch(batch)?;

    stream
        .write_all(&frame)
        .await
        .map_err(|e| FerryError::Transport(format!("framing write: {e}")))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// read_batch
// ---------------------------------------------------------------------------

/// Read one frame from `stream`.
///
/// Returns `Ok(None)` on a clean end of stream between frames. A stream
/// that ends mid-frame, a wrong magic byte or version, an oversize length
/// or an undecodable payload are errors.
#[cfg(test)]
pub async fn read_batch<R>(stream: &mut R) -> Result<Option<EnvelopeBatch>>
where
    R: AsyncRead + Unpin,
{
    let mut fixed = [0u8; FIXED_HEADER_LEN];

    // First byte separately so EOF between frames is not an error.
    let n = stream
        .read(&mut fixed[..1])
        .await
        .map_err(|e| FerryError::Transport(format!("framing read fixed header: {e}")))?;
    if n == 0 {
        return Ok(None);
    }

    stream
        .read_exact(&mut fixed[1..])
        .await
        .map_err(|e| FerryError::Transport(format!("framing read fixed header: {e}")))?;

    if fixed[0] != MAGIC {
        return Err(FerryError::Transport(format!(
            "framing bad magic: expected 0x{MAGIC:02X}, got 0x{:02X}",
            fixed[0]
        )));
    }

    if fixed[1] != VERSION {
        return Err(FerryError::Transport(format!(
            "framing unsupported version: expected {VERSION}, got {}",
            fixed[1]
        )));
    }

    let payload_len = u32::from_be_bytes([fixed[2], fixed[3], fixed[4], fixed[5]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(FerryError::Transport(format!(
            "framing payload length {payload_len} exceeds {MAX_PAYLOAD_LEN}"
        )));
    }

    let mut payload = vec![0u8; payload_len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| FerryError::Transport(format!("framing read payload: {e}")))?;

    let batch: EnvelopeBatch = serde_json::from_slice(&payload)
        .map_err(|e| FerryError::Transport(format!("framing deserialize error: {e}")))?;

    Ok(Some(batch))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
