//! Length-prefixed JSON framing
//!
//! Wire format:  [4-byte big-endian length][JSON payload]

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// Largest accepted frame body
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Read one frame. Returns `Ok(None)` on a clean EOF before the length prefix.
pub async fn read_frame<T, R>(reader: &mut R) -> Result<Option<T>>
where
    T: DeserializeOwned,
    R: AsyncReadExt + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;

    let msg = serde_json::from_slice(&buf).map_err(|e| Error::malformed(e.to_string()))?;
    Ok(Some(msg))
}

/// Write one frame and flush
pub async fn write_frame<T, W>(writer: &mut W, msg: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWriteExt + Unpin,
{
    let json = serde_json::to_vec(msg)?;
    let len = u32::try_from(json.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or(Error::FrameTooLarge {
            len: u32::MAX,
            max: MAX_FRAME_SIZE,
        })?;

    writer.write_u32(len).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;

    Ok(())
}
