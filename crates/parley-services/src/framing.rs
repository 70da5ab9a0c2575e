//! Async frame I/O: one JSON document per `\n`-terminated line.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use parley_core::wire::{encode_frame, FRAME_DELIMITER};

/// Read one frame of at most `max_len` bytes, delimiter stripped.
///
/// Returns `Ok(None)` on a clean EOF. An unterminated final frame before EOF
/// is returned as-is, so senders that write one document and half-close the
/// connection are still understood. A frame longer than `max_len` is an
/// `InvalidData` error and leaves the stream mid-frame.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader
        .take(max_len as u64 + 1)
        .read_until(FRAME_DELIMITER, &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&FRAME_DELIMITER) {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame exceeds {max_len} bytes"),
        ));
    }
    Ok(Some(buf))
}

/// Serialize `value` and write it as one frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let frame = encode_frame(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}
