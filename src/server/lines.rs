//! Bounded newline-delimited reads shared by the line protocols.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest line a client may send, newline included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum LineRead {
    /// `buf` holds one line (the trailing newline, if any, is kept).
    Line,
    /// The line exceeded the limit and was discarded up to its newline.
    TooLong,
    Eof,
}

/// Read one line into `buf` without buffering more than `max` bytes of it.
///
/// An over-long line is consumed and dropped so the connection stays usable
/// for the next one.
pub async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *reader).take(max as u64 + 1).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.len() <= max {
        return Ok(LineRead::Line);
    }

    let mut ended = buf.last() == Some(&b'\n');
    while !ended {
        buf.clear();
        let n = (&mut *reader).take(max as u64).read_until(b'\n', buf).await?;
        ended = n == 0 || buf.last() == Some(&b'\n');
    }
    buf.clear();
    Ok(LineRead::TooLong)
}
