//! Reader for the binary PPM records the decoder writes to its image pipe:
//! `P6\n<cols> <rows>\n255\n` followed by `cols * rows * 3` RGB bytes.

use std::io::{self, BufRead, Read};

use tracing::{debug, warn};

use super::frame::{sample_len, swap_red_blue, ChannelOrder, PixelBuffer};
use crate::error::{ExtractError, Result};

pub const MAGIC: &str = "P6";
pub const MAX_SAMPLE_VALUE: &str = "255";

/// Largest buffer reserved before any sample bytes have arrived. Bigger
/// records grow as data is read, so a lying header cannot force a huge
/// allocation.
const MAX_UPFRONT_RESERVATION: usize = 64 << 20;

/// Header of one record, read up to (not including) the sample bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    width: u32,
    height: u32,
    /// Byte length of the samples that follow.
    len: usize,
}

/// Read one record and return it in BGR order, or `None` at end of stream.
///
/// A stream that closes at a record boundary, or mid-record before the
/// dimensions or samples are complete, ends cleanly. Header lines that are
/// present but wrong are errors.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<PixelBuffer>> {
    let Some(header) = read_header(reader)? else {
        return Ok(None);
    };

    let mut data = Vec::with_capacity(header.len.min(MAX_UPFRONT_RESERVATION));
    reader.take(header.len as u64).read_to_end(&mut data)?;
    if data.len() < header.len {
        warn!(
            width = header.width,
            height = header.height,
            read = data.len(),
            expected = header.len,
            "pixel stream ended mid-record, treating as end of stream"
        );
        return Ok(None);
    }

    swap_red_blue(&mut data);
    debug!(width = header.width, height = header.height, "read pixel record");
    Ok(PixelBuffer::from_raw(header.width, header.height, data, ChannelOrder::Bgr))
}

/// Consume one record without keeping its samples. Returns `false` at end of
/// stream, with the same truncation rules as [`read_frame`].
pub fn skip_frame<R: BufRead>(reader: &mut R) -> Result<bool> {
    let Some(header) = read_header(reader)? else {
        return Ok(false);
    };

    let expected = header.len as u64;
    let skipped = io::copy(&mut reader.take(expected), &mut io::sink())?;
    if skipped < expected {
        warn!(
            skipped,
            expected, "pixel stream ended mid-record while skipping"
        );
        return Ok(false);
    }
    Ok(true)
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<Option<Header>> {
    let mut line = Vec::new();

    if !read_line(reader, &mut line)? {
        return Ok(None);
    }
    if line != MAGIC.as_bytes() {
        return Err(ExtractError::MalformedFrame(format!(
            "expected magic {MAGIC:?}, got {:?}",
            String::from_utf8_lossy(&line)
        )));
    }

    read_line(reader, &mut line)?;
    let Some((width, height)) = parse_dimensions(&line) else {
        warn!(
            line = %String::from_utf8_lossy(&line),
            "unreadable dimensions line, treating as end of stream"
        );
        return Ok(None);
    };
    if width == 0 || height == 0 {
        return Err(ExtractError::MalformedFrame(format!(
            "zero-sized record {width}x{height}"
        )));
    }

    let Some(len) = sample_len(width, height) else {
        return Err(ExtractError::MalformedFrame(format!(
            "record {width}x{height} is too large"
        )));
    };

    if !read_line(reader, &mut line)? {
        warn!(
            width,
            height,
            "pixel stream ended before the max sample value, treating as end of stream"
        );
        return Ok(None);
    }
    if line != MAX_SAMPLE_VALUE.as_bytes() {
        return Err(ExtractError::MalformedFrame(format!(
            "expected max sample value {MAX_SAMPLE_VALUE}, got {:?}",
            String::from_utf8_lossy(&line)
        )));
    }

    Ok(Some(Header { width, height, len }))
}

/// Read a `\n`-terminated line into `line` without its terminator. Returns
/// `false` if the stream was already at end of input.
fn read_line<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<bool> {
    line.clear();
    if reader.read_until(b'\n', line)? == 0 {
        return Ok(false);
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(true)
}

fn parse_dimensions(line: &[u8]) -> Option<(u32, u32)> {
    let line = std::str::from_utf8(line).ok()?;
    let mut parts = line.split_ascii_whitespace();
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    Some((width, height))
}
