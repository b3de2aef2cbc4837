//! Incremental delimiter splitting for byte streams
//!
//! [`DelimitingBuffer`] accepts arbitrarily sized chunks (as they come off a
//! pipe) and yields the records between delimiters, holding back whatever
//! trails the last delimiter until more data arrives.
//!
//! Closing is signalled by feeding an empty slice: the unterminated remainder
//! comes back as [`Chunk::Incomplete`] and the buffer rejects further input.

use crate::error::{Error, Result};

/// A record produced by [`DelimitingBuffer::feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Bytes terminated by a delimiter
    Complete(Vec<u8>),
    /// Bytes flushed without a delimiter (on close, or when `max_size` is hit)
    Incomplete(Vec<u8>),
}

impl Chunk {
    /// The chunk's bytes, regardless of completeness.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Chunk::Complete(b) | Chunk::Incomplete(b) => b,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Chunk::Complete(_))
    }
}

/// Splits a byte stream on one or more delimiters.
///
/// Among several delimiters the earliest match wins, and on equal start the
/// longest one. A delimiter that is a prefix of another (e.g. `\r` and
/// `\r\n`) is not disambiguated across feed boundaries.
#[derive(Debug)]
pub struct DelimitingBuffer {
    delimiters: Vec<Vec<u8>>,
    keep_ends: bool,
    max_size: Option<usize>,
    /// `None` once closed
    buf: Option<Vec<u8>>,
    /// Offset into `buf` before which no delimiter can start
    scanned: usize,
}

impl Default for DelimitingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DelimitingBuffer {
    pub const DEFAULT_DELIMITER: &'static [u8] = b"\n";

    /// A buffer splitting on `\n`, dropping delimiters, unbounded.
    pub fn new() -> Self {
        Self {
            delimiters: vec![Self::DEFAULT_DELIMITER.to_vec()],
            keep_ends: false,
            max_size: None,
            buf: Some(Vec::new()),
            scanned: 0,
        }
    }

    /// A buffer splitting on the given delimiters.
    ///
    /// Fails if the set is empty or contains an empty delimiter.
    pub fn with_delimiters<I, D>(delimiters: I) -> Result<Self>
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u8]>,
    {
        let mut delims: Vec<Vec<u8>> = Vec::new();
        for d in delimiters {
            let d = d.as_ref();
            if d.is_empty() {
                return Err(Error::Config("delimiter must not be empty".to_string()));
            }
            if !delims.iter().any(|e| e == d) {
                delims.push(d.to_vec());
            }
        }
        if delims.is_empty() {
            return Err(Error::Config("at least one delimiter is required".to_string()));
        }

        Ok(Self {
            delimiters: delims,
            ..Self::new()
        })
    }

    /// Include the delimiter at the end of each complete chunk.
    pub fn keep_ends(mut self, keep_ends: bool) -> Self {
        self.keep_ends = keep_ends;
        self
    }

    /// Flush unterminated data as [`Chunk::Incomplete`] once `max_size` bytes are buffered.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size.max(1));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.buf.is_none()
    }

    /// Bytes buffered but not yet yielded.
    pub fn peek(&self) -> Result<&[u8]> {
        self.buf.as_deref().ok_or(Error::BufferClosed)
    }

    pub fn len(&self) -> Result<usize> {
        self.peek().map(<[u8]>::len)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|l| l == 0)
    }

    fn longest_delimiter(&self) -> usize {
        self.delimiters.iter().map(Vec::len).max().unwrap_or(1)
    }

    /// Earliest delimiter at or after `from`; ties go to the longest.
    ///
    /// Scans each byte once, so the search never runs past the first match.
    fn find_delimiter(&self, data: &[u8], from: usize) -> Option<(usize, usize)> {
        if let [d] = self.delimiters.as_slice() {
            return find_subslice(&data[from..], d).map(|p| (p + from, d.len()));
        }

        (from..data.len()).find_map(|pos| {
            let rest = &data[pos..];
            self.delimiters
                .iter()
                .filter(|d| rest.starts_with(d))
                .map(Vec::len)
                .max()
                .map(|len| (pos, len))
        })
    }

    /// Feed a chunk of bytes, returning every record it completes.
    ///
    /// An empty `data` closes the buffer.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Chunk>> {
        let mut buf = self.buf.take().ok_or(Error::BufferClosed)?;
        let mut out = Vec::new();

        if data.is_empty() {
            if !buf.is_empty() {
                out.push(Chunk::Incomplete(buf));
            }
            return Ok(out);
        }

        buf.extend_from_slice(data);

        let mut start = 0;
        let mut from = self.scanned;
        while let Some((pos, len)) = self.find_delimiter(&buf, from) {
            let end = if self.keep_ends { pos + len } else { pos };
            out.push(Chunk::Complete(buf[start..end].to_vec()));
            start = pos + len;
            from = start;
        }
        buf.drain(..start);

        if let Some(max) = self.max_size {
            while buf.len() >= max {
                out.push(Chunk::Incomplete(buf.drain(..max).collect()));
            }
        }

        // A multi-byte delimiter may straddle this feed and the next.
        self.scanned = buf.len().saturating_sub(self.longest_delimiter() - 1);
        self.buf = Some(buf);
        Ok(out)
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() == 1 {
        return haystack.iter().position(|&b| b == needle[0]);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
