//! Wire primitives for the radio software's UDP telemetry.
//!
//! Every datagram starts with a 12-byte header:
//! - 4 bytes magic (`0xADBCCBDA`)
//! - 4 bytes schema number
//! - 4 bytes message type
//!
//! All integers are big-endian. Strings are a 4-byte byte count followed by
//! UTF-8 bytes; a count of `0xFFFFFFFF` marks the string as absent.

use crate::types::{Result, UltronError};

pub const MAGIC: u32 = 0xADBC_CBDA;

/// Schema number written on outbound datagrams.
pub const SCHEMA: u32 = 2;

pub const HEADER_LEN: usize = 12;

const ABSENT: u32 = 0xFFFF_FFFF;

/// Message type discriminants.
pub mod kind {
    pub const HEARTBEAT: u32 = 0;
    pub const STATUS: u32 = 1;
    pub const DECODE: u32 = 2;
    pub const REPLY: u32 = 4;
    pub const QSO_LOGGED: u32 = 5;
    pub const HALT_TX: u32 = 8;
    pub const LOGGED_ADIF: u32 = 12;
}

/// Parsed datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub schema: u32,
    pub kind: u32,
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Cursor over a received datagram. Every read is bounds-checked and
/// reports the offending offset on failure.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        WireReader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn malformed(&self, reason: &'static str) -> UltronError {
        UltronError::Malformed {
            offset: self.pos,
            reason,
        }
    }

    fn take(&mut self, n: usize, reason: &'static str) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.malformed(reason));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, reason: &'static str) -> Result<[u8; N]> {
        let bytes = self.take(N, reason)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read and validate the 12-byte header.
    pub fn header(&mut self) -> Result<Header> {
        if self.remaining() < HEADER_LEN {
            return Err(self.malformed("shorter than header"));
        }
        let magic = self.u32()?;
        if magic != MAGIC {
            return Err(UltronError::Malformed {
                offset: 0,
                reason: "bad magic",
            });
        }
        let schema = self.u32()?;
        let kind = self.u32()?;
        Ok(Header { schema, kind })
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>("truncated u8")?[0])
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array("truncated u32")?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array("truncated i32")?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array("truncated u64")?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.array("truncated f64")?))
    }

    /// Length-prefixed string; `None` when the length is the absent sentinel.
    pub fn opt_string(&mut self) -> Result<Option<String>> {
        let len = self.u32()?;
        if len == ABSENT {
            return Ok(None);
        }
        let bytes = self.take(len as usize, "string length exceeds datagram")?;
        Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Length-prefixed string; absent reads as empty.
    pub fn string(&mut self) -> Result<String> {
        Ok(self.opt_string()?.unwrap_or_default())
    }
}

/// Peek at a datagram's header without decoding the body.
pub fn parse_header(buf: &[u8]) -> Result<Header> {
    WireReader::new(buf).header()
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Builder for outbound datagrams. The header is written on construction.
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new(kind: u32) -> Self {
        let mut w = WireWriter {
            buf: Vec::with_capacity(64),
        };
        w.u32(MAGIC).u32(SCHEMA).u32(kind);
        w
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(u8::from(v))
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn opt_string(&mut self, s: Option<&str>) -> &mut Self {
        match s {
            Some(s) => self.string(s),
            None => self.u32(ABSENT),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

// ---------------------------------------------------------------------------
// Hex dumps
// ---------------------------------------------------------------------------

/// Decode a hex dump of one datagram. Whitespace between bytes is ignored.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| Some((hex_digit(pair[0])? << 4) | hex_digit(pair[1])?))
        .collect()
}

/// Uppercase hex, no separators.
pub fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
