//! chunkmesh wire format: the peer-to-peer chunk protocol.
//!
//! Every exchange is one TCP connection, used once, then closed:
//!
//!   [ op code: 10 bytes ][ chunk hash: 64 bytes ]? [ payload ... ]
//!
//! The op code is ASCII, left-aligned and space padded. `upload` and
//! `download` carry the hex SHA-256 of the chunk; `ping` carries nothing.
//!
//! Payload length is implicit in the connection lifetime. An uploader
//! half-closes its write side after the last chunk byte; a download reply
//! ends when the listener closes. Changing any size or sentinel here breaks
//! interop with existing peers.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::hash::{ContentHash, HashParseError, HEX_LEN};

// ── Sizes and sentinels ──────────────────────────────────────────────────────

/// Length of the op code field.
pub const OP_LEN: usize = 10;

/// Length of the chunk hash field (hex SHA-256, no length prefix).
pub const HASH_FIELD_LEN: usize = HEX_LEN;

/// Reply to `ping`.
pub const PONG: &[u8; OP_LEN] = b"pong      ";

/// Reply to `upload` once the chunk is durably stored.
/// Peers running without acknowledgements simply close instead.
pub const STORED: &[u8; OP_LEN] = b"ok        ";

/// Reply to `download` for a hash the listener does not hold. 9 bytes, unpadded.
pub const NOT_FOUND: &[u8] = b"not_found";

// ── Operations ───────────────────────────────────────────────────────────────

/// The closed set of operations a listener serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Ping,
    Upload,
    Download,
}

impl Op {
    pub const ALL: [Op; 3] = [Op::Ping, Op::Upload, Op::Download];

    /// Canonical lowercase code.
    pub fn code(self) -> &'static str {
        match self {
            Op::Ping => "ping",
            Op::Upload => "upload",
            Op::Download => "download",
        }
    }

    /// Whether a hash field follows the op code.
    pub fn carries_hash(self) -> bool {
        !matches!(self, Op::Ping)
    }

    /// The 10-byte op code field.
    pub fn encode(self) -> [u8; OP_LEN] {
        pad_field(self.code().as_bytes())
    }

    /// Parse a received op code field. Case-insensitive, padding trimmed.
    pub fn parse(field: &[u8]) -> Result<Self, WireError> {
        let code = trim_field(field);
        Op::ALL
            .into_iter()
            .find(|op| code.eq_ignore_ascii_case(op.code().as_bytes()))
            .ok_or_else(|| WireError::UnknownOp(String::from_utf8_lossy(code).into_owned()))
    }
}

impl TryFrom<&[u8]> for Op {
    type Error = WireError;

    fn try_from(field: &[u8]) -> Result<Self, Self::Error> {
        Op::parse(field)
    }
}

// ── Request header ───────────────────────────────────────────────────────────

/// Full request header for `upload` and `download`.
///
/// Wire size: 74 bytes. `ping` sends only the first 10.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RequestHeader {
    /// Space-padded ASCII op code.
    pub op: [u8; OP_LEN],
    /// Hex SHA-256 of the chunk being pushed or requested.
    pub hash: [u8; HASH_FIELD_LEN],
}

assert_eq_size!(RequestHeader, [u8; 74]);

impl RequestHeader {
    pub fn new(op: Op, hash: &ContentHash) -> Self {
        Self {
            op: op.encode(),
            hash: encode_hash_field(hash),
        }
    }

    pub fn op(&self) -> Result<Op, WireError> {
        Op::parse(&self.op)
    }

    pub fn hash(&self) -> Result<ContentHash, WireError> {
        decode_hash_field(&self.hash)
    }
}

// ── Field helpers ────────────────────────────────────────────────────────────

/// Left-align `value` in an `N`-byte space-padded field. Longer input is truncated.
pub fn pad_field<const N: usize>(value: &[u8]) -> [u8; N] {
    let mut field = [b' '; N];
    let n = value.len().min(N);
    field[..n].copy_from_slice(&value[..n]);
    field
}

/// Strip space, NUL and line-ending padding from both ends of a field.
pub fn trim_field(field: &[u8]) -> &[u8] {
    let pad = |b: &u8| matches!(b, b' ' | b'\0' | b'\r' | b'\n' | b'\t');
    let start = field.iter().position(|b| !pad(b)).unwrap_or(field.len());
    let end = field.iter().rposition(|b| !pad(b)).map_or(start, |i| i + 1);
    &field[start..end]
}

pub fn encode_hash_field(hash: &ContentHash) -> [u8; HASH_FIELD_LEN] {
    pad_field(hash.to_hex().as_bytes())
}

pub fn decode_hash_field(field: &[u8]) -> Result<ContentHash, WireError> {
    let text = std::str::from_utf8(trim_field(field)).map_err(|_| WireError::NonAscii)?;
    Ok(text.parse()?)
}

/// `true` if a reply is the `pong` token (padding ignored).
pub fn is_pong(reply: &[u8]) -> bool {
    trim_field(reply) == trim_field(PONG)
}

/// `true` if a reply is the upload acknowledgement (padding ignored).
pub fn is_stored(reply: &[u8]) -> bool {
    trim_field(reply) == trim_field(STORED)
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown op code: {0:?}")]
    UnknownOp(String),

    #[error("short header: expected {expected} bytes, got {got}")]
    ShortHeader { expected: usize, got: usize },

    #[error("hash field is not ASCII")]
    NonAscii,

    #[error("bad hash field: {0}")]
    BadHash(#[from] HashParseError),
}

// ── Tests ────────────────────────────────────────────────────────────────────
