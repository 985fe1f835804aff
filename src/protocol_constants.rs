//! Byte-level constants for the RESP wire grammar and the RDB opcode set.

pub const CRLF: &[u8] = b"\r\n";

pub const SIMPLE_STRING_PREFIX: u8 = b'+';
pub const SIMPLE_ERROR_PREFIX: u8 = b'-';
pub const INTEGER_PREFIX: u8 = b':';
pub const BULK_STRING_PREFIX: u8 = b'$';
pub const ARRAY_PREFIX: u8 = b'*';

// RESP3 prefixes the decoder recognizes so a RESP3-speaking client never desyncs
// the parser, even though the server only ever emits RESP2 (plus a push-shaped
// array for subscriber-mode PING).
pub const NULL_PREFIX: u8 = b'_';
pub const BOOLEAN_PREFIX: u8 = b'#';
pub const DOUBLE_PREFIX: u8 = b',';
pub const BIG_NUMBER_PREFIX: u8 = b'(';
pub const BULK_ERROR_PREFIX: u8 = b'!';
pub const VERBATIM_STRING_PREFIX: u8 = b'=';
pub const MAP_PREFIX: u8 = b'%';
pub const SET_PREFIX: u8 = b'~';
pub const PUSH_PREFIX: u8 = b'>';

// RDB opcodes, per the RDB file format.
pub const OPCODE_AUX: u8 = 0xFA;
pub const OPCODE_SELECT_DB: u8 = 0xFE;
pub const OPCODE_RESIZE_DB: u8 = 0xFB;
pub const OPCODE_EXPIRE_MS: u8 = 0xFC;
pub const OPCODE_EXPIRE_SEC: u8 = 0xFD;
pub const OPCODE_EOF: u8 = 0xFF;
pub const VALUE_TYPE_STRING: u8 = 0x00;

pub const RDB_MAGIC: &[u8] = b"REDIS";

/// The canonical empty RDB payload used to bootstrap FULLRESYNC, base64-encoded
/// in the original implementation this spec was distilled from. Decoded once
/// at startup; see `replication::master::empty_rdb`.
pub const EMPTY_RDB_BASE64: &str =
    "UkVESVMwMDEx+glyZWRpcy12ZXIFNy4yLjD6CnJlZGlzLWJpdHPAQPoFY3RpbWXCbQi8ZfoIdXNlZC1tZW3CsMQQAPoIYW9mLWJhc2XAAP/wbjv+wP9aog==";

// Write commands that must be propagated to replicas and counted against the
// replication offset.
pub const WRITE_COMMANDS: &[&str] = &["SET", "XADD", "RPUSH", "LPUSH", "LPOP", "INCR"];

// Commands allowed while a connection is in subscriber mode.
pub const SUBSCRIBER_ALLOWED: &[&str] = &[
    "SUBSCRIBE",
    "UNSUBSCRIBE",
    "PSUBSCRIBE",
    "PUNSUBSCRIBE",
    "PING",
    "QUIT",
    "RESET",
];

pub const DEFAULT_PORT: u16 = 6379;
