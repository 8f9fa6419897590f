//! BYE packets, RFC 3550 §6.6. Parsed for the leaving SSRCs, otherwise
//! ignored by the core.

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Goodbye {
    pub sources: Vec<u32>,
    pub reason: Bytes,
}
