//! Source description packets, RFC 3550 §6.5. The core ignores their
//! content; the body is kept opaque so compound parsing can continue.

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescription {
    pub raw: Bytes,
}
