//! Seams toward the transport layer. DTLS/SRTP key exchange and the socket
//! are external collaborators; the session only sees these traits.

use bytes::Bytes;
use shared::error::Result;

/// SRTP protect/unprotect provided by the DTLS-SRTP stack.
pub trait SrtpCipher {
    fn unprotect_rtp(&mut self, cipher: &[u8]) -> Result<Bytes>;
    fn unprotect_rtcp(&mut self, cipher: &[u8]) -> Result<Bytes>;
    fn protect_rtp(&mut self, plain: &[u8]) -> Result<Bytes>;
    fn protect_rtcp(&mut self, plain: &[u8]) -> Result<Bytes>;
}

/// Pass-through cipher for tests and loopback wiring.
#[derive(Default)]
pub struct PlainCipher;

impl SrtpCipher for PlainCipher {
    fn unprotect_rtp(&mut self, cipher: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(cipher))
    }

    fn unprotect_rtcp(&mut self, cipher: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(cipher))
    }

    fn protect_rtp(&mut self, plain: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(plain))
    }

    fn protect_rtcp(&mut self, plain: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(plain))
    }
}
