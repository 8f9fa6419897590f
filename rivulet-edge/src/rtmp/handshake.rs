//! Plain RTMP handshake (no digest), client side.

use shared::error::{Error, Result};
use std::io::{Read, Write};

pub const RTMP_VERSION: u8 = 3;
pub const HANDSHAKE_SIZE: usize = 1536;

/// Perform C0/C1 → S0/S1/S2 → C2 over one transport.
pub fn client_handshake<T: Read + Write>(io: &mut T) -> Result<()> {
    let mut c0c1 = [0u8; 1 + HANDSHAKE_SIZE];
    c0c1[0] = RTMP_VERSION;
    // time, zero, then random filler
    for b in c0c1[9..].iter_mut() {
        *b = rand::random();
    }
    io.write_all(&c0c1)?;
    io.flush()?;

    let mut s0 = [0u8; 1];
    io.read_exact(&mut s0)?;
    if s0[0] != RTMP_VERSION {
        return Err(Error::Protocol(format!("rtmp version {}", s0[0])));
    }

    let mut s1 = [0u8; HANDSHAKE_SIZE];
    io.read_exact(&mut s1)?;
    let mut s2 = [0u8; HANDSHAKE_SIZE];
    io.read_exact(&mut s2)?;

    // C2 echoes S1
    io.write_all(&s1)?;
    io.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pipe {
        input: std::io::Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_client_handshake() {
        let mut server_bytes = vec![RTMP_VERSION];
        server_bytes.extend(std::iter::repeat(0x5A).take(HANDSHAKE_SIZE)); // S1
        server_bytes.extend(std::iter::repeat(0xA5).take(HANDSHAKE_SIZE)); // S2

        let mut pipe = Pipe {
            input: std::io::Cursor::new(server_bytes),
            output: Vec::new(),
        };
        client_handshake(&mut pipe).unwrap();

        // C0 + C1 + C2
        assert_eq!(pipe.output.len(), 1 + HANDSHAKE_SIZE * 2);
        assert_eq!(pipe.output[0], RTMP_VERSION);
        // C2 echoes S1
        assert!(pipe.output[1 + HANDSHAKE_SIZE..]
            .iter()
            .all(|&b| b == 0x5A));
    }

    #[test]
    fn test_bad_server_version() {
        let mut server_bytes = vec![0x06];
        server_bytes.extend(std::iter::repeat(0).take(HANDSHAKE_SIZE * 2));
        let mut pipe = Pipe {
            input: std::io::Cursor::new(server_bytes),
            output: Vec::new(),
        };
        assert!(client_handshake(&mut pipe).is_err());
    }
}
