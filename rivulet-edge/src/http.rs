//! Client-side HTTP/1.1 plumbing for the FLV pull: request write, response
//! head parse, identity and chunked bodies.

use shared::error::{Error, Result};
use std::collections::HashMap;
use std::io::{Read, Write};

/// Write a minimal GET request.
pub fn write_get(w: &mut impl Write, host: &str, path: &str) -> Result<()> {
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: rivulet-edge\r\nAccept: */*\r\n\r\n"
    );
    w.write_all(request.as_bytes())?;
    w.flush()?;
    Ok(())
}

#[derive(Debug)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: HashMap<String, String>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }
}

fn read_line(r: &mut impl Read) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        r.read_exact(&mut byte)?;
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
        if line.len() > 8192 {
            return Err(Error::Http("header line too long".into()));
        }
    }
    Ok(String::from_utf8(line)?)
}

/// Read the status line and headers.
pub fn read_response_head(r: &mut impl Read) -> Result<ResponseHead> {
    let status_line = read_line(r)?;
    let mut parts = status_line.split_whitespace();
    let version = parts
        .next()
        .ok_or_else(|| Error::Http("empty status line".into()))?;
    if !version.starts_with("HTTP/1.") {
        return Err(Error::Http(format!("bad version {version}")));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| Error::Http("bad status code".into()))?;

    let mut headers = HashMap::new();
    loop {
        let line = read_line(r)?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    Ok(ResponseHead { status, headers })
}

/// Body reader handling identity and chunked transfer encodings.
pub struct BodyReader<R: Read> {
    inner: R,
    chunked: bool,
    /// Bytes left in the current chunk; meaningless for identity.
    chunk_left: usize,
    done: bool,
}

impl<R: Read> BodyReader<R> {
    pub fn new(inner: R, chunked: bool) -> Self {
        BodyReader {
            inner,
            chunked,
            chunk_left: 0,
            done: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn next_chunk(&mut self) -> Result<()> {
        let line = read_line(&mut self.inner)?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| Error::Http(format!("bad chunk size {size_str}")))?;
        if size == 0 {
            // trailing CRLF after the last chunk
            let _ = read_line(&mut self.inner);
            self.done = true;
        }
        self.chunk_left = size;
        Ok(())
    }
}

impl<R: Read> Read for BodyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if !self.chunked {
            return self.inner.read(buf);
        }
        if self.done {
            return Ok(0);
        }
        if self.chunk_left == 0 {
            self.next_chunk()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            if self.done {
                return Ok(0);
            }
        }
        let take = buf.len().min(self.chunk_left);
        let n = self.inner.read(&mut buf[..take])?;
        self.chunk_left -= n;
        if self.chunk_left == 0 {
            // chunk trailer CRLF
            let mut crlf = [0u8; 2];
            self.inner.read_exact(&mut crlf)?;
        }
        Ok(n)
    }
}
