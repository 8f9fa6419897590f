//! Edge pull configuration: the `origin` directive and timeouts.

use serde::Deserialize;
use shared::error::{Error, Result};
use std::time::Duration;

pub const DEFAULT_RTMP_PORT: u16 = 1935;
pub const DEFAULT_FLV_PORT: u16 = 8080;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamProtocol {
    #[default]
    Rtmp,
    Flv,
}

impl UpstreamProtocol {
    pub fn default_port(&self) -> u16 {
        match self {
            UpstreamProtocol::Rtmp => DEFAULT_RTMP_PORT,
            UpstreamProtocol::Flv => DEFAULT_FLV_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub host: String,
    pub port: u16,
}

/// Parse one `host[:port]` entry.
pub fn parse_origin(entry: &str, default_port: u16) -> Result<Origin> {
    let entry = entry.trim();
    if entry.is_empty() {
        return Err(Error::Other("empty origin entry".into()));
    }
    match entry.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::Other(format!("bad origin port in {entry}")))?;
            Ok(Origin {
                host: host.to_string(),
                port,
            })
        }
        None => Ok(Origin {
            host: entry.to_string(),
            port: default_port,
        }),
    }
}

fn default_stream_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    /// `host[:port]` entries the round-robin walks.
    pub origin: Vec<String>,
    #[serde(default)]
    pub protocol: UpstreamProtocol,
    #[serde(default = "default_stream_timeout_ms")]
    pub stream_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl EdgeConfig {
    pub fn origins(&self) -> Result<Vec<Origin>> {
        self.origin
            .iter()
            .map(|e| parse_origin(e, self.protocol.default_port()))
            .collect()
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origin_defaults() {
        let origin = parse_origin("origin.example.com", DEFAULT_RTMP_PORT).unwrap();
        assert_eq!(origin.host, "origin.example.com");
        assert_eq!(origin.port, 1935);

        let origin = parse_origin("10.0.0.2:19350", DEFAULT_RTMP_PORT).unwrap();
        assert_eq!(origin.port, 19350);

        assert!(parse_origin("", DEFAULT_RTMP_PORT).is_err());
        assert!(parse_origin("host:notaport", DEFAULT_RTMP_PORT).is_err());
    }

    #[test]
    fn test_config_origins_use_protocol_port() {
        let config = EdgeConfig {
            origin: vec!["a".into(), "b:9000".into()],
            protocol: UpstreamProtocol::Flv,
            stream_timeout_ms: default_stream_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        };
        let origins = config.origins().unwrap();
        assert_eq!(origins[0].port, 8080);
        assert_eq!(origins[1].port, 9000);
    }
}
