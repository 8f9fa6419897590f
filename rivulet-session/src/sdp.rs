//! Minimal SDP subset for WHIP/WHEP-style negotiation: session lines, media
//! sections and the attributes the session cares about (ICE credentials,
//! rtcp-fb capabilities, extmap ids, SSRCs).
//!
//! Attribute order is preserved verbatim, so `encode(parse(s)) == s` for
//! well-formed input with canonical ordering.

use shared::error::{Error, Result};

/// URI negotiating the transport-wide sequence-number extension.
pub const EXTMAP_TWCC_URI: &str =
    "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaDesc {
    /// "audio" or "video".
    pub media: String,
    pub port: u16,
    pub proto: String,
    pub fmts: Vec<String>,
    /// `c=` line when present.
    pub connection: Option<String>,
    /// Attribute lines without the `a=` prefix, in wire order.
    pub attributes: Vec<String>,
}

impl MediaDesc {
    fn attr_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = format!("{name}:");
        self.attributes.iter().filter_map(move |a| {
            if let Some(v) = a.strip_prefix(&prefix) {
                Some(v)
            } else if a == name {
                Some("")
            } else {
                None
            }
        })
    }

    pub fn ice_ufrag(&self) -> Option<&str> {
        self.attr_values("ice-ufrag").next()
    }

    pub fn ice_pwd(&self) -> Option<&str> {
        self.attr_values("ice-pwd").next()
    }

    /// Extension id mapped to the transport-wide-cc URI, when negotiated.
    pub fn twcc_extension_id(&self) -> Option<u8> {
        for v in self.attr_values("extmap") {
            let mut parts = v.split_whitespace();
            let id = parts.next()?.split('/').next()?.parse::<u8>().ok()?;
            if parts.next() == Some(EXTMAP_TWCC_URI) {
                return Some(id);
            }
        }
        None
    }

    /// Whether any payload negotiates `nack` feedback.
    pub fn supports_nack(&self) -> bool {
        self.attr_values("rtcp-fb")
            .any(|v| v.split_whitespace().nth(1) == Some("nack"))
    }

    pub fn supports_pli(&self) -> bool {
        self.attr_values("rtcp-fb").any(|v| {
            let mut parts = v.split_whitespace().skip(1);
            parts.next() == Some("nack") && parts.next() == Some("pli")
        })
    }

    pub fn supports_twcc(&self) -> bool {
        self.attr_values("rtcp-fb")
            .any(|v| v.split_whitespace().nth(1) == Some("transport-cc"))
    }

    /// Distinct SSRCs from `a=ssrc:` lines, in first-seen order.
    pub fn ssrcs(&self) -> Vec<u32> {
        let mut out: Vec<u32> = Vec::new();
        for v in self.attr_values("ssrc") {
            if let Some(ssrc) = v
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<u32>().ok())
            {
                if !out.contains(&ssrc) {
                    out.push(ssrc);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sdp {
    pub version: String,
    pub origin: String,
    pub session_name: String,
    pub timing: String,
    /// Session-level attributes, in wire order.
    pub attributes: Vec<String>,
    pub media: Vec<MediaDesc>,
}

impl Sdp {
    pub fn parse(input: &str) -> Result<Sdp> {
        let mut sdp = Sdp::default();
        let mut current: Option<MediaDesc> = None;

        for line in input.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::SdpDecode(format!("line without '=': {line}")))?;
            match key {
                "v" => sdp.version = value.to_string(),
                "o" => sdp.origin = value.to_string(),
                "s" => sdp.session_name = value.to_string(),
                "t" => sdp.timing = value.to_string(),
                "c" => {
                    if let Some(m) = current.as_mut() {
                        m.connection = Some(value.to_string());
                    }
                }
                "m" => {
                    if let Some(m) = current.take() {
                        sdp.media.push(m);
                    }
                    let mut parts = value.split_whitespace();
                    let media = parts
                        .next()
                        .ok_or_else(|| Error::SdpDecode("empty m= line".into()))?
                        .to_string();
                    let port = parts
                        .next()
                        .and_then(|p| p.parse().ok())
                        .ok_or_else(|| Error::SdpDecode("bad m= port".into()))?;
                    let proto = parts
                        .next()
                        .ok_or_else(|| Error::SdpDecode("missing m= proto".into()))?
                        .to_string();
                    current = Some(MediaDesc {
                        media,
                        port,
                        proto,
                        fmts: parts.map(str::to_string).collect(),
                        connection: None,
                        attributes: Vec::new(),
                    });
                }
                "a" => match current.as_mut() {
                    Some(m) => m.attributes.push(value.to_string()),
                    None => sdp.attributes.push(value.to_string()),
                },
                // other line types are preserved nowhere; the subset the
                // server negotiates never carries them
                _ => {}
            }
        }
        if let Some(m) = current.take() {
            sdp.media.push(m);
        }
        if sdp.version.is_empty() {
            return Err(Error::SdpDecode("missing v= line".into()));
        }
        Ok(sdp)
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("v={}\r\n", self.version));
        if !self.origin.is_empty() {
            out.push_str(&format!("o={}\r\n", self.origin));
        }
        if !self.session_name.is_empty() {
            out.push_str(&format!("s={}\r\n", self.session_name));
        }
        if !self.timing.is_empty() {
            out.push_str(&format!("t={}\r\n", self.timing));
        }
        for attr in &self.attributes {
            out.push_str(&format!("a={attr}\r\n"));
        }
        for m in &self.media {
            out.push_str(&format!(
                "m={} {} {} {}\r\n",
                m.media,
                m.port,
                m.proto,
                m.fmts.join(" ")
            ));
            if let Some(c) = &m.connection {
                out.push_str(&format!("c={c}\r\n"));
            }
            for attr in &m.attributes {
                out.push_str(&format!("a={attr}\r\n"));
            }
        }
        out
    }

    /// ICE ufrag from the first media section carrying one, falling back to
    /// session level.
    pub fn ice_ufrag(&self) -> Option<&str> {
        self.media.iter().find_map(|m| m.ice_ufrag()).or_else(|| {
            self.attributes
                .iter()
                .find_map(|a| a.strip_prefix("ice-ufrag:"))
        })
    }

    pub fn ice_pwd(&self) -> Option<&str> {
        self.media.iter().find_map(|m| m.ice_pwd()).or_else(|| {
            self.attributes
                .iter()
                .find_map(|a| a.strip_prefix("ice-pwd:"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 4962303333179871722 1 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=ice-ufrag:XvKj\r\n\
a=ice-pwd:b8b1dbe627e8cd3f8b7dd9ddba7e9b4e\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=rtcp-fb:111 transport-cc\r\n\
a=extmap:3 http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01\r\n\
a=ssrc:3233846890 cname:o/i14u9pJrxRKAsu\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
c=IN IP4 0.0.0.0\r\n\
a=ice-ufrag:XvKj\r\n\
a=ice-pwd:b8b1dbe627e8cd3f8b7dd9ddba7e9b4e\r\n\
a=rtpmap:96 H264/90000\r\n\
a=rtcp-fb:96 nack\r\n\
a=rtcp-fb:96 nack pli\r\n\
a=rtcp-fb:96 transport-cc\r\n\
a=extmap:3 http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01\r\n\
a=ssrc:1063679667 cname:o/i14u9pJrxRKAsu\r\n";

    #[test]
    fn test_parse_fields() {
        let sdp = Sdp::parse(OFFER).unwrap();
        assert_eq!(sdp.version, "0");
        assert_eq!(sdp.media.len(), 2);
        assert_eq!(sdp.ice_ufrag(), Some("XvKj"));

        let video = &sdp.media[1];
        assert_eq!(video.media, "video");
        assert_eq!(video.fmts, vec!["96"]);
        assert!(video.supports_nack());
        assert!(video.supports_pli());
        assert!(video.supports_twcc());
        assert_eq!(video.twcc_extension_id(), Some(3));
        assert_eq!(video.ssrcs(), vec![1063679667]);

        let audio = &sdp.media[0];
        assert!(!audio.supports_nack());
        assert!(audio.supports_twcc());
        assert_eq!(audio.ssrcs(), vec![3233846890]);
    }

    #[test]
    fn test_encode_parse_idempotent() {
        let sdp = Sdp::parse(OFFER).unwrap();
        let encoded = sdp.encode();
        assert_eq!(encoded, OFFER);
        let reparsed = Sdp::parse(&encoded).unwrap();
        assert_eq!(reparsed, sdp);
    }

    #[test]
    fn test_missing_version_fails() {
        assert!(Sdp::parse("s=-\r\n").is_err());
    }

    #[test]
    fn test_malformed_line_fails() {
        assert!(Sdp::parse("v=0\r\nbogus\r\n").is_err());
    }
}
