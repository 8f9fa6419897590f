#![warn(rust_2018_idioms)]

pub mod amf;
pub mod config;
pub mod flv_stream;
pub mod forwarder;
pub mod http;
pub mod ingester;
pub mod lb;
pub mod rtmp;
pub mod upstream;

pub use config::{EdgeConfig, Origin, UpstreamProtocol};
pub use ingester::{EdgeIngester, EdgeState, PlayEdge};
pub use lb::RoundRobinLb;
