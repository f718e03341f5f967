//! Packet capture input
//!
//! Reads pcap/pcapng traces and decodes each frame into a [`CaptureRecord`]
//! with explicit IP, non-IP and malformed variants.

pub mod link;
pub mod reader;
pub mod record;

pub use link::{decode_frame, LinkType};
pub use reader::{CaptureReader, ReaderStats};
pub use record::{CaptureRecord, IpRecord, MalformedRecord, NonIpRecord, Ports, TransportProtocol};
