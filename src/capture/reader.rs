//! Capture file reader
//!
//! One-pass iterator over the packets of a pcap or pcapng file. Per-record
//! decode failures come out as [`CaptureRecord::Malformed`]; only a missing
//! or unrecognised source is an error, and it is reported by `open` before
//! anything is yielded.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use pcap_file::pcap::PcapReader;
use pcap_file::pcapng::{Block, PcapNgReader};
use pcap_file::PcapError;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::link::{decode_frame, LinkType};
use super::record::{CaptureRecord, MalformedRecord};
use crate::error::{IdsError, Result};

const PCAPNG_MAGIC: [u8; 4] = [0x0A, 0x0D, 0x0D, 0x0A];
const PCAP_MAGICS: [[u8; 4]; 4] = [
    [0xD4, 0xC3, 0xB2, 0xA1],
    [0xA1, 0xB2, 0xC3, 0xD4],
    [0x4D, 0x3C, 0xB2, 0xA1],
    [0xA1, 0xB2, 0x3C, 0x4D],
];

/// Counters for one pass over a capture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReaderStats {
    pub records: u64,
    pub ip: u64,
    pub non_ip: u64,
    pub malformed: u64,
}

impl ReaderStats {
    fn record(&mut self, record: &CaptureRecord) {
        self.records += 1;
        match record {
            CaptureRecord::Ip(_) => self.ip += 1,
            CaptureRecord::NonIp(_) => self.non_ip += 1,
            CaptureRecord::Malformed(_) => self.malformed += 1,
        }
    }
}

enum Source<R: BufRead> {
    /// Zero-byte file
    Empty,
    Pcap {
        reader: PcapReader<R>,
        link: LinkType,
    },
    PcapNg {
        reader: PcapNgReader<R>,
        links: Vec<LinkType>,
    },
}

/// Lazy, finite, non-restartable sequence of capture records
///
/// The underlying handle is owned by the reader and closed when the reader
/// is dropped, whether or not the pass ran to completion.
pub struct CaptureReader<R: BufRead = BufReader<File>> {
    source: Source<R>,
    origin: PathBuf,
    next_index: u64,
    finished: bool,
    stats: ReaderStats,
}

impl CaptureReader<BufReader<File>> {
    /// Open a capture file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| IdsError::source_unavailable(path, e))?;
        let reader = Self::with_origin(BufReader::new(file), path.to_path_buf())?;
        info!("Opened capture {}", path.display());
        Ok(reader)
    }
}

impl<R: BufRead> CaptureReader<R> {
    /// Read a capture from any buffered stream
    pub fn from_reader(reader: R) -> Result<Self> {
        Self::with_origin(reader, PathBuf::from("<stream>"))
    }

    fn with_origin(mut reader: R, origin: PathBuf) -> Result<Self> {
        let magic = {
            let buf = reader
                .fill_buf()
                .map_err(|e| IdsError::source_unavailable(&origin, e))?;
            if buf.is_empty() {
                None
            } else if buf.len() < 4 {
                return Err(IdsError::source_unavailable(&origin, "file too short for a capture header"));
            } else {
                Some([buf[0], buf[1], buf[2], buf[3]])
            }
        };

        let source = match magic {
            None => {
                warn!("Capture {} is empty", origin.display());
                Source::Empty
            }
            Some(m) if m == PCAPNG_MAGIC => {
                let reader = PcapNgReader::new(reader)
                    .map_err(|e| IdsError::source_unavailable(&origin, e))?;
                debug!("Reading {} as pcapng", origin.display());
                Source::PcapNg {
                    reader,
                    links: Vec::new(),
                }
            }
            Some(m) if PCAP_MAGICS.contains(&m) => {
                let reader = PcapReader::new(reader)
                    .map_err(|e| IdsError::source_unavailable(&origin, e))?;
                let link = LinkType::from(reader.header().datalink);
                debug!("Reading {} as pcap, link type {:?}", origin.display(), link);
                if let LinkType::Unsupported(code) = link {
                    warn!("Unsupported link type {} in {}, records will not be decoded", code, origin.display());
                }
                Source::Pcap { reader, link }
            }
            Some(_) => {
                return Err(IdsError::source_unavailable(&origin, "unrecognised capture format"));
            }
        };

        Ok(Self {
            source,
            origin,
            next_index: 0,
            finished: false,
            stats: ReaderStats::default(),
        })
    }

    /// Counters for the records yielded so far
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    fn next_pcapng(
        reader: &mut PcapNgReader<R>,
        links: &mut Vec<LinkType>,
        index: u64,
    ) -> Option<std::result::Result<CaptureRecord, PcapError>> {
        loop {
            let block = match reader.next_block()? {
                Ok(block) => block,
                Err(e) => return Some(Err(e)),
            };
            match block {
                Block::SectionHeader(_) => links.clear(),
                Block::InterfaceDescription(idb) => links.push(LinkType::from(idb.linktype)),
                Block::EnhancedPacket(epb) => {
                    let link = links
                        .get(epb.interface_id as usize)
                        .copied()
                        .unwrap_or(LinkType::Unsupported(u32::MAX));
                    return Some(Ok(decode_frame(link, index, epb.original_len, &epb.data)));
                }
                Block::SimplePacket(spb) => {
                    let link = links.first().copied().unwrap_or(LinkType::Unsupported(u32::MAX));
                    // Block data runs to the 32-bit boundary; drop the padding
                    let captured = (spb.original_len as usize).min(spb.data.len());
                    return Some(Ok(decode_frame(link, index, spb.original_len, &spb.data[..captured])));
                }
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for CaptureReader<R> {
    type Item = CaptureRecord;

    fn next(&mut self) -> Option<CaptureRecord> {
        if self.finished {
            return None;
        }

        let index = self.next_index;
        let next = match &mut self.source {
            Source::Empty => None,
            Source::Pcap { reader, link } => {
                let link = *link;
                reader
                    .next_packet()
                    .map(|res| res.map(|pkt| decode_frame(link, index, pkt.orig_len, &pkt.data)))
            }
            Source::PcapNg { reader, links } => Self::next_pcapng(reader, links, index),
        };

        let record = match next {
            None => {
                self.finished = true;
                debug!(
                    "Finished {}: {} records ({} ip, {} non-ip, {} malformed)",
                    self.origin.display(),
                    self.stats.records,
                    self.stats.ip,
                    self.stats.non_ip,
                    self.stats.malformed
                );
                return None;
            }
            Some(Ok(record)) => record,
            Some(Err(e)) => {
                // Framing is lost after a container error, so the pass ends here
                warn!("Capture {} ended early at record {}: {}", self.origin.display(), index, e);
                self.finished = true;
                CaptureRecord::Malformed(MalformedRecord {
                    index,
                    reason: e.to_string(),
                })
            }
        };

        self.next_index += 1;
        self.stats.record(&record);
        Some(record)
    }
}

impl<R: BufRead> Drop for CaptureReader<R> {
    fn drop(&mut self) {
        debug!("Closing capture {}", self.origin.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    use std::borrow::Cow;

    use etherparse::PacketBuilder;
    use pcap_file::pcap::{PcapPacket, PcapWriter};
    use pcap_file::pcapng::blocks::enhanced_packet::EnhancedPacketBlock;
    use pcap_file::pcapng::blocks::interface_description::InterfaceDescriptionBlock;
    use pcap_file::pcapng::blocks::simple_packet::SimplePacketBlock;
    use pcap_file::pcapng::PcapNgWriter;
    use pcap_file::DataLink;

    fn udp_frame(ttl: u8, payload_len: usize) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], ttl)
            .udp(5000, 9);
        let payload = vec![0u8; payload_len];
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, &payload).unwrap();
        frame
    }

    fn pcap_bytes(frames: &[Vec<u8>]) -> Vec<u8> {
        let mut writer = PcapWriter::new(Vec::new()).unwrap();
        for (i, frame) in frames.iter().enumerate() {
            let packet = PcapPacket::new(Duration::from_millis(i as u64), frame.len() as u32, frame);
            writer.write_packet(&packet).unwrap();
        }
        writer.into_writer()
    }

    #[test]
    fn test_reads_all_records() {
        let bytes = pcap_bytes(&[udp_frame(64, 10), udp_frame(32, 20), vec![0u8; 8]]);
        let mut reader = CaptureReader::from_reader(Cursor::new(bytes)).unwrap();
        let records: Vec<_> = reader.by_ref().collect();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].ttl(), Some(64));
        assert_eq!(records[1].ttl(), Some(32));
        assert!(records[2].is_malformed());
        assert_eq!(records[2].index(), 2);

        let stats = reader.stats();
        assert_eq!(stats.records, 3);
        assert_eq!(stats.ip, 2);
        assert_eq!(stats.malformed, 1);
    }

    #[test]
    fn test_empty_stream_yields_nothing() {
        let mut reader = CaptureReader::from_reader(Cursor::new(Vec::new())).unwrap();
        assert!(reader.next().is_none());
        assert_eq!(reader.stats().records, 0);
    }

    #[test]
    fn test_header_only_capture_yields_nothing() {
        let bytes = pcap_bytes(&[]);
        let mut reader = CaptureReader::from_reader(Cursor::new(bytes)).unwrap();
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_unrecognised_format_fails_fast() {
        let result = CaptureReader::from_reader(Cursor::new(b"not a capture file".to_vec()));
        assert!(matches!(result, Err(IdsError::SourceUnavailable { .. })));
    }

    #[test]
    fn test_missing_file_is_source_unavailable() {
        let result = CaptureReader::open("/nonexistent/dir/trace.pcap");
        match result {
            Err(IdsError::SourceUnavailable { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/dir/trace.pcap"));
            }
            _ => panic!("expected SourceUnavailable"),
        }
    }

    #[test]
    fn test_truncated_trailing_record_ends_pass() {
        let mut bytes = pcap_bytes(&[udp_frame(64, 10), udp_frame(64, 10)]);
        bytes.truncate(bytes.len() - 5);
        let reader = CaptureReader::from_reader(Cursor::new(bytes)).unwrap();
        let records: Vec<_> = reader.collect();

        assert_eq!(records.len(), 2);
        assert!(!records[0].is_malformed());
        assert!(records[1].is_malformed());
    }

    fn enhanced_packet(interface_id: u32, frame: &[u8]) -> EnhancedPacketBlock<'_> {
        EnhancedPacketBlock {
            interface_id,
            timestamp: Duration::from_millis(1),
            original_len: frame.len() as u32,
            data: Cow::Borrowed(frame),
            options: vec![],
        }
    }

    #[test]
    fn test_reads_pcapng() {
        let ethernet = udp_frame(32, 38);
        assert_eq!(ethernet.len(), 80);
        let builder = PacketBuilder::ipv4([10, 0, 0, 7], [10, 0, 0, 2], 5).tcp(1000, 80, 1, 512);
        let mut raw = Vec::with_capacity(builder.size(0));
        builder.write(&mut raw, &[]).unwrap();

        let mut writer = PcapNgWriter::new(Vec::new()).unwrap();
        writer
            .write_pcapng_block(InterfaceDescriptionBlock::new(DataLink::ETHERNET, 0xFFFF))
            .unwrap();
        writer
            .write_pcapng_block(InterfaceDescriptionBlock::new(DataLink::RAW, 0xFFFF))
            .unwrap();
        writer.write_pcapng_block(enhanced_packet(0, &ethernet)).unwrap();
        writer.write_pcapng_block(enhanced_packet(1, &raw)).unwrap();
        let bytes = writer.into_inner();

        let mut reader = CaptureReader::from_reader(Cursor::new(bytes)).unwrap();
        let records: Vec<_> = reader.by_ref().collect();

        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], CaptureRecord::Ip(_)));
        assert_eq!(records[0].length(), Some(80));
        assert_eq!(records[0].ttl(), Some(32));
        assert_eq!(records[0].dst_port(), Some(9));
        assert_eq!(records[1].index(), 1);
        assert_eq!(records[1].ttl(), Some(5));
        assert_eq!(records[1].src_addr(), Some("10.0.0.7".parse().unwrap()));
        assert_eq!(reader.stats().ip, 2);
    }

    #[test]
    fn test_reads_pcapng_simple_packets() {
        let frame = udp_frame(64, 11);
        assert_ne!(frame.len() % 4, 0);

        let mut writer = PcapNgWriter::new(Vec::new()).unwrap();
        writer
            .write_pcapng_block(InterfaceDescriptionBlock::new(DataLink::ETHERNET, 0xFFFF))
            .unwrap();
        writer
            .write_pcapng_block(SimplePacketBlock {
                original_len: frame.len() as u32,
                data: Cow::Borrowed(&frame),
            })
            .unwrap();
        let bytes = writer.into_inner();

        let records: Vec<_> = CaptureReader::from_reader(Cursor::new(bytes)).unwrap().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].length(), Some(frame.len() as u32));
        assert_eq!(records[0].ttl(), Some(64));
        assert_eq!(records[0].transport(), crate::capture::TransportProtocol::Udp);
    }

    #[test]
    fn test_pcapng_packet_without_interface_is_non_ip() {
        let frame = udp_frame(64, 10);
        let mut writer = PcapNgWriter::new(Vec::new()).unwrap();
        writer
            .write_pcapng_block(SimplePacketBlock {
                original_len: frame.len() as u32,
                data: Cow::Borrowed(&frame),
            })
            .unwrap();
        let bytes = writer.into_inner();

        let records: Vec<_> = CaptureReader::from_reader(Cursor::new(bytes)).unwrap().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].highest_layer(), Some("UNKNOWN"));
    }
}
