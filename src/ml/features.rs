//! Per-packet feature extraction
//!
//! Every extraction runs under a [`FeatureSchema`], a named and versioned
//! column layout. The schema decides which columns exist, their order, which
//! of them feed the model, and which records cannot be represented at all.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::{CaptureRecord, TransportProtocol};

/// Placeholder written to address columns for records without an IP layer
pub const UNSPECIFIED_ADDR: &str = "0.0.0.0";

/// Column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Fed to the model
    Numeric,
    /// Kept for reporting only
    Categorical,
}

/// One schema column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn numeric(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnKind::Numeric,
    }
}

const fn categorical(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnKind::Categorical,
    }
}

const CAPTURE_TABLE_COLUMNS: &[Column] = &[
    numeric("frame.len"),
    categorical("protocol"),
    categorical("src_ip"),
    categorical("dst_ip"),
    numeric("src_port"),
    numeric("dst_port"),
];

const PACKET_HEADER_COLUMNS: &[Column] = &[
    numeric("frame.len"),
    numeric("ip.ttl"),
    numeric("ip.proto"),
    numeric("is_tcp"),
    numeric("is_udp"),
];

/// Declared feature layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureSchema {
    /// Frame length, highest-layer name, addresses and ports.
    /// Accepts every decodable record; used for training tables.
    CaptureTable,
    /// Frame length, TTL, IP protocol and TCP/UDP flags.
    /// Requires an IP layer; used for detection runs.
    PacketHeader,
}

impl FeatureSchema {
    pub const ALL: [FeatureSchema; 2] = [FeatureSchema::CaptureTable, FeatureSchema::PacketHeader];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureSchema::CaptureTable => "capture-table",
            FeatureSchema::PacketHeader => "packet-header",
        }
    }

    /// Bumped whenever columns or their derivation change
    pub fn version(&self) -> u32 {
        match self {
            FeatureSchema::CaptureTable => 1,
            FeatureSchema::PacketHeader => 1,
        }
    }

    pub fn columns(&self) -> &'static [Column] {
        match self {
            FeatureSchema::CaptureTable => CAPTURE_TABLE_COLUMNS,
            FeatureSchema::PacketHeader => PACKET_HEADER_COLUMNS,
        }
    }

    /// Number of numeric columns, i.e. model input width
    pub fn input_width(&self) -> usize {
        self.columns()
            .iter()
            .filter(|c| c.kind == ColumnKind::Numeric)
            .count()
    }

    /// Extract one row, or explain why the record has no row
    pub fn extract(&self, record: &CaptureRecord) -> Result<FeatureRow, Unextractable> {
        let length = match record.length() {
            Some(length) => length,
            None => return Err(Unextractable::Malformed),
        };

        let cells = match self {
            FeatureSchema::CaptureTable => vec![
                Cell::Number(length as f64),
                Cell::Text(record.highest_layer().unwrap_or("UNKNOWN").to_string()),
                Cell::Text(address_or_unspecified(record.src_addr())),
                Cell::Text(address_or_unspecified(record.dst_addr())),
                Cell::Number(record.src_port().unwrap_or(0) as f64),
                Cell::Number(record.dst_port().unwrap_or(0) as f64),
            ],
            FeatureSchema::PacketHeader => {
                let (ttl, proto) = match (record.ttl(), record.ip_proto()) {
                    (Some(ttl), Some(proto)) => (ttl, proto),
                    _ => return Err(Unextractable::NoIpLayer),
                };
                let transport = record.transport();
                vec![
                    Cell::Number(length as f64),
                    Cell::Number(ttl as f64),
                    Cell::Number(proto as f64),
                    Cell::Number(flag(transport == TransportProtocol::Tcp)),
                    Cell::Number(flag(transport == TransportProtocol::Udp)),
                ]
            }
        };

        Ok(FeatureRow { cells })
    }
}

impl fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/v{}", self.name(), self.version())
    }
}

impl FromStr for FeatureSchema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureSchema::ALL
            .into_iter()
            .find(|schema| schema.name() == s)
            .ok_or_else(|| {
                format!(
                    "unknown feature schema '{}' (expected one of: {})",
                    s,
                    FeatureSchema::ALL.map(|s| s.name()).join(", ")
                )
            })
    }
}

fn address_or_unspecified(addr: Option<std::net::IpAddr>) -> String {
    addr.map(|a| a.to_string())
        .unwrap_or_else(|| UNSPECIFIED_ADDR.to_string())
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Why a record produced no row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize)]
pub enum Unextractable {
    #[error("record could not be decoded")]
    Malformed,
    #[error("record has no IP layer")]
    NoIpLayer,
}

/// One table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Fully populated row in schema column order
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    cells: Vec<Cell>,
}

impl FeatureRow {
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Numeric projection fed to the model
    pub fn vector(&self) -> FeatureVector {
        FeatureVector(
            self.cells
                .iter()
                .filter_map(|cell| match cell {
                    Cell::Number(n) => Some(*n as f32),
                    Cell::Text(_) => None,
                })
                .collect(),
        )
    }
}

/// Model input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        FeatureVector(values)
    }
}
