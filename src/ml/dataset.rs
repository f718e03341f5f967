//! Dataset assembly
//!
//! Runs a schema over every record of a capture pass and keeps the rows that
//! could be extracted, each paired with its label and capture index.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::features::{FeatureRow, FeatureSchema, FeatureVector, Unextractable};
use crate::capture::CaptureRecord;

/// Label for normal traffic
pub const LABEL_NORMAL: u8 = 0;
/// Label for anomalous traffic
pub const LABEL_ANOMALOUS: u8 = 1;

/// How rows get their training labels
///
/// Captures carry no ground truth. `Placeholder` labels everything normal,
/// which leaves the classifier nothing to learn beyond a constant; it is
/// kept as an explicit mode so runs that use it say so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LabelingMode {
    /// Every row is labeled 0
    #[default]
    Placeholder,
    /// Rows sent from one of these addresses are labeled 1
    SourceAddresses(Vec<IpAddr>),
    /// No labels (detection runs)
    Unlabeled,
}

impl LabelingMode {
    fn label(&self, record: &CaptureRecord) -> Option<u8> {
        match self {
            LabelingMode::Placeholder => Some(LABEL_NORMAL),
            LabelingMode::SourceAddresses(addrs) => {
                let anomalous = record.src_addr().map(|a| addrs.contains(&a)).unwrap_or(false);
                Some(if anomalous { LABEL_ANOMALOUS } else { LABEL_NORMAL })
            }
            LabelingMode::Unlabeled => None,
        }
    }

    pub fn is_labeled(&self) -> bool {
        !matches!(self, LabelingMode::Unlabeled)
    }
}

/// Counters for one extraction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    /// Records read from the capture
    pub records: u64,
    /// Rows added to the dataset
    pub extracted: u64,
    pub dropped_malformed: u64,
    pub dropped_no_ip: u64,
}

impl ExtractionStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_malformed + self.dropped_no_ip
    }

    fn drop_record(&mut self, reason: Unextractable) {
        match reason {
            Unextractable::Malformed => self.dropped_malformed += 1,
            Unextractable::NoIpLayer => self.dropped_no_ip += 1,
        }
    }
}

/// Extracted rows with aligned labels and capture indices
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: FeatureSchema,
    rows: Vec<FeatureRow>,
    labels: Option<Vec<u8>>,
    origins: Vec<u64>,
}

impl Dataset {
    /// Create an empty dataset
    pub(crate) fn new(schema: FeatureSchema, labeled: bool) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            labels: labeled.then(Vec::new),
            origins: Vec::new(),
        }
    }

    /// Append a row; `label` must be given exactly when the dataset is labeled
    ///
    /// Only [`DatasetBuilder`] appends, so the label column always matches the
    /// labeling mode the dataset was created with.
    pub(crate) fn push(&mut self, row: FeatureRow, origin: u64, label: Option<u8>) {
        debug_assert_eq!(self.labels.is_some(), label.is_some());
        if let (Some(labels), Some(label)) = (self.labels.as_mut(), label) {
            labels.push(label);
        }
        self.rows.push(row);
        self.origins.push(origin);
    }

    pub fn schema(&self) -> FeatureSchema {
        self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Model input width of every row
    pub fn input_width(&self) -> usize {
        self.schema.input_width()
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> &FeatureRow {
        &self.rows[index]
    }

    pub fn labels(&self) -> Option<&[u8]> {
        self.labels.as_deref()
    }

    pub fn label(&self, index: usize) -> Option<u8> {
        self.labels.as_ref().map(|l| l[index])
    }

    /// Capture record index the row was extracted from
    pub fn origin(&self, index: usize) -> u64 {
        self.origins[index]
    }

    pub fn vector(&self, index: usize) -> FeatureVector {
        self.rows[index].vector()
    }

    /// Number of rows labeled anomalous
    pub fn anomalous_count(&self) -> usize {
        self.labels
            .as_ref()
            .map(|l| l.iter().filter(|&&x| x == LABEL_ANOMALOUS).count())
            .unwrap_or(0)
    }
}

/// Runs a schema over a record stream
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    schema: FeatureSchema,
    labeling: LabelingMode,
}

impl DatasetBuilder {
    pub fn new(schema: FeatureSchema, labeling: LabelingMode) -> Self {
        Self { schema, labeling }
    }

    pub fn schema(&self) -> FeatureSchema {
        self.schema
    }

    /// Extract every record, dropping the ones the schema cannot represent
    pub fn build<I>(&self, records: I) -> (Dataset, ExtractionStats)
    where
        I: IntoIterator<Item = CaptureRecord>,
    {
        let mut dataset = Dataset::new(self.schema, self.labeling.is_labeled());
        let mut stats = ExtractionStats::default();

        for record in records {
            stats.records += 1;
            match self.schema.extract(&record) {
                Ok(row) => {
                    let label = self.labeling.label(&record);
                    dataset.push(row, record.index(), label);
                    stats.extracted += 1;
                }
                Err(reason) => {
                    debug!("Dropping record {}: {}", record.index(), reason);
                    stats.drop_record(reason);
                }
            }
        }

        info!(
            "Extracted {} rows from {} records with schema {}",
            stats.extracted, stats.records, self.schema
        );
        if stats.dropped() > 0 {
            warn!(
                "Dropped {} records ({} malformed, {} without IP layer)",
                stats.dropped(),
                stats.dropped_malformed,
                stats.dropped_no_ip
            );
        }
        match &self.labeling {
            LabelingMode::Placeholder if !dataset.is_empty() => warn!(
                "Placeholder labeling: all {} rows labeled normal, training has no anomalous class",
                dataset.len()
            ),
            LabelingMode::SourceAddresses(addrs) => info!(
                "Labeled {} of {} rows anomalous from {} source addresses",
                dataset.anomalous_count(),
                dataset.len(),
                addrs.len()
            ),
            _ => {}
        }

        (dataset, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{IpRecord, MalformedRecord, NonIpRecord, Ports, TransportProtocol};
    use std::net::Ipv4Addr;

    fn udp(index: u64, src: [u8; 4]) -> CaptureRecord {
        CaptureRecord::Ip(IpRecord {
            index,
            length: 80,
            ttl: 32,
            ip_proto: 17,
            src_addr: IpAddr::V4(Ipv4Addr::from(src)),
            dst_addr: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            transport: TransportProtocol::Udp,
            ports: Some(Ports { src: 49153, dst: 9 }),
            highest_layer: "UDP".to_string(),
        })
    }

    fn records() -> Vec<CaptureRecord> {
        vec![
            udp(0, [10, 1, 1, 2]),
            CaptureRecord::Malformed(MalformedRecord {
                index: 1,
                reason: "bad".to_string(),
            }),
            CaptureRecord::NonIp(NonIpRecord {
                index: 2,
                length: 42,
                highest_layer: "ARP".to_string(),
            }),
            udp(3, [10, 66, 0, 1]),
        ]
    }

    #[test]
    fn test_drops_are_counted_not_fabricated() {
        let builder = DatasetBuilder::new(FeatureSchema::PacketHeader, LabelingMode::Unlabeled);
        let (dataset, stats) = builder.build(records());

        assert_eq!(stats.records, 4);
        assert_eq!(stats.extracted, 2);
        assert_eq!(stats.dropped_malformed, 1);
        assert_eq!(stats.dropped_no_ip, 1);
        assert_eq!(dataset.len() as u64, stats.records - stats.dropped());
        assert!(dataset.labels().is_none());
    }

    #[test]
    fn test_origins_follow_rows() {
        let builder = DatasetBuilder::new(FeatureSchema::CaptureTable, LabelingMode::Placeholder);
        let (dataset, _) = builder.build(records());

        // Only the malformed record is dropped under the table schema
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.origin(0), 0);
        assert_eq!(dataset.origin(1), 2);
        assert_eq!(dataset.origin(2), 3);
    }

    #[test]
    fn test_placeholder_labels_everything_normal() {
        let builder = DatasetBuilder::new(FeatureSchema::CaptureTable, LabelingMode::Placeholder);
        let (dataset, _) = builder.build(records());

        assert_eq!(dataset.labels().unwrap(), &[0, 0, 0]);
        assert_eq!(dataset.anomalous_count(), 0);
    }

    #[test]
    fn test_source_address_labeling() {
        let attacker = IpAddr::V4(Ipv4Addr::new(10, 66, 0, 1));
        let builder = DatasetBuilder::new(
            FeatureSchema::PacketHeader,
            LabelingMode::SourceAddresses(vec![attacker]),
        );
        let (dataset, _) = builder.build(records());

        assert_eq!(dataset.labels().unwrap(), &[0, 1]);
        assert_eq!(dataset.label(1), Some(LABEL_ANOMALOUS));
        assert_eq!(dataset.origin(1), 3);
    }

    #[test]
    fn test_empty_input() {
        let builder = DatasetBuilder::new(FeatureSchema::CaptureTable, LabelingMode::Placeholder);
        let (dataset, stats) = builder.build(Vec::new());
        assert!(dataset.is_empty());
        assert_eq!(stats, ExtractionStats::default());
    }

    #[test]
    fn test_labels_stay_aligned_with_rows() {
        for labeling in [LabelingMode::Placeholder, LabelingMode::SourceAddresses(vec![])] {
            let (dataset, _) = DatasetBuilder::new(FeatureSchema::PacketHeader, labeling).build(records());
            assert_eq!(dataset.len(), 2);
            assert_eq!(dataset.labels().map(<[u8]>::len), Some(dataset.len()));
        }
        let (dataset, _) =
            DatasetBuilder::new(FeatureSchema::PacketHeader, LabelingMode::Unlabeled).build(records());
        assert_eq!(dataset.len(), 2);
        assert!(dataset.labels().is_none());
        assert!((0..dataset.len()).all(|i| dataset.label(i).is_none()));
    }
}
