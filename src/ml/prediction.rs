//! Thresholded predictions attached to dataset rows

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use serde::Serialize;

use super::batch::RowBatcher;
use super::dataset::{Dataset, LABEL_ANOMALOUS, LABEL_NORMAL};
use super::network::FeedForward;
use crate::error::{IdsError, Result};

/// Default decision threshold
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Rows per forward pass when scoring
const SCORE_BATCH: usize = 4096;

/// 1 when `probability` is strictly above `threshold`
pub fn decide(probability: f32, threshold: f32) -> u8 {
    if probability > threshold {
        LABEL_ANOMALOUS
    } else {
        LABEL_NORMAL
    }
}

/// Decision for one dataset row
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    /// Row index in the dataset
    pub row: usize,
    /// Capture record index of that row
    pub origin: u64,
    pub probability: f32,
    pub decision: u8,
}

impl Prediction {
    pub fn is_anomalous(&self) -> bool {
        self.decision == LABEL_ANOMALOUS
    }
}

/// Attach thresholded probabilities to probability/row pairs
pub fn annotate(
    dataset: &Dataset,
    rows: &[usize],
    probabilities: &[f32],
    threshold: f32,
) -> Vec<Prediction> {
    debug_assert_eq!(rows.len(), probabilities.len());
    rows.iter()
        .zip(probabilities)
        .map(|(&row, &probability)| Prediction {
            row,
            origin: dataset.origin(row),
            probability,
            decision: decide(probability, threshold),
        })
        .collect()
}

/// Anomaly probability for each of `rows`, in order
pub(crate) fn score_rows<B: Backend>(model: &FeedForward<B>, dataset: &Dataset, rows: &[usize]) -> Vec<f32> {
    let batcher = RowBatcher::<B>::new(dataset, model.device());
    let mut probabilities = Vec::with_capacity(rows.len());
    for chunk in rows.chunks(SCORE_BATCH) {
        let batch = batcher.batch(chunk.to_vec());
        let data = model.forward(batch.inputs).into_data();
        probabilities.extend(data.iter::<f32>());
    }
    probabilities
}

/// Predict the given rows
///
/// The model width is checked against the dataset schema before the first
/// prediction, so a mismatch never produces output.
pub fn predict_rows<B: Backend>(
    model: &FeedForward<B>,
    dataset: &Dataset,
    rows: &[usize],
    threshold: f32,
) -> Result<Vec<Prediction>> {
    if dataset.is_empty() {
        return Err(IdsError::EmptyDataset);
    }
    if model.input_width() != dataset.input_width() {
        return Err(IdsError::SchemaMismatch {
            expected: model.input_width(),
            found: dataset.input_width(),
        });
    }

    let probabilities = score_rows(model, dataset, rows);
    Ok(annotate(dataset, rows, &probabilities, threshold))
}

/// Predict every row of the dataset
pub fn predict_all<B: Backend>(model: &FeedForward<B>, dataset: &Dataset, threshold: f32) -> Result<Vec<Prediction>> {
    let rows: Vec<usize> = (0..dataset.len()).collect();
    predict_rows(model, dataset, &rows, threshold)
}
