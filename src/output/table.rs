//! CSV export of feature tables

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use super::ensure_parent;
use crate::error::{IdsError, Result};
use crate::ml::{Dataset, Prediction};

const LABEL_COLUMN: &str = "is_anomaly";
const PROBABILITY_COLUMN: &str = "probability";
const PREDICTION_COLUMN: &str = "prediction";

fn header(dataset: &Dataset, annotated: bool) -> Vec<String> {
    let mut header: Vec<String> = dataset
        .schema()
        .columns()
        .iter()
        .map(|c| c.name.to_string())
        .collect();
    if dataset.labels().is_some() {
        header.push(LABEL_COLUMN.to_string());
    }
    if annotated {
        header.push(PROBABILITY_COLUMN.to_string());
        header.push(PREDICTION_COLUMN.to_string());
    }
    header
}

fn row_fields(dataset: &Dataset, row: usize) -> Vec<String> {
    let mut fields: Vec<String> = dataset.row(row).cells().iter().map(|c| c.to_string()).collect();
    if let Some(label) = dataset.label(row) {
        fields.push(label.to_string());
    }
    fields
}

/// Write every dataset row, without predictions
pub fn write_dataset_csv(path: &Path, dataset: &Dataset) -> Result<usize> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(|e| IdsError::export(path, e))?;
    writer
        .write_record(header(dataset, false))
        .map_err(|e| IdsError::export(path, e))?;
    for row in 0..dataset.len() {
        writer
            .write_record(row_fields(dataset, row))
            .map_err(|e| IdsError::export(path, e))?;
    }
    writer.flush().map_err(|e| IdsError::export(path, e))?;

    info!("Wrote {} rows to {}", dataset.len(), path.display());
    Ok(dataset.len())
}

/// Write the predicted rows with their probability and decision
pub fn write_annotated_csv(path: &Path, dataset: &Dataset, predictions: &[Prediction]) -> Result<usize> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(|e| IdsError::export(path, e))?;
    writer
        .write_record(header(dataset, true))
        .map_err(|e| IdsError::export(path, e))?;
    for prediction in predictions {
        let mut fields = row_fields(dataset, prediction.row);
        fields.push(format!("{:.6}", prediction.probability));
        fields.push(prediction.decision.to_string());
        writer.write_record(&fields).map_err(|e| IdsError::export(path, e))?;
    }
    writer.flush().map_err(|e| IdsError::export(path, e))?;

    info!("Wrote {} annotated rows to {}", predictions.len(), path.display());
    Ok(predictions.len())
}

/// Pretty-printed JSON document
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let file = fs::File::create(path).map_err(|e| IdsError::export(path, e))?;
    serde_json::to_writer_pretty(file, value).map_err(|e| IdsError::export(path, e))?;
    Ok(())
}
