//! Tensor batches over dataset rows

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use super::dataset::Dataset;

/// Inputs and targets for a set of rows
#[derive(Clone, Debug)]
pub struct RowBatch<B: Backend> {
    /// `[rows, input_width]`
    pub inputs: Tensor<B, 2>,
    /// `[rows]`; all 0 when the dataset is unlabeled
    pub targets: Tensor<B, 1, Int>,
}

/// Turns row indices of one dataset into [`RowBatch`]es
#[derive(Clone)]
pub struct RowBatcher<'a, B: Backend> {
    dataset: &'a Dataset,
    device: B::Device,
}

impl<'a, B: Backend> RowBatcher<'a, B> {
    pub fn new(dataset: &'a Dataset, device: B::Device) -> Self {
        Self { dataset, device }
    }
}

impl<B: Backend> Batcher<usize, RowBatch<B>> for RowBatcher<'_, B> {
    fn batch(&self, rows: Vec<usize>) -> RowBatch<B> {
        let width = self.dataset.input_width();
        let inputs: Vec<f32> = rows
            .iter()
            .flat_map(|&row| self.dataset.vector(row).as_slice().to_vec())
            .collect();
        let targets: Vec<i64> = rows
            .iter()
            .map(|&row| self.dataset.label(row).unwrap_or(0) as i64)
            .collect();

        RowBatch {
            inputs: Tensor::from_data(TensorData::new(inputs, [rows.len(), width]), &self.device),
            targets: Tensor::from_data(TensorData::new(targets, [rows.len()]), &self.device),
        }
    }
}
