//! Training and evaluation
//!
//! Seeded train/test split, mini-batch Adam on binary cross-entropy, and
//! per-epoch history for the chart and the summary table.

use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::nn::loss::BinaryCrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::activation;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::batch::RowBatcher;
use super::dataset::Dataset;
use super::network::{FeedForward, InferenceBackend, TrainingBackend};
use super::prediction::{decide, score_rows};
use crate::error::{IdsError, Result};

const PROBABILITY_EPSILON: f32 = 1e-7;
const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-7;

/// Training hyper-parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of rows held out for the test partition
    pub test_ratio: f64,
    /// Fraction of the training partition held out for validation
    pub validation_ratio: f64,
    /// Adam step size
    pub learning_rate: f32,
    /// Seed for the split, weight init and batch shuffling
    pub seed: u64,
    /// Probabilities strictly above this are anomalous
    pub threshold: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 32,
            test_ratio: 0.2,
            validation_ratio: 0.2,
            learning_rate: 0.001,
            seed: 42,
            threshold: 0.5,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(IdsError::InvalidConfig("epochs must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(IdsError::InvalidConfig("batch_size must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.test_ratio) || self.test_ratio == 0.0 {
            return Err(IdsError::InvalidConfig("test_ratio must be in (0, 1)".to_string()));
        }
        if !(0.0..1.0).contains(&self.validation_ratio) {
            return Err(IdsError::InvalidConfig("validation_ratio must be in [0, 1)".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(IdsError::InvalidConfig("learning_rate must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.threshold) || self.threshold == 0.0 {
            return Err(IdsError::InvalidConfig("threshold must be in (0, 1)".to_string()));
        }
        Ok(())
    }

    /// Smallest dataset that leaves at least one row for test and one for fitting
    pub fn minimum_rows(&self) -> usize {
        (1..)
            .find(|&n| {
                let partition_test = test_count(n, self.test_ratio);
                let train = n - partition_test;
                partition_test >= 1 && fit_count(train, self.validation_ratio) >= 1
            })
            .unwrap_or(usize::MAX)
    }
}

fn test_count(n: usize, ratio: f64) -> usize {
    ((n as f64 * ratio).ceil() as usize).min(n)
}

fn fit_count(n: usize, validation_ratio: f64) -> usize {
    (n as f64 * (1.0 - validation_ratio)).floor() as usize
}

/// Disjoint row index sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `0..n` with a fixed seed and cut off the test share
pub fn split_indices(n: usize, test_ratio: f64, seed: u64) -> Partition {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train = indices.split_off(test_count(n, test_ratio));
    Partition {
        train,
        test: indices,
    }
}

/// Metrics for one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

/// Per-epoch metrics of one fit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn has_validation(&self) -> bool {
        self.epochs.iter().any(|e| e.val_loss.is_some())
    }
}

/// Loss and accuracy over a set of rows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
    pub samples: usize,
}

fn binary_cross_entropy(probability: f32, target: f32) -> f32 {
    let p = probability.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON);
    -(target * p.ln() + (1.0 - target) * (1.0 - p).ln())
}

fn require_labels(dataset: &Dataset) -> Result<&[u8]> {
    dataset
        .labels()
        .ok_or_else(|| IdsError::InvalidConfig("training and evaluation need a labeled dataset".to_string()))
}

/// Loss and accuracy of `model` on the given rows
pub fn evaluate<B: Backend>(
    model: &FeedForward<B>,
    dataset: &Dataset,
    indices: &[usize],
    threshold: f32,
) -> Result<Evaluation> {
    let labels = require_labels(dataset)?;
    if dataset.input_width() != model.input_width() {
        return Err(IdsError::SchemaMismatch {
            expected: model.input_width(),
            found: dataset.input_width(),
        });
    }
    if indices.is_empty() {
        return Ok(Evaluation {
            loss: 0.0,
            accuracy: 0.0,
            samples: 0,
        });
    }

    let mut loss = 0.0f32;
    let mut correct = 0usize;
    for (&i, probability) in indices.iter().zip(score_rows(model, dataset, indices)) {
        let target = labels[i];
        loss += binary_cross_entropy(probability, target as f32);
        if decide(probability, threshold) == target {
            correct += 1;
        }
    }

    Ok(Evaluation {
        loss: loss / indices.len() as f32,
        accuracy: correct as f32 / indices.len() as f32,
        samples: indices.len(),
    })
}

/// Mini-batch trainer
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Fit `model` on the `train` rows of `dataset`
    ///
    /// The last `validation_ratio` share of `train` (in the order given) is
    /// held out and evaluated after every epoch. Returns the fitted weights
    /// without gradient tracking.
    pub fn fit(
        &self,
        model: FeedForward<TrainingBackend>,
        dataset: &Dataset,
        train: &[usize],
    ) -> Result<(FeedForward<InferenceBackend>, TrainingHistory)> {
        self.config.validate()?;
        let labels = require_labels(dataset)?;
        if dataset.input_width() != model.input_width() {
            return Err(IdsError::SchemaMismatch {
                expected: model.input_width(),
                found: dataset.input_width(),
            });
        }

        let split_at = fit_count(train.len(), self.config.validation_ratio);
        let (fit_rows, val_rows) = train.split_at(split_at);
        if fit_rows.is_empty() {
            return Err(IdsError::InsufficientData {
                rows: dataset.len(),
                required: self.config.minimum_rows(),
            });
        }

        info!(
            "Training on {} rows, validating on {} ({} epochs, batch {})",
            fit_rows.len(),
            val_rows.len(),
            self.config.epochs,
            self.config.batch_size
        );

        let device = model.device();
        let batcher = RowBatcher::<TrainingBackend>::new(dataset, device.clone());
        let loss_fn = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&device);
        let mut optimizer = AdamConfig::new()
            .with_beta_1(ADAM_BETA1)
            .with_beta_2(ADAM_BETA2)
            .with_epsilon(ADAM_EPSILON)
            .init();

        let mut model = model;
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1));
        let mut order = fit_rows.to_vec();
        let mut history = TrainingHistory::default();

        for epoch in 1..=self.config.epochs {
            order.shuffle(&mut rng);
            let mut loss_sum = 0.0f32;
            let mut correct = 0usize;

            for rows in order.chunks(self.config.batch_size) {
                let batch = batcher.batch(rows.to_vec());
                let logits = model.logits(batch.inputs).squeeze::<1>(1);

                let probabilities = activation::sigmoid(logits.clone()).into_data();
                for (&i, probability) in rows.iter().zip(probabilities.iter::<f32>()) {
                    if decide(probability, self.config.threshold) == labels[i] {
                        correct += 1;
                    }
                }

                let loss = loss_fn.forward(logits, batch.targets);
                loss_sum += loss.clone().into_scalar().elem::<f32>() * rows.len() as f32;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(self.config.learning_rate as f64, model, grads);
            }

            let loss = loss_sum / order.len() as f32;
            if !loss.is_finite() {
                warn!("Epoch {}: loss is not finite", epoch);
            }

            let validation = if val_rows.is_empty() {
                None
            } else {
                Some(evaluate(&model.valid(), dataset, val_rows, self.config.threshold)?)
            };

            let metrics = EpochMetrics {
                epoch,
                loss,
                accuracy: correct as f32 / order.len() as f32,
                val_loss: validation.map(|v| v.loss),
                val_accuracy: validation.map(|v| v.accuracy),
            };
            debug!(
                "Epoch {}/{}: loss={:.4} accuracy={:.4} val_loss={:?} val_accuracy={:?}",
                epoch, self.config.epochs, metrics.loss, metrics.accuracy, metrics.val_loss, metrics.val_accuracy
            );
            history.epochs.push(metrics);
        }

        Ok((model.valid(), history))
    }
}
