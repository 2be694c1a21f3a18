//! Weighted model ensemble.
//!
//! The ensemble is a static list of models with relative weights; each
//! generation step draws exactly one model, with probability proportional
//! to its weight. Weights need not sum to one, they are normalized at
//! sampling time. The set is fixed for the duration of a run.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::ConnectionConfig;

/// One model in the ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleEntry {
    /// Display label used in logs and candidate metadata.
    pub name: String,
    /// Relative sampling weight. Must be finite and positive.
    pub weight: f64,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl EnsembleEntry {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            connection: ConnectionConfig::default(),
        }
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }
}

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("ensemble has no models configured")]
    Empty,
    #[error("model {name:?} has invalid weight {weight}")]
    InvalidWeight { name: String, weight: f64 },
}

/// A validated, immutable weighted model list.
#[derive(Debug, Clone)]
pub struct ModelEnsemble {
    entries: Vec<EnsembleEntry>,
    total_weight: f64,
}

impl ModelEnsemble {
    pub fn new(entries: Vec<EnsembleEntry>) -> Result<Self, EnsembleError> {
        if entries.is_empty() {
            return Err(EnsembleError::Empty);
        }
        for entry in &entries {
            if !entry.weight.is_finite() || entry.weight <= 0.0 {
                return Err(EnsembleError::InvalidWeight {
                    name: entry.name.clone(),
                    weight: entry.weight,
                });
            }
        }
        let total_weight = entries.iter().map(|e| e.weight).sum();
        Ok(Self {
            entries,
            total_weight,
        })
    }

    /// Draws one model, weight-proportionally. Pure given the RNG: the
    /// ensemble itself never changes between calls.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> (usize, &EnsembleEntry) {
        let mut pick = rng.gen::<f64>() * self.total_weight;
        for (i, entry) in self.entries.iter().enumerate() {
            pick -= entry.weight;
            if pick <= 0.0 {
                return (i, entry);
            }
        }
        // Floating-point slack can leave pick marginally positive.
        let last = self.entries.len() - 1;
        (last, &self.entries[last])
    }

    pub fn entries(&self) -> &[EnsembleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
