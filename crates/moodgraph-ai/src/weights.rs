//! Weight-state mapping and strict/lenient parameter matching.
//!
//! A checkpoint's weight state is a flat `name → tensor` map. Serving code
//! may drift from the training code (renamed or added parameters), so
//! matching is governed by [`LoadMode`]: lenient loading keeps defaults for
//! missing parameters and skips unknown ones, but always records what it
//! skipped in a [`LoadReport`].

use std::collections::BTreeMap;

use moodgraph_core::Variant;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ModelError;

/// Tensor name prefixes owned by the transformer backbone.
///
/// The backbone runs as an external encoder graph, so these parameters are
/// accounted for as delegated rather than unexpected.
pub const BACKBONE_PREFIXES: &[&str] = &["transformer.", "text_encoder.transformer."];

/// Wrapper prefixes some exporters put in front of every tensor name.
const LEGACY_STATE_PREFIXES: &[&str] = &["state_dict.", "state."];

/// A dense f32 tensor in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl TensorData {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), values.len());
        Self { shape, values }
    }
}

/// Named parameters of one checkpoint.
pub type StateDict = BTreeMap<String, TensorData>;

/// Strip legacy wrapper prefixes (`state.` / `state_dict.`) from tensor names.
pub fn normalize_key(name: &str) -> &str {
    LEGACY_STATE_PREFIXES
        .iter()
        .find_map(|p| name.strip_prefix(p))
        .unwrap_or(name)
}

fn is_backbone(name: &str) -> bool {
    BACKBONE_PREFIXES.iter().any(|p| name.starts_with(p))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Every expected parameter must be present with the right shape, and
    /// nothing unexpected may remain.
    Strict,
    /// Missing parameters keep their defaults; unknown or mis-shaped ones are skipped.
    #[default]
    Lenient,
}

/// What happened to each parameter during a model build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub mismatched: Vec<String>,
    pub delegated: usize,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }
}

/// Pulls expected parameters out of a [`StateDict`], tracking what was used.
pub struct WeightLoader {
    variant: Variant,
    state: StateDict,
    mode: LoadMode,
    report: LoadReport,
}

impl WeightLoader {
    pub fn new(variant: Variant, state: StateDict, mode: LoadMode) -> Self {
        Self {
            variant,
            state,
            mode,
            report: LoadReport::default(),
        }
    }

    /// Take parameter `name` if present with exactly `shape`.
    ///
    /// Returns `None` when the parameter is missing or mis-shaped; the caller
    /// then keeps its default initialisation.
    pub fn take(&mut self, name: &str, shape: &[usize]) -> Option<Vec<f32>> {
        match self.state.remove(name) {
            None => {
                self.report.missing.push(name.to_string());
                None
            }
            Some(t) if t.shape != shape => {
                self.report
                    .mismatched
                    .push(format!("{name}: expected {shape:?}, found {:?}", t.shape));
                None
            }
            Some(t) => {
                self.report.loaded.push(name.to_string());
                Some(t.values)
            }
        }
    }

    /// Close out the load: classify leftovers and enforce the load mode.
    pub fn finish(mut self) -> Result<LoadReport, ModelError> {
        for name in std::mem::take(&mut self.state).into_keys() {
            if is_backbone(&name) {
                self.report.delegated += 1;
            } else {
                self.report.unexpected.push(name);
            }
        }

        let report = self.report;
        let variant = self.variant;

        if !report.is_clean() {
            if self.mode == LoadMode::Strict {
                return Err(ModelError::load(
                    variant,
                    format!(
                        "strict load failed: missing {:?}, unexpected {:?}, mismatched {:?}",
                        report.missing, report.unexpected, report.mismatched
                    ),
                ));
            }
            for name in &report.missing {
                warn!(variant = %variant, key = %name, "parameter missing, keeping default");
            }
            for name in &report.unexpected {
                warn!(variant = %variant, key = %name, "unexpected parameter skipped");
            }
            for detail in &report.mismatched {
                warn!(variant = %variant, key = %detail, "shape mismatch, parameter skipped");
            }
        }

        info!(
            variant = %variant,
            loaded = report.loaded.len(),
            missing = report.missing.len(),
            unexpected = report.unexpected.len(),
            mismatched = report.mismatched.len(),
            delegated = report.delegated,
            "weight state applied"
        );
        Ok(report)
    }
}
