//! Model Lifecycle Manager: when weights are loaded, quantized and released.
//!
//! The deployment target cannot hold both full-precision transformers in RAM,
//! so metadata (labels, thresholds, metrics, tokenizer) is decoupled from
//! weights. Metadata is loaded once; weights follow one of two strategies:
//!
//! - [`Strategy::Resident`]: load each variant once, quantize, and keep it for
//!   the life of the process. Lowest latency, highest steady-state memory.
//! - [`Strategy::JustInTime`]: load, run one prediction, and release. A single
//!   request holds one variant at a time, at the cost of a disk load per call.
//!   Concurrent requests each hold their own, so both may be resident at once.
//!
//! Per variant the state moves `Absent → Loading → ResidentFullPrecision →
//! ResidentQuantized`, and back to `Absent` on unload. Transitions are
//! serialized by a per-variant mutex, so concurrent callers never load the
//! same variant twice. In-flight inference holds an `Arc` to the model, so an
//! unload only drops the cache's reference.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use moodgraph_core::{LabelSet, Metrics, ThresholdVector, Variant};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::ModelError;
use crate::checkpoint::{CheckpointMeta, CheckpointSource, FileCheckpointStore};
use crate::encoder::{Backend, MAX_SEQ_LEN, Tokenize};
use crate::model::{EmotionModel, FullPrecisionModel};
use crate::weights::{LoadMode, WeightLoader};

/// How long model weights stay in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Keep quantized models resident after first load.
    Resident,
    /// Reload from disk for every prediction and release right after.
    #[default]
    JustInTime,
}

/// When loading happens relative to process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Startup {
    /// On the first request.
    #[default]
    Lazy,
    /// Before serving: metadata, plus both models under [`Strategy::Resident`].
    Eager,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub model_dir: PathBuf,
    pub strategy: Strategy,
    pub startup: Startup,
    pub quantize: bool,
    pub load_mode: LoadMode,
    pub hidden_dim: usize,
    pub max_length: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            strategy: Strategy::default(),
            startup: Startup::default(),
            quantize: true,
            load_mode: LoadMode::default(),
            hidden_dim: 768,
            max_length: MAX_SEQ_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ModelState {
    Absent = 0,
    Loading = 1,
    ResidentFullPrecision = 2,
    ResidentQuantized = 3,
}

impl ModelState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Loading,
            2 => Self::ResidentFullPrecision,
            3 => Self::ResidentQuantized,
            _ => Self::Absent,
        }
    }
}

/// Decision parameters of one variant.
#[derive(Debug, Clone)]
pub struct VariantMeta {
    pub thresholds: ThresholdVector,
    pub metrics: Metrics,
}

/// Everything needed to decide and report, without any model weights.
pub struct Metadata {
    pub labels: LabelSet,
    pub tokenizer: Arc<dyn Tokenize>,
    variants: [Option<VariantMeta>; 2],
}

impl Metadata {
    /// `None` when the variant's checkpoint could not be used.
    pub fn variant(&self, variant: Variant) -> Option<&VariantMeta> {
        self.variants[variant.index()].as_ref()
    }

    pub fn available(&self) -> Vec<Variant> {
        Variant::ALL
            .into_iter()
            .filter(|v| self.variant(*v).is_some())
            .collect()
    }
}

struct Slot {
    model: Mutex<Option<Arc<dyn EmotionModel>>>,
    state: AtomicU8,
    loads: AtomicUsize,
}

impl Slot {
    fn new() -> Self {
        Self {
            model: Mutex::new(None),
            state: AtomicU8::new(ModelState::Absent as u8),
            loads: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn EmotionModel>>> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: ModelState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn get(&self) -> ModelState {
        ModelState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// Owns metadata and model residency for both variants.
pub struct LifecycleManager {
    config: LifecycleConfig,
    source: Arc<dyn CheckpointSource>,
    backend: Arc<dyn Backend>,
    metadata: Mutex<Option<Arc<Metadata>>>,
    slots: [Slot; 2],
}

impl LifecycleManager {
    pub fn new(
        config: LifecycleConfig,
        source: Arc<dyn CheckpointSource>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            config,
            source,
            backend,
            metadata: Mutex::new(None),
            slots: [Slot::new(), Slot::new()],
        }
    }

    /// Manager reading checkpoints from `config.model_dir`.
    pub fn from_config(config: LifecycleConfig, backend: Arc<dyn Backend>) -> Self {
        let source = Arc::new(FileCheckpointStore::new(config.model_dir.clone()));
        Self::new(config, source, backend)
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn state(&self, variant: Variant) -> ModelState {
        self.slot(variant).get()
    }

    /// Times weights for `variant` have been loaded from disk.
    pub fn loads(&self, variant: Variant) -> usize {
        self.slot(variant).loads.load(Ordering::SeqCst)
    }

    pub fn metadata_loaded(&self) -> bool {
        self.lock_metadata().is_some()
    }

    fn slot(&self, variant: Variant) -> &Slot {
        &self.slots[variant.index()]
    }

    fn lock_metadata(&self) -> MutexGuard<'_, Option<Arc<Metadata>>> {
        self.metadata.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load labels, thresholds, metrics and the tokenizer once.
    ///
    /// Concurrent callers wait on the first load and share its result. A
    /// failure is logged and leaves nothing cached, so the next call retries.
    pub fn ensure_metadata_loaded(&self) -> Result<Arc<Metadata>, ModelError> {
        let mut guard = self.lock_metadata();
        if let Some(meta) = guard.as_ref() {
            return Ok(Arc::clone(meta));
        }

        match self.load_metadata() {
            Ok(meta) => {
                let meta = Arc::new(meta);
                *guard = Some(Arc::clone(&meta));
                Ok(meta)
            }
            Err(e) => {
                error!(error = %e, model_dir = %self.config.model_dir.display(), "metadata load failed");
                Err(e)
            }
        }
    }

    fn load_metadata(&self) -> Result<Metadata, ModelError> {
        let mut raw: [Option<CheckpointMeta>; 2] = [None, None];
        for variant in Variant::ALL {
            match self.source.read_meta(variant) {
                Ok(meta) => raw[variant.index()] = Some(meta),
                Err(e) => error!(%variant, error = %e, "checkpoint unavailable"),
            }
        }
        if raw.iter().all(Option::is_none) {
            return Err(ModelError::Unavailable(format!(
                "no readable checkpoint in {}",
                self.config.model_dir.display()
            )));
        }

        let labels = shared_labels(&raw);
        let mut variants: [Option<VariantMeta>; 2] = [None, None];
        for variant in Variant::ALL {
            if let Some(meta) = raw[variant.index()].take() {
                variants[variant.index()] = variant_meta(variant, meta, &labels);
            }
        }
        drop(raw);

        let tokenizer = self
            .backend
            .load_tokenizer(&self.config.model_dir, self.config.max_length)?;

        let meta = Metadata {
            labels,
            tokenizer,
            variants,
        };
        info!(
            labels = meta.labels.len(),
            variants = ?meta.available(),
            "metadata loaded"
        );
        Ok(meta)
    }

    /// Make `variant` resident and return it. Idempotent.
    pub fn ensure_model_loaded(
        &self,
        variant: Variant,
    ) -> Result<Arc<dyn EmotionModel>, ModelError> {
        let meta = self.ensure_metadata_loaded()?;
        require_variant(&meta, variant)?;

        let slot = self.slot(variant);
        let mut guard = slot.lock();
        if let Some(model) = guard.as_ref() {
            return Ok(Arc::clone(model));
        }

        let model = self.load_model(variant, &meta)?;
        *guard = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Drop the cached model for `variant`. Returns whether one was resident.
    ///
    /// Inference already holding the model finishes on its own reference.
    pub fn unload(&self, variant: Variant) -> bool {
        let slot = self.slot(variant);
        let mut guard = slot.lock();
        let released = guard.take().is_some();
        slot.set(ModelState::Absent);
        if released {
            debug!(%variant, "model released");
        }
        released
    }

    /// Run `f` against a resident `variant`, honouring the configured strategy.
    ///
    /// Under [`Strategy::JustInTime`] the variant's lock is held from load
    /// through release, so concurrent requests for the same variant queue
    /// rather than each holding their own copy.
    pub fn with_model<R>(
        &self,
        variant: Variant,
        f: impl FnOnce(&dyn EmotionModel) -> Result<R, ModelError>,
    ) -> Result<R, ModelError> {
        match self.config.strategy {
            Strategy::Resident => {
                let model = self.ensure_model_loaded(variant)?;
                f(model.as_ref())
            }
            Strategy::JustInTime => {
                let meta = self.ensure_metadata_loaded()?;
                require_variant(&meta, variant)?;

                let slot = self.slot(variant);
                let mut guard = slot.lock();
                let model = match guard.take() {
                    Some(model) => model,
                    None => self.load_model(variant, &meta)?,
                };

                let result = f(model.as_ref());

                drop(model);
                slot.set(ModelState::Absent);
                drop(guard);
                debug!(%variant, "model released after use");
                result
            }
        }
    }

    /// Apply the startup policy. Failures are logged, not returned, so the
    /// service still comes up and reports unavailability per request.
    pub fn warm_up(&self) {
        if self.config.startup == Startup::Lazy {
            return;
        }
        let meta = match self.ensure_metadata_loaded() {
            Ok(meta) => meta,
            Err(_) => return,
        };
        if self.config.strategy == Strategy::Resident {
            for variant in meta.available() {
                if let Err(e) = self.ensure_model_loaded(variant) {
                    warn!(%variant, error = %e, "eager model load failed");
                }
            }
        }
    }

    /// Build a model from disk, walking the state machine. Caller holds the slot lock.
    fn load_model(
        &self,
        variant: Variant,
        meta: &Metadata,
    ) -> Result<Arc<dyn EmotionModel>, ModelError> {
        let slot = self.slot(variant);
        slot.set(ModelState::Loading);
        let start = Instant::now();

        match self.build_model(variant, meta, slot) {
            Ok(model) => {
                slot.loads.fetch_add(1, Ordering::SeqCst);
                info!(
                    %variant,
                    state = ?slot.get(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "model resident"
                );
                Ok(model)
            }
            Err(e) => {
                slot.set(ModelState::Absent);
                error!(%variant, error = %e, "model load failed");
                Err(e)
            }
        }
    }

    fn build_model(
        &self,
        variant: Variant,
        meta: &Metadata,
        slot: &Slot,
    ) -> Result<Arc<dyn EmotionModel>, ModelError> {
        let state = self.source.read_state(variant)?;
        let encoder =
            self.backend
                .load_encoder(&self.config.model_dir, variant, self.config.quantize)?;
        let weights = WeightLoader::new(variant, state, self.config.load_mode);

        let (full, _report) = FullPrecisionModel::build(
            variant,
            encoder,
            meta.labels.len(),
            self.config.hidden_dim,
            weights,
        )?;
        slot.set(ModelState::ResidentFullPrecision);

        let model = if self.config.quantize {
            let model = full.quantize();
            slot.set(ModelState::ResidentQuantized);
            model
        } else {
            full.into_model()
        };
        Ok(Arc::from(model))
    }
}

fn require_variant(meta: &Metadata, variant: Variant) -> Result<(), ModelError> {
    match meta.variant(variant) {
        Some(_) => Ok(()),
        None => Err(ModelError::Unavailable(format!(
            "{variant} checkpoint not available"
        ))),
    }
}

/// Labels from the CoTEG checkpoint, else the baseline one, else GoEmotions.
fn shared_labels(raw: &[Option<CheckpointMeta>; 2]) -> LabelSet {
    for variant in Variant::ALL {
        let Some(names) = raw[variant.index()]
            .as_ref()
            .and_then(|m| m.labels.clone())
        else {
            continue;
        };
        match LabelSet::new(names) {
            Ok(labels) => return labels,
            Err(e) => warn!(%variant, error = %e, "invalid checkpoint labels ignored"),
        }
    }
    LabelSet::go_emotions()
}

/// Thresholds and metrics for one variant, aligned with the shared labels.
///
/// Returns `None` when the checkpoint's own labels cannot align with the
/// shared set, since its head would have the wrong width.
fn variant_meta(variant: Variant, meta: CheckpointMeta, labels: &LabelSet) -> Option<VariantMeta> {
    if let Some(own) = &meta.labels {
        if own.len() != labels.len() {
            error!(
                %variant,
                own = own.len(),
                shared = labels.len(),
                "checkpoint label count differs from shared labels, variant disabled"
            );
            return None;
        }
        if own.as_slice() != labels.as_slice() {
            warn!(%variant, "checkpoint label names differ from shared labels");
        }
    }

    let thresholds = match meta.thresholds {
        Some(values) => ThresholdVector::new(values, labels).unwrap_or_else(|e| {
            warn!(%variant, error = %e, "thresholds misaligned, using defaults");
            ThresholdVector::uniform(labels)
        }),
        None => ThresholdVector::uniform(labels),
    };

    Some(VariantMeta {
        thresholds,
        metrics: meta.metrics.unwrap_or_default(),
    })
}
