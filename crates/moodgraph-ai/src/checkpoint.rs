//! Checkpoint Store: safetensors files holding weight state plus metadata.
//!
//! Each variant has one file, `<variant>_model.safetensors`. The tensors are
//! the weight state; the header's `__metadata__` string map carries the
//! optional JSON-encoded `labels`, `thr` and `metrics` fields.
//!
//! Metadata reads parse only the header, so asking for labels and
//! thresholds never pulls the weights off disk.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use moodgraph_core::{Metrics, Variant};
use safetensors::{Dtype, SafeTensors};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::ModelError;
use crate::weights::{StateDict, TensorData, normalize_key};

/// Upper bound on a safetensors JSON header.
const MAX_HEADER_BYTES: u64 = 100 * 1024 * 1024;

/// Accepted metadata key names, canonical first.
const LABEL_KEYS: &[&str] = &["labels", "label_names"];
const THRESHOLD_KEYS: &[&str] = &["thr", "thresholds"];
const METRICS_KEYS: &[&str] = &["metrics"];

/// Checkpoint file name for a variant.
pub fn checkpoint_file(variant: Variant) -> String {
    format!("{variant}_model.safetensors")
}

/// Typed view of a checkpoint's optional metadata fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointMeta {
    pub labels: Option<Vec<String>>,
    pub thresholds: Option<Vec<f32>>,
    pub metrics: Option<Metrics>,
}

impl CheckpointMeta {
    /// Normalise a raw `__metadata__` map, accepting legacy key names.
    ///
    /// A field whose JSON does not parse is logged and treated as absent.
    pub fn from_raw(variant: Variant, raw: &HashMap<String, String>) -> Self {
        Self {
            labels: field(variant, raw, LABEL_KEYS),
            thresholds: field(variant, raw, THRESHOLD_KEYS),
            metrics: field(variant, raw, METRICS_KEYS),
        }
    }

    /// Encode back into a `__metadata__` map using canonical key names.
    pub fn to_raw(&self) -> HashMap<String, String> {
        let mut raw = HashMap::new();
        if let Some(labels) = &self.labels {
            raw.insert(LABEL_KEYS[0].to_string(), json(labels));
        }
        if let Some(thr) = &self.thresholds {
            raw.insert(THRESHOLD_KEYS[0].to_string(), json(thr));
        }
        if let Some(metrics) = &self.metrics {
            raw.insert(METRICS_KEYS[0].to_string(), json(metrics));
        }
        raw
    }
}

fn field<T: DeserializeOwned>(
    variant: Variant,
    raw: &HashMap<String, String>,
    keys: &[&str],
) -> Option<T> {
    let (key, value) = keys
        .iter()
        .find_map(|k| raw.get(*k).map(|v| (*k, v)))?;
    match serde_json::from_str(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(%variant, key, error = %e, "malformed checkpoint metadata, using default");
            None
        }
    }
}

fn json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Read access to the two checkpoints.
pub trait CheckpointSource: Send + Sync {
    /// Labels, thresholds and metrics only.
    fn read_meta(&self, variant: Variant) -> Result<CheckpointMeta, ModelError>;

    /// The full weight state.
    fn read_state(&self, variant: Variant) -> Result<StateDict, ModelError>;
}

/// Checkpoints stored as files in one directory.
///
/// Counts reads so callers can verify caching behaviour.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    meta_reads: AtomicUsize,
    state_reads: AtomicUsize,
}

#[derive(Deserialize)]
struct Header {
    #[serde(rename = "__metadata__", default)]
    metadata: Option<HashMap<String, String>>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            meta_reads: AtomicUsize::new(0),
            state_reads: AtomicUsize::new(0),
        }
    }

    pub fn path(&self, variant: Variant) -> PathBuf {
        self.dir.join(checkpoint_file(variant))
    }

    /// Number of metadata reads that reached the filesystem.
    pub fn meta_reads(&self) -> usize {
        self.meta_reads.load(Ordering::Relaxed)
    }

    /// Number of weight-state reads that reached the filesystem.
    pub fn state_reads(&self) -> usize {
        self.state_reads.load(Ordering::Relaxed)
    }

    fn open(&self, variant: Variant) -> Result<(PathBuf, File), ModelError> {
        let path = self.path(variant);
        match File::open(&path) {
            Ok(f) => Ok((path, f)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ModelError::Configuration(path)),
            Err(e) => Err(ModelError::load(variant, format!("{}: {e}", path.display()))),
        }
    }
}

impl CheckpointSource for FileCheckpointStore {
    fn read_meta(&self, variant: Variant) -> Result<CheckpointMeta, ModelError> {
        let (path, mut file) = self.open(variant)?;
        self.meta_reads.fetch_add(1, Ordering::Relaxed);

        let mut len = [0u8; 8];
        file.read_exact(&mut len)
            .map_err(|e| ModelError::load(variant, format!("header length: {e}")))?;
        let n = u64::from_le_bytes(len);
        if n > MAX_HEADER_BYTES {
            return Err(ModelError::load(variant, format!("header too large: {n} bytes")));
        }

        let mut header = Vec::with_capacity(n as usize);
        file.take(n)
            .read_to_end(&mut header)
            .map_err(|e| ModelError::load(variant, format!("header: {e}")))?;
        if header.len() as u64 != n {
            return Err(ModelError::load(variant, "truncated header"));
        }

        let parsed: Header = serde_json::from_slice(&header)
            .map_err(|e| ModelError::load(variant, format!("header json: {e}")))?;
        drop(header);

        debug!(%variant, path = %path.display(), "read checkpoint metadata");
        Ok(CheckpointMeta::from_raw(
            variant,
            &parsed.metadata.unwrap_or_default(),
        ))
    }

    fn read_state(&self, variant: Variant) -> Result<StateDict, ModelError> {
        let (path, mut file) = self.open(variant)?;
        self.state_reads.fetch_add(1, Ordering::Relaxed);

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| ModelError::load(variant, format!("{}: {e}", path.display())))?;
        let state = decode_state(variant, &bytes)?;
        drop(bytes);

        debug!(%variant, tensors = state.len(), path = %path.display(), "read weight state");
        Ok(state)
    }
}

/// Copy every supported tensor out of a safetensors buffer.
///
/// Tensors with dtypes other than F32/F64 are logged and left out.
pub fn decode_state(variant: Variant, bytes: &[u8]) -> Result<StateDict, ModelError> {
    let tensors = SafeTensors::deserialize(bytes)
        .map_err(|e| ModelError::load(variant, format!("safetensors: {e}")))?;

    let mut state = StateDict::new();
    for (name, view) in tensors.tensors() {
        let values: Vec<f32> = match view.dtype() {
            Dtype::F32 => view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            Dtype::F64 => view
                .data()
                .chunks_exact(8)
                .map(|b| {
                    f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
                })
                .collect(),
            other => {
                warn!(%variant, tensor = %name, dtype = ?other, "unsupported dtype, tensor skipped");
                continue;
            }
        };
        state.insert(
            normalize_key(&name).to_string(),
            TensorData::new(view.shape().to_vec(), values),
        );
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixtureSpec, write_checkpoint};

    #[test]
    fn meta_reads_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let spec = FixtureSpec::new(vec!["joy".into(), "fear".into()], 8)
            .with_thresholds(vec![0.4, 0.2])
            .with_metric("macro_f1", 0.51);
        write_checkpoint(dir.path(), Variant::Baseline, &spec).unwrap();

        let store = FileCheckpointStore::new(dir.path());
        let meta = store.read_meta(Variant::Baseline).unwrap();

        assert_eq!(meta.labels.as_deref(), Some(&["joy".to_string(), "fear".to_string()][..]));
        assert_eq!(meta.thresholds, Some(vec![0.4, 0.2]));
        assert_eq!(meta.metrics.unwrap()["macro_f1"], serde_json::json!(0.51));
        assert_eq!(store.meta_reads(), 1);
        assert_eq!(store.state_reads(), 0);
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(matches!(
            store.read_meta(Variant::Coteg),
            Err(ModelError::Configuration(_))
        ));
    }

    #[test]
    fn legacy_metadata_keys_are_accepted() {
        let mut raw = HashMap::new();
        raw.insert("label_names".to_string(), r#"["a","b"]"#.to_string());
        raw.insert("thresholds".to_string(), "[0.1, 0.9]".to_string());
        let meta = CheckpointMeta::from_raw(Variant::Coteg, &raw);
        assert_eq!(meta.labels, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(meta.thresholds, Some(vec![0.1, 0.9]));
        assert!(meta.metrics.is_none());
    }

    #[test]
    fn malformed_metadata_field_is_absent() {
        let mut raw = HashMap::new();
        raw.insert("thr".to_string(), "not json".to_string());
        raw.insert("labels".to_string(), r#"["x"]"#.to_string());
        let meta = CheckpointMeta::from_raw(Variant::Baseline, &raw);
        assert!(meta.thresholds.is_none());
        assert_eq!(meta.labels, Some(vec!["x".to_string()]));
    }

    #[test]
    fn state_read_normalizes_prefixed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let spec = FixtureSpec::new(vec!["joy".into(), "fear".into()], 4).with_key_prefix("state_dict.");
        write_checkpoint(dir.path(), Variant::Baseline, &spec).unwrap();

        let store = FileCheckpointStore::new(dir.path());
        let state = store.read_state(Variant::Baseline).unwrap();
        assert_eq!(state["classifier.weight"].shape, vec![2, 4]);
        assert_eq!(state["classifier.bias"].shape, vec![2]);
        assert_eq!(store.state_reads(), 1);
    }

    #[test]
    fn unreadable_weights_are_load_error() {
        let dir = tempfile::tempdir().unwrap();
        // Opening a directory succeeds on unix; reading from it does not.
        std::fs::create_dir(dir.path().join(checkpoint_file(Variant::Baseline))).unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let err = store.read_state(Variant::Baseline).unwrap_err();
        assert!(matches!(err, ModelError::Load { .. }), "{err}");
        assert!(err.is_availability());
    }

    #[test]
    fn garbage_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(checkpoint_file(Variant::Coteg)), b"nope").unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(matches!(
            store.read_meta(Variant::Coteg),
            Err(ModelError::Load { .. })
        ));
    }
}
