use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("label set is empty")]
    EmptyLabels,

    #[error("duplicate label: {0}")]
    DuplicateLabel(String),

    #[error("threshold count {thresholds} does not match label count {labels}")]
    ThresholdMismatch { labels: usize, thresholds: usize },

    #[error("score vector has {scores} entries, expected {labels}")]
    ScoreMismatch { labels: usize, scores: usize },
}
