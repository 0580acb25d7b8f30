//! Probability aggregation and the multi-label threshold decision.

use crate::labels::ThresholdVector;

/// A top-scoring label is still reported when nothing clears its threshold,
/// provided its probability exceeds this floor.
pub const FALLBACK_FLOOR: f32 = 0.15;

/// Elementwise logistic sigmoid.
pub fn sigmoid(logits: &[f32]) -> Vec<f32> {
    logits.iter().map(|&x| 1.0 / (1.0 + (-x).exp())).collect()
}

/// Merge per-chunk probability vectors by per-label maximum.
///
/// A label counts as present if any chunk expresses it strongly. Returns
/// `None` for an empty input. All vectors must have the same length.
pub fn max_pool<I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = Vec<f32>>,
{
    let mut iter = vectors.into_iter();
    let mut acc = iter.next()?;
    for v in iter {
        debug_assert_eq!(v.len(), acc.len(), "score vectors must align");
        for (a, &p) in acc.iter_mut().zip(&v) {
            if p > *a {
                *a = p;
            }
        }
    }
    Some(acc)
}

/// Select label indices from aggregated probabilities.
///
/// Index `i` is selected iff `probs[i] > thresholds[i]` (strict). If nothing
/// is selected, the single highest-probability index is returned when it
/// exceeds [`FALLBACK_FLOOR`]; otherwise the selection stays empty.
/// Indices are returned in ascending order.
pub fn decide(probs: &[f32], thresholds: &ThresholdVector) -> Vec<usize> {
    let selected: Vec<usize> = probs
        .iter()
        .zip(thresholds.as_slice())
        .enumerate()
        .filter(|(_, (p, t))| p > t)
        .map(|(i, _)| i)
        .collect();

    if !selected.is_empty() {
        return selected;
    }

    // First index wins ties.
    let best = probs
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
            Some((_, top)) if p <= top => best,
            _ => Some((i, p)),
        });

    match best {
        Some((i, p)) if p > FALLBACK_FLOOR => vec![i],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelSet;

    fn labels(n: usize) -> LabelSet {
        LabelSet::new((0..n).map(|i| format!("l{i}")).collect()).unwrap()
    }

    fn thresholds(values: &[f32]) -> ThresholdVector {
        ThresholdVector::new(values.to_vec(), &labels(values.len())).unwrap()
    }

    #[test]
    fn sigmoid_midpoint_and_bounds() {
        let p = sigmoid(&[0.0, 40.0, -40.0]);
        assert!((p[0] - 0.5).abs() < 1e-6);
        assert!(p[1] <= 1.0 && p[1] > 0.999);
        assert!(p[2] >= 0.0 && p[2] < 0.001);
    }

    #[test]
    fn max_pool_takes_elementwise_max() {
        let pooled = max_pool(vec![vec![0.1, 0.9], vec![0.8, 0.2]]).unwrap();
        assert_eq!(pooled, vec![0.8, 0.9]);
    }

    #[test]
    fn max_pool_single_vector_is_identity() {
        assert_eq!(max_pool(vec![vec![0.3, 0.4]]), Some(vec![0.3, 0.4]));
    }

    #[test]
    fn max_pool_empty_is_none() {
        assert_eq!(max_pool(Vec::<Vec<f32>>::new()), None);
    }

    #[test]
    fn selects_strictly_above_threshold() {
        let thr = thresholds(&[0.3, 0.5, 0.2]);
        assert_eq!(decide(&[0.31, 0.5, 0.9], &thr), vec![0, 2]);
    }

    #[test]
    fn equal_to_threshold_is_not_selected() {
        let thr = thresholds(&[0.4, 0.4]);
        // 0.4 == 0.4 on both labels; fallback picks the top one since 0.4 > floor.
        assert_eq!(decide(&[0.4, 0.1], &thr), vec![0]);

        let thr = thresholds(&[0.5, 0.9]);
        let selected = decide(&[0.5, 0.95], &thr);
        assert_eq!(selected, vec![1], "0.5 == 0.5 must not be selected");
    }

    #[test]
    fn all_zero_probabilities_select_nothing() {
        let thr = thresholds(&[0.3; 4]);
        assert!(decide(&[0.0; 4], &thr).is_empty());
    }

    #[test]
    fn fallback_picks_single_label_above_floor() {
        let thr = thresholds(&[0.3; 5]);
        assert_eq!(decide(&[0.0, 0.0, 0.2, 0.0, 0.0], &thr), vec![2]);
    }

    #[test]
    fn fallback_tie_picks_first_label() {
        let thr = thresholds(&[0.9; 4]);
        assert_eq!(decide(&[0.1, 0.6, 0.6, 0.6], &thr), vec![1]);
        assert_eq!(decide(&[0.4, 0.4, 0.0, 0.0], &thr), vec![0]);
    }

    #[test]
    fn fallback_respects_floor_boundary() {
        let thr = thresholds(&[0.3; 3]);
        assert!(decide(&[0.15, 0.1, 0.05], &thr).is_empty());
        assert_eq!(decide(&[0.1, 0.151, 0.05], &thr), vec![1]);
    }
}
