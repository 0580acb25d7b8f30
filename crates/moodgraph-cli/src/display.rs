//! Terminal rendering for predictions and checkpoint metadata.

use moodgraph_ai::Metadata;
use moodgraph_core::{Metrics, PredictResponse, PredictionResult, Variant};

const TOP_SCORES: usize = 8;

/// Print each variant's decision followed by its highest-scoring labels.
pub fn print_prediction(text: &str, response: &PredictResponse) {
    println!("=== {text} ===");
    println!();
    for variant in Variant::ALL {
        match response.get(variant) {
            Some(result) => print_result(variant, result),
            None => {
                println!("{variant}");
                println!("  (unavailable)");
                println!();
            }
        }
    }
}

fn print_result(variant: Variant, result: &PredictionResult) {
    println!("{variant}{}", metrics_suffix(&result.metrics));
    if result.predicted.is_empty() {
        println!("  {:<16} (none)", "predicted");
    } else {
        println!("  {:<16} {}", "predicted", result.predicted.join(", "));
    }

    let mut ranked: Vec<(&String, &f32)> = result.scores.iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(a.1));
    for (label, score) in ranked.into_iter().take(TOP_SCORES) {
        let thr = result.thresholds.get(label).copied().unwrap_or_default();
        let mark = if result.predicted.contains(label) { "*" } else { " " };
        println!("  {mark} {label:<14} {score:.3}  (thr {thr:.2})");
    }
    println!();
}

/// Print the shared label set and each variant's thresholds and metrics.
pub fn print_metadata(meta: &Metadata) {
    println!("=== labels ({}) ===", meta.labels.len());
    println!("{}", meta.labels.as_slice().join(", "));
    println!();

    for variant in Variant::ALL {
        let Some(params) = meta.variant(variant) else {
            println!("{variant}");
            println!("  (unavailable)");
            println!();
            continue;
        };
        println!("{variant}{}", metrics_suffix(&params.metrics));
        for (label, thr) in meta.labels.iter().zip(params.thresholds.as_slice()) {
            println!("  {label:<16} {thr:.2}");
        }
        println!();
    }
}

fn metrics_suffix(metrics: &Metrics) -> String {
    if metrics.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = metrics.iter().map(|(k, v)| format!("{k} {v}")).collect();
    format!(" ({})", parts.join(", "))
}
