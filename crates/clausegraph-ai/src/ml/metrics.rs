use serde::{Deserialize, Serialize};

/// Held-out evaluation of a trained classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub accuracy: f32,
    pub weighted_f1: f32,
    pub train_size: usize,
    pub test_size: usize,
    pub final_loss: f32,
    pub epochs: usize,
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f32 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f32 / y_true.len() as f32
}

/// F1 per class weighted by the class's support in `y_true`.
///
/// Classes absent from `y_true` carry zero weight; a class with no true or predicted positives
/// contributes an F1 of zero.
pub fn weighted_f1(y_true: &[usize], y_pred: &[usize], num_classes: usize) -> f32 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mut tp = vec![0usize; num_classes];
    let mut fp = vec![0usize; num_classes];
    let mut fn_ = vec![0usize; num_classes];
    let mut support = vec![0usize; num_classes];

    for (&t, &p) in y_true.iter().zip(y_pred) {
        support[t] += 1;
        if t == p {
            tp[t] += 1;
        } else {
            fn_[t] += 1;
            if p < num_classes {
                fp[p] += 1;
            }
        }
    }

    let total = y_true.len() as f32;
    (0..num_classes)
        .filter(|&c| support[c] > 0)
        .map(|c| {
            let precision = ratio(tp[c], tp[c] + fp[c]);
            let recall = ratio(tp[c], tp[c] + fn_[c]);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            f1 * support[c] as f32 / total
        })
        .sum()
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.0
    } else {
        num as f32 / den as f32
    }
}
