//! Greedy token selection.

use crate::error::{DecodeError, Result};
use crate::tensor::Logits;

/// Returns the index of the maximum element, the lowest index on ties.
///
/// NaN scores never win against a finite one.
#[inline]
pub fn argmax(x: &[f32]) -> Option<usize> {
    let (&first, rest) = x.split_first()?;
    let mut max_idx = 0;
    let mut max_val = first;
    for (i, &v) in rest.iter().enumerate() {
        if v > max_val || (max_val.is_nan() && !v.is_nan()) {
            max_val = v;
            max_idx = i + 1;
        }
    }
    Some(max_idx)
}

/// Pick the next token from the scores at the last position.
pub fn greedy(logits: &Logits) -> Result<i64> {
    let row = logits
        .last()
        .ok_or_else(|| DecodeError::collaborator("forward step returned no logits"))?;
    argmax(row)
        .map(|i| i as i64)
        .ok_or_else(|| DecodeError::collaborator("forward step returned an empty vocabulary"))
}
