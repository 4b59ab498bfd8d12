//! The forward-step collaborator.
//!
//! A forward step is one stateless call into an inference engine: it takes
//! the new token ids together with all past keys/values and returns the
//! logits for those tokens plus the caches extended by them. The decode loop
//! never looks inside; it only routes tensors.

use crate::state::LayerCache;
use crate::tensor::Logits;

/// Inputs to one forward step.
#[derive(Debug)]
pub struct StepInput<'a> {
    /// Tokens to run, `[1, seq_len]`. The whole prompt on prefill, one token after.
    pub input_ids: &'a [i64],
    /// Mask over all cached and new positions, `[1, past_len + seq_len]`.
    pub attention_mask: &'a [i64],
    /// Absolute positions of `input_ids`, `[1, seq_len]`.
    pub position_ids: &'a [i64],
    /// Past keys/values indexed by layer, owned by the callee for the call.
    pub past: Vec<LayerCache>,
}

impl StepInput<'_> {
    #[inline]
    pub fn seq_len(&self) -> usize {
        self.input_ids.len()
    }

    /// Positions already held in the past caches.
    #[inline]
    pub fn past_len(&self) -> usize {
        self.past.first().map_or(0, |c| c.key.cached_len())
    }
}

/// Outputs of one forward step.
#[derive(Debug)]
pub struct StepOutput {
    /// Scores, `[1, seq_len, vocab_size]`.
    pub logits: Logits,
    /// Past caches with the new positions appended.
    pub caches: Vec<LayerCache>,
}

/// A stateless "run one forward step" capability.
///
/// Takes `&self` so one model handle can serve many concurrent requests.
pub trait ForwardStep {
    type Error: std::error::Error + Send + Sync + 'static;

    fn forward(&self, input: StepInput<'_>) -> Result<StepOutput, Self::Error>;
}

impl<F, E> ForwardStep for F
where
    F: Fn(StepInput<'_>) -> Result<StepOutput, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    fn forward(&self, input: StepInput<'_>) -> Result<StepOutput, E> {
        self(input)
    }
}
