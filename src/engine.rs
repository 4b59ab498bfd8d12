//! Autoregressive decode loop over a KV-cached forward step.
//!
//! The prompt is run once (prefill); afterwards each step feeds only the
//! newest token and relies on the returned caches to carry all prior
//! context, so the collaborator is called exactly once per generated token.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::config::{CacheLayout, GenerationConfig};
use crate::error::{DecodeError, Result};
use crate::sample::greedy;
use crate::state::GenerationState;
use crate::step::{ForwardStep, StepInput};

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model produced the end-of-sequence token.
    Eos,
    /// The sequence reached `max_length`.
    MaxLength,
    /// The caller cancelled between steps.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Eos => write!(f, "eos"),
            StopReason::MaxLength => write!(f, "max_length"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    /// Prompt followed by every appended token. Never ends in EOS.
    pub token_ids: Vec<i64>,
    /// Number of prompt tokens at the front of `token_ids`.
    pub prompt_tokens: usize,
    pub stop_reason: StopReason,
    /// Forward steps performed.
    pub steps: usize,
}

impl GenerationOutput {
    /// Tokens appended after the prompt.
    pub fn new_tokens(&self) -> &[i64] {
        &self.token_ids[self.prompt_tokens..]
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop_reason == StopReason::Cancelled
    }
}

/// Cooperative cancellation flag, checked before every step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Generate greedily from `prompt_ids` until EOS or `config.max_length`.
pub fn generate<S>(
    step: &S,
    prompt_ids: &[i64],
    layout: CacheLayout,
    config: &GenerationConfig,
    cancel: &CancelToken,
) -> Result<GenerationOutput>
where
    S: ForwardStep + ?Sized,
{
    generate_streaming(step, prompt_ids, layout, config, cancel, |_| {})
}

/// Like [`generate`], calling `on_token` for every appended token.
pub fn generate_streaming<S, F>(
    step: &S,
    prompt_ids: &[i64],
    layout: CacheLayout,
    config: &GenerationConfig,
    cancel: &CancelToken,
    mut on_token: F,
) -> Result<GenerationOutput>
where
    S: ForwardStep + ?Sized,
    F: FnMut(i64),
{
    if config.max_length == 0 {
        return Err(DecodeError::InvalidArgument(
            "max_length must be positive".into(),
        ));
    }
    let mut state = GenerationState::new(prompt_ids, layout)?;

    let mut stop_reason = StopReason::MaxLength;
    while !state.is_finished() {
        if state.len() >= config.max_length {
            stop_reason = StopReason::MaxLength;
            state.finish();
        } else if cancel.is_cancelled() {
            warn!(generated = state.len(), "generation cancelled");
            stop_reason = StopReason::Cancelled;
            state.finish();
        } else {
            let next = decode_step(step, &mut state)?;
            if next == config.eos_id {
                stop_reason = StopReason::Eos;
                state.finish();
            } else {
                state.commit(next);
                on_token(next);
            }
        }
    }

    let steps = state.steps();
    let prompt_tokens = state.prompt_len();
    let token_ids = state.into_ids();
    info!(
        %stop_reason,
        steps,
        generated = token_ids.len() - prompt_tokens,
        "generation finished"
    );

    Ok(GenerationOutput {
        token_ids,
        prompt_tokens,
        stop_reason,
        steps,
    })
}

/// Run one forward step and select the next token greedily.
///
/// The returned caches are installed before the token is handed back.
fn decode_step<S>(step: &S, state: &mut GenerationState) -> Result<i64>
where
    S: ForwardStep + ?Sized,
{
    let position_ids = state.position_ids();
    let past = state.take_caches();
    let input = StepInput {
        input_ids: state.input_ids(),
        attention_mask: state.attention_mask(),
        position_ids: &position_ids,
        past,
    };
    let seq_len = input.seq_len();

    let output = step.forward(input).map_err(DecodeError::collaborator)?;
    if output.logits.seq_len() != seq_len {
        return Err(DecodeError::collaborator(format!(
            "expected logits for {} positions, got {}",
            seq_len,
            output.logits.seq_len()
        )));
    }

    let next = greedy(&output.logits)?;
    let cached_len = state.install_caches(output.caches)?;
    debug!(
        step = state.steps(),
        input_len = seq_len,
        cached_len,
        token = next,
        "decode step"
    );
    Ok(next)
}
