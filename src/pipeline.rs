//! Text in, text out: tokenizer and forward step wired around the decode loop.

use tracing::info;

use crate::config::{CacheLayout, GenerationConfig};
use crate::engine::{CancelToken, StopReason, generate_streaming};
use crate::error::{DecodeError, Result};
use crate::step::ForwardStep;
use crate::tokenizer::Tokenizer;

/// Prompt used by the command line tool when none is given.
pub const DEFAULT_PROMPT: &str = "The future of artificial intelligence is";

/// Tokens generated after the prompt when no budget is given.
pub const DEFAULT_MAX_NEW_TOKENS: usize = 30;

/// Generated text and the ids it was decoded from.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Decoded prompt plus continuation, special tokens skipped.
    pub text: String,
    pub token_ids: Vec<i64>,
    pub prompt_tokens: usize,
    pub stop_reason: StopReason,
    /// Forward steps performed.
    pub steps: usize,
}

impl Completion {
    /// Number of tokens appended after the prompt.
    pub fn generated(&self) -> usize {
        self.token_ids.len() - self.prompt_tokens
    }
}

/// Owns a tokenizer and a forward step; built once and reused across calls.
pub struct TextGenerator<T, S> {
    tokenizer: T,
    step: S,
    layout: CacheLayout,
}

impl<T, S> TextGenerator<T, S>
where
    T: Tokenizer,
    S: ForwardStep,
{
    pub fn new(tokenizer: T, step: S, layout: CacheLayout) -> Self {
        TextGenerator {
            tokenizer,
            step,
            layout,
        }
    }

    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    pub fn step(&self) -> &S {
        &self.step
    }

    /// Generate up to `max_length` tokens (prompt included).
    pub fn generate(&self, prompt: &str, max_length: usize) -> Result<Completion> {
        self.generate_with(prompt, max_length, &CancelToken::new(), |_| {})
    }

    /// Generate up to `max_new_tokens` tokens after the prompt.
    ///
    /// The sequence budget is the encoded prompt length plus `max_new_tokens`,
    /// so long prompts still leave room to generate.
    pub fn generate_new_tokens(&self, prompt: &str, max_new_tokens: usize) -> Result<Completion> {
        let prompt_ids = self.encode(prompt)?;
        let max_length = prompt_ids.len() + max_new_tokens;
        self.run(prompt_ids, max_length, &CancelToken::new(), |_| {})
    }

    /// Generate with a cancellation token, calling `on_token` per new token.
    pub fn generate_with<F>(
        &self,
        prompt: &str,
        max_length: usize,
        cancel: &CancelToken,
        on_token: F,
    ) -> Result<Completion>
    where
        F: FnMut(i64),
    {
        let prompt_ids = self.encode(prompt)?;
        self.run(prompt_ids, max_length, cancel, on_token)
    }

    fn encode(&self, prompt: &str) -> Result<Vec<i64>> {
        let prompt_ids = self.tokenizer.encode(prompt)?;
        if prompt_ids.is_empty() {
            return Err(DecodeError::InvalidArgument(
                "prompt tokenized to an empty sequence".into(),
            ));
        }
        Ok(prompt_ids)
    }

    fn run<F>(
        &self,
        prompt_ids: Vec<i64>,
        max_length: usize,
        cancel: &CancelToken,
        on_token: F,
    ) -> Result<Completion>
    where
        F: FnMut(i64),
    {
        info!(prompt_tokens = prompt_ids.len(), max_length, "generating");

        let config = GenerationConfig {
            max_length,
            eos_id: self.tokenizer.eos_id(),
        };
        let output = generate_streaming(
            &self.step,
            &prompt_ids,
            self.layout,
            &config,
            cancel,
            on_token,
        )?;

        let text = self.tokenizer.decode(&output.token_ids, true)?;
        Ok(Completion {
            text,
            token_ids: output.token_ids,
            prompt_tokens: output.prompt_tokens,
            stop_reason: output.stop_reason,
            steps: output.steps,
        })
    }
}
