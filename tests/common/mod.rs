#![allow(dead_code)]

use std::sync::Mutex;

use llama_decode::{
    CacheLayout, ForwardStep, KvTensor, LayerCache, Logits, StepInput, StepOutput,
};

#[derive(Debug, thiserror::Error)]
#[error("stub failure at call {0}")]
pub struct StubError(pub usize);

/// What the stub saw on one call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub position_ids: Vec<i64>,
    /// Cached length of every key and value tensor passed in.
    pub past_lens: Vec<usize>,
}

impl CallRecord {
    pub fn past_len(&self) -> usize {
        self.past_lens.first().copied().unwrap_or(0)
    }
}

/// Scripted collaborator: call `i` scores `rows[i]` at the last position
/// and grows every cache by the input length.
pub struct ScriptedStep {
    pub layout: CacheLayout,
    rows: Vec<Vec<f32>>,
    fail_at: Option<usize>,
    skew_at: Option<usize>,
    short_logits_at: Option<usize>,
    calls: Mutex<Vec<CallRecord>>,
}

impl ScriptedStep {
    /// Emit `tokens[i]` on call `i`; past the end, keep emitting the last one.
    pub fn from_tokens(layout: CacheLayout, vocab_size: usize, tokens: &[i64]) -> Self {
        let rows = tokens
            .iter()
            .map(|&t| {
                let mut row = vec![0.0; vocab_size];
                row[t as usize] = 1.0;
                row
            })
            .collect();
        Self::from_rows(layout, rows)
    }

    pub fn from_rows(layout: CacheLayout, rows: Vec<Vec<f32>>) -> Self {
        ScriptedStep {
            layout,
            rows,
            fail_at: None,
            skew_at: None,
            short_logits_at: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    /// On `call`, return a last layer one position longer than the rest.
    pub fn skewing_at(mut self, call: usize) -> Self {
        self.skew_at = Some(call);
        self
    }

    /// On `call`, return logits for one position fewer than requested.
    pub fn short_logits_at(mut self, call: usize) -> Self {
        self.short_logits_at = Some(call);
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    fn grow(&self, tensor: &KvTensor, by: usize, fill: f32) -> KvTensor {
        let shape = [1, self.layout.n_kv_heads, by, self.layout.head_dim];
        let slice = KvTensor::from_vec(shape, vec![fill; self.layout.kv_dim() * by]).unwrap();
        tensor.concat(&slice).unwrap()
    }
}

impl ForwardStep for ScriptedStep {
    type Error = StubError;

    fn forward(&self, input: StepInput<'_>) -> Result<StepOutput, StubError> {
        let mut calls = self.calls.lock().unwrap();
        let call = calls.len();
        calls.push(CallRecord {
            input_ids: input.input_ids.to_vec(),
            attention_mask: input.attention_mask.to_vec(),
            position_ids: input.position_ids.to_vec(),
            past_lens: input
                .past
                .iter()
                .flat_map(|c| [c.key.cached_len(), c.value.cached_len()])
                .collect(),
        });

        if self.fail_at == Some(call) {
            return Err(StubError(call));
        }

        let row = self
            .rows
            .get(call)
            .or_else(|| self.rows.last())
            .cloned()
            .unwrap_or_default();
        let vocab_size = row.len();
        let seq_len = if self.short_logits_at == Some(call) {
            input.seq_len() - 1
        } else {
            input.seq_len()
        };
        let mut data = vec![0.0; seq_len.saturating_sub(1) * vocab_size];
        if seq_len > 0 {
            data.extend(row);
        }
        let logits = Logits::new(seq_len, vocab_size, data).unwrap();

        let by = input.seq_len();
        let n_layers = input.past.len();
        let caches = input
            .past
            .iter()
            .enumerate()
            .map(|(layer, c)| {
                let extra = usize::from(self.skew_at == Some(call) && layer + 1 == n_layers);
                LayerCache {
                    key: self.grow(&c.key, by + extra, call as f32),
                    value: self.grow(&c.value, by + extra, -(call as f32)),
                }
            })
            .collect();

        Ok(StepOutput { logits, caches })
    }
}
