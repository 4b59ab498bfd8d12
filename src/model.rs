//! In-process reference forward step: a small Llama decoder.
//!
//! Takes past keys/values from the caller and returns them extended by the
//! new positions, the same contract as an exported ONNX decoder with
//! `past_key_values.*` inputs and `present.*` outputs.

use rayon::prelude::*;

use crate::config::{CacheLayout, LlamaConfig};
use crate::error::{DecodeError, ModelError, Result};
use crate::ops::{add_assign, dot, matvec, rms_norm, rope, softmax, swiglu};
use crate::state::LayerCache;
use crate::step::{ForwardStep, StepInput, StepOutput};
use crate::tensor::Logits;
use crate::weights::{LlamaLayerWeights, LlamaWeights};

#[derive(Debug, Clone)]
pub struct LlamaModel {
    config: LlamaConfig,
    weights: LlamaWeights,
}

impl LlamaModel {
    pub fn new(config: LlamaConfig, weights: LlamaWeights) -> Result<Self> {
        config.validate()?;
        if weights.layers.len() != config.n_layers
            || weights.embed_tokens.len() != config.vocab_size * config.dim
            || weights.norm.len() != config.dim
        {
            return Err(DecodeError::InvalidModel(
                "weights do not match config".into(),
            ));
        }
        Ok(LlamaModel { config, weights })
    }

    /// A model with seeded synthetic weights.
    pub fn random(config: LlamaConfig, seed: u64) -> Result<Self> {
        let weights = LlamaWeights::random(&config, seed)?;
        Self::new(config, weights)
    }

    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    pub fn cache_layout(&self) -> CacheLayout {
        self.config.cache_layout()
    }

    fn check_input(&self, input: &StepInput<'_>) -> std::result::Result<(), ModelError> {
        let config = &self.config;
        if input.past.len() != config.n_layers {
            return Err(ModelError::LayerCount {
                expected: config.n_layers,
                actual: input.past.len(),
            });
        }
        if input.input_ids.is_empty() || input.position_ids.len() != input.seq_len() {
            return Err(ModelError::MalformedInput(format!(
                "{} input ids with {} position ids",
                input.seq_len(),
                input.position_ids.len()
            )));
        }
        let past_len = input.past_len();
        for (layer, cache) in input.past.iter().enumerate() {
            let (keys, values) = (cache.key.cached_len(), cache.value.cached_len());
            if keys != past_len || values != past_len {
                return Err(ModelError::MalformedInput(format!(
                    "layer {} caches {} keys and {} values, layer 0 caches {}",
                    layer, keys, values, past_len
                )));
            }
        }
        if input.attention_mask.len() != past_len + input.seq_len() {
            return Err(ModelError::MalformedInput(format!(
                "attention mask covers {} positions, expected {}",
                input.attention_mask.len(),
                past_len + input.seq_len()
            )));
        }
        if let Some(&token) = input
            .input_ids
            .iter()
            .find(|&&t| t < 0 || t as usize >= config.vocab_size)
        {
            return Err(ModelError::TokenOutOfRange {
                token,
                vocab_size: config.vocab_size,
            });
        }
        if let Some(&pos) = input
            .position_ids
            .iter()
            .find(|&&p| p < 0 || p as usize >= config.seq_len)
        {
            return Err(ModelError::PositionOutOfRange {
                pos,
                seq_len: config.seq_len,
            });
        }
        Ok(())
    }

    /// Self-attention for one token in one layer, aligned with LlamaAttention.forward.
    fn attention(
        &self,
        x: &mut [f32],
        pos: i64,
        mask: &[i64],
        cache: &mut LayerCache,
        layer: &LlamaLayerWeights,
    ) -> std::result::Result<(), ModelError> {
        let config = &self.config;
        let head_size = config.head_size();
        let group_size = config.group_size();
        let scale = 1.0 / (head_size as f32).sqrt();

        let h = rms_norm(x, &layer.attn_norm);
        let mut q = matvec(&layer.q_proj, &h, config.dim);
        let mut k = matvec(&layer.k_proj, &h, config.kv_dim());
        let v = matvec(&layer.v_proj, &h, config.kv_dim());
        rope(&mut q, pos, head_size, config.rope_theta);
        rope(&mut k, pos, head_size, config.rope_theta);

        cache
            .key
            .push_position(&k)
            .and_then(|_| cache.value.push_position(&v))
            .map_err(|e| ModelError::MalformedInput(e.to_string()))?;

        // Causal: this token sees every cached position up to itself.
        let visible = cache.key.cached_len();
        let mask = &mask[..visible];
        let (keys, values) = (&cache.key, &cache.value);

        let head_outputs: Vec<Vec<f32>> = q
            .par_chunks(head_size)
            .enumerate()
            .map(|(head, qh)| {
                let kv_h = head / group_size;
                let mut att: Vec<f32> = (0..visible)
                    .map(|t| {
                        if mask[t] != 0 {
                            dot(qh, keys.at(kv_h, t)) * scale
                        } else {
                            f32::NEG_INFINITY
                        }
                    })
                    .collect();
                softmax(&mut att);

                let mut out = vec![0.0f32; head_size];
                for t in (0..visible).filter(|&t| mask[t] != 0) {
                    for (o, v) in out.iter_mut().zip(values.at(kv_h, t)) {
                        *o += att[t] * v;
                    }
                }
                out
            })
            .collect();

        let attn = matvec(&layer.o_proj, &head_outputs.concat(), config.dim);
        add_assign(x, &attn);
        Ok(())
    }

    /// FFN for one layer, aligned with LlamaMLP.forward.
    fn mlp(&self, x: &mut [f32], layer: &LlamaLayerWeights) {
        let h = rms_norm(x, &layer.ffn_norm);
        let mut gate = matvec(&layer.gate_proj, &h, self.config.hidden_dim);
        let up = matvec(&layer.up_proj, &h, self.config.hidden_dim);
        swiglu(&mut gate, &up);
        let down = matvec(&layer.down_proj, &gate, self.config.dim);
        add_assign(x, &down);
    }
}

impl ForwardStep for LlamaModel {
    type Error = ModelError;

    fn forward(&self, input: StepInput<'_>) -> std::result::Result<StepOutput, ModelError> {
        self.check_input(&input)?;
        let config = &self.config;
        let past_len = input.past_len();
        let mut caches = input.past;
        let mut logits = Vec::with_capacity(input.input_ids.len() * config.vocab_size);

        for (j, (&token, &pos)) in input.input_ids.iter().zip(input.position_ids).enumerate() {
            let mut x = self.weights.embedding(token as usize, config.dim).to_vec();
            let mask = &input.attention_mask[..past_len + j + 1];

            for (cache, layer) in caches.iter_mut().zip(&self.weights.layers) {
                self.attention(&mut x, pos, mask, cache, layer)?;
                self.mlp(&mut x, layer);
            }

            let x = rms_norm(&x, &self.weights.norm);
            logits.extend(matvec(&self.weights.embed_tokens, &x, config.vocab_size));
        }

        let logits = Logits::new(input.input_ids.len(), config.vocab_size, logits)
            .map_err(|e| ModelError::MalformedInput(e.to_string()))?;
        Ok(StepOutput { logits, caches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::empty_caches;
    use crate::tensor::KvTensor;
    use approx::assert_abs_diff_eq;

    fn model() -> LlamaModel {
        LlamaModel::random(LlamaConfig::tiny(), 42).unwrap()
    }

    fn prefill(model: &LlamaModel, ids: &[i64]) -> StepOutput {
        let mask = vec![1; ids.len()];
        let positions: Vec<i64> = (0..ids.len() as i64).collect();
        model
            .forward(StepInput {
                input_ids: ids,
                attention_mask: &mask,
                position_ids: &positions,
                past: empty_caches(&model.cache_layout()),
            })
            .unwrap()
    }

    #[test]
    fn prefill_grows_caches_by_prompt_length() {
        let model = model();
        let out = prefill(&model, &[10, 20, 30]);
        assert_eq!(out.logits.seq_len(), 3);
        assert_eq!(out.logits.vocab_size(), 259);
        for cache in &out.caches {
            assert_eq!(cache.key.shape(), [1, 4, 3, 8]);
            assert_eq!(cache.value.shape(), [1, 4, 3, 8]);
        }
    }

    #[test]
    fn cached_decode_matches_full_recompute() {
        let model = model();
        let full = prefill(&model, &[10, 20, 30, 40]);

        let head = prefill(&model, &[10, 20, 30]);
        let step = model
            .forward(StepInput {
                input_ids: &[40],
                attention_mask: &[1, 1, 1, 1],
                position_ids: &[3],
                past: head.caches,
            })
            .unwrap();

        assert_eq!(step.logits.seq_len(), 1);
        for (a, b) in full.logits.row(3).iter().zip(step.logits.row(0)) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
        for (a, b) in full.caches.iter().zip(&step.caches) {
            assert_eq!(a.key.cached_len(), b.key.cached_len());
            for (x, y) in a.key.data().iter().zip(b.key.data()) {
                assert_abs_diff_eq!(x, y, epsilon = 1e-5);
            }
        }
    }

    fn perturb_first_position(t: &KvTensor) -> KvTensor {
        let [_, heads, len, dim] = t.shape();
        let mut data = t.data().to_vec();
        for h in 0..heads {
            for v in &mut data[h * len * dim..h * len * dim + dim] {
                *v += 1.0;
            }
        }
        KvTensor::from_vec(t.shape(), data).unwrap()
    }

    #[test]
    fn masked_positions_are_ignored() {
        let model = model();
        let original = prefill(&model, &[10, 20, 30]).caches;
        let perturbed: Vec<LayerCache> = original
            .iter()
            .map(|c| LayerCache {
                key: perturb_first_position(&c.key),
                value: perturb_first_position(&c.value),
            })
            .collect();

        let decode = |past: Vec<LayerCache>, mask: &[i64]| {
            model
                .forward(StepInput {
                    input_ids: &[50],
                    attention_mask: mask,
                    position_ids: &[3],
                    past,
                })
                .unwrap()
                .logits
        };

        let a = decode(original.clone(), &[0, 1, 1, 1]);
        let b = decode(perturbed.clone(), &[0, 1, 1, 1]);
        for (x, y) in a.row(0).iter().zip(b.row(0)) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-5);
        }

        let a = decode(original, &[1, 1, 1, 1]);
        let b = decode(perturbed, &[1, 1, 1, 1]);
        let max_diff = a
            .row(0)
            .iter()
            .zip(b.row(0))
            .map(|(x, y)| (x - y).abs())
            .fold(0.0f32, f32::max);
        assert!(max_diff > 1e-4);
    }

    #[test]
    fn rejects_contract_violations() {
        let model = model();
        let layout = model.cache_layout();

        let err = model
            .forward(StepInput {
                input_ids: &[9999],
                attention_mask: &[1],
                position_ids: &[0],
                past: empty_caches(&layout),
            })
            .unwrap_err();
        assert!(matches!(err, ModelError::TokenOutOfRange { .. }));

        let err = model
            .forward(StepInput {
                input_ids: &[1],
                attention_mask: &[1, 1],
                position_ids: &[0],
                past: empty_caches(&layout),
            })
            .unwrap_err();
        assert!(matches!(err, ModelError::MalformedInput(_)));

        let err = model
            .forward(StepInput {
                input_ids: &[1],
                attention_mask: &[1],
                position_ids: &[0],
                past: Vec::new(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::LayerCount {
                expected: 4,
                actual: 0
            }
        );

        // One layer, or one value tensor, holding an extra position.
        let kv_dim = layout.kv_dim();
        for skew_value_only in [false, true] {
            let mut past = prefill(&model, &[10, 20, 30]).caches;
            let last = past.last_mut().unwrap();
            last.value.push_position(&vec![0.0; kv_dim]).unwrap();
            if !skew_value_only {
                last.key.push_position(&vec![0.0; kv_dim]).unwrap();
            }
            let err = model
                .forward(StepInput {
                    input_ids: &[40],
                    attention_mask: &[1, 1, 1, 1],
                    position_ids: &[3],
                    past,
                })
                .unwrap_err();
            assert!(matches!(err, ModelError::MalformedInput(_)));
        }
    }
}
