//! Seeded synthetic weights for the reference model.

use rand::SeedableRng;
use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;

use crate::config::LlamaConfig;
use crate::error::{DecodeError, Result};

/// Weights for a single decoder layer.
#[derive(Debug, Clone)]
pub struct LlamaLayerWeights {
    /// Input RMSNorm weights (input_layernorm)
    pub attn_norm: Vec<f32>,
    /// Query projection (self_attn.q_proj.weight)
    pub q_proj: Vec<f32>,
    /// Key projection (self_attn.k_proj.weight)
    pub k_proj: Vec<f32>,
    /// Value projection (self_attn.v_proj.weight)
    pub v_proj: Vec<f32>,
    /// Output projection (self_attn.o_proj.weight)
    pub o_proj: Vec<f32>,
    /// Post-attention RMSNorm weights (post_attention_layernorm)
    pub ffn_norm: Vec<f32>,
    /// Gate projection in MLP (mlp.gate_proj.weight)
    pub gate_proj: Vec<f32>,
    /// Up projection in MLP (mlp.up_proj.weight)
    pub up_proj: Vec<f32>,
    /// Down projection in MLP (mlp.down_proj.weight)
    pub down_proj: Vec<f32>,
}

/// All model parameters; the output head is tied to `embed_tokens`.
#[derive(Debug, Clone)]
pub struct LlamaWeights {
    /// Token embeddings (model.embed_tokens.weight)
    pub embed_tokens: Vec<f32>,
    /// Decoder layers (model.layers)
    pub layers: Vec<LlamaLayerWeights>,
    /// Final RMSNorm (model.norm.weight)
    pub norm: Vec<f32>,
}

/// Draws matrices with a fan-in scaled uniform init.
struct Init {
    rng: StdRng,
}

impl Init {
    fn matrix(&mut self, rows: usize, cols: usize) -> Result<Vec<f32>> {
        let bound = 1.0 / (cols as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound)
            .map_err(|e| DecodeError::InvalidModel(format!("weight init: {}", e)))?;
        Ok(dist.sample_iter(&mut self.rng).take(rows * cols).collect())
    }
}

impl LlamaWeights {
    /// Generate weights deterministically from `seed`.
    pub fn random(config: &LlamaConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let dim = config.dim;
        let hdim = config.hidden_dim;
        let kv_dim = config.kv_dim();
        let mut init = Init {
            rng: StdRng::seed_from_u64(seed),
        };

        let embed_tokens = init.matrix(config.vocab_size, dim)?;
        let layers = (0..config.n_layers)
            .map(|_| {
                Ok(LlamaLayerWeights {
                    attn_norm: vec![1.0; dim],
                    q_proj: init.matrix(dim, dim)?,
                    k_proj: init.matrix(kv_dim, dim)?,
                    v_proj: init.matrix(kv_dim, dim)?,
                    o_proj: init.matrix(dim, dim)?,
                    ffn_norm: vec![1.0; dim],
                    gate_proj: init.matrix(hdim, dim)?,
                    up_proj: init.matrix(hdim, dim)?,
                    down_proj: init.matrix(dim, hdim)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(LlamaWeights {
            embed_tokens,
            layers,
            norm: vec![1.0; dim],
        })
    }

    /// Embedding row of `token`.
    #[inline]
    pub fn embedding(&self, token: usize, dim: usize) -> &[f32] {
        &self.embed_tokens[token * dim..(token + 1) * dim]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_follow_config() {
        let config = LlamaConfig::tiny();
        let w = LlamaWeights::random(&config, 0).unwrap();
        assert_eq!(w.embed_tokens.len(), config.vocab_size * config.dim);
        assert_eq!(w.layers.len(), config.n_layers);
        let layer = &w.layers[0];
        assert_eq!(layer.k_proj.len(), config.kv_dim() * config.dim);
        assert_eq!(layer.down_proj.len(), config.dim * config.hidden_dim);
    }

    #[test]
    fn same_seed_same_weights() {
        let config = LlamaConfig::tiny();
        let a = LlamaWeights::random(&config, 7).unwrap();
        let b = LlamaWeights::random(&config, 7).unwrap();
        let c = LlamaWeights::random(&config, 8).unwrap();
        assert_eq!(a.embed_tokens, b.embed_tokens);
        assert_ne!(a.embed_tokens, c.embed_tokens);
    }
}
