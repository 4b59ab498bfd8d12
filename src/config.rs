//! Model, cache and generation configuration.

use crate::error::{DecodeError, Result};

/// Shape of the per-layer key/value cache a forward step expects.
///
/// Every cache tensor is `[1, n_kv_heads, cached_len, head_dim]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLayout {
    /// Number of decoder layers (num_hidden_layers)
    pub n_layers: usize,
    /// Number of key/value heads (num_key_value_heads)
    pub n_kv_heads: usize,
    /// Width of each head (head_dim)
    pub head_dim: usize,
}

impl CacheLayout {
    pub fn new(n_layers: usize, n_kv_heads: usize, head_dim: usize) -> Self {
        CacheLayout {
            n_layers,
            n_kv_heads,
            head_dim,
        }
    }

    /// Layout of Llama 3.2 1B: 16 layers, GQA with 8 KV heads of width 64.
    pub fn llama_3_2_1b() -> Self {
        CacheLayout::new(16, 8, 64)
    }

    /// Elements stored per cached position in one tensor.
    #[inline]
    pub fn kv_dim(&self) -> usize {
        self.n_kv_heads * self.head_dim
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_layers == 0 || self.n_kv_heads == 0 || self.head_dim == 0 {
            return Err(DecodeError::InvalidArgument(format!(
                "cache layout dimensions must be positive, got {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Length budget and stop token for one generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationConfig {
    /// Upper bound on the returned sequence length, prompt included.
    pub max_length: usize,
    /// End-of-sequence token; never appended to the output.
    pub eos_id: i64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            max_length: 50,
            eos_id: 2,
        }
    }
}

/// Transformer hyperparameters of the reference model, aligned with
/// LlamaConfig in Hugging Face Transformers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LlamaConfig {
    /// Transformer embedding dimension (hidden_size)
    pub dim: usize,
    /// FFN intermediate dimension (intermediate_size)
    pub hidden_dim: usize,
    /// Number of decoder layers (num_hidden_layers)
    pub n_layers: usize,
    /// Number of query attention heads (num_attention_heads)
    pub n_heads: usize,
    /// Number of key/value heads for GQA (num_key_value_heads)
    pub n_kv_heads: usize,
    /// Vocabulary size (vocab_size)
    pub vocab_size: usize,
    /// Maximum context length (max_position_embeddings)
    pub seq_len: usize,
    /// RoPE base frequency (rope_theta)
    pub rope_theta: f32,
}

impl LlamaConfig {
    /// A few-layer model sized for the byte tokenizer.
    pub fn tiny() -> Self {
        LlamaConfig {
            dim: 64,
            hidden_dim: 172,
            n_layers: 4,
            n_heads: 8,
            n_kv_heads: 4,
            vocab_size: 259,
            seq_len: 512,
            rope_theta: 10000.0,
        }
    }

    pub fn small() -> Self {
        LlamaConfig {
            dim: 288,
            hidden_dim: 768,
            n_layers: 6,
            n_heads: 6,
            n_kv_heads: 6,
            vocab_size: 259,
            seq_len: 1024,
            rope_theta: 10000.0,
        }
    }

    /// Look up a named preset.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "tiny" => Some(Self::tiny()),
            "small" => Some(Self::small()),
            _ => None,
        }
    }

    /// Returns the head size.
    #[inline]
    pub fn head_size(&self) -> usize {
        self.dim / self.n_heads
    }

    /// Returns the key/value dimension per position.
    #[inline]
    pub fn kv_dim(&self) -> usize {
        self.n_kv_heads * self.head_size()
    }

    /// Returns the number of query heads sharing one KV head.
    #[inline]
    pub fn group_size(&self) -> usize {
        self.n_heads / self.n_kv_heads
    }

    /// Cache shape this model produces and consumes.
    pub fn cache_layout(&self) -> CacheLayout {
        CacheLayout::new(self.n_layers, self.n_kv_heads, self.head_size())
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            self.dim,
            self.hidden_dim,
            self.n_layers,
            self.n_heads,
            self.n_kv_heads,
            self.vocab_size,
            self.seq_len,
        ];
        if positive.iter().any(|&v| v == 0) {
            return Err(DecodeError::InvalidModel(
                "all dimensions must be positive".into(),
            ));
        }
        if self.dim % self.n_heads != 0 {
            return Err(DecodeError::InvalidModel(format!(
                "dim {} is not divisible by n_heads {}",
                self.dim, self.n_heads
            )));
        }
        if self.n_heads % self.n_kv_heads != 0 {
            return Err(DecodeError::InvalidModel(format!(
                "n_heads {} is not a multiple of n_kv_heads {}",
                self.n_heads, self.n_kv_heads
            )));
        }
        // RoPE rotates adjacent pairs inside each head.
        if self.head_size() % 2 != 0 {
            return Err(DecodeError::InvalidModel(format!(
                "head size {} must be even",
                self.head_size()
            )));
        }
        Ok(())
    }
}
