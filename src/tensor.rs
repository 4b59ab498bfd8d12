//! Dense f32 tensors exchanged with the forward step.

use crate::error::{DecodeError, Result};

/// One key or value cache tensor, shape `[1, n_heads, seq_len, head_dim]`,
/// row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct KvTensor {
    n_heads: usize,
    seq_len: usize,
    head_dim: usize,
    data: Vec<f32>,
}

impl KvTensor {
    /// An empty cache: zero cached positions.
    pub fn zeros(n_heads: usize, head_dim: usize) -> Self {
        KvTensor {
            n_heads,
            seq_len: 0,
            head_dim,
            data: Vec::new(),
        }
    }

    /// Build from a `[1, n_heads, seq_len, head_dim]` shape and flat data.
    pub fn from_vec(shape: [usize; 4], data: Vec<f32>) -> Result<Self> {
        let [batch, n_heads, seq_len, head_dim] = shape;
        if batch != 1 {
            return Err(DecodeError::InvalidArgument(format!(
                "batch size must be 1, got {}",
                batch
            )));
        }
        if data.len() != n_heads * seq_len * head_dim {
            return Err(DecodeError::InvalidArgument(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                n_heads * seq_len * head_dim,
                data.len()
            )));
        }
        Ok(KvTensor {
            n_heads,
            seq_len,
            head_dim,
            data,
        })
    }

    #[inline]
    pub fn shape(&self) -> [usize; 4] {
        [1, self.n_heads, self.seq_len, self.head_dim]
    }

    #[inline]
    pub fn n_heads(&self) -> usize {
        self.n_heads
    }

    #[inline]
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Number of positions held in the cache.
    #[inline]
    pub fn cached_len(&self) -> usize {
        self.seq_len
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// All cached positions of one head, `[seq_len, head_dim]`.
    #[inline]
    pub fn head(&self, h: usize) -> &[f32] {
        let stride = self.seq_len * self.head_dim;
        &self.data[h * stride..(h + 1) * stride]
    }

    /// The vector cached for head `h` at position `t`.
    #[inline]
    pub fn at(&self, h: usize, t: usize) -> &[f32] {
        let off = (h * self.seq_len + t) * self.head_dim;
        &self.data[off..off + self.head_dim]
    }

    /// Concatenate `other` after `self` along the sequence axis.
    pub fn concat(&self, other: &KvTensor) -> Result<KvTensor> {
        if self.n_heads != other.n_heads || self.head_dim != other.head_dim {
            return Err(DecodeError::InvalidArgument(format!(
                "cannot concatenate {:?} with {:?}",
                self.shape(),
                other.shape()
            )));
        }
        let seq_len = self.seq_len + other.seq_len;
        let mut data = Vec::with_capacity(self.n_heads * seq_len * self.head_dim);
        for h in 0..self.n_heads {
            data.extend_from_slice(self.head(h));
            data.extend_from_slice(other.head(h));
        }
        Ok(KvTensor {
            n_heads: self.n_heads,
            seq_len,
            head_dim: self.head_dim,
            data,
        })
    }

    /// Append one position given as `[n_heads * head_dim]`, head-major.
    pub fn push_position(&mut self, kv: &[f32]) -> Result<()> {
        let slice = KvTensor::from_vec([1, self.n_heads, 1, self.head_dim], kv.to_vec())?;
        *self = self.concat(&slice)?;
        Ok(())
    }
}

/// Model output scores, shape `[1, seq_len, vocab_size]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Logits {
    seq_len: usize,
    vocab_size: usize,
    data: Vec<f32>,
}

impl Logits {
    pub fn new(seq_len: usize, vocab_size: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != seq_len * vocab_size {
            return Err(DecodeError::InvalidArgument(format!(
                "logits [1, {}, {}] need {} elements, got {}",
                seq_len,
                vocab_size,
                seq_len * vocab_size,
                data.len()
            )));
        }
        Ok(Logits {
            seq_len,
            vocab_size,
            data,
        })
    }

    #[inline]
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    #[inline]
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Scores for position `t`.
    #[inline]
    pub fn row(&self, t: usize) -> &[f32] {
        &self.data[t * self.vocab_size..(t + 1) * self.vocab_size]
    }

    /// Scores for the last position, or `None` when empty.
    pub fn last(&self) -> Option<&[f32]> {
        self.seq_len.checked_sub(1).map(|t| self.row(t))
    }
}
