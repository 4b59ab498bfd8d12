//! Per-request decode state.

use crate::config::CacheLayout;
use crate::error::{DecodeError, Result};
use crate::tensor::KvTensor;

/// Cached keys and values of one decoder layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerCache {
    pub key: KvTensor,
    pub value: KvTensor,
}

impl LayerCache {
    /// An empty cache with zero positions.
    pub fn empty(layout: &CacheLayout) -> Self {
        LayerCache {
            key: KvTensor::zeros(layout.n_kv_heads, layout.head_dim),
            value: KvTensor::zeros(layout.n_kv_heads, layout.head_dim),
        }
    }
}

/// Empty caches for every layer.
pub fn empty_caches(layout: &CacheLayout) -> Vec<LayerCache> {
    (0..layout.n_layers)
        .map(|_| LayerCache::empty(layout))
        .collect()
}

/// Check that `caches` match `layout` and share one cached length.
///
/// Returns the shared length.
pub fn check_consistency(caches: &[LayerCache], layout: &CacheLayout) -> Result<usize> {
    if caches.len() != layout.n_layers {
        return Err(DecodeError::CacheInconsistency(format!(
            "expected {} layer caches, got {}",
            layout.n_layers,
            caches.len()
        )));
    }

    let mut shared = None;
    for (layer, cache) in caches.iter().enumerate() {
        for (kind, tensor) in [("key", &cache.key), ("value", &cache.value)] {
            if tensor.n_heads() != layout.n_kv_heads || tensor.head_dim() != layout.head_dim {
                return Err(DecodeError::CacheInconsistency(format!(
                    "layer {} {} has shape {:?}, expected [1, {}, _, {}]",
                    layer,
                    kind,
                    tensor.shape(),
                    layout.n_kv_heads,
                    layout.head_dim
                )));
            }
            match shared {
                None => shared = Some(tensor.cached_len()),
                Some(len) if len != tensor.cached_len() => {
                    return Err(DecodeError::CacheInconsistency(format!(
                        "layer {} {} holds {} positions, layer 0 key holds {}",
                        layer,
                        kind,
                        tensor.cached_len(),
                        len
                    )));
                }
                Some(_) => {}
            }
        }
    }
    Ok(shared.unwrap_or(0))
}

/// Mutable state of one in-flight generation.
///
/// Owned by a single decode call and dropped when it returns.
#[derive(Debug)]
pub struct GenerationState {
    prompt_len: usize,
    generated_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    position_index: i64,
    caches: Vec<LayerCache>,
    layout: CacheLayout,
    steps: usize,
    finished: bool,
}

impl GenerationState {
    pub fn new(prompt_ids: &[i64], layout: CacheLayout) -> Result<Self> {
        if prompt_ids.is_empty() {
            return Err(DecodeError::InvalidArgument("prompt is empty".into()));
        }
        layout.validate()?;

        Ok(GenerationState {
            prompt_len: prompt_ids.len(),
            generated_ids: prompt_ids.to_vec(),
            attention_mask: vec![1; prompt_ids.len()],
            position_index: prompt_ids.len() as i64 - 1,
            caches: empty_caches(&layout),
            layout,
            steps: 0,
            finished: false,
        })
    }

    #[inline]
    pub fn prompt_len(&self) -> usize {
        self.prompt_len
    }

    #[inline]
    pub fn generated_ids(&self) -> &[i64] {
        &self.generated_ids
    }

    #[inline]
    pub fn attention_mask(&self) -> &[i64] {
        &self.attention_mask
    }

    #[inline]
    pub fn position_index(&self) -> i64 {
        self.position_index
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.generated_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.generated_ids.is_empty()
    }

    /// Forward steps completed so far.
    #[inline]
    pub fn steps(&self) -> usize {
        self.steps
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True until the prompt has been run through the model.
    #[inline]
    pub fn is_prefill(&self) -> bool {
        self.steps == 0
    }

    pub fn caches(&self) -> &[LayerCache] {
        &self.caches
    }

    /// Token ids to feed the next step: the whole prompt on prefill,
    /// otherwise only the newest token.
    pub fn input_ids(&self) -> &[i64] {
        if self.is_prefill() {
            &self.generated_ids
        } else {
            &self.generated_ids[self.generated_ids.len() - 1..]
        }
    }

    /// Position ids matching [`input_ids`](Self::input_ids).
    pub fn position_ids(&self) -> Vec<i64> {
        if self.is_prefill() {
            (0..self.generated_ids.len() as i64).collect()
        } else {
            vec![self.position_index]
        }
    }

    /// Hand the current caches to the forward step.
    pub fn take_caches(&mut self) -> Vec<LayerCache> {
        std::mem::take(&mut self.caches)
    }

    /// Replace the caches with those returned by a forward step.
    ///
    /// Fails with `CacheInconsistency` if layers disagree on their length.
    pub fn install_caches(&mut self, caches: Vec<LayerCache>) -> Result<usize> {
        let cached_len = check_consistency(&caches, &self.layout)?;
        self.caches = caches;
        self.steps += 1;
        Ok(cached_len)
    }

    /// Append a selected token.
    pub fn commit(&mut self, token: i64) {
        debug_assert!(!self.finished, "commit after finish");
        self.generated_ids.push(token);
        self.attention_mask.push(1);
        self.position_index = self.generated_ids.len() as i64 - 1;
    }

    /// Mark the generation as done; no further tokens may be committed.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Consume the state, returning the token sequence.
    pub fn into_ids(self) -> Vec<i64> {
        self.generated_ids
    }
}
