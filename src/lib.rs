//! Greedy autoregressive decoding with an incremental key/value cache.
//!
//! The decode loop drives any [`ForwardStep`] (a stateless "run one step"
//! model) through a prefill followed by single-token steps, carrying the
//! per-layer caches between calls. A small Llama-style reference model is
//! included so the loop can be run end to end.

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod ops;
pub mod pipeline;
pub mod sample;
pub mod state;
pub mod step;
pub mod tensor;
pub mod tokenizer;
pub mod weights;

pub use batch::{GenerationRequest, generate_batch};
pub use config::{CacheLayout, GenerationConfig, LlamaConfig};
pub use engine::{CancelToken, GenerationOutput, StopReason, generate, generate_streaming};
pub use error::{DecodeError, ModelError, Result};
pub use model::LlamaModel;
pub use pipeline::{Completion, DEFAULT_MAX_NEW_TOKENS, DEFAULT_PROMPT, TextGenerator};
pub use sample::{argmax, greedy};
pub use state::{GenerationState, LayerCache};
pub use step::{ForwardStep, StepInput, StepOutput};
pub use tensor::{KvTensor, Logits};
pub use tokenizer::{ByteTokenizer, Tokenizer};
pub use weights::{LlamaLayerWeights, LlamaWeights};
