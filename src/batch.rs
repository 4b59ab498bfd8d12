//! Independent generation requests run in parallel.
//!
//! Each request owns its own state and caches; the only shared value is the
//! read-only forward step.

use rayon::prelude::*;
use tracing::debug;

use crate::config::{CacheLayout, GenerationConfig};
use crate::engine::{CancelToken, GenerationOutput, generate};
use crate::error::Result;
use crate::step::ForwardStep;

/// One prompt and its generation settings.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt_ids: Vec<i64>,
    pub config: GenerationConfig,
}

/// Run every request on the rayon pool, returning results in request order.
///
/// A failed request does not affect the others. Cancelling `cancel` stops
/// all requests at their next step boundary.
pub fn generate_batch<S>(
    step: &S,
    layout: CacheLayout,
    requests: &[GenerationRequest],
    cancel: &CancelToken,
) -> Vec<Result<GenerationOutput>>
where
    S: ForwardStep + Sync + ?Sized,
{
    debug!(requests = requests.len(), "starting batch");
    requests
        .par_iter()
        .map(|req| generate(step, &req.prompt_ids, layout, &req.config, cancel))
        .collect()
}
