//! Numeric kernels for the reference model.

/// RMSNorm epsilon, aligned with rms_norm_eps in Transformers.
pub const RMS_EPS: f32 = 1e-5;

/// RMS normalization into a new buffer, aligned with LlamaRMSNorm.forward.
pub fn rms_norm(x: &[f32], weight: &[f32]) -> Vec<f32> {
    let mean_sq = x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32;
    let inv = 1.0 / (mean_sq + RMS_EPS).sqrt();
    x.iter().zip(weight).map(|(v, w)| w * v * inv).collect()
}

/// Matrix-vector product `w @ x` for a row-major `[out_dim, x.len()]` matrix.
pub fn matvec(w: &[f32], x: &[f32], out_dim: usize) -> Vec<f32> {
    let in_dim = x.len();
    (0..out_dim)
        .map(|i| dot(&w[i * in_dim..(i + 1) * in_dim], x))
        .collect()
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Element-wise `a += b`.
#[inline]
pub fn add_assign(a: &mut [f32], b: &[f32]) {
    for (ai, bi) in a.iter_mut().zip(b) {
        *ai += bi;
    }
}

/// Softmax in-place.
pub fn softmax(x: &mut [f32]) {
    let max_val = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max_val.is_finite() {
        return;
    }
    let mut sum = 0.0f32;
    for v in x.iter_mut() {
        *v = (*v - max_val).exp();
        sum += *v;
    }
    for v in x.iter_mut() {
        *v /= sum;
    }
}

/// Rotate adjacent pairs of every head by position `pos`, aligned with
/// apply_rotary_pos_emb (interleaved variant).
pub fn rope(x: &mut [f32], pos: i64, head_size: usize, theta: f32) {
    for head in x.chunks_exact_mut(head_size) {
        for (pair, chunk) in head.chunks_exact_mut(2).enumerate() {
            let freq = theta.powf(-((2 * pair) as f32) / head_size as f32);
            let (sin, cos) = (pos as f32 * freq).sin_cos();
            let (x0, x1) = (chunk[0], chunk[1]);
            chunk[0] = x0 * cos - x1 * sin;
            chunk[1] = x0 * sin + x1 * cos;
        }
    }
}

/// SwiGLU activation in-place: `gate = silu(gate) * up`.
pub fn swiglu(gate: &mut [f32], up: &[f32]) {
    for (g, u) in gate.iter_mut().zip(up) {
        *g = *g / (1.0 + (-*g).exp()) * u;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rms_norm_unit_weight() {
        let out = rms_norm(&[3.0, 4.0], &[1.0, 1.0]);
        let rms = (12.5f32 + RMS_EPS).sqrt();
        assert_abs_diff_eq!(out[0], 3.0 / rms, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 4.0 / rms, epsilon = 1e-6);
    }

    #[test]
    fn matvec_row_major() {
        let w = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(matvec(&w, &[1.0, 0.0, -1.0], 2), vec![-2.0, -2.0]);
    }

    #[test]
    fn softmax_sums_to_one() {
        let mut x = [1.0, 2.0, 3.0];
        softmax(&mut x);
        assert_abs_diff_eq!(x.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert!(x[2] > x[1] && x[1] > x[0]);
    }

    #[test]
    fn rope_at_zero_is_identity() {
        let mut x = [0.3, -1.2, 0.7, 2.0];
        rope(&mut x, 0, 4, 10000.0);
        assert_eq!(x, [0.3, -1.2, 0.7, 2.0]);
    }

    #[test]
    fn rope_preserves_norm() {
        let mut x = [0.3, -1.2, 0.7, 2.0];
        let before: f32 = x.iter().map(|v| v * v).sum();
        rope(&mut x, 17, 4, 10000.0);
        let after: f32 = x.iter().map(|v| v * v).sum();
        assert_abs_diff_eq!(before, after, epsilon = 1e-4);
    }

    #[test]
    fn swiglu_zero_gate() {
        let mut gate = [0.0, 0.0];
        swiglu(&mut gate, &[5.0, -5.0]);
        assert_eq!(gate, [0.0, 0.0]);
    }
}
