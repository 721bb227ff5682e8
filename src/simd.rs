//! SIMD-optimized vector math
//!
//! Host-side kernels for the search engine: dot products feed the GEMM-style
//! scoring pass, squared norms are precomputed per database row and per
//! query. NEON is used unconditionally on aarch64; x86_64 picks AVX2+FMA by
//! runtime feature detection and everything else takes the scalar path,
//! which LLVM auto-vectorizes under `-C target-cpu=native`.
//!
//! Rows in the slab data region are only 4-byte aligned for arbitrary `dim`,
//! so all wide loads are unaligned.

// ============================================================================
// aarch64 NEON
// ============================================================================

/// NEON dot product: two independent accumulators over 8-float chunks.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn dot_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let mut even = vdupq_n_f32(0.0);
    let mut odd = vdupq_n_f32(0.0);

    let mut xs = a.chunks_exact(8);
    let mut ys = b.chunks_exact(8);
    for (x, y) in xs.by_ref().zip(ys.by_ref()) {
        even = vfmaq_f32(even, vld1q_f32(x.as_ptr()), vld1q_f32(y.as_ptr()));
        odd = vfmaq_f32(odd, vld1q_f32(x.as_ptr().add(4)), vld1q_f32(y.as_ptr().add(4)));
    }

    let mut total = vaddvq_f32(vaddq_f32(even, odd));
    for (x, y) in xs.remainder().iter().zip(ys.remainder()) {
        total += x * y;
    }
    total
}

/// NEON squared L2 distance: two independent accumulators over 8-float chunks.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn l2_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let mut even = vdupq_n_f32(0.0);
    let mut odd = vdupq_n_f32(0.0);

    let mut xs = a.chunks_exact(8);
    let mut ys = b.chunks_exact(8);
    for (x, y) in xs.by_ref().zip(ys.by_ref()) {
        let d0 = vsubq_f32(vld1q_f32(x.as_ptr()), vld1q_f32(y.as_ptr()));
        let d1 = vsubq_f32(vld1q_f32(x.as_ptr().add(4)), vld1q_f32(y.as_ptr().add(4)));
        even = vfmaq_f32(even, d0, d0);
        odd = vfmaq_f32(odd, d1, d1);
    }

    let mut total = vaddvq_f32(vaddq_f32(even, odd));
    for (x, y) in xs.remainder().iter().zip(ys.remainder()) {
        let d = x - y;
        total += d * d;
    }
    total
}

// ============================================================================
// x86_64 AVX2+FMA (runtime feature detection)
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn avx2_available() -> bool {
    is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
}

/// Collapse a 256-bit register to the sum of its eight lanes.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn hsum256(v: std::arch::x86_64::__m256) -> f32 {
    use std::arch::x86_64::*;

    let folded = _mm_add_ps(_mm256_castps256_ps128(v), _mm256_extractf128_ps(v, 1));
    let pairs = _mm_hadd_ps(folded, folded);
    _mm_cvtss_f32(_mm_hadd_ps(pairs, pairs))
}

/// AVX2+FMA dot product over 8-float chunks (unaligned loads).
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let mut acc = _mm256_setzero_ps();
    let mut xs = a.chunks_exact(8);
    let mut ys = b.chunks_exact(8);
    for (x, y) in xs.by_ref().zip(ys.by_ref()) {
        let vx = _mm256_loadu_ps(x.as_ptr());
        let vy = _mm256_loadu_ps(y.as_ptr());
        acc = _mm256_fmadd_ps(vx, vy, acc);
    }

    let mut total = hsum256(acc);
    for (x, y) in xs.remainder().iter().zip(ys.remainder()) {
        total += x * y;
    }
    total
}

/// AVX2+FMA squared L2 distance over 8-float chunks (unaligned loads).
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn l2_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let mut acc = _mm256_setzero_ps();
    let mut xs = a.chunks_exact(8);
    let mut ys = b.chunks_exact(8);
    for (x, y) in xs.by_ref().zip(ys.by_ref()) {
        let d = _mm256_sub_ps(_mm256_loadu_ps(x.as_ptr()), _mm256_loadu_ps(y.as_ptr()));
        acc = _mm256_fmadd_ps(d, d, acc);
    }

    let mut total = hsum256(acc);
    for (x, y) in xs.remainder().iter().zip(ys.remainder()) {
        let d = x - y;
        total += d * d;
    }
    total
}

// ============================================================================
// Scalar fallback (auto-vectorized by LLVM)
// ============================================================================

#[inline(always)]
fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).fold(0.0, |sum, (x, y)| sum + x * y)
}

#[inline(always)]
fn l2_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).fold(0.0, |sum, (x, y)| {
        let d = x - y;
        sum + d * d
    })
}

// ============================================================================
// Public dispatch functions
// ============================================================================

/// Compute dot product of two vectors
#[inline(always)]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector length mismatch");

    #[cfg(target_arch = "aarch64")]
    return unsafe { dot_neon(a, b) };

    #[cfg(target_arch = "x86_64")]
    if avx2_available() {
        return unsafe { dot_avx2(a, b) };
    }

    #[allow(unreachable_code)]
    dot_scalar(a, b)
}

/// Compute squared L2 (Euclidean) distance between two vectors
///
/// Returns ||a - b||² (no square root).
#[inline(always)]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector length mismatch");

    #[cfg(target_arch = "aarch64")]
    return unsafe { l2_neon(a, b) };

    #[cfg(target_arch = "x86_64")]
    if avx2_available() {
        return unsafe { l2_avx2(a, b) };
    }

    #[allow(unreachable_code)]
    l2_scalar(a, b)
}

/// Compute the squared L2 norm ||v||² of a vector
#[inline(always)]
pub fn squared_norm(v: &[f32]) -> f32 {
    dot_product(v, v)
}
