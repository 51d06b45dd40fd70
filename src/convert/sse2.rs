//! SSE2 block conversion.
//!
//! Each routine converts a scalar head until the destination is 16-byte
//! aligned, then four quadlets per step, then a scalar tail. The vector
//! steps use the same single-precision multiply and the same truncation
//! rule as the scalar helpers, so results are bit-identical.

#[cfg(target_arch = "x86")]
use std::arch::x86::*;
#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use super::{
    byte_swap, label_float, label_int24, unlabel_float, unlabel_int24, ConversionPath,
    SampleConverter, AUDIO_LABEL, BLOCK_QUADLETS, FLOAT_SCALE, FLOAT_UNSCALE, SAMPLE_MASK,
};

/// SSE2 strategy. Obtain through `Sse2Converter::new`, `converter_for` or `detect`.
#[derive(Debug, Clone, Copy)]
pub struct Sse2Converter {
    _private: (),
}

impl Sse2Converter {
    /// Only handed out after a CPU feature check
    pub(super) const UNCHECKED: Sse2Converter = Sse2Converter { _private: () };

    /// Returns `None` when the CPU lacks SSE2.
    pub fn new() -> Option<Self> {
        if is_x86_feature_detected!("sse2") {
            Some(Self::UNCHECKED)
        } else {
            None
        }
    }
}

/// Number of leading elements to handle one by one so that `ptr` becomes
/// 16-byte aligned, capped at `len`.
#[inline]
fn head_len<T>(ptr: *const T, len: usize) -> usize {
    ptr.align_offset(16).min(len)
}

#[target_feature(enable = "sse2")]
unsafe fn float_to_labelled_sse2(src: &[f32], dst: &mut [u32]) {
    let n = src.len().min(dst.len());
    let head = head_len(dst.as_ptr(), n);
    for i in 0..head {
        dst[i] = label_float(src[i]);
    }

    let scale = _mm_set1_ps(FLOAT_SCALE);
    let mask = _mm_set1_epi32(SAMPLE_MASK as i32);
    let label = _mm_set1_epi32(AUDIO_LABEL as i32);

    let mut i = head;
    while i + BLOCK_QUADLETS <= n {
        let v = _mm_loadu_ps(src.as_ptr().add(i));
        let t = _mm_cvttps_epi32(_mm_mul_ps(v, scale));
        let q = _mm_or_si128(_mm_and_si128(_mm_srai_epi32::<8>(t), mask), label);
        _mm_store_si128(dst.as_mut_ptr().add(i) as *mut __m128i, q);
        i += BLOCK_QUADLETS;
    }

    for j in i..n {
        dst[j] = label_float(src[j]);
    }
}

#[target_feature(enable = "sse2")]
unsafe fn int24_to_labelled_sse2(src: &[i32], dst: &mut [u32]) {
    let n = src.len().min(dst.len());
    let head = head_len(dst.as_ptr(), n);
    for i in 0..head {
        dst[i] = label_int24(src[i]);
    }

    let mask = _mm_set1_epi32(SAMPLE_MASK as i32);
    let label = _mm_set1_epi32(AUDIO_LABEL as i32);

    let mut i = head;
    while i + BLOCK_QUADLETS <= n {
        let v = _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i);
        let q = _mm_or_si128(_mm_and_si128(v, mask), label);
        _mm_store_si128(dst.as_mut_ptr().add(i) as *mut __m128i, q);
        i += BLOCK_QUADLETS;
    }

    for j in i..n {
        dst[j] = label_int24(src[j]);
    }
}

#[target_feature(enable = "sse2")]
unsafe fn labelled_to_float_sse2(src: &[u32], dst: &mut [f32]) {
    let n = src.len().min(dst.len());
    let head = head_len(dst.as_ptr(), n);
    for i in 0..head {
        dst[i] = unlabel_float(src[i]);
    }

    let unscale = _mm_set1_ps(FLOAT_UNSCALE);

    let mut i = head;
    while i + BLOCK_QUADLETS <= n {
        let q = _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i);
        let s = _mm_srai_epi32::<8>(_mm_slli_epi32::<8>(q));
        let f = _mm_mul_ps(_mm_cvtepi32_ps(s), unscale);
        _mm_store_ps(dst.as_mut_ptr().add(i), f);
        i += BLOCK_QUADLETS;
    }

    for j in i..n {
        dst[j] = unlabel_float(src[j]);
    }
}

#[target_feature(enable = "sse2")]
unsafe fn labelled_to_int24_sse2(src: &[u32], dst: &mut [i32]) {
    let n = src.len().min(dst.len());
    let head = head_len(dst.as_ptr(), n);
    for i in 0..head {
        dst[i] = unlabel_int24(src[i]);
    }

    let mut i = head;
    while i + BLOCK_QUADLETS <= n {
        let q = _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i);
        let s = _mm_srai_epi32::<8>(_mm_slli_epi32::<8>(q));
        _mm_store_si128(dst.as_mut_ptr().add(i) as *mut __m128i, s);
        i += BLOCK_QUADLETS;
    }

    for j in i..n {
        dst[j] = unlabel_int24(src[j]);
    }
}

#[target_feature(enable = "sse2")]
unsafe fn byte_swap_block_sse2(words: &mut [u32]) {
    let n = words.len();
    let head = head_len(words.as_ptr(), n);
    for w in words[..head].iter_mut() {
        *w = byte_swap(*w);
    }

    let mut i = head;
    while i + BLOCK_QUADLETS <= n {
        let p = words.as_mut_ptr().add(i) as *mut __m128i;
        let v = _mm_load_si128(p);
        // Swap 16-bit halves, then the bytes inside each half
        let halves = _mm_or_si128(_mm_slli_epi32::<16>(v), _mm_srli_epi32::<16>(v));
        let swapped = _mm_or_si128(_mm_slli_epi16::<8>(halves), _mm_srli_epi16::<8>(halves));
        _mm_store_si128(p, swapped);
        i += BLOCK_QUADLETS;
    }

    for w in words[i..].iter_mut() {
        *w = byte_swap(*w);
    }
}

impl SampleConverter for Sse2Converter {
    fn path(&self) -> ConversionPath {
        ConversionPath::Sse2
    }

    fn float_to_labelled(&self, src: &[f32], dst: &mut [u32]) {
        // SAFETY: instances only exist after the SSE2 feature check
        unsafe { float_to_labelled_sse2(src, dst) }
    }

    fn int24_to_labelled(&self, src: &[i32], dst: &mut [u32]) {
        // SAFETY: instances only exist after the SSE2 feature check
        unsafe { int24_to_labelled_sse2(src, dst) }
    }

    fn labelled_to_float(&self, src: &[u32], dst: &mut [f32]) {
        // SAFETY: instances only exist after the SSE2 feature check
        unsafe { labelled_to_float_sse2(src, dst) }
    }

    fn labelled_to_int24(&self, src: &[u32], dst: &mut [i32]) {
        // SAFETY: instances only exist after the SSE2 feature check
        unsafe { labelled_to_int24_sse2(src, dst) }
    }

    fn byte_swap_block(&self, words: &mut [u32]) {
        // SAFETY: instances only exist after the SSE2 feature check
        unsafe { byte_swap_block_sse2(words) }
    }
}
