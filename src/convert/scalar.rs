//! Portable one-sample-at-a-time conversion.

use super::{
    byte_swap, label_float, label_int24, unlabel_float, unlabel_int24, ConversionPath,
    SampleConverter,
};

/// Reference strategy. Every other strategy is checked against this one.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScalarConverter;

impl SampleConverter for ScalarConverter {
    fn path(&self) -> ConversionPath {
        ConversionPath::Scalar
    }

    fn float_to_labelled(&self, src: &[f32], dst: &mut [u32]) {
        for (out, &v) in dst.iter_mut().zip(src) {
            *out = label_float(v);
        }
    }

    fn int24_to_labelled(&self, src: &[i32], dst: &mut [u32]) {
        for (out, &v) in dst.iter_mut().zip(src) {
            *out = label_int24(v);
        }
    }

    fn labelled_to_float(&self, src: &[u32], dst: &mut [f32]) {
        for (out, &q) in dst.iter_mut().zip(src) {
            *out = unlabel_float(q);
        }
    }

    fn labelled_to_int24(&self, src: &[u32], dst: &mut [i32]) {
        for (out, &q) in dst.iter_mut().zip(src) {
            *out = unlabel_int24(q);
        }
    }

    fn byte_swap_block(&self, words: &mut [u32]) {
        for w in words.iter_mut() {
            *w = byte_swap(*w);
        }
    }
}
