//! Sample-rate conversion for the outbound pipeline
//!
//! Nearest-neighbor decimation with no anti-aliasing filter. Aliasing at
//! large downsample ratios is an accepted tradeoff for minimal latency;
//! filtering here would change the audible output of existing deployments.

use std::borrow::Cow;

/// Convert `samples` from `input_rate` to `output_rate`.
///
/// Equal rates return the input borrowed, with no copy. Otherwise the
/// output length is `round(len * output_rate / input_rate)` and each output
/// sample is the nearest (floor) source sample, clamped to the valid range.
pub fn resample(samples: &[f32], input_rate: u32, output_rate: u32) -> Cow<'_, [f32]> {
    if input_rate == output_rate || samples.is_empty() {
        return Cow::Borrowed(samples);
    }

    let out_len =
        ((samples.len() as f64 * output_rate as f64) / input_rate as f64).round() as usize;
    let mut output = Vec::with_capacity(out_len);

    let last = samples.len() - 1;
    for i in 0..out_len {
        let src = (i as u64 * input_rate as u64 / output_rate as u64) as usize;
        output.push(samples[src.min(last)]);
    }

    Cow::Owned(output)
}
