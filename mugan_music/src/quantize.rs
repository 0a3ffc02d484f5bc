// Quantization of continuous durations and onset gaps into class indices.
//
// The rule is a stepwise monotonic function over a strictly increasing table:
// a value `v` lands in the smallest class `i` with `v < table[i] * margin`,
// or in the last class when no entry matches. With the geometric (doubling)
// tables in `EncodingConfig` and a margin of 1.5, every table entry maps back
// to its own class, and the boundary between two classes sits halfway
// between them on a log scale.
//
// Time shifts get one extra rule: anything below `time_shift_epsilon`
// collapses to class 0 (the exact-zero class), so chords whose members were
// performed a few ticks apart still read as simultaneous. Negative and NaN
// shifts take class 0 as well.
//
// The inverse direction clamps out-of-range classes to the last entry; model
// outputs are clipped before they reach a lookup.

use crate::config::EncodingConfig;

/// Map `value` to the first class whose table entry times `margin` exceeds it.
pub fn quantize(value: f64, table: &[f64], margin: f64) -> u8 {
    let last = table.len().saturating_sub(1);
    let class = table
        .iter()
        .position(|&boundary| value < boundary * margin)
        .unwrap_or(last);
    class as u8
}

/// Look up the continuous value for `class`, clamping to the table.
pub fn dequantize(class: u8, table: &[f64]) -> f64 {
    let idx = (class as usize).min(table.len().saturating_sub(1));
    table.get(idx).copied().unwrap_or(0.0)
}

pub fn quantize_duration(duration: f64, enc: &EncodingConfig) -> u8 {
    quantize(duration, &enc.duration_table, enc.margin)
}

pub fn quantize_time_shift(shift: f64, enc: &EncodingConfig) -> u8 {
    if shift.is_nan() || shift < enc.time_shift_epsilon {
        return 0;
    }
    quantize(shift, &enc.time_shift_table, enc.margin)
}

pub fn duration_of(class: u8, enc: &EncodingConfig) -> f64 {
    dequantize(class, &enc.duration_table)
}

pub fn time_shift_of(class: u8, enc: &EncodingConfig) -> f64 {
    dequantize(class, &enc.time_shift_table)
}
