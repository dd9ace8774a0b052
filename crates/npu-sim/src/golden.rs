// SPDX-License-Identifier: AGPL-3.0-only

//! Plain-integer golden reference for conformance testing.
//!
//! Expected results are computed here with ordinary arithmetic — no
//! pipelines, no handshakes, no cycle modeling — and compared bit-exact
//! against engine output. The scalar nonlinearities double as the
//! content of the engines' lookup tables, the same way the RTL's table
//! initializers are generated from the reference formulas.

/// Integer matrix product, int8 operands, int32 accumulation.
///
/// `a` is `[m, k]` row-major, `b` is `[k, n]` row-major; returns
/// `[m, n]` row-major.
pub fn gemm(a: &[i8], b: &[i8], m: usize, k: usize, n: usize) -> Vec<i32> {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    let mut c = vec![0i32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0i32;
            for x in 0..k {
                sum = sum.wrapping_add(i32::from(a[i * k + x]) * i32::from(b[x * n + j]));
            }
            c[i * n + j] = sum;
        }
    }
    c
}

/// Full-grid variant used by the systolic tests.
pub fn gemm_16(a: &[[i8; 16]; 16], b: &[[i8; 16]; 16]) -> [[i32; 16]; 16] {
    let a_flat: Vec<i8> = a.iter().flatten().copied().collect();
    let b_flat: Vec<i8> = b.iter().flatten().copied().collect();
    let c = gemm(&a_flat, &b_flat, 16, 16, 16);
    let mut out = [[0i32; 16]; 16];
    for i in 0..16 {
        out[i].copy_from_slice(&c[i * 16..(i + 1) * 16]);
    }
    out
}

/// Saturating elementwise int8 addition.
pub fn vec_add(a: i8, b: i8) -> i8 {
    a.saturating_add(b)
}

/// Q7 elementwise multiplication: `(a·b) >> 7`, saturated to int8.
pub fn vec_mul(a: i8, b: i8) -> i8 {
    let wide = (i16::from(a) * i16::from(b)) >> 7;
    clamp_i8(i32::from(wide))
}

/// Quantized GELU, tanh-form approximation.
///
/// `GELU(x) = 0.5·x·(1 + tanh(√(2/π)·(x + 0.044715·x³)))`, rounded
/// half away from zero and saturated to int8. This scalar is the
/// engine's lookup-table initializer.
pub fn gelu_i8(x: i8) -> i8 {
    let xf = f32::from(x);
    let sqrt_2_over_pi = (2.0_f32 / std::f32::consts::PI).sqrt();
    let cdf = 0.5 * (1.0 + (sqrt_2_over_pi * (xf + 0.044_715 * xf * xf * xf)).tanh());
    clamp_i8((xf * cdf).round() as i32)
}

/// Q15 table of `exp(-d)` for `d = 0..=255`, the softmax exponent
/// range after row-max subtraction of int8 inputs.
pub fn exp_q15_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    for (d, slot) in table.iter_mut().enumerate() {
        *slot = ((-(d as f32)).exp() * f32::from(i16::MAX)).round() as u16;
    }
    table
}

/// Numerically-stable fixed-point softmax over one row.
///
/// Subtracts the row max (exponents are then `≤ 0`), looks up Q15
/// `exp`, and quantizes each probability to `[0, 127]` so downstream
/// GEMMs cannot overflow. With `causal_limit = Some(r)`, positions with
/// column index greater than `r` are excluded from the normalization
/// and emit 0.
pub fn softmax_row(row: &[i8], causal_limit: Option<usize>) -> Vec<i8> {
    let table = exp_q15_table();
    softmax_row_with_table(row, causal_limit, &table)
}

/// [`softmax_row`] against a caller-held exponent table.
pub fn softmax_row_with_table(
    row: &[i8],
    causal_limit: Option<usize>,
    table: &[u16; 256],
) -> Vec<i8> {
    let active = causal_limit.map_or(row.len(), |r| (r + 1).min(row.len()));
    let max = row[..active].iter().copied().max().unwrap_or(0);

    let mut weights = vec![0u32; row.len()];
    let mut sum = 0u64;
    for (j, &x) in row.iter().enumerate().take(active) {
        let d = (i32::from(max) - i32::from(x)) as usize;
        weights[j] = u32::from(table[d.min(255)]);
        sum += u64::from(weights[j]);
    }

    row.iter()
        .enumerate()
        .map(|(j, _)| {
            if j >= active || sum == 0 {
                0
            } else {
                // round-half-up fixed-point divide
                let q = (u64::from(weights[j]) * 127 * 2 + sum) / (2 * sum);
                clamp_i8(q as i32).max(0)
            }
        })
        .collect()
}

/// Integer layer normalization with Q7 affine parameters.
///
/// Q8 intermediates: `mean` and the centered samples carry 8
/// fractional bits, the variance 16, and the integer square root of
/// the variance returns the standard deviation back in Q8. The
/// normalized value is Q7, scaled by `gamma` (127 ≈ 1.0) and offset by
/// `beta`, saturated to int8.
pub fn layernorm(x: &[i8], gamma: &[i8], beta: &[i8]) -> Vec<i8> {
    let n = x.len() as i64;
    if n == 0 {
        return Vec::new();
    }
    let sum: i64 = x.iter().map(|&v| i64::from(v)).sum();
    let mean_q8 = div_round(sum << 8, n);

    let var_q16: i64 = x
        .iter()
        .map(|&v| {
            let d = (i64::from(v) << 8) - mean_q8;
            d * d
        })
        .sum::<i64>()
        / n;
    // +1 keeps the divisor nonzero for a constant window (epsilon)
    let std_q8 = isqrt(var_q16 + 1).max(1);

    x.iter()
        .zip(gamma.iter().zip(beta.iter()))
        .map(|(&v, (&g, &b))| {
            let d_q8 = (i64::from(v) << 8) - mean_q8;
            let norm_q7 = div_round(d_q8 << 7, std_q8);
            let scaled = div_round(norm_q7 * i64::from(g), 127) + i64::from(b);
            clamp_i8(scaled as i32)
        })
        .collect()
}

/// Saturate to the int8 range.
pub fn clamp_i8(v: i32) -> i8 {
    v.clamp(-128, 127) as i8
}

/// Rounded signed division (half away from zero).
fn div_round(num: i64, den: i64) -> i64 {
    debug_assert!(den > 0);
    if num >= 0 {
        (num + den / 2) / den
    } else {
        (num - den / 2) / den
    }
}

/// Integer square root (floor).
fn isqrt(v: i64) -> i64 {
    debug_assert!(v >= 0);
    if v < 2 {
        return v;
    }
    let mut x = (v as f64).sqrt() as i64;
    // settle float seed to the exact floor
    while (x + 1) * (x + 1) <= v {
        x += 1;
    }
    while x * x > v {
        x -= 1;
    }
    x
}
