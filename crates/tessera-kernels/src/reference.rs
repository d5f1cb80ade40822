//! Host reference implementations of the kernels.
//!
//! Accumulation order matches the device kernels, so results agree to well
//! within the default verification tolerance.

/// `c[i] = a[i] + b[i]`.
pub fn vector_add(a: &[f32], b: &[f32]) -> Vec<f32> {
    assert_eq!(a.len(), b.len(), "vector_add operands differ in length");
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

/// Row-major `C = A * B` with A `height_a x width_a` and B `width_a x width_b`.
pub fn matrix_mul(a: &[f32], b: &[f32], height_a: usize, width_a: usize, width_b: usize) -> Vec<f32> {
    assert_eq!(a.len(), height_a * width_a, "A has the wrong shape");
    assert_eq!(b.len(), width_a * width_b, "B has the wrong shape");

    let mut c = vec![0.0f32; height_a * width_b];
    for row in 0..height_a {
        for col in 0..width_b {
            let mut sum = 0.0f32;
            for k in 0..width_a {
                sum += a[row * width_a + k] * b[k * width_b + col];
            }
            c[row * width_b + col] = sum;
        }
    }
    c
}

/// Transpose of a row-major `height x width` matrix.
pub fn transpose(a: &[f32], height: usize, width: usize) -> Vec<f32> {
    assert_eq!(a.len(), height * width, "matrix has the wrong shape");

    let mut t = vec![0.0f32; height * width];
    for row in 0..height {
        for col in 0..width {
            t[col * height + row] = a[row * width + col];
        }
    }
    t
}

/// Input block prefixed with `taps - 1` zeros, as the FIR kernel reads it.
pub fn fir_history(taps: usize, input: &[f32]) -> Vec<f32> {
    let mut history = vec![0.0f32; taps.saturating_sub(1)];
    history.extend_from_slice(input);
    history
}

/// Sliding-window FIR: `out[i] = sum_j coeff[j] * history[i + j]`.
pub fn fir(coeff: &[f32], input: &[f32]) -> Vec<f32> {
    let history = fir_history(coeff.len(), input);
    (0..input.len())
        .map(|i| {
            coeff
                .iter()
                .enumerate()
                .fold(0.0f32, |sum, (j, c)| sum + c * history[i + j])
        })
        .collect()
}
