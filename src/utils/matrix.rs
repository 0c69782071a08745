//! Row-major matrix kernels
//!
//! All buffers are flat slices in row-major order, one row per sample of the
//! batch. When `parallel` is set, rows are distributed over the rayon pool:
//! every worker writes a disjoint set of output rows, and reductions over the
//! batch are completed before the function returns.

use crate::utils::weight::Weight;
use rayon::prelude::*;

fn affine_row<W: Weight>(input: &[W], w: &[W], bias: &[W], out: &mut [W]) {
    let n_out = out.len();
    out.copy_from_slice(bias);
    for (i, &x) in input.iter().enumerate() {
        if x == W::zero() {
            continue;
        }
        let w_row = &w[i * n_out..(i + 1) * n_out];
        for (o, &wij) in out.iter_mut().zip(w_row) {
            *o = *o + x * wij;
        }
    }
}

fn affine_row_transposed<W: Weight>(input: &[W], w: &[W], bias: &[W], out: &mut [W]) {
    let n_in = input.len();
    for (i, o) in out.iter_mut().enumerate() {
        let w_row = &w[i * n_in..(i + 1) * n_in];
        let mut acc = bias[i];
        for (&x, &wij) in input.iter().zip(w_row) {
            acc = acc + x * wij;
        }
        *o = acc;
    }
}

/// `out[b, j] = bias[j] + Σ_i input[b, i] · w[i, j]` with `w` of shape `n_in × n_out`.
pub fn affine_rows<W: Weight>(
    input: &[W],
    w: &[W],
    bias: &[W],
    out: &mut [W],
    n_in: usize,
    n_out: usize,
    parallel: bool,
) {
    assert_eq!(w.len(), n_in * n_out, "weight shape mismatch in affine_rows");
    assert_eq!(bias.len(), n_out, "bias length mismatch in affine_rows");
    assert_eq!(
        input.len() / n_in,
        out.len() / n_out,
        "batch size mismatch in affine_rows"
    );

    if parallel {
        out.par_chunks_mut(n_out)
            .zip(input.par_chunks(n_in))
            .for_each(|(o, x)| affine_row(x, w, bias, o));
    } else {
        for (o, x) in out.chunks_mut(n_out).zip(input.chunks(n_in)) {
            affine_row(x, w, bias, o);
        }
    }
}

/// `out[b, i] = bias[i] + Σ_j input[b, j] · w[i, j]` with `w` of shape `n_out × n_in`.
///
/// This is the product with the transposed weight matrix.
pub fn affine_rows_transposed<W: Weight>(
    input: &[W],
    w: &[W],
    bias: &[W],
    out: &mut [W],
    n_in: usize,
    n_out: usize,
    parallel: bool,
) {
    assert_eq!(w.len(), n_in * n_out, "weight shape mismatch in affine_rows_transposed");
    assert_eq!(bias.len(), n_out, "bias length mismatch in affine_rows_transposed");

    if parallel {
        out.par_chunks_mut(n_out)
            .zip(input.par_chunks(n_in))
            .for_each(|(o, x)| affine_row_transposed(x, w, bias, o));
    } else {
        for (o, x) in out.chunks_mut(n_out).zip(input.chunks(n_in)) {
            affine_row_transposed(x, w, bias, o);
        }
    }
}

fn outer_add<W: Weight>(acc: &mut [W], a: &[W], b: &[W]) {
    let n_b = b.len();
    for (i, &ai) in a.iter().enumerate() {
        if ai == W::zero() {
            continue;
        }
        for (o, &bj) in acc[i * n_b..(i + 1) * n_b].iter_mut().zip(b) {
            *o = *o + ai * bj;
        }
    }
}

/// `out[i, j] = Σ_b a[b, i] · b[b, j]`, overwriting `out`.
pub fn batch_outer<W: Weight>(
    a: &[W],
    b: &[W],
    out: &mut [W],
    n_a: usize,
    n_b: usize,
    parallel: bool,
) {
    assert_eq!(out.len(), n_a * n_b, "output shape mismatch in batch_outer");
    assert_eq!(a.len() / n_a, b.len() / n_b, "batch size mismatch in batch_outer");

    if parallel {
        let sum = a
            .par_chunks(n_a)
            .zip(b.par_chunks(n_b))
            .fold(
                || vec![W::zero(); n_a * n_b],
                |mut acc, (ra, rb)| {
                    outer_add(&mut acc, ra, rb);
                    acc
                },
            )
            .reduce(
                || vec![W::zero(); n_a * n_b],
                |mut lhs, rhs| {
                    add_assign(&mut lhs, &rhs);
                    lhs
                },
            );
        out.copy_from_slice(&sum);
    } else {
        out.fill(W::zero());
        for (ra, rb) in a.chunks(n_a).zip(b.chunks(n_b)) {
            outer_add(out, ra, rb);
        }
    }
}

/// Column sums: `out[j] = Σ_r data[r, j]`, overwriting `out`.
pub fn sum_rows<W: Weight>(data: &[W], cols: usize, out: &mut [W]) {
    assert_eq!(out.len(), cols, "output length mismatch in sum_rows");
    out.fill(W::zero());
    for row in data.chunks_exact(cols) {
        add_assign(out, row);
    }
}

/// `lhs += rhs`, elementwise.
pub fn add_assign<W: Weight>(lhs: &mut [W], rhs: &[W]) {
    for (l, &r) in lhs.iter_mut().zip(rhs) {
        *l = *l + r;
    }
}

/// `lhs -= rhs`, elementwise.
pub fn sub_assign<W: Weight>(lhs: &mut [W], rhs: &[W]) {
    for (l, &r) in lhs.iter_mut().zip(rhs) {
        *l = *l - r;
    }
}

/// Multiply every element by `factor`.
pub fn scale<W: Weight>(data: &mut [W], factor: W) {
    for value in data.iter_mut() {
        *value = *value * factor;
    }
}
