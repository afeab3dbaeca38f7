//! Small strided GEMM used to build regression targets.
//!
//! The default build uses a plain triple loop; the `matrixmultiply` feature
//! swaps in `dgemm`. Strides make the storage order explicit, so column-major
//! operands need no transposition.

/// `C = alpha * A * B + beta * C` with `A: (m, k)`, `B: (k, n)`, `C: (m, n)`.
///
/// `beta == 0.0` overwrites `C` without reading it. The only caller is the
/// per-sample target `vec(A * B)`, a product of a few dozen entries; the
/// general stride and scale arguments let the same kernel switch to `dgemm`.
#[allow(clippy::too_many_arguments)]
#[inline]
pub(crate) fn gemm_f64(
    m: usize,
    n: usize,
    k: usize,
    alpha: f64,
    a: &[f64],
    rsa: usize,
    csa: usize,
    b: &[f64],
    rsb: usize,
    csb: usize,
    beta: f64,
    c: &mut [f64],
    rsc: usize,
    csc: usize,
) {
    debug_assert!(m > 0 && n > 0 && k > 0);
    debug_assert!(a.len() > (m - 1) * rsa + (k - 1) * csa);
    debug_assert!(b.len() > (k - 1) * rsb + (n - 1) * csb);
    debug_assert!(c.len() > (m - 1) * rsc + (n - 1) * csc);

    #[cfg(feature = "matrixmultiply")]
    {
        // matrixmultiply supports arbitrary strides.
        unsafe {
            matrixmultiply::dgemm(
                m,
                k,
                n,
                alpha,
                a.as_ptr(),
                rsa as isize,
                csa as isize,
                b.as_ptr(),
                rsb as isize,
                csb as isize,
                beta,
                c.as_mut_ptr(),
                rsc as isize,
                csc as isize,
            );
        }
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0_f64;
            let a0 = i * rsa;
            let b0 = j * csb;

            for p in 0..k {
                let av = a[a0 + p * csa];
                let bv = b[p * rsb + b0];
                acc = av.mul_add(bv, acc);
            }

            let idx = i * rsc + j * csc;
            c[idx] = if beta == 0.0 {
                alpha * acc
            } else {
                alpha * acc + beta * c[idx]
            };
        }
    }
}

/// Column-major product of `A: (m, n)` and `B: (n, k)` into `C: (m, k)`.
#[inline]
pub(crate) fn matmul_col_major(
    m: usize,
    n: usize,
    k: usize,
    a: &[f64],
    b: &[f64],
    c: &mut [f64],
) {
    gemm_f64(m, k, n, 1.0, a, 1, m, b, 1, n, 0.0, c, 1, m);
}
