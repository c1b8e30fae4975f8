// ========================================================================================
//
//                     EIGEN-ANALYSIS OF THE RELATIONSHIP MATRIX
//
// ========================================================================================
//
// The normalized relationship matrix `K` is handed over negated and packed: its upper
// triangle, row-major, `n(n+1)/2` values. The solver takes ownership of the packed
// values, expands them back into `K` and frees them before decomposing. The largest
// eigenvalues of `K` (the smallest of `-K`) come back in descending order.
//
// Two numerical paths are available:
//   - `Dense`: full self-adjoint decomposition of the unpacked matrix.
//   - `Partial`: faer's matrix-free Krylov-Schur solver for a handful of leading pairs
//     of a large matrix. It falls back to `Dense` for small problems, or when fewer
//     than the requested pairs converge.

use core::cmp::Ordering;
use core::fmt;
use dyn_stack::{MemBuffer, MemStack};
use faer::matrix_free::eigen::{PartialEigenParams, partial_eigen, partial_eigen_scratch};
use faer::{Col, Mat, MatRef, Side, c64, get_global_parallelism};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DENSE_EIGEN_FALLBACK_THRESHOLD: usize = 64;
const PARTIAL_SUBSPACE_SLACK: usize = 8;

#[derive(Debug, Error, PartialEq)]
pub enum EigenError {
    #[error("requested {requested} eigenpairs from a {n}×{n} matrix")]
    TooManyRequested { requested: usize, n: usize },
    #[error("packed upper triangle of a {n}×{n} matrix needs {expected} values, found {actual}")]
    PackedLength {
        n: usize,
        expected: usize,
        actual: usize,
    },
    #[error("relationship matrix is {rows}×{cols}, expected a square matrix")]
    NotSquare { rows: usize, cols: usize },
    #[error("relationship matrix contains non-finite values")]
    NonFinite,
    #[error("eigendecomposition failed: {0}")]
    Decomposition(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EigenMethod {
    #[default]
    Dense,
    Partial,
}

impl fmt::Display for EigenMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EigenMethod::Dense => f.write_str("dense"),
            EigenMethod::Partial => f.write_str("partial"),
        }
    }
}

/// The negated relationship matrix in packed upper-triangular, row-major storage.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedUpperTriangle {
    n: usize,
    values: Vec<f64>,
}

impl PackedUpperTriangle {
    /// Negates `matrix` and keeps its upper triangle.
    pub fn from_relationship(matrix: &Array2<f64>) -> Result<Self, EigenError> {
        let (rows, cols) = matrix.dim();
        if rows != cols {
            return Err(EigenError::NotSquare { rows, cols });
        }
        let n = rows;
        let mut values = Vec::with_capacity(packed_len(n));
        for i in 0..n {
            values.extend(matrix.row(i).iter().skip(i).map(|v| -v));
        }
        Ok(Self { n, values })
    }

    /// Wraps already packed, already negated values.
    pub fn from_raw(n: usize, values: Vec<f64>) -> Result<Self, EigenError> {
        let expected = packed_len(n);
        if values.len() != expected {
            return Err(EigenError::PackedLength {
                n,
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { n, values })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Entry `(i, j)` of the negated matrix; either triangle may be addressed.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (row, col) = if i <= j { (i, j) } else { (j, i) };
        self.values[row * (2 * self.n - row + 1) / 2 + (col - row)]
    }
}

fn packed_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Leading eigenpairs of the relationship matrix.
///
/// `values` are in descending order; column `k` of `vectors` belongs to `values[k]`.
#[derive(Debug, Clone)]
pub struct Eigenpairs {
    pub values: Vec<f64>,
    pub vectors: Array2<f64>,
}

impl Eigenpairs {
    fn empty(n: usize) -> Self {
        Self {
            values: Vec::new(),
            vectors: Array2::zeros((n, 0)),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub trait EigenSolver {
    /// Consumes the packed triangle so its storage can be released once the solver has
    /// unpacked it.
    fn solve(
        &self,
        packed: PackedUpperTriangle,
        requested: usize,
        method: EigenMethod,
    ) -> Result<Eigenpairs, EigenError>;
}

/// Eigensolver backed by faer.
///
/// The packed input is expanded into a dense `n × n` matrix and dropped before any
/// decomposition starts. The `Dense` path then holds that matrix plus faer's full basis
/// of `n` eigenvectors, about `2·n²` values at its peak.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerEigenSolver;

impl EigenSolver for FaerEigenSolver {
    fn solve(
        &self,
        packed: PackedUpperTriangle,
        requested: usize,
        method: EigenMethod,
    ) -> Result<Eigenpairs, EigenError> {
        let n = packed.n();
        if requested > n {
            return Err(EigenError::TooManyRequested { requested, n });
        }
        if packed.as_slice().iter().any(|v| !v.is_finite()) {
            return Err(EigenError::NonFinite);
        }
        if requested == 0 {
            return Ok(Eigenpairs::empty(n));
        }

        let mut relationship = unpack_relationship(packed);
        match method {
            EigenMethod::Dense => dense_eigenpairs(relationship.as_ref(), requested),
            EigenMethod::Partial => {
                if n <= DENSE_EIGEN_FALLBACK_THRESHOLD || requested + PARTIAL_SUBSPACE_SLACK >= n {
                    log::debug!(
                        "Matrix of {n} samples is small for {requested} pairs; using the dense solver"
                    );
                    return dense_eigenpairs(relationship.as_ref(), requested);
                }
                match partial_eigenpairs(&mut relationship, requested) {
                    Some(pairs) => Ok(pairs),
                    None => {
                        log::warn!(
                            "Partial eigensolver did not converge on {requested} pairs; falling back to the dense solver"
                        );
                        dense_eigenpairs(relationship.as_ref(), requested)
                    }
                }
            }
        }
    }
}

/// Expands the packed negated triangle back into the full, un-negated matrix `K`.
fn unpack_relationship(packed: PackedUpperTriangle) -> Mat<f64> {
    let n = packed.n();
    Mat::from_fn(n, n, |i, j| -packed.get(i, j))
}

fn dense_eigenpairs(relationship: MatRef<'_, f64>, requested: usize) -> Result<Eigenpairs, EigenError> {
    let n = relationship.nrows();
    let eig = relationship
        .self_adjoint_eigen(Side::Lower)
        .map_err(|err| EigenError::Decomposition(format!("{err:?}")))?;

    let diag = eig.S().column_vector().as_mat();
    let mut ordering: Vec<(usize, f64)> = (0..n).map(|idx| (idx, diag[(idx, 0)])).collect();
    ordering.sort_by(|lhs, rhs| rhs.1.partial_cmp(&lhs.1).unwrap_or(Ordering::Equal));
    ordering.truncate(requested);

    Ok(collect_pairs(&ordering, eig.U()))
}

/// Runs the matrix-free solver on `K + shift·I`, where the Gershgorin shift makes the
/// operator positive semidefinite so its largest-magnitude pairs are the largest of `K`.
///
/// The shift is applied to the diagonal in place; the original diagonal is written back
/// before returning, whether or not the solver converged.
fn partial_eigenpairs(relationship: &mut Mat<f64>, requested: usize) -> Option<Eigenpairs> {
    let n = relationship.nrows();
    let shift = gershgorin_bound(relationship.as_ref());
    let diagonal: Vec<f64> = (0..n).map(|i| relationship[(i, i)]).collect();
    for (i, &value) in diagonal.iter().enumerate() {
        relationship[(i, i)] = value + shift;
    }

    let params = partial_solver_params(n, requested);
    let par = get_global_parallelism();
    let v0 = Col::from_fn(n, |_| 1.0 / (n as f64).sqrt());
    let mut eigvecs = Mat::<c64>::zeros(n, requested);
    let mut eigvals = vec![c64::new(0.0, 0.0); requested];

    let info = {
        let op = relationship.as_ref();
        let mut mem = MemBuffer::new(partial_eigen_scratch::<f64>(&op, requested, par, params));
        partial_eigen::<f64>(
            eigvecs.as_mut(),
            &mut eigvals,
            &op,
            v0.as_ref(),
            f64::EPSILON * 128.0,
            par,
            MemStack::new(&mut mem),
            params,
        )
    };

    for (i, &value) in diagonal.iter().enumerate() {
        relationship[(i, i)] = value;
    }
    if info.n_converged_eigen < requested {
        return None;
    }

    let basis = real_basis(eigvecs.as_ref());
    let mut ordering: Vec<(usize, f64)> = eigvals
        .iter()
        .enumerate()
        .map(|(idx, value)| (idx, value.re - shift))
        .collect();
    ordering.sort_by(|lhs, rhs| rhs.1.partial_cmp(&lhs.1).unwrap_or(Ordering::Equal));

    Some(collect_pairs(&ordering, basis.as_ref()))
}

/// Rotates each complex eigenvector onto the real axis and rescales it to unit length.
/// Eigenvectors of a real symmetric matrix are real up to a global phase.
fn real_basis(vectors: MatRef<'_, c64>) -> Mat<f64> {
    let (n, k) = vectors.shape();
    let mut basis = Mat::<f64>::zeros(n, k);
    for col in 0..k {
        let pivot = (0..n)
            .map(|row| vectors[(row, col)])
            .fold(c64::new(0.0, 0.0), |best, z| if z.norm() > best.norm() { z } else { best });
        let magnitude = pivot.norm();
        if magnitude == 0.0 {
            continue;
        }
        let phase = pivot.conj() / magnitude;
        let mut norm = 0.0;
        for row in 0..n {
            let value = (vectors[(row, col)] * phase).re;
            basis[(row, col)] = value;
            norm += value * value;
        }
        let norm = norm.sqrt();
        for row in 0..n {
            basis[(row, col)] /= norm;
        }
    }
    basis
}

fn collect_pairs(ordering: &[(usize, f64)], basis: MatRef<'_, f64>) -> Eigenpairs {
    let values = ordering.iter().map(|&(_, value)| value).collect();
    let vectors = Array2::from_shape_fn((basis.nrows(), ordering.len()), |(row, out)| {
        basis[(row, ordering[out].0)]
    });
    Eigenpairs { values, vectors }
}

fn gershgorin_bound(matrix: MatRef<'_, f64>) -> f64 {
    let n = matrix.nrows();
    (0..n)
        .map(|i| (0..n).map(|j| matrix[(i, j)].abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

fn partial_solver_params(n: usize, target: usize) -> PartialEigenParams {
    let mut params = PartialEigenParams::default();
    let max_available = n.saturating_sub(1);
    params.min_dim = target.max(64).min(max_available);
    params.max_dim = (2 * target).max(128).min(max_available);
    if params.max_dim < params.min_dim {
        params.max_dim = params.min_dim;
    }
    params.max_restarts = 2048;
    params
}
