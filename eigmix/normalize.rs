//! Final combine of the accumulators into the relationship matrix.
//!
//! The broadcast sums are folded into every cell here, and each unordered pair's two
//! numerator halves are merged. The diagonal adds its own missing mass to the global
//! denominator; off-diagonal cells subtract both partners' missing mass.

use crate::types::AccumulatedMatrices;
use ndarray::Array2;

/// Turns the raw accumulators into the symmetric relationship matrix, reusing the
/// numerator's storage.
///
/// Both halves of an off-diagonal pair are assigned the same computed value, so the
/// result is bitwise symmetric.
pub fn normalize(accumulated: AccumulatedMatrices) -> Array2<f64> {
    let AccumulatedMatrices {
        numerator: mut matrix,
        denominator,
        sums,
    } = accumulated;
    let n = matrix.nrows();
    let sum_num = sums.numerator;
    let sum_den = sums.denominator;

    for i in 0..n {
        matrix[[i, i]] = (sum_num + matrix[[i, i]]) / (sum_den + denominator[[i, i]]);
        for j in (i + 1)..n {
            let value = (sum_num + matrix[[i, j]] + matrix[[j, i]])
                / (sum_den - denominator[[i, j]] - denominator[[j, i]]);
            matrix[[i, j]] = value;
            matrix[[j, i]] = value;
        }
    }

    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulate::AccumulationEngine;
    use crate::types::GlobalSums;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn diagonal_adds_and_off_diagonal_subtracts_missing_mass() {
        let accumulated = AccumulatedMatrices {
            numerator: array![[1.0, 2.0], [3.0, 4.0]],
            denominator: array![[0.5, 0.25], [0.125, 1.0]],
            sums: GlobalSums {
                numerator: 10.0,
                denominator: 8.0,
                informative_loci: 3,
            },
        };
        let result = normalize(accumulated);

        assert_eq!(result[[0, 0]], 11.0 / 8.5);
        assert_eq!(result[[1, 1]], 14.0 / 9.0);
        assert_eq!(result[[0, 1]], 15.0 / (8.0 - 0.25 - 0.125));
        assert_eq!(result[[1, 0]], result[[0, 1]]);
    }

    #[test]
    fn four_sample_locus_normalizes_to_centered_products() {
        let mut engine = AccumulationEngine::new(4, 1).expect("engine");
        engine.consume_block(&[0, 1, 2, 2], 1).expect("block");
        let result = normalize(engine.finish());

        // freq = 1.25, den = 0.9375: cell = (g_i - f)(g_j - f) / den, het diagonal - 1.
        assert_abs_diff_eq!(result[[0, 0]], 5.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result[[1, 1]], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result[[2, 2]], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(result[[3, 3]], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(result[[2, 3]], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(result[[0, 2]], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result[[0, 3]], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result[[1, 2]], -0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(result[[0, 1]], 1.0 / 3.0, epsilon = 1e-12);

        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(result[[i, j]], result[[j, i]]);
            }
        }
    }

    #[test]
    fn empty_matrix_is_returned_unchanged() {
        let accumulated = AccumulatedMatrices {
            numerator: Array2::zeros((0, 0)),
            denominator: Array2::zeros((0, 0)),
            sums: GlobalSums::default(),
        };
        assert_eq!(normalize(accumulated).dim(), (0, 0));
    }

    #[test]
    fn result_reuses_the_numerator_storage() {
        let mut engine = AccumulationEngine::new(4, 2).expect("engine");
        engine.consume_block(&[0, 1, 2, 2, 2, 2, 1, 0], 2).expect("block");
        let accumulated = engine.finish();
        let storage = accumulated.numerator.as_ptr();

        let result = normalize(accumulated);
        assert_eq!(result.as_ptr(), storage);
    }
}
