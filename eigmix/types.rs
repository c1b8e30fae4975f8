// ========================================================================================
//
//                       CORE DATA TYPES FOR THE EIGMIX ENGINE
//
// ========================================================================================
//
// This module holds the data contracts that cross module boundaries: the genotype byte
// encoding shared by every block source and the classifier, and the accumulated state
// handed from the engine to the normalizer.
//
// Types used by a single file live in that file, not here.

use ndarray::Array2;

// ========================================================================================
//                                 GENOTYPE ENCODING
// ========================================================================================

/// Genotype byte meaning "no call". Block sources write this value for missing
/// genotypes; the classifier treats every byte outside `0..=2` the same way.
pub const MISSING_GENOTYPE: u8 = 3;

/// Number of loci pulled from a block source per read. Fixed for a run.
pub const BLOCK_LOCI: usize = 512;

// ========================================================================================
//                              SHARED ACCUMULATOR STATE
// ========================================================================================

/// The two scalar sums that are broadcast into every cell at normalization time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GlobalSums {
    /// Sum over informative loci of the dominant-bucket product `nom`.
    pub numerator: f64,
    /// Sum over informative loci of `den = 2·freq·(1 - freq/2)`.
    pub denominator: f64,
    /// Number of loci that passed the frequency filter.
    pub informative_loci: usize,
}

impl GlobalSums {
    /// Folds a worker's local sums into this total.
    pub fn absorb(&mut self, other: &GlobalSums) {
        self.numerator += other.numerator;
        self.denominator += other.denominator;
        self.informative_loci += other.informative_loci;
    }
}

/// Everything the accumulation engine produced over a run. The two matrices are the
/// engine's own storage, moved out rather than copied.
///
/// `numerator` holds the per-pair corrections (not yet combined with the broadcast sum)
/// and is not symmetric: a pair's corrections may land in either `[i][j]` or `[j][i]`.
#[derive(Debug, Clone)]
pub struct AccumulatedMatrices {
    pub numerator: Array2<f64>,
    pub denominator: Array2<f64>,
    pub sums: GlobalSums,
}

impl AccumulatedMatrices {
    pub fn n_samples(&self) -> usize {
        self.numerator.nrows()
    }
}
