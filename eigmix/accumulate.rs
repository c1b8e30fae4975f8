// ========================================================================================
//
//                    THE ROW-LOCKED RELATIONSHIP ACCUMULATION ENGINE
//
// ========================================================================================
//
// ### 1. Purpose ###
//
// This module folds classified loci into two dense `n × n` accumulators (numerator and
// denominator) and two scalar sums. The normalizer later combines them into the
// relationship matrix:
//
//     result[i][j] = (SumNumerator + N[i][j] + N[j][i]) / (SumDenominator - D[i][j] - D[j][i])
//
// ### 2. Broadcast, then correct ###
//
// At an informative locus with major-allele frequency `f`, the centered product of two
// samples with genotypes `a` and `b` is `(a - f)(b - f)`. One bucket (the "dominant"
// one: major homozygotes unless heterozygotes outnumber them) has a constant
// self-product `nom`. Instead of writing `nom` into every dominant pair,
// `nom` joins the scalar `SumNumerator`, which the normalizer adds to every cell. Every
// other pair receives an explicit write of `(a - f)(b - f) - nom` so that the broadcast
// cancels out for them. The quadratic loop over the largest bucket never runs.
//
// Heterozygous diagonals get an extra `-1`, the unbiased self-relatedness correction.
//
// ### 3. Storage ###
//
// Each accumulator is one contiguous `n × n` array, allocated once when the engine is
// built and moved out unchanged by `finish`. The engine never holds more than these two
// matrices, so a run peaks at `2·n²` accumulator values.
//
// ### 4. Concurrency ###
//
// For every block, row `p` of both arrays is borrowed as one `SampleRows` pair behind its
// own `Mutex`. A write burst into row `p` holds only lock `p`, so workers processing
// different loci contend only when they touch the same sample at the same instant.
// Worker-local scalar sums are merged under one coarse lock per dispatched range.
//
// With a single worker the identical update runs against the bare row pairs, with no
// locking at all.

use crate::classify::{CanonicalBuckets, GenotypeBuckets};
use crate::dispatch::ParallelDispatcher;
use crate::types::{AccumulatedMatrices, GlobalSums};
use ndarray::{Array2, ArrayViewMut1, Axis};
use rayon::ThreadPoolBuildError;
use std::ops::Range;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} samples overflow the addressable size of an n×n matrix")]
    TooManySamples(usize),
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] ThreadPoolBuildError),
    #[error("block holds {actual} genotype bytes but {n_loci} loci of {n_samples} samples need {expected}")]
    ShortBlock {
        n_loci: usize,
        n_samples: usize,
        expected: usize,
        actual: usize,
    },
}

// ========================================================================================
//                                 ROW ACCESS STRATEGIES
// ========================================================================================

/// Row `p` of both accumulators. A single acquisition of sample `p`'s lock covers every
/// write the engine makes on behalf of that sample.
struct SampleRows<'m> {
    numerator: ArrayViewMut1<'m, f64>,
    denominator: ArrayViewMut1<'m, f64>,
}

/// Borrows every row of the two accumulators as per-sample pairs.
fn sample_rows<'m>(
    numerator: &'m mut Array2<f64>,
    denominator: &'m mut Array2<f64>,
) -> impl Iterator<Item = SampleRows<'m>> {
    numerator
        .axis_iter_mut(Axis(0))
        .zip(denominator.axis_iter_mut(Axis(0)))
        .map(|(numerator, denominator)| SampleRows {
            numerator,
            denominator,
        })
}

/// How a write burst reaches the row pair of one sample.
trait RowAccess {
    fn update_row<F>(&mut self, sample: usize, update: F)
    where
        F: FnOnce(&mut SampleRows<'_>);
}

/// Shared access for concurrent workers: every burst holds that sample's lock.
struct LockedRows<'a, 'm> {
    rows: &'a [Mutex<SampleRows<'m>>],
}

impl RowAccess for LockedRows<'_, '_> {
    #[inline]
    fn update_row<F>(&mut self, sample: usize, update: F)
    where
        F: FnOnce(&mut SampleRows<'_>),
    {
        // Rows hold plain f64 sums; poisoning carries no invariant.
        let mut guard = self.rows[sample]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        update(&mut *guard);
    }
}

/// Exclusive access for the single-worker path: no locks are taken.
struct ExclusiveRows<'a, 'm> {
    rows: &'a mut [SampleRows<'m>],
}

impl RowAccess for ExclusiveRows<'_, '_> {
    #[inline]
    fn update_row<F>(&mut self, sample: usize, update: F)
    where
        F: FnOnce(&mut SampleRows<'_>),
    {
        update(&mut self.rows[sample]);
    }
}

// ========================================================================================
//                                   PUBLIC ENGINE
// ========================================================================================

enum Execution {
    Serial,
    Parallel(ParallelDispatcher),
}

/// Owns the accumulators and the per-worker scratch for one run.
///
/// Constructed fresh for each run; [`AccumulationEngine::finish`] consumes it and hands
/// over the accumulator storage without copying it.
pub struct AccumulationEngine {
    n_samples: usize,
    numerator: Array2<f64>,
    denominator: Array2<f64>,
    sums: Mutex<GlobalSums>,
    scratch: Vec<GenotypeBuckets>,
    execution: Execution,
}

impl AccumulationEngine {
    /// Allocates zeroed accumulators for `n_samples` samples and `workers` workers.
    /// A worker count of zero is treated as one.
    pub fn new(n_samples: usize, workers: usize) -> Result<Self, EngineError> {
        n_samples
            .checked_mul(n_samples)
            .and_then(|cells| cells.checked_mul(2 * core::mem::size_of::<f64>()))
            .ok_or(EngineError::TooManySamples(n_samples))?;

        let workers = workers.max(1);
        let execution = if workers == 1 {
            Execution::Serial
        } else {
            Execution::Parallel(ParallelDispatcher::new(workers)?)
        };

        let scratch = (0..workers).map(|_| GenotypeBuckets::new(n_samples)).collect();

        Ok(Self {
            n_samples,
            numerator: Array2::zeros((n_samples, n_samples)),
            denominator: Array2::zeros((n_samples, n_samples)),
            sums: Mutex::new(GlobalSums::default()),
            scratch,
            execution,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn workers(&self) -> usize {
        self.scratch.len()
    }

    /// Snapshot of the global sums accumulated so far.
    pub fn sums(&self) -> GlobalSums {
        *self.sums.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Folds the first `n_loci` loci of `block` into the accumulators.
    ///
    /// `block` is locus-major: bytes `[l * n, (l + 1) * n)` are the genotypes of locus `l`.
    pub fn consume_block(&mut self, block: &[u8], n_loci: usize) -> Result<(), EngineError> {
        let expected = n_loci * self.n_samples;
        if block.len() < expected {
            return Err(EngineError::ShortBlock {
                n_loci,
                n_samples: self.n_samples,
                expected,
                actual: block.len(),
            });
        }
        if n_loci == 0 || self.n_samples == 0 {
            return Ok(());
        }
        let block = &block[..expected];

        match &self.execution {
            Execution::Serial => {
                let mut rows: Vec<SampleRows<'_>> =
                    sample_rows(&mut self.numerator, &mut self.denominator).collect();
                let mut access = ExclusiveRows { rows: &mut rows };
                let local = accumulate_range(&mut access, &mut self.scratch[0], block, 0..n_loci);
                self.sums
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .absorb(&local);
            }
            Execution::Parallel(dispatcher) => {
                let rows: Vec<Mutex<SampleRows<'_>>> =
                    sample_rows(&mut self.numerator, &mut self.denominator)
                        .map(Mutex::new)
                        .collect();
                let rows = rows.as_slice();
                let sums = &self.sums;
                dispatcher.dispatch(&mut self.scratch, n_loci, |_, buckets, range| {
                    let mut access = LockedRows { rows };
                    let local = accumulate_range(&mut access, buckets, block, range);
                    sums.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .absorb(&local);
                });
            }
        }
        Ok(())
    }

    /// Moves the raw accumulators out to the caller.
    pub fn finish(self) -> AccumulatedMatrices {
        AccumulatedMatrices {
            numerator: self.numerator,
            denominator: self.denominator,
            sums: self.sums.into_inner().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

// ========================================================================================
//                                PER-LOCUS UPDATE
// ========================================================================================

/// Classifies and accumulates every locus in `loci`, returning the range's local sums.
fn accumulate_range<R: RowAccess>(
    rows: &mut R,
    buckets: &mut GenotypeBuckets,
    block: &[u8],
    loci: Range<usize>,
) -> GlobalSums {
    let n = buckets.n_samples();
    let mut local = GlobalSums::default();
    for locus in loci {
        buckets.classify(&block[locus * n..(locus + 1) * n]);
        accumulate_locus(rows, buckets.canonical(), &mut local);
    }
    local
}

fn accumulate_locus<R: RowAccess>(
    rows: &mut R,
    locus: CanonicalBuckets<'_>,
    local: &mut GlobalSums,
) {
    let Some(freq) = locus.allele_frequency() else {
        return;
    };
    let CanonicalBuckets {
        minor_hom,
        het,
        major_hom,
        missing,
    } = locus;

    let nom = if major_hom.len() >= het.len() {
        accumulate_major_dominant(rows, minor_hom, het, major_hom, freq)
    } else {
        accumulate_het_dominant(rows, minor_hom, het, major_hom, freq)
    };

    // 0 - 0: the minor homozygous bucket is never dominant.
    let v0 = freq * freq - nom;
    for (pos, &p) in minor_hom.iter().enumerate() {
        rows.update_row(p, |row| add_at(&mut row.numerator, &minor_hom[pos..], v0));
    }

    let den = 2.0 * freq * (1.0 - 0.5 * freq);
    for &p in missing {
        rows.update_row(p, |row| add_to_row(&mut row.denominator, den));
    }

    local.numerator += nom;
    local.denominator += den;
    local.informative_loci += 1;
}

/// Major homozygotes dominate: `nom = (2 - f)²`. Returns `nom`.
#[inline]
fn accumulate_major_dominant<R: RowAccess>(
    rows: &mut R,
    minor_hom: &[usize],
    het: &[usize],
    major_hom: &[usize],
    freq: f64,
) -> f64 {
    let nom = (2.0 - freq) * (2.0 - freq);

    // 2 - 1 / 2 - 0
    let v0 = (2.0 - freq) * (-freq) - nom;
    let v1 = (2.0 - freq) * (1.0 - freq) - nom;
    if !(het.is_empty() && minor_hom.is_empty()) {
        for &p in major_hom {
            rows.update_row(p, |row| {
                add_at(&mut row.numerator, het, v1);
                add_at(&mut row.numerator, minor_hom, v0);
            });
        }
    }

    // 1 - 1 / 1 - 0
    let v0 = (1.0 - freq) * (-freq) - nom;
    let v1 = (1.0 - freq) * (1.0 - freq) - nom;
    for (pos, &p) in het.iter().enumerate() {
        rows.update_row(p, |row| {
            row.numerator[p] += v1 - 1.0;
            add_at(&mut row.numerator, &het[pos + 1..], v1);
            add_at(&mut row.numerator, minor_hom, v0);
        });
    }

    nom
}

/// Heterozygotes dominate: `nom = (1 - f)²`. Returns `nom`.
#[inline]
fn accumulate_het_dominant<R: RowAccess>(
    rows: &mut R,
    minor_hom: &[usize],
    het: &[usize],
    major_hom: &[usize],
    freq: f64,
) -> f64 {
    let nom = (1.0 - freq) * (1.0 - freq);

    // 1 - 2 / 1 - 0, plus the heterozygous self term on top of the broadcast
    let v0 = (1.0 - freq) * (-freq) - nom;
    let v2 = (1.0 - freq) * (2.0 - freq) - nom;
    for &p in het {
        rows.update_row(p, |row| {
            row.numerator[p] -= 1.0;
            add_at(&mut row.numerator, major_hom, v2);
            add_at(&mut row.numerator, minor_hom, v0);
        });
    }

    // 2 - 2 / 2 - 0
    let v0 = (2.0 - freq) * (-freq) - nom;
    let v2 = (2.0 - freq) * (2.0 - freq) - nom;
    for (pos, &p) in major_hom.iter().enumerate() {
        rows.update_row(p, |row| {
            add_at(&mut row.numerator, &major_hom[pos..], v2);
            add_at(&mut row.numerator, minor_hom, v0);
        });
    }

    nom
}

#[inline(always)]
fn add_at(row: &mut ArrayViewMut1<'_, f64>, columns: &[usize], value: f64) {
    for &col in columns {
        row[col] += value;
    }
}

#[inline(always)]
fn add_to_row(row: &mut ArrayViewMut1<'_, f64>, value: f64) {
    for cell in row.iter_mut() {
        *cell += value;
    }
}
