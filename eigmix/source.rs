//! Streaming access to genotype blocks.
//!
//! A source yields loci in order, a block at a time, as one genotype byte per sample
//! (`0`, `1`, `2`, or [`MISSING_GENOTYPE`](crate::types::MISSING_GENOTYPE)). Blocks are
//! locus-major: byte `l * n + s` of a filled buffer is sample `s` at the block's locus `l`.

use std::cmp::min;
use std::convert::Infallible;
use thiserror::Error;

pub trait GenotypeBlockSource {
    type Error;

    fn n_samples(&self) -> usize;

    /// Number of loci the source expects to yield, or `0` when unknown.
    fn n_loci(&self) -> usize;

    /// Rewinds to the first locus.
    fn reset(&mut self) -> Result<(), Self::Error>;

    /// Fills `storage` with up to `max_loci` loci and returns how many were written.
    /// `Ok(0)` means the source is exhausted.
    fn next_block_into(&mut self, max_loci: usize, storage: &mut [u8])
    -> Result<usize, Self::Error>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("in-memory genotypes need at least one sample")]
    NoSamples,
    #[error("genotype dimensions {n_samples} × {n_loci} overflow usize")]
    DimensionOverflow { n_samples: usize, n_loci: usize },
    #[error("expected {expected} genotype bytes for {n_samples} samples × {n_loci} loci, found {actual}")]
    LengthMismatch {
        n_samples: usize,
        n_loci: usize,
        expected: usize,
        actual: usize,
    },
}

/// Genotypes already held in memory, locus-major.
#[derive(Debug, Clone)]
pub struct InMemoryGenotypes<'a> {
    data: &'a [u8],
    n_samples: usize,
    n_loci: usize,
    cursor: usize,
}

impl<'a> InMemoryGenotypes<'a> {
    pub fn new(data: &'a [u8], n_samples: usize, n_loci: usize) -> Result<Self, SourceError> {
        if n_samples == 0 {
            return Err(SourceError::NoSamples);
        }
        let expected = n_samples
            .checked_mul(n_loci)
            .ok_or(SourceError::DimensionOverflow { n_samples, n_loci })?;
        if data.len() != expected {
            return Err(SourceError::LengthMismatch {
                n_samples,
                n_loci,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            n_samples,
            n_loci,
            cursor: 0,
        })
    }
}

impl GenotypeBlockSource for InMemoryGenotypes<'_> {
    type Error = Infallible;

    fn n_samples(&self) -> usize {
        self.n_samples
    }

    fn n_loci(&self) -> usize {
        self.n_loci
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.cursor = 0;
        Ok(())
    }

    fn next_block_into(
        &mut self,
        max_loci: usize,
        storage: &mut [u8],
    ) -> Result<usize, Self::Error> {
        let remaining = self.n_loci - self.cursor;
        let count = min(max_loci, remaining);
        if count == 0 {
            return Ok(0);
        }
        let len = count * self.n_samples;
        let start = self.cursor * self.n_samples;
        storage[..len].copy_from_slice(&self.data[start..start + len]);
        self.cursor += count;
        Ok(count)
    }
}
