// ========================================================================================
//
//                              RUN ORCHESTRATION
//
// ========================================================================================
//
// Drives one EIGMIX run end to end:
//
//     block source ──► accumulation engine ──► normalizer ──► packed handoff ──► solver
//
// The engine is built fresh for every run and consumed when accumulation finishes, so no
// state leaks between runs.

use crate::accumulate::{AccumulationEngine, EngineError};
use crate::config::EigMixConfig;
use crate::eigen::{EigenError, EigenSolver, Eigenpairs, PackedUpperTriangle};
use crate::normalize::normalize;
use crate::progress::AccumulationProgressObserver;
use crate::source::GenotypeBlockSource;
use crate::types::BLOCK_LOCI;
use ndarray::Array2;
use std::error::Error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("the genotype source has no samples")]
    NoSamples,
    #[error("genotype source error: {0}")]
    Source(#[source] Box<dyn Error + Send + Sync + 'static>),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Eigen(#[from] EigenError),
    #[error("no informative loci: all {loci_read} loci were entirely missing or monomorphic")]
    NoInformativeLoci { loci_read: usize },
}

fn source_error<E>(err: E) -> AnalysisError
where
    E: Error + Send + Sync + 'static,
{
    AnalysisError::Source(Box::new(err))
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub n_samples: usize,
    pub loci_read: usize,
    /// Loci that passed the frequency filter.
    pub loci_used: usize,
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct EigMixResult {
    pub eigenpairs: Eigenpairs,
    /// The normalized relationship matrix, kept only when the configuration asks for it.
    pub relationship: Option<Array2<f64>>,
    pub summary: RunSummary,
}

/// Streams every block of `source` through a fresh engine and returns the normalized
/// relationship matrix.
pub fn relationship_matrix<S, P>(
    source: &mut S,
    workers: usize,
    progress: &mut P,
) -> Result<(Array2<f64>, RunSummary), AnalysisError>
where
    S: GenotypeBlockSource,
    S::Error: Error + Send + Sync + 'static,
    P: AccumulationProgressObserver + ?Sized,
{
    let n_samples = source.n_samples();
    if n_samples == 0 {
        return Err(AnalysisError::NoSamples);
    }

    source.reset().map_err(source_error)?;
    let mut engine = AccumulationEngine::new(n_samples, workers)?;
    let workers = engine.workers();
    log::info!(
        "Accumulating relationship matrix: {n_samples} samples, {} loci, {workers} worker(s)",
        source.n_loci()
    );

    let mut block = vec![0u8; BLOCK_LOCI * n_samples];
    let mut loci_read = 0usize;
    progress.on_start(source.n_loci());
    loop {
        let count = source
            .next_block_into(BLOCK_LOCI, &mut block)
            .map_err(source_error)?;
        if count == 0 {
            break;
        }
        engine.consume_block(&block, count)?;
        loci_read += count;
        progress.on_advance(count);
        log::debug!("Consumed block of {count} loci ({loci_read} so far)");
    }
    progress.on_finish();

    let accumulated = engine.finish();
    let loci_used = accumulated.sums.informative_loci;
    if loci_used == 0 {
        log::warn!("None of the {loci_read} loci were informative");
        return Err(AnalysisError::NoInformativeLoci { loci_read });
    }
    log::info!("Used {loci_used} of {loci_read} loci");

    let summary = RunSummary {
        n_samples,
        loci_read,
        loci_used,
        workers,
    };
    Ok((normalize(accumulated), summary))
}

/// Full run: relationship matrix, then its leading eigenpairs.
pub fn run_eigmix<S, E, P>(
    source: &mut S,
    config: &EigMixConfig,
    solver: &E,
    progress: &mut P,
) -> Result<EigMixResult, AnalysisError>
where
    S: GenotypeBlockSource,
    S::Error: Error + Send + Sync + 'static,
    E: EigenSolver,
    P: AccumulationProgressObserver + ?Sized,
{
    let (matrix, summary) = relationship_matrix(source, config.workers(), progress)?;

    let requested = config.eigen_count_for(summary.n_samples);
    let packed = PackedUpperTriangle::from_relationship(&matrix)?;
    let relationship = config.need_matrix.then_some(matrix);

    log::info!(
        "Computing {requested} eigenpair(s) with the {} solver",
        config.eigen_method
    );
    let eigenpairs = solver.solve(packed, requested, config.eigen_method)?;

    Ok(EigMixResult {
        eigenpairs,
        relationship,
        summary,
    })
}
