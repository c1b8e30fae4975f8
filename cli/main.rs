#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::Parser;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use eigmix::eigen::{EigenMethod, FaerEigenSolver};
use eigmix::output::write_results;
use eigmix::progress::{AccumulationProgressObserver, ConsoleProgress, NoopProgress};
use eigmix::{EigMixConfig, PlinkBedSource, run_eigmix};

/// Relationship matrix with admixture and its leading eigenvectors from a PLINK fileset.
#[derive(Parser)]
#[command(name = "eigmix", version, about)]
struct Cli {
    /// PLINK fileset prefix, or the path of its .bed file
    genotype_path: PathBuf,

    /// TOML file with run settings; command-line flags take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Worker threads for accumulation
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Eigenpairs to compute; negative or above the sample count means all
    #[arg(long, value_name = "K", allow_negative_numbers = true)]
    eigen_count: Option<i64>,

    /// Eigensolver
    #[arg(long, value_enum)]
    method: Option<EigenMethod>,

    /// Also write the relationship matrix to <OUT>.relmat
    #[arg(long)]
    matrix: bool,

    /// Suppress the progress bar
    #[arg(long)]
    quiet: bool,

    /// Output prefix; defaults to the genotype fileset prefix
    #[arg(long, value_name = "PREFIX")]
    out: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = resolve_config(&cli)?;
    log::debug!("Effective configuration:\n{}", config.to_toml_string()?);

    let start = Instant::now();
    let mut source = PlinkBedSource::open(&cli.genotype_path)?;
    log::info!(
        "Opened {} ({} samples)",
        source.bed_path().display(),
        source.samples().len()
    );

    let mut progress: Box<dyn AccumulationProgressObserver> = if config.verbose {
        Box::new(ConsoleProgress::new())
    } else {
        Box::new(NoopProgress)
    };
    let result = run_eigmix(&mut source, &config, &FaerEigenSolver, progress.as_mut())?;

    let out = cli
        .out
        .clone()
        .unwrap_or_else(|| default_prefix(source.bed_path()));
    let paths = write_results(&out, &result, source.samples())?;

    let summary = result.summary;
    log::info!(
        "Done in {:.1?}: {} samples, {} of {} loci used, {} worker(s)",
        start.elapsed(),
        summary.n_samples,
        summary.loci_used,
        summary.loci_read,
        summary.workers
    );
    log::info!("Eigenvalues written to {}", paths.eigenvalues.display());
    log::info!("Eigenvectors written to {}", paths.eigenvectors.display());
    if let Some(path) = paths.relationship {
        log::info!("Relationship matrix written to {}", path.display());
    }
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<EigMixConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => EigMixConfig::load(path)?,
        None => EigMixConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if let Some(count) = cli.eigen_count {
        config.eigen_count = count;
    }
    if let Some(method) = cli.method {
        config.eigen_method = method;
    }
    if cli.matrix {
        config.need_matrix = true;
    }
    if cli.quiet {
        config.verbose = false;
    }
    Ok(config)
}

fn default_prefix(bed_path: &Path) -> PathBuf {
    bed_path.with_extension("")
}
