//! Tab-separated result files.
//!
//! `<prefix>.eigenval` holds one eigenvalue per line, largest first. `<prefix>.eigenvec`
//! has a header and one row per sample: FID, IID, then one column per component.
//! `<prefix>.relmat` is the full `n × n` relationship matrix, one row per line.

use crate::analysis::EigMixResult;
use crate::eigen::Eigenpairs;
use crate::plink::SampleId;
use ndarray::Array2;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{samples} sample identifiers for eigenvectors with {rows} rows")]
    SampleCountMismatch { samples: usize, rows: usize },
}

/// Files written by [`write_results`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub eigenvalues: PathBuf,
    pub eigenvectors: PathBuf,
    pub relationship: Option<PathBuf>,
}

pub fn write_eigenvalues<W: Write>(writer: &mut W, values: &[f64]) -> io::Result<()> {
    let mut buffer = ryu::Buffer::new();
    for &value in values {
        writeln!(writer, "{}", buffer.format(value))?;
    }
    Ok(())
}

pub fn write_eigenvectors<W: Write>(
    writer: &mut W,
    pairs: &Eigenpairs,
    samples: &[SampleId],
) -> io::Result<()> {
    write!(writer, "#FID\tIID")?;
    for component in 1..=pairs.len() {
        write!(writer, "\tPC{component}")?;
    }
    writeln!(writer)?;

    let mut buffer = ryu::Buffer::new();
    for (sample, row) in samples.iter().zip(pairs.vectors.rows()) {
        write!(writer, "{}\t{}", sample.family_id, sample.individual_id)?;
        for &value in row {
            write!(writer, "\t{}", buffer.format(value))?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

pub fn write_relationship<W: Write>(writer: &mut W, matrix: &Array2<f64>) -> io::Result<()> {
    let mut buffer = ryu::Buffer::new();
    for row in matrix.rows() {
        let mut first = true;
        for &value in row {
            if !first {
                writer.write_all(b"\t")?;
            }
            writer.write_all(buffer.format(value).as_bytes())?;
            first = false;
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Writes every result file next to `prefix` and returns their paths.
pub fn write_results(
    prefix: &Path,
    result: &EigMixResult,
    samples: &[SampleId],
) -> Result<OutputPaths, OutputError> {
    let rows = result.eigenpairs.vectors.nrows();
    if samples.len() != rows {
        return Err(OutputError::SampleCountMismatch {
            samples: samples.len(),
            rows,
        });
    }

    let eigenvalues = with_suffix(prefix, "eigenval");
    write_file(&eigenvalues, |w| write_eigenvalues(w, &result.eigenpairs.values))?;

    let eigenvectors = with_suffix(prefix, "eigenvec");
    write_file(&eigenvectors, |w| {
        write_eigenvectors(w, &result.eigenpairs, samples)
    })?;

    let relationship = match &result.relationship {
        Some(matrix) => {
            let path = with_suffix(prefix, "relmat");
            write_file(&path, |w| write_relationship(w, matrix))?;
            Some(path)
        }
        None => None,
    };

    Ok(OutputPaths {
        eigenvalues,
        eigenvectors,
        relationship,
    })
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut os = prefix.as_os_str().to_owned();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}

fn write_file<F>(path: &Path, body: F) -> Result<(), OutputError>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let wrap = |source| OutputError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = File::create(path).map_err(wrap)?;
    let mut writer = BufWriter::new(file);
    body(&mut writer).map_err(wrap)?;
    writer.flush().map_err(wrap)
}
