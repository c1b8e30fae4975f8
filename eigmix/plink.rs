// ========================================================================================
//
//                          PLINK BINARY FILESET BLOCK SOURCE
//
// ========================================================================================
//
// Reads a SNP-major PLINK fileset (`.bed` + `.bim` + `.fam`). The `.bed` payload is
// memory-mapped once and decoded a block at a time into the locus-major genotype bytes
// the accumulation engine consumes. The `.fam` file supplies the sample identifiers; the
// `.bim` file is only counted, to validate the payload size.

use crate::source::GenotypeBlockSource;
use crate::types::MISSING_GENOTYPE;
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

const PLINK_HEADER_LEN: usize = 3;

#[derive(Debug, Error)]
pub enum PlinkError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid PLINK .bed header: {0}")]
    InvalidHeader(String),
    #[error("unexpected .bed payload size (expected {expected} bytes, found {actual})")]
    TruncatedBed { expected: u64, actual: u64 },
    #[error("malformed record in {path} at line {line}: {message}")]
    MalformedRecord {
        path: String,
        line: usize,
        message: String,
    },
}

/// Family and individual identifiers of one `.fam` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleId {
    pub family_id: String,
    pub individual_id: String,
}

#[derive(Debug)]
pub struct PlinkBedSource {
    bed: Mmap,
    bed_path: PathBuf,
    samples: Vec<SampleId>,
    n_loci: usize,
    bytes_per_locus: usize,
    cursor: usize,
}

impl PlinkBedSource {
    /// Opens `<prefix>.bed/.bim/.fam`. `path` may be the prefix itself or any of the
    /// three files.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PlinkError> {
        let bed_path = bed_path_for(path.as_ref());
        let bim_path = bed_path.with_extension("bim");
        let fam_path = bed_path.with_extension("fam");

        let samples = read_fam_records(&fam_path)?;
        if samples.is_empty() {
            return Err(PlinkError::MalformedRecord {
                path: fam_path.display().to_string(),
                line: 0,
                message: "no samples found in .fam".to_string(),
            });
        }
        let n_loci = count_bim_records(&bim_path)?;

        let file = File::open(&bed_path).map_err(|source| PlinkError::Open {
            path: bed_path.display().to_string(),
            source,
        })?;
        // SAFETY: the map is read-only and the file is not expected to change while a
        // run is in progress.
        let bed = unsafe { Mmap::map(&file) }.map_err(|source| PlinkError::Read {
            path: bed_path.display().to_string(),
            source,
        })?;

        if bed.len() < PLINK_HEADER_LEN {
            return Err(PlinkError::InvalidHeader(format!(
                "file is only {} bytes long",
                bed.len()
            )));
        }
        validate_bed_header(&bed[..PLINK_HEADER_LEN])?;

        let bytes_per_locus = samples.len().div_ceil(4);
        let expected = (bytes_per_locus as u64)
            .checked_mul(n_loci as u64)
            .unwrap_or(u64::MAX);
        let actual = (bed.len() - PLINK_HEADER_LEN) as u64;
        if actual != expected {
            return Err(PlinkError::TruncatedBed { expected, actual });
        }

        log::debug!(
            "Mapped {} ({} samples, {} loci)",
            bed_path.display(),
            samples.len(),
            n_loci
        );

        Ok(Self {
            bed,
            bed_path,
            samples,
            n_loci,
            bytes_per_locus,
            cursor: 0,
        })
    }

    pub fn samples(&self) -> &[SampleId] {
        &self.samples
    }

    pub fn bed_path(&self) -> &Path {
        &self.bed_path
    }
}

impl GenotypeBlockSource for PlinkBedSource {
    type Error = PlinkError;

    fn n_samples(&self) -> usize {
        self.samples.len()
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
        let count = max_loci.min(self.n_loci - self.cursor);
        if count == 0 {
            return Ok(0);
        }

        let n = self.samples.len();
        let table = decode_table();
        let payload = &self.bed[PLINK_HEADER_LEN..];
        for (offset, dest) in storage[..count * n].chunks_exact_mut(n).enumerate() {
            let start = (self.cursor + offset) * self.bytes_per_locus;
            decode_locus(&payload[start..start + self.bytes_per_locus], dest, table);
        }

        self.cursor += count;
        Ok(count)
    }
}

fn decode_locus(bytes: &[u8], dest: &mut [u8], table: &[[u8; 4]; 256]) {
    for (chunk, &byte) in dest.chunks_mut(4).zip(bytes) {
        let decoded = &table[byte as usize];
        chunk.copy_from_slice(&decoded[..chunk.len()]);
    }
}

/// Genotype bytes for the four 2-bit codes packed in each `.bed` byte, low bits first.
fn decode_table() -> &'static [[u8; 4]; 256] {
    static TABLE: OnceLock<[[u8; 4]; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [[0u8; 4]; 256];
        for (byte, entry) in table.iter_mut().enumerate() {
            for (offset, slot) in entry.iter_mut().enumerate() {
                *slot = match (byte >> (offset * 2)) & 0b11 {
                    0b00 => 0,
                    0b10 => 1,
                    0b11 => 2,
                    _ => MISSING_GENOTYPE,
                };
            }
        }
        table
    })
}

fn bed_path_for(path: &Path) -> PathBuf {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("bed" | "bim" | "fam") => path.with_extension("bed"),
        _ => {
            let mut os = path.as_os_str().to_owned();
            os.push(".bed");
            PathBuf::from(os)
        }
    }
}

fn validate_bed_header(header: &[u8]) -> Result<(), PlinkError> {
    match header {
        [0x6c, 0x1b, 0x01] => Ok(()),
        [0x6c, 0x1b, mode] => Err(PlinkError::InvalidHeader(format!(
            "unsupported mode byte {mode:#04x} (only SNP-major mode is supported)"
        ))),
        _ => Err(PlinkError::InvalidHeader(
            "missing PLINK magic bytes 0x6c 0x1b".to_string(),
        )),
    }
}

fn open_lines(path: &Path) -> Result<io::Lines<BufReader<File>>, PlinkError> {
    let file = File::open(path).map_err(|source| PlinkError::Open {
        path: path.display().to_string(),
        source,
    })?;
    Ok(BufReader::new(file).lines())
}

fn read_fam_records(path: &Path) -> Result<Vec<SampleId>, PlinkError> {
    let mut records = Vec::new();
    for (idx, line) in open_lines(path)?.enumerate() {
        let line = line.map_err(|source| PlinkError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            return Err(PlinkError::MalformedRecord {
                path: path.display().to_string(),
                line: idx + 1,
                message: format!("expected 6 whitespace-delimited fields, found {}", fields.len()),
            });
        }
        records.push(SampleId {
            family_id: fields[0].to_string(),
            individual_id: fields[1].to_string(),
        });
    }
    Ok(records)
}

fn count_bim_records(path: &Path) -> Result<usize, PlinkError> {
    let mut count = 0usize;
    for line in open_lines(path)? {
        let line = line.map_err(|source| PlinkError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
