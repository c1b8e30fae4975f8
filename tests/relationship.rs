use approx::assert_abs_diff_eq;
use eigmix::progress::NoopProgress;
use eigmix::types::MISSING_GENOTYPE;
use eigmix::{
    AccumulationEngine, EigMixConfig, FaerEigenSolver, InMemoryGenotypes, PlinkBedSource,
    relationship_matrix, run_eigmix,
};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use tempfile::tempdir;

const M: u8 = MISSING_GENOTYPE;

/// Locus-major genotypes with per-locus frequencies and a sprinkling of missing calls.
fn synthetic_genotypes(n_samples: usize, n_loci: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(n_samples * n_loci);
    for _ in 0..n_loci {
        let p: f64 = rng.gen_range(0.05..0.95);
        for _ in 0..n_samples {
            if rng.gen_bool(0.03) {
                data.push(M);
            } else {
                let dosage = u8::from(rng.gen_bool(p)) + u8::from(rng.gen_bool(p));
                data.push(dosage);
            }
        }
    }
    data
}

fn relationship(data: &[u8], n_samples: usize, workers: usize) -> Array2<f64> {
    let n_loci = data.len() / n_samples;
    let mut source = InMemoryGenotypes::new(data, n_samples, n_loci).expect("source");
    let (matrix, _) = relationship_matrix(&mut source, workers, &mut NoopProgress).expect("run");
    matrix
}

#[test]
fn result_is_exactly_symmetric() {
    let n = 17;
    let data = synthetic_genotypes(n, 300, 1);
    for workers in [1, 4] {
        let matrix = relationship(&data, n, workers);
        for i in 0..n {
            for j in 0..n {
                assert_eq!(matrix[[i, j]].to_bits(), matrix[[j, i]].to_bits());
            }
        }
    }
}

#[test]
fn worker_count_does_not_change_the_result() {
    let n = 23;
    let data = synthetic_genotypes(n, 1300, 2);
    let reference = relationship(&data, n, 1);
    for workers in [2, 8] {
        let matrix = relationship(&data, n, workers);
        for (a, b) in reference.iter().zip(matrix.iter()) {
            let scale = a.abs().max(1.0);
            assert!(
                (a - b).abs() / scale < 1e-9,
                "workers={workers}: {a} vs {b}"
            );
        }
    }
}

#[test]
fn uninformative_loci_are_ignored() {
    let n = 6;
    let base = synthetic_genotypes(n, 40, 3);
    let mut padded = base.clone();
    padded.extend_from_slice(&[M; 6]);
    padded.extend_from_slice(&[2; 6]);
    padded.extend_from_slice(&[0, 0, M, 0, 0, 0]);
    padded.extend_from_slice(&[2, M, 2, 2, M, 2]);

    let expected = relationship(&base, n, 1);
    let actual = relationship(&padded, n, 1);
    assert_eq!(expected, actual);
}

#[test]
fn complementing_genotype_codes_leaves_the_result_unchanged() {
    let n = 9;
    let data = synthetic_genotypes(n, 60, 4);
    let complemented: Vec<u8> = data
        .iter()
        .enumerate()
        .map(|(idx, &g)| match (idx / n % 2, g) {
            (0, 0) => 2,
            (0, 2) => 0,
            (_, g) => g,
        })
        .collect();

    let original = relationship(&data, n, 1);
    let flipped = relationship(&complemented, n, 1);
    for (a, b) in original.iter().zip(flipped.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
}

#[test]
fn two_sample_locus_matches_hand_computation() {
    // freq = 1.5, den = 0.75; the heterozygote's self term carries the -1.
    let matrix = relationship(&[1, 2], 2, 1);
    assert_abs_diff_eq!(matrix[[0, 0]], (0.25 - 1.0) / 0.75, epsilon = 1e-15);
    assert_abs_diff_eq!(matrix[[1, 1]], 0.25 / 0.75, epsilon = 1e-15);
    assert_abs_diff_eq!(matrix[[0, 1]], -0.25 / 0.75, epsilon = 1e-15);
}

#[test]
fn four_sample_scenario() {
    let mut engine = AccumulationEngine::new(4, 1).expect("engine");
    engine.consume_block(&[0, 1, 2, 2], 1).expect("block");
    let sums = engine.sums();
    assert_eq!(sums.numerator, 0.5625);
    assert_eq!(sums.denominator, 0.9375);

    let accumulated = engine.finish();
    assert_eq!(accumulated.numerator[[2, 0]], -1.5);

    let matrix = eigmix::normalize(accumulated);
    assert_abs_diff_eq!(matrix[[0, 2]], -1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(matrix[[2, 3]], 0.6, epsilon = 1e-12);
}

#[test]
fn missing_sample_contributes_only_denominator_mass() {
    let mut engine = AccumulationEngine::new(5, 2).expect("engine");
    engine.consume_block(&[0, 1, 2, 2, M], 1).expect("block");
    let accumulated = engine.finish();
    let den = accumulated.sums.denominator;
    assert_eq!(den, 0.9375);

    for j in 0..5 {
        assert_eq!(accumulated.numerator[[4, j]], 0.0);
        assert_eq!(accumulated.numerator[[j, 4]], 0.0);
        assert_eq!(accumulated.denominator[[4, j]], den);
    }
    assert!(
        accumulated
            .denominator
            .rows()
            .into_iter()
            .take(4)
            .all(|row| row.iter().all(|&v| v == 0.0))
    );
}

#[test]
fn pair_missing_together_loses_the_locus_twice() {
    // Samples 4 and 5 are both missing at locus 0 (freq 1.25, den 0.9375).
    // Locus 1 is fully called (freq 1.0, den 1.0).
    let block = [0, 1, 2, 2, M, M, 0, 1, 2, 1, 2, 0];
    let den = 0.9375;
    for workers in [1, 3] {
        let mut engine = AccumulationEngine::new(6, workers).expect("engine");
        engine.consume_block(&block, 2).expect("block");
        let accumulated = engine.finish();
        let sums = accumulated.sums;
        assert_eq!(sums.denominator, den + 1.0);

        let d = &accumulated.denominator;
        let n = &accumulated.numerator;
        assert_eq!(d[[4, 5]] + d[[5, 4]], 2.0 * den);
        assert_eq!(d[[0, 4]] + d[[4, 0]], den);
        assert_eq!(d[[0, 1]] + d[[1, 0]], 0.0);

        let both_missing = (sums.numerator + n[[4, 5]] + n[[5, 4]]) / (sums.denominator - 2.0 * den);
        let one_missing = (sums.numerator + n[[0, 4]] + n[[4, 0]]) / (sums.denominator - den);
        let none_missing = (sums.numerator + n[[0, 1]] + n[[1, 0]]) / sums.denominator;

        let matrix = eigmix::normalize(accumulated);
        assert_abs_diff_eq!(matrix[[4, 5]], both_missing, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix[[5, 4]], both_missing, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix[[0, 4]], one_missing, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix[[0, 1]], none_missing, epsilon = 1e-12);
    }
}

#[test]
fn plink_fileset_matches_in_memory_genotypes() {
    let n = 7;
    let n_loci = 25;
    let data = synthetic_genotypes(n, n_loci, 5);

    let dir = tempdir().expect("tempdir");
    let prefix = dir.path().join("cohort");
    let fam: String = (0..n).map(|i| format!("F{i} I{i} 0 0 0 -9\n")).collect();
    let bim: String = (0..n_loci).map(|l| format!("1 snp{l} 0 {l} A C\n")).collect();
    fs::write(prefix.with_extension("fam"), fam).expect("fam");
    fs::write(prefix.with_extension("bim"), bim).expect("bim");

    let bytes_per_locus = n.div_ceil(4);
    let mut bed = vec![0x6c, 0x1b, 0x01];
    for locus in data.chunks(n) {
        let mut packed = vec![0u8; bytes_per_locus];
        for (sample, &g) in locus.iter().enumerate() {
            let code = match g {
                0 => 0b00,
                1 => 0b10,
                2 => 0b11,
                _ => 0b01,
            };
            packed[sample / 4] |= code << (2 * (sample % 4));
        }
        bed.extend_from_slice(&packed);
    }
    fs::write(prefix.with_extension("bed"), bed).expect("bed");

    let config = EigMixConfig {
        threads: 3,
        eigen_count: 4,
        need_matrix: true,
        verbose: false,
        ..EigMixConfig::default()
    };
    let mut plink = PlinkBedSource::open(&prefix).expect("open");
    let from_plink = run_eigmix(&mut plink, &config, &FaerEigenSolver, &mut NoopProgress)
        .expect("plink run");
    let mut memory = InMemoryGenotypes::new(&data, n, n_loci).expect("source");
    let from_memory = run_eigmix(&mut memory, &config, &FaerEigenSolver, &mut NoopProgress)
        .expect("memory run");

    assert_eq!(from_plink.summary, from_memory.summary);
    let a = from_plink.relationship.expect("matrix");
    let b = from_memory.relationship.expect("matrix");
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-12);
    }
    for (x, y) in from_plink
        .eigenpairs
        .values
        .iter()
        .zip(&from_memory.eigenpairs.values)
    {
        assert_abs_diff_eq!(x, y, epsilon = 1e-9);
    }
}
