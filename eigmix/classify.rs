//! Per-locus genotype classification.
//!
//! A locus's genotype vector is partitioned into four index buckets (genotype 0, 1, 2
//! and missing). Buckets live in a single worker-private buffer of `4 * n` slots so
//! that classification never touches shared state; each worker owns one
//! [`GenotypeBuckets`] for the whole run and reuses it for every locus it handles.

/// Bucket slot for samples without a call.
const MISSING_BUCKET: usize = 3;

/// Worker-private scratch holding the four index buckets of the most recently
/// classified locus.
///
/// Bucket `b` occupies `indices[b * n .. b * n + counts[b]]`. Indices inside each bucket
/// are in ascending sample order, which the accumulation engine relies on when it walks
/// a bucket's upper triangle.
#[derive(Debug, Clone)]
pub struct GenotypeBuckets {
    indices: Vec<usize>,
    counts: [usize; 4],
    n_samples: usize,
}

impl GenotypeBuckets {
    pub fn new(n_samples: usize) -> Self {
        Self {
            indices: vec![0; 4 * n_samples],
            counts: [0; 4],
            n_samples,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Partitions `genotypes` (one byte per sample) into the four buckets.
    ///
    /// Bytes `0`, `1` and `2` select the matching bucket; anything else is a no-call.
    /// Always succeeds; the previous locus's buckets are overwritten.
    pub fn classify(&mut self, genotypes: &[u8]) {
        debug_assert_eq!(genotypes.len(), self.n_samples);
        let n = self.n_samples;
        let mut counts = [0usize; 4];

        for (sample, &genotype) in genotypes.iter().enumerate() {
            let bucket = match genotype {
                0 => 0,
                1 => 1,
                2 => 2,
                _ => MISSING_BUCKET,
            };
            self.indices[bucket * n + counts[bucket]] = sample;
            counts[bucket] += 1;
        }

        self.counts = counts;
    }

    /// Counts `[n0, n1, n2, n_missing]` of the last classified locus.
    pub fn counts(&self) -> [usize; 4] {
        self.counts
    }

    /// Sample indices in bucket `bucket` (0, 1, 2, or 3 for missing).
    pub fn bucket(&self, bucket: usize) -> &[usize] {
        let start = bucket * self.n_samples;
        &self.indices[start..start + self.counts[bucket]]
    }

    /// Returns the buckets with the larger homozygous group labelled as the major one.
    ///
    /// When genotype-2 carriers are fewer than genotype-0 carriers the two homozygous
    /// buckets trade places. This is the same as counting the other allele, so the
    /// relationship matrix is unaffected, but it guarantees the broadcast term is always
    /// paid for by the bigger homozygous bucket.
    pub fn canonical(&self) -> CanonicalBuckets<'_> {
        let zero = self.bucket(0);
        let two = self.bucket(2);
        let (minor_hom, major_hom) = if two.len() < zero.len() {
            (two, zero)
        } else {
            (zero, two)
        };
        CanonicalBuckets {
            minor_hom,
            het: self.bucket(1),
            major_hom,
            missing: self.bucket(MISSING_BUCKET),
        }
    }
}

/// Borrowed view of one classified locus after allele-swap canonicalization.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalBuckets<'a> {
    /// Homozygous bucket with fewer samples (genotype 0 after relabelling).
    pub minor_hom: &'a [usize],
    pub het: &'a [usize],
    /// Homozygous bucket with at least as many samples as `minor_hom` (genotype 2).
    pub major_hom: &'a [usize],
    pub missing: &'a [usize],
}

impl<'a> CanonicalBuckets<'a> {
    /// Samples with a call at this locus.
    pub fn called(&self) -> usize {
        self.minor_hom.len() + self.het.len() + self.major_hom.len()
    }

    /// Mean dosage of the major allele over called samples, in `(0, 2)`.
    ///
    /// Returns `None` for loci that carry no information: every sample missing, or a
    /// frequency of exactly 0 or 2.
    pub fn allele_frequency(&self) -> Option<f64> {
        let called = self.called();
        if called == 0 {
            return None;
        }
        let dosage = 2 * self.major_hom.len() + self.het.len();
        let freq = dosage as f64 / called as f64;
        if freq <= 0.0 || freq >= 2.0 {
            None
        } else {
            Some(freq)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MISSING_GENOTYPE;

    #[test]
    fn buckets_partition_every_sample_once() {
        let genotypes = [2, 0, MISSING_GENOTYPE, 1, 1, 0, 2, 2];
        let mut buckets = GenotypeBuckets::new(genotypes.len());
        buckets.classify(&genotypes);

        assert_eq!(buckets.counts(), [2, 2, 3, 1]);
        assert_eq!(buckets.bucket(0), &[1, 5]);
        assert_eq!(buckets.bucket(1), &[3, 4]);
        assert_eq!(buckets.bucket(2), &[0, 6, 7]);
        assert_eq!(buckets.bucket(3), &[2]);

        let mut seen: Vec<usize> = (0..4).flat_map(|b| buckets.bucket(b).to_vec()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..genotypes.len()).collect::<Vec<_>>());
    }

    #[test]
    fn out_of_range_bytes_are_no_calls() {
        let genotypes = [0, 7, 255, 2];
        let mut buckets = GenotypeBuckets::new(genotypes.len());
        buckets.classify(&genotypes);
        assert_eq!(buckets.bucket(3), &[1, 2]);
    }

    #[test]
    fn reclassifying_overwrites_previous_locus() {
        let mut buckets = GenotypeBuckets::new(3);
        buckets.classify(&[0, 0, 0]);
        buckets.classify(&[2, 1, MISSING_GENOTYPE]);
        assert_eq!(buckets.counts(), [0, 1, 1, 1]);
        assert_eq!(buckets.bucket(0), &[] as &[usize]);
        assert_eq!(buckets.bucket(2), &[0]);
    }

    #[test]
    fn canonical_view_swaps_when_genotype_two_is_rarer() {
        let mut buckets = GenotypeBuckets::new(5);
        buckets.classify(&[0, 0, 0, 1, 2]);
        let view = buckets.canonical();
        assert_eq!(view.major_hom, &[0, 1, 2]);
        assert_eq!(view.minor_hom, &[4]);
        assert_eq!(view.het, &[3]);
        // Major-allele dosage is computed after the swap: (2*3 + 1) / 5.
        assert_eq!(view.allele_frequency(), Some(1.4));
    }

    #[test]
    fn canonical_view_keeps_labels_on_ties() {
        let mut buckets = GenotypeBuckets::new(4);
        buckets.classify(&[0, 2, 1, 1]);
        let view = buckets.canonical();
        assert_eq!(view.minor_hom, &[0]);
        assert_eq!(view.major_hom, &[1]);
        assert_eq!(view.allele_frequency(), Some(1.0));
    }

    #[test]
    fn uninformative_loci_have_no_frequency() {
        let mut buckets = GenotypeBuckets::new(3);

        buckets.classify(&[MISSING_GENOTYPE; 3]);
        assert_eq!(buckets.canonical().allele_frequency(), None);

        buckets.classify(&[0, 0, MISSING_GENOTYPE]);
        assert_eq!(buckets.canonical().allele_frequency(), None);

        buckets.classify(&[2, 2, 2]);
        assert_eq!(buckets.canonical().allele_frequency(), None);

        buckets.classify(&[1, 1, 1]);
        assert_eq!(buckets.canonical().allele_frequency(), Some(1.0));
    }
}
