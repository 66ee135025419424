// Copyright 2020 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! `calcBAQFromHMM`: bridges an aligned read and a reference window
//! into [`hmm_glocal`], then walks the CIGAR to cap the decoder's
//! posterior qualities against the read's original ones.

use std::cmp;

use anyhow::Result as AnyResult;
use log::debug;

use crate::encoding::encode_sequence;
use crate::hmm::{hmm_glocal, AlignState, HmmConfig, HmmScratch};

/// A CIGAR operator, stripped of any container-specific representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CigarOp {
    Match,
    Ins,
    Del,
    RefSkip,
    SoftClip,
    HardClip,
    Pad,
}

/// The read-side abstraction the core consumes. Implement this against
/// whatever aligned-read container a caller already has; see the
/// `htslib` module for an implementation over `rust_htslib::bam::Record`.
pub trait ReadView {
    fn bases(&self) -> &[u8];
    fn qualities(&self) -> &[u8];
    fn cigar(&self) -> Vec<(CigarOp, u32)>;
    /// 1-based, inclusive.
    fn align_start(&self) -> u64;
    /// 1-based, inclusive.
    fn align_end(&self) -> u64;
    fn reference_name(&self) -> &str;
    fn read_name(&self) -> &str;
}

/// The reference-side abstraction the core consumes: a byte window for
/// a named contig, 1-based inclusive coordinates.
pub trait ReferenceProvider {
    fn fetch(&self, contig: &str, start1: u64, stop1: u64) -> AnyResult<Vec<u8>>;
    fn contig_length(&self, contig: &str) -> AnyResult<u64>;
}

/// The per-read outcome of the adapter: everything the facade needs to
/// dispatch on `QualityMode` without re-deriving anything from the read.
#[derive(Clone, Debug)]
pub struct BaqResult {
    pub ref_bases: Vec<u8>,
    pub raw_quals: Vec<u8>,
    pub read_bases: Vec<u8>,
    /// `start - align_start`; non-positive when the fetched window
    /// extends before the alignment's first reference base.
    pub ref_offset: i64,
    pub state: Vec<i32>,
    pub bq: Vec<u8>,
}

fn leading_insertion_len(cigar: &[(CigarOp, u32)]) -> u32 {
    match cigar.first() {
        Some((CigarOp::Ins, len)) => *len,
        _ => 0,
    }
}

fn trailing_insertion_len(cigar: &[(CigarOp, u32)]) -> u32 {
    match cigar.last() {
        Some((CigarOp::Ins, len)) => *len,
        _ => 0,
    }
}

/// Compute BAQ for one read against one reference provider.
///
/// Returns `Ok(None)` when the computed window falls off the end of
/// the contig, or when the CIGAR contains a reference-skip ('N')
/// operator — both are skips from the facade's point of view, never
/// hard errors, so a single malformed read never aborts a batch.
pub fn calc_baq_from_hmm<R: ReferenceProvider>(
    read: &dyn ReadView,
    reference: &R,
    config: &HmmConfig,
    scratch: &mut HmmScratch,
) -> AnyResult<Option<BaqResult>> {
    let cigar = read.cigar();
    if cigar.iter().any(|(op, _)| *op == CigarOp::RefSkip) {
        debug!(
            "skipping read {}: CIGAR contains a reference skip",
            read.read_name()
        );
        return Ok(None);
    }

    let band_offset = (config.band / 2) as i64;
    let leading_i = leading_insertion_len(&cigar) as i64;
    let trailing_i = trailing_insertion_len(&cigar) as i64;

    let align_start = read.align_start() as i64;
    let align_end = read.align_end() as i64;

    let start = cmp::max(1, align_start - band_offset - leading_i);
    let stop = align_end + band_offset + trailing_i;

    let contig_len = reference.contig_length(read.reference_name())? as i64;
    if stop > contig_len {
        debug!(
            "skipping read {}: BAQ window [{},{}] exceeds contig length {}",
            read.read_name(),
            start,
            stop,
            contig_len
        );
        return Ok(None);
    }

    let ref_bases = reference.fetch(read.reference_name(), start as u64, stop as u64)?;
    let expected_len = (stop - start + 1) as usize;
    if ref_bases.len() != expected_len {
        return Err(crate::errors::Error::RefLengthMismatch {
            ref_len: expected_len,
            buf_len: ref_bases.len(),
        }
        .into());
    }
    let ref_offset = start - align_start;

    let read_bases = read.bases().to_vec();
    let raw_quals = read.qualities().to_vec();

    let mut ref_enc = Vec::with_capacity(ref_bases.len() + 1);
    ref_enc.push(0u8);
    ref_enc.extend(encode_sequence(&ref_bases));
    let query_enc = encode_sequence(&read_bases);

    let l_query = query_enc.len();
    let mut state = vec![0i32; l_query];
    let mut bq = vec![0u8; l_query];

    hmm_glocal(&ref_enc, &query_enc, &raw_quals, config, scratch, &mut state, &mut bq)?;

    cap_with_cigar(&cigar, &state, &raw_quals, ref_offset, &mut bq);

    Ok(Some(BaqResult {
        ref_bases,
        raw_quals,
        read_bases,
        ref_offset,
        state,
        bq,
    }))
}

/// Walk the CIGAR, applying the post-processing cap rules in place over
/// `bq` (which enters holding the decoder's raw posterior qualities).
fn cap_with_cigar(cigar: &[(CigarOp, u32)], state: &[i32], raw_quals: &[u8], ref_offset: i64, bq: &mut [u8]) {
    let mut read_i: usize = 0;
    let mut ref_i: i64 = 0;

    for &(op, len) in cigar {
        match op {
            CigarOp::HardClip | CigarOp::Pad => {}
            CigarOp::Ins | CigarOp::SoftClip => {
                for j in 0..len as usize {
                    bq[read_i + j] = raw_quals[read_i + j];
                }
                read_i += len as usize;
            }
            CigarOp::Del => {
                ref_i += len as i64;
            }
            CigarOp::Match => {
                for j in 0..len as usize {
                    let s = AlignState::from_raw(state[read_i + j]);
                    let expected = ref_i - ref_offset + j as i64;
                    if s.is_indel() || s.column() as i64 != expected {
                        bq[read_i + j] = 0;
                    } else {
                        bq[read_i + j] = cmp::min(bq[read_i + j], raw_quals[read_i + j]);
                    }
                }
                read_i += len as usize;
                ref_i += len as i64;
            }
            CigarOp::RefSkip => unreachable!("N-CIGAR reads are filtered out before this point"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::HmmConfig;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeRead {
        bases: Vec<u8>,
        quals: Vec<u8>,
        cigar: Vec<(CigarOp, u32)>,
        align_start: u64,
        align_end: u64,
        contig: String,
    }

    impl ReadView for FakeRead {
        fn bases(&self) -> &[u8] {
            &self.bases
        }
        fn qualities(&self) -> &[u8] {
            &self.quals
        }
        fn cigar(&self) -> Vec<(CigarOp, u32)> {
            self.cigar.clone()
        }
        fn align_start(&self) -> u64 {
            self.align_start
        }
        fn align_end(&self) -> u64 {
            self.align_end
        }
        fn reference_name(&self) -> &str {
            &self.contig
        }
        fn read_name(&self) -> &str {
            "fake"
        }
    }

    struct FakeReference {
        contigs: HashMap<String, Vec<u8>>,
        fetch_calls: RefCell<u32>,
    }

    impl ReferenceProvider for FakeReference {
        fn fetch(&self, contig: &str, start1: u64, stop1: u64) -> AnyResult<Vec<u8>> {
            *self.fetch_calls.borrow_mut() += 1;
            let seq = self
                .contigs
                .get(contig)
                .ok_or_else(|| anyhow::anyhow!("unknown contig"))?;
            Ok(seq[(start1 - 1) as usize..stop1 as usize].to_vec())
        }

        fn contig_length(&self, contig: &str) -> AnyResult<u64> {
            Ok(self.contigs.get(contig).map(|s| s.len() as u64).unwrap_or(0))
        }
    }

    fn padded_reference(core: &[u8], pad: usize) -> FakeReference {
        let mut seq = vec![b'A'; pad];
        seq.extend_from_slice(core);
        seq.extend(vec![b'A'; pad]);
        let mut contigs = HashMap::new();
        contigs.insert("chr1".to_string(), seq);
        FakeReference {
            contigs,
            fetch_calls: RefCell::new(0),
        }
    }

    #[test]
    fn makes_at_most_one_fetch_per_read() {
        let reference = padded_reference(b"ACGTA", 20);
        let read = FakeRead {
            bases: b"ACGTA".to_vec(),
            quals: vec![30; 5],
            cigar: vec![(CigarOp::Match, 5)],
            align_start: 21,
            align_end: 25,
            contig: "chr1".to_string(),
        };
        let config = HmmConfig::default();
        let mut scratch = HmmScratch::new();
        let result = calc_baq_from_hmm(&read, &reference, &config, &mut scratch).unwrap();
        assert!(result.is_some());
        assert_eq!(*reference.fetch_calls.borrow(), 1);
    }

    #[test]
    fn n_cigar_is_skipped_not_errored() {
        let reference = padded_reference(b"ACGTA", 20);
        let read = FakeRead {
            bases: b"ACGTA".to_vec(),
            quals: vec![30; 5],
            cigar: vec![(CigarOp::Match, 2), (CigarOp::RefSkip, 100), (CigarOp::Match, 3)],
            align_start: 21,
            align_end: 125,
            contig: "chr1".to_string(),
        };
        let config = HmmConfig::default();
        let mut scratch = HmmScratch::new();
        let result = calc_baq_from_hmm(&read, &reference, &config, &mut scratch).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn out_of_range_window_is_skipped() {
        let reference = padded_reference(b"ACGTA", 2);
        let read = FakeRead {
            bases: b"ACGTA".to_vec(),
            quals: vec![30; 5],
            cigar: vec![(CigarOp::Match, 5)],
            align_start: 3,
            align_end: 7,
            contig: "chr1".to_string(),
        };
        let config = HmmConfig::default();
        let mut scratch = HmmScratch::new();
        let result = calc_baq_from_hmm(&read, &reference, &config, &mut scratch).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn s3_insertion_run_passes_through_raw_quality() {
        let reference = padded_reference(b"ACGTA", 20);
        let read = FakeRead {
            bases: b"ACGGTA".to_vec(),
            quals: vec![30; 6],
            cigar: vec![(CigarOp::Match, 2), (CigarOp::Ins, 1), (CigarOp::Match, 3)],
            align_start: 21,
            align_end: 25,
            contig: "chr1".to_string(),
        };
        let config = HmmConfig::default();
        let mut scratch = HmmScratch::new();
        let result = calc_baq_from_hmm(&read, &reference, &config, &mut scratch)
            .unwrap()
            .unwrap();
        assert_eq!(result.bq[2], result.raw_quals[2]);
    }

    #[test]
    fn soft_clip_run_passes_through_raw_quality_same_as_insertion() {
        // SPEC_FULL.md carries forward the source's deliberate I/S
        // equivalence: a soft-clipped run is, like an insertion, a query
        // base never placed against a reference column, so it must be
        // passed through unadjusted exactly like CigarOp::Ins above.
        let reference = padded_reference(b"ACGTA", 20);
        let read = FakeRead {
            bases: b"GGACGTA".to_vec(),
            quals: vec![30; 7],
            cigar: vec![(CigarOp::SoftClip, 2), (CigarOp::Match, 5)],
            align_start: 21,
            align_end: 25,
            contig: "chr1".to_string(),
        };
        let config = HmmConfig::default();
        let mut scratch = HmmScratch::new();
        let result = calc_baq_from_hmm(&read, &reference, &config, &mut scratch)
            .unwrap()
            .unwrap();
        assert_eq!(result.bq[0], result.raw_quals[0]);
        assert_eq!(result.bq[1], result.raw_quals[1]);
    }

    #[test]
    fn monotone_cap_never_exceeds_raw_quality() {
        let reference = padded_reference(b"ACGTACGTAC", 20);
        let read = FakeRead {
            bases: b"ACGTACGTAC".to_vec(),
            quals: vec![35; 10],
            cigar: vec![(CigarOp::Match, 10)],
            align_start: 21,
            align_end: 30,
            contig: "chr1".to_string(),
        };
        let config = HmmConfig::default();
        let mut scratch = HmmScratch::new();
        let result = calc_baq_from_hmm(&read, &reference, &config, &mut scratch)
            .unwrap()
            .unwrap();
        for (bq, raw) in result.bq.iter().zip(result.raw_quals.iter()) {
            assert!(bq <= raw);
        }
    }
}
