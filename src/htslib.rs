// Copyright 2020 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! [`ReadView`]/[`MutableRead`] over `rust_htslib::bam::Record`, the
//! concrete read container this codebase otherwise works with
//! directly (see `rust_htslib::bam::record::{Cigar, CigarStringView}`
//! usage elsewhere in this lineage).
//!
//! BQ deltas are stored as a `B:C` (unsigned byte array) auxiliary tag
//! rather than a `Z` (string) tag: raw qualities above 63 combined with
//! a `bq` of 0 push `tag[i]` past 127, which is not valid standalone
//! UTF-8 and would make `Aux::String` (a `&str`) unsound to construct
//! from arbitrary encoded bytes. The byte-array type carries the same
//! bytes losslessly without that constraint.

use anyhow::{Context, Result as AnyResult};
use log::warn;
use rust_htslib::bam;
use rust_htslib::bam::record::{Aux, AuxArray, Cigar, CigarString};

use crate::adapter::{CigarOp, ReadView};
use crate::facade::MutableRead;

fn convert_cigar_op(op: &Cigar) -> (CigarOp, u32) {
    match op {
        Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) => (CigarOp::Match, *l),
        Cigar::Ins(l) => (CigarOp::Ins, *l),
        Cigar::Del(l) => (CigarOp::Del, *l),
        Cigar::RefSkip(l) => (CigarOp::RefSkip, *l),
        Cigar::SoftClip(l) => (CigarOp::SoftClip, *l),
        Cigar::HardClip(l) => (CigarOp::HardClip, *l),
        Cigar::Pad(l) => (CigarOp::Pad, *l),
    }
}

/// Wraps a `bam::Record` together with the reference name a caller
/// already resolved from the BAM header (records themselves only carry
/// a numeric `tid`).
pub struct HtslibRead<'a> {
    record: &'a mut bam::Record,
    reference_name: String,
    read_name: String,
    bases: Vec<u8>,
    quals: Vec<u8>,
}

impl<'a> HtslibRead<'a> {
    pub fn new(record: &'a mut bam::Record, reference_name: String) -> AnyResult<Self> {
        let read_name = std::str::from_utf8(record.qname())
            .context("read name is not valid UTF-8")?
            .to_string();
        let bases = record.seq().as_bytes();
        let quals = record.qual().to_vec();
        Ok(HtslibRead {
            record,
            reference_name,
            read_name,
            bases,
            quals,
        })
    }
}

impl<'a> ReadView for HtslibRead<'a> {
    fn bases(&self) -> &[u8] {
        &self.bases
    }

    fn qualities(&self) -> &[u8] {
        &self.quals
    }

    fn cigar(&self) -> Vec<(CigarOp, u32)> {
        self.record.cigar().iter().map(convert_cigar_op).collect()
    }

    fn align_start(&self) -> u64 {
        self.record.pos() as u64 + 1
    }

    fn align_end(&self) -> u64 {
        self.record.cigar().end_pos() as u64
    }

    fn reference_name(&self) -> &str {
        &self.reference_name
    }

    fn read_name(&self) -> &str {
        &self.read_name
    }
}

impl<'a> MutableRead for HtslibRead<'a> {
    fn get_string_attribute(&self, name: &[u8]) -> Option<Vec<u8>> {
        match self.record.aux(name) {
            Ok(Aux::ArrayU8(values)) => Some(values.iter().collect()),
            _ => None,
        }
    }

    fn set_attribute(&mut self, name: &[u8], value: &[u8]) -> bool {
        // A prior tag being absent is the common case, not a failure worth
        // reporting; only a failed write of the new value is.
        let _ = self.record.remove_aux(name);
        let array: AuxArray<u8> = value.into();
        match self.record.push_aux(name, Aux::ArrayU8(array)) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "read {}: failed to write {} tag: {}",
                    self.read_name,
                    String::from_utf8_lossy(name),
                    e
                );
                false
            }
        }
    }

    fn set_qualities(&mut self, quals: &[u8]) {
        let qname = self.record.qname().to_vec();
        let cigar = CigarString::from(self.record.cigar().iter().cloned().collect::<Vec<_>>());
        let seq = self.record.seq().as_bytes();
        self.record.set(&qname, Some(&cigar), &seq, quals);
        self.quals = quals.to_vec();
    }

    fn is_unmapped(&self) -> bool {
        self.record.is_unmapped()
    }

    fn fails_vendor_quality_checks(&self) -> bool {
        self.record.is_quality_check_failed()
    }

    fn is_duplicate(&self) -> bool {
        self.record.is_duplicate()
    }
}
