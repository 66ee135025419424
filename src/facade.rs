// Copyright 2020 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! [`BaqFacade`]: picks apply/recompute/skip per read and decides where
//! the result lands (the `BQ` attribute, the read's own qualities, or
//! just a returned buffer).

use anyhow::Result as AnyResult;
use log::{debug, trace, warn};

use crate::adapter::{calc_baq_from_hmm, ReadView, ReferenceProvider};
use crate::errors::{Error, Result};
use crate::hmm::{HmmConfig, HmmScratch};
use crate::tag;

/// When to (re)compute BAQ for a read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalculationMode {
    /// Never touch qualities.
    None,
    /// Compute only if no `BQ` tag is already present.
    AsNecessary,
    /// Always recompute, overwriting any existing `BQ` tag.
    Recalculate,
}

/// Where the BAQ result goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QualityMode {
    /// Persist as the `BQ` attribute; leave the read's own qualities alone.
    AddTag,
    /// Overwrite the read's qualities in place.
    OverwriteQuals,
    /// Return the computed qualities without mutating the read at all.
    DontModify,
}

/// A read view with the mutation hooks the facade needs: attribute
/// get/set, quality overwrite, and the three exclusion flags.
pub trait MutableRead: ReadView {
    fn get_string_attribute(&self, name: &[u8]) -> Option<Vec<u8>>;
    /// Persist `value` under `name`, returning whether the write succeeded.
    /// A `false` return is not fatal to the facade (per its "never abort a
    /// batch for one read" stance) but is worth logging at the call site.
    fn set_attribute(&mut self, name: &[u8], value: &[u8]) -> bool;
    fn set_qualities(&mut self, quals: &[u8]);

    fn is_unmapped(&self) -> bool;
    fn fails_vendor_quality_checks(&self) -> bool;
    fn is_duplicate(&self) -> bool;

    /// Default exclusion predicate: unmapped, vendor-QC-failed, or a
    /// duplicate. Override for a different policy.
    fn is_excluded(&self) -> bool {
        self.is_unmapped() || self.fails_vendor_quality_checks() || self.is_duplicate()
    }
}

/// Strategy selector tying the decoder, adapter and tag codec together.
#[derive(Clone, Copy, Debug)]
pub struct BaqFacade {
    pub calculation_mode: CalculationMode,
    pub quality_mode: QualityMode,
}

impl BaqFacade {
    pub fn new(calculation_mode: CalculationMode, quality_mode: QualityMode) -> Self {
        BaqFacade {
            calculation_mode,
            quality_mode,
        }
    }

    /// Process one read, returning the qualities the caller should use
    /// (whether or not the read itself was mutated).
    pub fn process_read<R, Rd>(
        &self,
        read: &mut Rd,
        reference: &R,
        config: &HmmConfig,
        scratch: &mut HmmScratch,
    ) -> AnyResult<Vec<u8>>
    where
        R: ReferenceProvider,
        Rd: MutableRead,
    {
        if self.calculation_mode == CalculationMode::None || read.is_excluded() {
            debug!("skipping BAQ for read {}: mode=None or excluded", read.read_name());
            return Ok(read.qualities().to_vec());
        }

        let existing_tag = read.get_string_attribute(tag::TAG_NAME);

        if self.calculation_mode == CalculationMode::Recalculate || existing_tag.is_none() {
            return match calc_baq_from_hmm(read, reference, config, scratch)? {
                Some(result) => {
                    trace!(
                        "computed BAQ for read {} ({:?})",
                        read.read_name(),
                        self.quality_mode
                    );
                    match self.quality_mode {
                        QualityMode::AddTag => {
                            let tag = tag::encode(&result.raw_quals, &result.bq);
                            if !read.set_attribute(tag::TAG_NAME, &tag) {
                                warn!(
                                    "BAQ computed for read {} but its BQ tag was not persisted",
                                    read.read_name()
                                );
                            }
                            Ok(read.qualities().to_vec())
                        }
                        QualityMode::OverwriteQuals => {
                            read.set_qualities(&result.bq);
                            Ok(result.bq)
                        }
                        QualityMode::DontModify => Ok(result.bq),
                    }
                }
                None => Ok(read.qualities().to_vec()),
            };
        }

        // Tag already present, AsNecessary mode: decode rather than recompute.
        // Only OverwriteQuals needs to touch the read; AddTag and DontModify
        // just surface the decoded values since there's nothing left to set.
        let tag_bytes = existing_tag.unwrap();
        let decoded = tag::decode(read.qualities(), &tag_bytes);
        match self.quality_mode {
            QualityMode::OverwriteQuals => {
                read.set_qualities(&decoded);
                Ok(decoded)
            }
            QualityMode::AddTag => Ok(read.qualities().to_vec()),
            QualityMode::DontModify => Ok(decoded),
        }
    }

    /// Decode a read's `BQ` tag without running the adapter, failing if
    /// the tag is absent. Strict counterpart to the lenient decode path
    /// `process_read` takes in `AsNecessary` mode.
    pub fn decode_tag_strict<Rd: MutableRead>(read: &Rd) -> Result<Vec<u8>> {
        match read.get_string_attribute(tag::TAG_NAME) {
            Some(tag_bytes) => Ok(tag::decode(read.qualities(), &tag_bytes)),
            None => Err(Error::MissingTag {
                name: read.read_name().to_string(),
            }),
        }
    }
}
