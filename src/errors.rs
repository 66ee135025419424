// Copyright 2020 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use thiserror::Error;

/// Errors surfaced by the BAQ core. Skips (a read falling out of range, a
/// missing `BQ` tag in lenient mode) are never represented here: they are
/// modelled as `Ok(None)` by the call sites that can legitimately shrug them
/// off, per the facade's "never abort a batch for one read" contract.
#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("reference window length {ref_len} does not match the reference buffer ({buf_len})")]
    RefLengthMismatch { ref_len: usize, buf_len: usize },
    #[error("query length {query_len} does not match quality buffer length ({qual_len})")]
    QueryQualMismatch { query_len: usize, qual_len: usize },
    #[error("output buffers must have length {expected} (one entry per query base), got state={state_len} bq={bq_len}")]
    OutputLengthMismatch {
        expected: usize,
        state_len: usize,
        bq_len: usize,
    },
    #[error("band must be at least 1, got {band}")]
    InvalidBand { band: i32 },
    #[error("read {name} has no BQ tag and strict tag decoding was requested")]
    MissingTag { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;
