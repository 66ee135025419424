// Copyright 2020 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The banded forward-backward profile HMM (`hmm_glocal`): three states
//! per reference column (Match, Insert, Delete), posterior-decoded into,
//! for every query base, the most probable aligned reference column and
//! a phred-scaled error probability.
//!
//! This follows the glocal alignment HMM of Durbin et al., "Biological
//! Sequence Analysis", as adapted by samtools' BAQ computation: banded
//! recursions with per-row rescaling to avoid underflow, posterior
//! decoding by scanning `f_i * b_i` per band column.

use std::cmp;

use lazy_static::lazy_static;
use log::trace;

use crate::band::{self, BandedRow};
use crate::encoding::AMBIGUOUS;
use crate::errors::{Error, Result};

/// Emission weight given to a matched, non-ambiguous base pair's
/// complementary mismatch mass (the `1/3` in `q_i * 1/3`).
pub const EMIT_MATCH_MISMATCH: f64 = 1.0 / 3.0;
/// Constant emission probability for an Insert state (uniform over the
/// four-letter alphabet).
pub const EMIT_INSERT: f64 = 0.25;

lazy_static! {
    /// `QUAL_TO_PROB[q] == 10^(-q/10)`, the process-wide phred-to-probability
    /// table, materialised once rather than recomputed per base.
    static ref QUAL_TO_PROB: [f64; 256] = {
        let mut table = [0.0f64; 256];
        for (q, slot) in table.iter_mut().enumerate() {
            *slot = 10f64.powf(-(q as f64) / 10.0);
        }
        table
    };
}

/// Gap and band configuration for [`hmm_glocal`]. Defaults match the
/// values historically tuned for short-read Illumina data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HmmConfig {
    /// Gap-open probability `d`.
    pub gap_open: f64,
    /// Gap-extension probability `e`.
    pub gap_extend: f64,
    /// Configured band half-width `b`. The effective band used by a
    /// given call may be smaller (see [`effective_band`]).
    pub band: i32,
    /// Quality floor: qualities below this are treated as this value
    /// when deriving per-base error probabilities.
    pub min_qual: u8,
}

impl Default for HmmConfig {
    fn default() -> Self {
        HmmConfig {
            gap_open: 1e-3,
            gap_extend: 0.1,
            band: 7,
            min_qual: 4,
        }
    }
}

/// Clamp a configured band to the invariant in the data model: the
/// effective band is never smaller than `|l_ref - l_query|`, never
/// larger than `max(l_ref, l_query)`, and never below 1.
pub fn effective_band(configured: i32, l_ref: usize, l_query: usize) -> i32 {
    let diff = (l_ref as i64 - l_query as i64).unsigned_abs() as i32;
    let upper = cmp::max(l_ref, l_query) as i32;
    cmp::max(cmp::min(configured, upper), cmp::max(diff, 1))
}

/// Match/Insert tag carried in the low two bits of a packed alignment
/// state. Delete is never a terminal per-query-base state: every query
/// base aligns to either a Match or an Insert column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlignTag {
    Match = 0,
    Insert = 1,
}

/// The packed per-query-base alignment state: `(column << 2) | tag`,
/// with `column` zero-based. See the data model's state word layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlignState(i32);

impl AlignState {
    #[inline]
    pub fn pack(column_zero_based: u32, tag: AlignTag) -> Self {
        AlignState(((column_zero_based as i32) << 2) | tag as i32)
    }

    #[inline]
    pub fn from_raw(raw: i32) -> Self {
        AlignState(raw)
    }

    #[inline]
    pub fn raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub fn column(self) -> u32 {
        (self.0 >> 2) as u32
    }

    #[inline]
    pub fn tag(self) -> AlignTag {
        if self.0 & 3 == 0 {
            AlignTag::Match
        } else {
            AlignTag::Insert
        }
    }

    #[inline]
    pub fn is_indel(self) -> bool {
        self.0 & 3 != 0
    }
}

/// Reusable scratch space for [`hmm_glocal`], so a worker thread
/// processing many reads does not allocate a fresh forward/backward
/// matrix per call. Reallocates only when the band or query length
/// grows past current capacity; otherwise rows are merely zeroed.
pub struct HmmScratch {
    forward: Vec<BandedRow>,
    backward: [BandedRow; 2],
    scale: Vec<f64>,
    band: i32,
}

impl HmmScratch {
    pub fn new() -> Self {
        HmmScratch {
            forward: Vec::new(),
            backward: [BandedRow::new(1), BandedRow::new(1)],
            scale: Vec::new(),
            band: 1,
        }
    }

    fn ensure(&mut self, l_query: usize, band: i32) {
        if self.band != band || self.forward.len() < l_query + 1 {
            self.forward = (0..=l_query).map(|_| BandedRow::new(band)).collect();
            self.backward = [BandedRow::new(band), BandedRow::new(band)];
            self.band = band;
        } else {
            for row in self.forward.iter_mut().take(l_query + 1) {
                row.clear();
            }
            self.backward[0].clear();
            self.backward[1].clear();
        }
        if self.scale.len() < l_query + 2 {
            self.scale = vec![0.0; l_query + 2];
        } else {
            for s in self.scale.iter_mut().take(l_query + 2) {
                *s = 0.0;
            }
        }
    }
}

impl Default for HmmScratch {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn emission(ref_enc: &[u8], query_enc: &[u8], iqual: &[u8], min_qual: u8, i: usize, k: usize) -> f64 {
    let ref_base = ref_enc[k];
    let query_base = query_enc[i - 1];
    if ref_base == AMBIGUOUS || query_base == AMBIGUOUS {
        1.0
    } else {
        let q_err = QUAL_TO_PROB[cmp::max(iqual[i - 1], min_qual) as usize];
        if ref_base == query_base {
            1.0 - q_err
        } else {
            q_err * EMIT_MATCH_MISMATCH
        }
    }
}

fn band_range(b: i32, i: usize, l_ref: usize) -> (usize, usize) {
    let kmin = cmp::max(1, i as i32 - b) as usize;
    let kmax = cmp::min(l_ref as i32, i as i32 + b) as usize;
    (kmin, kmax)
}

/// Phred-scale a posterior max/sum pair. Saturates to 99 rather than
/// diverging when `1 - max/sum` is non-positive (the numeric
/// degeneracy called out in the error-handling design).
fn phred_from_posterior(max: f64, sum: f64) -> u8 {
    if sum <= 0.0 || max <= 0.0 {
        return 0;
    }
    let one_minus = 1.0 - max / sum;
    if one_minus <= 0.0 {
        99
    } else {
        let q = -10.0 * one_minus.log10() + 0.499;
        if q >= 99.0 {
            99
        } else if q <= 0.0 {
            0
        } else {
            q.floor() as u8
        }
    }
}

/// Run the banded forward-backward posterior decoder.
///
/// `ref_enc` is 1-based: index 0 is unused (any value; `ref_enc.len() -
/// 1` gives `l_ref`). `query_enc` and `iqual` are 0-based and must share
/// `query_enc.len() == iqual.len()`. `state_out`/`bq_out` receive one
/// entry per query base.
pub fn hmm_glocal(
    ref_enc: &[u8],
    query_enc: &[u8],
    iqual: &[u8],
    config: &HmmConfig,
    scratch: &mut HmmScratch,
    state_out: &mut [i32],
    bq_out: &mut [u8],
) -> Result<()> {
    let l_ref = ref_enc.len().saturating_sub(1);
    let l_query = query_enc.len();

    if iqual.len() != l_query {
        return Err(Error::QueryQualMismatch {
            query_len: l_query,
            qual_len: iqual.len(),
        });
    }
    if state_out.len() != l_query || bq_out.len() != l_query {
        return Err(Error::OutputLengthMismatch {
            expected: l_query,
            state_len: state_out.len(),
            bq_len: bq_out.len(),
        });
    }
    if config.band < 1 {
        return Err(Error::InvalidBand { band: config.band });
    }
    if l_query == 0 || l_ref == 0 {
        return Ok(());
    }

    let b = effective_band(config.band, l_ref, l_query);
    scratch.ensure(l_query, b);

    let d = config.gap_open;
    let e = config.gap_extend;
    let lq = l_query as f64;
    let s_m = 1.0 / (2.0 * lq + 2.0);
    let s_i = s_m;
    let b_m = (1.0 - d) / lq;
    let b_i = d / lq;

    let m_mm = (1.0 - 2.0 * d) * (1.0 - s_m);
    let m_mi = d * (1.0 - s_m);
    let m_md = d * (1.0 - s_m);
    let m_im = (1.0 - e) * (1.0 - s_i);
    let m_ii = e * (1.0 - s_i);
    let m_dm = 1.0 - e;
    let m_dd = e;

    // forward pass
    for i in 1..=l_query {
        let (kmin, kmax) = band_range(b, i, l_ref);
        let (prev_rows, cur_rows) = scratch.forward.split_at_mut(i);
        let prev = &prev_rows[i - 1];
        let cur = &mut cur_rows[0];
        for k in kmin..=kmax {
            let u = band::offset(b, i as i32, k as i32);
            let e_ik = emission(ref_enc, query_enc, iqual, config.min_qual, i, k);

            let m_val = if i == 1 {
                e_ik * b_m
            } else {
                let v11 = band::offset(b, i as i32 - 1, k as i32 - 1);
                e_ik * (m_mm * prev.get(v11, 0) + m_im * prev.get(v11, 1) + m_dm * prev.get(v11, 2))
            };
            cur.set(u, 0, m_val);

            let i_val = if i == 1 {
                EMIT_INSERT * b_i
            } else {
                let v10 = band::offset(b, i as i32 - 1, k as i32);
                EMIT_INSERT * (m_mi * prev.get(v10, 0) + m_ii * prev.get(v10, 1))
            };
            cur.set(u, 1, i_val);

            let v01 = band::offset(b, i as i32, k as i32 - 1);
            let d_val = m_md * cur.get(v01, 0) + m_dd * cur.get(v01, 2);
            cur.set(u, 2, d_val);
        }
        let s = cur.sum();
        cur.rescale(s);
        scratch.scale[i] = s;
    }

    // terminal scale
    {
        let (kmin, kmax) = band_range(b, l_query, l_ref);
        let last = &scratch.forward[l_query];
        let mut s_term = 0.0;
        for k in kmin..=kmax {
            let u = band::offset(b, l_query as i32, k as i32);
            s_term += last.get(u, 0) * s_m + last.get(u, 1) * s_i;
        }
        scratch.scale[l_query + 1] = s_term;
    }

    // backward pass, fused with posterior decoding: only two backward
    // rows are ever live at once, unlike the full forward matrix which
    // posterior decoding needs in its entirety.
    let HmmScratch {
        forward,
        backward,
        scale,
        ..
    } = scratch;
    let (bk_cur_slot, bk_next_slot) = backward.split_at_mut(1);
    let mut bk_cur = &mut bk_cur_slot[0];
    let mut bk_next = &mut bk_next_slot[0];

    {
        let i = l_query;
        let (kmin, kmax) = band_range(b, i, l_ref);
        let denom = scale[l_query] * scale[l_query + 1];
        bk_cur.clear();
        for k in kmin..=kmax {
            let u = band::offset(b, i as i32, k as i32);
            bk_cur.set(u, 0, s_m / denom);
            bk_cur.set(u, 1, s_i / denom);
        }
        decode_row(b, i, l_ref, &forward[i], bk_cur, state_out, bq_out);
    }

    std::mem::swap(&mut bk_cur, &mut bk_next);

    for i in (1..l_query).rev() {
        let (kmin, kmax) = band_range(b, i, l_ref);
        // No deletion may be credited as having occurred before the
        // first query base: the begin state transitions only into
        // Match or Insert, never Delete.
        let y = if i == 1 { 0.0 } else { 1.0 };
        bk_cur.clear();
        for k in (kmin..=kmax).rev() {
            let u = band::offset(b, i as i32, k as i32);
            let v11 = band::offset(b, i as i32 + 1, k as i32 + 1);
            let v10 = band::offset(b, i as i32 + 1, k as i32);
            let v01 = band::offset(b, i as i32, k as i32 + 1);
            let e_next = if k + 1 <= l_ref {
                emission(ref_enc, query_enc, iqual, config.min_qual, i + 1, k + 1)
            } else {
                0.0
            };

            let m_val = m_mm * e_next * bk_next.get(v11, 0)
                + m_mi * EMIT_INSERT * bk_next.get(v10, 1)
                + y * m_md * bk_cur.get(v01, 2);
            bk_cur.set(u, 0, m_val);

            let i_val = m_im * e_next * bk_next.get(v11, 0) + m_ii * EMIT_INSERT * bk_next.get(v10, 1);
            bk_cur.set(u, 1, i_val);

            let d_val = m_dm * e_next * bk_next.get(v11, 0) + y * m_dd * bk_cur.get(v01, 2);
            bk_cur.set(u, 2, d_val);
        }
        bk_cur.rescale(scale[i]);
        decode_row(b, i, l_ref, &forward[i], bk_cur, state_out, bq_out);
        std::mem::swap(&mut bk_cur, &mut bk_next);
    }

    trace!(
        "hmm_glocal: l_ref={} l_query={} band={} terminal_scale={:.6e}",
        l_ref,
        l_query,
        b,
        scale[l_query + 1]
    );

    Ok(())
}

fn decode_row(
    b: i32,
    i: usize,
    l_ref: usize,
    forward_row: &BandedRow,
    backward_row: &BandedRow,
    state_out: &mut [i32],
    bq_out: &mut [u8],
) {
    let (kmin, kmax) = band_range(b, i, l_ref);
    let mut max_z = -1.0f64;
    let mut max_state = AlignState::pack(kmin.saturating_sub(1) as u32, AlignTag::Match);
    let mut sum = 0.0f64;

    for k in kmin..=kmax {
        let u = band::offset(b, i as i32, k as i32);
        let z_m = forward_row.get(u, 0) * backward_row.get(u, 0);
        let z_i = forward_row.get(u, 1) * backward_row.get(u, 1);
        sum += z_m + z_i;
        if z_m > max_z {
            max_z = z_m;
            max_state = AlignState::pack((k - 1) as u32, AlignTag::Match);
        }
        if z_i > max_z {
            max_z = z_i;
            max_state = AlignState::pack((k - 1) as u32, AlignTag::Insert);
        }
    }

    state_out[i - 1] = max_state.raw();
    bq_out[i - 1] = phred_from_posterior(max_z, sum);
}
