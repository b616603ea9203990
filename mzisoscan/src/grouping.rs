//! Collect the rows around a pivot that could belong to its isotope pattern, and sort them
//! into the pattern's slots.
use mzpeaks::Tolerance;
use tracing::trace;

use crate::feature::{FeatureRow, RowId};
use crate::isotopic_model::TheoreticalPattern;
use crate::scorer::{Candidate, IsotopeRater, SlotCandidates};
use crate::tolerance::{mobility_matches, MobilityTolerance, TimeTolerance, ToleranceWindow};

/// The criteria a row must satisfy to be grouped with a pivot
#[derive(Debug, Clone, Copy)]
pub struct GroupingParams {
    pub mz_tolerance: Tolerance,
    pub rt_tolerance: Option<TimeTolerance>,
    pub mobility_tolerance: Option<MobilityTolerance>,
    pub min_height: f64,
}

impl GroupingParams {
    pub fn new(
        mz_tolerance: Tolerance,
        rt_tolerance: Option<TimeTolerance>,
        mobility_tolerance: Option<MobilityTolerance>,
        min_height: f64,
    ) -> Self {
        Self {
            mz_tolerance,
            rt_tolerance,
            mobility_tolerance,
            min_height,
        }
    }

    /// Whether `row` co-elutes and co-migrates with `pivot`
    pub fn coincides(&self, row: &FeatureRow, pivot: &FeatureRow) -> bool {
        let rt_ok = self
            .rt_tolerance
            .as_ref()
            .map(|tol| tol.within(row.rt, pivot.rt))
            .unwrap_or(true);
        rt_ok && mobility_matches(self.mobility_tolerance.as_ref(), row.mobility, pivot.mobility)
    }
}

/// Group the pivot at `pivot_index` of the m/z-sorted `rows` with every later row of strictly
/// greater m/z up to `pivot.mz + max_offset` plus the m/z tolerance.
///
/// The pivot is always the first member of the group.
pub fn group_rows<'a>(
    rows: &[&'a FeatureRow],
    pivot_index: usize,
    max_offset: f64,
    params: &GroupingParams,
) -> Vec<&'a FeatureRow> {
    let Some(pivot) = rows.get(pivot_index).copied() else {
        return Vec::new();
    };
    let upper = pivot.mz + max_offset;
    let upper = upper + params.mz_tolerance.window_width(upper);
    let mut group = vec![pivot];
    for row in rows[pivot_index + 1..].iter().copied() {
        if row.mz > upper {
            break;
        }
        if row.mz <= pivot.mz || row.intensity < params.min_height {
            continue;
        }
        if params.coincides(row, pivot) {
            group.push(row);
        }
    }
    trace!("Pivot {} grouped with {} rows", pivot.id, group.len() - 1);
    group
}

/// The rows matching each slot of one pattern placed on a pivot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CandidateBag {
    slots: Vec<Vec<RowId>>,
}

impl CandidateBag {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, slot: usize) -> &[RowId] {
        self.slots.get(slot).map(|s| s.as_slice()).unwrap_or_default()
    }

    pub fn found_count(&self, slot: usize) -> usize {
        self.slot(slot).len()
    }

    /// Every slot has at least one matching row
    pub fn is_complete(&self) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(|s| !s.is_empty())
    }
}

/// Sort the members of `group` into the slots of `pattern` placed on `group[0]`.
///
/// A row matches slot `k` when it lies within the m/z tolerance, evaluated at the row's m/z,
/// of `pivot.mz + offset[k]` and is at least `min_height` intense.
///
/// Rows at exactly the minimum height qualify, unlike spectrum peaks in the enhanced mode.
pub fn search_candidates(
    group: &[&FeatureRow],
    pattern: &TheoreticalPattern,
    params: &GroupingParams,
) -> CandidateBag {
    let Some(pivot) = group.first() else {
        return CandidateBag::default();
    };
    let slots = pattern
        .iter()
        .map(|slot| {
            let expected = pivot.mz + slot.offset;
            group
                .iter()
                .filter(|r| {
                    r.intensity >= params.min_height && params.mz_tolerance.within(expected, r.mz)
                })
                .map(|r| r.id)
                .collect()
        })
        .collect();
    CandidateBag { slots }
}

/// Rate every row in `bag` and keep the best rated row per slot among those rated at least
/// `min_rating`. Rows are rated in group order so the first of tied rows is kept.
pub fn rate_candidates(
    group: &[&FeatureRow],
    bag: &CandidateBag,
    pattern: &TheoreticalPattern,
    rater: &IsotopeRater,
    min_rating: f64,
) -> SlotCandidates {
    let mut best = SlotCandidates::new(pattern.len());
    let Some(pivot) = group.first() else {
        return best;
    };
    for slot in 0..bag.len() {
        for row_id in bag.slot(slot) {
            let Some(row) = group.iter().find(|r| r.id == *row_id) else {
                continue;
            };
            let rating = rater.rate_row(row, pivot, pattern, slot);
            if rating >= min_rating && rating > 0.0 {
                best.offer(Candidate::new(slot, row, rating));
            }
        }
    }
    best
}
