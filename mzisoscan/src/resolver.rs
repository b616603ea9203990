//! Exclusivity passes over the accepted pattern matches of a scan run
use std::sync::Arc;

use mzpeaks::Tolerance;
use tracing::{debug, trace};

use crate::feature::{FeatureRow, RowId};
use crate::isotopic_model::{CompositionId, TheoreticalPattern};
use crate::scorer::{supersedes, Candidate, DetectedPeak, ScoreType};
use crate::tolerance::{mobility_matches, MobilityTolerance, TimeTolerance, ToleranceWindow};

/// A complete assignment of a theoretical pattern to a pivot row
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub pivot: RowId,
    /// The position of the pivot in processing order
    pub order: usize,
    pub mz: f64,
    pub rt: f64,
    pub mobility: Option<f64>,
    pub intensity: f64,
    pub composition: CompositionId,
    pub pattern: Arc<TheoreticalPattern>,
    /// One candidate per slot, empty when the pattern was read from a spectrum
    pub candidates: Vec<Candidate>,
    /// The observed peak of each slot
    pub detected: Vec<DetectedPeak>,
    pub score: ScoreType,
    /// Whether `score` is an accurate average over several scans
    pub averaged: bool,
}

impl PatternMatch {
    pub fn new(
        pivot: &FeatureRow,
        order: usize,
        composition: CompositionId,
        pattern: Arc<TheoreticalPattern>,
        candidates: Vec<Candidate>,
        detected: Vec<DetectedPeak>,
        score: ScoreType,
    ) -> Self {
        Self {
            pivot: pivot.id,
            order,
            mz: pivot.mz,
            rt: pivot.rt,
            mobility: pivot.mobility,
            intensity: pivot.intensity,
            composition,
            pattern,
            candidates,
            detected,
            score,
            averaged: false,
        }
    }

    pub fn with_averaged(mut self, averaged: bool) -> Self {
        self.averaged = averaged;
        self
    }

    /// The position of this match in processing order, used to break ties
    pub fn processing_key(&self) -> (usize, CompositionId) {
        (self.order, self.composition)
    }

    /// The m/z span covered by this pattern, widened by `tolerance` on both ends
    pub fn mz_window(&self, tolerance: &Tolerance) -> (f64, f64) {
        let lo = self.mz - tolerance.window_width(self.mz);
        let hi = self.mz + self.pattern.max_offset();
        (lo, hi + tolerance.window_width(hi))
    }
}

/// Keep, for each pivot, only the match with the best scoring composition. `matches` must be
/// grouped by pivot. Within a pivot, the earliest of tied compositions wins.
pub fn resolve_best_composition(matches: Vec<PatternMatch>) -> Vec<PatternMatch> {
    let n = matches.len();
    let mut kept: Vec<PatternMatch> = Vec::with_capacity(n);
    for m in matches {
        match kept.last_mut() {
            Some(incumbent) if incumbent.pivot == m.pivot => {
                if supersedes(m.score, incumbent.score) {
                    trace!(
                        "Pivot {}: {} ({:.3}) replaces {} ({:.3})",
                        m.pivot,
                        m.pattern,
                        m.score,
                        incumbent.pattern,
                        incumbent.score
                    );
                    *incumbent = m;
                }
            }
            _ => kept.push(m),
        }
    }
    debug!("Best composition pass kept {} of {n} matches", kept.len());
    kept
}

/// The criteria under which two matches claim the same monoisotopic peak
#[derive(Debug, Clone, Copy)]
pub struct ConflictParams {
    pub mz_tolerance: Tolerance,
    pub rt_tolerance: Option<TimeTolerance>,
    pub mobility_tolerance: Option<MobilityTolerance>,
}

impl ConflictParams {
    pub fn new(
        mz_tolerance: Tolerance,
        rt_tolerance: Option<TimeTolerance>,
        mobility_tolerance: Option<MobilityTolerance>,
    ) -> Self {
        Self {
            mz_tolerance,
            rt_tolerance,
            mobility_tolerance,
        }
    }

    fn contains(&self, window_of: &PatternMatch, other: &PatternMatch) -> bool {
        let (lo, hi) = window_of.mz_window(&self.mz_tolerance);
        lo <= other.mz && other.mz <= hi
    }

    /// Whether `a` and `b` are distinct pivots where either lies in the other's pattern window
    /// and both co-elute and co-migrate.
    pub fn conflicts(&self, a: &PatternMatch, b: &PatternMatch) -> bool {
        if a.pivot == b.pivot {
            return false;
        }
        if !(self.contains(a, b) || self.contains(b, a)) {
            return false;
        }
        let rt_ok = self
            .rt_tolerance
            .as_ref()
            .map(|tol| tol.within(a.rt, b.rt) || tol.within(b.rt, a.rt))
            .unwrap_or(true);
        rt_ok && mobility_matches(self.mobility_tolerance.as_ref(), a.mobility, b.mobility)
    }
}

/// The indices of the matches each match conflicts with
fn conflict_graph(matches: &[PatternMatch], params: &ConflictParams) -> Vec<Vec<usize>> {
    let n = matches.len();
    let max_span = matches
        .iter()
        .map(|m| {
            let (lo, hi) = m.mz_window(&params.mz_tolerance);
            hi - lo
        })
        .fold(0.0, f64::max);

    let mut by_mz: Vec<usize> = (0..n).collect();
    by_mz.sort_by(|a, b| matches[*a].mz.total_cmp(&matches[*b].mz));

    let mut edges = vec![Vec::new(); n];
    for (pos, i) in by_mz.iter().copied().enumerate() {
        let m = &matches[i];
        for j in by_mz[pos + 1..]
            .iter()
            .copied()
            .take_while(|j| matches[*j].mz - m.mz <= max_span)
        {
            if params.conflicts(m, &matches[j]) {
                edges[i].push(j);
                edges[j].push(i);
            }
        }
    }
    edges
}

/// Choose the best of `members` the way a slot chooses its candidate: walk them in
/// processing order and let a challenger replace the incumbent only when it
/// [`supersedes`] it.
fn champion(matches: &[PatternMatch], members: &[usize]) -> Option<usize> {
    members.iter().copied().reduce(|incumbent, challenger| {
        if supersedes(matches[challenger].score, matches[incumbent].score) {
            challenger
        } else {
            incumbent
        }
    })
}

/// Keep one monoisotopic pivot per cluster of conflicting matches.
///
/// Matches are split into connected groups of conflicts. Within a group, the champion is
/// kept and every match conflicting with it is dropped, repeating on what remains until
/// the group is exhausted. No two survivors conflict and every group keeps at least one
/// match.
pub fn resolve_monoisotopic(matches: Vec<PatternMatch>, params: &ConflictParams) -> Vec<PatternMatch> {
    let n = matches.len();
    if n < 2 {
        return matches;
    }
    let edges = conflict_graph(&matches, params);

    let mut keep = vec![false; n];
    let mut decided = vec![false; n];
    let mut seen = vec![false; n];
    for start in 0..n {
        if seen[start] {
            continue;
        }
        let mut group = vec![start];
        seen[start] = true;
        let mut cursor = 0;
        while let Some(i) = group.get(cursor).copied() {
            for j in edges[i].iter().copied() {
                if !seen[j] {
                    seen[j] = true;
                    group.push(j);
                }
            }
            cursor += 1;
        }
        group.sort_by_key(|i| matches[*i].processing_key());

        let mut remaining = group;
        while let Some(winner) = champion(&matches, &remaining) {
            keep[winner] = true;
            decided[winner] = true;
            for j in edges[winner].iter().copied() {
                if !decided[j] {
                    decided[j] = true;
                    trace!(
                        "Pivot {} ({:.3}) loses the monoisotopic peak to pivot {} ({:.3})",
                        matches[j].pivot,
                        matches[j].score,
                        matches[winner].pivot,
                        matches[winner].score
                    );
                }
            }
            remaining.retain(|i| !decided[*i]);
        }
    }
    let kept: Vec<PatternMatch> = matches
        .into_iter()
        .zip(keep)
        .filter_map(|(m, k)| k.then_some(m))
        .collect();
    debug!("Monoisotopic pass kept {} of {n} matches", kept.len());
    kept
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::isotopic_model::{build_pattern, IsotopePeak, IsotopicPatternParams};

    fn pattern(composition: &str) -> Arc<TheoreticalPattern> {
        Arc::new(
            build_pattern(
                composition,
                1,
                vec![
                    IsotopePeak::new(69.9377, 0.5741),
                    IsotopePeak::new(71.9348, 0.3672),
                    IsotopePeak::new(73.9318, 0.0587),
                ],
                &IsotopicPatternParams::default(),
            )
            .unwrap(),
        )
    }

    fn mk(id: RowId, order: usize, mz: f64, rt: f64, composition: usize, score: ScoreType) -> PatternMatch {
        let row = FeatureRow::new(id, mz, rt, 100.0);
        PatternMatch::new(
            &row,
            order,
            CompositionId(composition),
            pattern("Cl2"),
            Vec::new(),
            Vec::new(),
            score,
        )
    }

    fn params() -> ConflictParams {
        ConflictParams::new(Tolerance::PPM(50.0), Some(TimeTolerance::Absolute(0.05)), None)
    }

    #[test]
    fn test_best_composition() {
        let matches = vec![
            mk(1, 0, 200.0, 1.0, 0, 0.92),
            mk(1, 0, 200.0, 1.0, 1, 0.925),
            mk(1, 0, 200.0, 1.0, 2, 0.97),
            mk(2, 1, 300.0, 1.0, 0, 0.91),
            mk(2, 1, 300.0, 1.0, 1, 0.90),
        ];
        let kept = resolve_best_composition(matches);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].composition, CompositionId(2));
        assert_eq!(kept[1].composition, CompositionId(0));
    }

    #[test]
    fn test_monoisotopic_tie_first_wins() {
        let matches = vec![
            mk(1, 0, 200.0, 1.0, 0, 0.95),
            mk(2, 1, 201.997, 1.01, 0, 0.94),
            mk(3, 2, 400.0, 1.0, 0, 0.50),
        ];
        let kept = resolve_monoisotopic(matches.clone(), &params());
        let ids: Vec<_> = kept.iter().map(|m| m.pivot).collect();
        assert_eq!(ids, vec![1, 3]);

        // A tie goes to the earlier pivot even when it scores lower
        let mut reordered = matches;
        reordered[0].order = 1;
        reordered[1].order = 0;
        let kept = resolve_monoisotopic(reordered, &params());
        let ids: Vec<_> = kept.iter().map(|m| m.pivot).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_monoisotopic_clear_winner() {
        let matches = vec![
            mk(1, 0, 200.0, 1.0, 0, 0.91),
            mk(2, 1, 201.997, 1.0, 0, 0.99),
        ];
        let kept = resolve_monoisotopic(matches, &params());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].pivot, 2);
    }

    #[test]
    fn test_no_conflict_across_rt() {
        let matches = vec![
            mk(1, 0, 200.0, 1.0, 0, 0.91),
            mk(2, 1, 201.997, 5.0, 0, 0.99),
        ];
        let kept = resolve_monoisotopic(matches, &params());
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_exclusivity_holds() {
        let mut matches = Vec::new();
        for i in 0..40 {
            let mz = 200.0 + (i as f64) * 0.7;
            let score = 0.9 + ((i * 7) % 10) as f64 * 0.005;
            matches.push(mk(i, i, mz, 1.0 + (i % 3) as f64 * 0.02, 0, score));
        }
        let p = params();
        let kept = resolve_monoisotopic(matches, &p);
        assert!(!kept.is_empty());
        for (i, a) in kept.iter().enumerate() {
            for b in kept[i + 1..].iter() {
                assert!(!p.conflicts(a, b), "{} and {} both survived", a.pivot, b.pivot);
            }
        }
    }

    #[test]
    fn test_near_ties_in_a_chain_keep_a_winner() {
        let matches = vec![
            mk(1, 0, 200.0, 1.0, 0, 0.940),
            mk(2, 1, 200.5, 1.0, 0, 0.948),
            mk(3, 2, 201.0, 1.0, 0, 0.951),
        ];
        let p = params();
        for (i, a) in matches.iter().enumerate() {
            for b in matches[i + 1..].iter() {
                assert!(p.conflicts(a, b));
            }
        }
        let kept = resolve_monoisotopic(matches, &p);
        let ids: Vec<_> = kept.iter().map(|m| m.pivot).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_every_conflict_group_keeps_a_match() {
        let mut matches = Vec::new();
        for i in 0..30 {
            let mz = 200.0 + (i as f64) * 0.5;
            let score = 0.94 + ((i * 3) % 4) as f64 * 0.004;
            matches.push(mk(i, i, mz, 1.0, 0, score));
        }
        let p = params();
        let kept = resolve_monoisotopic(matches.clone(), &p);
        for m in matches.iter() {
            let covered = kept.iter().any(|k| k.pivot == m.pivot || p.conflicts(k, m));
            assert!(covered, "{} was dropped without a surviving rival", m.pivot);
        }
        for (i, a) in kept.iter().enumerate() {
            for b in kept[i + 1..].iter() {
                assert!(!p.conflicts(a, b));
            }
        }
    }
}
