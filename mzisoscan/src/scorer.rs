//! Isotope pattern evaluation tools
use mzpeaks::{prelude::*, CentroidPeak, MZPeakSetType, Tolerance};

use crate::feature::{FeatureRow, RowId};
use crate::isotopic_model::TheoreticalPattern;
use crate::spectra::{most_intense_within, SpectrumSource};
use crate::tolerance::ToleranceWindow;

pub type ScoreType = f64;

/// Scores closer than this are considered equal, and the incumbent is kept
pub const SCORE_EPSILON: ScoreType = 0.01;

/// Whether `challenger` is better than `incumbent` by more than [`SCORE_EPSILON`]
#[inline]
pub fn supersedes(challenger: ScoreType, incumbent: ScoreType) -> bool {
    challenger > incumbent + SCORE_EPSILON
}

/// Rate the m/z accuracy of an observation.
///
/// ```math
/// s_{mz}(o, e) = \max\left(0, 1 - \frac{|o - e|}{w(o)}\right)
/// ```
///
/// where $`w(o)`$ is the width of the tolerance window around the observed value.
#[inline]
pub fn mass_accuracy_rating<T: ToleranceWindow>(observed: f64, expected: f64, tolerance: &T) -> ScoreType {
    let width = tolerance.window_width(observed);
    let error = (observed - expected).abs();
    if width <= 0.0 {
        return if error == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - error / width).max(0.0)
}

/// Rate the agreement of an observed and a theoretical intensity ratio as `min / max`.
/// Non-positive or non-finite ratios rate 0.
#[inline]
pub fn intensity_ratio_rating(observed: f64, theoretical: f64) -> ScoreType {
    if !(observed.is_finite() && theoretical.is_finite()) || observed <= 0.0 || theoretical <= 0.0 {
        return 0.0;
    }
    observed.min(theoretical) / observed.max(theoretical)
}

/// Rates rows as candidates for a slot of a [`TheoreticalPattern`] anchored on a pivot row
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IsotopeRater {
    pub mz_tolerance: Tolerance,
    /// Whether the intensity ratio to the pivot contributes to the rating
    pub check_intensity: bool,
}

impl IsotopeRater {
    pub fn new(mz_tolerance: Tolerance, check_intensity: bool) -> Self {
        Self {
            mz_tolerance,
            check_intensity,
        }
    }

    #[inline]
    pub fn rate(
        &self,
        observed_mz: f64,
        expected_mz: f64,
        observed_ratio: f64,
        theoretical_ratio: f64,
    ) -> ScoreType {
        let mz_rating = mass_accuracy_rating(observed_mz, expected_mz, &self.mz_tolerance);
        if self.check_intensity {
            mz_rating * intensity_ratio_rating(observed_ratio, theoretical_ratio)
        } else {
            mz_rating
        }
    }

    /// Rate `row` as slot `slot` of `pattern` placed on `pivot`
    pub fn rate_row(
        &self,
        row: &FeatureRow,
        pivot: &FeatureRow,
        pattern: &TheoreticalPattern,
        slot: usize,
    ) -> ScoreType {
        let expected = pivot.mz + pattern.slots[slot].offset;
        let observed_ratio = if pivot.intensity > 0.0 {
            row.intensity / pivot.intensity
        } else {
            0.0
        };
        self.rate(row.mz, expected, observed_ratio, pattern.ratio_to_first(slot))
    }
}

/// An observed peak assigned to a pattern slot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectedPeak {
    pub mz: f64,
    pub intensity: f64,
}

impl DetectedPeak {
    pub fn new(mz: f64, intensity: f64) -> Self {
        Self { mz, intensity }
    }
}

/// A feature row rated as the occupant of a pattern slot
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Candidate {
    pub slot: usize,
    pub row: RowId,
    pub mz: f64,
    pub intensity: f64,
    pub rating: ScoreType,
    /// The intensity averaged over every scan the whole pattern was seen in
    pub average_intensity: Option<f64>,
    pub average_rating: Option<ScoreType>,
}

impl Candidate {
    pub fn new(slot: usize, row: &FeatureRow, rating: ScoreType) -> Self {
        Self {
            slot,
            row: row.id,
            mz: row.mz,
            intensity: row.intensity,
            rating,
            average_intensity: None,
            average_rating: None,
        }
    }

    pub fn as_detected(&self) -> DetectedPeak {
        DetectedPeak::new(self.mz, self.average_intensity.unwrap_or(self.intensity))
    }
}

/// The best rated [`Candidate`] of each slot of a pattern
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlotCandidates {
    slots: Vec<Option<Candidate>>,
}

impl SlotCandidates {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![None; size],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Offer a candidate for its slot. It is kept only if the slot is empty or
    /// it [`supersedes`] the current occupant, so the first of tied candidates wins.
    pub fn offer(&mut self, candidate: Candidate) -> bool {
        let Some(entry) = self.slots.get_mut(candidate.slot) else {
            return false;
        };
        match entry {
            Some(current) if !supersedes(candidate.rating, current.rating) => false,
            _ => {
                *entry = Some(candidate);
                true
            }
        }
    }

    pub fn get(&self, slot: usize) -> Option<&Candidate> {
        self.slots.get(slot).and_then(|c| c.as_ref())
    }

    /// Every slot has a candidate with a positive rating
    pub fn is_complete(&self) -> bool {
        !self.slots.is_empty()
            && self
                .slots
                .iter()
                .all(|c| c.as_ref().is_some_and(|c| c.rating > 0.0))
    }

    /// The mean of the slot ratings, or `None` if the pattern is incomplete
    pub fn simple_average(&self) -> Option<ScoreType> {
        if !self.is_complete() {
            return None;
        }
        let total: ScoreType = self.slots.iter().flatten().map(|c| c.rating).sum();
        Some(total / self.slots.len() as ScoreType)
    }

    pub fn into_candidates(self) -> Vec<Candidate> {
        self.slots.into_iter().flatten().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.slots.iter().flatten()
    }
}

/// The score of a pattern whose accurate average could not be computed
pub const UNDEFINED_AVERAGE: ScoreType = -1.0;

/// Recompute every slot's intensity as its mean over the scans of the pivot in which
/// all slots were found, then re-rate the slots against the averaged intensities.
///
/// Returns the mean of the re-rated slots, or [`UNDEFINED_AVERAGE`] when no scan
/// contains the whole pattern. The averages are written back into `slots`.
pub fn accurate_average<S: SpectrumSource + ?Sized>(
    slots: &mut SlotCandidates,
    pivot: &FeatureRow,
    pattern: &TheoreticalPattern,
    source: &S,
    rater: &IsotopeRater,
    min_height: f64,
) -> ScoreType {
    if !slots.is_complete() {
        return UNDEFINED_AVERAGE;
    }
    let n = slots.len();
    let mut totals = vec![0.0; n];
    let mut n_scans = 0usize;

    for scan in pivot.scans.iter().copied() {
        let Some(peaks) = source.peaks_of(scan) else {
            continue;
        };
        let found: Option<Vec<f64>> = slots
            .iter()
            .map(|c| {
                most_intense_within(peaks, c.mz, rater.mz_tolerance, min_height)
                    .map(|p| p.intensity() as f64)
            })
            .collect();
        if let Some(found) = found {
            totals.iter_mut().zip(found).for_each(|(t, f)| *t += f);
            n_scans += 1;
        }
    }
    if n_scans == 0 {
        return UNDEFINED_AVERAGE;
    }

    let averages: Vec<f64> = totals.into_iter().map(|t| t / n_scans as f64).collect();
    let reference = averages[0];
    let mut total_rating = 0.0;
    for (slot, entry) in slots.slots.iter_mut().enumerate() {
        if let Some(c) = entry.as_mut() {
            let expected = pivot.mz + pattern.slots[slot].offset;
            let ratio = if reference > 0.0 {
                averages[slot] / reference
            } else {
                0.0
            };
            let rating = rater.rate(c.mz, expected, ratio, pattern.ratio_to_first(slot));
            c.average_intensity = Some(averages[slot]);
            c.average_rating = Some(rating);
            total_rating += rating;
        }
    }
    total_rating / n as ScoreType
}

/// Scores a pattern read directly from a spectrum as the intensity-weighted mean of
/// per-slot m/z and intensity agreement.
///
/// ```math
/// S = \frac{\sum_k t_k \, s_{mz}(o_k, e_k) \, s_{int}(\hat{o}_k, t_k)}{\sum_k t_k}
/// ```
///
/// where $`\hat{o}_k`$ is the observed intensity normalized by the observed intensity
/// of the theoretical base peak.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatternSimilarityScorer {
    pub mz_tolerance: Tolerance,
}

impl PatternSimilarityScorer {
    pub fn new(mz_tolerance: Tolerance) -> Self {
        Self { mz_tolerance }
    }

    pub fn score(&self, detected: &[DetectedPeak], mz: f64, pattern: &TheoreticalPattern) -> ScoreType {
        if detected.len() != pattern.len() || pattern.is_empty() {
            return 0.0;
        }
        let base = detected[pattern.base_peak_index()].intensity;
        if base <= 0.0 {
            return 0.0;
        }
        let mut weighted = 0.0;
        let mut weights = 0.0;
        for (peak, slot) in detected.iter().zip(pattern.iter()) {
            weights += slot.intensity;
            if peak.intensity <= 0.0 {
                continue;
            }
            let s_mz = mass_accuracy_rating(peak.mz, mz + slot.offset, &self.mz_tolerance);
            let s_int = intensity_ratio_rating(peak.intensity / base, slot.intensity);
            weighted += slot.intensity * s_mz * s_int;
        }
        if weights <= 0.0 {
            0.0
        } else {
            weighted / weights
        }
    }

    /// Read each slot of `pattern` placed at `mz` from `peaks`, taking the most intense
    /// peak above `min_height`. Slots with no peak are recorded at their expected m/z
    /// with an intensity of 0.
    pub fn detect(
        &self,
        peaks: &MZPeakSetType<CentroidPeak>,
        mz: f64,
        pattern: &TheoreticalPattern,
        min_height: f64,
    ) -> Vec<DetectedPeak> {
        pattern
            .iter()
            .map(|slot| {
                let expected = mz + slot.offset;
                match most_intense_within(peaks, expected, self.mz_tolerance, min_height) {
                    Some(p) => DetectedPeak::new(p.mz(), p.intensity() as f64),
                    None => DetectedPeak::new(expected, 0.0),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::isotopic_model::{build_pattern, IsotopePeak, IsotopicPatternParams};
    use crate::spectra::{SpectrumStore, StoredSpectrum};

    fn chlorine() -> TheoreticalPattern {
        build_pattern(
            "Cl2",
            1,
            vec![
                IsotopePeak::new(69.9377, 0.5741),
                IsotopePeak::new(71.9348, 0.3672),
                IsotopePeak::new(73.9318, 0.0587),
            ],
            &IsotopicPatternParams::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_mass_rating_monotone() {
        let tol = Tolerance::PPM(50.0);
        let mut last = f64::INFINITY;
        for i in 0..20 {
            let r = mass_accuracy_rating(200.0 + i as f64 * 0.001, 200.0, &tol);
            assert!(r <= last, "{r} > {last} at step {i}");
            assert!((0.0..=1.0).contains(&r));
            last = r;
        }
        assert_eq!(mass_accuracy_rating(200.0, 200.0, &tol), 1.0);
        assert_eq!(mass_accuracy_rating(201.0, 200.0, &tol), 0.0);
    }

    #[test]
    fn test_intensity_rating_monotone() {
        let mut last = f64::INFINITY;
        for i in 0..20 {
            let r = intensity_ratio_rating(0.64 * (1.0 + i as f64 * 0.1), 0.64);
            assert!(r <= last);
            last = r;
        }
        let mut last = f64::INFINITY;
        for i in 0..20 {
            let r = intensity_ratio_rating(0.64 * (1.0 - i as f64 * 0.05), 0.64);
            assert!(r <= last);
            last = r;
        }
        assert_eq!(intensity_ratio_rating(0.0, 0.64), 0.0);
        assert_eq!(intensity_ratio_rating(f64::NAN, 0.64), 0.0);
    }

    #[test]
    fn test_slot_tie_keeps_first() {
        let row_a = FeatureRow::new(1, 201.997, 1.0, 64.0);
        let row_b = FeatureRow::new(2, 201.998, 1.0, 64.0);
        let mut slots = SlotCandidates::new(3);
        assert!(slots.offer(Candidate::new(1, &row_a, 0.95)));
        assert!(!slots.offer(Candidate::new(1, &row_b, 0.955)));
        assert_eq!(slots.get(1).unwrap().row, 1);
        assert!(slots.offer(Candidate::new(1, &row_b, 0.97)));
        assert_eq!(slots.get(1).unwrap().row, 2);
        assert!(!slots.is_complete());
        assert!(slots.simple_average().is_none());
        assert!(!slots.offer(Candidate::new(5, &row_b, 1.0)));
    }

    #[test]
    fn test_rate_row() {
        let pattern = chlorine();
        let rater = IsotopeRater::new(Tolerance::PPM(50.0), true);
        let pivot = FeatureRow::new(1, 200.0, 1.0, 1000.0);
        let child = FeatureRow::new(2, 201.997, 1.0, 639.6);
        let r = rater.rate_row(&child, &pivot, &pattern, 1);
        assert!(r > 0.9, "{r}");
        assert_eq!(rater.rate_row(&pivot, &pivot, &pattern, 0), 1.0);

        let weak = FeatureRow::new(3, 201.997, 1.0, 100.0);
        assert!(rater.rate_row(&weak, &pivot, &pattern, 1) < 0.2);
        let rater = IsotopeRater::new(Tolerance::PPM(50.0), false);
        assert!(rater.rate_row(&weak, &pivot, &pattern, 1) > 0.9);
    }

    #[test]
    fn test_accurate_average() {
        let pattern = chlorine();
        let rater = IsotopeRater::new(Tolerance::PPM(50.0), true);
        let pivot = FeatureRow::new(1, 200.0, 1.0, 1000.0).with_scans(vec![0, 1, 2]);
        let c1 = FeatureRow::new(2, 201.997, 1.0, 300.0);
        let c2 = FeatureRow::new(3, 203.994, 1.0, 102.0);

        let mut slots = SlotCandidates::new(3);
        slots.offer(Candidate::new(0, &pivot, 1.0));
        slots.offer(Candidate::new(1, &c1, 0.5));
        slots.offer(Candidate::new(2, &c2, 0.99));

        let store: SpectrumStore = vec![
            StoredSpectrum::new(
                0,
                0.9,
                vec![
                    CentroidPeak::new(200.0, 1000.0, 0),
                    CentroidPeak::new(201.997, 640.0, 1),
                    CentroidPeak::new(203.994, 102.0, 2),
                ],
            ),
            StoredSpectrum::new(
                1,
                1.0,
                vec![
                    CentroidPeak::new(200.0, 2000.0, 0),
                    CentroidPeak::new(201.997, 1280.0, 1),
                    CentroidPeak::new(203.994, 204.0, 2),
                ],
            ),
            // Missing the last slot, so it does not count
            StoredSpectrum::new(
                2,
                1.1,
                vec![
                    CentroidPeak::new(200.0, 2000.0, 0),
                    CentroidPeak::new(201.997, 10.0, 1),
                ],
            ),
        ]
        .into_iter()
        .collect();

        let score = accurate_average(&mut slots, &pivot, &pattern, &store, &rater, 0.0);
        assert!(score > 0.95, "{score}");
        assert_eq!(slots.get(0).unwrap().average_intensity, Some(1500.0));
        assert_eq!(slots.get(1).unwrap().average_intensity, Some(960.0));

        let lonely = FeatureRow::new(1, 200.0, 1.0, 1000.0).with_scans(vec![2, 7]);
        let score = accurate_average(&mut slots, &lonely, &pattern, &store, &rater, 0.0);
        assert_eq!(score, UNDEFINED_AVERAGE);
    }

    #[test]
    fn test_similarity_scorer() {
        let pattern = chlorine();
        let scorer = PatternSimilarityScorer::new(Tolerance::PPM(10.0));
        let peaks: MZPeakSetType<CentroidPeak> = vec![
            CentroidPeak::new(200.0, 1000.0, 0),
            CentroidPeak::new(200.00005, 50.0, 1),
            CentroidPeak::new(201.997, 640.0, 2),
            CentroidPeak::new(203.994, 102.0, 3),
        ]
        .into_iter()
        .collect();
        let detected = scorer.detect(&peaks, 200.0, &pattern, 0.0);
        assert_eq!(detected.len(), 3);
        assert_eq!(detected[0].intensity, 1000.0);
        let score = scorer.score(&detected, 200.0, &pattern);
        assert!(score > 0.95, "{score}");

        let detected = scorer.detect(&peaks, 200.0, &pattern, 200.0);
        assert_eq!(detected[2], DetectedPeak::new(200.0 + pattern.slots[2].offset, 0.0));
        let partial = scorer.score(&detected, 200.0, &pattern);
        assert!(partial < score);
    }
}
