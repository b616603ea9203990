//! High level APIs for scanning a feature table for isotope patterns
use std::fmt::Display;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::sync::Arc;

use mzpeaks::Tolerance;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::assembler::{assemble, AnnotatedFeatureTable, AssemblyContext};
use crate::feature::{FeatureRow, FeatureTable, Polarity};
use crate::grouping::{group_rows, rate_candidates, search_candidates, GroupingParams};
use crate::isotopic_model::{
    AutoCarbon, ChemicalElementsDistribution, CompositionSetSpec, IsotopeDistribution,
    IsotopicPatternParams, PatternCache, PatternError, PatternSet,
};
use crate::resolver::{resolve_best_composition, resolve_monoisotopic, ConflictParams, PatternMatch};
use crate::scorer::{accurate_average, IsotopeRater, PatternSimilarityScorer, UNDEFINED_AVERAGE};
use crate::spectra::{select_spectrum, SpectrumSource};
use crate::task::{ScanTask, TaskStatus};
use crate::tolerance::{MobilityTolerance, TimeTolerance};

pub type AutoCarbonParameters = AutoCarbon;

/// Which way candidate isotope peaks are found
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanMode {
    /// Look for other feature rows at the expected isotope positions
    #[default]
    Grouped,
    /// Read the isotope pattern from each feature's representative spectrum
    Enhanced,
}

impl Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The parameters of a scan run
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanParameters {
    pub mode: ScanMode,
    /// One or more element formulas separated by commas
    pub element: String,
    /// The charge state, whose sign selects the polarity
    pub charge: i32,
    pub mz_tolerance: Tolerance,
    /// When set, grouped rows must co-elute with the pivot
    pub rt_tolerance: Option<TimeTolerance>,
    /// When set, grouped rows must co-migrate with the pivot
    pub mobility_tolerance: Option<MobilityTolerance>,
    pub min_height: f64,
    pub min_pattern_intensity: f64,
    pub merge_width: f64,
    pub min_rating: f64,
    pub check_intensity: bool,
    pub accurate_average: bool,
    pub auto_carbon: Option<AutoCarbonParameters>,
    pub min_isotope_pattern_score: f64,
    pub only_monoisotopic: bool,
    pub best_composition: bool,
    pub resolve_by_mobility: bool,
    pub allow_missing_isotopes: bool,
    pub suffix: String,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            mode: ScanMode::Grouped,
            element: "Cl2".to_string(),
            charge: 1,
            mz_tolerance: Tolerance::PPM(10.0),
            rt_tolerance: Some(TimeTolerance::Absolute(0.05)),
            mobility_tolerance: None,
            min_height: 0.0,
            min_pattern_intensity: 0.01,
            merge_width: 0.0005,
            min_rating: 0.9,
            check_intensity: true,
            accurate_average: false,
            auto_carbon: None,
            min_isotope_pattern_score: 0.9,
            only_monoisotopic: true,
            best_composition: true,
            resolve_by_mobility: false,
            allow_missing_isotopes: false,
            suffix: "auto".to_string(),
        }
    }
}

impl ScanParameters {
    pub fn new(element: impl Into<String>, charge: i32) -> Self {
        Self {
            element: element.into(),
            charge,
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mz_tolerance(mut self, mz_tolerance: Tolerance) -> Self {
        self.mz_tolerance = mz_tolerance;
        self
    }

    pub fn with_rt_tolerance(mut self, rt_tolerance: Option<TimeTolerance>) -> Self {
        self.rt_tolerance = rt_tolerance;
        self
    }

    pub fn with_mobility_tolerance(mut self, mobility_tolerance: Option<MobilityTolerance>) -> Self {
        self.mobility_tolerance = mobility_tolerance;
        self
    }

    pub fn with_min_height(mut self, min_height: f64) -> Self {
        self.min_height = min_height;
        self
    }

    pub fn with_min_pattern_intensity(mut self, min_pattern_intensity: f64) -> Self {
        self.min_pattern_intensity = min_pattern_intensity;
        self
    }

    pub fn with_merge_width(mut self, merge_width: f64) -> Self {
        self.merge_width = merge_width;
        self
    }

    pub fn with_min_rating(mut self, min_rating: f64) -> Self {
        self.min_rating = min_rating;
        self
    }

    pub fn with_check_intensity(mut self, check_intensity: bool) -> Self {
        self.check_intensity = check_intensity;
        self
    }

    pub fn with_accurate_average(mut self, accurate_average: bool) -> Self {
        self.accurate_average = accurate_average;
        self
    }

    pub fn with_auto_carbon(mut self, auto_carbon: Option<AutoCarbonParameters>) -> Self {
        self.auto_carbon = auto_carbon;
        self
    }

    pub fn with_min_isotope_pattern_score(mut self, score: f64) -> Self {
        self.min_isotope_pattern_score = score;
        self
    }

    pub fn with_only_monoisotopic(mut self, only_monoisotopic: bool) -> Self {
        self.only_monoisotopic = only_monoisotopic;
        self
    }

    pub fn with_best_composition(mut self, best_composition: bool) -> Self {
        self.best_composition = best_composition;
        self
    }

    pub fn with_resolve_by_mobility(mut self, resolve_by_mobility: bool) -> Self {
        self.resolve_by_mobility = resolve_by_mobility;
        self
    }

    pub fn with_allow_missing_isotopes(mut self, allow_missing_isotopes: bool) -> Self {
        self.allow_missing_isotopes = allow_missing_isotopes;
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn polarity(&self) -> Polarity {
        Polarity::from_charge(self.charge)
    }

    /// The signed charges to build patterns for
    pub fn charges(&self) -> Vec<i32> {
        let sign = self.charge.signum();
        match self.mode {
            ScanMode::Grouped => vec![self.charge],
            ScanMode::Enhanced => (1..=self.charge.abs()).map(|z| z * sign).collect(),
        }
    }

    /// Accurate averaging is only meaningful for grouped scans that check intensities
    pub fn uses_accurate_average(&self) -> bool {
        self.accurate_average && self.check_intensity && self.mode == ScanMode::Grouped
    }

    pub fn isotopic_params(&self) -> IsotopicPatternParams {
        IsotopicPatternParams::new(self.min_pattern_intensity, self.merge_width)
    }

    pub fn composition_set_spec(&self) -> CompositionSetSpec {
        CompositionSetSpec::new(self.element.clone(), self.charges(), self.auto_carbon)
    }

    fn grouping_params(&self) -> GroupingParams {
        GroupingParams::new(
            self.mz_tolerance,
            self.rt_tolerance,
            self.mobility_tolerance,
            self.min_height,
        )
    }

    fn conflict_params(&self) -> ConflictParams {
        ConflictParams::new(self.mz_tolerance, self.rt_tolerance, self.mobility_tolerance)
    }

    /// The suffix appended to the input table's name, expanding `"auto"` into a run description
    pub fn resolved_suffix(&self) -> String {
        if self.suffix != "auto" {
            return self.suffix.clone();
        }
        let mut suffix = String::new();
        if self.auto_carbon.is_some() {
            suffix.push_str("autoCarbon");
        }
        suffix.push_str(&format!(
            "_-Pat={}-RT={}-INT={}-minR={}-minH={}_results",
            self.element,
            self.rt_tolerance.is_some(),
            self.check_intensity,
            self.min_rating,
            self.min_height
        ));
        suffix
    }

    /// A one-line record of this run for the output's applied method log
    pub fn describe(&self) -> String {
        format!(
            "Isotope peak scan: mode={} element={} charge={} mz_tolerance={:?} rt_tolerance={} mobility_tolerance={} min_height={} min_rating={} check_intensity={} accurate_average={}",
            self.mode,
            self.element,
            self.charge,
            self.mz_tolerance,
            self.rt_tolerance.map(|t| t.to_string()).unwrap_or_else(|| "off".to_string()),
            self.mobility_tolerance.map(|t| t.to_string()).unwrap_or_else(|| "off".to_string()),
            self.min_height,
            self.min_rating,
            self.check_intensity,
            self.uses_accurate_average(),
        )
    }

    fn check_range(name: &str, value: f64, lo: f64, hi: f64) -> Result<(), ScanError> {
        if !value.is_finite() || value < lo || value > hi {
            return Err(ScanError::Configuration(format!(
                "{name} must be between {lo} and {hi}, got {value}"
            )));
        }
        Ok(())
    }

    /// Reject parameter combinations that cannot be scanned with
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.charge == 0 {
            return Err(PatternError::InvalidCharge.into());
        }
        let mz_width = match self.mz_tolerance {
            Tolerance::PPM(v) => v,
            Tolerance::Da(v) => v,
        };
        Self::check_range("m/z tolerance", mz_width, 0.0, f64::MAX)?;
        if let Some(rt) = self.rt_tolerance {
            let v = match rt {
                TimeTolerance::Absolute(v) => v,
                TimeTolerance::Relative(v) => v,
            };
            Self::check_range("RT tolerance", v, 0.0, f64::MAX)?;
        }
        if let Some(m) = self.mobility_tolerance {
            Self::check_range("mobility tolerance", m.0, 0.0, f64::MAX)?;
        }
        Self::check_range("minimum height", self.min_height, 0.0, f64::MAX)?;
        Self::check_range("minimum pattern intensity", self.min_pattern_intensity, f64::MIN_POSITIVE, 1.0)?;
        Self::check_range("merge width", self.merge_width, 0.0, f64::MAX)?;
        Self::check_range("minimum rating", self.min_rating, 0.0, 1.0)?;
        Self::check_range("minimum isotope pattern score", self.min_isotope_pattern_score, 0.0, 1.0)?;
        if let Some(ac) = self.auto_carbon {
            if ac.min_carbon < 0 || ac.min_carbon > ac.max_carbon {
                return Err(PatternError::InvalidCarbonRange(ac.min_carbon, ac.max_carbon).into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Invalid isotope pattern: {0}")]
    Pattern(#[from] PatternError),
    #[error("Feature table {0:?} has no spectra with centroids to read isotope patterns from")]
    MissingSpectra(String),
    #[error("Feature table {0:?} is backed by {1} raw files, but accurate averaging requires exactly one")]
    MultipleRawFiles(String, usize),
    #[error("The scan was canceled")]
    Canceled,
}

/// Counts of why rows did not contribute a pattern match
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanSummary {
    pub rows_scanned: usize,
    pub already_identified: usize,
    pub below_min_height: usize,
    pub no_partners: usize,
    pub missing_spectrum: usize,
    pub incomplete_patterns: usize,
    pub low_ratings: usize,
    pub undefined_averages: usize,
    pub matches_found: usize,
    pub matches_accepted: usize,
}

impl Add for ScanSummary {
    type Output = ScanSummary;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ScanSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.rows_scanned += rhs.rows_scanned;
        self.already_identified += rhs.already_identified;
        self.below_min_height += rhs.below_min_height;
        self.no_partners += rhs.no_partners;
        self.missing_spectrum += rhs.missing_spectrum;
        self.incomplete_patterns += rhs.incomplete_patterns;
        self.low_ratings += rhs.low_ratings;
        self.undefined_averages += rhs.undefined_averages;
        self.matches_found += rhs.matches_found;
        self.matches_accepted += rhs.matches_accepted;
    }
}

impl Sum for ScanSummary {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Self::add)
    }
}

/// The result of a successful scan run
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Found(AnnotatedFeatureTable, ScanSummary),
    /// The output holds fewer than two rows, so no isotope pattern was found
    NoPatternFound(AnnotatedFeatureTable, ScanSummary),
}

impl ScanOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(..))
    }

    pub fn table(&self) -> &AnnotatedFeatureTable {
        match self {
            Self::Found(t, _) | Self::NoPatternFound(t, _) => t,
        }
    }

    pub fn summary(&self) -> &ScanSummary {
        match self {
            Self::Found(_, s) | Self::NoPatternFound(_, s) => s,
        }
    }

    pub fn into_table(self) -> AnnotatedFeatureTable {
        match self {
            Self::Found(t, _) | Self::NoPatternFound(t, _) => t,
        }
    }
}

#[derive(Debug, Default)]
struct PivotResult {
    matches: Vec<PatternMatch>,
    summary: ScanSummary,
}

impl PivotResult {
    fn skipped(summary: ScanSummary) -> Self {
        Self {
            matches: Vec::new(),
            summary,
        }
    }
}

/// Scans feature tables for isotope patterns, keeping generated patterns in a cache
/// owned by this instance.
#[derive(Debug, Clone)]
pub struct IsotopePeakScanner<D: IsotopeDistribution> {
    pub params: ScanParameters,
    cache: PatternCache<D>,
}

impl IsotopePeakScanner<ChemicalElementsDistribution> {
    pub fn new(params: ScanParameters) -> Self {
        let cache = PatternCache::new(ChemicalElementsDistribution::new(), params.isotopic_params());
        Self { params, cache }
    }
}

impl<D: IsotopeDistribution> IsotopePeakScanner<D> {
    pub fn with_distribution(params: ScanParameters, source: D) -> Self {
        let cache = PatternCache::new(source, params.isotopic_params());
        Self { params, cache }
    }

    fn check_data(&self, table: &FeatureTable, spectra: Option<&dyn SpectrumSource>) -> Result<(), ScanError> {
        let needs_spectra = self.params.mode == ScanMode::Enhanced || self.params.uses_accurate_average();
        if needs_spectra && !spectra.is_some_and(|s| s.has_centroids()) {
            return Err(ScanError::MissingSpectra(table.name.clone()));
        }
        if self.params.uses_accurate_average() {
            let n_files = table
                .raw_files
                .len()
                .max(spectra.map(|s| s.raw_file_count()).unwrap_or_default());
            if n_files > 1 {
                return Err(ScanError::MultipleRawFiles(table.name.clone(), n_files));
            }
        }
        let polarity = self.params.polarity();
        if table.polarity != Polarity::Unknown && table.polarity != polarity {
            warn!(
                "The scan polarity {polarity} does not match the polarity of {:?}, {}",
                table.name, table.polarity
            );
        }
        Ok(())
    }

    /// Build the patterns for this run, reusing any already in the cache
    pub fn pattern_set(&mut self) -> Result<PatternSet, ScanError> {
        self.cache.set_params(self.params.isotopic_params());
        let set = self.params.composition_set_spec().build(&mut self.cache)?;
        info!(
            "Scanning for {} isotope patterns, the widest spanning {:.4} m/z",
            set.len(),
            set.max_offset()
        );
        Ok(set)
    }

    /// Scan `table` for isotope patterns, reporting progress through `task`.
    ///
    /// Configuration and data errors set the task status to [`TaskStatus::Error`] and are
    /// returned before any row is scanned. The input table is never modified.
    pub fn scan(
        &mut self,
        table: &FeatureTable,
        spectra: Option<&dyn SpectrumSource>,
        task: &ScanTask,
    ) -> Result<ScanOutcome, ScanError> {
        match self.scan_inner(table, spectra, task) {
            Ok(outcome) => {
                task.set_message(match &outcome {
                    ScanOutcome::Found(t, _) => format!("Found isotope patterns in {} rows", t.len()),
                    ScanOutcome::NoPatternFound(..) => "No isotope pattern found".to_string(),
                });
                task.set_status(TaskStatus::Finished);
                Ok(outcome)
            }
            Err(ScanError::Canceled) => {
                task.cancel();
                Err(ScanError::Canceled)
            }
            Err(e) => {
                task.fail(e.to_string());
                Err(e)
            }
        }
    }

    fn scan_inner(
        &mut self,
        table: &FeatureTable,
        spectra: Option<&dyn SpectrumSource>,
        task: &ScanTask,
    ) -> Result<ScanOutcome, ScanError> {
        task.set_message("Checking parameters");
        self.params.validate()?;
        self.check_data(table, spectra)?;
        let patterns = self.pattern_set()?;
        if task.is_canceled() {
            return Err(ScanError::Canceled);
        }

        task.begin(table.len());
        task.set_message(format!("Scanning {} rows of {:?}", table.len(), table.name));

        let results = match self.params.mode {
            ScanMode::Grouped => scan_grouped(table, spectra, &self.params, &patterns, task),
            ScanMode::Enhanced => scan_enhanced(table, spectra, &self.params, &patterns, task),
        };
        if task.is_canceled() {
            return Err(ScanError::Canceled);
        }

        let mut summary: ScanSummary = results.iter().map(|r| r.summary).sum();
        let mut matches: Vec<PatternMatch> = results.into_iter().flat_map(|r| r.matches).collect();
        summary.matches_found = matches.len();

        if self.params.best_composition {
            matches = resolve_best_composition(matches);
        }
        if self.params.only_monoisotopic {
            matches = resolve_monoisotopic(matches, &self.params.conflict_params());
        }
        summary.matches_accepted = matches.len();

        let index = table.row_index();
        let mut applied_methods = table.applied_methods.clone();
        applied_methods.push(self.params.describe());
        let context = AssemblyContext {
            name: format!("{} {}", table.name, self.params.resolved_suffix()),
            polarity: self.params.polarity(),
            raw_files: table.raw_files.clone(),
            applied_methods,
            multiple_compositions: patterns.has_multiple_compositions(),
        };
        let output = assemble(&matches, &index, &context);
        info!(
            "Accepted {} of {} isotope pattern matches, annotating {} rows",
            summary.matches_accepted,
            summary.matches_found,
            output.len()
        );
        debug!("{summary:?}");
        if output.len() > 1 {
            Ok(ScanOutcome::Found(output, summary))
        } else {
            Ok(ScanOutcome::NoPatternFound(output, summary))
        }
    }
}

fn scan_grouped_pivot(
    sorted: &[&FeatureRow],
    order: usize,
    spectra: Option<&dyn SpectrumSource>,
    params: &ScanParameters,
    patterns: &PatternSet,
) -> PivotResult {
    let mut summary = ScanSummary {
        rows_scanned: 1,
        ..Default::default()
    };
    let pivot = sorted[order];
    if pivot.is_identified() {
        trace!("Skipping identified row {}", pivot.id);
        summary.already_identified += 1;
        return PivotResult::skipped(summary);
    }
    if pivot.intensity < params.min_height {
        summary.below_min_height += 1;
        return PivotResult::skipped(summary);
    }
    let grouping = params.grouping_params();
    let group = group_rows(sorted, order, patterns.max_offset(), &grouping);
    if group.len() < 2 {
        trace!("Row {} has no isotope partners", pivot.id);
        summary.no_partners += 1;
        return PivotResult::skipped(summary);
    }

    let rater = IsotopeRater::new(params.mz_tolerance, params.check_intensity);
    let averaged = params.uses_accurate_average();
    let mut matches = Vec::new();
    for entry in patterns.iter() {
        let pattern = &entry.pattern;
        let bag = search_candidates(&group, pattern, &grouping);
        if !bag.is_complete() {
            summary.incomplete_patterns += 1;
            continue;
        }
        let mut slots = rate_candidates(&group, &bag, pattern, &rater, params.min_rating);
        let Some(mut score) = slots.simple_average() else {
            trace!("Row {} rated too low for {pattern}", pivot.id);
            summary.low_ratings += 1;
            continue;
        };
        if averaged {
            if let Some(source) = spectra {
                score = accurate_average(&mut slots, pivot, pattern, source, &rater, params.min_height);
            } else {
                score = UNDEFINED_AVERAGE;
            }
            if score == UNDEFINED_AVERAGE {
                summary.undefined_averages += 1;
                continue;
            }
        }
        let detected = slots.iter().map(|c| c.as_detected()).collect();
        matches.push(
            PatternMatch::new(
                pivot,
                order,
                entry.id,
                Arc::clone(pattern),
                slots.into_candidates(),
                detected,
                score,
            )
            .with_averaged(averaged),
        );
    }
    PivotResult { matches, summary }
}

fn scan_grouped(
    table: &FeatureTable,
    spectra: Option<&dyn SpectrumSource>,
    params: &ScanParameters,
    patterns: &PatternSet,
    task: &ScanTask,
) -> Vec<PivotResult> {
    let sorted = table.sorted_by_mz();
    (0..sorted.len())
        .into_par_iter()
        .map(|order| {
            if task.is_canceled() {
                return PivotResult::default();
            }
            let result = scan_grouped_pivot(&sorted, order, spectra, params, patterns);
            task.advance();
            result
        })
        .collect()
}

fn scan_enhanced_row(
    row: &FeatureRow,
    order: usize,
    spectra: &dyn SpectrumSource,
    params: &ScanParameters,
    patterns: &PatternSet,
) -> PivotResult {
    let mut summary = ScanSummary {
        rows_scanned: 1,
        ..Default::default()
    };
    if row.intensity < params.min_height {
        summary.below_min_height += 1;
        return PivotResult::skipped(summary);
    }
    let mobility_tolerance = if params.resolve_by_mobility {
        params.mobility_tolerance.as_ref()
    } else {
        None
    };
    let peaks = row.representative_scan.and_then(|scan| {
        select_spectrum(spectra, scan, row.mz, params.mz_tolerance, row.mobility, mobility_tolerance)
    });
    let Some(peaks) = peaks else {
        trace!("Row {} has no representative spectrum", row.id);
        summary.missing_spectrum += 1;
        return PivotResult::skipped(summary);
    };

    let scorer = PatternSimilarityScorer::new(params.mz_tolerance);
    let mut matches = Vec::new();
    for entry in patterns.iter() {
        let pattern = &entry.pattern;
        let detected = scorer.detect(peaks, row.mz, pattern, params.min_height);
        let complete = detected.iter().all(|p| p.intensity > 0.0);
        if !complete && !params.allow_missing_isotopes {
            summary.incomplete_patterns += 1;
            continue;
        }
        let score = scorer.score(&detected, row.mz, pattern);
        if score < params.min_isotope_pattern_score || score <= 0.0 {
            summary.low_ratings += 1;
            continue;
        }
        matches.push(PatternMatch::new(
            row,
            order,
            entry.id,
            Arc::clone(pattern),
            Vec::new(),
            detected,
            score,
        ));
    }
    PivotResult { matches, summary }
}

fn scan_enhanced(
    table: &FeatureTable,
    spectra: Option<&dyn SpectrumSource>,
    params: &ScanParameters,
    patterns: &PatternSet,
    task: &ScanTask,
) -> Vec<PivotResult> {
    let Some(spectra) = spectra else {
        return Vec::new();
    };
    table
        .rows
        .par_iter()
        .enumerate()
        .map(|(order, row)| {
            if task.is_canceled() {
                return PivotResult::default();
            }
            let result = scan_enhanced_row(row, order, spectra, params, patterns);
            task.advance();
            result
        })
        .collect()
}

/// Scan `table` for the isotope patterns described by `params` with a fresh pattern cache.
///
/// # Note
/// If you are scanning many tables with the same parameters, it may be preferable to create an
/// [`IsotopePeakScanner`] and call its [`IsotopePeakScanner::scan`] method so generated patterns
/// are reused between runs.
pub fn scan_feature_table(
    table: &FeatureTable,
    spectra: Option<&dyn SpectrumSource>,
    params: ScanParameters,
    task: &ScanTask,
) -> Result<ScanOutcome, ScanError> {
    let mut scanner = IsotopePeakScanner::new(params);
    scanner.scan(table, spectra, task)
}
