/*! Theoretical isotope patterns for the element combinations being scanned for */
use std::collections::hash_map::{Entry, HashMap};
use std::fmt::Display;
use std::sync::Arc;

use chemical_elements::{ChemicalComposition, ElementSpecification, PROTON as _PROTON};
use itertools::iproduct;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::feature::Polarity;

/// The mass of H+, a hydrogen atom minus an electron
pub const PROTON: f64 = _PROTON;

/// Round `value` to `places` decimals, with halves rounding away from zero
pub(crate) fn round_half_up(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatternError {
    #[error("Failed to parse formula {0:?}: {1}")]
    InvalidFormula(String, String),
    #[error("The isotope pattern of {0:?} has no peaks above the intensity threshold")]
    EmptyPattern(String),
    #[error("No isotope pattern could be built from {0:?}")]
    EmptyPatternSet(String),
    #[error("Charge must be non-zero")]
    InvalidCharge,
    #[error("Invalid carbon range {0}..={1}")]
    InvalidCarbonRange(i32, i32),
}

/// A single isotopologue mass and its abundance in arbitrary units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotopePeak {
    pub mass: f64,
    pub intensity: f64,
}

impl IsotopePeak {
    pub fn new(mass: f64, intensity: f64) -> Self {
        Self { mass, intensity }
    }
}

/// The capability to compute the isotope distribution of a chemical formula
pub trait IsotopeDistribution {
    /// Compute the distribution of `formula` at charge 1, in no particular order
    fn isotope_distribution(&mut self, formula: &str) -> Result<Vec<IsotopePeak>, PatternError>;
}

/// Isotopologues below this fraction of the most abundant one are discarded between
/// convolution steps
const CONVOLUTION_FLOOR: f64 = 1e-8;
/// Isotopologues closer than this many Da are the same mass
const SAME_MASS: f64 = 1e-6;

/// Combine two independent isotope distributions into the distribution of their sum
fn convolve(left: &[IsotopePeak], right: &[IsotopePeak]) -> Vec<IsotopePeak> {
    let mut peaks: Vec<IsotopePeak> = iproduct!(left.iter(), right.iter())
        .map(|(a, b)| IsotopePeak::new(a.mass + b.mass, a.intensity * b.intensity))
        .collect();
    peaks.sort_by(|a, b| a.mass.total_cmp(&b.mass));
    let mut peaks = merge_close_peaks(peaks, SAME_MASS);
    let floor = peaks.iter().map(|p| p.intensity).fold(0.0, f64::max) * CONVOLUTION_FLOOR;
    peaks.retain(|p| p.intensity >= floor);
    peaks
}

/// The distribution of `count` atoms drawn from `isotopes`, by repeated squaring
fn power(isotopes: &[IsotopePeak], count: u32) -> Vec<IsotopePeak> {
    let mut acc = vec![IsotopePeak::new(0.0, 1.0)];
    let mut base = isotopes.to_vec();
    let mut n = count;
    while n > 0 {
        if n & 1 == 1 {
            acc = convolve(&acc, &base);
        }
        n >>= 1;
        if n > 0 {
            base = convolve(&base, &base);
        }
    }
    acc
}

/// An [`IsotopeDistribution`] computed from the natural isotope abundances of
/// `chemical_elements`' periodic table.
///
/// Each element's isotopes are convolved with themselves once per atom, and the
/// per-element distributions are convolved together. Every isotopologue is kept,
/// so elements without an M+1 isotope, like chlorine and bromine, still produce
/// their M+2 and M+4 peaks.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChemicalElementsDistribution;

impl ChemicalElementsDistribution {
    pub fn new() -> Self {
        Self
    }

    fn isotopes_of(
        formula: &str,
        spec: &ElementSpecification<'_>,
    ) -> Result<Vec<IsotopePeak>, PatternError> {
        let element = spec.element;
        if spec.isotope != 0 {
            return element
                .isotopes
                .get(&spec.isotope)
                .map(|iso| vec![IsotopePeak::new(iso.mass, 1.0)])
                .ok_or_else(|| {
                    PatternError::InvalidFormula(
                        formula.to_string(),
                        format!("{} has no isotope {}", element.symbol, spec.isotope),
                    )
                });
        }
        let mut isotopes: Vec<IsotopePeak> = element
            .isotopes
            .values()
            .filter(|iso| iso.abundance > 0.0 && iso.mass > 0.0)
            .map(|iso| IsotopePeak::new(iso.mass, iso.abundance))
            .collect();
        if isotopes.is_empty() {
            isotopes.push(IsotopePeak::new(element.most_abundant_mass, 1.0));
        }
        isotopes.sort_by(|a, b| a.mass.total_cmp(&b.mass));
        Ok(isotopes)
    }
}

impl IsotopeDistribution for ChemicalElementsDistribution {
    fn isotope_distribution(&mut self, formula: &str) -> Result<Vec<IsotopePeak>, PatternError> {
        let trimmed = formula.trim();
        if trimmed.is_empty() {
            return Err(PatternError::InvalidFormula(
                formula.to_string(),
                "empty formula".to_string(),
            ));
        }
        let composition = ChemicalComposition::parse(trimmed)
            .map_err(|e| PatternError::InvalidFormula(formula.to_string(), format!("{e:?}")))?;
        if composition.mass() <= 0.0 {
            return Err(PatternError::InvalidFormula(
                formula.to_string(),
                "formula has no mass".to_string(),
            ));
        }
        let mut distribution = vec![IsotopePeak::new(0.0, 1.0)];
        for (spec, count) in composition.iter() {
            let count = u32::try_from(*count).map_err(|_| {
                PatternError::InvalidFormula(
                    formula.to_string(),
                    format!("negative count {count} for {spec}"),
                )
            })?;
            if count == 0 {
                continue;
            }
            let isotopes = Self::isotopes_of(formula, spec)?;
            distribution = convolve(&distribution, &power(&isotopes, count));
        }
        trace!(
            "{formula} has {} isotopologues above the convolution floor",
            distribution.len()
        );
        Ok(distribution)
    }
}

/// One expected peak of a [`TheoreticalPattern`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IsotopeSlot {
    /// The m/z distance from the lightest peak of the pattern
    pub offset: f64,
    /// The abundance relative to the most abundant peak of the pattern
    pub intensity: f64,
    /// A label for the isotopologue, like `M+2`
    pub label: String,
}

/// The merged, pruned isotope pattern of a composition at a charge state.
///
/// Slot 0 is the lightest surviving peak and always has an offset of 0. Offsets
/// are strictly increasing and intensities are scaled so the most abundant peak is 1.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TheoreticalPattern {
    pub composition: String,
    /// The absolute charge state
    pub charge: i32,
    pub polarity: Polarity,
    pub slots: Vec<IsotopeSlot>,
    /// The neutral mass of slot 0
    pub base_mass: f64,
    base_peak_index: usize,
}

impl TheoreticalPattern {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IsotopeSlot> {
        self.slots.iter()
    }

    /// The largest m/z offset of the pattern
    pub fn max_offset(&self) -> f64 {
        self.slots.last().map(|s| s.offset).unwrap_or_default()
    }

    /// The index of the most abundant slot
    pub fn base_peak_index(&self) -> usize {
        self.base_peak_index
    }

    pub fn offsets(&self) -> impl Iterator<Item = f64> + '_ {
        self.slots.iter().map(|s| s.offset)
    }

    /// The intensity of slot `i` relative to slot 0
    pub fn ratio_to_first(&self, i: usize) -> f64 {
        match (self.slots.first(), self.slots.get(i)) {
            (Some(first), Some(slot)) if first.intensity > 0.0 => slot.intensity / first.intensity,
            _ => 0.0,
        }
    }

    /// The relative intensities of the slots formatted like `1.00:0.64:0.10`
    pub fn intensity_ratios(&self) -> String {
        self.slots
            .iter()
            .map(|s| format!("{:.2}", round_half_up(s.intensity, 2)))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// The expected m/z of every slot when slot 0 is placed at `mz`
    pub fn expected_mzs(&self, mz: f64) -> Vec<f64> {
        self.slots.iter().map(|s| mz + s.offset).collect()
    }
}

impl Display for TheoreticalPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, charge {}", self.composition, self.charge)
    }
}

/// Parameters controlling how a raw isotope distribution is reduced to a [`TheoreticalPattern`]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IsotopicPatternParams {
    /// Isotopologues below this fraction of the most abundant one are dropped
    pub min_intensity: f64,
    /// Isotopologues closer than this many Da are merged into one peak
    pub merge_width: f64,
}

impl Default for IsotopicPatternParams {
    fn default() -> Self {
        Self {
            min_intensity: 0.01,
            merge_width: 0.0005,
        }
    }
}

impl IsotopicPatternParams {
    pub fn new(min_intensity: f64, merge_width: f64) -> Self {
        Self {
            min_intensity,
            merge_width,
        }
    }
}

/// Merge neighboring peaks closer than `width` into their intensity-weighted centroid.
/// `peaks` must be sorted by mass.
fn merge_close_peaks(peaks: Vec<IsotopePeak>, width: f64) -> Vec<IsotopePeak> {
    let mut merged: Vec<IsotopePeak> = Vec::with_capacity(peaks.len());
    for peak in peaks {
        match merged.last_mut() {
            Some(prev) if (peak.mass - prev.mass).abs() < width => {
                let total = prev.intensity + peak.intensity;
                if total > 0.0 {
                    prev.mass = (prev.mass * prev.intensity + peak.mass * peak.intensity) / total;
                }
                prev.intensity = total;
            }
            _ => merged.push(peak),
        }
    }
    merged
}

/// Reduce a raw isotope distribution of `composition` into a [`TheoreticalPattern`] at `charge`.
///
/// Non-finite peaks are discarded, close peaks are merged, intensities are scaled to the
/// most abundant peak, and peaks below `params.min_intensity` are pruned.
pub fn build_pattern(
    composition: &str,
    charge: i32,
    mut distribution: Vec<IsotopePeak>,
    params: &IsotopicPatternParams,
) -> Result<TheoreticalPattern, PatternError> {
    if charge == 0 {
        return Err(PatternError::InvalidCharge);
    }
    distribution.retain(|p| p.mass.is_finite() && p.intensity.is_finite() && p.intensity >= 0.0);
    distribution.sort_by(|a, b| a.mass.total_cmp(&b.mass));
    let merged = merge_close_peaks(distribution, params.merge_width);

    let max_intensity = merged.iter().map(|p| p.intensity).fold(0.0, f64::max);
    if max_intensity <= 0.0 {
        return Err(PatternError::EmptyPattern(composition.to_string()));
    }

    let kept: Vec<IsotopePeak> = merged
        .into_iter()
        .map(|p| IsotopePeak::new(p.mass, p.intensity / max_intensity))
        .filter(|p| p.intensity >= params.min_intensity)
        .collect();

    let Some(first) = kept.first().copied() else {
        return Err(PatternError::EmptyPattern(composition.to_string()));
    };

    let z = charge.abs();
    let slots: Vec<IsotopeSlot> = kept
        .iter()
        .map(|p| {
            let shift = p.mass - first.mass;
            IsotopeSlot {
                offset: shift / z as f64,
                intensity: p.intensity,
                label: format!("M+{}", shift.round() as i64),
            }
        })
        .collect();

    let base_peak_index = slots
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.intensity.total_cmp(&b.intensity))
        .map(|(i, _)| i)
        .unwrap_or_default();

    trace!(
        "Built pattern {composition} z={charge} with {} slots, base peak at {base_peak_index}",
        slots.len()
    );

    Ok(TheoreticalPattern {
        composition: composition.to_string(),
        charge: z,
        polarity: Polarity::from_charge(charge),
        slots,
        base_mass: first.mass,
        base_peak_index,
    })
}

/// Generates [`TheoreticalPattern`]s on demand and remembers them for the lifetime
/// of a single scan run.
#[derive(Debug, Clone)]
pub struct PatternCache<D: IsotopeDistribution> {
    source: D,
    params: IsotopicPatternParams,
    distributions: HashMap<String, Vec<IsotopePeak>>,
    patterns: HashMap<(String, i32), Arc<TheoreticalPattern>>,
}

impl<D: IsotopeDistribution> PatternCache<D> {
    pub fn new(source: D, params: IsotopicPatternParams) -> Self {
        Self {
            source,
            params,
            distributions: HashMap::new(),
            patterns: HashMap::new(),
        }
    }

    pub fn params(&self) -> &IsotopicPatternParams {
        &self.params
    }

    /// Change the pattern reduction parameters, discarding patterns built under the old ones
    pub fn set_params(&mut self, params: IsotopicPatternParams) {
        if self.params != params {
            self.patterns.clear();
            self.params = params;
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn clear(&mut self) {
        self.distributions.clear();
        self.patterns.clear();
    }

    fn distribution_of(&mut self, composition: &str) -> Result<Vec<IsotopePeak>, PatternError> {
        match self.distributions.entry(composition.to_string()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let dist = self.source.isotope_distribution(composition)?;
                Ok(e.insert(dist).clone())
            }
        }
    }

    /// Get the pattern of `composition` at `charge`, building it if it was not seen before
    pub fn get_or_generate(
        &mut self,
        composition: &str,
        charge: i32,
    ) -> Result<Arc<TheoreticalPattern>, PatternError> {
        if charge == 0 {
            return Err(PatternError::InvalidCharge);
        }
        let key = (composition.to_string(), charge);
        if let Some(hit) = self.patterns.get(&key) {
            return Ok(hit.clone());
        }
        let dist = self.distribution_of(composition)?;
        let pattern = Arc::new(build_pattern(composition, charge, dist, &self.params)?);
        self.patterns.insert(key, pattern.clone());
        Ok(pattern)
    }

    /// Check that `formula` can be turned into an isotope distribution
    pub fn validate(&mut self, formula: &str) -> Result<(), PatternError> {
        self.distribution_of(formula).map(|_| ())
    }
}

impl Default for PatternCache<ChemicalElementsDistribution> {
    fn default() -> Self {
        Self::new(ChemicalElementsDistribution::new(), Default::default())
    }
}

/// A range of carbon counts to prepend to each scanned element combination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AutoCarbon {
    pub min_carbon: i32,
    pub max_carbon: i32,
    /// Compositions with fewer slots than this are dropped
    pub min_pattern_size: usize,
}

impl AutoCarbon {
    pub fn new(min_carbon: i32, max_carbon: i32, min_pattern_size: usize) -> Self {
        Self {
            min_carbon,
            max_carbon,
            min_pattern_size,
        }
    }

    fn formula_for(element: &str, carbons: i32) -> String {
        match carbons {
            0 => element.to_string(),
            1 => format!("C{element}"),
            n => format!("C{n}{element}"),
        }
    }
}

/// An identifier for a composition within a [`PatternSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompositionId(pub usize);

impl Display for CompositionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternEntry {
    pub id: CompositionId,
    pub pattern: Arc<TheoreticalPattern>,
}

/// The full table of theoretical patterns searched for in one scan run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternSet {
    entries: Vec<PatternEntry>,
}

impl PatternSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PatternEntry> {
        self.entries.iter()
    }

    pub fn get(&self, id: CompositionId) -> Option<&PatternEntry> {
        self.entries.get(id.0)
    }

    /// Whether more than one distinct composition is being scanned for
    pub fn has_multiple_compositions(&self) -> bool {
        self.entries
            .first()
            .is_some_and(|first| self.entries.iter().any(|e| e.pattern.composition != first.pattern.composition))
    }

    /// The widest m/z span of any pattern in the set
    pub fn max_offset(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| e.pattern.max_offset())
            .fold(0.0, f64::max)
    }

    fn push(&mut self, pattern: Arc<TheoreticalPattern>) {
        let id = CompositionId(self.entries.len());
        self.entries.push(PatternEntry { id, pattern });
    }
}

/// Describes which element combinations and charges to build patterns for
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionSetSpec {
    /// One or more formulas separated by commas, e.g. `Cl2` or `Br,Cl2`
    pub elements: String,
    pub charges: Vec<i32>,
    pub auto_carbon: Option<AutoCarbon>,
}

impl CompositionSetSpec {
    pub fn new(elements: impl Into<String>, charges: Vec<i32>, auto_carbon: Option<AutoCarbon>) -> Self {
        Self {
            elements: elements.into(),
            charges,
            auto_carbon,
        }
    }

    pub fn element_list(&self) -> Vec<&str> {
        self.elements
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Build every pattern of the element list, in element-major, then carbon, then charge order.
    ///
    /// Element formulas that fail to parse are fatal. In auto-carbon mode, compositions whose
    /// pattern is smaller than the minimum pattern size are dropped, and an
    /// [`PatternError::EmptyPatternSet`] is returned if none remain.
    pub fn build<D: IsotopeDistribution>(
        &self,
        cache: &mut PatternCache<D>,
    ) -> Result<PatternSet, PatternError> {
        let elements = self.element_list();
        if elements.is_empty() {
            return Err(PatternError::InvalidFormula(
                self.elements.clone(),
                "no element formula given".to_string(),
            ));
        }
        if self.charges.is_empty() || self.charges.contains(&0) {
            return Err(PatternError::InvalidCharge);
        }
        for element in elements.iter() {
            cache.validate(element)?;
        }

        let carbons: Vec<i32> = match self.auto_carbon.as_ref() {
            Some(ac) => {
                if ac.min_carbon < 0 || ac.min_carbon > ac.max_carbon {
                    return Err(PatternError::InvalidCarbonRange(ac.min_carbon, ac.max_carbon));
                }
                (ac.min_carbon..=ac.max_carbon).collect()
            }
            None => vec![0],
        };
        let min_size = self.auto_carbon.map(|ac| ac.min_pattern_size).unwrap_or_default();

        let mut set = PatternSet::default();
        let mut dropped = 0usize;
        for (element, carbon, charge) in iproduct!(elements.iter(), carbons.iter(), self.charges.iter()) {
            let formula = AutoCarbon::formula_for(element, *carbon);
            match cache.get_or_generate(&formula, *charge) {
                Ok(pattern) => {
                    if pattern.len() < min_size {
                        debug!(
                            "Dropping {pattern}, {} peaks is below the minimum pattern size {min_size}",
                            pattern.len()
                        );
                        dropped += 1;
                        continue;
                    }
                    set.push(pattern);
                }
                Err(PatternError::EmptyPattern(f)) if self.auto_carbon.is_some() => {
                    warn!("Dropping {f} at charge {charge}, its pattern is empty");
                    dropped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if set.is_empty() {
            return Err(PatternError::EmptyPatternSet(self.elements.clone()));
        }
        debug!(
            "Built {} isotope patterns from {:?}, dropped {dropped}",
            set.len(),
            self.elements
        );
        Ok(set)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A two-isotope chlorine-like model so pattern shapes can be checked exactly
    #[derive(Debug, Default, Clone)]
    struct FixedDistribution;

    impl IsotopeDistribution for FixedDistribution {
        fn isotope_distribution(&mut self, formula: &str) -> Result<Vec<IsotopePeak>, PatternError> {
            match formula {
                "Cl" => Ok(vec![
                    IsotopePeak::new(36.9659, 0.2423),
                    IsotopePeak::new(34.9689, 0.7577),
                ]),
                "Cl2" => Ok(vec![
                    IsotopePeak::new(69.9377, 0.5741),
                    IsotopePeak::new(71.9348, 0.3672),
                    IsotopePeak::new(73.9318, 0.0587),
                ]),
                "CCl2" | "C2Cl2" => Ok(vec![
                    IsotopePeak::new(81.9377, 0.5741),
                    IsotopePeak::new(81.9379, 0.0060),
                    IsotopePeak::new(83.9348, 0.3672),
                    IsotopePeak::new(f64::NAN, 0.1),
                ]),
                _ => Err(PatternError::InvalidFormula(formula.to_string(), "unknown".into())),
            }
        }
    }

    #[test]
    fn test_build_pattern_shape() {
        let mut cache = PatternCache::new(FixedDistribution, IsotopicPatternParams::new(0.01, 0.0005));
        let pattern = cache.get_or_generate("Cl2", 2).unwrap();
        assert_eq!(pattern.len(), 3);
        assert_eq!(pattern.charge, 2);
        assert_eq!(pattern.slots[0].offset, 0.0);
        assert!((pattern.slots[1].offset - 0.99855).abs() < 1e-4);
        assert!(pattern.offsets().zip(pattern.offsets().skip(1)).all(|(a, b)| b > a));
        assert_eq!(pattern.base_peak_index(), 0);
        assert_eq!(pattern.slots[0].intensity, 1.0);
        assert_eq!(pattern.slots[2].label, "M+4");
        assert_eq!(pattern.to_string(), "Cl2, charge 2");
        assert_eq!(pattern.intensity_ratios(), "1.00:0.64:0.10");
    }

    #[test]
    fn test_merge_and_prune() {
        let mut cache = PatternCache::new(FixedDistribution, IsotopicPatternParams::new(0.2, 0.0005));
        let pattern = cache.get_or_generate("CCl2", 1).unwrap();
        // The two close peaks merge, the NaN is discarded, nothing else falls under 0.2
        assert_eq!(pattern.len(), 2);
        assert!((pattern.slots[1].offset - 1.9969).abs() < 1e-3);

        let mut cache = PatternCache::new(FixedDistribution, IsotopicPatternParams::new(0.2, 0.0005));
        let pattern = cache.get_or_generate("Cl2", 1).unwrap();
        assert_eq!(pattern.len(), 2);
    }

    #[test]
    fn test_cache_reuse() {
        let mut cache = PatternCache::new(FixedDistribution, IsotopicPatternParams::default());
        let a = cache.get_or_generate("Cl2", 1).unwrap();
        let b = cache.get_or_generate("Cl2", 1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = cache.get_or_generate("Cl2", -1).unwrap();
        assert_eq!(c.polarity, Polarity::Negative);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_or_generate("Cl2", 0), Err(PatternError::InvalidCharge));
    }

    #[test]
    fn test_composition_set() {
        let mut cache = PatternCache::new(FixedDistribution, IsotopicPatternParams::default());
        let spec = CompositionSetSpec::new("Cl2, Cl", vec![1, 2], None);
        let set = spec.build(&mut cache).unwrap();
        assert_eq!(set.len(), 4);
        assert!(set.has_multiple_compositions());
        assert_eq!(set.get(CompositionId(1)).unwrap().pattern.charge, 2);

        let spec = CompositionSetSpec::new("Cl2,Xx9", vec![1], None);
        assert!(matches!(spec.build(&mut cache), Err(PatternError::InvalidFormula(..))));
    }

    #[test]
    fn test_auto_carbon_min_size() {
        let mut cache = PatternCache::new(FixedDistribution, IsotopicPatternParams::new(0.2, 0.0005));
        let spec = CompositionSetSpec::new("Cl2", vec![1], Some(AutoCarbon::new(1, 2, 3)));
        assert!(matches!(spec.build(&mut cache), Err(PatternError::EmptyPatternSet(_))));

        let spec = CompositionSetSpec::new("Cl2", vec![1], Some(AutoCarbon::new(0, 2, 2)));
        let set = spec.build(&mut cache).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(CompositionId(1)).unwrap().pattern.composition, "CCl2");
    }

    #[test]
    fn test_chemical_elements_chlorine() {
        let mut source = ChemicalElementsDistribution::new();
        let dist = source.isotope_distribution("Cl2").unwrap();
        let pattern = build_pattern("Cl2", 1, dist, &IsotopicPatternParams::default()).unwrap();
        assert_eq!(pattern.len(), 3);
        let labels: Vec<_> = pattern.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["M+0", "M+2", "M+4"]);
        assert!((pattern.base_mass - 69.937706).abs() < 1e-5);
        assert!((pattern.slots[1].offset - 1.99705).abs() < 1e-4);
        assert!((pattern.slots[2].offset - 3.99410).abs() < 1e-4);
        assert_eq!(pattern.slots[0].intensity, 1.0);
        assert!((pattern.slots[1].intensity - 0.64).abs() < 0.005);
        assert!((pattern.slots[2].intensity - 0.1024).abs() < 0.005);
        assert_eq!(pattern.intensity_ratios(), "1.00:0.64:0.10");
        assert!(source.isotope_distribution("").is_err());
    }

    #[test]
    fn test_chemical_elements_bromine() {
        let mut source = ChemicalElementsDistribution::new();
        let dist = source.isotope_distribution("Br2").unwrap();
        let pattern = build_pattern("Br2", 2, dist, &IsotopicPatternParams::default()).unwrap();
        assert_eq!(pattern.len(), 3);
        assert_eq!(pattern.base_peak_index(), 1);
        assert!((pattern.slots[0].intensity - 0.514).abs() < 0.005);
        assert!((pattern.slots[2].intensity - 0.486).abs() < 0.005);
        // Offsets are in m/z, so they halve at charge 2
        assert!((pattern.slots[1].offset - 0.99898).abs() < 1e-4);
    }

    #[test]
    fn test_chemical_elements_carbon_envelope() {
        let mut source = ChemicalElementsDistribution::new();
        let dist = source.isotope_distribution("C6H12O6").unwrap();
        let total: f64 = dist.iter().map(|p| p.intensity).sum();
        assert!((total - 1.0).abs() < 1e-4);
        let pattern = build_pattern("C6H12O6", 1, dist, &IsotopicPatternParams::default()).unwrap();
        assert!((pattern.base_mass - 180.06339).abs() < 1e-4);
        assert!((pattern.slots[1].offset - 1.00335).abs() < 1e-3);
        assert!(pattern.len() >= 3);
    }
}
