//! Access to the centroided spectra backing a feature table
use std::collections::HashMap;

use identity_hash::BuildIdentityHasher;
use mzpeaks::{prelude::*, CentroidPeak, MZPeakSetType, Tolerance};
use tracing::trace;

use crate::tolerance::{MobilityTolerance, ToleranceWindow};

/// A single ion mobility slice of a frame
#[derive(Debug, Clone, Default)]
pub struct MobilityScan {
    pub mobility: f64,
    pub peaks: MZPeakSetType<CentroidPeak>,
}

impl MobilityScan {
    pub fn new(mobility: f64, peaks: Vec<CentroidPeak>) -> Self {
        Self {
            mobility,
            peaks: peaks.into_iter().collect(),
        }
    }
}

/// A centroided spectrum, optionally with its mobility-resolved slices
#[derive(Debug, Clone, Default)]
pub struct StoredSpectrum {
    pub index: usize,
    /// Scan start time in minutes
    pub time: f64,
    pub peaks: MZPeakSetType<CentroidPeak>,
    pub mobility_scans: Vec<MobilityScan>,
}

impl StoredSpectrum {
    pub fn new(index: usize, time: f64, peaks: Vec<CentroidPeak>) -> Self {
        Self {
            index,
            time,
            peaks: peaks.into_iter().collect(),
            mobility_scans: Vec::new(),
        }
    }

    pub fn with_mobility_scans(mut self, mobility_scans: Vec<MobilityScan>) -> Self {
        self.mobility_scans = mobility_scans;
        self
    }
}

/// The raw data collaborator the scanner reads centroids from
pub trait SpectrumSource: Sync {
    /// The number of distinct raw data files the spectra come from
    fn raw_file_count(&self) -> usize;

    /// Whether any spectrum carries a centroid list
    fn has_centroids(&self) -> bool;

    fn peaks_of(&self, scan: usize) -> Option<&MZPeakSetType<CentroidPeak>>;

    fn mobility_scans_of(&self, scan: usize) -> &[MobilityScan];

    /// The centroid peaks of `scan` matching `mz` within `tolerance`
    fn peaks_near(&self, scan: usize, mz: f64, tolerance: Tolerance) -> &[CentroidPeak] {
        match self.peaks_of(scan) {
            Some(peaks) => peaks.all_peaks_for(mz, tolerance),
            None => &[],
        }
    }
}

/// An in-memory [`SpectrumSource`] keyed by spectrum index
#[derive(Debug, Clone, Default)]
pub struct SpectrumStore {
    spectra: HashMap<usize, StoredSpectrum, BuildIdentityHasher<usize>>,
    raw_files: Vec<String>,
}

impl SpectrumStore {
    pub fn new(raw_files: Vec<String>) -> Self {
        Self {
            spectra: HashMap::default(),
            raw_files,
        }
    }

    pub fn insert(&mut self, spectrum: StoredSpectrum) -> Option<StoredSpectrum> {
        self.spectra.insert(spectrum.index, spectrum)
    }

    pub fn get(&self, index: usize) -> Option<&StoredSpectrum> {
        self.spectra.get(&index)
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    pub fn raw_files(&self) -> &[String] {
        &self.raw_files
    }

    /// Whether any stored spectrum is split into mobility scans
    pub fn has_mobility_scans(&self) -> bool {
        self.spectra.values().any(|s| !s.mobility_scans.is_empty())
    }
}

impl FromIterator<StoredSpectrum> for SpectrumStore {
    fn from_iter<T: IntoIterator<Item = StoredSpectrum>>(iter: T) -> Self {
        let mut this = Self::new(Vec::new());
        for spec in iter {
            this.insert(spec);
        }
        this
    }
}

impl SpectrumSource for SpectrumStore {
    fn raw_file_count(&self) -> usize {
        self.raw_files.len().max(usize::from(!self.spectra.is_empty()))
    }

    fn has_centroids(&self) -> bool {
        self.spectra.values().any(|s| !s.peaks.is_empty())
    }

    fn peaks_of(&self, scan: usize) -> Option<&MZPeakSetType<CentroidPeak>> {
        self.spectra.get(&scan).map(|s| &s.peaks)
    }

    fn mobility_scans_of(&self, scan: usize) -> &[MobilityScan] {
        self.spectra
            .get(&scan)
            .map(|s| s.mobility_scans.as_slice())
            .unwrap_or_default()
    }
}

/// The most intense peak of `peaks` within `tolerance` of `mz` whose intensity exceeds `min_intensity`.
///
/// The floor is strict here, while row grouping keeps rows at exactly the minimum height.
pub fn most_intense_within(
    peaks: &MZPeakSetType<CentroidPeak>,
    mz: f64,
    tolerance: Tolerance,
    min_intensity: f64,
) -> Option<&CentroidPeak> {
    peaks
        .all_peaks_for(mz, tolerance)
        .iter()
        .filter(|p| tolerance.within(p.mz(), mz) && p.intensity() as f64 > min_intensity)
        .max_by(|a, b| a.intensity().total_cmp(&b.intensity()))
}

fn summed_intensity_near(peaks: &MZPeakSetType<CentroidPeak>, mz: f64, tolerance: Tolerance) -> f64 {
    peaks
        .all_peaks_for(mz, tolerance)
        .iter()
        .filter(|p| tolerance.within(p.mz(), mz))
        .map(|p| p.intensity() as f64)
        .sum()
}

/// Choose the peaks to read a feature's isotope pattern from.
///
/// Without a mobility to resolve by, this is the frame spectrum itself. Otherwise it is the
/// mobility scan within `mobility_tolerance` of `mobility` with the highest summed intensity
/// around `mz`, falling back to the frame spectrum when no mobility scan qualifies.
pub fn select_spectrum<'a, S: SpectrumSource + ?Sized>(
    source: &'a S,
    scan: usize,
    mz: f64,
    mz_tolerance: Tolerance,
    mobility: Option<f64>,
    mobility_tolerance: Option<&MobilityTolerance>,
) -> Option<&'a MZPeakSetType<CentroidPeak>> {
    if let (Some(mobility), Some(mobility_tolerance)) = (mobility, mobility_tolerance) {
        let best = source
            .mobility_scans_of(scan)
            .iter()
            .filter(|m| mobility_tolerance.within(m.mobility, mobility))
            .map(|m| (m, summed_intensity_near(&m.peaks, mz, mz_tolerance)))
            .filter(|(_, total)| *total > 0.0)
            .fold(None, |best: Option<(&MobilityScan, f64)>, (m, total)| match best {
                Some((_, best_total)) if best_total >= total => best,
                _ => Some((m, total)),
            });
        if let Some((m, total)) = best {
            trace!("Resolved scan {scan} to mobility {} with intensity {total}", m.mobility);
            return Some(&m.peaks);
        }
    }
    source.peaks_of(scan)
}

#[cfg(test)]
mod test {
    use super::*;

    fn store() -> SpectrumStore {
        let frame = StoredSpectrum::new(
            3,
            1.0,
            vec![
                CentroidPeak::new(200.0, 100.0, 0),
                CentroidPeak::new(200.0005, 300.0, 1),
                CentroidPeak::new(201.997, 60.0, 2),
            ],
        )
        .with_mobility_scans(vec![
            MobilityScan::new(0.80, vec![CentroidPeak::new(200.0, 50.0, 0)]),
            MobilityScan::new(0.81, vec![CentroidPeak::new(200.0, 250.0, 0)]),
            MobilityScan::new(1.20, vec![CentroidPeak::new(200.0, 900.0, 0)]),
        ]);
        let mut store = SpectrumStore::new(vec!["run.mzML".to_string()]);
        store.insert(frame);
        store
    }

    #[test]
    fn test_most_intense_within() {
        let store = store();
        let peaks = store.peaks_of(3).unwrap();
        let hit = most_intense_within(peaks, 200.0, Tolerance::PPM(10.0), 0.0).unwrap();
        assert_eq!(hit.intensity(), 300.0);
        assert!(most_intense_within(peaks, 200.0, Tolerance::PPM(10.0), 500.0).is_none());
        assert!(most_intense_within(peaks, 203.994, Tolerance::PPM(10.0), 0.0).is_none());
        assert!(store.peaks_of(9).is_none());
        assert!(store.has_centroids());
        assert_eq!(store.raw_file_count(), 1);
    }

    #[test]
    fn test_intensity_floor_is_strict() {
        let store = store();
        let peaks = store.peaks_of(3).unwrap();
        assert!(most_intense_within(peaks, 200.0, Tolerance::PPM(10.0), 300.0).is_none());
        let hit = most_intense_within(peaks, 200.0, Tolerance::PPM(10.0), 299.0).unwrap();
        assert_eq!(hit.intensity(), 300.0);
    }

    #[test]
    fn test_select_spectrum_by_mobility() {
        let store = store();
        let tol = MobilityTolerance(0.05);
        let peaks = select_spectrum(&store, 3, 200.0, Tolerance::PPM(10.0), Some(0.8), Some(&tol)).unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].intensity(), 250.0);

        let peaks = select_spectrum(&store, 3, 200.0, Tolerance::PPM(10.0), Some(2.0), Some(&tol)).unwrap();
        assert_eq!(peaks.len(), 3);

        let peaks = select_spectrum(&store, 3, 200.0, Tolerance::PPM(10.0), None, Some(&tol)).unwrap();
        assert_eq!(peaks.len(), 3);
    }
}
