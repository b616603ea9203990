use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use flate2::bufread::GzDecoder;
use tracing::{debug, info, trace, warn};

use mzdata::prelude::*;
use mzdata::spectrum::SignalContinuity;
use mzdata::MZReader;

use mzpeaks::{CentroidPeak, MZPeakSetType};

use mzisoscan::spectra::{MobilityScan, StoredSpectrum};
use mzisoscan::{FeatureTable, SpectrumStore};

use crate::driver::MZIsoScannerError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Open `path` for reading, transparently decompressing gzip streams
pub(crate) fn open_maybe_compressed(path: &Path) -> io::Result<Box<dyn Read>> {
    let mut handle = io::BufReader::new(fs::File::open(path)?);
    let compressed = handle.fill_buf()?.starts_with(&GZIP_MAGIC);
    debug!("Opened {} (compressed? {compressed})", path.display());
    if compressed {
        Ok(Box::new(GzDecoder::new(handle)))
    } else {
        Ok(Box::new(handle))
    }
}

/// Read a feature table serialized as JSON, optionally gzip-compressed
pub fn read_feature_table(path: &Path) -> Result<FeatureTable, MZIsoScannerError> {
    let reader = io::BufReader::new(open_maybe_compressed(path)?);
    let table: FeatureTable = serde_json::from_reader(reader)?;
    info!(
        "Read {} rows of {:?} from {}",
        table.len(),
        table.name,
        path.display()
    );
    Ok(table)
}

/// Scans of one frame start within this many minutes of each other
const FRAME_TIME_WIDTH: f64 = 1e-6;

/// A centroided MS1 scan, carrying its ion mobility when it is one slice of a frame
#[derive(Debug, Clone)]
pub(crate) struct CentroidedScan {
    pub index: usize,
    pub time: f64,
    pub mobility: Option<f64>,
    pub peaks: MZPeakSetType<CentroidPeak>,
}

/// Merge the slices of a frame into one spectrum keyed by the index of its first slice
fn close_frame(index: usize, time: f64, slices: Vec<MobilityScan>) -> StoredSpectrum {
    let peaks: MZPeakSetType<CentroidPeak> = slices
        .iter()
        .flat_map(|s| s.peaks.iter().cloned())
        .collect();
    trace!("Frame {index} at {time:0.3} has {} mobility scans", slices.len());
    StoredSpectrum {
        index,
        time,
        peaks,
        mobility_scans: slices,
    }
}

/// Insert `scans` into `store`, collecting consecutive scans that carry an ion mobility
/// and share a start time into a single frame with one [`MobilityScan`] per slice.
pub(crate) fn assemble_frames(scans: impl IntoIterator<Item = CentroidedScan>, store: &mut SpectrumStore) {
    let mut frame: Option<(usize, f64, Vec<MobilityScan>)> = None;
    for scan in scans {
        let Some(mobility) = scan.mobility else {
            if let Some((index, time, slices)) = frame.take() {
                store.insert(close_frame(index, time, slices));
            }
            store.insert(StoredSpectrum {
                index: scan.index,
                time: scan.time,
                peaks: scan.peaks,
                mobility_scans: Vec::new(),
            });
            continue;
        };
        let continues = frame
            .as_ref()
            .is_some_and(|(_, time, _)| (time - scan.time).abs() <= FRAME_TIME_WIDTH);
        if !continues {
            if let Some((index, time, slices)) = frame.take() {
                store.insert(close_frame(index, time, slices));
            }
        }
        let (_, _, slices) = frame.get_or_insert_with(|| (scan.index, scan.time, Vec::new()));
        slices.push(MobilityScan {
            mobility,
            peaks: scan.peaks,
        });
    }
    if let Some((index, time, slices)) = frame.take() {
        store.insert(close_frame(index, time, slices));
    }
}

/// Load the MS1 spectra of a raw data file into memory, centroiding profile spectra on the way.
///
/// Consecutive MS1 scans with a point ion mobility and a shared start time are frame slices.
/// They are stored as one spectrum, keyed by the index of the first slice, whose mobility
/// scans are the slices.
pub fn read_spectra(path: &Path) -> Result<SpectrumStore, MZIsoScannerError> {
    let reader = MZReader::open_path(path)?;
    let raw_file = path
        .file_name()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let mut store = SpectrumStore::new(vec![raw_file]);
    let mut skipped = 0usize;
    let scans = reader
        .into_iter()
        .filter(|s| s.ms_level() == 1)
        .filter_map(|mut scan| {
            let picked = match scan.signal_continuity() {
                SignalContinuity::Profile => scan.pick_peaks(1.0).is_ok(),
                _ => scan.try_build_centroids().is_ok(),
            };
            match (picked, scan.peaks.take()) {
                (true, Some(peaks)) => Some(CentroidedScan {
                    index: scan.index(),
                    time: scan.start_time(),
                    mobility: scan.ion_mobility(),
                    peaks,
                }),
                _ => {
                    warn!("Failed to centroid {}, skipping it", scan.id());
                    skipped += 1;
                    None
                }
            }
        });
    assemble_frames(scans, &mut store);
    info!(
        "Read {} MS1 spectra from {} ({skipped} skipped, ion mobility frames? {})",
        store.len(),
        path.display(),
        store.has_mobility_scans()
    );
    Ok(store)
}

#[cfg(test)]
mod test {
    use super::*;

    fn scan(index: usize, time: f64, mobility: Option<f64>, mz: f64) -> CentroidedScan {
        CentroidedScan {
            index,
            time,
            mobility,
            peaks: vec![CentroidPeak::new(mz, 100.0, 0)].into_iter().collect(),
        }
    }

    #[test]
    fn test_assemble_frames() {
        let mut store = SpectrumStore::new(vec!["run.mzML".to_string()]);
        assemble_frames(
            vec![
                scan(0, 1.0, None, 200.0),
                scan(1, 1.1, Some(0.8), 300.0),
                scan(2, 1.1, Some(0.9), 301.0),
                scan(3, 1.1, Some(1.0), 302.0),
                scan(4, 1.2, Some(0.8), 400.0),
                scan(5, 1.3, None, 500.0),
            ],
            &mut store,
        );
        assert_eq!(store.len(), 4);
        assert!(store.has_mobility_scans());
        assert!(store.get(0).unwrap().mobility_scans.is_empty());

        let frame = store.get(1).unwrap();
        assert_eq!(frame.mobility_scans.len(), 3);
        assert_eq!(frame.peaks.len(), 3);
        let mobilities: Vec<_> = frame.mobility_scans.iter().map(|m| m.mobility).collect();
        assert_eq!(mobilities, vec![0.8, 0.9, 1.0]);
        assert!(store.get(2).is_none());

        assert_eq!(store.get(4).unwrap().mobility_scans.len(), 1);
        assert!(store.get(5).unwrap().mobility_scans.is_empty());
    }

    #[test]
    fn test_no_frames_without_mobility() {
        let mut store = SpectrumStore::new(Vec::new());
        assemble_frames(
            vec![scan(0, 1.0, None, 200.0), scan(1, 1.0, None, 201.0)],
            &mut store,
        );
        assert_eq!(store.len(), 2);
        assert!(!store.has_mobility_scans());
    }
}
