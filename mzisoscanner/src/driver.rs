use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use mzisoscan::{scan_feature_table, ScanError, ScanOutcome, ScanParameters, ScanTask, SpectrumSource};

use crate::args::{
    non_negative_float, ArgCarbonRange, ArgMobilityTolerance, ArgMzTolerance, ArgScanMode,
    ArgTimeTolerance,
};
use crate::progress::ProgressWatcher;
use crate::read::{read_feature_table, read_spectra};
use crate::write::write_output;

pub const CONFIG_FILE_NAME: &str = "mzisoscanner.toml";
pub const ENV_PREFIX: &str = "MZISOSCANNER_";

#[derive(Debug, Error)]
pub enum MZIsoScannerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read or write a feature table: {0}")]
    JSONError(
        #[source]
        #[from]
        serde_json::Error,
    ),
    #[error("Failed to assemble the configuration: {0}")]
    ConfigurationError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("Failed to build the thread pool: {0}")]
    ThreadPoolError(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
    #[error("The scan failed: {0}")]
    ScanError(
        #[source]
        #[from]
        ScanError,
    ),
    #[error("Failed to configure logging: {0}")]
    LogSetupError(String),
}

/// Scan a feature table for characteristic isotope patterns.
///
/// Read a feature table, find the rows that form the isotope pattern of the requested
/// element, and write out a new table holding only those rows with their annotations.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
pub struct MZIsoScanner {
    /// The path to read the feature table JSON from, optionally gzip-compressed
    #[arg()]
    pub input_file: PathBuf,

    /// The path to write the annotated feature table to, or if '-' is passed, write to STDOUT.
    ///
    /// Paths ending in `.gz` are gzip-compressed.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The raw data file (mzML or MGF) the features were detected in.
    ///
    /// Required by the enhanced mode and by accurate averaging.
    #[arg(short = 's', long = "spectra-file")]
    pub spectra_file: Option<PathBuf>,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzisoscanner.toml` in the working directory.
    /// Environment variables prefixed with `MZISOSCANNER_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
        allow_negative_numbers=true,
    )]
    pub threads: i32,

    /// How to find the isotopes of a pattern
    #[arg(short = 'm', long = "mode", default_value = "grouped")]
    pub mode: ArgScanMode,

    /// The element composition to scan for, or a comma-separated list of them
    #[arg(short = 'e', long = "element", default_value = "Cl2")]
    pub element: String,

    /// The charge of the pattern. Its sign selects the polarity.
    #[arg(
        short = 'z',
        long = "charge",
        default_value_t = 1,
        allow_negative_numbers = true
    )]
    pub charge: i32,

    /// The m/z tolerance, e.g. `10ppm` or `0.005da`
    #[arg(long = "mz-tolerance", default_value = "10ppm")]
    pub mz_tolerance: ArgMzTolerance,

    /// The retention time tolerance, e.g. `0.05` minutes, `3s` or `5%`
    #[arg(long = "rt-tolerance", default_value = "0.05min")]
    pub rt_tolerance: ArgTimeTolerance,

    /// Do not require isotope rows to co-elute with their pivot
    #[arg(long = "no-rt-check")]
    #[serde(default)]
    pub no_rt_check: bool,

    /// The ion mobility tolerance. If omitted, mobility is not compared.
    #[arg(long = "mobility-tolerance")]
    pub mobility_tolerance: Option<ArgMobilityTolerance>,

    /// The minimum intensity of a pivot or isotope row or peak
    #[arg(long = "min-height", default_value_t = 0.0, value_parser = non_negative_float)]
    pub min_height: f64,

    /// The minimum relative intensity of a theoretical isotope to be kept in a pattern
    #[arg(long = "min-pattern-intensity", default_value_t = 0.01)]
    pub min_pattern_intensity: f64,

    /// Theoretical isotopes closer than this m/z width are merged
    #[arg(long = "merge-width", default_value_t = 0.0005, value_parser = non_negative_float)]
    pub merge_width: f64,

    /// The minimum rating of every isotope of a pattern in the grouped mode
    #[arg(short = 'r', long = "min-rating", default_value_t = 0.9)]
    pub min_rating: f64,

    /// Rate isotopes by mass accuracy only, ignoring intensity ratios
    #[arg(long = "no-intensity-check")]
    #[serde(default)]
    pub no_intensity_check: bool,

    /// Re-rate patterns on the intensities averaged over every scan of the pivot feature
    #[arg(short = 'a', long = "accurate-average")]
    #[serde(default)]
    pub accurate_average: bool,

    /// Also scan for the element combined with each carbon count in (min)-(max)
    #[arg(short = 'c', long = "auto-carbon", value_name = "MIN-MAX")]
    pub auto_carbon: Option<ArgCarbonRange>,

    /// The minimum number of isotopes of an auto-carbon pattern
    #[arg(long = "min-pattern-size", default_value_t = 2)]
    pub min_pattern_size: usize,

    /// The minimum pattern similarity score in the enhanced mode
    #[arg(long = "min-pattern-score", default_value_t = 0.9)]
    pub min_isotope_pattern_score: f64,

    /// Keep every match instead of only the best candidate for each monoisotopic peak
    #[arg(long = "keep-overlapping")]
    #[serde(default)]
    pub keep_overlapping: bool,

    /// Keep a match for every composition of a pivot instead of only the best one
    #[arg(long = "all-compositions")]
    #[serde(default)]
    pub all_compositions: bool,

    /// Read each feature's isotopes from the mobility scan nearest its mobility
    #[arg(long = "resolve-by-mobility")]
    #[serde(default)]
    pub resolve_by_mobility: bool,

    /// Accept patterns with absent isotopes in the enhanced mode
    #[arg(long = "allow-missing-isotopes")]
    #[serde(default)]
    pub allow_missing_isotopes: bool,

    /// The suffix of the output table's name. `auto` describes the run.
    #[arg(long = "suffix", default_value = "auto")]
    pub suffix: String,
}

impl MZIsoScanner {
    /// Layer the configuration file(s) and environment over these arguments
    pub fn configure(self) -> Result<Self, MZIsoScannerError> {
        let mut config = Figment::from(Serialized::defaults(&self)).merge(Toml::file(CONFIG_FILE_NAME));
        if let Some(path) = self.config_file.as_ref() {
            config = config.merge(Toml::file_exact(path));
        }
        config = config.merge(Env::prefixed(ENV_PREFIX));
        Ok(config.extract()?)
    }

    pub fn scan_parameters(&self) -> ScanParameters {
        ScanParameters::new(self.element.clone(), self.charge)
            .with_mode(self.mode.into())
            .with_mz_tolerance(self.mz_tolerance.into())
            .with_rt_tolerance((!self.no_rt_check).then_some(self.rt_tolerance.into()))
            .with_mobility_tolerance(self.mobility_tolerance.map(Into::into))
            .with_min_height(self.min_height)
            .with_min_pattern_intensity(self.min_pattern_intensity)
            .with_merge_width(self.merge_width)
            .with_min_rating(self.min_rating)
            .with_check_intensity(!self.no_intensity_check)
            .with_accurate_average(self.accurate_average)
            .with_auto_carbon(
                self.auto_carbon
                    .map(|r| r.with_min_pattern_size(self.min_pattern_size)),
            )
            .with_min_isotope_pattern_score(self.min_isotope_pattern_score)
            .with_only_monoisotopic(!self.keep_overlapping)
            .with_best_composition(!self.all_compositions)
            .with_resolve_by_mobility(self.resolve_by_mobility)
            .with_allow_missing_isotopes(self.allow_missing_isotopes)
            .with_suffix(self.suffix.clone())
    }

    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZIsoScannerError> {
        // Zero lets rayon pick the number of available cores
        let num_threads = self.threads.max(0) as usize;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        debug!("Using {} threads", pool.current_num_threads());
        Ok(pool)
    }

    pub fn main(&self) -> Result<(), MZIsoScannerError> {
        info!(
            "mzisoscanner v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file.display());
        info!("Output: {}", self.output_file.display());
        let started = Instant::now();

        let params = self.scan_parameters();
        debug!("{}", params.describe());
        let table = read_feature_table(&self.input_file)?;
        let spectra = match self.spectra_file.as_ref() {
            Some(path) => Some(read_spectra(path)?),
            None => None,
        };
        if self.resolve_by_mobility && !spectra.as_ref().is_some_and(|s| s.has_mobility_scans()) {
            warn!("Resolving by mobility was requested, but there are no ion mobility frames to resolve; frame spectra will be used");
        }

        let task = Arc::new(ScanTask::new());
        let watcher = ProgressWatcher::spawn(task.clone(), Duration::from_secs(5));
        let pool = self.create_threadpool()?;
        let result = pool.install(|| {
            scan_feature_table(
                &table,
                spectra.as_ref().map(|s| s as &dyn SpectrumSource),
                params,
                &task,
            )
        });
        watcher.finish();
        let outcome = result?;

        let summary = outcome.summary();
        info!(
            "Rows scanned: {} | Already identified: {} | Below minimum height: {}",
            summary.rows_scanned, summary.already_identified, summary.below_min_height
        );
        info!(
            "Without partners: {} | Incomplete patterns: {} | Low ratings: {} | Undefined averages: {}",
            summary.no_partners,
            summary.incomplete_patterns,
            summary.low_ratings,
            summary.undefined_averages
        );
        match &outcome {
            ScanOutcome::Found(output, _) => {
                info!("Found isotope patterns spanning {} rows", output.len())
            }
            ScanOutcome::NoPatternFound(..) => info!("No isotope pattern found"),
        }
        write_output(outcome.table(), &self.output_file)?;
        info!("Elapsed Time: {:0.3?}", started.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use mzisoscan::tolerance::TimeTolerance;
    use mzisoscan::ScanMode;

    use super::*;

    #[test]
    fn test_arguments_to_parameters() {
        let args = MZIsoScanner::parse_from([
            "mzisoscanner",
            "features.json",
            "-e",
            "Cl2,Br",
            "-z",
            "-2",
            "--mode",
            "enhanced",
            "--rt-tolerance",
            "6s",
            "--auto-carbon",
            "0-4",
            "--keep-overlapping",
        ]);
        let params = args.scan_parameters();
        assert_eq!(params.element, "Cl2,Br");
        assert_eq!(params.charge, -2);
        assert_eq!(params.mode, ScanMode::Enhanced);
        assert_eq!(params.charges(), vec![-1, -2]);
        assert!(matches!(params.rt_tolerance, Some(TimeTolerance::Absolute(t)) if (t - 0.1).abs() < 1e-12));
        let ac = params.auto_carbon.unwrap();
        assert_eq!((ac.min_carbon, ac.max_carbon, ac.min_pattern_size), (0, 4, 2));
        assert!(!params.only_monoisotopic);
        assert!(params.best_composition);
        assert!(params.check_intensity);
        assert_eq!(params.suffix, "auto");
    }

    #[test]
    fn test_no_rt_check() {
        let args = MZIsoScanner::parse_from(["mzisoscanner", "features.json", "--no-rt-check"]);
        assert!(args.scan_parameters().rt_tolerance.is_none());
    }

    #[test]
    fn test_defaults_survive_serialization() {
        let args = MZIsoScanner::parse_from(["mzisoscanner", "features.json"]);
        let dup: MZIsoScanner = Figment::from(Serialized::defaults(&args)).extract().unwrap();
        assert_eq!(dup.element, args.element);
        assert_eq!(dup.mz_tolerance.to_string(), "10ppm");
        assert_eq!(dup.rt_tolerance.to_string(), "0.05min");
        assert!(dup.auto_carbon.is_none());
        assert_eq!(dup.threads, -1);
    }
}
