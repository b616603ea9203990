use std::fmt::Display;
use std::num::ParseIntError;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mzpeaks::Tolerance;

use mzisoscan::api::AutoCarbonParameters;
use mzisoscan::tolerance::{parse_mz_tolerance, MobilityTolerance, TimeTolerance, ToleranceParseError};
use mzisoscan::ScanMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgScanMode {
    #[default]
    /// Match isotopes against other rows of the feature table
    Grouped,
    /// Read isotopes from each feature's representative spectrum
    Enhanced,
}

impl From<ArgScanMode> for ScanMode {
    fn from(value: ArgScanMode) -> Self {
        match value {
            ArgScanMode::Grouped => ScanMode::Grouped,
            ArgScanMode::Enhanced => ScanMode::Enhanced,
        }
    }
}

impl Display for ArgScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Declares a newtype over a tolerance that round-trips through its string form, so the
/// same text is accepted on the command line, in TOML files and in environment variables.
macro_rules! string_arg {
    ($name:ident, $inner:ty, $parse:expr, $show:expr) => {
        #[derive(Debug, Clone, Copy, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(pub $inner);

        impl FromStr for $name {
            type Err = ToleranceParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let parse: fn(&str) -> Result<$inner, ToleranceParseError> = $parse;
                parse(s).map(Self)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let show: fn(&$inner, &mut std::fmt::Formatter<'_>) -> std::fmt::Result = $show;
                show(&self.0, f)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ToleranceParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_string()
            }
        }

        impl From<$name> for $inner {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

string_arg!(
    ArgMzTolerance,
    Tolerance,
    parse_mz_tolerance,
    |tol, f| match tol {
        Tolerance::PPM(v) => write!(f, "{v}ppm"),
        Tolerance::Da(v) => write!(f, "{v}da"),
    }
);

string_arg!(
    ArgTimeTolerance,
    TimeTolerance,
    TimeTolerance::from_str,
    |tol, f| write!(f, "{tol}")
);

string_arg!(
    ArgMobilityTolerance,
    MobilityTolerance,
    MobilityTolerance::from_str,
    |tol, f| write!(f, "{tol}")
);

#[derive(Debug, Error, PartialEq)]
pub enum CarbonRangeParseError {
    #[error("Failed to parse carbon count in {0:?}: {1}")]
    MalformedCount(String, ParseIntError),
    #[error("Carbon range {0:?} must be written as (min)-(max)")]
    MissingBound(String),
}

/// An inclusive range of carbon counts to combine with the scanned element, denoted (min)-(max)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArgCarbonRange(pub i32, pub i32);

impl ArgCarbonRange {
    pub fn with_min_pattern_size(&self, min_pattern_size: usize) -> AutoCarbonParameters {
        AutoCarbonParameters::new(self.0, self.1, min_pattern_size)
    }
}

impl FromStr for ArgCarbonRange {
    type Err = CarbonRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lo, hi) = s
            .split_once('-')
            .ok_or_else(|| CarbonRangeParseError::MissingBound(s.to_string()))?;
        let parse = |t: &str| {
            t.trim()
                .parse::<i32>()
                .map_err(|e| CarbonRangeParseError::MalformedCount(s.to_string(), e))
        };
        Ok(Self(parse(lo)?, parse(hi)?))
    }
}

impl Display for ArgCarbonRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.0, self.1)
    }
}

impl TryFrom<String> for ArgCarbonRange {
    type Error = CarbonRangeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArgCarbonRange> for String {
    fn from(value: ArgCarbonRange) -> Self {
        value.to_string()
    }
}

pub(crate) fn non_negative_float(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value < 0.0 || !value.is_finite() {
        Err(format!("`{s}` is not a finite, non-negative number"))
    } else {
        Ok(value)
    }
}
