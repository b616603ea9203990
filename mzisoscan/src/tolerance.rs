//! Tolerance windows for m/z, retention time and ion mobility matching
use std::fmt::Display;
use std::num::ParseFloatError;
use std::str::FromStr;

use mzpeaks::Tolerance;
use thiserror::Error;

/// A symmetric acceptance window around a reference value.
///
/// Both [`ToleranceWindow::within`] and [`ToleranceWindow::window_width`] are derived
/// from the same width so that a value passes the test iff it lies inside the window.
pub trait ToleranceWindow {
    /// The one-sided width of the window centered on `reference`
    fn window_width(&self, reference: f64) -> f64;

    /// Test whether `value` lies within the window centered on `reference`
    #[inline]
    fn within(&self, value: f64, reference: f64) -> bool {
        (value - reference).abs() <= self.window_width(reference)
    }

    /// The closed interval accepted around `reference`
    #[inline]
    fn bounds_of(&self, reference: f64) -> (f64, f64) {
        let w = self.window_width(reference);
        (reference - w, reference + w)
    }
}

impl ToleranceWindow for Tolerance {
    #[inline]
    fn window_width(&self, reference: f64) -> f64 {
        match self {
            Tolerance::PPM(ppm) => reference.abs() * ppm * 1e-6,
            Tolerance::Da(da) => *da,
        }
    }
}

/// Signed mass error of `observed` relative to `expected` in parts-per-million
#[inline]
pub fn ppm_error(observed: f64, expected: f64) -> f64 {
    (observed - expected) / expected * 1e6
}

/// A retention time tolerance, either in absolute time units (minutes) or
/// relative to the reference time.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeTolerance {
    Absolute(f64),
    /// A fraction of the reference time, e.g. `0.05` for 5 %
    Relative(f64),
}

impl Default for TimeTolerance {
    fn default() -> Self {
        Self::Absolute(0.05)
    }
}

impl ToleranceWindow for TimeTolerance {
    #[inline]
    fn window_width(&self, reference: f64) -> f64 {
        match self {
            TimeTolerance::Absolute(w) => *w,
            TimeTolerance::Relative(f) => reference.abs() * f,
        }
    }
}

impl Display for TimeTolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeTolerance::Absolute(w) => write!(f, "{w}min"),
            TimeTolerance::Relative(r) => write!(f, "{}%", r * 100.0),
        }
    }
}

/// An absolute ion mobility tolerance in the unit of the feature table
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MobilityTolerance(pub f64);

impl ToleranceWindow for MobilityTolerance {
    #[inline]
    fn window_width(&self, _reference: f64) -> f64 {
        self.0
    }
}

impl Display for MobilityTolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Two optional mobility values match when either is unknown, otherwise
/// when they fall within `tolerance` of each other.
pub fn mobility_matches(
    tolerance: Option<&MobilityTolerance>,
    a: Option<f64>,
    b: Option<f64>,
) -> bool {
    match (tolerance, a, b) {
        (Some(tol), Some(a), Some(b)) => tol.within(a, b),
        _ => true,
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToleranceParseError {
    #[error("Failed to parse tolerance value {0:?}: {1}")]
    MalformedValue(String, ParseFloatError),
    #[error("Tolerance {0:?} has an unknown unit, expected one of {1}")]
    UnknownUnit(String, &'static str),
    #[error("Tolerance {0:?} must be a finite, non-negative number")]
    OutOfRange(String),
}

fn split_unit(s: &str) -> (&str, String) {
    let s = s.trim();
    let idx = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e'))
        .unwrap_or(s.len());
    let (value, unit) = s.split_at(idx);
    (value.trim(), unit.trim().to_lowercase())
}

fn parse_value(whole: &str, value: &str) -> Result<f64, ToleranceParseError> {
    let v: f64 = value
        .parse()
        .map_err(|e| ToleranceParseError::MalformedValue(whole.to_string(), e))?;
    if !v.is_finite() || v < 0.0 {
        return Err(ToleranceParseError::OutOfRange(whole.to_string()));
    }
    Ok(v)
}

/// Parse an m/z tolerance like `10ppm` or `0.005da`. A bare number is read as ppm.
pub fn parse_mz_tolerance(s: &str) -> Result<Tolerance, ToleranceParseError> {
    let (value, unit) = split_unit(s);
    let v = parse_value(s, value)?;
    match unit.as_str() {
        "" | "ppm" => Ok(Tolerance::PPM(v)),
        "da" | "th" | "mz" => Ok(Tolerance::Da(v)),
        _ => Err(ToleranceParseError::UnknownUnit(s.to_string(), "ppm, da")),
    }
}

impl FromStr for TimeTolerance {
    type Err = ToleranceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_unit(s);
        let v = parse_value(s, value)?;
        match unit.as_str() {
            "" | "min" => Ok(Self::Absolute(v)),
            "s" | "sec" => Ok(Self::Absolute(v / 60.0)),
            "%" => Ok(Self::Relative(v / 100.0)),
            _ => Err(ToleranceParseError::UnknownUnit(s.to_string(), "min, s, %")),
        }
    }
}

impl FromStr for MobilityTolerance {
    type Err = ToleranceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, _) = split_unit(s);
        Ok(Self(parse_value(s, value)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ppm_window() {
        let tol = Tolerance::PPM(50.0);
        assert!((tol.window_width(200.0) - 0.01).abs() < 1e-12);
        assert!(tol.within(200.0099, 200.0));
        assert!(!tol.within(200.0101, 200.0));
    }

    #[test]
    fn test_time_window() {
        let tol = TimeTolerance::Absolute(0.05);
        assert!(tol.within(10.04, 10.0));
        assert!(!tol.within(10.06, 10.0));
        let tol = TimeTolerance::Relative(0.01);
        assert!(tol.within(10.09, 10.0));
        assert!(!tol.within(10.2, 10.0));
    }

    #[test]
    fn test_mobility_unknown_passes() {
        let tol = MobilityTolerance(0.01);
        assert!(mobility_matches(Some(&tol), None, Some(0.9)));
        assert!(mobility_matches(None, Some(0.5), Some(0.9)));
        assert!(!mobility_matches(Some(&tol), Some(0.5), Some(0.9)));
    }

    #[test]
    fn test_parse() {
        assert!(matches!(parse_mz_tolerance("10ppm").unwrap(), Tolerance::PPM(v) if v == 10.0));
        assert!(matches!(parse_mz_tolerance("0.005 Da").unwrap(), Tolerance::Da(v) if v == 0.005));
        assert!(matches!(parse_mz_tolerance("7").unwrap(), Tolerance::PPM(v) if v == 7.0));
        assert!(parse_mz_tolerance("5 furlongs").is_err());
        assert!(parse_mz_tolerance("-5ppm").is_err());
        assert_eq!(
            "0.1min".parse::<TimeTolerance>().unwrap(),
            TimeTolerance::Absolute(0.1)
        );
        assert_eq!(
            "5%".parse::<TimeTolerance>().unwrap(),
            TimeTolerance::Relative(0.05)
        );
        assert_eq!(
            "0.02".parse::<MobilityTolerance>().unwrap(),
            MobilityTolerance(0.02)
        );
    }
}
