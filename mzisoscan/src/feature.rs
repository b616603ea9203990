//! The feature table the scanner reads, and a fast id→row lookup over it
use std::collections::HashMap;
use std::fmt::Display;

use identity_hash::BuildIdentityHasher;
use tracing::warn;

/// The identifier of a [`FeatureRow`], unique within a [`FeatureTable`]
pub type RowId = usize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Polarity {
    Positive,
    Negative,
    #[default]
    Unknown,
}

impl Polarity {
    pub fn from_charge(charge: i32) -> Self {
        match charge.signum() {
            1 => Self::Positive,
            -1 => Self::Negative,
            _ => Self::Unknown,
        }
    }

    pub fn sign(&self) -> i32 {
        match self {
            Polarity::Positive => 1,
            Polarity::Negative => -1,
            Polarity::Unknown => 0,
        }
    }
}

impl Display for Polarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A detected chromatographic feature.
///
/// Rows are read-only input; the scanner never mutates them and produces new
/// annotated rows instead.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureRow {
    pub id: RowId,
    /// The m/z of the feature, the monoisotopic candidate when used as a pivot
    pub mz: f64,
    /// The retention time in minutes
    pub rt: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub mobility: Option<f64>,
    /// The representative (apex) intensity of the feature
    pub intensity: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub charge: Option<i32>,
    /// The index of the representative spectrum in the backing raw data
    #[cfg_attr(feature = "serde", serde(default))]
    pub representative_scan: Option<usize>,
    /// The indices of every spectrum this feature was detected in
    #[cfg_attr(feature = "serde", serde(default))]
    pub scans: Vec<usize>,
    /// An existing identity annotation, if any
    #[cfg_attr(feature = "serde", serde(default))]
    pub identity: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub comment: Option<String>,
}

impl FeatureRow {
    pub fn new(id: RowId, mz: f64, rt: f64, intensity: f64) -> Self {
        Self {
            id,
            mz,
            rt,
            intensity,
            ..Default::default()
        }
    }

    pub fn with_mobility(mut self, mobility: f64) -> Self {
        self.mobility = Some(mobility);
        self
    }

    pub fn with_representative_scan(mut self, scan: usize) -> Self {
        self.representative_scan = Some(scan);
        self
    }

    pub fn with_scans(mut self, scans: Vec<usize>) -> Self {
        self.scans = scans;
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn is_identified(&self) -> bool {
        self.identity.as_ref().is_some_and(|s| !s.is_empty())
    }
}

/// An ordered collection of [`FeatureRow`] from a single feature detection run
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureTable {
    pub name: String,
    pub rows: Vec<FeatureRow>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub polarity: Polarity,
    /// The names of the raw data files the features were detected in
    #[cfg_attr(feature = "serde", serde(default))]
    pub raw_files: Vec<String>,
    /// A log of the processing steps applied to this table
    #[cfg_attr(feature = "serde", serde(default))]
    pub applied_methods: Vec<String>,
}

impl FeatureTable {
    pub fn new(name: impl Into<String>, rows: Vec<FeatureRow>) -> Self {
        Self {
            name: name.into(),
            rows,
            ..Default::default()
        }
    }

    pub fn with_raw_files(mut self, raw_files: Vec<String>) -> Self {
        self.raw_files = raw_files;
        self
    }

    pub fn with_polarity(mut self, polarity: Polarity) -> Self {
        self.polarity = polarity;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FeatureRow> {
        self.rows.iter()
    }

    pub fn row_index(&self) -> RowIndex<'_> {
        RowIndex::new(&self.rows)
    }

    /// The rows sorted by ascending m/z. Rows of equal m/z keep their table order.
    pub fn sorted_by_mz(&self) -> Vec<&FeatureRow> {
        let mut rows: Vec<&FeatureRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        rows
    }
}

/// A fast id→row lookup over a borrowed row slice, scoped to a single scan run.
#[derive(Debug, Clone)]
pub struct RowIndex<'a> {
    rows: &'a [FeatureRow],
    positions: HashMap<RowId, usize, BuildIdentityHasher<RowId>>,
}

impl<'a> RowIndex<'a> {
    pub fn new(rows: &'a [FeatureRow]) -> Self {
        let mut positions: HashMap<RowId, usize, BuildIdentityHasher<RowId>> =
            HashMap::with_capacity_and_hasher(rows.len(), BuildIdentityHasher::default());
        for (i, row) in rows.iter().enumerate() {
            if positions.contains_key(&row.id) {
                warn!("Duplicate feature row id {}, keeping the first occurrence", row.id);
                continue;
            }
            positions.insert(row.id, i);
        }
        Self { rows, positions }
    }

    #[inline]
    pub fn get(&self, id: RowId) -> Option<&'a FeatureRow> {
        self.positions.get(&id).map(|i| &self.rows[*i])
    }

    /// The position of the row in the table it was built from
    #[inline]
    pub fn position_of(&self, id: RowId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.positions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
