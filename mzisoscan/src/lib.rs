pub mod tolerance;
pub mod feature;
pub mod isotopic_model;
pub mod spectra;
pub mod grouping;
pub mod scorer;
pub mod resolver;
pub mod assembler;
pub mod task;
pub mod api;

pub use crate::api::{
    scan_feature_table, IsotopePeakScanner, ScanError, ScanMode, ScanOutcome, ScanParameters,
    ScanSummary,
};
pub use crate::assembler::{AnnotatedFeatureTable, AnnotatedRow};
pub use crate::feature::{FeatureRow, FeatureTable, Polarity, RowId, RowIndex};
pub use crate::isotopic_model::{PatternError, TheoreticalPattern};
pub use crate::spectra::{SpectrumSource, SpectrumStore};
pub use crate::task::{ScanTask, TaskStatus};
