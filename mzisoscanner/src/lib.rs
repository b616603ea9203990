mod args;
mod driver;
mod progress;
mod read;
mod write;

pub use args::*;
pub use driver::{MZIsoScanner, MZIsoScannerError, CONFIG_FILE_NAME, ENV_PREFIX};
pub use progress::ProgressWatcher;
pub use read::{read_feature_table, read_spectra};
pub use write::write_output;
