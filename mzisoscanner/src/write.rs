use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tracing::debug;

use crate::driver::MZIsoScannerError;

fn write_json<T: Serialize, W: Write>(value: &T, mut handle: W) -> Result<W, MZIsoScannerError> {
    serde_json::to_writer_pretty(&mut handle, value)?;
    handle.write_all(b"\n")?;
    Ok(handle)
}

/// Write `value` as JSON to `path`, or to STDOUT if `path` is `-`.
///
/// Paths ending in `.gz` are gzip-compressed.
pub fn write_output<T: Serialize>(value: &T, path: &Path) -> Result<(), MZIsoScannerError> {
    if path == Path::new("-") {
        let mut handle = write_json(value, io::stdout().lock())?;
        handle.flush()?;
        return Ok(());
    }
    let handle = io::BufWriter::new(fs::File::create(path)?);
    let compressed = path.extension().is_some_and(|ext| ext == "gz");
    debug!("Writing to {} (compressed? {compressed})", path.display());
    if compressed {
        let encoder = write_json(value, GzEncoder::new(handle, Compression::best()))?;
        encoder.finish()?.flush()?;
    } else {
        write_json(value, handle)?.flush()?;
    }
    Ok(())
}
