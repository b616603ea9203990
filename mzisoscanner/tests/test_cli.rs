use std::fs;
use std::io;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

use mzisoscan::AnnotatedFeatureTable;
use flate2::read::GzDecoder;

const FEATURES: &str = "tests/data/chlorine_features.json";

fn tmp_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name)
}

fn read_output(path: &PathBuf) -> io::Result<AnnotatedFeatureTable> {
    let reader = io::BufReader::new(fs::File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[test]
fn test_scan_to_file() -> io::Result<()> {
    let out = tmp_path("chlorine_scan.json");
    Command::cargo_bin("mzisoscanner")
        .unwrap()
        .args([FEATURES, "--mz-tolerance", "50ppm", "-t", "2", "-o"])
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("Found isotope patterns spanning 6 rows"));

    let table = read_output(&out)?;
    let ids: Vec<_> = table.iter().map(|r| r.row.id).collect();
    assert_eq!(ids, vec![2, 3, 4, 6, 7, 8]);
    assert_eq!(table.parents().count(), 2);
    assert!(table.name.starts_with("chlorine_features _-Pat=Cl2-RT=true-INT=true"));
    assert_eq!(table.applied_methods.len(), 2);
    assert_eq!(table.raw_files, vec!["chlorine_run.mzML".to_string()]);
    fs::remove_file(&out)?;
    Ok(())
}

#[test]
fn test_scan_to_stdout_and_gzip() -> io::Result<()> {
    let assert = Command::cargo_bin("mzisoscanner")
        .unwrap()
        .args([FEATURES, "--mz-tolerance", "50ppm", "--suffix", "piped"])
        .assert()
        .success();
    let table: AnnotatedFeatureTable = serde_json::from_slice(&assert.get_output().stdout)?;
    assert_eq!(table.name, "chlorine_features piped");
    assert_eq!(table.len(), 6);

    let out = tmp_path("chlorine_scan.json.gz");
    Command::cargo_bin("mzisoscanner")
        .unwrap()
        .args([FEATURES, "--mz-tolerance", "50ppm", "-o"])
        .arg(&out)
        .assert()
        .success();
    let reader = GzDecoder::new(io::BufReader::new(fs::File::open(&out)?));
    let reread: AnnotatedFeatureTable = serde_json::from_reader(reader)?;
    assert_eq!(reread.rows, table.rows);
    fs::remove_file(&out)?;
    Ok(())
}

#[test]
fn test_no_pattern_found_still_writes() -> io::Result<()> {
    let out = tmp_path("no_pattern.json");
    Command::cargo_bin("mzisoscanner")
        .unwrap()
        .args([FEATURES, "--mz-tolerance", "1ppm", "-o"])
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("No isotope pattern found"));
    let table = read_output(&out)?;
    assert!(table.is_empty());
    fs::remove_file(&out)?;
    Ok(())
}

#[test]
fn test_fatal_errors() {
    Command::cargo_bin("mzisoscanner")
        .unwrap()
        .args([FEATURES, "-z", "0", "-o", "-"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Charge must be non-zero"));

    Command::cargo_bin("mzisoscanner")
        .unwrap()
        .args([FEATURES, "--mode", "enhanced"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("has no spectra"));

    Command::cargo_bin("mzisoscanner")
        .unwrap()
        .args(["tests/data/does_not_exist.json"])
        .assert()
        .failure();

    Command::cargo_bin("mzisoscanner")
        .unwrap()
        .args([FEATURES, "--mz-tolerance", "ten"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("mz-tolerance"));
}

#[test]
fn test_environment_overrides() -> io::Result<()> {
    let out = tmp_path("env_override.json");
    Command::cargo_bin("mzisoscanner")
        .unwrap()
        .env("MZISOSCANNER_MZ_TOLERANCE", "50ppm")
        .env("MZISOSCANNER_SUFFIX", "from_env")
        .args([FEATURES, "-o"])
        .arg(&out)
        .assert()
        .success();
    let table = read_output(&out)?;
    assert_eq!(table.name, "chlorine_features from_env");
    assert_eq!(table.len(), 6);
    fs::remove_file(&out)?;
    Ok(())
}
