//! Integration tests for selection documents loaded from disk

use hwcprobe::counters::simulated::SimulatedBackend;
use hwcprobe::counters::CounterBackend;
use hwcprobe::selection::{SelectionError, SelectionIndex};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_selection(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_toml_selection_from_file() {
    let backend = SimulatedBackend::new();
    let file = write_selection(
        ".toml",
        r#"
counters = ["TOT_CYC", "TOT_INS"]
functions = ["f", "g"]
"#,
    );

    let index = SelectionIndex::from_file(file.path(), &backend).unwrap();
    assert!(index.has("f"));
    assert!(!index.has("h"));
    assert_eq!(
        index.counters_for("f").unwrap(),
        index.counters_for("g").unwrap()
    );
}

#[test]
fn test_json_selection_from_file() {
    let backend = SimulatedBackend::new();
    let file = write_selection(".json", r#"{"counters": ["PAPI_BR_MSP"], "functions": ["solve"]}"#);

    let index = SelectionIndex::from_file(file.path(), &backend).unwrap();
    assert_eq!(
        index.counters_for("solve").unwrap(),
        &[backend.resolve("BR_MSP").unwrap()]
    );
}

#[test]
fn test_invalid_counter_names_the_counter() {
    let backend = SimulatedBackend::new();
    let file = write_selection(
        ".toml",
        r#"
counters = ["TOT_CYC", "TOT_BOGUS"]
functions = ["f"]
"#,
    );

    let err = SelectionIndex::from_file(file.path(), &backend).unwrap_err();
    assert!(err.to_string().contains("TOT_BOGUS"));
}

#[test]
fn test_counter_missing_from_backend_rejected() {
    // A backend that only knows cycles must reject an instructions request
    let backend = SimulatedBackend::with_counters(&[hwcprobe::counters::presets::TOT_CYC]);
    let file = write_selection(".json", r#"{"counters": ["TOT_INS"], "functions": ["f"]}"#);
    assert!(matches!(
        SelectionIndex::from_file(file.path(), &backend),
        Err(SelectionError::UnknownCounter(_))
    ));
}

#[test]
fn test_malformed_toml_rejected() {
    let backend = SimulatedBackend::new();
    let file = write_selection(".toml", "counters = [\"TOT_CYC\"\n");
    assert!(matches!(
        SelectionIndex::from_file(file.path(), &backend),
        Err(SelectionError::Parse(_))
    ));
}
