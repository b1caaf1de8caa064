//! Scenario: Config Hash Stable
//!
//! # Invariants under test
//!
//! 1. The same layers hash the same, call after call.
//! 2. Key order inside a document does not change the hash.
//! 3. A changed value changes the hash.
//! 4. Later layers override earlier ones, and the overlay is visible in the
//!    typed run config.
//! 5. The hash is 64 hex characters of SHA-256.

use xck_compare::Rule;
use xck_config::{load_layered_yaml_from_strings, RunConfig};

const BASE_YAML: &str = r#"
sources:
  reference_url: "http://legacy.internal:8545"
  candidate_url: "http://migrated.internal:8545"
window:
  size: 1000
concurrency:
  units: 5
  sub_fetches: 10
rules:
  size: true
  dangling_state: true
"#;

const BASE_YAML_REORDERED: &str = r#"
rules:
  dangling_state: true
  size: true
concurrency:
  sub_fetches: 10
  units: 5
window:
  size: 1000
sources:
  candidate_url: "http://migrated.internal:8545"
  reference_url: "http://legacy.internal:8545"
"#;

const OVERLAY_YAML: &str = r#"
range:
  start: 21615000
  end: 21617000
window:
  size: 500
rules:
  dangling_state: false
boundaries:
  42220: 21616000
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(original.config_hash, reordered.config_hash);
    assert_eq!(original.canonical_json, reordered.canonical_json);
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[&BASE_YAML.replace("size: 1000", "size: 999")]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_reaches_the_run_config() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);

    let cfg = RunConfig::from_config_json(&a.config_json).unwrap();
    assert_eq!(cfg.window_size, 500);
    assert_eq!(cfg.units, 5);
    assert_eq!((cfg.start, cfg.end), (Some(21_615_000), Some(21_617_000)));
    assert_eq!(cfg.boundaries.get(42220), Some(21_616_000));
    assert!(!cfg.rules.is_enabled(Rule::DanglingState));
    assert!(cfg.rules.is_enabled(Rule::Size));
    assert_eq!(cfg.reference_url.as_deref(), Some("http://legacy.internal:8545"));
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn empty_layers_hash_like_an_empty_mapping() {
    let a = load_layered_yaml_from_strings(&["{}"]).unwrap();
    let b = load_layered_yaml_from_strings(&["~"]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, "{}");
}
