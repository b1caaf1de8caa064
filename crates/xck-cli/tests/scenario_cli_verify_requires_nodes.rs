//! Scenario: CLI Verify Requires Nodes
//!
//! # Invariants under test
//!
//! 1. `xck verify` without node URLs fails before any network activity and
//!    says how to supply them.
//! 2. Without a start block it fails the same way.
//! 3. `--strict-config` turns an unknown config key into a failure.
//! 4. An unknown rule name is rejected by the argument parser.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::PathBuf;
use std::process::Command;

fn xck() -> anyhow::Result<Command> {
    let mut cmd = Command::cargo_bin("xck")?;
    cmd.env_remove("XCK_REFERENCE_URL").env_remove("XCK_CANDIDATE_URL");
    Ok(cmd)
}

#[test]
fn missing_reference_url_fails_fast() -> anyhow::Result<()> {
    xck()?
        .args(["verify", "--start", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--reference-url"));
    Ok(())
}

#[test]
fn missing_start_fails_fast() -> anyhow::Result<()> {
    xck()?
        .args([
            "verify",
            "--reference-url",
            "http://127.0.0.1:1",
            "--candidate-url",
            "http://127.0.0.1:1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--start"));
    Ok(())
}

#[test]
fn strict_config_rejects_unknown_keys() -> anyhow::Result<()> {
    let dir = std::env::temp_dir().join(format!("xck-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path: PathBuf = dir.join("typo.yaml");
    std::fs::write(&path, "window:\n  sise: 10\n")?;

    xck()?
        .arg("verify")
        .arg("--config")
        .arg(&path)
        .arg("--strict-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_UNUSED_KEYS"));

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn unknown_rule_is_rejected() -> anyhow::Result<()> {
    xck()?
        .args(["verify", "--disable-rule", "gas_fudge"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown normalization rule"));
    Ok(())
}
