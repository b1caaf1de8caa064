//! Command handlers for the `xck` binary.

pub mod verify;

use anyhow::Result;

/// `xck config-hash`: print the hash and the canonical JSON it was taken over.
pub fn config_hash(paths: &[String]) -> Result<()> {
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = xck_config::load_layered_yaml(&refs)?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}
