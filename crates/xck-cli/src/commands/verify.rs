//! `xck verify`: load config, preflight both nodes, run the reconciler.

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::{info, warn};
use uuid::Uuid;
use xck_compare::{Comparator, Rule};
use xck_config::{redact_url, report_unused_keys, RunConfig, UnusedKeyPolicy};
use xck_fetch::FetchLimits;
use xck_reconcile::{preflight, ReconcileConfig, Reconciler};
use xck_schemas::{Pair, Role};
use xck_source::Source;

pub const ENV_REFERENCE_URL: &str = "XCK_REFERENCE_URL";
pub const ENV_CANDIDATE_URL: &str = "XCK_CANDIDATE_URL";

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Layered config paths in merge order
    #[arg(long = "config")]
    pub config_paths: Vec<String>,

    /// Legacy node JSON-RPC URL (overrides config and XCK_REFERENCE_URL)
    #[arg(long)]
    pub reference_url: Option<String>,

    /// Migrated node JSON-RPC URL (overrides config and XCK_CANDIDATE_URL)
    #[arg(long)]
    pub candidate_url: Option<String>,

    /// First block to verify
    #[arg(long)]
    pub start: Option<u64>,

    /// Last block to verify (inclusive). Defaults to the lower head minus 128.
    #[arg(long)]
    pub end: Option<u64>,

    #[arg(long)]
    pub window_size: Option<u64>,

    /// Blocks fetched concurrently
    #[arg(long)]
    pub units: Option<usize>,

    /// Turn off a normalization rule by name (repeatable)
    #[arg(long = "disable-rule", value_name = "RULE")]
    pub disabled_rules: Vec<Rule>,

    /// Treat unknown config keys as an error instead of a warning
    #[arg(long, default_value_t = false)]
    pub strict_config: bool,
}

/// Merge config layers, the environment and flags, in rising precedence.
fn resolve(args: &VerifyArgs) -> Result<(RunConfig, Option<String>)> {
    let (mut cfg, config_hash) = if args.config_paths.is_empty() {
        (RunConfig::default(), None)
    } else {
        let refs: Vec<&str> = args.config_paths.iter().map(String::as_str).collect();
        let loaded = xck_config::load_layered_yaml(&refs)?;

        let policy = if args.strict_config {
            UnusedKeyPolicy::Fail
        } else {
            UnusedKeyPolicy::Warn
        };
        let report = report_unused_keys(&loaded.config_json, policy)?;
        for p in report.unused_leaf_pointers.iter().take(50) {
            warn!(pointer = %p, "unused config key");
        }

        let cfg = RunConfig::from_config_json(&loaded.config_json).context("invalid run config")?;
        (cfg, Some(loaded.config_hash))
    };

    if let Ok(url) = std::env::var(ENV_REFERENCE_URL) {
        cfg.reference_url = Some(url);
    }
    if let Ok(url) = std::env::var(ENV_CANDIDATE_URL) {
        cfg.candidate_url = Some(url);
    }
    if let Some(url) = &args.reference_url {
        cfg.reference_url = Some(url.clone());
    }
    if let Some(url) = &args.candidate_url {
        cfg.candidate_url = Some(url.clone());
    }
    if args.start.is_some() {
        cfg.start = args.start;
    }
    if args.end.is_some() {
        cfg.end = args.end;
    }
    if let Some(n) = args.window_size {
        cfg.window_size = n;
    }
    if let Some(n) = args.units {
        cfg.units = n;
    }
    for rule in &args.disabled_rules {
        cfg.rules.set(*rule, false);
    }
    cfg.validate()?;
    Ok((cfg, config_hash))
}

pub async fn run_verify(args: VerifyArgs) -> Result<()> {
    let (cfg, config_hash) = resolve(&args)?;

    let reference_url = cfg
        .reference_url
        .clone()
        .with_context(|| format!("no reference node: pass --reference-url, set {ENV_REFERENCE_URL} or sources.reference_url"))?;
    let candidate_url = cfg
        .candidate_url
        .clone()
        .with_context(|| format!("no candidate node: pass --candidate-url, set {ENV_CANDIDATE_URL} or sources.candidate_url"))?;
    let start = cfg
        .start
        .context("no start block: pass --start or set range.start")?;

    let sources = Pair::new(
        Source::http(Role::Reference, &reference_url, cfg.request_timeout).context("reference node client")?,
        Source::http(Role::Candidate, &candidate_url, cfg.request_timeout).context("candidate node client")?,
    );

    let run_id = Uuid::new_v4();
    info!(
        %run_id,
        config_hash = config_hash.as_deref().unwrap_or("NONE"),
        reference = %redact_url(&reference_url),
        candidate = %redact_url(&candidate_url),
        "run starting"
    );
    for rule in cfg.rules.disabled() {
        warn!(%rule, "normalization rule disabled");
    }

    let plan = preflight(&sources, cfg.boundaries.as_map(), start, cfg.end)
        .await
        .context("preflight failed")?;
    info!(
        %run_id,
        chain_id = plan.chain_id,
        boundary = plan.boundary,
        start = plan.start,
        end = plan.end,
        "preflight passed"
    );

    let mut rc = ReconcileConfig::new(plan.start, plan.end);
    rc.window_size = cfg.window_size;
    rc.units = cfg.units;
    rc.queue_capacity = cfg.queue_capacity;
    rc.progress_every = cfg.progress_every.unwrap_or(cfg.window_size);
    rc.limits = FetchLimits {
        sub_fetches: cfg.sub_fetches,
        unit_timeout: cfg.unit_timeout,
        window_timeout: cfg.window_timeout,
    };

    let reconciler = Reconciler::new(sources, Comparator::new(cfg.rules.clone(), plan.boundary), rc);
    let cancel = reconciler.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let summary = match reconciler.run().await {
        Ok(summary) => summary,
        Err(e) => {
            println!("run_id={run_id} status=FAILED kind={}", e.kind().as_str());
            bail!("run {run_id} failed: {e}");
        }
    };

    info!(
        %run_id,
        verified = summary.verified,
        windows = summary.windows_closed,
        warnings = summary.warnings.len(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "run complete"
    );
    println!(
        "run_id={run_id} status=OK start={} end={} verified={} windows={} warnings={}",
        summary.start,
        summary.end,
        summary.verified,
        summary.windows_closed,
        summary.warnings.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: VerifyArgs,
    }

    fn parse(argv: &[&str]) -> VerifyArgs {
        Harness::parse_from(std::iter::once("xck").chain(argv.iter().copied())).args
    }

    #[test]
    fn flags_override_defaults() {
        let args = parse(&[
            "--reference-url",
            "http://a:1",
            "--candidate-url",
            "http://b:2",
            "--start",
            "10",
            "--end",
            "20",
            "--window-size",
            "5",
            "--disable-rule",
            "dangling_state",
        ]);
        let (cfg, hash) = resolve(&args).unwrap();
        assert!(hash.is_none());
        assert_eq!(cfg.reference_url.as_deref(), Some("http://a:1"));
        assert_eq!(cfg.candidate_url.as_deref(), Some("http://b:2"));
        assert_eq!((cfg.start, cfg.end, cfg.window_size), (Some(10), Some(20), 5));
        assert!(!cfg.rules.is_enabled(Rule::DanglingState));
    }

    #[test]
    fn unknown_rule_flag_is_rejected_by_the_parser() {
        let res = Harness::try_parse_from(["xck", "--disable-rule", "not_a_rule"]);
        assert!(res.is_err());
    }

    #[test]
    fn inverted_range_fails_validation() {
        let args = parse(&["--start", "20", "--end", "10"]);
        assert!(resolve(&args).is_err());
    }
}
