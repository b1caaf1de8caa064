//! Typed view of a merged config document.
//!
//! Every key is optional; absent keys take the defaults below. A key that is
//! present with the wrong type is an error, never a silent default.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use xck_compare::{Rule, RuleSet};

/// First post-migration block per chain id: Celo mainnet, Baklava, Alfajores.
pub const DEFAULT_BOUNDARIES: [(u64, u64); 3] = [
    (42220, 21_616_000),
    (62320, 18_785_000),
    (44787, 19_814_000),
];

pub const DEFAULT_WINDOW_SIZE: u64 = 1000;
pub const DEFAULT_UNITS: usize = 5;
pub const DEFAULT_SUB_FETCHES: usize = 10;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_WINDOW_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Boundary table
// ---------------------------------------------------------------------------

/// Migration boundary per chain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryTable(BTreeMap<u64, u64>);

impl Default for BoundaryTable {
    fn default() -> Self {
        Self(DEFAULT_BOUNDARIES.into_iter().collect())
    }
}

impl BoundaryTable {
    pub fn get(&self, chain_id: u64) -> Option<u64> {
        self.0.get(&chain_id).copied()
    }

    pub fn insert(&mut self, chain_id: u64, boundary: u64) {
        self.0.insert(chain_id, boundary);
    }

    pub fn as_map(&self) -> &BTreeMap<u64, u64> {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Settings for one `xck verify` run. Node URLs may carry credentials, so
/// `Debug` prints them redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub reference_url: Option<String>,
    pub candidate_url: Option<String>,
    pub start: Option<u64>,
    /// Inclusive. `None` resolves against the nodes' heads at preflight.
    pub end: Option<u64>,
    pub window_size: u64,
    pub units: usize,
    pub sub_fetches: usize,
    pub queue_capacity: usize,
    pub unit_timeout: Duration,
    pub window_timeout: Duration,
    pub request_timeout: Duration,
    /// Blocks between progress lines; the window size when unset.
    pub progress_every: Option<u64>,
    pub boundaries: BoundaryTable,
    pub rules: RuleSet,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            reference_url: None,
            candidate_url: None,
            start: None,
            end: None,
            window_size: DEFAULT_WINDOW_SIZE,
            units: DEFAULT_UNITS,
            sub_fetches: DEFAULT_SUB_FETCHES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            unit_timeout: Duration::from_secs(DEFAULT_UNIT_TIMEOUT_SECS),
            window_timeout: Duration::from_secs(DEFAULT_WINDOW_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            progress_every: None,
            boundaries: BoundaryTable::default(),
            rules: RuleSet::all(),
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("reference_url", &self.reference_url.as_deref().map(redact_url))
            .field("candidate_url", &self.candidate_url.as_deref().map(redact_url))
            .field("start", &self.start)
            .field("end", &self.end)
            .field("window_size", &self.window_size)
            .field("units", &self.units)
            .field("sub_fetches", &self.sub_fetches)
            .field("queue_capacity", &self.queue_capacity)
            .field("unit_timeout", &self.unit_timeout)
            .field("window_timeout", &self.window_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("progress_every", &self.progress_every)
            .field("boundaries", &self.boundaries)
            .field("rules", &self.rules)
            .finish()
    }
}

impl RunConfig {
    pub fn from_config_json(v: &Value) -> Result<Self> {
        let mut cfg = RunConfig {
            reference_url: string_at(v, "/sources/reference_url")?,
            candidate_url: string_at(v, "/sources/candidate_url")?,
            start: u64_at(v, "/range/start")?,
            end: u64_at(v, "/range/end")?,
            progress_every: u64_at(v, "/progress/every")?,
            ..RunConfig::default()
        };
        if let Some(n) = u64_at(v, "/window/size")? {
            cfg.window_size = n;
        }
        if let Some(n) = u64_at(v, "/concurrency/units")? {
            cfg.units = to_usize(n, "/concurrency/units")?;
        }
        if let Some(n) = u64_at(v, "/concurrency/sub_fetches")? {
            cfg.sub_fetches = to_usize(n, "/concurrency/sub_fetches")?;
        }
        if let Some(n) = u64_at(v, "/queue/capacity")? {
            cfg.queue_capacity = to_usize(n, "/queue/capacity")?;
        }
        if let Some(n) = u64_at(v, "/timeouts/unit_secs")? {
            cfg.unit_timeout = Duration::from_secs(n);
        }
        if let Some(n) = u64_at(v, "/timeouts/window_secs")? {
            cfg.window_timeout = Duration::from_secs(n);
        }
        if let Some(n) = u64_at(v, "/timeouts/request_secs")? {
            cfg.request_timeout = Duration::from_secs(n);
        }

        if let Some(table) = object_at(v, "/boundaries")? {
            for (chain, boundary) in table {
                let chain_id: u64 = chain
                    .trim()
                    .parse()
                    .with_context(|| format!("/boundaries: chain id '{chain}' is not a number"))?;
                let boundary = boundary
                    .as_u64()
                    .ok_or_else(|| anyhow!("/boundaries/{chain}: expected a block number"))?;
                cfg.boundaries.insert(chain_id, boundary);
            }
        }

        if let Some(rules) = object_at(v, "/rules")? {
            for (name, enabled) in rules {
                let rule: Rule = name.parse().map_err(|e: String| anyhow!("/rules/{name}: {e}"))?;
                let enabled = enabled
                    .as_bool()
                    .ok_or_else(|| anyhow!("/rules/{name}: expected true or false"))?;
                cfg.rules.set(rule, enabled);
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            bail!("window.size must be at least 1");
        }
        if self.units == 0 || self.sub_fetches == 0 {
            bail!("concurrency.units and concurrency.sub_fetches must be at least 1");
        }
        if self.queue_capacity == 0 {
            bail!("queue.capacity must be at least 1");
        }
        if self.unit_timeout.is_zero() || self.window_timeout.is_zero() || self.request_timeout.is_zero() {
            bail!("timeouts must be non-zero");
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end < start {
                bail!("range.end {end} is before range.start {start}");
            }
        }
        Ok(())
    }
}

/// `scheme://host[:port]/path` with credentials and query removed.
pub fn redact_url(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let (authority, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let host = match authority.rsplit_once('@') {
        Some((_, host)) => format!("<REDACTED>@{host}"),
        None => authority.to_string(),
    };
    match scheme {
        Some(scheme) => format!("{scheme}://{host}{path}"),
        None => format!("{host}{path}"),
    }
}

// ---------------------------------------------------------------------------
// Typed lookups
// ---------------------------------------------------------------------------

fn present<'a>(v: &'a Value, ptr: &str) -> Option<&'a Value> {
    v.pointer(ptr).filter(|x| !x.is_null())
}

fn u64_at(v: &Value, ptr: &str) -> Result<Option<u64>> {
    present(v, ptr)
        .map(|x| x.as_u64().ok_or_else(|| anyhow!("{ptr}: expected a non-negative integer, got {x}")))
        .transpose()
}

fn string_at(v: &Value, ptr: &str) -> Result<Option<String>> {
    present(v, ptr)
        .map(|x| {
            x.as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("{ptr}: expected a string"))
        })
        .transpose()
}

fn object_at<'a>(v: &'a Value, ptr: &str) -> Result<Option<&'a serde_json::Map<String, Value>>> {
    present(v, ptr)
        .map(|x| x.as_object().ok_or_else(|| anyhow!("{ptr}: expected a mapping")))
        .transpose()
}

fn to_usize(n: u64, ptr: &str) -> Result<usize> {
    usize::try_from(n).with_context(|| format!("{ptr}: {n} is too large"))
}
