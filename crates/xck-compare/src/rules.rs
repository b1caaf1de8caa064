//! Named normalization rules and the set of rules active for a run.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every known, intentional representational divergence between the legacy
/// and migrated nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Drop `size` from both raw blocks.
    Size,
    /// Drop `randomness` and `epochSnarkData` from reference blocks.
    RemovedConcepts,
    /// Drop the hard-coded `gasLimit` from pre-boundary reference blocks.
    LegacyGasLimit,
    /// Drop the boundary-introduced header fields from candidate blocks that
    /// report `gasLimit == 0x0`.
    BoundaryGroup,
    /// Zero the aggregated seal inside the reference block's `extraData`.
    AggregatedSeal,
    /// Drop `chainId` from transactions on both sides.
    TxChainId,
    /// Drop `yParity` from candidate transactions.
    TxYParity,
    /// Drop `gatewayFee` from transactions on both sides.
    TxGatewayFee,
    /// Drop `ethCompatible: true` from legacy reference transactions.
    TxEthCompatible,
    /// Drop a `null` `effectiveGasPrice` from candidate receipts.
    ReceiptNullGasPrice,
    /// Tolerate a reference-only effective gas price on a receipt (warning).
    DanglingState,
}

impl Rule {
    pub const ALL: [Rule; 11] = [
        Rule::Size,
        Rule::RemovedConcepts,
        Rule::LegacyGasLimit,
        Rule::BoundaryGroup,
        Rule::AggregatedSeal,
        Rule::TxChainId,
        Rule::TxYParity,
        Rule::TxGatewayFee,
        Rule::TxEthCompatible,
        Rule::ReceiptNullGasPrice,
        Rule::DanglingState,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Rule::Size => "size",
            Rule::RemovedConcepts => "removed_concepts",
            Rule::LegacyGasLimit => "legacy_gas_limit",
            Rule::BoundaryGroup => "boundary_group",
            Rule::AggregatedSeal => "aggregated_seal",
            Rule::TxChainId => "tx_chain_id",
            Rule::TxYParity => "tx_y_parity",
            Rule::TxGatewayFee => "tx_gateway_fee",
            Rule::TxEthCompatible => "tx_eth_compatible",
            Rule::ReceiptNullGasPrice => "receipt_null_gas_price",
            Rule::DanglingState => "dangling_state",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Rule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Rule::ALL
            .iter()
            .copied()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| format!("unknown normalization rule '{wanted}'"))
    }
}

/// Rules in effect. Everything is on unless explicitly disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    disabled: BTreeSet<Rule>,
}

impl RuleSet {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn without(mut self, rule: Rule) -> Self {
        self.disabled.insert(rule);
        self
    }

    pub fn set(&mut self, rule: Rule, enabled: bool) {
        if enabled {
            self.disabled.remove(&rule);
        } else {
            self.disabled.insert(rule);
        }
    }

    pub fn is_enabled(&self, rule: Rule) -> bool {
        !self.disabled.contains(&rule)
    }

    pub fn disabled(&self) -> impl Iterator<Item = Rule> + '_ {
        self.disabled.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for rule in Rule::ALL {
            assert_eq!(rule.name().parse::<Rule>().unwrap(), rule);
        }
        assert!("no_such_rule".parse::<Rule>().is_err());
    }

    #[test]
    fn rule_set_toggles() {
        let mut rules = RuleSet::all().without(Rule::BoundaryGroup);
        assert!(!rules.is_enabled(Rule::BoundaryGroup));
        assert!(rules.is_enabled(Rule::Size));
        rules.set(Rule::BoundaryGroup, true);
        assert!(rules.is_enabled(Rule::BoundaryGroup));
        assert_eq!(rules.disabled().count(), 0);
    }
}
