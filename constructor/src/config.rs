//! Configuration for a construction run.

use std::time::Duration;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{ConstructorError, ConstructorResult};
use crate::types::{Currency, CurveType, NetworkIdentifier, Operation};

/// Default probability of reusing an existing recipient.
pub const DEFAULT_NEW_ACCOUNT_PROBABILITY: f64 = 0.5;

/// Default cap on the number of addresses the run creates.
pub const DEFAULT_MAX_ADDRESSES: usize = 200;

/// Default wait between polls and retries, in seconds.
pub const DEFAULT_SLEEP_TIME: u64 = 10;

const fn default_new_account_probability() -> f64 {
    DEFAULT_NEW_ACCOUNT_PROBABILITY
}

const fn default_max_addresses() -> usize {
    DEFAULT_MAX_ADDRESSES
}

const fn default_sleep_time() -> u64 {
    DEFAULT_SLEEP_TIME
}

const fn default_curve_type() -> CurveType {
    CurveType::Edwards25519
}

/// How the chain keeps track of value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountingModel {
    /// Balances are tracked per address
    Account,
    /// Value is held in discrete unspent outputs
    Utxo,
}

/// Construction settings for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructionConfig {
    /// Network every request is made against.
    pub network: NetworkIdentifier,

    pub accounting_model: AccountingModel,

    /// Currency transferred by every scenario.
    pub currency: Currency,

    /// Curve used when generating keys for new addresses.
    #[serde(default = "default_curve_type")]
    pub curve_type: CurveType,

    /// Smallest balance an account or output may hold.
    #[serde(with = "amount")]
    pub minimum_balance: BigUint,

    /// Upper bound on the fee of any transaction.
    #[serde(with = "amount")]
    pub maximum_fee: BigUint,

    /// Probability of reusing an existing address instead of creating a recipient.
    #[serde(default = "default_new_account_probability")]
    pub new_account_probability: f64,

    /// New addresses are only created while fewer than this many exist.
    #[serde(default = "default_max_addresses")]
    pub max_addresses: usize,

    /// Operation template hydrated for every transfer.
    pub scenario: Vec<Operation>,

    /// Extra operation appended when a UTXO transfer produces change.
    #[serde(default)]
    pub change_scenario: Option<Operation>,

    /// Seconds between two balance polls while waiting for funds.
    #[serde(default = "default_sleep_time")]
    pub funding_poll_interval: u64,

    /// Seconds to wait for in-flight broadcasts before retrying sender discovery.
    #[serde(default = "default_sleep_time")]
    pub broadcast_backoff: u64,
}

impl ConstructionConfig {
    pub fn new(
        network: NetworkIdentifier,
        accounting_model: AccountingModel,
        currency: Currency,
        minimum_balance: BigUint,
        maximum_fee: BigUint,
        scenario: Vec<Operation>,
    ) -> Self {
        Self {
            network,
            accounting_model,
            currency,
            curve_type: default_curve_type(),
            minimum_balance,
            maximum_fee,
            new_account_probability: DEFAULT_NEW_ACCOUNT_PROBABILITY,
            max_addresses: DEFAULT_MAX_ADDRESSES,
            scenario,
            change_scenario: None,
            funding_poll_interval: DEFAULT_SLEEP_TIME,
            broadcast_backoff: DEFAULT_SLEEP_TIME,
        }
    }

    pub fn with_change_scenario(mut self, change_scenario: Operation) -> Self {
        self.change_scenario = Some(change_scenario);
        self
    }

    pub fn with_new_account_probability(mut self, probability: f64) -> Self {
        self.new_account_probability = probability;
        self
    }

    pub fn with_max_addresses(mut self, max_addresses: usize) -> Self {
        self.max_addresses = max_addresses;
        self
    }

    pub fn get_funding_poll_interval(&self) -> Duration {
        Duration::from_secs(self.funding_poll_interval)
    }

    pub fn get_broadcast_backoff(&self) -> Duration {
        Duration::from_secs(self.broadcast_backoff)
    }

    /// Reject settings the scenario generator cannot work with.
    pub fn validate(&self) -> ConstructorResult<()> {
        if !(0.0..=1.0).contains(&self.new_account_probability) {
            return Err(ConstructorError::Config(format!(
                "new_account_probability must be within [0, 1], got {}",
                self.new_account_probability
            )));
        }

        if self.max_addresses == 0 {
            return Err(ConstructorError::Config(
                "max_addresses must be greater than 0".to_string(),
            ));
        }

        if self.scenario.is_empty() {
            return Err(ConstructorError::Config(
                "scenario must contain at least one operation".to_string(),
            ));
        }

        if self.accounting_model == AccountingModel::Account && self.change_scenario.is_some() {
            return Err(ConstructorError::Config(
                "change_scenario is only supported with the utxo accounting model".to_string(),
            ));
        }

        Ok(())
    }
}

/// Amounts are written as decimal strings.
mod amount {
    use num_bigint::BigUint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let value = String::deserialize(deserializer)?;
        BigUint::parse_bytes(value.trim().as_bytes(), 10)
            .ok_or_else(|| D::Error::custom(format!("invalid amount '{}'", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "network": {"blockchain": "tos", "network": "testnet"},
        "accounting_model": "utxo",
        "currency": {"symbol": "TOS", "decimals": 8},
        "minimum_balance": "600",
        "maximum_fee": "1500",
        "scenario": [
            {
                "operation_identifier": {"index": 0},
                "type": "Input",
                "account": {"address": "{{ SENDER }}"},
                "amount": {"value": "{{ SENDER_VALUE }}", "currency": {"symbol": "TOS", "decimals": 8}}
            }
        ]
    }"#;

    #[test]
    fn test_deserialize_defaults() {
        let config: ConstructionConfig = serde_json::from_str(CONFIG).unwrap();

        assert_eq!(config.accounting_model, AccountingModel::Utxo);
        assert_eq!(config.minimum_balance, BigUint::from(600u32));
        assert_eq!(config.maximum_fee, BigUint::from(1500u32));
        assert_eq!(config.curve_type, CurveType::Edwards25519);
        assert_eq!(config.new_account_probability, DEFAULT_NEW_ACCOUNT_PROBABILITY);
        assert_eq!(config.max_addresses, DEFAULT_MAX_ADDRESSES);
        assert_eq!(config.get_funding_poll_interval(), Duration::from_secs(10));
        assert!(config.change_scenario.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_amount_roundtrip_as_string() {
        let config: ConstructionConfig = serde_json::from_str(CONFIG).unwrap();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["minimum_balance"], "600");
        assert_eq!(value["accounting_model"], "utxo");
    }

    #[test]
    fn test_invalid_amount_rejected() {
        let bad = CONFIG.replace("\"600\"", "\"-5\"");
        assert!(serde_json::from_str::<ConstructionConfig>(&bad).is_err());
    }

    #[test]
    fn test_validate_probability() {
        let config: ConstructionConfig = serde_json::from_str(CONFIG).unwrap();
        let config = config.with_new_account_probability(1.5);
        assert!(matches!(config.validate(), Err(ConstructorError::Config(_))));
    }

    #[test]
    fn test_validate_change_scenario_requires_utxo() {
        let mut config: ConstructionConfig = serde_json::from_str(CONFIG).unwrap();
        let change = config.scenario[0].clone();
        config.accounting_model = AccountingModel::Account;
        let config = config.with_change_scenario(change);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_scenario() {
        let mut config: ConstructionConfig = serde_json::from_str(CONFIG).unwrap();
        config.scenario.clear();
        assert!(config.validate().is_err());
    }
}
