//! Construction API data types.
//!
//! These mirror the objects exchanged with a construction API: operations,
//! amounts, signing payloads and signatures. Helpers receive and return them
//! as-is, the core never interprets chain-specific fields.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// Free-form metadata attached to requests and responses.
pub type Metadata = Map<String, Value>;

/// Identifies the network a request is made against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkIdentifier {
    pub blockchain: String,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_network_identifier: Option<SubNetworkIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubNetworkIdentifier {
    pub network: String,
}

impl NetworkIdentifier {
    pub fn new(blockchain: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            blockchain: blockchain.into(),
            network: network.into(),
            sub_network_identifier: None,
        }
    }
}

/// Currency of an amount, `decimals` is only used for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub symbol: String,
    pub decimals: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Currency {
    pub fn new(symbol: impl Into<String>, decimals: u32) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
            metadata: None,
        }
    }
}

/// Format `value` in whole units of `currency`, e.g. `123.45 TOS`.
pub fn pretty_amount(value: &BigUint, currency: &Currency) -> String {
    let decimals = currency.decimals as usize;
    let digits = value.to_string();
    if decimals == 0 {
        return format!("{} {}", digits, currency.symbol);
    }

    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    format!("{}.{} {}", whole, fraction, currency.symbol)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubAccountIdentifier {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountIdentifier {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_account: Option<SubAccountIdentifier>,
}

impl AccountIdentifier {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            sub_account: None,
        }
    }
}

/// Signed decimal value in the smallest unit of `currency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub value: String,
    pub currency: Currency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationIdentifier {
    pub index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_index: Option<u64>,
}

impl OperationIdentifier {
    pub fn new(index: u64) -> Self {
        Self {
            index,
            network_index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoinIdentifier {
    pub identifier: String,
}

impl CoinIdentifier {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CoinAction {
    CoinCreated,
    CoinSpent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinChange {
    pub coin_identifier: CoinIdentifier,
    pub coin_action: CoinAction,
}

/// A single balance-changing step of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_identifier: OperationIdentifier,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_operations: Vec<OperationIdentifier>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin_change: Option<CoinChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CurveType {
    Secp256k1,
    Secp256r1,
    Edwards25519,
    Tweedle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SignatureType {
    Ecdsa,
    EcdsaRecovery,
    Ed25519,
    Schnorr1,
    SchnorrPoseidon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
    pub curve_type: CurveType,
}

/// Bytes an address must sign for a transaction to be valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningPayload {
    pub address: String,
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_type: Option<SignatureType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub signing_payload: SigningPayload,
    pub public_key: PublicKey,
    pub signature_type: SignatureType,
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionIdentifier {
    pub hash: String,
}

impl TransactionIdentifier {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
}

impl std::fmt::Display for TransactionIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_type_field_renamed() {
        let json = r#"{
            "operation_identifier": {"index": 0},
            "type": "Transfer",
            "account": {"address": "addr1"},
            "amount": {"value": "-10", "currency": {"symbol": "TOS", "decimals": 8}}
        }"#;

        let op: Operation = serde_json::from_str(json).unwrap();
        assert_eq!(op.kind, "Transfer");
        assert_eq!(op.account.unwrap().address, "addr1");
        assert!(op.related_operations.is_empty());
        assert!(op.coin_change.is_none());
    }

    #[test]
    fn test_pretty_amount() {
        let tos = Currency::new("TOS", 2);
        assert_eq!(pretty_amount(&BigUint::from(12345u32), &tos), "123.45 TOS");
        assert_eq!(pretty_amount(&BigUint::from(5u32), &tos), "0.05 TOS");
        assert_eq!(
            pretty_amount(&BigUint::from(7u32), &Currency::new("SAT", 0)),
            "7 SAT"
        );
    }

    #[test]
    fn test_curve_type_snake_case() {
        let curve: CurveType = serde_json::from_str("\"edwards25519\"").unwrap();
        assert_eq!(curve, CurveType::Edwards25519);
        assert_eq!(curve.to_string(), "edwards25519");
        assert_eq!("secp256k1".parse::<CurveType>().unwrap(), CurveType::Secp256k1);
    }
}
