//! Capabilities the constructor requires from a chain integration.
//!
//! A [`ConstructorHelper`] bundles the construction API calls of one
//! blockchain family together with the key and address storage of the
//! surrounding application. The constructor only orchestrates these calls.

use async_trait::async_trait;
use num_bigint::BigUint;

use crate::keys::KeyPair;
use crate::types::{
    AccountIdentifier, CoinIdentifier, Currency, Metadata, NetworkIdentifier, Operation,
    PublicKey, Signature, SigningPayload, TransactionIdentifier,
};

/// Result of parsing a transaction back into operations.
#[derive(Debug, Clone, Default)]
pub struct ParsedTransaction {
    pub operations: Vec<Operation>,
    /// Addresses that signed the transaction, empty when unsigned.
    pub signers: Vec<String>,
    pub metadata: Option<Metadata>,
}

#[async_trait]
pub trait ConstructorHelper: Send + Sync {
    async fn derive(
        &self,
        network: &NetworkIdentifier,
        public_key: &PublicKey,
        metadata: Option<Metadata>,
    ) -> anyhow::Result<(String, Option<Metadata>)>;

    async fn preprocess(
        &self,
        network: &NetworkIdentifier,
        intent: &[Operation],
        metadata: Option<Metadata>,
    ) -> anyhow::Result<Metadata>;

    async fn metadata(
        &self,
        network: &NetworkIdentifier,
        options: Metadata,
    ) -> anyhow::Result<Metadata>;

    /// Build the unsigned transaction and the payloads that must be signed.
    async fn payloads(
        &self,
        network: &NetworkIdentifier,
        intent: &[Operation],
        metadata: Metadata,
    ) -> anyhow::Result<(String, Vec<SigningPayload>)>;

    async fn parse(
        &self,
        network: &NetworkIdentifier,
        signed: bool,
        transaction: &str,
    ) -> anyhow::Result<ParsedTransaction>;

    async fn combine(
        &self,
        network: &NetworkIdentifier,
        unsigned_transaction: &str,
        signatures: Vec<Signature>,
    ) -> anyhow::Result<String>;

    async fn hash(
        &self,
        network: &NetworkIdentifier,
        network_transaction: &str,
    ) -> anyhow::Result<TransactionIdentifier>;

    /// Compare parsed operations against the intent.
    ///
    /// `error_extra` rejects observed operations missing from the intent,
    /// `confirm_success` requires every observed operation to be successful.
    fn expected_operations(
        &self,
        intent: &[Operation],
        observed: &[Operation],
        error_extra: bool,
        confirm_success: bool,
    ) -> anyhow::Result<()>;

    fn expected_signers(&self, payloads: &[SigningPayload], signers: &[String])
        -> anyhow::Result<()>;

    async fn sign(&self, payloads: &[SigningPayload]) -> anyhow::Result<Vec<Signature>>;

    async fn store_key(&self, address: &str, keypair: &KeyPair) -> anyhow::Result<()>;

    async fn account_balance(
        &self,
        account: &AccountIdentifier,
        currency: &Currency,
    ) -> anyhow::Result<BigUint>;

    /// Value and identifier of the largest unspent coin owned by `account`.
    async fn coin_balance(
        &self,
        account: &AccountIdentifier,
        currency: &Currency,
    ) -> anyhow::Result<(BigUint, Option<CoinIdentifier>)>;

    /// Addresses with an unconfirmed outbound broadcast.
    async fn locked_addresses(&self) -> anyhow::Result<Vec<String>>;

    async fn all_addresses(&self) -> anyhow::Result<Vec<String>>;

    /// Broadcasts submitted but not yet confirmed.
    async fn all_broadcasts(&self) -> anyhow::Result<Vec<TransactionIdentifier>>;
}

/// Notified whenever the constructor creates an address.
#[async_trait]
pub trait ConstructorHandler: Send + Sync {
    async fn address_created(&self, address: &str) -> anyhow::Result<()>;
}
