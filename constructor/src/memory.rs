//! In-memory chain integration.
//!
//! [`InMemoryHelper`] implements the helper and handler capabilities over a
//! local ledger: keys, balances (or coins) and pending broadcasts live in a
//! single mutex. Transactions are JSON documents, payloads are the SHA3-256
//! digest of the unsigned transaction and signatures are ed25519.
//!
//! Operations debiting an account (negative amount or spent coin) define the
//! signers of a transaction. A transfer debiting nothing is signed by the
//! first account of the intent.

use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{anyhow, bail, Context as _};
use async_trait::async_trait;
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use log::{debug, info};
use num_bigint::{BigInt, BigUint, Sign};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha3::{Digest, Sha3_256};

use crate::config::AccountingModel;
use crate::helper::{ConstructorHandler, ConstructorHelper, ParsedTransaction};
use crate::keys::KeyPair;
use crate::types::{
    AccountIdentifier, CoinAction, CoinIdentifier, Currency, Metadata, NetworkIdentifier,
    Operation, PublicKey, Signature, SignatureType, SigningPayload, TransactionIdentifier,
};

/// Status reported for operations of a confirmed transaction.
pub const SUCCESS_STATUS: &str = "SUCCESS";

const SIGNERS_KEY: &str = "signers";
const NETWORK_KEY: &str = "network";

/// Addresses are the first 20 bytes of the public key digest.
const ADDRESS_LENGTH: usize = 20;

#[derive(Debug, Serialize, Deserialize)]
struct UnsignedTransaction {
    operations: Vec<Operation>,
    metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignedTransaction {
    unsigned_transaction: String,
    signatures: Vec<Signature>,
}

#[derive(Default)]
struct Ledger {
    addresses: Vec<String>,
    keys: HashMap<String, KeyPair>,
    balances: HashMap<String, BigUint>,
    coins: HashMap<String, Vec<(CoinIdentifier, BigUint)>>,
    locked: HashSet<String>,
    broadcasts: Vec<TransactionIdentifier>,
    pending: Vec<(TransactionIdentifier, Vec<Operation>, Vec<String>)>,
    faucet_count: u64,
}

/// Helper backed by a local ledger, for either accounting model.
pub struct InMemoryHelper {
    model: AccountingModel,
    faucet: Option<BigUint>,
    ledger: Mutex<Ledger>,
}

impl InMemoryHelper {
    pub fn new(model: AccountingModel) -> Self {
        Self {
            model,
            faucet: None,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Fund every created address with `amount`.
    pub fn with_faucet(mut self, amount: BigUint) -> Self {
        self.faucet = Some(amount);
        self
    }

    pub fn model(&self) -> AccountingModel {
        self.model
    }

    /// Credit `address`, as a new coin on UTXO chains.
    pub fn fund(&self, address: &str, amount: BigUint) {
        let mut ledger = self.ledger.lock();
        match self.model {
            AccountingModel::Account => {
                *ledger.balances.entry(address.to_string()).or_default() += amount;
            }
            AccountingModel::Utxo => {
                ledger.faucet_count += 1;
                let coin = CoinIdentifier::new(format!("faucet:{}", ledger.faucet_count));
                ledger
                    .coins
                    .entry(address.to_string())
                    .or_default()
                    .push((coin, amount));
            }
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.ledger.lock().addresses.clone()
    }

    pub fn lock_address(&self, address: &str) {
        self.ledger.lock().locked.insert(address.to_string());
    }

    pub fn unlock_address(&self, address: &str) {
        self.ledger.lock().locked.remove(address);
    }

    /// Accept a signed transaction and lock its signers until [`InMemoryHelper::confirm_all`].
    pub fn submit(&self, network_transaction: &str) -> anyhow::Result<TransactionIdentifier> {
        let signed = decode_signed(network_transaction)?;
        let unsigned = decode_unsigned(&signed.unsigned_transaction)?;
        let transaction_identifier = transaction_hash(network_transaction);
        let signers: Vec<String> = signed
            .signatures
            .iter()
            .map(|s| s.signing_payload.address.clone())
            .collect();

        let mut ledger = self.ledger.lock();
        ledger.locked.extend(signers.iter().cloned());
        ledger.broadcasts.push(transaction_identifier.clone());
        ledger
            .pending
            .push((transaction_identifier.clone(), unsigned.operations, signers));

        if log::log_enabled!(log::Level::Debug) {
            debug!("Submitted transaction {}", transaction_identifier);
        }
        Ok(transaction_identifier)
    }

    /// Settle every pending broadcast and release its signers.
    ///
    /// Settlement is all or nothing: if any operation fails, balances and
    /// coins are restored and every broadcast stays pending with its signers
    /// locked.
    pub fn confirm_all(&self) -> anyhow::Result<usize> {
        let mut ledger = self.ledger.lock();
        let balances = ledger.balances.clone();
        let coins = ledger.coins.clone();
        let pending = std::mem::take(&mut ledger.pending);

        if let Err(e) = self.settle_all(&mut ledger, &pending) {
            ledger.balances = balances;
            ledger.coins = coins;
            ledger.pending = pending;
            return Err(e);
        }

        for (_, _, signers) in &pending {
            for signer in signers {
                ledger.locked.remove(signer);
            }
        }
        ledger.broadcasts.clear();

        let count = pending.len();
        if count > 0 && log::log_enabled!(log::Level::Info) {
            info!("Confirmed {} transactions", count);
        }
        Ok(count)
    }

    fn settle_all(
        &self,
        ledger: &mut Ledger,
        pending: &[(TransactionIdentifier, Vec<Operation>, Vec<String>)],
    ) -> anyhow::Result<()> {
        for (transaction_identifier, operations, _) in pending {
            for op in operations {
                self.settle(ledger, transaction_identifier, op)
                    .with_context(|| format!("unable to settle {}", transaction_identifier))?;
            }
        }
        Ok(())
    }

    fn settle(
        &self,
        ledger: &mut Ledger,
        transaction_identifier: &TransactionIdentifier,
        op: &Operation,
    ) -> anyhow::Result<()> {
        let (Some(account), Some(amount)) = (op.account.as_ref(), op.amount.as_ref()) else {
            return Ok(());
        };
        let delta = parse_amount(&amount.value)?;

        match self.model {
            AccountingModel::Account => {
                let current = ledger
                    .balances
                    .get(&account.address)
                    .cloned()
                    .unwrap_or_default();
                let (sign, updated) = (BigInt::from(current) + delta).into_parts();
                if sign == Sign::Minus {
                    bail!("balance of {} would become negative", account.address);
                }
                ledger.balances.insert(account.address.clone(), updated);
            }
            AccountingModel::Utxo => {
                if let Some(change) = &op.coin_change {
                    if change.coin_action == CoinAction::CoinSpent {
                        let coins = ledger.coins.entry(account.address.clone()).or_default();
                        let before = coins.len();
                        coins.retain(|(coin, _)| *coin != change.coin_identifier);
                        if coins.len() == before {
                            bail!(
                                "coin {} not owned by {}",
                                change.coin_identifier.identifier,
                                account.address
                            );
                        }
                        return Ok(());
                    }
                }

                if delta.sign() == Sign::Plus {
                    let (_, value) = delta.into_parts();
                    let coin = CoinIdentifier::new(format!(
                        "{}:{}",
                        transaction_identifier.hash, op.operation_identifier.index
                    ));
                    ledger
                        .coins
                        .entry(account.address.clone())
                        .or_default()
                        .push((coin, value));
                }
            }
        }
        Ok(())
    }
}

/// Signers implied by the operations.
fn operation_signers(operations: &[Operation]) -> Vec<String> {
    let mut signers: Vec<String> = Vec::new();
    for op in operations {
        let Some(account) = &op.account else {
            continue;
        };
        let debit = op
            .amount
            .as_ref()
            .map_or(false, |a| a.value.starts_with('-'));
        let spent = op
            .coin_change
            .as_ref()
            .map_or(false, |c| c.coin_action == CoinAction::CoinSpent);

        if (debit || spent) && !signers.contains(&account.address) {
            signers.push(account.address.clone());
        }
    }

    if signers.is_empty() {
        if let Some(account) = operations.iter().find_map(|op| op.account.as_ref()) {
            signers.push(account.address.clone());
        }
    }
    signers
}

fn operations_match(expected: &Operation, observed: &Operation) -> bool {
    expected.kind == observed.kind
        && expected.account == observed.account
        && expected.amount.as_ref().map(|a| &a.value) == observed.amount.as_ref().map(|a| &a.value)
        && expected.coin_change == observed.coin_change
}

fn parse_amount(value: &str) -> anyhow::Result<BigInt> {
    value
        .parse::<BigInt>()
        .map_err(|e| anyhow!("invalid amount '{}': {}", value, e))
}

fn payload_digest(unsigned_transaction: &str) -> Vec<u8> {
    Sha3_256::digest(unsigned_transaction.as_bytes()).to_vec()
}

fn transaction_hash(network_transaction: &str) -> TransactionIdentifier {
    TransactionIdentifier::new(hex::encode(Sha3_256::digest(
        network_transaction.as_bytes(),
    )))
}

fn decode_unsigned(transaction: &str) -> anyhow::Result<UnsignedTransaction> {
    serde_json::from_str(transaction).context("unable to decode unsigned transaction")
}

fn decode_signed(transaction: &str) -> anyhow::Result<SignedTransaction> {
    serde_json::from_str(transaction).context("unable to decode signed transaction")
}

fn verify_signature(signature: &Signature) -> anyhow::Result<()> {
    let public: [u8; 32] = signature
        .public_key
        .bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("invalid public key length {}", signature.public_key.bytes.len()))?;
    let verifying_key = VerifyingKey::from_bytes(&public)?;
    let bytes = Ed25519Signature::from_slice(&signature.bytes)?;
    verifying_key
        .verify(&signature.signing_payload.bytes, &bytes)
        .with_context(|| {
            format!(
                "invalid signature for {}",
                signature.signing_payload.address
            )
        })
}

#[async_trait]
impl ConstructorHelper for InMemoryHelper {
    async fn derive(
        &self,
        _network: &NetworkIdentifier,
        public_key: &PublicKey,
        metadata: Option<Metadata>,
    ) -> anyhow::Result<(String, Option<Metadata>)> {
        let digest = Sha3_256::digest(&public_key.bytes);
        Ok((hex::encode(&digest[..ADDRESS_LENGTH]), metadata))
    }

    async fn preprocess(
        &self,
        _network: &NetworkIdentifier,
        intent: &[Operation],
        metadata: Option<Metadata>,
    ) -> anyhow::Result<Metadata> {
        let signers = operation_signers(intent);
        if signers.is_empty() {
            bail!("intent has no account to sign for it");
        }

        let mut options = metadata.unwrap_or_default();
        options.insert(SIGNERS_KEY.to_string(), serde_json::to_value(signers)?);
        Ok(options)
    }

    async fn metadata(
        &self,
        network: &NetworkIdentifier,
        mut options: Metadata,
    ) -> anyhow::Result<Metadata> {
        options.insert(
            NETWORK_KEY.to_string(),
            Value::String(network.network.clone()),
        );
        Ok(options)
    }

    async fn payloads(
        &self,
        _network: &NetworkIdentifier,
        intent: &[Operation],
        metadata: Metadata,
    ) -> anyhow::Result<(String, Vec<SigningPayload>)> {
        let signers: Vec<String> = metadata
            .get(SIGNERS_KEY)
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| anyhow!("metadata is missing {}", SIGNERS_KEY))?;

        let unsigned_transaction = serde_json::to_string(&UnsignedTransaction {
            operations: intent.to_vec(),
            metadata,
        })?;

        let digest = payload_digest(&unsigned_transaction);
        let payloads = signers
            .into_iter()
            .map(|address| SigningPayload {
                address,
                bytes: digest.clone(),
                signature_type: Some(SignatureType::Ed25519),
            })
            .collect();

        Ok((unsigned_transaction, payloads))
    }

    async fn parse(
        &self,
        _network: &NetworkIdentifier,
        signed: bool,
        transaction: &str,
    ) -> anyhow::Result<ParsedTransaction> {
        if !signed {
            let unsigned = decode_unsigned(transaction)?;
            return Ok(ParsedTransaction {
                operations: unsigned.operations,
                signers: Vec::new(),
                metadata: Some(unsigned.metadata),
            });
        }

        let signed = decode_signed(transaction)?;
        let unsigned = decode_unsigned(&signed.unsigned_transaction)?;
        let digest = payload_digest(&signed.unsigned_transaction);

        let mut signers = Vec::with_capacity(signed.signatures.len());
        for signature in &signed.signatures {
            if signature.signing_payload.bytes != digest {
                bail!(
                    "signature of {} does not cover this transaction",
                    signature.signing_payload.address
                );
            }
            verify_signature(signature)?;
            signers.push(signature.signing_payload.address.clone());
        }

        Ok(ParsedTransaction {
            operations: unsigned.operations,
            signers,
            metadata: Some(unsigned.metadata),
        })
    }

    async fn combine(
        &self,
        _network: &NetworkIdentifier,
        unsigned_transaction: &str,
        signatures: Vec<Signature>,
    ) -> anyhow::Result<String> {
        decode_unsigned(unsigned_transaction)?;
        Ok(serde_json::to_string(&SignedTransaction {
            unsigned_transaction: unsigned_transaction.to_string(),
            signatures,
        })?)
    }

    async fn hash(
        &self,
        _network: &NetworkIdentifier,
        network_transaction: &str,
    ) -> anyhow::Result<TransactionIdentifier> {
        decode_signed(network_transaction)?;
        Ok(transaction_hash(network_transaction))
    }

    fn expected_operations(
        &self,
        intent: &[Operation],
        observed: &[Operation],
        error_extra: bool,
        confirm_success: bool,
    ) -> anyhow::Result<()> {
        let mut unmatched: Vec<&Operation> = observed.iter().collect();
        for expected in intent {
            let position = unmatched
                .iter()
                .position(|op| operations_match(expected, op))
                .ok_or_else(|| {
                    anyhow!(
                        "operation {} ({}) not found",
                        expected.operation_identifier.index,
                        expected.kind
                    )
                })?;
            let matched = unmatched.remove(position);

            if confirm_success && matched.status.as_deref() != Some(SUCCESS_STATUS) {
                bail!(
                    "operation {} is not successful",
                    matched.operation_identifier.index
                );
            }
        }

        if error_extra && !unmatched.is_empty() {
            bail!("found {} unexpected operations", unmatched.len());
        }
        Ok(())
    }

    fn expected_signers(
        &self,
        payloads: &[SigningPayload],
        signers: &[String],
    ) -> anyhow::Result<()> {
        let expected: BTreeSet<&str> = payloads.iter().map(|p| p.address.as_str()).collect();
        let observed: BTreeSet<&str> = signers.iter().map(String::as_str).collect();

        if observed.len() != signers.len() {
            bail!("duplicate signers in {:?}", signers);
        }
        if expected != observed {
            bail!("expected signers {:?} but found {:?}", expected, observed);
        }
        Ok(())
    }

    async fn sign(&self, payloads: &[SigningPayload]) -> anyhow::Result<Vec<Signature>> {
        let ledger = self.ledger.lock();
        payloads
            .iter()
            .map(|payload| {
                let keypair = ledger
                    .keys
                    .get(&payload.address)
                    .ok_or_else(|| anyhow!("no key stored for {}", payload.address))?;
                let (signature_type, bytes) = keypair.sign(payload)?;
                Ok(Signature {
                    signing_payload: payload.clone(),
                    public_key: keypair.public_key.clone(),
                    signature_type,
                    bytes,
                })
            })
            .collect()
    }

    async fn store_key(&self, address: &str, keypair: &KeyPair) -> anyhow::Result<()> {
        let mut ledger = self.ledger.lock();
        if ledger.keys.contains_key(address) {
            bail!("address {} already stored", address);
        }
        ledger.keys.insert(address.to_string(), keypair.clone());
        ledger.addresses.push(address.to_string());
        Ok(())
    }

    async fn account_balance(
        &self,
        account: &AccountIdentifier,
        _currency: &Currency,
    ) -> anyhow::Result<BigUint> {
        if self.model != AccountingModel::Account {
            bail!("account balances are not tracked on {} chains", self.model);
        }
        Ok(self
            .ledger
            .lock()
            .balances
            .get(&account.address)
            .cloned()
            .unwrap_or_default())
    }

    async fn coin_balance(
        &self,
        account: &AccountIdentifier,
        _currency: &Currency,
    ) -> anyhow::Result<(BigUint, Option<CoinIdentifier>)> {
        if self.model != AccountingModel::Utxo {
            bail!("coins are not tracked on {} chains", self.model);
        }
        let ledger = self.ledger.lock();
        let largest = ledger
            .coins
            .get(&account.address)
            .and_then(|coins| coins.iter().max_by(|a, b| a.1.cmp(&b.1)));

        Ok(match largest {
            Some((coin, value)) => (value.clone(), Some(coin.clone())),
            None => (BigUint::default(), None),
        })
    }

    async fn locked_addresses(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.ledger.lock().locked.iter().cloned().collect())
    }

    async fn all_addresses(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.ledger.lock().addresses.clone())
    }

    async fn all_broadcasts(&self) -> anyhow::Result<Vec<TransactionIdentifier>> {
        Ok(self.ledger.lock().broadcasts.clone())
    }
}

#[async_trait]
impl ConstructorHandler for InMemoryHelper {
    async fn address_created(&self, address: &str) -> anyhow::Result<()> {
        if let Some(amount) = &self.faucet {
            self.fund(address, amount.clone());
            if log::log_enabled!(log::Level::Debug) {
                debug!("Faucet funded {} with {}", address, amount);
            }
        }
        Ok(())
    }
}
