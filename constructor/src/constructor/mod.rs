//! Transfer constructor.
//!
//! The [`Constructor`] picks a funded sender, sizes a transfer according to
//! the accounting model, and drives the construction pipeline of the helper
//! until a signed, hashed transaction is ready to broadcast.
//!
//! # Workflow
//!
//! 1. [`Constructor::find_sender`] selects the unlocked address with the
//!    largest balance, creating and funding addresses when needed
//! 2. [`Constructor::generate_scenario`] classifies recipients and sizes the
//!    transfer, failing with [`ConstructorError::InsufficientFunds`] when no
//!    valid transfer exists
//! 3. [`Constructor::create_transaction`] runs preprocess through hash,
//!    checking every round trip on the way
//!
//! [`Constructor::next_transaction`] chains the three steps and recovers from
//! insufficient funds.

mod generator;
mod recipients;
mod sender;
mod transaction;


use std::sync::Arc;

use log::{debug, info};
use num_bigint::BigUint;
use tokio_util::sync::CancellationToken;

use crate::config::{AccountingModel, ConstructionConfig};
use crate::error::{ConstructorError, ConstructorResult, HelperResultExt, ResultExt, Step};
use crate::helper::{ConstructorHandler, ConstructorHelper};
use crate::keys::KeyPair;
use crate::orchestrator::{ensure_active, sleep_or_cancel, Clock, SeededRng, SystemClock};
use crate::scenario::ScenarioContext;
use crate::types::{AccountIdentifier, CoinIdentifier, Operation, TransactionIdentifier};

pub use recipients::Recipients;
pub use sender::Sender;

/// Transfer kinds, only used to size the balance they require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Send to an account that does not hold the minimum balance yet.
    NewAccountSend,
    /// Send to an account already holding the minimum balance.
    ExistingAccountSend,
    /// Spend a coin into a recipient output and a change output.
    ChangeSend,
    /// Spend a coin into a single output.
    FullSend,
}

/// Signed transaction produced by [`Constructor::next_transaction`].
#[derive(Debug, Clone)]
pub struct ConstructedTransaction {
    pub scenario: ScenarioContext,
    pub intent: Vec<Operation>,
    pub transaction_identifier: TransactionIdentifier,
    /// Network-ready transaction, broadcasting it is left to the caller.
    pub network_transaction: String,
}

pub struct Constructor {
    config: ConstructionConfig,
    helper: Arc<dyn ConstructorHelper>,
    handler: Arc<dyn ConstructorHandler>,
    clock: Arc<dyn Clock>,
    rng: SeededRng,
}

impl Constructor {
    /// Create a constructor on the system clock with a seed from the environment.
    pub fn new(
        config: ConstructionConfig,
        helper: Arc<dyn ConstructorHelper>,
        handler: Arc<dyn ConstructorHandler>,
    ) -> ConstructorResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            helper,
            handler,
            clock: Arc::new(SystemClock),
            rng: SeededRng::from_env_or_random(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rng(mut self, rng: SeededRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn config(&self) -> &ConstructionConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Balance an address needs before it can perform `action`.
    pub fn minimum_required_balance(&self, action: Action) -> BigUint {
        let minimum = &self.config.minimum_balance;
        match action {
            // Account: the sender keeps the minimum and the recipient gets at
            // least the minimum. UTXO: both outputs must clear the minimum.
            Action::NewAccountSend | Action::ChangeSend => {
                minimum + minimum + &self.config.maximum_fee
            }
            Action::ExistingAccountSend | Action::FullSend => minimum + &self.config.maximum_fee,
        }
    }

    /// Spendable balance of `address`.
    ///
    /// On UTXO chains this is the largest unspent coin, returned with its identifier.
    pub async fn balance(
        &self,
        address: &str,
    ) -> ConstructorResult<(BigUint, Option<CoinIdentifier>)> {
        let account = AccountIdentifier::new(address);
        let balance = match self.config.accounting_model {
            AccountingModel::Account => {
                let balance = self
                    .helper
                    .account_balance(&account, &self.config.currency)
                    .await
                    .step(Step::AccountBalance)?;
                Ok((balance, None))
            }
            AccountingModel::Utxo => self
                .helper
                .coin_balance(&account, &self.config.currency)
                .await
                .step(Step::CoinBalance),
        };

        balance.with_context(|| format!("unable to find balance for {}", address))
    }

    /// Generate a keypair and derive its address offline.
    ///
    /// Only works for blockchains that don't require an on-chain action to
    /// create an account.
    pub async fn new_address(&self) -> ConstructorResult<String> {
        let keypair = KeyPair::generate(self.config.curve_type)?;

        let (address, _) = self
            .helper
            .derive(&self.config.network, &keypair.public_key, None)
            .await
            .step(Step::Derive)?;

        self.helper
            .store_key(&address, &keypair)
            .await
            .step(Step::StoreKey)?;

        self.handler
            .address_created(&address)
            .await
            .step(Step::AddressCreated)?;

        if log::log_enabled!(log::Level::Debug) {
            debug!("Created address {}", address);
        }

        Ok(address)
    }

    /// Build one network-ready transaction.
    ///
    /// Insufficient funds are handled by waiting for in-flight broadcasts or
    /// by funding a new address, then starting over.
    pub async fn next_transaction(
        &self,
        cancel: &CancellationToken,
    ) -> ConstructorResult<ConstructedTransaction> {
        loop {
            ensure_active(cancel)?;

            let sender = self
                .find_sender(cancel)
                .await
                .context("unable to find sender")?;

            let (scenario, intent) = match self
                .generate_scenario(&sender.address, &sender.balance, sender.coin_identifier)
                .await
            {
                Ok(generated) => generated,
                Err(e) if e.is_insufficient_funds() => {
                    self.recover_insufficient_funds(&sender.address, cancel)
                        .await?;
                    continue;
                }
                Err(e) => return Err(e.context("unable to generate scenario")),
            };

            let (transaction_identifier, network_transaction) = self
                .create_transaction(&intent, cancel)
                .await
                .context("unable to create transaction")?;

            if log::log_enabled!(log::Level::Info) {
                info!(
                    "Constructed transaction {} from {}",
                    transaction_identifier, scenario.sender
                );
            }

            return Ok(ConstructedTransaction {
                scenario,
                intent,
                transaction_identifier,
                network_transaction,
            });
        }
    }

    async fn recover_insufficient_funds(
        &self,
        sender: &str,
        cancel: &CancellationToken,
    ) -> ConstructorResult<()> {
        let broadcasts = self.helper.all_broadcasts().await.step(Step::Broadcasts)?;
        if !broadcasts.is_empty() {
            if log::log_enabled!(log::Level::Debug) {
                debug!(
                    "Insufficient funds on {}, waiting for {} broadcasts",
                    sender,
                    broadcasts.len()
                );
            }
            return sleep_or_cancel(
                self.clock.as_ref(),
                cancel,
                self.config.get_broadcast_backoff(),
            )
            .await;
        }

        if log::log_enabled!(log::Level::Debug) {
            debug!("Insufficient funds on {}, requesting funds on a new address", sender);
        }
        self.generate_new_and_request(cancel)
            .await
            .context("unable to generate new address and request funds")
    }

    fn random_amount(&self, min: &BigUint, max: &BigUint) -> ConstructorResult<BigUint> {
        self.rng
            .gen_biguint_range(min, max)
            .ok_or(ConstructorError::InsufficientFunds)
    }
}
