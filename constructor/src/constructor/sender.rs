use std::collections::HashSet;

use log::{debug, info, trace};
use num_bigint::BigUint;
use tokio_util::sync::CancellationToken;

use super::{Action, Constructor};
use crate::config::AccountingModel;
use crate::error::{ConstructorResult, HelperResultExt, ResultExt, Step};
use crate::orchestrator::{ensure_active, sleep_or_cancel};
use crate::types::{pretty_amount, CoinIdentifier};

/// Address selected to fund the next transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub address: String,
    pub balance: BigUint,
    /// Coin to spend (UTXO only).
    pub coin_identifier: Option<CoinIdentifier>,
}

impl Constructor {
    /// Find the unlocked address with the largest balance (or largest coin).
    ///
    /// Creates and funds a new address when none exists, or when every
    /// address is locked and no broadcast is pending.
    pub async fn find_sender(&self, cancel: &CancellationToken) -> ConstructorResult<Sender> {
        loop {
            ensure_active(cancel)?;

            let addresses = self
                .helper
                .all_addresses()
                .await
                .step(Step::AllAddresses)?;

            if addresses.is_empty() {
                self.generate_new_and_request(cancel)
                    .await
                    .context("unable to generate new and request")?;
                continue;
            }

            if let Some(sender) = self
                .best_unlocked_sender(&addresses)
                .await
                .context("unable to get best unlocked sender")?
            {
                return Ok(sender);
            }

            let broadcasts = self.helper.all_broadcasts().await.step(Step::Broadcasts)?;
            if !broadcasts.is_empty() {
                // Every address is locked by a pending broadcast
                if log::log_enabled!(log::Level::Debug) {
                    debug!(
                        "All {} addresses locked, waiting on {} broadcasts",
                        addresses.len(),
                        broadcasts.len()
                    );
                }
                sleep_or_cancel(
                    self.clock.as_ref(),
                    cancel,
                    self.config.get_broadcast_backoff(),
                )
                .await?;
                continue;
            }

            self.generate_new_and_request(cancel)
                .await
                .context("generate new address and request")?;
        }
    }

    /// Unlocked address with the strictly largest balance, first seen wins ties.
    pub(crate) async fn best_unlocked_sender(
        &self,
        addresses: &[String],
    ) -> ConstructorResult<Option<Sender>> {
        let locked: HashSet<String> = self
            .helper
            .locked_addresses()
            .await
            .step(Step::LockedAddresses)?
            .into_iter()
            .collect();

        let mut best: Option<Sender> = None;
        for address in addresses.iter().filter(|a| !locked.contains(*a)) {
            let (balance, coin_identifier) = self
                .balance(address)
                .await
                .with_context(|| format!("unable to get balance for {}", address))?;

            if log::log_enabled!(log::Level::Trace) {
                trace!("Candidate sender {} has balance {}", address, balance);
            }

            let better = best.as_ref().map_or(true, |b| b.balance < balance);
            if better {
                best = Some(Sender {
                    address: address.clone(),
                    balance,
                    coin_identifier,
                });
            }
        }

        Ok(best)
    }

    /// Wait until `address` holds enough to perform the largest action of the model.
    pub async fn request_funds(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> ConstructorResult<(BigUint, Option<CoinIdentifier>)> {
        let minimum = match self.config.accounting_model {
            AccountingModel::Account => self.minimum_required_balance(Action::NewAccountSend),
            AccountingModel::Utxo => self.minimum_required_balance(Action::ChangeSend),
        };

        let mut printed_message = false;
        loop {
            ensure_active(cancel)?;

            let (balance, coin_identifier) = self.balance(address).await?;
            if balance >= minimum {
                if log::log_enabled!(log::Level::Info) {
                    info!(
                        "Found balance {} on {}",
                        pretty_amount(&balance, &self.config.currency),
                        address
                    );
                }
                return Ok((balance, coin_identifier));
            }

            if !printed_message {
                if log::log_enabled!(log::Level::Info) {
                    info!("Waiting for funds on {}", address);
                }
                printed_message = true;
            }

            sleep_or_cancel(
                self.clock.as_ref(),
                cancel,
                self.config.get_funding_poll_interval(),
            )
            .await?;
        }
    }

    /// Create an address and block until it is funded.
    pub async fn generate_new_and_request(&self, cancel: &CancellationToken) -> ConstructorResult<()> {
        let address = self
            .new_address()
            .await
            .context("unable to create address")?;

        self.request_funds(&address, cancel)
            .await
            .with_context(|| format!("unable to get funds on {}", address))?;

        Ok(())
    }
}
