use log::debug;
use num_bigint::BigUint;

use super::{Action, Constructor, Recipients};
use crate::config::AccountingModel;
use crate::error::{ConstructorError, ConstructorResult, HelperResultExt, ResultExt, Step};
use crate::scenario::{populate_scenario, Change, ScenarioContext};
use crate::types::{CoinIdentifier, Operation};

impl Constructor {
    /// Decide what the next transfer from `sender` looks like.
    ///
    /// Returns the scenario and its hydrated operations, or
    /// [`ConstructorError::InsufficientFunds`] when `balance` cannot cover
    /// any transfer of the accounting model.
    pub async fn generate_scenario(
        &self,
        sender: &str,
        balance: &BigUint,
        coin_identifier: Option<CoinIdentifier>,
    ) -> ConstructorResult<(ScenarioContext, Vec<Operation>)> {
        let recipients = self
            .find_recipients(sender)
            .await
            .context("unable to find recipients")?;

        let (scenario, operations) = match self.config.accounting_model {
            AccountingModel::Account => {
                self.generate_account_scenario(sender, balance, &recipients)
                    .await?
            }
            AccountingModel::Utxo => {
                self.generate_utxo_scenario(
                    sender,
                    balance,
                    &recipients.below_minimum,
                    coin_identifier,
                )
                .await?
            }
        };

        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "Scenario from {}: {} to {} (change: {:?})",
                scenario.sender, scenario.recipient_value, scenario.recipient, scenario.change
            );
        }

        Ok((scenario, operations))
    }

    pub(crate) async fn generate_account_scenario(
        &self,
        sender: &str,
        balance: &BigUint,
        recipients: &Recipients,
    ) -> ConstructorResult<(ScenarioContext, Vec<Operation>)> {
        let minimum = &self.config.minimum_balance;

        // New account, existing account, or no transfer at all
        if *balance >= self.minimum_required_balance(Action::NewAccountSend) {
            let adjusted_balance = balance - minimum;
            let candidates: Vec<String> = recipients
                .minimum
                .iter()
                .chain(recipients.below_minimum.iter())
                .cloned()
                .collect();

            let (recipient, created) = self
                .can_get_new_address(&candidates)
                .await
                .context("unable to get recipient")?;

            // A recipient below the minimum must end up holding at least the minimum
            let lower = if created || recipients.below_minimum.contains(&recipient) {
                minimum.clone()
            } else {
                BigUint::default()
            };

            let recipient_value = self.random_amount(&lower, &adjusted_balance)?;
            return self.create_scenario_context(
                sender,
                recipient_value.clone(),
                recipient,
                recipient_value,
                None,
                None,
            );
        }

        if *balance >= self.minimum_required_balance(Action::ExistingAccountSend) {
            let recipient = recipients
                .minimum
                .first()
                .cloned()
                .ok_or(ConstructorError::InsufficientFunds)?;

            let adjusted_balance = balance - minimum;
            let recipient_value = self.random_amount(&BigUint::default(), &adjusted_balance)?;
            return self.create_scenario_context(
                sender,
                recipient_value.clone(),
                recipient,
                recipient_value,
                None,
                None,
            );
        }

        Err(ConstructorError::InsufficientFunds)
    }

    pub(crate) async fn generate_utxo_scenario(
        &self,
        sender: &str,
        balance: &BigUint,
        recipients: &[String],
        coin_identifier: Option<CoinIdentifier>,
    ) -> ConstructorResult<(ScenarioContext, Vec<Operation>)> {
        // Checked before picking a recipient so no address is created for nothing
        if *balance < self.minimum_required_balance(Action::FullSend) {
            return Err(ConstructorError::InsufficientFunds);
        }

        let minimum = &self.config.minimum_balance;
        let fee_less_balance = balance - &self.config.maximum_fee;

        let (recipient, created) = self
            .can_get_new_address(recipients)
            .await
            .context("unable to get recipient")?;

        // A reused recipient cannot also receive the change
        let remaining: Vec<String> = if created {
            recipients.to_vec()
        } else {
            recipients
                .iter()
                .filter(|r| **r != recipient)
                .cloned()
                .collect()
        };

        if *balance >= self.minimum_required_balance(Action::ChangeSend)
            && self.config.change_scenario.is_some()
        {
            let (change_address, _) = self
                .can_get_new_address(&remaining)
                .await
                .context("unable to get change address")?;

            let change_differential = &fee_less_balance - minimum - minimum;
            let recipient_share = self.random_amount(&BigUint::default(), &change_differential)?;
            let change_share = &change_differential - &recipient_share;

            return self.create_scenario_context(
                sender,
                balance.clone(),
                recipient,
                minimum + recipient_share,
                Some(Change {
                    address: change_address,
                    value: minimum + change_share,
                }),
                coin_identifier,
            );
        }

        let recipient_value = self.random_amount(minimum, &fee_less_balance)?;
        self.create_scenario_context(
            sender,
            balance.clone(),
            recipient,
            recipient_value,
            None,
            coin_identifier,
        )
    }

    /// Pick a new address or the first candidate.
    ///
    /// A new address is created when the draw exceeds the configured
    /// probability while under the address cap, or when there is no candidate.
    pub(crate) async fn can_get_new_address(
        &self,
        candidates: &[String],
    ) -> ConstructorResult<(String, bool)> {
        let available = self
            .helper
            .all_addresses()
            .await
            .step(Step::AllAddresses)
            .context("unable to get available addresses")?;

        let draw = self.rng.gen_f64();
        let create = (draw > self.config.new_account_probability
            && available.len() < self.config.max_addresses)
            || candidates.is_empty();

        if create {
            let address = self
                .new_address()
                .await
                .context("cannot create new address")?;
            return Ok((address, true));
        }

        Ok((candidates[0].clone(), false))
    }

    /// Build the scenario and hydrate a fresh copy of the configured template.
    fn create_scenario_context(
        &self,
        sender: &str,
        sender_value: BigUint,
        recipient: String,
        recipient_value: BigUint,
        change: Option<Change>,
        coin_identifier: Option<CoinIdentifier>,
    ) -> ConstructorResult<(ScenarioContext, Vec<Operation>)> {
        let mut template = self.config.scenario.clone();
        if change.is_some() {
            let change_template = self.config.change_scenario.clone().ok_or_else(|| {
                ConstructorError::Scenario("change output without a change scenario".to_string())
            })?;
            template.push(change_template);
        }

        let context = ScenarioContext {
            sender: sender.to_string(),
            sender_value,
            recipient,
            recipient_value,
            change,
            currency: self.config.currency.clone(),
            coin_identifier,
        };

        let operations = populate_scenario(&context, template)?;
        Ok((context, operations))
    }
}
