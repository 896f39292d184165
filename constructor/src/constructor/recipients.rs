use super::Constructor;
use crate::config::AccountingModel;
use crate::error::{ConstructorResult, HelperResultExt, ResultExt, Step};

/// Every known address except the sender, split on the minimum balance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients {
    /// Addresses holding at least the minimum balance.
    pub minimum: Vec<String>,
    /// Addresses below the minimum, every address on UTXO chains.
    pub below_minimum: Vec<String>,
}

impl Constructor {
    /// Classify every address other than `sender` as a potential recipient.
    pub async fn find_recipients(&self, sender: &str) -> ConstructorResult<Recipients> {
        let addresses = self
            .helper
            .all_addresses()
            .await
            .step(Step::AllAddresses)?;

        let mut recipients = Recipients::default();
        for address in addresses.into_iter().filter(|a| a != sender) {
            // Sending UTXOs always requires sending to the minimum
            if self.config.accounting_model == AccountingModel::Utxo {
                recipients.below_minimum.push(address);
                continue;
            }

            let (balance, _) = self
                .balance(&address)
                .await
                .with_context(|| format!("unable to retrieve balance for {}", address))?;

            if balance >= self.config.minimum_balance {
                recipients.minimum.push(address);
            } else {
                recipients.below_minimum.push(address);
            }
        }

        Ok(recipients)
    }
}
