use log::{debug, trace};
use tokio_util::sync::CancellationToken;

use super::Constructor;
use crate::error::{ConstructorError, ConstructorResult, HelperResultExt, Step};
use crate::orchestrator::ensure_active;
use crate::types::{Operation, TransactionIdentifier};

impl Constructor {
    /// Run the construction pipeline for `intent`.
    ///
    /// Returns the transaction identifier and the network-ready transaction.
    /// Broadcasting is left to the caller.
    pub async fn create_transaction(
        &self,
        intent: &[Operation],
        cancel: &CancellationToken,
    ) -> ConstructorResult<(TransactionIdentifier, String)> {
        let network = &self.config.network;

        ensure_active(cancel)?;
        let options = self
            .helper
            .preprocess(network, intent, None)
            .await
            .step(Step::Preprocess)?;

        ensure_active(cancel)?;
        let metadata = self
            .helper
            .metadata(network, options)
            .await
            .step(Step::Metadata)?;

        ensure_active(cancel)?;
        let (unsigned_transaction, payloads) = self
            .helper
            .payloads(network, intent, metadata)
            .await
            .step(Step::Payloads)?;

        if log::log_enabled!(log::Level::Trace) {
            trace!(
                "Unsigned transaction {} with {} payloads",
                unsigned_transaction,
                payloads.len()
            );
        }

        ensure_active(cancel)?;
        let parsed = self
            .helper
            .parse(network, false, &unsigned_transaction)
            .await
            .step(Step::ParseUnsigned)?;

        if !parsed.signers.is_empty() {
            return Err(ConstructorError::UnsignedSigners(parsed.signers.len()));
        }

        self.helper
            .expected_operations(intent, &parsed.operations, false, false)
            .map_err(ConstructorError::UnsignedOperationsMismatch)?;

        ensure_active(cancel)?;
        let signatures = self.helper.sign(&payloads).await.step(Step::Sign)?;

        ensure_active(cancel)?;
        let network_transaction = self
            .helper
            .combine(network, &unsigned_transaction, signatures)
            .await
            .step(Step::Combine)?;

        ensure_active(cancel)?;
        let signed = self
            .helper
            .parse(network, true, &network_transaction)
            .await
            .step(Step::ParseSigned)?;

        self.helper
            .expected_operations(intent, &signed.operations, false, false)
            .map_err(ConstructorError::SignedOperationsMismatch)?;

        self.helper
            .expected_signers(&payloads, &signed.signers)
            .map_err(ConstructorError::SignersMismatch)?;

        ensure_active(cancel)?;
        let transaction_identifier = self
            .helper
            .hash(network, &network_transaction)
            .await
            .step(Step::Hash)?;

        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "Transaction {} signed by {:?}",
                transaction_identifier, signed.signers
            );
        }

        Ok((transaction_identifier, network_transaction))
    }
}
