//! Error types for the construction tester.

use strum::Display;
use thiserror::Error;

use crate::keys::KeyError;

/// Stage of the workflow that called into the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Step {
    #[strum(serialize = "unable to preprocess")]
    Preprocess,
    #[strum(serialize = "unable to construct metadata")]
    Metadata,
    #[strum(serialize = "unable to construct payloads")]
    Payloads,
    #[strum(serialize = "unable to parse unsigned transaction")]
    ParseUnsigned,
    #[strum(serialize = "unable to sign payloads")]
    Sign,
    #[strum(serialize = "unable to combine signatures")]
    Combine,
    #[strum(serialize = "unable to parse signed transaction")]
    ParseSigned,
    #[strum(serialize = "unable to get transaction hash")]
    Hash,
    #[strum(serialize = "unable to derive address")]
    Derive,
    #[strum(serialize = "unable to store address")]
    StoreKey,
    #[strum(serialize = "could not handle address creation")]
    AddressCreated,
    #[strum(serialize = "unable to get account balance")]
    AccountBalance,
    #[strum(serialize = "unable to get coin balance")]
    CoinBalance,
    #[strum(serialize = "unable to get locked addresses")]
    LockedAddresses,
    #[strum(serialize = "unable to get addresses")]
    AllAddresses,
    #[strum(serialize = "unable to get broadcasts")]
    Broadcasts,
}

/// Error type for construction tester operations.
#[derive(Error, Debug)]
pub enum ConstructorError {
    /// No transfer can be generated with the current balances.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The cancellation token fired while waiting.
    #[error("context cancelled")]
    Cancelled,

    /// A helper call failed.
    #[error("{step}: {source}")]
    Helper {
        step: Step,
        #[source]
        source: anyhow::Error,
    },

    /// Unsigned transactions must not report any signer.
    #[error("signers should be empty in unsigned transaction but found {0}")]
    UnsignedSigners(usize),

    /// Operations parsed from the unsigned transaction differ from the intent.
    #[error("unsigned parsed ops do not match intent: {0}")]
    UnsignedOperationsMismatch(#[source] anyhow::Error),

    /// Operations parsed from the signed transaction differ from the intent.
    #[error("signed parsed ops do not match intent: {0}")]
    SignedOperationsMismatch(#[source] anyhow::Error),

    /// Signers recovered from the signed transaction differ from the payload signers.
    #[error("signed transactions signers do not match intent: {0}")]
    SignersMismatch(#[source] anyhow::Error),

    /// Template population failed.
    #[error("unable to populate scenario: {0}")]
    Scenario(String),

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    /// Stage wrapping, keeps the underlying error reachable.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ConstructorError>,
    },
}

impl ConstructorError {
    /// Wrap this error with the name of the stage that failed.
    ///
    /// Cancellation is returned as-is.
    pub fn context(self, context: impl Into<String>) -> Self {
        if matches!(self, ConstructorError::Cancelled) {
            return self;
        }
        ConstructorError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error once every [`ConstructorError::Context`] layer is removed.
    pub fn root(&self) -> &ConstructorError {
        match self {
            ConstructorError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self.root(), ConstructorError::InsufficientFunds)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), ConstructorError::Cancelled)
    }
}

/// Result type alias for construction tester operations.
pub type ConstructorResult<T> = Result<T, ConstructorError>;

/// Attach a [`Step`] to a failed helper call.
pub(crate) trait HelperResultExt<T> {
    fn step(self, step: Step) -> ConstructorResult<T>;
}

impl<T> HelperResultExt<T> for anyhow::Result<T> {
    fn step(self, step: Step) -> ConstructorResult<T> {
        self.map_err(|source| ConstructorError::Helper { step, source })
    }
}

/// Attach a stage description to any [`ConstructorResult`].
pub(crate) trait ResultExt<T> {
    fn context(self, context: &str) -> ConstructorResult<T>;

    fn with_context<F: FnOnce() -> String>(self, f: F) -> ConstructorResult<T>;
}

impl<T> ResultExt<T> for ConstructorResult<T> {
    fn context(self, context: &str) -> ConstructorResult<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> ConstructorResult<T> {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_error_names_step() {
        let result: anyhow::Result<()> = Err(anyhow::anyhow!("node unreachable"));
        let err = result.step(Step::Preprocess).unwrap_err();
        assert_eq!(err.to_string(), "unable to preprocess: node unreachable");
    }

    #[test]
    fn test_insufficient_funds_seen_through_context() {
        let err = ConstructorError::InsufficientFunds
            .context("unable to generate scenario")
            .context("attempt 3");
        assert!(err.is_insufficient_funds());
        assert!(!err.is_cancelled());
        assert_eq!(
            err.to_string(),
            "attempt 3: unable to generate scenario: insufficient funds"
        );
    }

    #[test]
    fn test_cancelled_not_wrapped() {
        let err = ConstructorError::Cancelled.context("unable to find sender");
        assert!(matches!(err, ConstructorError::Cancelled));
    }

    #[test]
    fn test_operations_mismatch_message() {
        let err = ConstructorError::UnsignedOperationsMismatch(anyhow::anyhow!(
            "missing operation 1"
        ));
        assert_eq!(
            err.to_string(),
            "unsigned parsed ops do not match intent: missing operation 1"
        );
    }
}
