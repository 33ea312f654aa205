//! Classified errors reported by a deployment run.

use serde::Serialize;

use crate::{
    factory::FactoryError,
    network::NetworkError,
    types::{DeployStep, PartialAddresses, TxHandle},
};

/// Classification of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum ErrorKind {
    /// Bad or missing input. Raised before any network call.
    ConfigurationError,
    /// The network rejected a transaction, or a deployment reverted.
    SubmissionError,
    /// A transaction did not confirm within the configured bound. It may still confirm later.
    ConfirmationTimeout,
    /// The initializer reverted, including "already initialized".
    InitializationError,
    /// The caller cancelled the run before a submission.
    Cancelled,
}

/// Terminal failure of a deployment run.
///
/// Carries the step that failed and every address already confirmed, since on-chain
/// progress is permanent and may need manual continuation.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{kind} at step {step}: {message}")]
pub struct DeployError {
    pub step: DeployStep,
    pub kind: ErrorKind,
    pub message: String,
    pub partial_addresses: PartialAddresses,
    /// The transaction whose outcome is unknown or failed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<TxHandle>,
}

impl DeployError {
    pub fn new(step: DeployStep, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            message: message.into(),
            partial_addresses: PartialAddresses::default(),
            tx: None,
        }
    }

    /// A configuration error raised before the run touches the network.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(DeployStep::Start, ErrorKind::ConfigurationError, message)
    }

    pub(crate) fn cancelled(step: DeployStep, partial: PartialAddresses) -> Self {
        Self::new(step, ErrorKind::Cancelled, "run cancelled before submission")
            .with_partial(partial)
    }

    pub fn with_partial(mut self, partial: PartialAddresses) -> Self {
        self.partial_addresses = partial;
        self
    }

    pub fn with_tx(mut self, tx: TxHandle) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Classify a factory failure at `step`.
    pub fn from_factory(
        step: DeployStep,
        err: FactoryError,
        partial: PartialAddresses,
    ) -> Self {
        let initializing = step == DeployStep::Initialized;
        let message = err.to_string();

        let (kind, tx) = match err {
            FactoryError::Encoding(_) => (ErrorKind::ConfigurationError, None),
            FactoryError::Submission(NetworkError::Reverted(_)) if initializing => {
                (ErrorKind::InitializationError, None)
            }
            FactoryError::Submission(_) => (ErrorKind::SubmissionError, None),
            FactoryError::Reverted { tx } if initializing => {
                (ErrorKind::InitializationError, Some(tx))
            }
            FactoryError::Reverted { tx } | FactoryError::MissingAddress { tx } => {
                (ErrorKind::SubmissionError, Some(tx))
            }
            FactoryError::Timeout { tx } => (ErrorKind::ConfirmationTimeout, Some(tx)),
        };

        Self {
            step,
            kind,
            message,
            partial_addresses: partial,
            tx,
        }
    }

    /// Render as a single-line JSON object for the error stream.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"message\":{:?}}}", self.message))
    }
}
