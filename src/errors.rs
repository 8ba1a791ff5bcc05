//! Error types for the wallet core
//!
//! Every failure the core can surface is a [`WalletError`] variant. Each variant
//! maps to a stable code, a category and an HTTP-like status so that outer
//! surfaces can render it as an [`ErrorResponse`] without leaking the cause chain.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the crate
pub type WalletResult<T> = Result<T, WalletError>;

/// Broad classification of an error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Validation,
    Conflict,
    Integration,
    System,
}

/// All errors produced by the wallet core
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    // === Outline validation ===
    #[error("transaction outline requires a specification")]
    TxOutlineSpecificationRequired,

    #[error("cannot create transaction outline without knowledge about user ID")]
    TxOutlineSpecificationUserIdRequired,

    #[error("transaction outline requires at least one output")]
    TxOutlineRequiresAtLeastOneOutput,

    #[error("data is required for OP_RETURN output")]
    OpReturnDataRequired,

    #[error("OP_RETURN data is too large: {size} bytes")]
    OpReturnDataTooLarge { size: usize },

    #[error("unsupported data type for OP_RETURN output: {0}")]
    OpReturnUnsupportedDataType(String),

    #[error("failed to decode hex: {0}")]
    FailedToDecodeHex(String),

    #[error("receiver paymail address is invalid: {0}")]
    ReceiverPaymailAddressIsInvalid(String),

    #[error("sender paymail address is invalid: {0}")]
    SenderPaymailAddressIsInvalid(String),

    #[error("cannot choose paymail address of the sender")]
    TxOutlineSenderPaymailAddressNoDefault,

    #[error("output value is too low")]
    OutputValueTooLow,

    #[error("not enough funds to make the transaction")]
    TxOutlineInsufficientFunds,

    // === User registration ===
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    // === Recording validation ===
    #[error("no operations to save")]
    NoOperations,

    #[error("paymail transaction with multiple recipients is not supported")]
    MultiPaymailRecipientsNotSupported,

    #[error("annotation index {index} is out of range for {outputs} outputs")]
    AnnotationIndexOutOfRange { index: u32, outputs: usize },

    // === Conflicts ===
    #[error("UTXO is already spent")]
    UtxoSpent,

    #[error("paymail already exists: {0}")]
    PaymailAlreadyExists(String),

    // === Integrations ===
    #[error("paymail host responded with error: {0}")]
    PaymailHostResponseError(String),

    #[error("paymail host {0} does not support P2P payment destinations")]
    PaymailHostNotSupportingP2P(String),

    #[error("paymail host returned invalid response: {0}")]
    PaymailHostInvalidResponse(String),

    #[error("failed to broadcast transaction: {0}")]
    TxBroadcast(String),

    // === System ===
    #[error("transaction validation failed: {0}")]
    TxValidation(String),

    #[error("failed to parse script: {0}")]
    ParsingScript(String),

    #[error("only PUSHDATA operations are allowed in OP_RETURN script")]
    OnlyPushDataAllowed,

    #[error("failed to save data: {0}")]
    SavingData(String),

    #[error("failed to get outputs: {0}")]
    GettingOutputs(String),

    #[error("failed to get addresses: {0}")]
    GettingAddresses(String),

    #[error("unexpected error during inputs selection: {0}")]
    UnexpectedErrorDuringInputsSelection(String),

    #[error("transaction query result for {0} must be either BEEF or raw transaction, not both")]
    MutuallyExclusiveTxQueryResult(String),

    #[error("request cancelled: {0}")]
    RequestCancelled(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("bucket {0} cannot hold spendable outputs")]
    ForbiddenBucket(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl WalletError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::TxOutlineSpecificationRequired => "tx-spec-spec-required",
            Self::TxOutlineSpecificationUserIdRequired => "tx-spec-spec-user-id-required",
            Self::TxOutlineRequiresAtLeastOneOutput => "tx-spec-output-required",
            Self::OpReturnDataRequired => "tx-spec-op-return-data-required",
            Self::OpReturnDataTooLarge { .. } => "tx-spec-op-return-data-too-large",
            Self::OpReturnUnsupportedDataType(_) => "tx-spec-op-return-data-type-unsupported",
            Self::FailedToDecodeHex(_) => "failed-to-decode-hex",
            Self::ReceiverPaymailAddressIsInvalid(_) => "error-paymail-address-invalid-receiver",
            Self::SenderPaymailAddressIsInvalid(_) => "error-paymail-address-invalid-sender",
            Self::TxOutlineSenderPaymailAddressNoDefault => {
                "error-tx-spec-paymail-address-no-default"
            }
            Self::OutputValueTooLow => "error-transaction-output-value-too-low",
            Self::InvalidPublicKey(_) => "error-user-invalid-pubkey",
            Self::InvalidAddress(_) => "error-user-invalid-address",
            Self::TxOutlineInsufficientFunds => "tx-outline-not-enough-funds",
            Self::NoOperations => "error-no-operations",
            Self::MultiPaymailRecipientsNotSupported => "error-multi-paymail-recipients",
            Self::AnnotationIndexOutOfRange { .. } => "error-annotation-index-out-of-range",
            Self::UtxoSpent => "error-utxo-spent",
            Self::PaymailAlreadyExists(_) => "error-paymail-already-exists",
            Self::PaymailHostResponseError(_) => "error-paymail-host-response",
            Self::PaymailHostNotSupportingP2P(_) => "error-paymail-host-not-supporting-p2p",
            Self::PaymailHostInvalidResponse(_) => "error-paymail-host-invalid-response",
            Self::TxBroadcast(_) => "error-tx-broadcast",
            Self::TxValidation(_) => "error-transaction-validation",
            Self::ParsingScript(_) => "error-parsing-script",
            Self::OnlyPushDataAllowed => "error-only-push-data-allowed",
            Self::SavingData(_) => "error-saving-data",
            Self::GettingOutputs(_) => "error-getting-outputs",
            Self::GettingAddresses(_) => "error-getting-addresses",
            Self::UnexpectedErrorDuringInputsSelection(_) => "error-input-selection",
            Self::MutuallyExclusiveTxQueryResult(_) => "error-tx-query-result-mutually-exclusive",
            Self::RequestCancelled(_) => "error-request-cancelled",
            Self::InvalidConfig(_) => "error-invalid-config",
            Self::StorageError(_) => "error-storage",
            Self::ForbiddenBucket(_) => "error-forbidden-bucket",
            Self::Unexpected(_) => "error-unexpected",
        }
    }

    /// Category of the error kind
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TxOutlineSpecificationRequired
            | Self::TxOutlineSpecificationUserIdRequired
            | Self::TxOutlineRequiresAtLeastOneOutput
            | Self::OpReturnDataRequired
            | Self::OpReturnDataTooLarge { .. }
            | Self::OpReturnUnsupportedDataType(_)
            | Self::FailedToDecodeHex(_)
            | Self::ReceiverPaymailAddressIsInvalid(_)
            | Self::SenderPaymailAddressIsInvalid(_)
            | Self::TxOutlineSenderPaymailAddressNoDefault
            | Self::OutputValueTooLow
            | Self::TxOutlineInsufficientFunds
            | Self::InvalidPublicKey(_)
            | Self::InvalidAddress(_)
            | Self::NoOperations
            | Self::MultiPaymailRecipientsNotSupported
            | Self::AnnotationIndexOutOfRange { .. }
            | Self::RequestCancelled(_) => ErrorCategory::Validation,
            Self::UtxoSpent | Self::PaymailAlreadyExists(_) => ErrorCategory::Conflict,
            Self::PaymailHostResponseError(_)
            | Self::PaymailHostNotSupportingP2P(_)
            | Self::PaymailHostInvalidResponse(_)
            | Self::TxBroadcast(_) => ErrorCategory::Integration,
            Self::TxValidation(_)
            | Self::ParsingScript(_)
            | Self::OnlyPushDataAllowed
            | Self::SavingData(_)
            | Self::GettingOutputs(_)
            | Self::GettingAddresses(_)
            | Self::UnexpectedErrorDuringInputsSelection(_)
            | Self::MutuallyExclusiveTxQueryResult(_)
            | Self::InvalidConfig(_)
            | Self::StorageError(_)
            | Self::ForbiddenBucket(_)
            | Self::Unexpected(_) => ErrorCategory::System,
        }
    }

    /// HTTP-like status code for outer surfaces
    pub fn status(&self) -> u16 {
        match self {
            Self::TxOutlineInsufficientFunds => 422,
            Self::PaymailAlreadyExists(_) | Self::UtxoSpent => 409,
            Self::RequestCancelled(_) => 408,
            _ => match self.category() {
                ErrorCategory::Validation => 400,
                ErrorCategory::Conflict => 409,
                ErrorCategory::Integration | ErrorCategory::System => 500,
            },
        }
    }

    /// Message without the wrapped cause, safe to show to clients
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::TxOutlineSpecificationRequired => "transaction outline requires a specification",
            Self::TxOutlineSpecificationUserIdRequired => {
                "cannot create transaction outline without knowledge about user ID"
            }
            Self::TxOutlineRequiresAtLeastOneOutput => {
                "transaction outline requires at least one output"
            }
            Self::OpReturnDataRequired => "data is required for OP_RETURN output",
            Self::OpReturnDataTooLarge { .. } => "OP_RETURN data is too large",
            Self::OpReturnUnsupportedDataType(_) => "unsupported data type for OP_RETURN output",
            Self::FailedToDecodeHex(_) => "failed to decode hex",
            Self::ReceiverPaymailAddressIsInvalid(_) => "receiver paymail address is invalid",
            Self::SenderPaymailAddressIsInvalid(_) => "sender paymail address is invalid",
            Self::TxOutlineSenderPaymailAddressNoDefault => {
                "cannot choose paymail address of the sender"
            }
            Self::OutputValueTooLow => "output value is too low",
            Self::InvalidPublicKey(_) => "invalid public key",
            Self::InvalidAddress(_) => "invalid address",
            Self::TxOutlineInsufficientFunds => "not enough funds to make the transaction",
            Self::NoOperations => "no operations to save",
            Self::MultiPaymailRecipientsNotSupported => {
                "paymail transaction with multiple recipients is not supported"
            }
            Self::AnnotationIndexOutOfRange { .. } => "annotation index is out of range",
            Self::UtxoSpent => "UTXO is already spent",
            Self::PaymailAlreadyExists(_) => "paymail already exists",
            Self::PaymailHostResponseError(_) => "paymail host responded with error",
            Self::PaymailHostNotSupportingP2P(_) => {
                "paymail host does not support P2P payment destinations"
            }
            Self::PaymailHostInvalidResponse(_) => "paymail host returned invalid response",
            Self::TxBroadcast(_) => "failed to broadcast transaction",
            Self::TxValidation(_) => "transaction validation failed",
            Self::ParsingScript(_) => "failed to parse script",
            Self::OnlyPushDataAllowed => "only PUSHDATA operations are allowed in OP_RETURN script",
            Self::SavingData(_) => "failed to save data",
            Self::GettingOutputs(_) => "failed to get outputs",
            Self::GettingAddresses(_) => "failed to get addresses",
            Self::UnexpectedErrorDuringInputsSelection(_) => {
                "unexpected error during inputs selection"
            }
            Self::MutuallyExclusiveTxQueryResult(_) => {
                "transaction query result must be either BEEF or raw transaction, not both"
            }
            Self::RequestCancelled(_) => "request cancelled",
            Self::InvalidConfig(_) => "invalid configuration",
            Self::StorageError(_) => "storage error",
            Self::ForbiddenBucket(_) => "storage error",
            Self::Unexpected(_) => "unexpected error",
        }
    }

    /// Render the client-facing response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            message: self.public_message().to_string(),
            status: self.status(),
        }
    }
}

impl From<hex::FromHexError> for WalletError {
    fn from(err: hex::FromHexError) -> Self {
        WalletError::FailedToDecodeHex(err.to_string())
    }
}

/// Client-facing error rendering, never carries the cause chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub status: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_hides_cause() {
        let err = WalletError::SavingData("disk I/O error at page 42".to_string());
        let response = err.to_response();
        assert_eq!(response.code, "error-saving-data");
        assert_eq!(response.status, 500);
        assert!(!response.message.contains("page 42"));
        assert!(err.to_string().contains("page 42"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(WalletError::UtxoSpent.category(), ErrorCategory::Conflict);
        assert_eq!(WalletError::NoOperations.category(), ErrorCategory::Validation);
        assert_eq!(
            WalletError::InvalidPublicKey("bad length".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            WalletError::TxBroadcast("timeout".into()).category(),
            ErrorCategory::Integration
        );
        assert_eq!(
            WalletError::OnlyPushDataAllowed.category(),
            ErrorCategory::System
        );
        assert_eq!(WalletError::TxOutlineInsufficientFunds.status(), 422);
        assert_eq!(WalletError::OutputValueTooLow.status(), 400);
    }
}
