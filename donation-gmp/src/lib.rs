//! donation-gmp
//!
//! Cross-chain donation protocol over general message passing. A donor
//! deposits tokens on a source domain, the transport relays a donation
//! envelope together with the tokens, and the destination-side receiver
//! forwards the funds to a treasury while minting a badge to the donor.
//!
//! The crate keeps each domain as a single-writer state machine: every
//! mutating operation takes `&mut self`. The receiver settles
//! all-or-nothing, keyed by message id. The sender commits step by step, so
//! a failure after the custody pull leaves stranded tokens to refund.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;

pub mod badge;
pub mod chains;
pub mod encoding;
pub mod events;
pub mod guard;
pub mod ledger;
pub mod network;
pub mod receiver;
pub mod sender;
pub mod transport;

pub use badge::{Badge, BadgeMetadata, BadgeRegistry, BaseUriMetadata, MintAuthority};
pub use events::DonationEvent;
pub use guard::{FeeGuard, GuardConfig, Preflight};
pub use ledger::TokenLedger;
pub use network::{DestinationDomain, DonationNetwork, NetworkConfig, Side, SourceDomain};
pub use receiver::{Delivery, DonationReceiver, SettlementRecord, SettlementStage};
pub use sender::{DonationRequest, DonationSender, StrandedCustody};
pub use transport::{FeeSchedule, LocalTransport, MessageStatus, SubmitRequest, Transport};

/// Rail identifier for the donation GMP rail
pub const RAIL_ID_DONATION_GMP: &str = "DONATION_GMP";

/// Token amounts use the low 128 bits of a uint256.
pub type Amount = u128;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum DonationError {
    #[error("donation amount must be greater than zero")]
    InvalidAmount,

    #[error("insufficient token balance: required {required}, available {available}")]
    InsufficientTokenBalance { required: Amount, available: Amount },

    #[error("insufficient allowance: required {required}, approved {available}")]
    InsufficientAllowance { required: Amount, available: Amount },

    #[error("insufficient fee balance: required {required} (with margin), available {available}")]
    InsufficientFee { required: Amount, available: Amount },

    #[error("insufficient fee token amount: quoted {fee}, provided {provided}")]
    InsufficientFeeTokenAmount { fee: Amount, provided: Amount },

    #[error("invalid treasury address")]
    InvalidTreasury,

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("unauthorized router: {0}")]
    UnauthorizedRouter(Address),

    #[error("unauthorized caller: {0}")]
    Unauthorized(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("unsupported destination domain: {0}")]
    UnsupportedDestination(DomainSelector),

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("unsupported token: {0}")]
    UnsupportedToken(Address),

    #[error("badge not found: {0}")]
    BadgeNotFound(u64),

    #[error("message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("message {0} cannot be executed in its current state")]
    InvalidMessageState(MessageId),

    #[error("no stranded custody for donor {donor} and token {token}")]
    NothingToRefund { donor: Address, token: Address },

    #[error("invalid badge owner: {0}")]
    InvalidBadgeOwner(Address),

    #[error("badge id space exhausted")]
    BadgeIdOverflow,

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error taxonomy used for propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Detected before any durable side effect; safe to retry with corrected inputs.
    Precondition,
    /// Owned by the transport layer.
    Transport,
    /// Destination-side settlement aborted atomically; needs intervention.
    Settlement,
    /// Caller lacks the capability; rejected with no state change.
    Authorization,
    /// Malformed payload.
    Decoding,
    /// Lookup miss.
    NotFound,
}

impl DonationError {
    /// Get a machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            DonationError::InvalidAmount => "INVALID_AMOUNT",
            DonationError::InsufficientTokenBalance { .. } => "INSUFFICIENT_TOKEN_BALANCE",
            DonationError::InsufficientAllowance { .. } => "INSUFFICIENT_ALLOWANCE",
            DonationError::InsufficientFee { .. } => "INSUFFICIENT_FEE",
            DonationError::InsufficientFeeTokenAmount { .. } => "INSUFFICIENT_FEE_TOKEN_AMOUNT",
            DonationError::InvalidTreasury => "INVALID_TREASURY",
            DonationError::TransferFailed(_) => "TRANSFER_FAILED",
            DonationError::UnauthorizedRouter(_) => "UNAUTHORIZED_ROUTER",
            DonationError::Unauthorized(_) => "UNAUTHORIZED",
            DonationError::Decoding(_) => "DECODING_ERROR",
            DonationError::UnsupportedDestination(_) => "UNSUPPORTED_DESTINATION",
            DonationError::UnknownChain(_) => "UNKNOWN_CHAIN",
            DonationError::UnsupportedToken(_) => "UNSUPPORTED_TOKEN",
            DonationError::BadgeNotFound(_) => "BADGE_NOT_FOUND",
            DonationError::MessageNotFound(_) => "MESSAGE_NOT_FOUND",
            DonationError::InvalidMessageState(_) => "INVALID_MESSAGE_STATE",
            DonationError::NothingToRefund { .. } => "NOTHING_TO_REFUND",
            DonationError::InvalidBadgeOwner(_) => "INVALID_BADGE_OWNER",
            DonationError::BadgeIdOverflow => "BADGE_ID_OVERFLOW",
            DonationError::ArithmeticOverflow => "ARITHMETIC_OVERFLOW",
            DonationError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Classify the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            DonationError::InvalidAmount
            | DonationError::InsufficientTokenBalance { .. }
            | DonationError::InsufficientAllowance { .. }
            | DonationError::InsufficientFee { .. }
            | DonationError::InsufficientFeeTokenAmount { .. }
            | DonationError::InvalidTreasury
            | DonationError::UnknownChain(_)
            | DonationError::NothingToRefund { .. } => ErrorClass::Precondition,
            DonationError::UnsupportedDestination(_)
            | DonationError::UnsupportedToken(_)
            | DonationError::InvalidMessageState(_) => ErrorClass::Transport,
            DonationError::TransferFailed(_)
            | DonationError::InvalidBadgeOwner(_)
            | DonationError::BadgeIdOverflow
            | DonationError::ArithmeticOverflow => ErrorClass::Settlement,
            DonationError::UnauthorizedRouter(_) | DonationError::Unauthorized(_) => {
                ErrorClass::Authorization
            }
            DonationError::Decoding(_) | DonationError::Serialization(_) => ErrorClass::Decoding,
            DonationError::BadgeNotFound(_) | DonationError::MessageNotFound(_) => {
                ErrorClass::NotFound
            }
        }
    }

    /// Precondition failures can be retried once the inputs are corrected.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Precondition
    }

    /// Get HTTP status code suggestion.
    pub fn suggested_status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::Precondition => 400,
            ErrorClass::Decoding => 400,
            ErrorClass::Authorization => 403,
            ErrorClass::NotFound => 404,
            ErrorClass::Transport => 422,
            ErrorClass::Settlement => 500,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// 20-byte account or contract address on either domain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The null address. Never a valid treasury or badge owner.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Derive a deterministic address from a label (keccak256, last 20 bytes).
    pub fn from_label(label: &str) -> Self {
        let digest: [u8; 32] = Keccak256::digest(label.as_bytes()).into();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = DonationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| DonationError::Decoding(e.to_string()))?;
        if bytes.len() != 20 {
            return Err(DonationError::Decoding(format!(
                "expected 20-byte address, got {} bytes",
                bytes.len()
            )));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl TryFrom<String> for Address {
    type Error = DonationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Numeric selector identifying a domain (chain) to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainSelector(pub u64);

impl fmt::Display for DomainSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque message identifier assigned by the transport. Idempotency key for
/// the whole destination-side pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MessageId(pub [u8; 32]);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", encoding::bytes32_to_hex(&self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self)
    }
}

impl FromStr for MessageId {
    type Err = DonationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        encoding::hex_to_bytes32(s).map(MessageId)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for MessageId {
    type Error = DonationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DATA MODEL
// ═══════════════════════════════════════════════════════════════════════════════

/// One entry of a transport token batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    /// Token contract on the domain the batch lives on
    pub token: Address,
    pub amount: Amount,
}

impl TokenAmount {
    pub fn new(token: Address, amount: Amount) -> Self {
        Self { token, amount }
    }
}

/// Donation payload carried alongside the token transfer. Immutable once
/// submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationEnvelope {
    /// Account that made the donation on the source domain
    pub donor: Address,
    /// Free-text campaign identifier
    pub campaign_id: String,
    /// Gross donated amount (always > 0)
    pub amount: Amount,
    /// Token locator on the source domain
    pub token: Address,
}

impl DonationEnvelope {
    /// Build an envelope, rejecting zero amounts.
    pub fn new(
        donor: Address,
        campaign_id: impl Into<String>,
        amount: Amount,
        token: Address,
    ) -> Result<Self, DonationError> {
        if amount == 0 {
            return Err(DonationError::InvalidAmount);
        }
        Ok(Self {
            donor,
            campaign_id: campaign_id.into(),
            amount,
            token,
        })
    }

    /// ABI-encode the envelope for transport.
    pub fn encode(&self) -> Vec<u8> {
        encoding::encode_envelope(self)
    }

    /// Decode an envelope from its ABI bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DonationError> {
        encoding::decode_envelope(bytes)
    }
}

/// Message as carried by the transport and handed to the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    pub message_id: MessageId,
    pub source_domain: DomainSelector,
    pub destination_domain: DomainSelector,
    /// Sender contract on the source domain
    pub sender: Address,
    /// Receiver contract on the destination domain
    pub receiver: Address,
    /// Byte-for-byte envelope
    pub payload: Vec<u8>,
    /// Delivered token batch (destination-domain token locators)
    pub tokens: Vec<TokenAmount>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_and_display() {
        let addr = Address::from_label("alice");
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
        assert!(!addr.is_zero());
        assert!(Address::ZERO.is_zero());

        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzz".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_serde_as_hex_string() {
        let addr = Address::from_label("treasury");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_envelope_rejects_zero_amount() {
        let err = DonationEnvelope::new(Address::from_label("alice"), "c1", 0, Address::ZERO)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_AMOUNT");
    }

    #[test]
    fn test_error_taxonomy() {
        let fee = DonationError::InsufficientFeeTokenAmount { fee: 10, provided: 5 };
        assert_eq!(fee.class(), ErrorClass::Precondition);
        assert!(fee.is_retryable());

        let transfer = DonationError::TransferFailed("blocked".into());
        assert_eq!(transfer.class(), ErrorClass::Settlement);
        assert!(!transfer.is_retryable());
        assert_eq!(transfer.suggested_status_code(), 500);

        let router = DonationError::UnauthorizedRouter(Address::from_label("mallory"));
        assert_eq!(router.class(), ErrorClass::Authorization);
        assert_eq!(router.suggested_status_code(), 403);

        assert_eq!(DonationError::BadgeNotFound(7).suggested_status_code(), 404);
    }
}
