//! Message + token transport
//!
//! [`Transport`] is the seam the sender talks to: quote a fee for an exact
//! payload and token batch, then submit. [`LocalTransport`] is an in-process
//! implementation with per-lane fee schedules, burn/mint token routes, a
//! pending queue that can be drained in any order, at-least-once redelivery
//! and manual re-execution of failed messages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tracing::{info, warn};

use crate::ledger::TokenLedger;
use crate::network::DestinationDomain;
use crate::receiver::Delivery;
use crate::{Address, Amount, DomainSelector, DonationError, MessageId, TokenAmount, TransportMessage};

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT SEAM
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything the transport needs to carry one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub destination: DomainSelector,
    /// Receiver contract on the destination domain
    pub receiver: Address,
    /// Encoded envelope
    pub payload: Vec<u8>,
    /// Source-domain token batch, drawn from the submitting contract
    pub tokens: Vec<TokenAmount>,
    pub fee_token: Address,
    /// Fee the submitter commits to pay
    pub fee: Amount,
    /// Account the fee is drawn from
    pub fee_payer: Address,
}

/// Source-side interface of a message + token transport.
pub trait Transport {
    /// Domain this transport sends from.
    fn source_domain(&self) -> DomainSelector;

    /// Principal that draws tokens on submit and invokes receivers on delivery.
    fn router(&self) -> Address;

    /// Current price to carry this exact payload and token batch.
    fn quote(
        &self,
        destination: DomainSelector,
        payload: &[u8],
        tokens: &[TokenAmount],
    ) -> Result<Amount, DonationError>;

    /// Take custody of the token batch and fee, and enqueue the message.
    fn submit(
        &mut self,
        ledger: &mut TokenLedger,
        sender: Address,
        request: SubmitRequest,
    ) -> Result<MessageId, DonationError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEES
// ═══════════════════════════════════════════════════════════════════════════════

/// Linear fee model for one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub base_fee: Amount,
    pub fee_per_payload_byte: Amount,
    pub fee_per_token: Amount,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            base_fee: 200_000,
            fee_per_payload_byte: 16,
            fee_per_token: 100_000,
        }
    }
}

impl FeeSchedule {
    pub fn fee_for(&self, payload_len: usize, token_count: usize) -> Result<Amount, DonationError> {
        let bytes = self
            .fee_per_payload_byte
            .checked_mul(payload_len as Amount)
            .ok_or(DonationError::ArithmeticOverflow)?;
        let tokens = self
            .fee_per_token
            .checked_mul(token_count as Amount)
            .ok_or(DonationError::ArithmeticOverflow)?;
        self.base_fee
            .checked_add(bytes)
            .and_then(|f| f.checked_add(tokens))
            .ok_or(DonationError::ArithmeticOverflow)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MESSAGE TRACKING
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle of a message inside the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Accepted on the source domain, not yet executed on the destination
    Pending,
    /// Executed successfully on the destination
    Delivered,
    /// Destination execution reverted; waiting for manual execution
    Failed,
}

/// A message plus its delivery bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayedMessage {
    pub message: TransportMessage,
    pub status: MessageStatus,
    /// Destination execution attempts, including redeliveries
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Transport statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TransportStats {
    pub submitted: u64,
    pub delivered: u64,
    pub failed_attempts: u64,
    pub redeliveries: u64,
    pub fees_collected: Amount,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCAL TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// In-process transport connecting one source domain to its lanes.
#[derive(Debug)]
pub struct LocalTransport {
    source: DomainSelector,
    router: Address,
    fee_vault: Address,
    lanes: HashMap<DomainSelector, FeeSchedule>,
    /// (destination, source token) -> destination token
    token_routes: HashMap<(DomainSelector, Address), Address>,
    nonce: u64,
    order: Vec<MessageId>,
    messages: HashMap<MessageId, RelayedMessage>,
    stats: TransportStats,
}

impl LocalTransport {
    pub fn new(source: DomainSelector, router: Address, fee_vault: Address) -> Self {
        Self {
            source,
            router,
            fee_vault,
            lanes: HashMap::new(),
            token_routes: HashMap::new(),
            nonce: 0,
            order: Vec::new(),
            messages: HashMap::new(),
            stats: TransportStats::default(),
        }
    }

    /// Open (or reprice) the lane to `destination`.
    pub fn set_fee_schedule(&mut self, destination: DomainSelector, fees: FeeSchedule) -> &mut Self {
        self.lanes.insert(destination, fees);
        self
    }

    pub fn fee_schedule(&self, destination: DomainSelector) -> Option<&FeeSchedule> {
        self.lanes.get(&destination)
    }

    /// Route `source_token` to `destination_token` on `destination`.
    pub fn add_token_route(
        &mut self,
        destination: DomainSelector,
        source_token: Address,
        destination_token: Address,
    ) -> &mut Self {
        self.token_routes
            .insert((destination, source_token), destination_token);
        self
    }

    pub fn fee_vault(&self) -> Address {
        self.fee_vault
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn message(&self, id: &MessageId) -> Option<&RelayedMessage> {
        self.messages.get(id)
    }

    /// Ids of pending messages in submission order.
    pub fn pending(&self) -> Vec<MessageId> {
        self.with_status(MessageStatus::Pending)
    }

    /// Ids of failed messages in submission order.
    pub fn failed(&self) -> Vec<MessageId> {
        self.with_status(MessageStatus::Failed)
    }

    fn with_status(&self, status: MessageStatus) -> Vec<MessageId> {
        self.order
            .iter()
            .filter(|id| self.messages.get(id).map(|m| m.status) == Some(status))
            .copied()
            .collect()
    }

    /// Execute a pending message on the destination domain.
    pub fn deliver(
        &mut self,
        id: &MessageId,
        destination: &mut DestinationDomain,
    ) -> Result<Delivery, DonationError> {
        self.execute(id, destination, MessageStatus::Pending)
    }

    /// Deliver the oldest pending message, if any.
    pub fn deliver_next(
        &mut self,
        destination: &mut DestinationDomain,
    ) -> Option<Result<Delivery, DonationError>> {
        let id = self.pending().into_iter().next()?;
        Some(self.deliver(&id, destination))
    }

    /// Deliver every pending message in submission order.
    pub fn deliver_all(
        &mut self,
        destination: &mut DestinationDomain,
    ) -> Vec<(MessageId, Result<Delivery, DonationError>)> {
        self.pending()
            .into_iter()
            .map(|id| {
                let result = self.deliver(&id, destination);
                (id, result)
            })
            .collect()
    }

    /// Replay an already delivered message, as an at-least-once network may.
    pub fn redeliver(
        &mut self,
        id: &MessageId,
        destination: &mut DestinationDomain,
    ) -> Result<Delivery, DonationError> {
        self.execute(id, destination, MessageStatus::Delivered)
    }

    /// Retry a failed message after operator intervention.
    pub fn manually_execute(
        &mut self,
        id: &MessageId,
        destination: &mut DestinationDomain,
    ) -> Result<Delivery, DonationError> {
        self.execute(id, destination, MessageStatus::Failed)
    }

    fn execute(
        &mut self,
        id: &MessageId,
        destination: &mut DestinationDomain,
        expected: MessageStatus,
    ) -> Result<Delivery, DonationError> {
        let relayed = self
            .messages
            .get_mut(id)
            .ok_or(DonationError::MessageNotFound(*id))?;
        if relayed.status != expected {
            return Err(DonationError::InvalidMessageState(*id));
        }
        if expected == MessageStatus::Delivered {
            self.stats.redeliveries += 1;
        }

        relayed.attempts += 1;
        match destination.execute(self.router, &relayed.message) {
            Ok(delivery) => {
                if relayed.status != MessageStatus::Delivered {
                    self.stats.delivered += 1;
                }
                relayed.status = MessageStatus::Delivered;
                relayed.last_error = None;
                Ok(delivery)
            }
            Err(err) => {
                warn!(message_id = %id, error = %err, "destination execution reverted");
                if relayed.status == MessageStatus::Pending {
                    relayed.status = MessageStatus::Failed;
                }
                relayed.last_error = Some(err.to_string());
                self.stats.failed_attempts += 1;
                Err(err)
            }
        }
    }

    fn compute_message_id(&self, sender: Address, request: &SubmitRequest, nonce: u64) -> MessageId {
        let mut hasher = Keccak256::new();
        hasher.update(self.source.0.to_be_bytes());
        hasher.update(request.destination.0.to_be_bytes());
        hasher.update(sender.as_bytes());
        hasher.update(request.receiver.as_bytes());
        hasher.update(nonce.to_be_bytes());
        hasher.update(&request.payload);
        for entry in &request.tokens {
            hasher.update(entry.token.as_bytes());
            hasher.update(entry.amount.to_be_bytes());
        }
        MessageId(hasher.finalize().into())
    }
}

impl Transport for LocalTransport {
    fn source_domain(&self) -> DomainSelector {
        self.source
    }

    fn router(&self) -> Address {
        self.router
    }

    fn quote(
        &self,
        destination: DomainSelector,
        payload: &[u8],
        tokens: &[TokenAmount],
    ) -> Result<Amount, DonationError> {
        let fees = self
            .lanes
            .get(&destination)
            .ok_or(DonationError::UnsupportedDestination(destination))?;
        if let Some(entry) = tokens
            .iter()
            .find(|entry| !self.token_routes.contains_key(&(destination, entry.token)))
        {
            return Err(DonationError::UnsupportedToken(entry.token));
        }
        fees.fee_for(payload.len(), tokens.len())
    }

    fn submit(
        &mut self,
        ledger: &mut TokenLedger,
        sender: Address,
        request: SubmitRequest,
    ) -> Result<MessageId, DonationError> {
        let fee = self.quote(request.destination, &request.payload, &request.tokens)?;
        if request.fee < fee {
            return Err(DonationError::InsufficientFeeTokenAmount {
                fee,
                provided: request.fee,
            });
        }

        let delivered = request
            .tokens
            .iter()
            .map(|entry| {
                self.token_routes
                    .get(&(request.destination, entry.token))
                    .map(|token| TokenAmount::new(*token, entry.amount))
                    .ok_or(DonationError::UnsupportedToken(entry.token))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // All pulls commit together or not at all.
        let mut staged = ledger.clone();
        for entry in &request.tokens {
            staged.transfer_from(entry.token, self.router, sender, self.router, entry.amount)?;
            staged.burn(entry.token, self.router, entry.amount)?;
        }
        staged.transfer_from(
            request.fee_token,
            self.router,
            request.fee_payer,
            self.fee_vault,
            request.fee,
        )?;
        *ledger = staged;

        self.nonce += 1;
        let message_id = self.compute_message_id(sender, &request, self.nonce);
        let message = TransportMessage {
            message_id,
            source_domain: self.source,
            destination_domain: request.destination,
            sender,
            receiver: request.receiver,
            payload: request.payload,
            tokens: delivered,
        };

        self.order.push(message_id);
        self.messages.insert(
            message_id,
            RelayedMessage {
                message,
                status: MessageStatus::Pending,
                attempts: 0,
                last_error: None,
            },
        );
        self.stats.submitted += 1;
        self.stats.fees_collected = self
            .stats
            .fees_collected
            .checked_add(request.fee)
            .ok_or(DonationError::ArithmeticOverflow)?;

        info!(
            message_id = %message_id,
            destination = %request.destination,
            fee = request.fee,
            "message accepted by transport"
        );
        Ok(message_id)
    }
}
