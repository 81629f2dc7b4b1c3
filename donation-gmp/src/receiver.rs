//! Destination-side donation receiver
//!
//! Settles each delivered message exactly once:
//! `Arrived -> Decoded -> TokensForwarded -> BadgeMinted -> Settled`.
//! Any failure aborts the whole settlement with no state change; there is
//! no retry inside the receiver. A message id that has already settled is
//! answered with the original record and touches nothing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::badge::{BadgeRegistry, MintAuthority};
use crate::events::DonationEvent;
use crate::ledger::TokenLedger;
use crate::{Address, Amount, DomainSelector, DonationEnvelope, DonationError, MessageId, TransportMessage};

/// Settlement state machine stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStage {
    Arrived,
    Decoded,
    TokensForwarded,
    BadgeMinted,
    Settled,
}

/// One per successfully processed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub message_id: MessageId,
    pub source_domain: DomainSelector,
    pub donor: Address,
    /// Destination-domain token forwarded to the treasury
    pub token: Address,
    pub amount: Amount,
    pub campaign_id: String,
    pub badge_id: u64,
    /// Treasury the funds went to
    pub treasury: Address,
}

/// Outcome of a delivery callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// First delivery: tokens forwarded and badge minted
    Settled(SettlementRecord),
    /// Redelivery of a settled message: nothing happened
    Duplicate(SettlementRecord),
}

impl Delivery {
    pub fn record(&self) -> &SettlementRecord {
        match self {
            Delivery::Settled(record) | Delivery::Duplicate(record) => record,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Delivery::Duplicate(_))
    }
}

#[derive(Debug)]
pub struct DonationReceiver {
    address: Address,
    owner: Address,
    /// Only principal allowed to invoke `on_deliver`
    router: Address,
    treasury: Address,
    badges: BadgeRegistry,
    mint_authority: MintAuthority,
    processed: HashMap<MessageId, SettlementRecord>,
    order: Vec<MessageId>,
    events: Vec<DonationEvent>,
}

impl DonationReceiver {
    /// Deploy a receiver. The registry's mint authority moves into the
    /// receiver for good.
    pub fn deploy(
        address: Address,
        owner: Address,
        router: Address,
        treasury: Address,
        badges: BadgeRegistry,
        mint_authority: MintAuthority,
    ) -> Result<Self, DonationError> {
        if treasury.is_zero() {
            return Err(DonationError::InvalidTreasury);
        }
        if mint_authority.registry() != badges.address() {
            return Err(DonationError::Unauthorized(format!(
                "mint authority for {} does not match registry {}",
                mint_authority.registry(),
                badges.address()
            )));
        }
        Ok(Self {
            address,
            owner,
            router,
            treasury,
            badges,
            mint_authority,
            processed: HashMap::new(),
            order: Vec::new(),
            events: Vec::new(),
        })
    }

    /// Delivery callback. `caller` must be the configured router.
    pub fn on_deliver(
        &mut self,
        caller: Address,
        ledger: &mut TokenLedger,
        message: &TransportMessage,
    ) -> Result<Delivery, DonationError> {
        let id = message.message_id;
        if caller != self.router {
            warn!(message_id = %id, %caller, "delivery from unauthorized caller rejected");
            return Err(DonationError::UnauthorizedRouter(caller));
        }
        if message.receiver != self.address {
            return Err(DonationError::Unauthorized(format!(
                "message {} addressed to {}, not {}",
                id, message.receiver, self.address
            )));
        }
        if let Some(record) = self.processed.get(&id) {
            debug!(message_id = %id, badge_id = record.badge_id, "duplicate delivery ignored");
            return Ok(Delivery::Duplicate(record.clone()));
        }
        stage(&id, SettlementStage::Arrived);

        let envelope = DonationEnvelope::decode(&message.payload)?;
        let delivered = match message.tokens.as_slice() {
            [single] => *single,
            other => {
                return Err(DonationError::Decoding(format!(
                    "expected exactly one delivered token, got {}",
                    other.len()
                )))
            }
        };
        if delivered.amount != envelope.amount {
            warn!(
                message_id = %id,
                envelope_amount = envelope.amount,
                delivered_amount = delivered.amount,
                "delivered amount differs from envelope; forwarding delivered amount"
            );
        }
        stage(&id, SettlementStage::Decoded);

        // The mint must not be able to fail once funds have moved.
        self.badges.check_mint(envelope.donor)?;

        ledger
            .transfer(delivered.token, self.address, self.treasury, delivered.amount)
            .map_err(|err| match err {
                DonationError::TransferFailed(_) => err,
                other => DonationError::TransferFailed(other.to_string()),
            })?;
        stage(&id, SettlementStage::TokensForwarded);

        let badge_id = self.badges.mint_badge(
            &self.mint_authority,
            envelope.donor,
            delivered.amount,
            &envelope.campaign_id,
        )?;
        stage(&id, SettlementStage::BadgeMinted);

        let record = SettlementRecord {
            message_id: id,
            source_domain: message.source_domain,
            donor: envelope.donor,
            token: delivered.token,
            amount: delivered.amount,
            campaign_id: envelope.campaign_id,
            badge_id,
            treasury: self.treasury,
        };
        self.processed.insert(id, record.clone());
        self.order.push(id);
        self.events.push(DonationEvent::DonationReceived {
            message_id: id,
            donor: record.donor,
            token: record.token,
            amount: record.amount,
            campaign_id: record.campaign_id.clone(),
            badge_id,
        });
        info!(
            message_id = %id,
            donor = %record.donor,
            token = %record.token,
            amount = record.amount,
            campaign_id = %record.campaign_id,
            badge_id,
            "donation received"
        );
        stage(&id, SettlementStage::Settled);

        Ok(Delivery::Settled(record))
    }

    /// Owner-only. Applies to settlements processed after the call.
    pub fn set_treasury(&mut self, caller: Address, treasury: Address) -> Result<(), DonationError> {
        self.require_owner(caller)?;
        if treasury.is_zero() {
            return Err(DonationError::InvalidTreasury);
        }
        let previous = self.treasury;
        self.treasury = treasury;
        self.events.push(DonationEvent::TreasuryUpdated {
            previous,
            current: treasury,
        });
        info!(%previous, current = %treasury, "treasury updated");
        Ok(())
    }

    pub fn transfer_ownership(&mut self, caller: Address, new_owner: Address) -> Result<(), DonationError> {
        self.require_owner(caller)?;
        if new_owner.is_zero() {
            return Err(DonationError::Unauthorized("new owner is the zero address".into()));
        }
        self.owner = new_owner;
        Ok(())
    }

    /// Badge transfer on behalf of its holder.
    pub fn transfer_badge(&mut self, caller: Address, badge_id: u64, to: Address) -> Result<(), DonationError> {
        self.badges.transfer(caller, badge_id, to)
    }

    fn require_owner(&self, caller: Address) -> Result<(), DonationError> {
        if caller != self.owner {
            return Err(DonationError::Unauthorized(format!(
                "{} is not the receiver owner",
                caller
            )));
        }
        Ok(())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn router(&self) -> Address {
        self.router
    }

    pub fn treasury(&self) -> Address {
        self.treasury
    }

    pub fn badges(&self) -> &BadgeRegistry {
        &self.badges
    }

    pub fn is_processed(&self, id: &MessageId) -> bool {
        self.processed.contains_key(id)
    }

    pub fn settlement(&self, id: &MessageId) -> Option<&SettlementRecord> {
        self.processed.get(id)
    }

    /// Settlement records in processing order.
    pub fn settlements(&self) -> Vec<&SettlementRecord> {
        self.order
            .iter()
            .filter_map(|id| self.processed.get(id))
            .collect()
    }

    pub fn events(&self) -> &[DonationEvent] {
        &self.events
    }
}

fn stage(id: &MessageId, stage: SettlementStage) {
    debug!(message_id = %id, ?stage, "settlement stage");
}
