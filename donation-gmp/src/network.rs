//! Two-domain donation pipeline
//!
//! Wires a source domain (ledger + sender), the local transport and a
//! destination domain (ledger + receiver + badge registry) into one
//! in-process network. Each domain is only ever mutated through `&mut`,
//! which gives the single-writer serialization both ledgers assume.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::badge::{BadgeRegistry, BaseUriMetadata};
use crate::chains::{self, ChainInfo, NATIVE_FEE_TOKEN};
use crate::guard::{FeeGuard, GuardConfig, Preflight};
use crate::ledger::TokenLedger;
use crate::receiver::{Delivery, DonationReceiver};
use crate::sender::{DonationRequest, DonationSender};
use crate::transport::{FeeSchedule, LocalTransport};
use crate::{
    Address, Amount, DomainSelector, DonationEnvelope, DonationError, MessageId, TokenAmount,
    TransportMessage,
};

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Deployment parameters for one source/destination pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub source_chain: String,
    pub destination_chain: String,
    /// Donated token on the source domain
    pub source_token: Address,
    /// Its bridged counterpart on the destination domain
    pub destination_token: Address,
    /// Transport principal on both domains
    pub router: Address,
    pub fee_vault: Address,
    pub sender: Address,
    pub receiver: Address,
    /// Administrative owner of the receiver
    pub receiver_owner: Address,
    pub badge_registry: Address,
    pub treasury: Address,
    pub fee_schedule: FeeSchedule,
    pub guard: GuardConfig,
    pub badge_base_uri: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            source_chain: chains::ETHEREUM_SEPOLIA.to_string(),
            destination_chain: chains::AVALANCHE_FUJI.to_string(),
            source_token: Address::from_label("token:source"),
            destination_token: Address::from_label("token:destination"),
            router: Address::from_label("transport:router"),
            fee_vault: Address::from_label("transport:fee-vault"),
            sender: Address::from_label("donation:sender"),
            receiver: Address::from_label("donation:receiver"),
            receiver_owner: Address::from_label("donation:owner"),
            badge_registry: Address::from_label("donation:badge"),
            treasury: Address::from_label("donation:treasury"),
            fee_schedule: FeeSchedule::default(),
            guard: GuardConfig::default(),
            badge_base_uri: "ipfs://donor-badge/".to_string(),
        }
    }
}

/// Which side of the network a ledger operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Destination => write!(f, "destination"),
        }
    }
}

impl FromStr for Side {
    type Err = DonationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Side::Source),
            "destination" => Ok(Side::Destination),
            other => Err(DonationError::Decoding(format!("unknown domain side: {}", other))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAINS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct SourceDomain {
    pub chain: ChainInfo,
    pub ledger: TokenLedger,
    pub sender: DonationSender,
}

impl SourceDomain {
    pub fn selector(&self) -> DomainSelector {
        self.chain.selector
    }
}

#[derive(Debug)]
pub struct DestinationDomain {
    pub chain: ChainInfo,
    pub ledger: TokenLedger,
    pub receiver: DonationReceiver,
}

impl DestinationDomain {
    pub fn selector(&self) -> DomainSelector {
        self.chain.selector
    }

    /// Release the delivered tokens to the addressed receiver and run its
    /// callback as one transaction. On error, and on a duplicate delivery,
    /// the release is undone.
    pub fn execute(
        &mut self,
        caller: Address,
        message: &TransportMessage,
    ) -> Result<Delivery, DonationError> {
        if message.destination_domain != self.selector() {
            return Err(DonationError::UnsupportedDestination(message.destination_domain));
        }

        let snapshot = self.ledger.clone();
        let result = self.release_and_deliver(caller, message);
        match &result {
            Ok(Delivery::Settled(_)) => {}
            Ok(Delivery::Duplicate(_)) | Err(_) => self.ledger = snapshot,
        }
        result
    }

    fn release_and_deliver(
        &mut self,
        caller: Address,
        message: &TransportMessage,
    ) -> Result<Delivery, DonationError> {
        for entry in &message.tokens {
            self.ledger.mint(entry.token, message.receiver, entry.amount)?;
        }
        self.receiver.on_deliver(caller, &mut self.ledger, message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NETWORK
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct DonationNetwork {
    config: NetworkConfig,
    guard: FeeGuard,
    source: SourceDomain,
    transport: LocalTransport,
    destination: DestinationDomain,
}

impl DonationNetwork {
    /// Deploy both domains from `config`.
    pub fn new(config: NetworkConfig) -> Result<Self, DonationError> {
        let source_chain = chains::get_chain_info(&config.source_chain)
            .ok_or_else(|| DonationError::UnknownChain(config.source_chain.clone()))?;
        let destination_chain = chains::get_chain_info(&config.destination_chain)
            .ok_or_else(|| DonationError::UnknownChain(config.destination_chain.clone()))?;

        let mut transport = LocalTransport::new(source_chain.selector, config.router, config.fee_vault);
        transport
            .set_fee_schedule(destination_chain.selector, config.fee_schedule)
            .add_token_route(
                destination_chain.selector,
                config.source_token,
                config.destination_token,
            );

        let (badges, authority) = BadgeRegistry::deploy(
            config.badge_registry,
            Box::new(BaseUriMetadata::new(config.badge_base_uri.clone())),
        );
        let receiver = DonationReceiver::deploy(
            config.receiver,
            config.receiver_owner,
            config.router,
            config.treasury,
            badges,
            authority,
        )?;

        info!(
            source = source_chain.chain_name,
            destination = destination_chain.chain_name,
            treasury = %config.treasury,
            "donation network deployed"
        );

        Ok(Self {
            guard: FeeGuard::new(config.guard),
            source: SourceDomain {
                chain: source_chain,
                ledger: TokenLedger::new(),
                sender: DonationSender::new(config.sender, NATIVE_FEE_TOKEN),
            },
            transport,
            destination: DestinationDomain {
                chain: destination_chain,
                ledger: TokenLedger::new(),
                receiver,
            },
            config,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn guard(&self) -> &FeeGuard {
        &self.guard
    }

    pub fn source(&self) -> &SourceDomain {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut SourceDomain {
        &mut self.source
    }

    pub fn destination(&self) -> &DestinationDomain {
        &self.destination
    }

    pub fn destination_mut(&mut self) -> &mut DestinationDomain {
        &mut self.destination
    }

    pub fn transport(&self) -> &LocalTransport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut LocalTransport {
        &mut self.transport
    }

    fn ledger_mut(&mut self, side: Side) -> &mut TokenLedger {
        match side {
            Side::Source => &mut self.source.ledger,
            Side::Destination => &mut self.destination.ledger,
        }
    }

    pub fn balance(&self, side: Side, token: Address, holder: Address) -> Amount {
        match side {
            Side::Source => self.source.ledger.balance_of(token, holder),
            Side::Destination => self.destination.ledger.balance_of(token, holder),
        }
    }

    /// Credit test funds.
    pub fn faucet(&mut self, side: Side, token: Address, holder: Address, amount: Amount) -> Result<(), DonationError> {
        self.ledger_mut(side).mint(token, holder, amount)?;
        info!(%side, %token, %holder, amount, "faucet credit");
        Ok(())
    }

    /// Donor approves the sender to pull `amount` of `token`.
    pub fn approve(&mut self, donor: Address, token: Address, amount: Amount) {
        let spender = self.source.sender.address();
        self.source.ledger.approve(token, donor, spender, amount);
    }

    fn envelope(&self, donor: Address, token: Address, amount: Amount, campaign_id: &str) -> Result<DonationEnvelope, DonationError> {
        DonationEnvelope::new(donor, campaign_id, amount, token)
    }

    /// Current fee for carrying this donation.
    pub fn quote(&self, donor: Address, token: Address, amount: Amount, campaign_id: &str) -> Result<Amount, DonationError> {
        let envelope = self.envelope(donor, token, amount, campaign_id)?;
        self.guard.quote_fee(
            &self.transport,
            self.destination.selector(),
            &envelope,
            &[TokenAmount::new(token, amount)],
        )
    }

    /// Guard checks for a prospective donation, without side effects.
    pub fn preflight(&self, donor: Address, token: Address, amount: Amount, campaign_id: &str) -> Result<Preflight, DonationError> {
        let envelope = self.envelope(donor, token, amount, campaign_id)?;
        self.guard.preflight(
            &self.source.ledger,
            &self.transport,
            self.destination.selector(),
            &envelope,
        )
    }

    fn request(&self, token: Address, amount: Amount, campaign_id: &str, fee_payment: Amount) -> DonationRequest {
        DonationRequest {
            destination: self.destination.selector(),
            receiver: self.destination.receiver.address(),
            token,
            amount,
            campaign_id: campaign_id.to_string(),
            fee_payment,
        }
    }

    /// Guarded donation: pre-flight first, so a failing fee check never
    /// strands custody.
    pub fn donate(
        &mut self,
        donor: Address,
        token: Address,
        amount: Amount,
        campaign_id: &str,
        fee_payment: Amount,
    ) -> Result<MessageId, DonationError> {
        let preflight = self.preflight(donor, token, amount, campaign_id)?;
        if fee_payment < preflight.quoted_fee {
            return Err(DonationError::InsufficientFeeTokenAmount {
                fee: preflight.quoted_fee,
                provided: fee_payment,
            });
        }
        self.send(donor, token, amount, campaign_id, fee_payment)
    }

    /// Unguarded `send_donation` on the source domain.
    pub fn send(
        &mut self,
        donor: Address,
        token: Address,
        amount: Amount,
        campaign_id: &str,
        fee_payment: Amount,
    ) -> Result<MessageId, DonationError> {
        let request = self.request(token, amount, campaign_id, fee_payment);
        let source = &mut self.source;
        source
            .sender
            .send_donation(donor, &mut source.ledger, &mut self.transport, request)
    }

    pub fn refund(&mut self, donor: Address, token: Address) -> Result<Amount, DonationError> {
        let source = &mut self.source;
        source.sender.refund_stranded(&mut source.ledger, donor, token)
    }

    pub fn relay(&mut self, id: &MessageId) -> Result<Delivery, DonationError> {
        self.transport.deliver(id, &mut self.destination)
    }

    pub fn relay_next(&mut self) -> Option<Result<Delivery, DonationError>> {
        self.transport.deliver_next(&mut self.destination)
    }

    /// Deliver everything pending; failed settlements are logged and left
    /// for manual execution.
    pub fn relay_all(&mut self) -> Vec<(MessageId, Result<Delivery, DonationError>)> {
        let results = self.transport.deliver_all(&mut self.destination);
        for (id, result) in &results {
            if let Err(err) = result {
                warn!(message_id = %id, error = %err, "settlement failed; awaiting manual execution");
            }
        }
        results
    }

    pub fn redeliver(&mut self, id: &MessageId) -> Result<Delivery, DonationError> {
        self.transport.redeliver(id, &mut self.destination)
    }

    pub fn manually_execute(&mut self, id: &MessageId) -> Result<Delivery, DonationError> {
        self.transport.manually_execute(id, &mut self.destination)
    }

    pub fn set_treasury(&mut self, caller: Address, treasury: Address) -> Result<(), DonationError> {
        self.destination.receiver.set_treasury(caller, treasury)
    }

    pub fn treasury(&self) -> Address {
        self.destination.receiver.treasury()
    }

    pub fn badges(&self) -> &BadgeRegistry {
        self.destination.receiver.badges()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded() -> (DonationNetwork, Address, Address) {
        let mut network = DonationNetwork::new(NetworkConfig::default()).unwrap();
        let alice = Address::from_label("alice");
        let token = network.config().source_token;
        network.faucet(Side::Source, token, alice, 100).unwrap();
        network
            .faucet(Side::Source, NATIVE_FEE_TOKEN, alice, 10_000_000)
            .unwrap();
        network.approve(alice, token, 100);
        (network, alice, token)
    }

    #[test]
    fn test_unknown_chain_rejected() {
        let config = NetworkConfig {
            destination_chain: "nowhere".into(),
            ..NetworkConfig::default()
        };
        let err = DonationNetwork::new(config).unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_CHAIN");
    }

    #[test]
    fn test_donate_and_relay_end_to_end() {
        let (mut network, alice, token) = funded();
        let fee = network.quote(alice, token, 100, "c1").unwrap();
        let id = network.donate(alice, token, 100, "c1", fee).unwrap();

        let delivery = network.relay(&id).unwrap();
        assert_eq!(delivery.record().badge_id, 0);

        let dst_token = network.config().destination_token;
        let treasury = network.treasury();
        assert_eq!(network.balance(Side::Destination, dst_token, treasury), 100);
        assert_eq!(network.badges().owner_of(0).unwrap(), alice);
    }

    #[test]
    fn test_guarded_donate_never_strands() {
        let (mut network, alice, token) = funded();
        let err = network.donate(alice, token, 100, "c1", 1).unwrap_err();
        assert!(matches!(err, DonationError::InsufficientFeeTokenAmount { .. }));
        assert_eq!(network.balance(Side::Source, token, alice), 100);
        assert!(network.source().sender.stranded().is_empty());
    }

    #[test]
    fn test_failed_settlement_rolls_back_release() {
        let (mut network, alice, token) = funded();
        let dst_token = network.config().destination_token;
        network
            .destination_mut()
            .ledger
            .set_transfers_blocked(dst_token, true);

        let fee = network.quote(alice, token, 100, "c1").unwrap();
        let id = network.donate(alice, token, 100, "c1", fee).unwrap();
        assert!(network.relay(&id).is_err());

        let receiver = network.destination().receiver.address();
        assert_eq!(network.balance(Side::Destination, dst_token, receiver), 0);
        assert_eq!(network.transport().failed(), vec![id]);
        assert_eq!(network.badges().total_supply(), 0);
    }

    #[test]
    fn test_relay_next_takes_oldest_pending() {
        let (mut network, alice, token) = funded();
        assert!(network.relay_next().is_none());

        let fee = network.quote(alice, token, 40, "c1").unwrap();
        let first = network.donate(alice, token, 40, "c1", fee).unwrap();
        let second = network.donate(alice, token, 60, "c2", fee).unwrap();

        let delivery = network.relay_next().unwrap().unwrap();
        assert_eq!(delivery.record().message_id, first);
        assert_eq!(network.transport().pending(), vec![second]);

        let delivery = network.relay_next().unwrap().unwrap();
        assert_eq!(delivery.record().message_id, second);
        assert_eq!(delivery.record().badge_id, 1);
        assert!(network.relay_next().is_none());
    }

    #[test]
    fn test_redeliver_counts_only_known_delivered_messages() {
        let (mut network, alice, token) = funded();
        let err = network.redeliver(&MessageId([7; 32])).unwrap_err();
        assert!(matches!(err, DonationError::MessageNotFound(_)));

        let fee = network.quote(alice, token, 100, "c1").unwrap();
        let id = network.donate(alice, token, 100, "c1", fee).unwrap();
        let err = network.redeliver(&id).unwrap_err();
        assert!(matches!(err, DonationError::InvalidMessageState(_)));
        assert_eq!(network.transport().stats().redeliveries, 0);

        network.relay(&id).unwrap();
        assert!(network.redeliver(&id).unwrap().is_duplicate());
        assert_eq!(network.transport().stats().redeliveries, 1);
    }

    #[test]
    fn test_side_parses() {
        assert_eq!("source".parse::<Side>().unwrap(), Side::Source);
        assert!("sideways".parse::<Side>().is_err());
    }
}
