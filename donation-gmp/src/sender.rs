//! Source-side donation sender
//!
//! `send_donation` runs its steps in a fixed order and each one commits:
//! pull custody, build the envelope, re-quote and check the fee payment,
//! authorize the transport, submit, emit. Once tokens are pulled there is no
//! rollback; if a later step fails the tokens stay with the sender as
//! stranded custody until `refund_stranded` returns them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::DonationEvent;
use crate::ledger::TokenLedger;
use crate::transport::{SubmitRequest, Transport};
use crate::{Address, Amount, DomainSelector, DonationEnvelope, DonationError, MessageId, TokenAmount};

/// Arguments of one `send_donation` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationRequest {
    pub destination: DomainSelector,
    /// Receiver contract on the destination domain
    pub receiver: Address,
    /// Source-domain token
    pub token: Address,
    pub amount: Amount,
    pub campaign_id: String,
    /// Most the caller is willing to pay in fees
    pub fee_payment: Amount,
}

/// Tokens held by the sender after a failed donation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrandedCustody {
    pub donor: Address,
    pub token: Address,
    pub amount: Amount,
}

#[derive(Debug)]
pub struct DonationSender {
    address: Address,
    /// Currency transport fees are paid in
    fee_token: Address,
    /// (donor, token) -> amount held for the donor
    stranded: BTreeMap<(Address, Address), Amount>,
    events: Vec<DonationEvent>,
}

impl DonationSender {
    pub fn new(address: Address, fee_token: Address) -> Self {
        Self {
            address,
            fee_token,
            stranded: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn fee_token(&self) -> Address {
        self.fee_token
    }

    /// Donate `request.amount` of `request.token` from `caller`. The caller
    /// must have approved the sender for the amount.
    pub fn send_donation<T: Transport>(
        &mut self,
        caller: Address,
        ledger: &mut TokenLedger,
        transport: &mut T,
        request: DonationRequest,
    ) -> Result<MessageId, DonationError> {
        if request.amount == 0 {
            return Err(DonationError::InvalidAmount);
        }
        let available = ledger.balance_of(request.token, caller);
        if available < request.amount {
            return Err(DonationError::InsufficientTokenBalance {
                required: request.amount,
                available,
            });
        }

        // 1. custody pull
        ledger.transfer_from(request.token, self.address, caller, self.address, request.amount)?;

        // 2. envelope
        let envelope = DonationEnvelope::new(caller, request.campaign_id.as_str(), request.amount, request.token)?;
        let payload = envelope.encode();
        let tokens = vec![TokenAmount::new(request.token, request.amount)];

        // 3. re-quote against the exact payload
        let fee = match transport.quote(request.destination, &payload, &tokens) {
            Ok(fee) if request.fee_payment >= fee => fee,
            Ok(fee) => {
                let err = DonationError::InsufficientFeeTokenAmount {
                    fee,
                    provided: request.fee_payment,
                };
                return Err(self.strand(&envelope, err));
            }
            Err(err) => return Err(self.strand(&envelope, err)),
        };

        // 4. authorize the transport
        let router = transport.router();
        ledger.approve(request.token, self.address, router, request.amount);

        // 5. submit
        let submit = SubmitRequest {
            destination: request.destination,
            receiver: request.receiver,
            payload,
            tokens,
            fee_token: self.fee_token,
            fee,
            fee_payer: caller,
        };
        let message_id = match transport.submit(ledger, self.address, submit) {
            Ok(id) => id,
            Err(err) => {
                ledger.approve(request.token, self.address, router, 0);
                return Err(self.strand(&envelope, err));
            }
        };

        // 6. emit
        self.events.push(DonationEvent::DonationSent {
            message_id,
            destination_domain: request.destination,
            donor: caller,
            token: request.token,
            amount: request.amount,
            campaign_id: envelope.campaign_id.clone(),
        });
        info!(
            message_id = %message_id,
            destination = %request.destination,
            donor = %caller,
            token = %request.token,
            amount = request.amount,
            campaign_id = %envelope.campaign_id,
            fee,
            "donation sent"
        );
        Ok(message_id)
    }

    fn strand(&mut self, envelope: &DonationEnvelope, err: DonationError) -> DonationError {
        let held = self
            .stranded
            .entry((envelope.donor, envelope.token))
            .or_insert(0);
        *held = match held.checked_add(envelope.amount) {
            Some(total) => total,
            None => return DonationError::ArithmeticOverflow,
        };

        self.events.push(DonationEvent::CustodyStranded {
            donor: envelope.donor,
            token: envelope.token,
            amount: envelope.amount,
            campaign_id: envelope.campaign_id.clone(),
        });
        warn!(
            donor = %envelope.donor,
            token = %envelope.token,
            amount = envelope.amount,
            error = %err,
            "donation failed after custody pull; tokens held by sender"
        );
        err
    }

    /// Return everything held for `donor` in `token`.
    pub fn refund_stranded(
        &mut self,
        ledger: &mut TokenLedger,
        donor: Address,
        token: Address,
    ) -> Result<Amount, DonationError> {
        let amount = self
            .stranded
            .get(&(donor, token))
            .copied()
            .filter(|amount| *amount > 0)
            .ok_or(DonationError::NothingToRefund { donor, token })?;

        ledger.transfer(token, self.address, donor, amount)?;
        self.stranded.remove(&(donor, token));

        self.events.push(DonationEvent::CustodyRefunded { donor, token, amount });
        info!(%donor, %token, amount, "stranded custody refunded");
        Ok(amount)
    }

    pub fn stranded_amount(&self, donor: Address, token: Address) -> Amount {
        self.stranded.get(&(donor, token)).copied().unwrap_or(0)
    }

    pub fn stranded(&self) -> Vec<StrandedCustody> {
        self.stranded
            .iter()
            .map(|(&(donor, token), &amount)| StrandedCustody { donor, token, amount })
            .collect()
    }

    pub fn events(&self) -> &[DonationEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::NATIVE_FEE_TOKEN;
    use crate::transport::{FeeSchedule, LocalTransport};

    const DEST: DomainSelector = DomainSelector(2);

    struct Fixture {
        sender: DonationSender,
        transport: LocalTransport,
        ledger: TokenLedger,
        token: Address,
        alice: Address,
    }

    fn fixture() -> Fixture {
        let token = Address::from_label("src-token");
        let mut transport = LocalTransport::new(
            DomainSelector(1),
            Address::from_label("router"),
            Address::from_label("vault"),
        );
        transport
            .set_fee_schedule(DEST, FeeSchedule::default())
            .add_token_route(DEST, token, Address::from_label("dst-token"));

        let sender = DonationSender::new(Address::from_label("sender"), NATIVE_FEE_TOKEN);
        let alice = Address::from_label("alice");
        let mut ledger = TokenLedger::new();
        ledger.mint(token, alice, 100).unwrap();
        ledger.mint(NATIVE_FEE_TOKEN, alice, 10_000_000).unwrap();
        ledger.approve(token, alice, sender.address(), 100);

        Fixture {
            sender,
            transport,
            ledger,
            token,
            alice,
        }
    }

    fn request(fx: &Fixture, amount: Amount, fee_payment: Amount) -> DonationRequest {
        DonationRequest {
            destination: DEST,
            receiver: Address::from_label("receiver"),
            token: fx.token,
            amount,
            campaign_id: "c1".into(),
            fee_payment,
        }
    }

    #[test]
    fn test_send_moves_tokens_into_transport() {
        let mut fx = fixture();
        let req = request(&fx, 100, 10_000_000);
        let id = fx
            .sender
            .send_donation(fx.alice, &mut fx.ledger, &mut fx.transport, req)
            .unwrap();

        assert_eq!(fx.ledger.balance_of(fx.token, fx.alice), 0);
        assert_eq!(fx.ledger.balance_of(fx.token, fx.sender.address()), 0);
        assert_eq!(fx.transport.pending(), vec![id]);
        assert!(matches!(
            fx.sender.events(),
            [DonationEvent::DonationSent { amount: 100, .. }]
        ));
    }

    #[test]
    fn test_insufficient_balance_moves_nothing() {
        let mut fx = fixture();
        let req = request(&fx, 101, 10_000_000);
        let err = fx
            .sender
            .send_donation(fx.alice, &mut fx.ledger, &mut fx.transport, req)
            .unwrap_err();
        assert!(matches!(err, DonationError::InsufficientTokenBalance { .. }));
        assert_eq!(fx.ledger.balance_of(fx.token, fx.alice), 100);
        assert!(fx.sender.events().is_empty());
    }

    #[test]
    fn test_underpaid_fee_strands_custody_until_refund() {
        let mut fx = fixture();
        let req = request(&fx, 100, 1);
        let err = fx
            .sender
            .send_donation(fx.alice, &mut fx.ledger, &mut fx.transport, req)
            .unwrap_err();
        assert!(matches!(err, DonationError::InsufficientFeeTokenAmount { provided: 1, .. }));
        assert_eq!(fx.ledger.balance_of(fx.token, fx.alice), 0);
        assert_eq!(fx.ledger.balance_of(fx.token, fx.sender.address()), 100);
        assert_eq!(fx.sender.stranded_amount(fx.alice, fx.token), 100);
        assert!(fx.transport.pending().is_empty());

        let refunded = fx
            .sender
            .refund_stranded(&mut fx.ledger, fx.alice, fx.token)
            .unwrap();
        assert_eq!(refunded, 100);
        assert_eq!(fx.ledger.balance_of(fx.token, fx.alice), 100);
        assert!(fx.sender.stranded().is_empty());

        let err = fx
            .sender
            .refund_stranded(&mut fx.ledger, fx.alice, fx.token)
            .unwrap_err();
        assert!(matches!(err, DonationError::NothingToRefund { .. }));
    }

    #[test]
    fn test_stranded_custody_accumulates_per_donor_and_token() {
        let mut fx = fixture();
        for amount in [60, 40] {
            let req = request(&fx, amount, 1);
            fx.sender
                .send_donation(fx.alice, &mut fx.ledger, &mut fx.transport, req)
                .unwrap_err();
        }
        assert_eq!(fx.sender.stranded_amount(fx.alice, fx.token), 100);
        assert_eq!(fx.sender.stranded().len(), 1);
        assert_eq!(
            fx.sender
                .refund_stranded(&mut fx.ledger, fx.alice, fx.token)
                .unwrap(),
            100
        );
    }

    #[test]
    fn test_identical_calls_are_independent_donations() {
        let mut fx = fixture();
        let req = request(&fx, 50, 10_000_000);
        let first = fx
            .sender
            .send_donation(fx.alice, &mut fx.ledger, &mut fx.transport, req.clone())
            .unwrap();
        let second = fx
            .sender
            .send_donation(fx.alice, &mut fx.ledger, &mut fx.transport, req)
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(fx.transport.pending().len(), 2);
    }
}
