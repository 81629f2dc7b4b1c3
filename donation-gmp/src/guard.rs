//! Fee & balance guard
//!
//! Read-only pre-submission gates. Nothing here mutates a ledger; a failing
//! check aborts the donation attempt before any custody transfer.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chains::NATIVE_FEE_TOKEN;
use crate::ledger::TokenLedger;
use crate::transport::Transport;
use crate::{Address, Amount, DomainSelector, DonationEnvelope, DonationError, TokenAmount};

/// Default safety margin over the quoted fee, in percent
pub const DEFAULT_FEE_MARGIN_PCT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Extra fee-currency balance required on top of the quote
    pub fee_margin_pct: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            fee_margin_pct: DEFAULT_FEE_MARGIN_PCT,
        }
    }
}

/// Result of a successful pre-flight check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preflight {
    pub quoted_fee: Amount,
    pub required_with_margin: Amount,
}

#[derive(Debug, Clone, Default)]
pub struct FeeGuard {
    config: GuardConfig,
}

impl FeeGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Price of carrying exactly this envelope and token batch.
    pub fn quote_fee<T: Transport>(
        &self,
        transport: &T,
        destination: DomainSelector,
        envelope: &DonationEnvelope,
        tokens: &[TokenAmount],
    ) -> Result<Amount, DonationError> {
        transport.quote(destination, &envelope.encode(), tokens)
    }

    /// `fee * (100 + margin) / 100`, rounded up.
    pub fn required_with_margin(&self, fee: Amount) -> Result<Amount, DonationError> {
        let scaled = fee
            .checked_mul(100 + Amount::from(self.config.fee_margin_pct))
            .ok_or(DonationError::ArithmeticOverflow)?;
        Ok(scaled.div_ceil(100))
    }

    /// Payer's fee-currency balance must cover the fee plus margin.
    pub fn verify_affordability(
        &self,
        ledger: &TokenLedger,
        payer: Address,
        fee: Amount,
    ) -> Result<Amount, DonationError> {
        let required = self.required_with_margin(fee)?;
        let available = ledger.balance_of(NATIVE_FEE_TOKEN, payer);
        if available < required {
            return Err(DonationError::InsufficientFee {
                required,
                available,
            });
        }
        Ok(required)
    }

    pub fn verify_token_balance(
        &self,
        ledger: &TokenLedger,
        payer: Address,
        token: Address,
        amount: Amount,
    ) -> Result<(), DonationError> {
        let available = ledger.balance_of(token, payer);
        if available < amount {
            return Err(DonationError::InsufficientTokenBalance {
                required: amount,
                available,
            });
        }
        Ok(())
    }

    /// Run both gates for one prospective donation.
    pub fn preflight<T: Transport>(
        &self,
        ledger: &TokenLedger,
        transport: &T,
        destination: DomainSelector,
        envelope: &DonationEnvelope,
    ) -> Result<Preflight, DonationError> {
        self.verify_token_balance(ledger, envelope.donor, envelope.token, envelope.amount)?;

        let tokens = [TokenAmount::new(envelope.token, envelope.amount)];
        let quoted_fee = self.quote_fee(transport, destination, envelope, &tokens)?;
        let required_with_margin = self.verify_affordability(ledger, envelope.donor, quoted_fee)?;

        debug!(
            donor = %envelope.donor,
            %destination,
            quoted_fee,
            required_with_margin,
            "preflight passed"
        );
        Ok(Preflight {
            quoted_fee,
            required_with_margin,
        })
    }
}
