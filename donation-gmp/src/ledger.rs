//! Per-domain fungible token ledger
//!
//! Models the ERC-20 surface the protocol relies on: balances, allowances,
//! `transfer` and `transferFrom`. The native fee currency lives under
//! [`NATIVE_FEE_TOKEN`] and moves without allowances. Tokens can be marked
//! as rejecting transfers to model non-compliant assets.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::chains::NATIVE_FEE_TOKEN;
use crate::{Address, Amount, DonationError};

/// Token balances and allowances of one domain.
#[derive(Debug, Default, Clone)]
pub struct TokenLedger {
    /// token -> holder -> balance
    balances: HashMap<Address, HashMap<Address, Amount>>,
    /// token -> (owner, spender) -> allowance
    allowances: HashMap<Address, HashMap<(Address, Address), Amount>>,
    /// Tokens whose `transfer`/`transferFrom` revert
    blocked: HashSet<Address>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, token: Address, holder: Address) -> Amount {
        self.balances
            .get(&token)
            .and_then(|b| b.get(&holder))
            .copied()
            .unwrap_or(0)
    }

    pub fn allowance(&self, token: Address, owner: Address, spender: Address) -> Amount {
        self.allowances
            .get(&token)
            .and_then(|a| a.get(&(owner, spender)))
            .copied()
            .unwrap_or(0)
    }

    /// Set `spender`'s allowance over `owner`'s tokens (overwrites).
    pub fn approve(&mut self, token: Address, owner: Address, spender: Address, amount: Amount) {
        trace!(%token, %owner, %spender, amount, "approve");
        self.allowances
            .entry(token)
            .or_default()
            .insert((owner, spender), amount);
    }

    /// Move tokens held by `from`.
    pub fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), DonationError> {
        if self.blocked.contains(&token) {
            return Err(DonationError::TransferFailed(format!(
                "token {} rejected the transfer",
                token
            )));
        }
        if to.is_zero() {
            return Err(DonationError::TransferFailed(
                "transfer to the zero address".into(),
            ));
        }

        let available = self.balance_of(token, from);
        if available < amount {
            return Err(DonationError::InsufficientTokenBalance {
                required: amount,
                available,
            });
        }

        if from != to {
            let credited = self
                .balance_of(token, to)
                .checked_add(amount)
                .ok_or(DonationError::ArithmeticOverflow)?;
            let balances = self.balances.entry(token).or_default();
            balances.insert(from, available - amount);
            balances.insert(to, credited);
        }

        trace!(%token, %from, %to, amount, "transfer");
        Ok(())
    }

    /// Move `from`'s tokens on behalf of `spender`, consuming allowance.
    pub fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), DonationError> {
        let approved = self.allowance(token, from, spender);
        if token != NATIVE_FEE_TOKEN && approved < amount {
            return Err(DonationError::InsufficientAllowance {
                required: amount,
                available: approved,
            });
        }

        self.transfer(token, from, to, amount)?;

        if token != NATIVE_FEE_TOKEN {
            self.approve(token, from, spender, approved - amount);
        }
        Ok(())
    }

    /// Create tokens. Used by bridge pools releasing on the destination and
    /// by faucets.
    pub fn mint(&mut self, token: Address, to: Address, amount: Amount) -> Result<(), DonationError> {
        let credited = self
            .balance_of(token, to)
            .checked_add(amount)
            .ok_or(DonationError::ArithmeticOverflow)?;
        self.balances.entry(token).or_default().insert(to, credited);
        trace!(%token, %to, amount, "mint");
        Ok(())
    }

    /// Destroy tokens held by `from`. Used by bridge pools locking on the
    /// source and rolling back failed releases.
    pub fn burn(&mut self, token: Address, from: Address, amount: Amount) -> Result<(), DonationError> {
        let available = self.balance_of(token, from);
        if available < amount {
            return Err(DonationError::InsufficientTokenBalance {
                required: amount,
                available,
            });
        }
        self.balances
            .entry(token)
            .or_default()
            .insert(from, available - amount);
        trace!(%token, %from, amount, "burn");
        Ok(())
    }

    /// Make `token` reject (or accept again) all transfers.
    pub fn set_transfers_blocked(&mut self, token: Address, blocked: bool) {
        if blocked {
            self.blocked.insert(token);
        } else {
            self.blocked.remove(&token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (TokenLedger, Address, Address, Address) {
        let mut ledger = TokenLedger::new();
        let token = Address::from_label("token");
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");
        ledger.mint(token, alice, 100).unwrap();
        (ledger, token, alice, bob)
    }

    #[test]
    fn test_transfer_moves_balance() {
        let (mut ledger, token, alice, bob) = setup();
        ledger.transfer(token, alice, bob, 40).unwrap();
        assert_eq!(ledger.balance_of(token, alice), 60);
        assert_eq!(ledger.balance_of(token, bob), 40);
    }

    #[test]
    fn test_transfer_insufficient_balance_is_noop() {
        let (mut ledger, token, alice, bob) = setup();
        let err = ledger.transfer(token, alice, bob, 101).unwrap_err();
        assert!(matches!(
            err,
            DonationError::InsufficientTokenBalance { required: 101, available: 100 }
        ));
        assert_eq!(ledger.balance_of(token, alice), 100);
        assert_eq!(ledger.balance_of(token, bob), 0);
    }

    #[test]
    fn test_transfer_from_consumes_allowance() {
        let (mut ledger, token, alice, bob) = setup();
        let spender = Address::from_label("sender-contract");

        let err = ledger.transfer_from(token, spender, alice, bob, 10).unwrap_err();
        assert!(matches!(err, DonationError::InsufficientAllowance { .. }));

        ledger.approve(token, alice, spender, 30);
        ledger.transfer_from(token, spender, alice, bob, 10).unwrap();
        assert_eq!(ledger.allowance(token, alice, spender), 20);
        assert_eq!(ledger.balance_of(token, bob), 10);
    }

    #[test]
    fn test_native_fee_token_needs_no_allowance() {
        let mut ledger = TokenLedger::new();
        let alice = Address::from_label("alice");
        let vault = Address::from_label("vault");
        ledger.mint(NATIVE_FEE_TOKEN, alice, 5).unwrap();
        ledger
            .transfer_from(NATIVE_FEE_TOKEN, vault, alice, vault, 5)
            .unwrap();
        assert_eq!(ledger.balance_of(NATIVE_FEE_TOKEN, vault), 5);
    }

    #[test]
    fn test_blocked_token_rejects_transfers() {
        let (mut ledger, token, alice, bob) = setup();
        ledger.set_transfers_blocked(token, true);
        let err = ledger.transfer(token, alice, bob, 1).unwrap_err();
        assert!(matches!(err, DonationError::TransferFailed(_)));

        ledger.set_transfers_blocked(token, false);
        ledger.transfer(token, alice, bob, 1).unwrap();
    }

    #[test]
    fn test_zero_address_and_burn() {
        let (mut ledger, token, alice, _) = setup();
        assert!(ledger.transfer(token, alice, Address::ZERO, 1).is_err());

        ledger.burn(token, alice, 30).unwrap();
        assert_eq!(ledger.balance_of(token, alice), 70);
        assert!(ledger.burn(token, alice, 71).is_err());
    }
}
