//! Donor badge registry
//!
//! Non-fungible attestations with sequential ids starting at 0. Each badge
//! records the donation amount and campaign id once, at mint. Minting needs
//! the registry's [`MintAuthority`], which is created together with the
//! registry and handed to exactly one holder (the donation receiver).

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::events::DonationEvent;
use crate::{Address, Amount, DonationError};

/// Default collection name
pub const BADGE_NAME: &str = "Cross-Chain Donor Badge";
/// Default collection symbol
pub const BADGE_SYMBOL: &str = "DONOR";

// ═══════════════════════════════════════════════════════════════════════════════
// METADATA
// ═══════════════════════════════════════════════════════════════════════════════

/// External metadata collaborator rendering badge URIs.
pub trait BadgeMetadata: fmt::Debug + Send + Sync {
    fn token_uri(&self, badge_id: u64) -> String;
}

/// `{base_uri}{badge_id}` URIs
#[derive(Debug, Clone)]
pub struct BaseUriMetadata {
    pub base_uri: String,
}

impl BaseUriMetadata {
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
        }
    }
}

impl BadgeMetadata for BaseUriMetadata {
    fn token_uri(&self, badge_id: u64) -> String {
        format!("{}{}", self.base_uri, badge_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// A minted badge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub id: u64,
    /// Current holder; starts as the donor
    pub owner: Address,
    /// Write-once donation amount
    pub donation_amount: Amount,
    /// Write-once campaign id
    pub campaign_id: String,
    pub uri: String,
}

/// Capability to mint on one registry. Not `Clone`: whoever holds it is the
/// registry's only minter.
#[derive(Debug)]
pub struct MintAuthority {
    registry: Address,
}

impl MintAuthority {
    pub fn registry(&self) -> Address {
        self.registry
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct BadgeRegistry {
    address: Address,
    name: String,
    symbol: String,
    /// Index == badge id. Badges are never burned.
    badges: Vec<Badge>,
    metadata: Box<dyn BadgeMetadata>,
    events: Vec<DonationEvent>,
}

impl BadgeRegistry {
    /// Deploy a registry at `address` and return it with its mint authority.
    pub fn deploy(address: Address, metadata: Box<dyn BadgeMetadata>) -> (Self, MintAuthority) {
        let registry = Self {
            address,
            name: BADGE_NAME.to_string(),
            symbol: BADGE_SYMBOL.to_string(),
            badges: Vec::new(),
            metadata,
            events: Vec::new(),
        };
        (registry, MintAuthority { registry: address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Badges minted so far. Never decreases.
    pub fn total_supply(&self) -> u64 {
        self.badges.len() as u64
    }

    /// Id the next mint will receive, if a mint to `owner` would succeed.
    pub fn check_mint(&self, owner: Address) -> Result<u64, DonationError> {
        if owner.is_zero() {
            return Err(DonationError::InvalidBadgeOwner(owner));
        }
        let next = self.total_supply();
        if next == u64::MAX {
            return Err(DonationError::BadgeIdOverflow);
        }
        Ok(next)
    }

    /// Mint the next badge to `owner`.
    pub fn mint_badge(
        &mut self,
        authority: &MintAuthority,
        owner: Address,
        amount: Amount,
        campaign_id: &str,
    ) -> Result<u64, DonationError> {
        if authority.registry != self.address {
            return Err(DonationError::Unauthorized(format!(
                "mint authority for {} presented to {}",
                authority.registry, self.address
            )));
        }
        let id = self.check_mint(owner)?;

        self.badges.push(Badge {
            id,
            owner,
            donation_amount: amount,
            campaign_id: campaign_id.to_string(),
            uri: self.metadata.token_uri(id),
        });
        self.events.push(DonationEvent::BadgeMinted {
            owner,
            badge_id: id,
            amount,
            campaign_id: campaign_id.to_string(),
        });
        info!(badge_id = id, %owner, amount, campaign_id, "badge minted");

        Ok(id)
    }

    /// Owner-only transfer of a badge.
    pub fn transfer(&mut self, caller: Address, badge_id: u64, to: Address) -> Result<(), DonationError> {
        if to.is_zero() {
            return Err(DonationError::InvalidBadgeOwner(to));
        }
        let badge = usize::try_from(badge_id)
            .ok()
            .and_then(|index| self.badges.get_mut(index))
            .ok_or(DonationError::BadgeNotFound(badge_id))?;
        if badge.owner != caller {
            return Err(DonationError::Unauthorized(format!(
                "{} does not own badge {}",
                caller, badge_id
            )));
        }

        let from = badge.owner;
        badge.owner = to;
        self.events.push(DonationEvent::BadgeTransferred { badge_id, from, to });
        info!(badge_id, %from, %to, "badge transferred");
        Ok(())
    }

    pub fn badge(&self, badge_id: u64) -> Option<&Badge> {
        usize::try_from(badge_id)
            .ok()
            .and_then(|index| self.badges.get(index))
    }

    fn lookup(&self, badge_id: u64) -> Result<&Badge, DonationError> {
        self.badge(badge_id)
            .ok_or(DonationError::BadgeNotFound(badge_id))
    }

    pub fn owner_of(&self, badge_id: u64) -> Result<Address, DonationError> {
        self.lookup(badge_id).map(|b| b.owner)
    }

    pub fn donation_amount(&self, badge_id: u64) -> Result<Amount, DonationError> {
        self.lookup(badge_id).map(|b| b.donation_amount)
    }

    pub fn campaign_id(&self, badge_id: u64) -> Result<&str, DonationError> {
        self.lookup(badge_id).map(|b| b.campaign_id.as_str())
    }

    pub fn token_uri(&self, badge_id: u64) -> Result<&str, DonationError> {
        self.lookup(badge_id).map(|b| b.uri.as_str())
    }

    /// Badges currently held by `owner`.
    pub fn badges_of(&self, owner: Address) -> Vec<&Badge> {
        self.badges.iter().filter(|b| b.owner == owner).collect()
    }

    pub fn events(&self) -> &[DonationEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (BadgeRegistry, MintAuthority) {
        BadgeRegistry::deploy(
            Address::from_label("badge"),
            Box::new(BaseUriMetadata::new("ipfs://badges/")),
        )
    }

    #[test]
    fn test_ids_are_sequential_from_zero() {
        let (mut registry, authority) = registry();
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");

        assert_eq!(registry.total_supply(), 0);
        assert_eq!(registry.mint_badge(&authority, alice, 50, "c1").unwrap(), 0);
        assert_eq!(registry.mint_badge(&authority, bob, 75, "c2").unwrap(), 1);
        assert_eq!(registry.total_supply(), 2);

        assert_eq!(registry.owner_of(1).unwrap(), bob);
        assert_eq!(registry.donation_amount(0).unwrap(), 50);
        assert_eq!(registry.campaign_id(1).unwrap(), "c2");
        assert_eq!(registry.token_uri(0).unwrap(), "ipfs://badges/0");
        assert_eq!(registry.events().len(), 2);
    }

    #[test]
    fn test_foreign_authority_rejected() {
        let (mut registry, _) = registry();
        let (_, foreign) = BadgeRegistry::deploy(
            Address::from_label("other-badge"),
            Box::new(BaseUriMetadata::new("")),
        );
        let err = registry
            .mint_badge(&foreign, Address::from_label("alice"), 1, "c1")
            .unwrap_err();
        assert!(matches!(err, DonationError::Unauthorized(_)));
        assert_eq!(registry.total_supply(), 0);
    }

    #[test]
    fn test_lookup_missing_badge() {
        let (registry, _) = registry();
        assert!(matches!(registry.owner_of(0), Err(DonationError::BadgeNotFound(0))));
        assert!(registry.badge(3).is_none());
        assert!(registry.badge(u64::MAX).is_none());
        assert!(matches!(
            registry.donation_amount(u64::MAX),
            Err(DonationError::BadgeNotFound(u64::MAX))
        ));
    }

    #[test]
    fn test_transfer_is_owner_only_and_keeps_record() {
        let (mut registry, authority) = registry();
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");
        registry.mint_badge(&authority, alice, 100, "c1").unwrap();

        assert!(registry.transfer(bob, 0, bob).is_err());
        assert!(registry.transfer(alice, 0, Address::ZERO).is_err());

        registry.transfer(alice, 0, bob).unwrap();
        assert_eq!(registry.owner_of(0).unwrap(), bob);
        assert_eq!(registry.donation_amount(0).unwrap(), 100);
        assert_eq!(registry.badges_of(bob).len(), 1);
        assert!(registry.badges_of(alice).is_empty());

        // Transfers never affect id assignment.
        assert_eq!(registry.mint_badge(&authority, alice, 1, "c1").unwrap(), 1);
    }

    #[test]
    fn test_zero_owner_rejected() {
        let (mut registry, authority) = registry();
        let err = registry.mint_badge(&authority, Address::ZERO, 1, "c1").unwrap_err();
        assert!(matches!(err, DonationError::InvalidBadgeOwner(_)));
    }
}
