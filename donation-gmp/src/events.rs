//! Observable protocol events
//!
//! Every committed state change emits one of these. They are the monitoring
//! and testing surface; the settlement record is reconstructed from
//! `DonationReceived`.

use serde::Serialize;

use crate::{Address, Amount, DomainSelector, MessageId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DonationEvent {
    /// Source domain: envelope and tokens handed to the transport
    DonationSent {
        message_id: MessageId,
        destination_domain: DomainSelector,
        donor: Address,
        token: Address,
        amount: Amount,
        campaign_id: String,
    },
    /// Source domain: fee check failed after custody pull
    CustodyStranded {
        donor: Address,
        token: Address,
        amount: Amount,
        campaign_id: String,
    },
    /// Source domain: stranded custody returned to the donor
    CustodyRefunded {
        donor: Address,
        token: Address,
        amount: Amount,
    },
    /// Destination domain: message settled
    DonationReceived {
        message_id: MessageId,
        donor: Address,
        token: Address,
        amount: Amount,
        campaign_id: String,
        badge_id: u64,
    },
    /// Destination domain: badge issued
    BadgeMinted {
        owner: Address,
        badge_id: u64,
        amount: Amount,
        campaign_id: String,
    },
    BadgeTransferred {
        badge_id: u64,
        from: Address,
        to: Address,
    },
    TreasuryUpdated {
        previous: Address,
        current: Address,
    },
}

impl DonationEvent {
    /// Event name as emitted on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            DonationEvent::DonationSent { .. } => "DonationSent",
            DonationEvent::CustodyStranded { .. } => "CustodyStranded",
            DonationEvent::CustodyRefunded { .. } => "CustodyRefunded",
            DonationEvent::DonationReceived { .. } => "DonationReceived",
            DonationEvent::BadgeMinted { .. } => "BadgeMinted",
            DonationEvent::BadgeTransferred { .. } => "BadgeTransferred",
            DonationEvent::TreasuryUpdated { .. } => "TreasuryUpdated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = DonationEvent::BadgeMinted {
            owner: Address::from_label("alice"),
            badge_id: 0,
            amount: 100,
            campaign_id: "c1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "badge_minted");
        assert_eq!(json["badge_id"], 0);
        assert_eq!(event.name(), "BadgeMinted");
    }
}
