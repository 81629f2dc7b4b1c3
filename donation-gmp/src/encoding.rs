//! ABI encoding/decoding for donation envelopes
//!
//! Envelopes are laid out exactly as Solidity's
//! `abi.encode(address donor, string campaignId, uint256 amount, address token)`
//! so a contract-side receiver can `abi.decode` the same bytes.

use crate::{Address, Amount, DonationEnvelope, DonationError};

const WORD: usize = 32;
const HEAD_WORDS: usize = 4;

/// Encode a donation envelope for transport
pub fn encode_envelope(envelope: &DonationEnvelope) -> Vec<u8> {
    // Layout: donor (32) + campaign offset (32) + amount (32) + token (32)
    //       + campaign length (32) + campaign bytes (padded to 32)
    let campaign = envelope.campaign_id.as_bytes();
    let padded_len = padded(campaign.len());
    let mut encoded = Vec::with_capacity((HEAD_WORDS + 1) * WORD + padded_len);

    // address donor
    encoded.extend_from_slice(&address_word(&envelope.donor));

    // string campaignId: offset to the tail
    encoded.extend_from_slice(&u64_word((HEAD_WORDS * WORD) as u64));

    // uint256 amount
    encoded.extend_from_slice(&amount_word(envelope.amount));

    // address token
    encoded.extend_from_slice(&address_word(&envelope.token));

    // tail: length + right-padded bytes
    encoded.extend_from_slice(&u64_word(campaign.len() as u64));
    let mut tail = vec![0u8; padded_len];
    tail[..campaign.len()].copy_from_slice(campaign);
    encoded.extend_from_slice(&tail);

    encoded
}

/// Decode a donation envelope from ABI-encoded bytes
pub fn decode_envelope(bytes: &[u8]) -> Result<DonationEnvelope, DonationError> {
    if bytes.len() < (HEAD_WORDS + 1) * WORD {
        return Err(DonationError::Decoding(format!(
            "envelope payload too short: {} < {}",
            bytes.len(),
            (HEAD_WORDS + 1) * WORD
        )));
    }

    let donor = read_address(bytes, 0)?;
    let campaign_offset = read_usize(bytes, WORD)?;
    let amount = read_amount(bytes, 2 * WORD)?;
    let token = read_address(bytes, 3 * WORD)?;

    let campaign_len = read_usize(bytes, campaign_offset)?;
    let start = campaign_offset + WORD;
    let end = start
        .checked_add(campaign_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| {
            DonationError::Decoding(format!(
                "campaign id overruns payload: {} bytes at offset {}",
                campaign_len, start
            ))
        })?;
    let campaign_id = String::from_utf8(bytes[start..end].to_vec())
        .map_err(|e| DonationError::Decoding(e.to_string()))?;

    DonationEnvelope::new(donor, campaign_id, amount, token)
}

/// Helper to convert a hex string to bytes32
pub fn hex_to_bytes32(hex: &str) -> Result<[u8; 32], DonationError> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let bytes = hex::decode(hex).map_err(|e| DonationError::Decoding(e.to_string()))?;

    if bytes.len() != 32 {
        return Err(DonationError::Decoding(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }

    let mut result = [0u8; 32];
    result.copy_from_slice(&bytes);
    Ok(result)
}

/// Helper to convert bytes32 to hex string
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORD HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn padded(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn amount_word(amount: Amount) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&amount.to_be_bytes());
    word
}

fn u64_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn word_at(bytes: &[u8], offset: usize) -> Result<&[u8], DonationError> {
    offset
        .checked_add(WORD)
        .filter(|end| *end <= bytes.len())
        .map(|end| &bytes[offset..end])
        .ok_or_else(|| DonationError::Decoding(format!("word at offset {} out of range", offset)))
}

fn read_address(bytes: &[u8], offset: usize) -> Result<Address, DonationError> {
    let word = word_at(bytes, offset)?;
    if word[..12].iter().any(|b| *b != 0) {
        return Err(DonationError::Decoding(format!(
            "dirty high bits in address at offset {}",
            offset
        )));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&word[12..]);
    Ok(Address(out))
}

fn read_amount(bytes: &[u8], offset: usize) -> Result<Amount, DonationError> {
    let word = word_at(bytes, offset)?;
    if word[..16].iter().any(|b| *b != 0) {
        return Err(DonationError::Decoding("amount exceeds 128 bits".into()));
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&word[16..]);
    Ok(Amount::from_be_bytes(out))
}

fn read_usize(bytes: &[u8], offset: usize) -> Result<usize, DonationError> {
    let word = word_at(bytes, offset)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(DonationError::Decoding(format!(
            "length or offset at {} out of range",
            offset
        )));
    }
    let mut out = [0u8; 8];
    out.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(out))
        .map_err(|e| DonationError::Decoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(campaign: &str) -> DonationEnvelope {
        DonationEnvelope::new(
            Address::from_label("alice"),
            campaign,
            1_000_000,
            Address::from_label("ccip-bnm"),
        )
        .unwrap()
    }

    #[test]
    fn test_envelope_layout() {
        let env = envelope("c1");
        let encoded = encode_envelope(&env);

        // 4 head words + length word + one padded data word
        assert_eq!(encoded.len(), 6 * 32);
        assert_eq!(&encoded[12..32], env.donor.as_bytes());
        assert_eq!(encoded[63], 0x80);
        assert_eq!(encoded[4 * 32 + 31], 2);
        assert_eq!(&encoded[5 * 32..5 * 32 + 2], b"c1");

        let decoded = decode_envelope(&encoded).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_long_and_empty_campaign_ids() {
        let long = "x".repeat(70);
        let decoded = decode_envelope(&encode_envelope(&envelope(&long))).unwrap();
        assert_eq!(decoded.campaign_id, long);

        let encoded = encode_envelope(&envelope(""));
        assert_eq!(encoded.len(), 5 * 32);
        assert_eq!(decode_envelope(&encoded).unwrap().campaign_id, "");
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let encoded = encode_envelope(&envelope("campaign-with-a-name"));
        let err = decode_envelope(&encoded[..encoded.len() - 32]).unwrap_err();
        assert!(matches!(err, DonationError::Decoding(_)));
        assert!(decode_envelope(&[]).is_err());
    }

    #[test]
    fn test_dirty_address_rejected() {
        let mut encoded = encode_envelope(&envelope("c1"));
        encoded[0] = 1;
        assert!(decode_envelope(&encoded).is_err());
    }

    #[test]
    fn test_zero_amount_rejected_on_decode() {
        let mut encoded = encode_envelope(&envelope("c1"));
        encoded[2 * 32..3 * 32].fill(0);
        let err = decode_envelope(&encoded).unwrap_err();
        assert!(matches!(err, DonationError::InvalidAmount));
    }

    #[test]
    fn test_hex_conversion() {
        let bytes = [0xab; 32];
        let hex = bytes32_to_hex(&bytes);
        assert_eq!(hex, "0xabababababababababababababababababababababababababababababababab");

        let decoded = hex_to_bytes32(&hex).unwrap();
        assert_eq!(decoded, bytes);
        assert!(hex_to_bytes32("0xabcd").is_err());
    }
}
