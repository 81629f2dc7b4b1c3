//! Domain identifiers and configurations
//!
//! This module provides constants and lookups for the chains a donation can
//! travel between. Selectors are the transport's numeric domain identifiers.

use serde::Serialize;

use crate::{Address, DomainSelector};

/// Reserved token locator for a domain's native fee currency.
pub const NATIVE_FEE_TOKEN: Address = Address([0xee; 20]);

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Ethereum Sepolia testnet
pub const ETHEREUM_SEPOLIA: &str = "ethereum-sepolia";
/// Avalanche Fuji testnet
pub const AVALANCHE_FUJI: &str = "avalanche-fuji";
/// Arbitrum Sepolia testnet
pub const ARBITRUM_SEPOLIA: &str = "arbitrum-sepolia";
/// Base Sepolia testnet
pub const BASE_SEPOLIA: &str = "base-sepolia";
/// Optimism Sepolia testnet
pub const OPTIMISM_SEPOLIA: &str = "optimism-sepolia";
/// Polygon Amoy testnet
pub const POLYGON_AMOY: &str = "polygon-amoy";

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN INFO
// ═══════════════════════════════════════════════════════════════════════════════

/// Chain information structure
#[derive(Debug, Clone, Serialize)]
pub struct ChainInfo {
    /// Chain identifier
    pub chain_name: &'static str,
    /// Human-readable chain name
    pub display_name: &'static str,
    /// Transport domain selector
    pub selector: DomainSelector,
    /// EVM chain ID
    pub chain_id: u64,
    /// Symbol of the native fee currency
    pub native_symbol: &'static str,
}

/// Get info for a known chain
pub fn get_chain_info(chain_name: &str) -> Option<ChainInfo> {
    match chain_name {
        ETHEREUM_SEPOLIA => Some(ChainInfo {
            chain_name: ETHEREUM_SEPOLIA,
            display_name: "Ethereum Sepolia",
            selector: DomainSelector(16_015_286_601_757_825_753),
            chain_id: 11_155_111,
            native_symbol: "ETH",
        }),
        AVALANCHE_FUJI => Some(ChainInfo {
            chain_name: AVALANCHE_FUJI,
            display_name: "Avalanche Fuji",
            selector: DomainSelector(14_767_482_510_784_806_043),
            chain_id: 43_113,
            native_symbol: "AVAX",
        }),
        ARBITRUM_SEPOLIA => Some(ChainInfo {
            chain_name: ARBITRUM_SEPOLIA,
            display_name: "Arbitrum Sepolia",
            selector: DomainSelector(3_478_487_238_524_512_106),
            chain_id: 421_614,
            native_symbol: "ETH",
        }),
        BASE_SEPOLIA => Some(ChainInfo {
            chain_name: BASE_SEPOLIA,
            display_name: "Base Sepolia",
            selector: DomainSelector(10_344_971_235_874_465_080),
            chain_id: 84_532,
            native_symbol: "ETH",
        }),
        OPTIMISM_SEPOLIA => Some(ChainInfo {
            chain_name: OPTIMISM_SEPOLIA,
            display_name: "Optimism Sepolia",
            selector: DomainSelector(5_224_473_277_236_331_295),
            chain_id: 11_155_420,
            native_symbol: "ETH",
        }),
        POLYGON_AMOY => Some(ChainInfo {
            chain_name: POLYGON_AMOY,
            display_name: "Polygon Amoy",
            selector: DomainSelector(16_281_711_391_670_634_445),
            chain_id: 80_002,
            native_symbol: "POL",
        }),
        _ => None,
    }
}

/// Get all known chains
pub fn known_chains() -> Vec<ChainInfo> {
    [
        ETHEREUM_SEPOLIA,
        AVALANCHE_FUJI,
        ARBITRUM_SEPOLIA,
        BASE_SEPOLIA,
        OPTIMISM_SEPOLIA,
        POLYGON_AMOY,
    ]
    .into_iter()
    .filter_map(get_chain_info)
    .collect()
}

/// Reverse lookup by transport selector
pub fn chain_by_selector(selector: DomainSelector) -> Option<ChainInfo> {
    known_chains().into_iter().find(|c| c.selector == selector)
}
