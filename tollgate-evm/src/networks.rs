//! Known eip155 network identifiers and chain IDs.

/// A known EVM network and its chain ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Human-readable network identifier used on the wire.
    pub name: &'static str,
    /// EIP-155 chain ID.
    pub chain_id: u64,
}

/// Ethereum Mainnet chain ID.
pub const ETHEREUM_MAINNET: u64 = 1;

/// Base Mainnet chain ID.
pub const BASE_MAINNET: u64 = 8453;

/// Base Sepolia (testnet) chain ID.
pub const BASE_SEPOLIA: u64 = 84_532;

/// Polygon Mainnet chain ID.
pub const POLYGON_MAINNET: u64 = 137;

/// Polygon Amoy (testnet) chain ID.
pub const POLYGON_AMOY: u64 = 80_002;

/// Avalanche C-Chain chain ID.
pub const AVALANCHE_MAINNET: u64 = 43_114;

/// Networks this crate ships configurations for. Custom networks can be
/// used by constructing an adapter with an explicit chain ID.
#[must_use]
pub fn known_networks() -> Vec<NetworkInfo> {
    vec![
        NetworkInfo {
            name: "ethereum",
            chain_id: ETHEREUM_MAINNET,
        },
        NetworkInfo {
            name: "base",
            chain_id: BASE_MAINNET,
        },
        NetworkInfo {
            name: "base-sepolia",
            chain_id: BASE_SEPOLIA,
        },
        NetworkInfo {
            name: "polygon",
            chain_id: POLYGON_MAINNET,
        },
        NetworkInfo {
            name: "polygon-amoy",
            chain_id: POLYGON_AMOY,
        },
        NetworkInfo {
            name: "avalanche",
            chain_id: AVALANCHE_MAINNET,
        },
    ]
}

/// Looks up the chain ID for a known network name.
#[must_use]
pub fn chain_id_for(name: &str) -> Option<u64> {
    known_networks()
        .into_iter()
        .find(|n| n.name == name)
        .map(|n| n.chain_id)
}
