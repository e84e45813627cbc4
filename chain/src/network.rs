//! Static network registry (§4.3): chain configs, with selectors that
//! filter testnets unless explicitly opted in.

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub name: &'static str,
    pub chain_id: u64,
    pub rpc_endpoint_env_var: &'static str,
    pub explorer_api_env_var: &'static str,
    pub explorer_api_url: &'static str,
    pub usdc_contract: &'static str,
    pub lpt_contract: Option<&'static str>,
    pub confirmations: u64,
    pub x402_enabled: bool,
    pub is_testnet: bool,
}

const NETWORKS: &[NetworkConfig] = &[
    NetworkConfig {
        name: "ethereum",
        chain_id: 1,
        rpc_endpoint_env_var: "ETH_RPC_ENDPOINT",
        explorer_api_env_var: "ETHERSCAN_API_KEY",
        explorer_api_url: "https://api.etherscan.io/api",
        usdc_contract: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
        lpt_contract: Some("0x58b6a8a3302369daec383334672404ee733ab239"),
        confirmations: 12,
        x402_enabled: true,
        is_testnet: false,
    },
    NetworkConfig {
        name: "base",
        chain_id: 8453,
        rpc_endpoint_env_var: "BASE_RPC_ENDPOINT",
        explorer_api_env_var: "BASESCAN_API_KEY",
        explorer_api_url: "https://api.basescan.org/api",
        usdc_contract: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913",
        lpt_contract: None,
        confirmations: 10,
        x402_enabled: true,
        is_testnet: false,
    },
    NetworkConfig {
        name: "arbitrum",
        chain_id: 42161,
        rpc_endpoint_env_var: "ARBITRUM_RPC_ENDPOINT",
        explorer_api_env_var: "ARBISCAN_API_KEY",
        explorer_api_url: "https://api.arbiscan.io/api",
        usdc_contract: "0xaf88d065e77c8cc2239327c5edb3a432268e5831",
        lpt_contract: None,
        confirmations: 20,
        x402_enabled: true,
        is_testnet: false,
    },
    NetworkConfig {
        name: "base-sepolia",
        chain_id: 84532,
        rpc_endpoint_env_var: "BASE_SEPOLIA_RPC_ENDPOINT",
        explorer_api_env_var: "BASESCAN_API_KEY",
        explorer_api_url: "https://api-sepolia.basescan.org/api",
        usdc_contract: "0x036cbd53842c5426634e7929541ec2318f3dcf7e",
        lpt_contract: None,
        confirmations: 3,
        x402_enabled: true,
        is_testnet: true,
    },
];

pub struct NetworkRegistry;

impl NetworkRegistry {
    pub fn all() -> &'static [NetworkConfig] {
        NETWORKS
    }

    pub fn by_name(name: &str) -> Option<&'static NetworkConfig> {
        NETWORKS.iter().find(|n| n.name == name)
    }

    pub fn by_chain_id(chain_id: u64) -> Option<&'static NetworkConfig> {
        NETWORKS.iter().find(|n| n.chain_id == chain_id)
    }

    /// Networks with x402 enabled, filtered to mainnets unless `include_testnets`.
    pub fn x402_networks(include_testnets: bool) -> Vec<&'static NetworkConfig> {
        NETWORKS
            .iter()
            .filter(|n| n.x402_enabled && (include_testnets || !n.is_testnet))
            .collect()
    }

    /// Networks eligible for crypto-deposit monitoring, same testnet gating.
    pub fn deposit_networks(include_testnets: bool) -> Vec<&'static NetworkConfig> {
        NETWORKS
            .iter()
            .filter(|n| include_testnets || !n.is_testnet)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testnets_filtered_by_default() {
        let networks = NetworkRegistry::x402_networks(false);
        assert!(networks.iter().all(|n| !n.is_testnet));
    }

    #[test]
    fn testnets_included_when_requested() {
        let networks = NetworkRegistry::x402_networks(true);
        assert!(networks.iter().any(|n| n.is_testnet));
    }

    #[test]
    fn by_chain_id_resolves() {
        assert_eq!(NetworkRegistry::by_chain_id(8453).unwrap().name, "base");
        assert!(NetworkRegistry::by_chain_id(999_999).is_none());
    }
}
