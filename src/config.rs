//! Deployment resolution and grant policy.

use std::collections::HashMap;

use alloy_primitives::Address;

/// Default CDN location of the confidential-compute runtime module.
pub const SDK_CDN_URL: &str =
    "https://cdn.zama.ai/relayer-sdk-js/0.3.0/relayer-sdk-js.umd.cjs";

/// A resolved contract deployment on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// Address of the risk-analyzer contract.
    pub address: Address,
    /// Human-readable chain name, e.g. `"sepolia"`.
    pub chain_name: String,
}

/// Outcome of resolving a chain id against the deployment map.
///
/// "Not deployed" is a first-class state the host can render, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentStatus {
    /// A deployment exists on this chain.
    Deployed(Deployment),
    /// No entry, or the entry carries the zero address.
    NotDeployed,
}

/// Mapping from numeric chain id to contract deployment.
#[derive(Debug, Clone, Default)]
pub struct DeploymentMap {
    entries: HashMap<u64, Deployment>,
}

impl DeploymentMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the deployment entry for `chain_id`.
    pub fn insert(&mut self, chain_id: u64, address: Address, chain_name: impl Into<String>) {
        self.entries.insert(
            chain_id,
            Deployment { address, chain_name: chain_name.into() },
        );
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with(mut self, chain_id: u64, address: Address, chain_name: impl Into<String>) -> Self {
        self.insert(chain_id, address, chain_name);
        self
    }

    /// Resolves `chain_id` to a deployment. An absent entry or a zero
    /// address both yield [`DeploymentStatus::NotDeployed`].
    pub fn resolve(&self, chain_id: u64) -> DeploymentStatus {
        match self.entries.get(&chain_id) {
            Some(entry) if entry.address != Address::ZERO => {
                DeploymentStatus::Deployed(entry.clone())
            }
            _ => DeploymentStatus::NotDeployed,
        }
    }
}

/// Policy for newly issued decryption grants.
///
/// The validity window is caller-supplied rather than fixed; the default
/// matches the widest window the relayer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantPolicy {
    /// Number of days a grant stays valid after issuance.
    pub duration_days: u64,
}

impl Default for GrantPolicy {
    fn default() -> Self {
        Self { duration_days: 365 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn resolve_missing_chain_is_not_deployed() {
        let map = DeploymentMap::new();
        assert_eq!(map.resolve(31337), DeploymentStatus::NotDeployed);
    }

    #[test]
    fn resolve_zero_address_is_not_deployed() {
        let map = DeploymentMap::new().with(31337, Address::ZERO, "hardhat");
        assert_eq!(map.resolve(31337), DeploymentStatus::NotDeployed);
    }

    #[test]
    fn resolve_returns_deployment() {
        let addr = address!("1111111111111111111111111111111111111111");
        let map = DeploymentMap::new().with(11155111, addr, "sepolia");
        match map.resolve(11155111) {
            DeploymentStatus::Deployed(d) => {
                assert_eq!(d.address, addr);
                assert_eq!(d.chain_name, "sepolia");
            }
            DeploymentStatus::NotDeployed => panic!("expected deployment"),
        }
    }
}
