//! Creation, validation, and caching of decryption authorization grants.
//!
//! A grant authorizes the relayer to decrypt ciphertexts bound to a set of
//! contracts on behalf of one user, for a bounded window. Grants are signed
//! as EIP-712 structured messages and persisted through the pluggable
//! [`StringStorage`] so a session restart does not re-prompt the user.

use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{keccak256, Address, Bytes, Signature, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, Eip712Domain, SolStruct};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GrantPolicy;
use crate::connector::Connector;
use crate::error::ClientError;
use crate::storage::StringStorage;

sol! {
    /// The structured authorization message the user signs to permit
    /// decryption of ciphertexts bound to `contractAddresses`.
    struct UserDecryptRequestVerification {
        bytes publicKey;
        address[] contractAddresses;
        uint256 startTimestamp;
        uint256 durationDays;
    }
}

/// EIP-712 domain the authorization message is signed under.
pub fn authorization_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    Eip712Domain {
        name: Some("Decryption".into()),
        version: Some("1".into()),
        chain_id: Some(U256::from(chain_id)),
        verifying_contract: Some(verifying_contract),
        salt: None,
    }
}

/// A time-bounded, signer-authorized permission to decrypt ciphertexts bound
/// to a specific set of contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptionGrant {
    /// Ephemeral public key embedded in the signed message.
    pub public_key: Bytes,
    /// Ephemeral private key unwrapping the decrypt response.
    pub private_key: Bytes,
    /// EIP-712 signature over the authorization message.
    pub signature: Bytes,
    /// The contracts the grant covers, sorted and deduplicated.
    pub contract_addresses: Vec<Address>,
    /// The user who signed the grant.
    pub user_address: Address,
    /// Unix timestamp (seconds) at issuance.
    pub start_timestamp: u64,
    /// Validity window in days from `start_timestamp`.
    pub duration_days: u64,
}

impl DecryptionGrant {
    /// Whether the grant is still inside its validity window at `now`
    /// (unix seconds).
    pub fn is_valid_at(&self, now: u64) -> bool {
        now <= self.start_timestamp.saturating_add(self.duration_days.saturating_mul(86_400))
    }

    /// Whether every address in `contracts` is covered by this grant.
    pub fn covers(&self, contracts: &[Address]) -> bool {
        contracts.iter().all(|c| self.contract_addresses.contains(c))
    }
}

/// Storage key for the grant covering `contracts` on behalf of `user`.
///
/// The key is order-insensitive in `contracts`: the set is sorted and
/// deduplicated before hashing, so switching accounts or permuting the
/// address list never aliases another grant.
pub fn storage_key(user: Address, contracts: &[Address]) -> String {
    let sorted = sorted_set(contracts);
    let mut buf = Vec::with_capacity(20 * (sorted.len() + 1));
    buf.extend_from_slice(user.as_slice());
    for contract in &sorted {
        buf.extend_from_slice(contract.as_slice());
    }
    format!("fhevm.grant.{:#x}", keccak256(&buf))
}

fn sorted_set(contracts: &[Address]) -> Vec<Address> {
    let mut sorted = contracts.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The user's signing capability. Wallet integrations implement this; a
/// declined prompt maps to [`ClientError::SignatureRejected`].
#[async_trait]
pub trait GrantSigner: Send + Sync {
    /// Address of the signing account.
    fn address(&self) -> Address;

    /// Signs the authorization message under the given domain.
    async fn sign_grant(
        &self,
        domain: &Eip712Domain,
        message: &UserDecryptRequestVerification,
    ) -> Result<Signature, ClientError>;
}

/// [`GrantSigner`] backed by an in-process private key.
#[derive(Debug, Clone)]
pub struct LocalGrantSigner {
    inner: PrivateKeySigner,
}

impl LocalGrantSigner {
    /// Wraps an existing private-key signer.
    pub fn new(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }

    /// Creates a signer with a random key. Test helper.
    pub fn random() -> Self {
        Self { inner: PrivateKeySigner::random() }
    }
}

#[async_trait]
impl GrantSigner for LocalGrantSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_grant(
        &self,
        domain: &Eip712Domain,
        message: &UserDecryptRequestVerification,
    ) -> Result<Signature, ClientError> {
        let hash = message.eip712_signing_hash(domain);
        self.inner
            .sign_hash(&hash)
            .await
            .map_err(|_| ClientError::SignatureRejected)
    }
}

/// Loads cached grants and signs fresh ones on miss.
#[derive(Debug, Clone, Default)]
pub struct GrantCache {
    policy: GrantPolicy,
}

impl GrantCache {
    /// Creates a cache issuing grants under `policy`.
    pub fn new(policy: GrantPolicy) -> Self {
        Self { policy }
    }

    /// Returns a valid grant covering `contracts` for the signer's account.
    ///
    /// A cached grant that is unexpired, matches the signer, and covers every
    /// requested address is returned unchanged with zero signing round-trips.
    /// Otherwise a fresh ephemeral keypair is generated, the authorization
    /// message is signed, and the new grant is persisted before returning.
    pub async fn load_or_sign(
        &self,
        connector: &Connector,
        contracts: &[Address],
        signer: &dyn GrantSigner,
        storage: &dyn StringStorage,
    ) -> Result<DecryptionGrant, ClientError> {
        let user = signer.address();
        let sorted = sorted_set(contracts);
        let key = storage_key(user, &sorted);

        if let Some(raw) = storage.get(&key).await? {
            match serde_json::from_str::<DecryptionGrant>(&raw) {
                Ok(grant)
                    if grant.user_address == user
                        && grant.is_valid_at(unix_now())
                        && grant.covers(&sorted) =>
                {
                    debug!(user = %user, "decryption grant cache hit");
                    return Ok(grant);
                }
                Ok(_) => {
                    debug!(user = %user, "cached grant expired or mismatched, re-signing");
                }
                Err(e) => {
                    warn!(error = %e, "discarding unparseable cached grant");
                    storage.remove(&key).await?;
                }
            }
        }

        let keypair = connector.backend().generate_keypair();
        let now = unix_now();
        let message = UserDecryptRequestVerification {
            publicKey: keypair.public_key.clone(),
            contractAddresses: sorted.clone(),
            startTimestamp: U256::from(now),
            durationDays: U256::from(self.policy.duration_days),
        };
        let domain = authorization_domain(connector.chain_id(), connector.acl_address());
        let signature = signer.sign_grant(&domain, &message).await?;

        let grant = DecryptionGrant {
            public_key: keypair.public_key,
            private_key: keypair.private_key,
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
            contract_addresses: sorted,
            user_address: user,
            start_timestamp: now,
            duration_days: self.policy.duration_days,
        };

        let serialized =
            serde_json::to_string(&grant).map_err(|e| ClientError::Storage(e.to_string()))?;
        storage.set(&key, serialized).await?;
        info!(user = %user, duration_days = grant.duration_days, "issued new decryption grant");
        Ok(grant)
    }
}
