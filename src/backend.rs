//! Confidential-compute backend seam.
//!
//! Everything that talks to the relayer lives behind [`ConfidentialBackend`]
//! so the orchestration core can be exercised against a mock. The production
//! implementation is [`RelayerBackend`], a thin HTTP client over the relayer
//! endpoints declared by the runtime module.

use std::collections::HashMap;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::ClientError;
use crate::grant::DecryptionGrant;

/// An ephemeral keypair bound to one decryption grant. The key material is
/// opaque to this crate; only the relayer interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypair {
    /// Public half, embedded in the signed authorization message.
    pub public_key: Bytes,
    /// Private half, used to unwrap the batched decrypt response.
    pub private_key: Bytes,
}

/// A fixed-width unsigned input value, appended to an encrypted-input buffer
/// in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptedValue {
    /// 8-bit unsigned value.
    U8(u8),
    /// 16-bit unsigned value.
    U16(u16),
    /// 32-bit unsigned value.
    U32(u32),
    /// 64-bit unsigned value.
    U64(u64),
}

impl EncryptedValue {
    /// Bit width of the ciphertext this value encrypts into.
    pub fn bit_width(&self) -> u32 {
        match self {
            Self::U8(_) => 8,
            Self::U16(_) => 16,
            Self::U32(_) => 32,
            Self::U64(_) => 64,
        }
    }

    /// The plaintext widened to `u64`.
    pub fn as_u64(&self) -> u64 {
        match self {
            Self::U8(v) => u64::from(*v),
            Self::U16(v) => u64::from(*v),
            Self::U32(v) => u64::from(*v),
            Self::U64(v) => *v,
        }
    }
}

/// Ciphertext handles plus the validity proof covering them, as returned by
/// the backend for one encrypted-input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// One handle per appended value, in declared order.
    pub handles: Vec<B256>,
    /// Proof blob submitted alongside the handles.
    pub proof: Bytes,
}

/// One handle/contract pair in a batched decrypt request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptRequest {
    /// The ciphertext handle to decrypt.
    pub handle: B256,
    /// The contract the handle is bound to.
    pub contract: Address,
}

/// Capability surface of the confidential-compute backend.
#[async_trait]
pub trait ConfidentialBackend: Send + Sync {
    /// Generates a fresh ephemeral keypair for a decryption grant.
    fn generate_keypair(&self) -> Keypair;

    /// Encrypts `values` bound to `(contract, user)` and returns the handles
    /// plus the input proof.
    async fn encrypt_input(
        &self,
        contract: Address,
        user: Address,
        values: &[EncryptedValue],
    ) -> Result<EncryptedPayload, ClientError>;

    /// Issues one batched decrypt request. The response must cover every
    /// requested handle; an incomplete set is a [`ClientError::DecryptionFailure`].
    async fn user_decrypt(
        &self,
        requests: &[DecryptRequest],
        grant: &DecryptionGrant,
    ) -> Result<HashMap<B256, U256>, ClientError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InputProofRequest {
    contract_address: Address,
    user_address: Address,
    chain_id: u64,
    values: Vec<WireValue>,
}

#[derive(Serialize)]
struct WireValue {
    bits: u32,
    value: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputProofResponse {
    handles: Vec<B256>,
    input_proof: Bytes,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserDecryptRequestBody<'a> {
    handle_contract_pairs: Vec<WirePair>,
    public_key: &'a Bytes,
    signature: &'a Bytes,
    contract_addresses: &'a [Address],
    user_address: Address,
    start_timestamp: u64,
    duration_days: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePair {
    handle: B256,
    contract_address: Address,
}

/// HTTP implementation of [`ConfidentialBackend`] against a relayer.
#[derive(Debug, Clone)]
pub struct RelayerBackend {
    http: reqwest::Client,
    relayer_url: Url,
    chain_id: u64,
}

impl RelayerBackend {
    /// Creates a backend for `chain_id` against the given relayer base URL.
    pub fn new(relayer_url: Url, chain_id: u64) -> Self {
        Self { http: reqwest::Client::new(), relayer_url, chain_id }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.relayer_url
            .join(path)
            .map_err(|e| ClientError::Rpc(format!("bad relayer endpoint {path}: {e}")))
    }
}

#[async_trait]
impl ConfidentialBackend for RelayerBackend {
    fn generate_keypair(&self) -> Keypair {
        let mut public_key = [0u8; 32];
        let mut private_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut public_key);
        rand::rngs::OsRng.fill_bytes(&mut private_key);
        Keypair {
            public_key: Bytes::copy_from_slice(&public_key),
            private_key: Bytes::copy_from_slice(&private_key),
        }
    }

    async fn encrypt_input(
        &self,
        contract: Address,
        user: Address,
        values: &[EncryptedValue],
    ) -> Result<EncryptedPayload, ClientError> {
        let body = InputProofRequest {
            contract_address: contract,
            user_address: user,
            chain_id: self.chain_id,
            values: values
                .iter()
                .map(|v| WireValue { bits: v.bit_width(), value: v.as_u64() })
                .collect(),
        };

        debug!(%contract, %user, count = values.len(), "requesting input proof");
        let response: InputProofResponse = self
            .http
            .post(self.endpoint("v1/input-proof")?)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))?;

        if response.handles.len() != values.len() {
            return Err(ClientError::Rpc(format!(
                "relayer returned {} handles for {} values",
                response.handles.len(),
                values.len()
            )));
        }

        Ok(EncryptedPayload { handles: response.handles, proof: response.input_proof })
    }

    async fn user_decrypt(
        &self,
        requests: &[DecryptRequest],
        grant: &DecryptionGrant,
    ) -> Result<HashMap<B256, U256>, ClientError> {
        let body = UserDecryptRequestBody {
            handle_contract_pairs: requests
                .iter()
                .map(|r| WirePair { handle: r.handle, contract_address: r.contract })
                .collect(),
            public_key: &grant.public_key,
            signature: &grant.signature,
            contract_addresses: &grant.contract_addresses,
            user_address: grant.user_address,
            start_timestamp: grant.start_timestamp,
            duration_days: grant.duration_days,
        };

        debug!(count = requests.len(), user = %grant.user_address, "batched user decrypt");
        let response: HashMap<B256, U256> = self
            .http
            .post(self.endpoint("v1/user-decrypt")?)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::DecryptionFailure(e.to_string()))?
            .json()
            .await
            .map_err(|e| ClientError::DecryptionFailure(e.to_string()))?;

        for request in requests {
            if !response.contains_key(&request.handle) {
                return Err(ClientError::DecryptionFailure(format!(
                    "response missing plaintext for handle {}",
                    request.handle
                )));
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_widths() {
        assert_eq!(EncryptedValue::U8(1).bit_width(), 8);
        assert_eq!(EncryptedValue::U16(1).bit_width(), 16);
        assert_eq!(EncryptedValue::U32(1).bit_width(), 32);
        assert_eq!(EncryptedValue::U64(1).bit_width(), 64);
        assert_eq!(EncryptedValue::U32(100_000).as_u64(), 100_000);
    }
}
