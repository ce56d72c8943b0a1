//! Chain access seam: view calls and the state-changing `analyze` submission.

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use async_trait::async_trait;
use tracing::debug;

use crate::contract::RiskAnalyzer;
use crate::error::ClientError;

/// The five result handles read from `getAll()`. Committed wholesale; a
/// refresh never patches individual fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultHandles {
    /// Handle of the encrypted risk score.
    pub risk_score: B256,
    /// Handle of the encrypted risk level.
    pub risk_level: B256,
    /// Handle of the encrypted stable allocation percentage.
    pub stable: B256,
    /// Handle of the encrypted bluechip allocation percentage.
    pub bluechip: B256,
    /// Handle of the encrypted high-risk allocation percentage.
    pub high_risk: B256,
}

impl ResultHandles {
    /// The handles in `getAll()` order.
    pub fn all(&self) -> [B256; 5] {
        [self.risk_score, self.risk_level, self.stable, self.bluechip, self.high_risk]
    }
}

/// Read/write access to the risk-analyzer contract.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Reads the five result handles via `getAll()`.
    async fn fetch_handles(&self, contract: Address) -> Result<ResultHandles, ClientError>;

    /// Submits `analyze(...)` with the three ciphertext handles and the
    /// input proof, and waits for confirmation. A revert or a failed
    /// confirmation is a [`ClientError::SubmissionFailure`].
    async fn submit_analysis(
        &self,
        contract: Address,
        handles: [B256; 3],
        proof: Bytes,
    ) -> Result<(), ClientError>;

    /// Reads the confidential protocol id backing the contract.
    async fn protocol_id(&self, contract: Address) -> Result<U256, ClientError>;
}

/// [`ChainClient`] over an alloy provider.
///
/// Reads work with any provider; `submit_analysis` needs one carrying a
/// wallet filler, e.g. `ProviderBuilder::new().wallet(...).connect_http(...)`.
#[derive(Debug, Clone)]
pub struct AlloyChainClient<P> {
    provider: P,
}

impl AlloyChainClient<RootProvider> {
    /// Read-only client over plain HTTP.
    pub fn new_http(url: &str) -> Result<Self, ClientError> {
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_http(url.parse().map_err(|e| ClientError::Rpc(format!("bad rpc url: {e}")))?);
        Ok(Self { provider })
    }
}

impl<P> AlloyChainClient<P> {
    /// Wraps an existing provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P> ChainClient for AlloyChainClient<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    async fn fetch_handles(&self, contract: Address) -> Result<ResultHandles, ClientError> {
        let instance = RiskAnalyzer::new(contract, self.provider.clone());
        let all = instance
            .getAll()
            .call()
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))?;

        Ok(ResultHandles {
            risk_score: all.riskScore,
            risk_level: all.riskLevel,
            stable: all.stablePct,
            bluechip: all.bluechipPct,
            high_risk: all.highRiskPct,
        })
    }

    async fn submit_analysis(
        &self,
        contract: Address,
        handles: [B256; 3],
        proof: Bytes,
    ) -> Result<(), ClientError> {
        let instance = RiskAnalyzer::new(contract, self.provider.clone());
        let pending = instance
            .analyze(handles[0], handles[1], handles[2], proof)
            .send()
            .await
            .map_err(|e| ClientError::SubmissionFailure(e.to_string()))?;

        debug!(tx = %pending.tx_hash(), "analyze transaction submitted");
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ClientError::SubmissionFailure(e.to_string()))?;

        if !receipt.status() {
            return Err(ClientError::SubmissionFailure(format!(
                "transaction {} reverted",
                receipt.transaction_hash
            )));
        }
        Ok(())
    }

    async fn protocol_id(&self, contract: Address) -> Result<U256, ClientError> {
        let instance = RiskAnalyzer::new(contract, self.provider.clone());
        instance
            .confidentialProtocolId()
            .call()
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))
    }
}
