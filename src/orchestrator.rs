//! Top-level coordinator for the refresh / analyze / decrypt pipelines.
//!
//! All mutating operations are serialized by a single busy flag: a call
//! arriving while another is in flight is a no-op, never queued. Every
//! operation captures an [`OperationSnapshot`] up front and re-checks it at
//! each resumption point; stale results are dropped, not surfaced as errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use arc_swap::{ArcSwap, ArcSwapOption};
use tracing::{debug, info, warn};

use crate::backend::DecryptRequest;
use crate::chain::{ChainClient, ResultHandles};
use crate::config::{DeploymentMap, DeploymentStatus, GrantPolicy};
use crate::connector::{ConnectorLifecycle, ConnectorState};
use crate::error::ClientError;
use crate::grant::{GrantCache, GrantSigner};
use crate::session::{OperationSnapshot, SessionContext};
use crate::storage::StringStorage;

/// Decoded plaintexts for the five result handles. Recomputed on every
/// successful decrypt and committed wholesale; fields from two different
/// response batches are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearResult {
    /// Decrypted risk score.
    pub risk_score: U256,
    /// Decrypted risk level, one of 0, 1, 2.
    pub risk_level: U256,
    /// Decrypted stable allocation percentage.
    pub stable: U256,
    /// Decrypted bluechip allocation percentage.
    pub bluechip: U256,
    /// Decrypted high-risk allocation percentage.
    pub high_risk: U256,
}

impl ClearResult {
    fn from_response(
        handles: &ResultHandles,
        response: &HashMap<B256, U256>,
    ) -> Result<Self, ClientError> {
        let lookup = |handle: B256| {
            response.get(&handle).copied().ok_or_else(|| {
                ClientError::DecryptionFailure(format!("response missing plaintext for {handle}"))
            })
        };
        Ok(Self {
            risk_score: lookup(handles.risk_score)?,
            risk_level: lookup(handles.risk_level)?,
            stable: lookup(handles.stable)?,
            bluechip: lookup(handles.bluechip)?,
            high_risk: lookup(handles.high_risk)?,
        })
    }
}

/// Outcome of one orchestrated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    /// The operation ran and its result was committed.
    Completed,
    /// Another operation was in flight; this call was a no-op.
    Busy,
    /// The context changed mid-flight; the result was silently dropped.
    Discarded,
    /// The operation failed; the message is human-readable.
    Failed(String),
}

/// Releases the busy flag when the operation scope ends.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The client-side orchestration core.
///
/// Owns the busy flag, the handle set, the clear results, and the status
/// message; drives the connector lifecycle and the grant cache. The host
/// feeds wallet and network events in through [`set_chain`](Self::set_chain)
/// and [`set_signer`](Self::set_signer).
pub struct RiskAnalyzerClient<C> {
    lifecycle: Arc<ConnectorLifecycle>,
    chain: C,
    session: SessionContext,
    deployments: DeploymentMap,
    grants: GrantCache,
    storage: Arc<dyn StringStorage>,
    signer: ArcSwapOption<Arc<dyn GrantSigner>>,
    busy: AtomicBool,
    handles: ArcSwapOption<ResultHandles>,
    clear: ArcSwapOption<ClearResult>,
    message: ArcSwap<String>,
}

impl<C> std::fmt::Debug for RiskAnalyzerClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskAnalyzerClient")
            .field("session", &self.session.current())
            .field("busy", &self.busy.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<C: ChainClient> RiskAnalyzerClient<C> {
    /// Creates an orchestrator with the default grant policy.
    pub fn new(
        lifecycle: Arc<ConnectorLifecycle>,
        chain: C,
        deployments: DeploymentMap,
        storage: Arc<dyn StringStorage>,
    ) -> Self {
        Self {
            lifecycle,
            chain,
            session: SessionContext::new(),
            deployments,
            grants: GrantCache::new(GrantPolicy::default()),
            storage,
            signer: ArcSwapOption::const_empty(),
            busy: AtomicBool::new(false),
            handles: ArcSwapOption::const_empty(),
            clear: ArcSwapOption::const_empty(),
            message: ArcSwap::from_pointee(String::new()),
        }
    }

    /// Replaces the grant policy.
    pub fn with_grant_policy(mut self, policy: GrantPolicy) -> Self {
        self.grants = GrantCache::new(policy);
        self
    }

    /// The shared live context. Exposed so collaborators (and tests) can
    /// observe exactly what the staleness checks compare against.
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Re-targets the client to `chain_id` (or disconnects on `None`).
    ///
    /// Resolves the deployment, replaces the live context, recreates the
    /// connector, and refreshes the handles when a deployment exists.
    pub async fn set_chain(&self, chain_id: Option<u64>) -> ConnectorState {
        let contract = chain_id.and_then(|id| match self.deployments.resolve(id) {
            DeploymentStatus::Deployed(d) => Some(d.address),
            DeploymentStatus::NotDeployed => None,
        });
        info!(?chain_id, ?contract, "session chain changed");
        self.session.set_chain(chain_id, contract);
        // Handles belong to the previous target.
        self.handles.store(None);

        let state = self.lifecycle.reconfigure(chain_id).await;
        if contract.is_some() {
            self.refresh().await;
        }
        state
    }

    /// Replaces the active signing account.
    pub fn set_signer(&self, signer: Option<Arc<dyn GrantSigner>>) {
        self.session.set_signer(signer.as_ref().map(|s| s.address()));
        self.signer.store(signer.map(Arc::new));
    }

    fn signer(&self) -> Option<Arc<dyn GrantSigner>> {
        self.signer.load_full().map(|s| (*s).clone())
    }

    /// Whether a mutating operation is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Whether [`refresh`](Self::refresh) would run right now.
    pub fn can_refresh(&self) -> bool {
        !self.is_busy() && self.session.current().contract.is_some()
    }

    /// Whether [`analyze`](Self::analyze) would run right now.
    pub fn can_analyze(&self) -> bool {
        !self.is_busy()
            && self.lifecycle.connector().is_some()
            && OperationSnapshot::capture(&self.session).is_some()
    }

    /// Whether [`decrypt_all`](Self::decrypt_all) would run right now.
    pub fn can_decrypt(&self) -> bool {
        self.can_analyze() && self.handles.load().is_some()
    }

    /// Whether the contract is deployed on the active chain. `None` while
    /// disconnected.
    pub fn is_deployed(&self) -> Option<bool> {
        let chain_id = self.session.current().chain_id?;
        Some(matches!(self.deployments.resolve(chain_id), DeploymentStatus::Deployed(_)))
    }

    /// The resolved contract address, if any.
    pub fn contract_address(&self) -> Option<Address> {
        self.session.current().contract
    }

    /// The latest committed handle set.
    pub fn handles(&self) -> Option<ResultHandles> {
        self.handles.load_full().map(|h| *h)
    }

    /// The latest committed clear results.
    pub fn clear(&self) -> Option<ClearResult> {
        self.clear.load_full().map(|c| *c)
    }

    /// The current human-readable status message.
    pub fn message(&self) -> String {
        (**self.message.load()).clone()
    }

    /// Checks the contract's confidential protocol id against `supported`.
    pub async fn verify_protocol(&self, supported: U256) -> Result<(), ClientError> {
        let contract = self
            .session
            .current()
            .contract
            .ok_or(ClientError::NotDeployed(self.session.current().chain_id.unwrap_or_default()))?;
        let id = self.chain.protocol_id(contract).await?;
        if id == supported {
            Ok(())
        } else {
            Err(ClientError::UnsupportedProtocol(id))
        }
    }

    /// Re-reads the five result handles.
    ///
    /// No-op while busy. The fetched handles are committed only if the chain
    /// and contract captured at call start still match the live context;
    /// otherwise the result is dropped.
    pub async fn refresh(&self) -> OpOutcome {
        let Some(_busy) = self.try_busy() else {
            debug!("refresh skipped while busy");
            return OpOutcome::Busy;
        };
        let live = self.session.current();
        let (Some(chain_id), Some(contract)) = (live.chain_id, live.contract) else {
            self.handles.store(None);
            return OpOutcome::Failed("no contract deployment resolved".into());
        };

        match self.chain.fetch_handles(contract).await {
            Ok(fetched) => {
                let now = self.session.current();
                if now.chain_id == Some(chain_id) && now.contract == Some(contract) {
                    self.handles.store(Some(Arc::new(fetched)));
                    debug!(chain_id, "result handles refreshed");
                    OpOutcome::Completed
                } else {
                    debug!(chain_id, "dropping stale handle refresh");
                    OpOutcome::Discarded
                }
            }
            Err(e) => {
                warn!(error = %e, "handle refresh failed");
                OpOutcome::Failed(e.to_string())
            }
        }
    }

    /// Encrypts the three inputs, submits `analyze(...)`, awaits
    /// confirmation, and refreshes the handles.
    ///
    /// The inputs are appended to the encrypted-input buffer as 32-bit
    /// unsigned values in declared order: assets, risk preference, position
    /// volatility.
    pub async fn analyze(
        &self,
        assets: u32,
        risk_preference: u32,
        position_volatility: u32,
    ) -> OpOutcome {
        let Some(connector) = self.lifecycle.connector() else {
            return OpOutcome::Failed(ClientError::NoConnector.to_string());
        };
        let Some(busy) = self.try_busy() else {
            debug!("analyze skipped while busy");
            return OpOutcome::Busy;
        };
        let Some(snapshot) = OperationSnapshot::capture(&self.session) else {
            return OpOutcome::Failed("session context incomplete".into());
        };

        self.set_message("Encrypting inputs...");
        let mut builder = connector.create_encrypted_input(snapshot.contract, snapshot.signer);
        builder.add32(assets).add32(risk_preference).add32(position_volatility);
        let payload = match builder.encrypt().await {
            Ok(payload) => payload,
            Err(e) => return self.fail_with(format!("Analyze failed: {e}")),
        };
        if !snapshot.is_current(&self.session) {
            self.set_message("Ignoring analysis (stale)");
            return OpOutcome::Discarded;
        }

        let handles: [B256; 3] = match payload.handles.as_slice().try_into() {
            Ok(handles) => handles,
            Err(_) => {
                return self.fail_with(format!(
                    "Analyze failed: backend returned {} handles for 3 values",
                    payload.handles.len()
                ))
            }
        };

        self.set_message("Submitting analyze transaction...");
        if let Err(e) = self
            .chain
            .submit_analysis(snapshot.contract, handles, payload.proof)
            .await
        {
            return self.fail_with(format!("Analyze failed: {e}"));
        }

        if !snapshot.is_current(&self.session) {
            self.set_message("Ignoring refresh (stale)");
            return OpOutcome::Discarded;
        }

        self.set_message("Analysis confirmed, refreshing results...");
        drop(busy);
        self.refresh().await;
        self.set_message("Analysis completed.");
        OpOutcome::Completed
    }

    /// Obtains a decryption grant and decrypts all five result handles in
    /// one batched request, committing the clear results wholesale.
    pub async fn decrypt_all(&self) -> OpOutcome {
        let Some(connector) = self.lifecycle.connector() else {
            return OpOutcome::Failed(ClientError::NoConnector.to_string());
        };
        let Some(signer) = self.signer() else {
            return OpOutcome::Failed("no signing account".into());
        };
        let Some(handles) = self.handles.load_full() else {
            return OpOutcome::Failed("result handles not loaded".into());
        };
        let Some(_busy) = self.try_busy() else {
            debug!("decrypt skipped while busy");
            return OpOutcome::Busy;
        };
        let Some(snapshot) = OperationSnapshot::capture(&self.session) else {
            return OpOutcome::Failed("session context incomplete".into());
        };
        // Captured by value: a refresh landing mid-decrypt must not change
        // which handles this batch decrypts.
        let handles = *handles;

        self.set_message("Starting decryption...");
        let grant = match self
            .grants
            .load_or_sign(&connector, &[snapshot.contract], &*signer, self.storage.as_ref())
            .await
        {
            Ok(grant) => grant,
            Err(e) => return self.fail_with(format!("Unable to build decryption grant: {e}")),
        };
        if !snapshot.is_current(&self.session) {
            self.set_message("Ignoring decryption (stale)");
            return OpOutcome::Discarded;
        }

        self.set_message("Calling batched user decrypt...");
        let requests: Vec<DecryptRequest> = handles
            .all()
            .iter()
            .map(|h| DecryptRequest { handle: *h, contract: snapshot.contract })
            .collect();
        let response = match connector.user_decrypt(&requests, &grant).await {
            Ok(response) => response,
            Err(e) => return self.fail_with(format!("Decryption failed: {e}")),
        };
        if !snapshot.is_current(&self.session) {
            self.set_message("Ignoring decrypted results (stale)");
            return OpOutcome::Discarded;
        }

        let clear = match ClearResult::from_response(&handles, &response) {
            Ok(clear) => clear,
            Err(e) => return self.fail_with(format!("Decryption failed: {e}")),
        };
        self.clear.store(Some(Arc::new(clear)));
        self.set_message("Decryption completed.");
        OpOutcome::Completed
    }

    fn try_busy(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            .then(|| BusyGuard { flag: &self.busy })
    }

    fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(status = %message, "phase transition");
        self.message.store(Arc::new(message));
    }

    fn fail_with(&self, message: String) -> OpOutcome {
        warn!(status = %message, "operation failed");
        self.message.store(Arc::new(message.clone()));
        OpOutcome::Failed(message)
    }
}
