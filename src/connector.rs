//! Connector lifecycle: one ready-to-use capability object per network.
//!
//! The connector is owned here and replaced wholesale whenever the network
//! or provider changes. Consumers read it through [`ConnectorLifecycle::connector`]
//! and never cache it beyond one operation; in-flight work re-checks its
//! snapshot before applying results.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use crate::backend::{
    ConfidentialBackend, DecryptRequest, EncryptedPayload, EncryptedValue, RelayerBackend,
};
use crate::error::ClientError;
use crate::grant::DecryptionGrant;
use crate::loader::{RuntimeLoader, RuntimeModule};

/// Live capability binding to the confidential-compute runtime for one
/// network. Never mutated after construction; a network or provider change
/// produces a new connector and drops this one.
pub struct Connector {
    chain_id: u64,
    acl_address: Address,
    backend: Arc<dyn ConfidentialBackend>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("chain_id", &self.chain_id)
            .field("acl_address", &self.acl_address)
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Creates a connector bound to `chain_id`.
    pub fn new(chain_id: u64, acl_address: Address, backend: Arc<dyn ConfidentialBackend>) -> Self {
        Self { chain_id, acl_address, backend }
    }

    /// The chain id this connector is bound to.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address of the access-control contract gating decryption.
    pub fn acl_address(&self) -> Address {
        self.acl_address
    }

    /// The backend capability behind this connector.
    pub fn backend(&self) -> &Arc<dyn ConfidentialBackend> {
        &self.backend
    }

    /// Starts an encrypted-input buffer bound to `(contract, user)`.
    pub fn create_encrypted_input(&self, contract: Address, user: Address) -> EncryptedInputBuilder {
        EncryptedInputBuilder {
            backend: self.backend.clone(),
            contract,
            user,
            values: Vec::new(),
        }
    }

    /// Issues one batched decrypt request through the backend.
    pub async fn user_decrypt(
        &self,
        requests: &[DecryptRequest],
        grant: &DecryptionGrant,
    ) -> Result<HashMap<B256, U256>, ClientError> {
        self.backend.user_decrypt(requests, grant).await
    }
}

/// Accumulates fixed-width unsigned values in declared order, then encrypts
/// them in one backend round-trip.
pub struct EncryptedInputBuilder {
    backend: Arc<dyn ConfidentialBackend>,
    contract: Address,
    user: Address,
    values: Vec<EncryptedValue>,
}

impl EncryptedInputBuilder {
    /// Appends an 8-bit unsigned value.
    pub fn add8(&mut self, value: u8) -> &mut Self {
        self.values.push(EncryptedValue::U8(value));
        self
    }

    /// Appends a 16-bit unsigned value.
    pub fn add16(&mut self, value: u16) -> &mut Self {
        self.values.push(EncryptedValue::U16(value));
        self
    }

    /// Appends a 32-bit unsigned value.
    pub fn add32(&mut self, value: u32) -> &mut Self {
        self.values.push(EncryptedValue::U32(value));
        self
    }

    /// Appends a 64-bit unsigned value.
    pub fn add64(&mut self, value: u64) -> &mut Self {
        self.values.push(EncryptedValue::U64(value));
        self
    }

    /// The values appended so far, in declared order.
    pub fn values(&self) -> &[EncryptedValue] {
        &self.values
    }

    /// Encrypts the buffered values, returning one handle per value plus the
    /// input proof.
    pub async fn encrypt(&self) -> Result<EncryptedPayload, ClientError> {
        self.backend
            .encrypt_input(self.contract, self.user, &self.values)
            .await
    }
}

/// Observable state of the connector lifecycle.
#[derive(Debug, Clone)]
pub enum ConnectorState {
    /// No provider/network configured.
    Idle,
    /// A connector is being created for the current target.
    Loading,
    /// A connector is ready for use.
    Ready(Arc<Connector>),
    /// Creation failed; the message is kept for observability.
    Error(String),
}

impl ConnectorState {
    /// Whether the lifecycle currently holds a ready connector.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Short label for logs and status display.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready(_) => "ready",
            Self::Error(_) => "error",
        }
    }
}

/// Builds a backend for a loaded runtime module and chain id. Overridable so
/// tests can exercise the lifecycle without a relayer.
pub type BackendFactory =
    dyn Fn(&RuntimeModule, u64) -> Arc<dyn ConfidentialBackend> + Send + Sync;

/// State machine producing a ready connector for the active network, and
/// re-creating it whenever the target changes.
pub struct ConnectorLifecycle {
    loader: RuntimeLoader,
    state: ArcSwap<ConnectorState>,
    epoch: AtomicU64,
    backend_factory: Box<BackendFactory>,
}

impl fmt::Debug for ConnectorLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorLifecycle")
            .field("state", &self.state().label())
            .finish_non_exhaustive()
    }
}

impl ConnectorLifecycle {
    /// Creates a lifecycle that builds [`RelayerBackend`]s from the runtime
    /// module's default network configuration.
    pub fn new(loader: RuntimeLoader) -> Self {
        Self::with_backend_factory(
            loader,
            Box::new(|module, chain_id| {
                Arc::new(RelayerBackend::new(module.network.relayer_url.clone(), chain_id))
            }),
        )
    }

    /// Creates a lifecycle with a custom backend factory.
    pub fn with_backend_factory(loader: RuntimeLoader, backend_factory: Box<BackendFactory>) -> Self {
        Self {
            loader,
            state: ArcSwap::from_pointee(ConnectorState::Idle),
            epoch: AtomicU64::new(0),
            backend_factory,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectorState {
        (**self.state.load()).clone()
    }

    /// The ready connector, if any. Callers must not hold this beyond one
    /// operation's snapshot.
    pub fn connector(&self) -> Option<Arc<Connector>> {
        match &**self.state.load() {
            ConnectorState::Ready(connector) => Some(connector.clone()),
            _ => None,
        }
    }

    /// Re-targets the lifecycle.
    ///
    /// `None` tears down: the state returns to `Idle` and the previous
    /// connector is dropped. `Some(chain_id)` loads the runtime and creates
    /// a fresh connector for that chain. Each call supersedes any in-flight
    /// one: a superseded call runs to completion but its result is discarded.
    pub async fn reconfigure(&self, chain_id: Option<u64>) -> ConnectorState {
        let epoch = self.begin_epoch();

        let Some(chain_id) = chain_id else {
            debug!("connector target cleared, back to idle");
            self.commit_if_current(epoch, ConnectorState::Idle);
            return self.state();
        };

        self.commit_if_current(epoch, ConnectorState::Loading);
        match self.build_connector(chain_id).await {
            Ok(connector) => {
                if self.commit_if_current(epoch, ConnectorState::Ready(Arc::new(connector))) {
                    info!(chain_id, "connector ready");
                }
            }
            Err(e) => {
                warn!(chain_id, error = %e, "connector creation failed");
                self.commit_if_current(epoch, ConnectorState::Error(e.to_string()));
            }
        }
        self.state()
    }

    async fn build_connector(&self, chain_id: u64) -> Result<Connector, ClientError> {
        let module = self.loader.load().await?;
        let backend = (self.backend_factory)(&module, chain_id);
        Ok(Connector::new(chain_id, module.network.acl_contract_address, backend))
    }

    pub(crate) fn begin_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Applies `next` only if no newer reconfigure has started since `epoch`
    /// was taken. Returns whether the state was applied.
    pub(crate) fn commit_if_current(&self, epoch: u64, next: ConnectorState) -> bool {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.state.store(Arc::new(next));
            true
        } else {
            debug!(epoch, state = next.label(), "discarding superseded lifecycle transition");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{probe_runtime, RuntimeShape};
    use serde_json::json;

    struct NullBackend;

    #[async_trait::async_trait]
    impl ConfidentialBackend for NullBackend {
        fn generate_keypair(&self) -> crate::backend::Keypair {
            crate::backend::Keypair {
                public_key: alloy_primitives::Bytes::from_static(&[0; 32]),
                private_key: alloy_primitives::Bytes::from_static(&[0; 32]),
            }
        }

        async fn encrypt_input(
            &self,
            _contract: Address,
            _user: Address,
            _values: &[EncryptedValue],
        ) -> Result<EncryptedPayload, ClientError> {
            Err(ClientError::NoConnector)
        }

        async fn user_decrypt(
            &self,
            _requests: &[DecryptRequest],
            _grant: &DecryptionGrant,
        ) -> Result<HashMap<B256, U256>, ClientError> {
            Err(ClientError::NoConnector)
        }
    }

    fn test_module() -> RuntimeModule {
        let descriptor = json!({
            "version": "0.3.0",
            "initSDK": {},
            "createInstance": {},
            "SepoliaConfig": {
                "aclContractAddress": "0x687820221192C5B662b25367F70076A37bc79b6c",
                "kmsContractAddress": "0x1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC",
                "gatewayChainId": 55815,
                "relayerUrl": "https://relayer.testnet.zama.cloud",
            },
        });
        match probe_runtime(&descriptor) {
            RuntimeShape::Valid(module) => module,
            RuntimeShape::Invalid(reason) => panic!("test descriptor invalid: {reason}"),
        }
    }

    fn test_lifecycle() -> ConnectorLifecycle {
        ConnectorLifecycle::with_backend_factory(
            RuntimeLoader::preloaded(test_module()),
            Box::new(|_, _| Arc::new(NullBackend)),
        )
    }

    #[test]
    fn builder_buffers_values_in_declared_order() {
        let connector = Connector::new(31337, Address::ZERO, Arc::new(NullBackend));
        let mut builder = connector.create_encrypted_input(Address::ZERO, Address::ZERO);
        builder.add8(1).add16(2).add32(3).add64(4);
        assert_eq!(
            builder.values(),
            &[
                EncryptedValue::U8(1),
                EncryptedValue::U16(2),
                EncryptedValue::U32(3),
                EncryptedValue::U64(4),
            ]
        );
    }

    #[tokio::test]
    async fn reconfigure_produces_ready_connector() {
        let lifecycle = test_lifecycle();
        assert!(matches!(lifecycle.state(), ConnectorState::Idle));

        let state = lifecycle.reconfigure(Some(31337)).await;
        assert!(state.is_ready());
        assert_eq!(lifecycle.connector().unwrap().chain_id(), 31337);
    }

    #[tokio::test]
    async fn reconfigure_replaces_connector_on_chain_switch() {
        let lifecycle = test_lifecycle();
        lifecycle.reconfigure(Some(31337)).await;
        let first = lifecycle.connector().unwrap();

        lifecycle.reconfigure(Some(11155111)).await;
        let second = lifecycle.connector().unwrap();
        assert_eq!(second.chain_id(), 11155111);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn reconfigure_none_tears_down() {
        let lifecycle = test_lifecycle();
        lifecycle.reconfigure(Some(31337)).await;
        assert!(lifecycle.connector().is_some());

        let state = lifecycle.reconfigure(None).await;
        assert!(matches!(state, ConnectorState::Idle));
        assert!(lifecycle.connector().is_none());
    }

    #[tokio::test]
    async fn superseded_transition_is_discarded() {
        let lifecycle = test_lifecycle();
        let stale_epoch = lifecycle.begin_epoch();

        // A newer reconfigure starts before the stale one resumes.
        lifecycle.reconfigure(Some(11155111)).await;

        let applied = lifecycle.commit_if_current(
            stale_epoch,
            ConnectorState::Error("stale load".into()),
        );
        assert!(!applied);
        assert_eq!(lifecycle.connector().unwrap().chain_id(), 11155111);
    }
}
