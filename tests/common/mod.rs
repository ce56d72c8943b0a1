//! Shared mocks and fixtures for orchestrator integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::{address, keccak256, Address, Bytes, Signature, B256, U256};
use alloy_sol_types::Eip712Domain;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use risk_analyzer_client::{
    probe_runtime, ChainClient, ClientError, ConfidentialBackend, ConnectorLifecycle,
    DecryptRequest, DecryptionGrant, DeploymentMap, EncryptedPayload, EncryptedValue, GrantSigner,
    Keypair, LocalGrantSigner, MemoryStorage, ResultHandles, RiskAnalyzerClient, RuntimeLoader,
    RuntimeModule, RuntimeShape, SessionContext, UserDecryptRequestVerification,
};

pub const CHAIN_A: u64 = 31337;
pub const CHAIN_B: u64 = 11155111;
pub const CONTRACT_A: Address = address!("00000000000000000000000000000000000a11ce");
pub const CONTRACT_B: Address = address!("0000000000000000000000000000000000b0bb1e");

pub fn test_module() -> RuntimeModule {
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

pub fn test_handles() -> ResultHandles {
    ResultHandles {
        risk_score: B256::repeat_byte(0x01),
        risk_level: B256::repeat_byte(0x02),
        stable: B256::repeat_byte(0x03),
        bluechip: B256::repeat_byte(0x04),
        high_risk: B256::repeat_byte(0x05),
    }
}

pub fn test_plaintexts(handles: &ResultHandles) -> HashMap<B256, U256> {
    HashMap::from([
        (handles.risk_score, U256::from(350)),
        (handles.risk_level, U256::from(1)),
        (handles.stable, U256::from(40)),
        (handles.bluechip, U256::from(35)),
        (handles.high_risk, U256::from(25)),
    ])
}

/// Backend mock recording every call and answering from preset plaintexts.
#[derive(Default)]
pub struct MockBackend {
    batch_counter: AtomicU64,
    pub encrypt_calls: Mutex<Vec<(Address, Address, Vec<EncryptedValue>)>>,
    pub decrypt_calls: Mutex<Vec<Vec<DecryptRequest>>>,
    pub plaintexts: Mutex<HashMap<B256, U256>>,
    /// When set, `user_decrypt` parks until notified. Lets tests hold the
    /// busy flag at a suspension point.
    pub decrypt_gate: Mutex<Option<Arc<Notify>>>,
}

#[async_trait]
impl ConfidentialBackend for MockBackend {
    fn generate_keypair(&self) -> Keypair {
        let n = self.batch_counter.fetch_add(1, Ordering::SeqCst);
        Keypair {
            public_key: Bytes::copy_from_slice(keccak256([0x9B, n as u8]).as_slice()),
            private_key: Bytes::copy_from_slice(keccak256([0x5E, n as u8]).as_slice()),
        }
    }

    async fn encrypt_input(
        &self,
        contract: Address,
        user: Address,
        values: &[EncryptedValue],
    ) -> Result<EncryptedPayload, ClientError> {
        self.encrypt_calls
            .lock()
            .unwrap()
            .push((contract, user, values.to_vec()));
        let batch = self.batch_counter.fetch_add(1, Ordering::SeqCst);
        let handles = (0..values.len())
            .map(|i| keccak256([batch as u8, i as u8]))
            .collect();
        Ok(EncryptedPayload { handles, proof: Bytes::from(vec![0xAA; 64]) })
    }

    async fn user_decrypt(
        &self,
        requests: &[DecryptRequest],
        _grant: &DecryptionGrant,
    ) -> Result<HashMap<B256, U256>, ClientError> {
        let gate = self.decrypt_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.decrypt_calls.lock().unwrap().push(requests.to_vec());

        let plaintexts = self.plaintexts.lock().unwrap();
        let mut response = HashMap::new();
        for request in requests {
            match plaintexts.get(&request.handle) {
                Some(value) => {
                    response.insert(request.handle, *value);
                }
                None => {
                    return Err(ClientError::DecryptionFailure(format!(
                        "no plaintext for handle {}",
                        request.handle
                    )))
                }
            }
        }
        Ok(response)
    }
}

/// Chain mock serving preset handles and recording submissions.
#[derive(Default)]
pub struct MockChainClient {
    pub handles: Mutex<Option<ResultHandles>>,
    pub fetch_count: AtomicU32,
    pub submissions: Mutex<Vec<(Address, [B256; 3], Bytes)>>,
    /// When set, the chain id flips mid-submission, as if the user switched
    /// networks while the transaction was confirming.
    pub switch_on_submit: Mutex<Option<(SessionContext, u64)>>,
}

/// Cloneable chain-seam handle over the shared mock.
#[derive(Clone)]
pub struct SharedChain(pub Arc<MockChainClient>);

#[async_trait]
impl ChainClient for SharedChain {
    async fn fetch_handles(&self, _contract: Address) -> Result<ResultHandles, ClientError> {
        self.0.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.0
            .handles
            .lock()
            .unwrap()
            .ok_or_else(|| ClientError::Rpc("no handles configured".into()))
    }

    async fn submit_analysis(
        &self,
        contract: Address,
        handles: [B256; 3],
        proof: Bytes,
    ) -> Result<(), ClientError> {
        self.0.submissions.lock().unwrap().push((contract, handles, proof));
        if let Some((session, chain_id)) = self.0.switch_on_submit.lock().unwrap().take() {
            session.set_chain(Some(chain_id), None);
        }
        Ok(())
    }

    async fn protocol_id(&self, _contract: Address) -> Result<U256, ClientError> {
        Ok(U256::from(1))
    }
}

/// Signer mock counting round-trips, optionally rejecting, and optionally
/// switching networks at the signing suspension point.
pub struct MockSigner {
    inner: LocalGrantSigner,
    pub sign_count: AtomicU32,
    pub reject: AtomicBool,
    pub switch_on_sign: Mutex<Option<(SessionContext, u64)>>,
}

impl MockSigner {
    pub fn random() -> Self {
        Self {
            inner: LocalGrantSigner::random(),
            sign_count: AtomicU32::new(0),
            reject: AtomicBool::new(false),
            switch_on_sign: Mutex::new(None),
        }
    }

    pub fn signings(&self) -> u32 {
        self.sign_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GrantSigner for MockSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_grant(
        &self,
        domain: &Eip712Domain,
        message: &UserDecryptRequestVerification,
    ) -> Result<Signature, ClientError> {
        self.sign_count.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(ClientError::SignatureRejected);
        }
        let signature = self.inner.sign_grant(domain, message).await?;
        if let Some((session, chain_id)) = self.switch_on_sign.lock().unwrap().take() {
            session.set_chain(Some(chain_id), None);
        }
        Ok(signature)
    }
}

pub struct Harness {
    pub client: Arc<RiskAnalyzerClient<SharedChain>>,
    pub backend: Arc<MockBackend>,
    pub chain: Arc<MockChainClient>,
    pub storage: Arc<MemoryStorage>,
    pub signer: Arc<MockSigner>,
}

impl Harness {
    /// Builds a connected client on `CHAIN_A` with handles already
    /// refreshed.
    pub async fn connected() -> Self {
        let backend = Arc::new(MockBackend::default());
        *backend.plaintexts.lock().unwrap() = test_plaintexts(&test_handles());

        let chain = Arc::new(MockChainClient::default());
        *chain.handles.lock().unwrap() = Some(test_handles());

        let factory_backend = backend.clone();
        let lifecycle = Arc::new(ConnectorLifecycle::with_backend_factory(
            RuntimeLoader::preloaded(test_module()),
            Box::new(move |_, _| factory_backend.clone() as Arc<dyn ConfidentialBackend>),
        ));

        let deployments = DeploymentMap::new()
            .with(CHAIN_A, CONTRACT_A, "hardhat")
            .with(CHAIN_B, CONTRACT_B, "sepolia");

        let storage = Arc::new(MemoryStorage::new());
        let signer = Arc::new(MockSigner::random());

        let client = Arc::new(RiskAnalyzerClient::new(
            lifecycle,
            SharedChain(chain.clone()),
            deployments,
            storage.clone(),
        ));
        client.set_signer(Some(signer.clone() as Arc<dyn GrantSigner>));
        let state = client.set_chain(Some(CHAIN_A)).await;
        assert!(state.is_ready(), "connector should be ready after set_chain");
        assert_eq!(client.handles(), Some(test_handles()));

        Self { client, backend, chain, storage, signer }
    }
}
