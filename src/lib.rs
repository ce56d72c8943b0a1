#![doc = include_str!("../README.md")]

mod backend;
pub use backend::{
    ConfidentialBackend, DecryptRequest, EncryptedPayload, EncryptedValue, Keypair, RelayerBackend,
};

mod chain;
pub use chain::{AlloyChainClient, ChainClient, ResultHandles};

mod config;
pub use config::{Deployment, DeploymentMap, DeploymentStatus, GrantPolicy, SDK_CDN_URL};

mod connector;
pub use connector::{
    BackendFactory, Connector, ConnectorLifecycle, ConnectorState, EncryptedInputBuilder,
};

pub mod contract;

mod error;
pub use error::ClientError;

mod grant;
pub use grant::{
    authorization_domain, storage_key, DecryptionGrant, GrantCache, GrantSigner, LocalGrantSigner,
    UserDecryptRequestVerification,
};

mod loader;
pub use loader::{probe_runtime, NetworkDefaults, RuntimeLoader, RuntimeModule, RuntimeShape};

mod orchestrator;
pub use orchestrator::{ClearResult, OpOutcome, RiskAnalyzerClient};

mod session;
pub use session::{LiveContext, OperationSnapshot, SessionContext};

mod storage;
pub use storage::{MemoryStorage, StringStorage};
