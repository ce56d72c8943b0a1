//! Fetching and structural validation of the confidential-compute runtime
//! module.
//!
//! The runtime ships as a module descriptor served from a fixed CDN location
//! (or a local mock endpoint during development). Before anything trusts it,
//! [`probe_runtime`] checks the descriptor's shape and returns a tagged
//! result rather than throwing on the first bad member.

use std::sync::Arc;

use alloy_primitives::Address;
use arc_swap::ArcSwapOption;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::config::SDK_CDN_URL;
use crate::error::ClientError;

/// Default network configuration carried by a valid runtime module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDefaults {
    /// Address of the access-control contract gating decryption.
    pub acl_contract_address: Address,
    /// Address of the key-management contract.
    pub kms_contract_address: Address,
    /// Chain id of the gateway chain the relayer settles on.
    pub gateway_chain_id: u64,
    /// Base URL of the relayer the runtime talks to.
    pub relayer_url: Url,
}

/// A validated runtime module descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeModule {
    /// Runtime version string, `"unknown"` when the descriptor omits it.
    pub version: String,
    /// Default network configuration object.
    pub network: NetworkDefaults,
    /// Whether the runtime reported itself as already initialized.
    pub initialized: bool,
}

/// Tagged result of structurally probing a runtime descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeShape {
    /// The descriptor satisfies the runtime contract.
    Valid(RuntimeModule),
    /// The descriptor is missing a required surface or has a member of the
    /// wrong type. The reason names the offending member.
    Invalid(String),
}

fn invalid(reason: impl Into<String>) -> RuntimeShape {
    RuntimeShape::Invalid(reason.into())
}

/// Structurally validates a runtime module descriptor.
///
/// The contract is: an object exposing an `initSDK` initializer, a
/// `createInstance` factory, and a `SepoliaConfig` default network object
/// carrying the ACL and KMS contract addresses, the gateway chain id, and
/// the relayer URL. An `__initialized__` member, when present, must be a
/// boolean.
pub fn probe_runtime(value: &Value) -> RuntimeShape {
    let Some(obj) = value.as_object() else {
        return invalid("runtime descriptor is not an object");
    };

    for member in ["initSDK", "createInstance"] {
        match obj.get(member) {
            None => return invalid(format!("missing {member}")),
            Some(v) if !v.is_object() => {
                return invalid(format!("{member} is not an entry-point object"))
            }
            Some(_) => {}
        }
    }

    let initialized = match obj.get("__initialized__") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return invalid("__initialized__ is not a boolean"),
    };

    let Some(config) = obj.get("SepoliaConfig").and_then(Value::as_object) else {
        return invalid("SepoliaConfig is not an object");
    };

    let acl_contract_address = match parse_address(config.get("aclContractAddress")) {
        Some(addr) => addr,
        None => return invalid("SepoliaConfig.aclContractAddress is not an address"),
    };
    let kms_contract_address = match parse_address(config.get("kmsContractAddress")) {
        Some(addr) => addr,
        None => return invalid("SepoliaConfig.kmsContractAddress is not an address"),
    };
    let Some(gateway_chain_id) = config.get("gatewayChainId").and_then(Value::as_u64) else {
        return invalid("SepoliaConfig.gatewayChainId is not a number");
    };
    let relayer_url = match config
        .get("relayerUrl")
        .and_then(Value::as_str)
        .and_then(|s| Url::parse(s).ok())
    {
        Some(url) => url,
        None => return invalid("SepoliaConfig.relayerUrl is not a URL"),
    };

    let version = obj
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_owned();

    RuntimeShape::Valid(RuntimeModule {
        version,
        network: NetworkDefaults {
            acl_contract_address,
            kms_contract_address,
            gateway_chain_id,
            relayer_url,
        },
        initialized,
    })
}

fn parse_address(value: Option<&Value>) -> Option<Address> {
    value.and_then(Value::as_str).and_then(|s| s.parse().ok())
}

/// Loads the runtime module and holds the validated result.
///
/// The slot is owned by the loader, not process-global; callers read through
/// [`module`](Self::module) and never keep the reference beyond one
/// operation.
pub struct RuntimeLoader {
    url: Url,
    http: reqwest::Client,
    slot: ArcSwapOption<RuntimeModule>,
}

impl std::fmt::Debug for RuntimeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeLoader")
            .field("url", &self.url.as_str())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl RuntimeLoader {
    /// Creates a loader pointed at the default CDN location.
    pub fn new() -> Self {
        Self::with_url(SDK_CDN_URL.parse().expect("default CDN URL is valid"))
    }

    /// Creates a loader pointed at `url`, e.g. a local mock endpoint.
    pub fn with_url(url: Url) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
            slot: ArcSwapOption::const_empty(),
        }
    }

    /// Creates a loader whose slot already holds a validated module.
    /// [`load`](Self::load) then resolves without any fetch.
    pub fn preloaded(module: RuntimeModule) -> Self {
        let loader = Self::new();
        loader.slot.store(Some(Arc::new(module)));
        loader
    }

    /// Whether a validated runtime module is already present.
    pub fn is_loaded(&self) -> bool {
        self.slot.load().is_some()
    }

    /// Returns the loaded module without fetching.
    pub fn module(&self) -> Option<Arc<RuntimeModule>> {
        self.slot.load_full()
    }

    /// Loads the runtime module, idempotently.
    ///
    /// Resolves immediately if a validated module is already in the slot.
    /// Otherwise fetches the descriptor, probes its shape, and stores the
    /// result. Safe to call repeatedly and from concurrent tasks; a racing
    /// load simply overwrites the slot with an equivalent module.
    pub async fn load(&self) -> Result<Arc<RuntimeModule>, ClientError> {
        if let Some(module) = self.slot.load_full() {
            debug!(version = %module.version, "runtime module already loaded");
            return Ok(module);
        }

        debug!(url = %self.url, "fetching runtime module descriptor");
        let response = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::LoadFailure(e.to_string()))?;
        let descriptor: Value = response
            .json()
            .await
            .map_err(|e| ClientError::LoadFailure(e.to_string()))?;

        match probe_runtime(&descriptor) {
            RuntimeShape::Valid(module) => {
                let module = Arc::new(module);
                self.slot.store(Some(module.clone()));
                info!(
                    version = %module.version,
                    relayer = %module.network.relayer_url,
                    "runtime module loaded"
                );
                Ok(module)
            }
            RuntimeShape::Invalid(reason) => Err(ClientError::InvalidRuntimeShape(reason)),
        }
    }
}

impl Default for RuntimeLoader {
    fn default() -> Self {
        Self::new()
    }
}
