//! Live execution context and staleness detection.
//!
//! Every asynchronous operation captures an [`OperationSnapshot`] at start
//! and re-checks it against the live [`SessionContext`] at each resumption
//! point. There is no cancellation: a stale operation runs to completion and
//! its output is discarded.

use std::sync::Arc;

use alloy_primitives::Address;
use arc_swap::ArcSwap;

/// The live `{network, signer, contract}` triple. Updated by the host on
/// wallet and network events; replaced wholesale, never mutated in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveContext {
    /// Active chain id, `None` while disconnected.
    pub chain_id: Option<u64>,
    /// Address of the active signing account.
    pub signer: Option<Address>,
    /// Resolved contract address for the active chain.
    pub contract: Option<Address>,
}

/// Shared, atomically-replaceable live context.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    inner: Arc<ArcSwap<LiveContext>>,
}

impl SessionContext {
    /// Creates an empty (disconnected) context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current live values.
    pub fn current(&self) -> LiveContext {
        **self.inner.load()
    }

    /// Replaces the whole context.
    pub fn set(&self, next: LiveContext) {
        self.inner.store(Arc::new(next));
    }

    /// Updates the chain id and its resolved contract together.
    pub fn set_chain(&self, chain_id: Option<u64>, contract: Option<Address>) {
        let mut next = self.current();
        next.chain_id = chain_id;
        next.contract = contract;
        self.set(next);
    }

    /// Updates the signing account.
    pub fn set_signer(&self, signer: Option<Address>) {
        let mut next = self.current();
        next.signer = signer;
        self.set(next);
    }
}

/// Immutable capture of the context an operation started under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSnapshot {
    /// Chain id at capture time.
    pub chain_id: u64,
    /// Contract address at capture time.
    pub contract: Address,
    /// Signer address at capture time.
    pub signer: Address,
}

impl OperationSnapshot {
    /// Captures the current context, or `None` if any component is missing.
    pub fn capture(ctx: &SessionContext) -> Option<Self> {
        let live = ctx.current();
        Some(Self {
            chain_id: live.chain_id?,
            contract: live.contract?,
            signer: live.signer?,
        })
    }

    /// Whether the live context still matches this snapshot exactly.
    pub fn is_current(&self, ctx: &SessionContext) -> bool {
        let live = ctx.current();
        live.chain_id == Some(self.chain_id)
            && live.contract == Some(self.contract)
            && live.signer == Some(self.signer)
    }

    /// Whether the live chain and contract still match. Read pipelines that
    /// run without a signer use this weaker check.
    pub fn chain_is_current(&self, ctx: &SessionContext) -> bool {
        let live = ctx.current();
        live.chain_id == Some(self.chain_id) && live.contract == Some(self.contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const CONTRACT: Address = address!("1111111111111111111111111111111111111111");
    const SIGNER: Address = address!("2222222222222222222222222222222222222222");

    fn connected() -> SessionContext {
        let ctx = SessionContext::new();
        ctx.set(LiveContext {
            chain_id: Some(31337),
            signer: Some(SIGNER),
            contract: Some(CONTRACT),
        });
        ctx
    }

    #[test]
    fn capture_requires_full_context() {
        let ctx = SessionContext::new();
        assert_eq!(OperationSnapshot::capture(&ctx), None);

        ctx.set_chain(Some(31337), Some(CONTRACT));
        assert_eq!(OperationSnapshot::capture(&ctx), None);

        ctx.set_signer(Some(SIGNER));
        let snapshot = OperationSnapshot::capture(&ctx).unwrap();
        assert_eq!(snapshot.chain_id, 31337);
        assert_eq!(snapshot.contract, CONTRACT);
        assert_eq!(snapshot.signer, SIGNER);
    }

    #[test]
    fn chain_switch_makes_snapshot_stale() {
        let ctx = connected();
        let snapshot = OperationSnapshot::capture(&ctx).unwrap();
        assert!(snapshot.is_current(&ctx));

        ctx.set_chain(Some(11155111), Some(CONTRACT));
        assert!(!snapshot.is_current(&ctx));
        assert!(!snapshot.chain_is_current(&ctx));
    }

    #[test]
    fn signer_switch_is_stale_but_chain_still_current() {
        let ctx = connected();
        let snapshot = OperationSnapshot::capture(&ctx).unwrap();

        ctx.set_signer(Some(address!("3333333333333333333333333333333333333333")));
        assert!(!snapshot.is_current(&ctx));
        assert!(snapshot.chain_is_current(&ctx));
    }
}
