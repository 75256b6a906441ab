use std::future::Future;

use crate::error::ProviderError;
use crate::job::IdentityRef;

/// An authenticated connection to the provider, owned by exactly one worker.
///
/// Session establishment happens before a connection reaches the engine;
/// the engine only resolves names and sends invites through it.
pub trait Connection: Send + Sync + 'static {
    /// Resolved destination group.
    type Target: Send + Sync;

    /// Resolved identity to invite.
    type Identity: Send + Sync;

    /// Resolve the destination group by name or link.
    fn resolve_target(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Self::Target, ProviderError>> + Send;

    fn resolve_identity(
        &self,
        identity: &IdentityRef,
    ) -> impl Future<Output = Result<Self::Identity, ProviderError>> + Send;

    /// Add `identity` to `target`.
    fn invite(
        &self,
        target: &Self::Target,
        identity: &Self::Identity,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// Release the session. The default does nothing.
    fn disconnect(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}
