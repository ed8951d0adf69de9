//! Health probe trait.

use async_trait::async_trait;

use super::model::{ProbeOutcome, ProbeTarget};

/// Issues one lightweight request against a provider.
///
/// Implementations must not return errors: every failure mode is a
/// [`ProbeOutcome::Failed`].
///
/// # Example
///
/// ```ignore
/// struct AlwaysUp;
///
/// #[async_trait]
/// impl HealthProbe for AlwaysUp {
///     async fn probe(&self, _target: &ProbeTarget) -> ProbeOutcome {
///         ProbeOutcome::Healthy { response_time_ms: 1.0 }
///     }
/// }
/// ```
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome;
}
