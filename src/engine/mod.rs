mod simulated;

pub use simulated::{SimulatedConfig, SimulatedEngine};

use crate::error::BackendError;
use crate::model::{RunRequest, RunResultRaw};
use futures::future::BoxFuture;

/// An inference backend the run controller delegates to.
///
/// `infer` is called at most once per submitted run. The returned future is driven on its own
/// task and may be dropped mid-flight when the run is cancelled, so implementations must not
/// rely on running to completion.
pub trait InferenceBackend: Send + Sync + 'static {
    fn infer(&self, request: RunRequest) -> BoxFuture<'static, Result<RunResultRaw, BackendError>>;
}
