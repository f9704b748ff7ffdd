//! Timer-based stand-in for a real inference service.

use super::InferenceBackend;
use crate::error::BackendError;
use crate::model::{InputKind, Prediction, RunRequest, RunResultRaw};
use futures::future::{BoxFuture, FutureExt};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedConfig {
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// Upper bound of random extra delay added to each run.
    #[serde(with = "humantime_serde")]
    pub jitter: Duration,
    /// Probability in [0, 1] that a run fails with a backend error.
    pub failure_rate: f64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(800),
            jitter: Duration::ZERO,
            failure_rate: 0.0,
        }
    }
}

const IMAGE_PREDICTIONS: [(&str, f64); 4] = [
    ("Cat", 0.925),
    ("Dog", 0.050),
    ("Bird", 0.015),
    ("Truck", 0.010),
];

const TEXT_PREDICTIONS: [(&str, f64); 3] = [
    ("Positive", 0.78),
    ("Neutral", 0.15),
    ("Negative", 0.07),
];

pub struct SimulatedEngine {
    cfg: SimulatedConfig,
}

impl SimulatedEngine {
    pub fn new(cfg: SimulatedConfig) -> Self {
        Self { cfg }
    }

    /// Canned distribution for an input kind, in shuffled order.
    fn canned_predictions(kind: InputKind) -> Vec<Prediction> {
        let table: &[(&str, f64)] = match kind {
            InputKind::Image => &IMAGE_PREDICTIONS,
            InputKind::Text => &TEXT_PREDICTIONS,
        };
        let mut out: Vec<Prediction> = table
            .iter()
            .map(|(label, c)| Prediction::new(*label, *c))
            .collect();
        out.shuffle(&mut rand::thread_rng());
        out
    }

    fn pick_delay(&self) -> Duration {
        if self.cfg.jitter.is_zero() {
            return self.cfg.delay;
        }
        let extra_ms = rand::thread_rng().gen_range(0..=self.cfg.jitter.as_millis() as u64);
        self.cfg.delay + Duration::from_millis(extra_ms)
    }

    fn should_fail(&self) -> bool {
        let rate = self.cfg.failure_rate.clamp(0.0, 1.0);
        rate > 0.0 && rand::thread_rng().gen_bool(rate)
    }
}

impl InferenceBackend for SimulatedEngine {
    fn infer(&self, request: RunRequest) -> BoxFuture<'static, Result<RunResultRaw, BackendError>> {
        // Decide everything up front so the future does not borrow the engine.
        let delay = self.pick_delay();
        let fail = self.should_fail();
        let kind = request.input_kind();
        let model = request.model_id.clone();
        debug!(%model, delay_ms = delay.as_millis() as u64, fail, "simulated inference");

        async move {
            let start = Instant::now();
            tokio::time::sleep(delay).await;
            if fail {
                return Err(BackendError::new(format!(
                    "simulated failure running {}",
                    model
                )));
            }
            Ok(RunResultRaw {
                predictions: Self::canned_predictions(kind),
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
        .boxed()
    }
}
