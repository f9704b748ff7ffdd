//! Run lifecycle controller.
//!
//! `RunController` is the single owner of `RunState`. All transitions go through it, and in the
//! running application it is driven by one actor task (`run_controller`) so transitions are
//! serialized even on a multi-threaded runtime. Backend calls run on their own tasks and report
//! back tagged with the run id they answer; anything that no longer matches the in-flight run
//! is dropped.

use crate::engine::InferenceBackend;
use crate::error::{BackendError, RunError};
use crate::model::{
    ControllerEvent, InfoEvent, ModelCatalog, RunId, RunRequest, RunResult, RunResultRaw, RunState,
};
use crate::ranking;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Commands emitted by UI layers to drive the controller.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Submit(RunRequest),
    Cancel,
    #[cfg(any(test, feature = "tui"))]
    Clear,
    Unsubscribe(SubscriptionId),
    Quit,
}

pub type SubscriptionId = u64;

/// Outcome of one backend call, tagged with the run it answers.
#[derive(Debug)]
pub struct Completion {
    run_id: RunId,
    outcome: Result<RunResultRaw, BackendError>,
}

pub struct RunController {
    backend: Arc<dyn InferenceBackend>,
    catalog: ModelCatalog,
    state: RunState,
    next_run_id: RunId,
    in_flight: Option<JoinHandle<()>>,
    completion_tx: UnboundedSender<Completion>,
    observers: Vec<(SubscriptionId, UnboundedSender<ControllerEvent>)>,
    next_subscription: SubscriptionId,
}

impl RunController {
    /// Create a controller in `Idle`. Backend completions arrive on the returned receiver and
    /// must be fed back through [`RunController::on_completion`].
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        catalog: ModelCatalog,
    ) -> (Self, UnboundedReceiver<Completion>) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let controller = Self {
            backend,
            catalog,
            state: RunState::Idle,
            next_run_id: 1,
            in_flight: None,
            completion_tx,
            observers: Vec::new(),
            next_subscription: 1,
        };
        (controller, completion_rx)
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    #[cfg(any(test, feature = "tui"))]
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn subscribe(&mut self) -> (SubscriptionId, UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.observers.push((id, tx));
        (id, rx)
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    /// Start a run. Valid from `Idle` or `Completed`; a completed result is abandoned.
    pub fn submit(&mut self, request: RunRequest) -> Result<RunId, RunError> {
        if self.state.is_running() {
            return Err(RunError::AlreadyRunning);
        }
        request.validate(&self.catalog)?;

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        info!(run_id, model = %request.model_id, kind = request.input_kind().as_str(), "run submitted");

        let request = Arc::new(request);
        self.transition(RunState::Running {
            run_id,
            request: request.clone(),
        });
        self.spawn_inference(run_id, (*request).clone());
        Ok(run_id)
    }

    /// Abort the in-flight run. No-op outside `Running`; returns whether a run was cancelled.
    pub fn cancel(&mut self) -> bool {
        let Some(run_id) = self.state.in_flight() else {
            return false;
        };
        self.release_in_flight();
        info!(run_id, "run cancelled");
        self.transition(RunState::Idle);
        true
    }

    /// Discard a completed result. Refused while a run is in flight.
    pub fn clear(&mut self) -> Result<(), RunError> {
        match self.state {
            RunState::Running { .. } => Err(RunError::InvalidTransition {
                op: "clear",
                state: self.state.name(),
            }),
            RunState::Completed { .. } => {
                self.transition(RunState::Idle);
                Ok(())
            }
            RunState::Idle => Ok(()),
        }
    }

    /// Feed a backend completion back in. Returns whether it was accepted.
    pub fn on_completion(&mut self, completion: Completion) -> bool {
        match completion.outcome {
            Ok(raw) => self.on_result(completion.run_id, raw),
            Err(e) => self.on_failure(completion.run_id, e),
        }
    }

    /// Accept raw predictions for `run_id`. Stale results are logged and dropped.
    pub fn on_result(&mut self, run_id: RunId, raw: RunResultRaw) -> bool {
        let Some(request) = self.accept(run_id) else {
            return false;
        };
        self.release_in_flight();

        match build_result(raw) {
            Ok(result) => {
                info!(run_id, elapsed_ms = result.elapsed_ms, "run completed");
                self.transition(RunState::Completed {
                    run_id,
                    request,
                    result: Arc::new(result),
                });
            }
            Err(e) => self.fail(run_id, e),
        }
        true
    }

    /// Accept a backend failure for `run_id`. Stale failures are logged and dropped.
    pub fn on_failure(&mut self, run_id: RunId, error: BackendError) -> bool {
        if self.accept(run_id).is_none() {
            return false;
        }
        self.release_in_flight();
        self.fail(run_id, RunError::Backend(error));
        true
    }

    /// Report a refused command to observers. State is untouched.
    pub fn reject(&mut self, error: RunError) {
        debug!(state = self.state.name(), %error, "command rejected");
        self.notify(ControllerEvent::CommandRejected { error });
    }

    fn accept(&mut self, run_id: RunId) -> Option<Arc<RunRequest>> {
        match &self.state {
            RunState::Running {
                run_id: current,
                request,
            } if *current == run_id => Some(request.clone()),
            _ => {
                info!(run_id, state = self.state.name(), "dropping stale result");
                self.notify(ControllerEvent::Info(InfoEvent::StaleResultDropped { run_id }));
                None
            }
        }
    }

    fn fail(&mut self, run_id: RunId, error: RunError) {
        warn!(run_id, %error, "run failed");
        self.transition(RunState::Idle);
        self.notify(ControllerEvent::RunFailed { run_id, error });
    }

    /// Aborting an already finished task is a no-op, so this is safe after a completion.
    fn release_in_flight(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }

    fn spawn_inference(&mut self, run_id: RunId, request: RunRequest) {
        let fut = self.backend.infer(request);
        let tx = self.completion_tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let outcome = fut.await;
            let _ = tx.send(Completion { run_id, outcome });
        }));
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = self.state.name(), to = next.name(), "state transition");
        self.state = next;
        self.notify(ControllerEvent::StateChanged {
            state: self.state.clone(),
        });
    }

    fn notify(&mut self, event: ControllerEvent) {
        // Observers that dropped their receiver are pruned here.
        self.observers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        self.release_in_flight();
    }
}

fn build_result(raw: RunResultRaw) -> Result<RunResult, RunError> {
    let predictions = ranking::rank(raw.predictions)?;
    predictions.top()?;
    Ok(RunResult {
        predictions,
        elapsed_ms: raw.elapsed_ms,
    })
}

/// Cloneable sender side of the controller actor.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: UnboundedSender<UiCommand>,
}

impl ControllerHandle {
    pub(crate) fn new(tx: UnboundedSender<UiCommand>) -> Self {
        Self { tx }
    }

    pub fn submit(&self, request: RunRequest) {
        let _ = self.tx.send(UiCommand::Submit(request));
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(UiCommand::Cancel);
    }

    #[cfg(any(test, feature = "tui"))]
    pub fn clear(&self) {
        let _ = self.tx.send(UiCommand::Clear);
    }

    /// Stop event delivery to `id`, e.g. before quitting so shutdown transitions are not seen.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let _ = self.tx.send(UiCommand::Unsubscribe(id));
    }

    pub fn quit(&self) {
        let _ = self.tx.send(UiCommand::Quit);
    }
}

/// Spawn the controller actor and return a handle to it.
pub fn spawn_controller(
    controller: RunController,
    completion_rx: UnboundedReceiver<Completion>,
) -> (ControllerHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let handle = tokio::spawn(run_controller(controller, completion_rx, cmd_rx));
    (ControllerHandle::new(cmd_tx), handle)
}

/// Drive the controller from UI commands and backend completions until quit.
pub(crate) async fn run_controller(
    mut controller: RunController,
    mut completion_rx: UnboundedReceiver<Completion>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Submit(request)) => {
                        if let Err(e) = controller.submit(request) {
                            controller.reject(e);
                        }
                    }
                    Some(UiCommand::Cancel) => {
                        controller.cancel();
                    }
                    #[cfg(any(test, feature = "tui"))]
                    Some(UiCommand::Clear) => {
                        if let Err(e) = controller.clear() {
                            controller.reject(e);
                        }
                    }
                    Some(UiCommand::Unsubscribe(id)) => {
                        controller.unsubscribe(id);
                    }
                    // Quit drops any in-flight run; its completion can no longer be observed.
                    Some(UiCommand::Quit) | None => {
                        controller.cancel();
                        break;
                    }
                }
            }
            Some(completion) = completion_rx.recv() => {
                controller.on_completion(completion);
            }
        }
    }
    debug!(state = controller.state().name(), "controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use crate::model::{ModelId, Prediction, DEFAULT_MODEL};
    use futures::future::{BoxFuture, FutureExt};
    use proptest::prelude::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    type Reply = oneshot::Sender<Result<RunResultRaw, BackendError>>;

    /// Backend whose calls are resolved by the test through oneshot channels.
    #[derive(Clone, Default)]
    struct ScriptedBackend {
        calls: Arc<Mutex<Vec<(RunRequest, Option<Reply>)>>>,
    }

    impl ScriptedBackend {
        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn request(&self, idx: usize) -> RunRequest {
            self.calls.lock().unwrap()[idx].0.clone()
        }

        fn reply(&self, idx: usize, outcome: Result<RunResultRaw, BackendError>) {
            let tx = self.calls.lock().unwrap()[idx].1.take().unwrap();
            let _ = tx.send(outcome);
        }
    }

    impl InferenceBackend for ScriptedBackend {
        fn infer(
            &self,
            request: RunRequest,
        ) -> BoxFuture<'static, Result<RunResultRaw, BackendError>> {
            let (tx, rx) = oneshot::channel();
            self.calls.lock().unwrap().push((request, Some(tx)));
            async move {
                rx.await
                    .unwrap_or_else(|_| Err(BackendError::new("reply dropped")))
            }
            .boxed()
        }
    }

    fn setup() -> (
        RunController,
        UnboundedReceiver<Completion>,
        ScriptedBackend,
    ) {
        let backend = ScriptedBackend::default();
        let (ctrl, completions) =
            RunController::new(Arc::new(backend.clone()), ModelCatalog::default());
        (ctrl, completions, backend)
    }

    fn text_request(text: &str) -> RunRequest {
        RunRequest::text(ModelId::new(DEFAULT_MODEL), text)
    }

    fn cat_raw() -> RunResultRaw {
        RunResultRaw {
            predictions: vec![
                Prediction::new("Dog", 0.05),
                Prediction::new("Cat", 0.925),
                Prediction::new("Bird", 0.015),
                Prediction::new("Truck", 0.01),
            ],
            elapsed_ms: 35,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_submit_runs_to_completion() {
        let (mut ctrl, mut completions, backend) = setup();
        let run_id = ctrl.submit(text_request("great")).unwrap();

        match ctrl.state() {
            RunState::Running { run_id: id, request } => {
                assert_eq!(*id, run_id);
                assert_eq!(**request, text_request("great"));
            }
            other => panic!("expected Running, got {other:?}"),
        }

        tokio::task::yield_now().await;
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.request(0), text_request("great"));

        backend.reply(0, Ok(cat_raw()));
        let completion = completions.recv().await.unwrap();
        assert!(ctrl.on_completion(completion));

        match ctrl.state() {
            RunState::Completed { result, .. } => {
                let labels: Vec<&str> = result.predictions.iter().map(|p| p.label.as_str()).collect();
                assert_eq!(labels, vec!["Cat", "Dog", "Bird", "Truck"]);
                assert_eq!(result.top().unwrap().label, "Cat");
                assert_eq!(result.elapsed_ms, 35);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_while_running_is_rejected() {
        let (mut ctrl, _completions, backend) = setup();
        ctrl.submit(text_request("first")).unwrap();
        let before = ctrl.state().clone();

        let err = ctrl.submit(text_request("second")).unwrap_err();
        assert_eq!(err, RunError::AlreadyRunning);
        assert_eq!(ctrl.state(), &before);

        tokio::task::yield_now().await;
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_is_invalid_and_state_stays_idle() {
        let (mut ctrl, _completions, backend) = setup();
        let (_, mut events) = ctrl.subscribe();

        let err = ctrl.submit(text_request("")).unwrap_err();
        assert_eq!(err, RunError::InvalidRequest(RequestError::EmptyText));
        assert_eq!(ctrl.state(), &RunState::Idle);
        assert!(drain(&mut events).is_empty());

        tokio::task::yield_now().await;
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_model_is_invalid() {
        let (mut ctrl, _completions, _backend) = setup();
        let req = RunRequest::text(ModelId::new("nope.onnx"), "hello");
        assert_eq!(
            ctrl.submit(req).unwrap_err(),
            RunError::InvalidRequest(RequestError::UnknownModel("nope.onnx".into()))
        );
        assert_eq!(ctrl.state(), &RunState::Idle);
    }

    #[tokio::test]
    async fn test_result_after_cancel_is_dropped() {
        let (mut ctrl, _completions, _backend) = setup();
        let run_id = ctrl.submit(text_request("valid")).unwrap();
        assert!(ctrl.cancel());
        assert_eq!(ctrl.state(), &RunState::Idle);

        assert!(!ctrl.on_result(run_id, cat_raw()));
        assert_eq!(ctrl.state(), &RunState::Idle);

        assert!(!ctrl.on_failure(run_id, BackendError::new("late")));
        assert_eq!(ctrl.state(), &RunState::Idle);
    }

    #[tokio::test]
    async fn test_result_for_superseded_run_is_dropped() {
        let (mut ctrl, _completions, _backend) = setup();
        let first = ctrl.submit(text_request("one")).unwrap();
        ctrl.cancel();
        let second = ctrl.submit(text_request("two")).unwrap();
        assert_ne!(first, second);

        let (_, mut events) = ctrl.subscribe();
        assert!(!ctrl.on_result(first, cat_raw()));
        assert_eq!(ctrl.state().in_flight(), Some(second));
        let evs = drain(&mut events);
        assert_eq!(evs.len(), 1);
        assert!(matches!(
            evs[0],
            ControllerEvent::Info(InfoEvent::StaleResultDropped { run_id }) if run_id == first
        ));

        assert!(ctrl.on_result(second, cat_raw()));
        assert!(matches!(ctrl.state(), RunState::Completed { run_id, .. } if *run_id == second));
    }

    #[tokio::test]
    async fn test_backend_failure_returns_to_idle() {
        let (mut ctrl, mut completions, backend) = setup();
        let (_, mut events) = ctrl.subscribe();
        let run_id = ctrl.submit(text_request("x")).unwrap();

        tokio::task::yield_now().await;
        backend.reply(0, Err(BackendError::new("model crashed")));
        let completion = completions.recv().await.unwrap();
        assert!(ctrl.on_completion(completion));
        assert_eq!(ctrl.state(), &RunState::Idle);

        let evs = drain(&mut events);
        assert!(matches!(evs[0], ControllerEvent::StateChanged { state: RunState::Running { .. } }));
        assert!(matches!(evs[1], ControllerEvent::StateChanged { state: RunState::Idle }));
        match &evs[2] {
            ControllerEvent::RunFailed { run_id: id, error } => {
                assert_eq!(*id, run_id);
                assert_eq!(*error, RunError::Backend(BackendError::new("model crashed")));
            }
            other => panic!("expected RunFailed, got {other:?}"),
        }

        // Retry is a fresh submit.
        assert!(ctrl.submit(text_request("x")).is_ok());
    }

    #[tokio::test]
    async fn test_contract_violations_fail_the_run() {
        let (mut ctrl, _completions, _backend) = setup();
        let (_, mut events) = ctrl.subscribe();

        let run_id = ctrl.submit(text_request("x")).unwrap();
        let empty = RunResultRaw {
            predictions: Vec::new(),
            elapsed_ms: 3,
        };
        assert!(ctrl.on_result(run_id, empty));
        assert_eq!(ctrl.state(), &RunState::Idle);

        let run_id = ctrl.submit(text_request("x")).unwrap();
        let dup = RunResultRaw {
            predictions: vec![Prediction::new("A", 0.4), Prediction::new("A", 0.6)],
            elapsed_ms: 3,
        };
        assert!(ctrl.on_result(run_id, dup));
        assert_eq!(ctrl.state(), &RunState::Idle);

        let failures: Vec<RunError> = drain(&mut events)
            .into_iter()
            .filter_map(|ev| match ev {
                ControllerEvent::RunFailed { error, .. } => Some(error),
                _ => None,
            })
            .collect();
        assert_eq!(
            failures,
            vec![RunError::EmptySet, RunError::DuplicateLabel("A".into())]
        );
    }

    #[tokio::test]
    async fn test_clear_rules() {
        let (mut ctrl, _completions, _backend) = setup();
        assert!(ctrl.clear().is_ok());

        let run_id = ctrl.submit(text_request("x")).unwrap();
        let err = ctrl.clear().unwrap_err();
        assert_eq!(
            err,
            RunError::InvalidTransition {
                op: "clear",
                state: "running"
            }
        );
        assert!(ctrl.state().is_running());

        ctrl.on_result(run_id, cat_raw());
        assert!(matches!(ctrl.state(), RunState::Completed { .. }));
        assert!(ctrl.clear().is_ok());
        assert_eq!(ctrl.state(), &RunState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_outside_running_is_noop() {
        let (mut ctrl, _completions, _backend) = setup();
        let (_, mut events) = ctrl.subscribe();
        assert!(!ctrl.cancel());

        let run_id = ctrl.submit(text_request("x")).unwrap();
        ctrl.on_result(run_id, cat_raw());
        drain(&mut events);

        assert!(!ctrl.cancel());
        assert!(matches!(ctrl.state(), RunState::Completed { .. }));
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_submit_from_completed_abandons_result() {
        let (mut ctrl, _completions, backend) = setup();
        let first = ctrl.submit(text_request("x")).unwrap();
        assert!(ctrl.on_result(first, cat_raw()));
        assert!(matches!(ctrl.state(), RunState::Completed { .. }));

        let second = ctrl.submit(text_request("y")).unwrap();
        match ctrl.state() {
            RunState::Running { run_id, request } => {
                assert_eq!(*run_id, second);
                assert_eq!(**request, text_request("y"));
            }
            other => panic!("expected Running, got {other:?}"),
        }

        // One backend call per submit; the completed run is not re-issued.
        tokio::task::yield_now().await;
        assert_eq!(backend.call_count(), 2);
        assert_eq!(backend.request(0), text_request("x"));
        assert_eq!(backend.request(1), text_request("y"));
    }

    #[tokio::test]
    async fn test_every_transition_notifies_each_subscriber_once() {
        let (mut ctrl, _completions, _backend) = setup();
        let (_, mut a) = ctrl.subscribe();
        let (b_id, mut b) = ctrl.subscribe();

        let run_id = ctrl.submit(text_request("x")).unwrap();
        assert!(ctrl.unsubscribe(b_id));
        assert!(!ctrl.unsubscribe(b_id));
        ctrl.on_result(run_id, cat_raw());
        ctrl.clear().unwrap();

        let names: Vec<&str> = drain(&mut a)
            .iter()
            .filter_map(|ev| match ev {
                ControllerEvent::StateChanged { state } => Some(state.name()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["running", "completed", "idle"]);
        assert_eq!(drain(&mut b).len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_observer_is_pruned() {
        let (mut ctrl, _completions, _backend) = setup();
        let (_, rx) = ctrl.subscribe();
        drop(rx);
        ctrl.submit(text_request("x")).unwrap();
        assert!(ctrl.observers.is_empty());
    }

    #[tokio::test]
    async fn test_actor_round_trip() {
        let backend = ScriptedBackend::default();
        let (mut ctrl, completions) =
            RunController::new(Arc::new(backend.clone()), ModelCatalog::default());
        let (_, mut events) = ctrl.subscribe();
        let (handle, join) = spawn_controller(ctrl, completions);

        handle.submit(text_request(""));
        match events.recv().await.unwrap() {
            ControllerEvent::CommandRejected { error } => {
                assert_eq!(error, RunError::InvalidRequest(RequestError::EmptyText));
            }
            other => panic!("expected CommandRejected, got {other:?}"),
        }

        handle.submit(text_request("fine"));
        assert!(matches!(
            events.recv().await.unwrap(),
            ControllerEvent::StateChanged { state: RunState::Running { .. } }
        ));

        handle.clear();
        assert!(matches!(
            events.recv().await.unwrap(),
            ControllerEvent::CommandRejected {
                error: RunError::InvalidTransition { .. }
            }
        ));

        backend.reply(0, Ok(cat_raw()));
        match events.recv().await.unwrap() {
            ControllerEvent::StateChanged {
                state: RunState::Completed { result, .. },
            } => assert_eq!(result.top().unwrap().label, "Cat"),
            other => panic!("expected Completed, got {other:?}"),
        }

        handle.quit();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_cancel_drops_late_reply() {
        let backend = ScriptedBackend::default();
        let (mut ctrl, completions) =
            RunController::new(Arc::new(backend.clone()), ModelCatalog::default());
        let (_, mut events) = ctrl.subscribe();
        let late_tx = ctrl.completion_tx.clone();
        let (handle, join) = spawn_controller(ctrl, completions);

        handle.submit(text_request("valid"));
        let run_id = match events.recv().await.unwrap() {
            ControllerEvent::StateChanged {
                state: RunState::Running { run_id, .. },
            } => run_id,
            other => panic!("expected Running, got {other:?}"),
        };
        handle.cancel();
        assert!(matches!(
            events.recv().await.unwrap(),
            ControllerEvent::StateChanged { state: RunState::Idle }
        ));

        // A completion for the cancelled run still reaching the actor is dropped as stale.
        late_tx
            .send(Completion {
                run_id,
                outcome: Ok(cat_raw()),
            })
            .unwrap();
        match events.recv().await.unwrap() {
            ControllerEvent::Info(InfoEvent::StaleResultDropped { run_id: id }) => {
                assert_eq!(id, run_id)
            }
            other => panic!("expected StaleResultDropped, got {other:?}"),
        }

        // Quit while Idle emits nothing either.
        handle.quit();
        join.await.unwrap();
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_actor_unsubscribe_stops_delivery() {
        let backend = ScriptedBackend::default();
        let (mut ctrl, completions) =
            RunController::new(Arc::new(backend.clone()), ModelCatalog::default());
        let (keep_id, mut kept) = ctrl.subscribe();
        let (gone_id, mut gone) = ctrl.subscribe();
        assert_ne!(keep_id, gone_id);
        let (handle, join) = spawn_controller(ctrl, completions);

        handle.unsubscribe(gone_id);
        handle.submit(text_request("x"));
        assert!(matches!(
            kept.recv().await.unwrap(),
            ControllerEvent::StateChanged { state: RunState::Running { .. } }
        ));

        handle.quit();
        join.await.unwrap();
        assert!(drain(&mut gone).is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Submit,
        Cancel,
        Complete,
        LateResult(usize),
        LateFailure(usize),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Submit),
            Just(Op::Cancel),
            Just(Op::Complete),
            any::<usize>().prop_map(Op::LateResult),
            any::<usize>().prop_map(Op::LateFailure),
        ]
    }

    proptest! {
        /// Whatever the interleaving, a result or failure for a run that is not in flight
        /// is refused and leaves the state untouched.
        #[test]
        fn stale_completions_never_change_state(ops in prop::collection::vec(arb_op(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let _guard = rt.enter();
            let (mut ctrl, _completions, _backend) = setup();
            // Run ids start at 1, so 0 was never issued and is always stale.
            let mut issued: Vec<RunId> = vec![0];

            for op in ops {
                match op {
                    Op::Submit => {
                        if let Ok(id) = ctrl.submit(text_request("x")) {
                            issued.push(id);
                        }
                    }
                    Op::Cancel => {
                        ctrl.cancel();
                    }
                    Op::Complete => {
                        if let Some(id) = ctrl.state().in_flight() {
                            prop_assert!(ctrl.on_result(id, cat_raw()));
                        }
                    }
                    Op::LateResult(pick) | Op::LateFailure(pick) => {
                        let current = ctrl.state().in_flight();
                        let stale: Vec<RunId> = issued
                            .iter()
                            .copied()
                            .filter(|id| Some(*id) != current)
                            .collect();
                        let id = stale[pick % stale.len()];
                        let before = ctrl.state().clone();
                        let accepted = if matches!(op, Op::LateResult(_)) {
                            ctrl.on_result(id, cat_raw())
                        } else {
                            ctrl.on_failure(id, BackendError::new("late"))
                        };
                        prop_assert!(!accepted);
                        prop_assert_eq!(ctrl.state(), &before);
                    }
                }
            }
        }
    }
}
