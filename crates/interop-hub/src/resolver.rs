//! Intent resolution and request correlation.
//!
//! A raised intent becomes a [`PendingIntentRequest`]. With one capable
//! instance it is dispatched straight away; with several it waits for the
//! raiser to pick one. The target answers with `respond_to_intent`, which is
//! accepted exactly once. Every live request has a deadline; whichever of
//! response or deadline comes first wins, and the loser finds the request in
//! a terminal state.

use crate::state::HubState;
use crate::timer::TimerKey;
use interop_core::{
    ANY_TYPE, AppIntent, AppMetadata, Candidate, Context, HubError, InstanceId, IntentOutcome,
    IntentResolution, IntentResult, RequestId, RequestState, ServerMessage, WireError,
    type_matches,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PendingIntentRequest {
    pub request_id: RequestId,
    pub source: InstanceId,
    pub intent: String,
    pub context: Arc<Context>,
    pub candidates: Vec<Candidate>,
    pub target: Option<InstanceId>,
    pub state: RequestState,
}

/// Live requests plus a bounded memory of finished ones.
pub struct IntentTable {
    pending: HashMap<RequestId, PendingIntentRequest>,
    finished: HashMap<RequestId, RequestState>,
    finished_order: VecDeque<RequestId>,
    retained: usize,
}

impl IntentTable {
    pub fn new(retained: usize) -> Self {
        Self {
            pending: HashMap::new(),
            finished: HashMap::new(),
            finished_order: VecDeque::new(),
            retained,
        }
    }

    pub fn insert(&mut self, request: PendingIntentRequest) {
        self.pending.insert(request.request_id, request);
    }

    pub fn get(&self, id: &RequestId) -> Option<&PendingIntentRequest> {
        self.pending.get(id)
    }

    /// Current state of a live or recently finished request.
    pub fn state_of(&self, id: &RequestId) -> Option<RequestState> {
        self.pending
            .get(id)
            .map(|r| r.state)
            .or_else(|| self.finished.get(id).copied())
    }

    /// The live request, provided it is in `expected`.
    pub fn require(
        &mut self,
        id: &RequestId,
        expected: RequestState,
    ) -> Result<&mut PendingIntentRequest, HubError> {
        match self.state_of(id) {
            None => Err(HubError::UnknownRequest(*id)),
            Some(state) if state != expected => Err(HubError::InvalidRequestState {
                request: *id,
                state,
            }),
            Some(_) => self
                .pending
                .get_mut(id)
                .ok_or(HubError::UnknownRequest(*id)),
        }
    }

    /// Move a live request to a terminal state and forget its payload.
    pub fn finish(&mut self, id: &RequestId, state: RequestState) -> Option<PendingIntentRequest> {
        let mut request = self.pending.remove(id)?;
        request.state = state;
        if self.retained > 0 {
            while self.finished_order.len() >= self.retained {
                if let Some(oldest) = self.finished_order.pop_front() {
                    self.finished.remove(&oldest);
                }
            }
            self.finished.insert(*id, state);
            self.finished_order.push_back(*id);
        }
        Some(request)
    }

    pub fn sourced_by(&self, instance: &InstanceId) -> Vec<RequestId> {
        self.pending
            .values()
            .filter(|r| r.source == *instance)
            .map(|r| r.request_id)
            .collect()
    }

    pub fn awaiting_result_from(&self, instance: &InstanceId) -> Vec<RequestId> {
        self.pending
            .values()
            .filter(|r| r.state == RequestState::AwaitingResult && r.target == Some(*instance))
            .map(|r| r.request_id)
            .collect()
    }

    /// Strike a departed instance from every open candidate list.
    pub fn drop_candidate(&mut self, instance: &InstanceId) {
        for request in self.pending.values_mut() {
            if request.state == RequestState::AwaitingResolution {
                request.candidates.retain(|c| c.instance_id != *instance);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl HubState {
    pub fn raise_intent(
        &mut self,
        source: InstanceId,
        intent: &str,
        context: Context,
        target_app_id: Option<&str>,
    ) -> Result<IntentResolution, HubError> {
        self.connections.connected(&source)?;

        let candidates = self.candidates(intent, &context.context_type, target_app_id);
        let request_id = RequestId::new();
        let context = Arc::new(context);

        match candidates.len() {
            0 => Err(HubError::NoCapableApp {
                intent: intent.to_string(),
                context_type: context.context_type.clone(),
            }),
            1 => {
                let target = candidates[0].clone();
                let request = PendingIntentRequest {
                    request_id,
                    source,
                    intent: intent.to_string(),
                    context,
                    candidates,
                    target: Some(target.instance_id),
                    state: RequestState::AwaitingResult,
                };
                self.dispatch(&request)?;
                self.intents.insert(request);
                self.timers
                    .schedule(TimerKey::Intent(request_id), self.config.intent_timeout());
                tracing::debug!(
                    %source,
                    %request_id,
                    intent,
                    target = %target.instance_id,
                    "intent dispatched"
                );
                Ok(IntentResolution::Dispatched { request_id, target })
            }
            _ => {
                self.intents.insert(PendingIntentRequest {
                    request_id,
                    source,
                    intent: intent.to_string(),
                    context,
                    candidates: candidates.clone(),
                    target: None,
                    state: RequestState::AwaitingResolution,
                });
                self.timers.schedule(
                    TimerKey::Intent(request_id),
                    self.config.resolution_timeout(),
                );
                tracing::debug!(
                    %source,
                    %request_id,
                    intent,
                    candidates = candidates.len(),
                    "intent needs resolution"
                );
                Ok(IntentResolution::NeedsResolution {
                    request_id,
                    candidates,
                })
            }
        }
    }

    /// The raiser's choice among several candidates.
    ///
    /// If the chosen instance has no listener the request stays open so
    /// another candidate can be picked.
    pub fn resolve_intent_target(
        &mut self,
        caller: InstanceId,
        request_id: RequestId,
        chosen: InstanceId,
    ) -> Result<Candidate, HubError> {
        self.connections.connected(&caller)?;
        let request = self
            .intents
            .require(&request_id, RequestState::AwaitingResolution)?;
        if request.source != caller {
            return Err(HubError::InvalidTarget(caller));
        }
        let candidate = request
            .candidates
            .iter()
            .find(|c| c.instance_id == chosen)
            .cloned()
            .ok_or(HubError::InvalidTarget(chosen))?;

        let mut resolved = request.clone();
        resolved.target = Some(chosen);
        self.dispatch(&resolved)?;

        if let Some(request) = self.intents.pending.get_mut(&request_id) {
            request.target = Some(chosen);
            request.state = RequestState::AwaitingResult;
        }
        self.timers
            .schedule(TimerKey::Intent(request_id), self.config.intent_timeout());
        tracing::debug!(%request_id, target = %chosen, "intent target resolved");
        Ok(candidate)
    }

    /// The target's answer. Accepted once; anything later fails.
    pub fn respond_to_intent(
        &mut self,
        responder: InstanceId,
        request_id: RequestId,
        outcome: IntentOutcome,
    ) -> Result<RequestState, HubError> {
        self.connections.connected(&responder)?;
        let request = self
            .intents
            .require(&request_id, RequestState::AwaitingResult)?;
        if request.target != Some(responder) {
            return Err(HubError::InvalidTarget(responder));
        }

        let (state, result) = match outcome {
            IntentOutcome::Fulfilled { result } => {
                (RequestState::Fulfilled, IntentResult::Fulfilled { result })
            }
            IntentOutcome::Rejected { reason } => (
                RequestState::Rejected,
                IntentResult::Rejected {
                    error: HubError::TargetRejected(reason).into(),
                },
            ),
        };

        self.timers.cancel(TimerKey::Intent(request_id));
        if let Some(request) = self.intents.finish(&request_id, state) {
            self.connections.push(
                &request.source,
                ServerMessage::IntentResult { request_id, result },
            );
        }
        tracing::debug!(%request_id, ?state, "intent answered");
        Ok(state)
    }

    /// Which apps could handle `intent`, running or not.
    pub fn find_intent(
        &self,
        intent: &str,
        context_type: Option<&str>,
    ) -> Result<AppIntent, HubError> {
        let handles = |meta: &AppMetadata| match context_type {
            Some(ty) => meta.handles(intent, ty),
            None => meta.declares(intent),
        };

        let mut instances: Vec<Candidate> = self
            .connections
            .iter()
            .filter(|i| handles(&i.metadata))
            .map(|i| Candidate {
                instance_id: i.instance_id,
                app_id: i.app_id.clone(),
                title: i.metadata.title.clone(),
            })
            .collect();
        instances.sort_by(|a, b| (&a.app_id, a.instance_id).cmp(&(&b.app_id, b.instance_id)));
        let apps: Vec<_> = self.directory.apps().into_iter().filter(|a| handles(a)).collect();

        if instances.is_empty() && apps.is_empty() {
            return Err(HubError::NoCapableApp {
                intent: intent.to_string(),
                context_type: context_type.unwrap_or(ANY_TYPE).to_string(),
            });
        }
        Ok(AppIntent {
            intent: intent.to_string(),
            instances,
            apps,
        })
    }

    /// Every intent that accepts `context_type`, with who can handle it.
    pub fn find_intents_by_context(&self, context_type: &str) -> Vec<AppIntent> {
        let directory_apps = self.directory.apps();
        let names: BTreeSet<&str> = self
            .connections
            .iter()
            .map(|i| &i.metadata)
            .chain(directory_apps.iter())
            .flat_map(|m| m.intents.iter())
            .filter(|r| type_matches(Some(&r.context_type), context_type))
            .map(|r| r.name.as_str())
            .collect();

        names
            .into_iter()
            .filter_map(|name| self.find_intent(name, Some(context_type)).ok())
            .collect()
    }

    /// Deadline elapsed for a live request.
    pub(crate) fn expire_request(&mut self, request_id: RequestId) {
        let Some(request) = self.intents.finish(&request_id, RequestState::TimedOut) else {
            return;
        };
        tracing::warn!(%request_id, intent = %request.intent, "intent timed out");

        let error = WireError::from(HubError::IntentTimeout(request_id));
        self.connections.push(
            &request.source,
            ServerMessage::IntentResult {
                request_id,
                result: IntentResult::Rejected {
                    error: error.clone(),
                },
            },
        );
        if let Some(target) = request.target {
            self.connections.push(
                &target,
                ServerMessage::IntentCancelled { request_id, error },
            );
        }
    }

    /// Settle every request touching a departing instance.
    pub(crate) fn fail_requests_of(&mut self, instance: InstanceId) {
        for request_id in self.intents.sourced_by(&instance) {
            self.timers.cancel(TimerKey::Intent(request_id));
            let Some(request) = self.intents.finish(&request_id, RequestState::Rejected) else {
                continue;
            };
            tracing::debug!(%request_id, "source disconnected, request rejected");
            if let Some(target) = request.target
                && target != instance
            {
                self.connections.push(
                    &target,
                    ServerMessage::IntentCancelled {
                        request_id,
                        error: HubError::SourceDisconnected(request_id).into(),
                    },
                );
            }
        }

        for request_id in self.intents.awaiting_result_from(&instance) {
            self.timers.cancel(TimerKey::Intent(request_id));
            let Some(request) = self.intents.finish(&request_id, RequestState::TimedOut) else {
                continue;
            };
            tracing::debug!(%request_id, "target disconnected, request timed out");
            self.connections.push(
                &request.source,
                ServerMessage::IntentResult {
                    request_id,
                    result: IntentResult::Rejected {
                        error: HubError::IntentTimeout(request_id).into(),
                    },
                },
            );
        }

        self.intents.drop_candidate(&instance);
    }

    pub fn pending_count(&self) -> usize {
        self.intents.len()
    }

    /// Connected instances declaring `intent` for `context_type`, optionally
    /// limited to one app id. Sorted by app id for stable candidate lists.
    fn candidates(
        &self,
        intent: &str,
        context_type: &str,
        target_app_id: Option<&str>,
    ) -> Vec<Candidate> {
        let mut found: Vec<Candidate> = self
            .connections
            .iter()
            .filter(|i| target_app_id.is_none_or(|app| app == i.app_id))
            .filter(|i| i.metadata.handles(intent, context_type))
            .map(|i| Candidate {
                instance_id: i.instance_id,
                app_id: i.app_id.clone(),
                title: i.metadata.title.clone(),
            })
            .collect();
        found.sort_by(|a, b| (&a.app_id, a.instance_id).cmp(&(&b.app_id, b.instance_id)));
        found
    }

    /// Push the intent to the target's earliest listener.
    fn dispatch(&self, request: &PendingIntentRequest) -> Result<(), HubError> {
        let target = request
            .target
            .ok_or(HubError::InvalidTarget(request.source))?;
        let listener = self
            .listeners
            .intent_listener(&target, &request.intent)
            .ok_or_else(|| HubError::NoIntentListener {
                instance: target,
                intent: request.intent.clone(),
            })?;
        self.connections.push(
            &target,
            ServerMessage::IntentDelivery {
                listener_id: listener.id,
                intent: request.intent.clone(),
                context: request.context.as_ref().clone(),
                request_id: request.request_id,
                source: request.source,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::state::testing::*;
    use interop_core::{ErrorKind, IntentRecord};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn charting(app_id: &str) -> AppMetadata {
        AppMetadata::new(app_id).with_intent(IntentRecord::new("ViewChart", "fdc3.instrument"))
    }

    fn hub_with_charts(
        config: HubConfig,
    ) -> (HubState, mpsc::UnboundedReceiver<crate::timer::Fired>) {
        state_with(
            config,
            vec![
                charting("chart"),
                charting("chart-pro"),
                AppMetadata::new("news").with_intent(IntentRecord::new("ViewNews", "*")),
            ],
        )
    }

    fn intent_results(rx: &mut Inbox) -> Vec<(RequestId, IntentResult)> {
        drain(rx)
            .into_iter()
            .filter_map(|msg| match msg {
                ServerMessage::IntentResult { request_id, result } => Some((request_id, result)),
                _ => None,
            })
            .collect()
    }

    fn intent_deliveries(rx: &mut Inbox) -> Vec<RequestId> {
        drain(rx)
            .into_iter()
            .filter_map(|msg| match msg {
                ServerMessage::IntentDelivery { request_id, .. } => Some(request_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn no_capable_app_creates_no_request() {
        let (mut state, _timers) = hub_with_charts(HubConfig::default());
        let (source, _rx) = connect(&mut state, "blotter");

        let err = state
            .raise_intent(source, "ViewChart", Context::instrument("AAPL"), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoCapableApp);
        assert_eq!(state.pending_count(), 0);
        // Only the source's heartbeat deadline is armed.
        assert_eq!(state.timers.len(), 1);
    }

    #[tokio::test]
    async fn single_candidate_is_dispatched_and_answered_once() {
        let (mut state, _timers) = hub_with_charts(HubConfig::default());
        let (source, mut source_rx) = connect(&mut state, "blotter");
        let (chart, mut chart_rx) = connect(&mut state, "chart");
        state.add_intent_listener(chart, "ViewChart").unwrap();

        let resolution = state
            .raise_intent(source, "ViewChart", Context::instrument("AAPL"), None)
            .unwrap();
        let IntentResolution::Dispatched { request_id, target } = resolution.clone() else {
            panic!("expected auto-dispatch, got {resolution:?}");
        };
        assert_eq!(target.instance_id, chart);
        assert_eq!(intent_deliveries(&mut chart_rx), vec![request_id]);

        let result = serde_json::json!({ "type": "fdc3.nothing" });
        assert_eq!(
            state.respond_to_intent(
                chart,
                request_id,
                IntentOutcome::Fulfilled {
                    result: Some(result.clone())
                }
            ),
            Ok(RequestState::Fulfilled)
        );
        assert_eq!(
            state.respond_to_intent(
                chart,
                request_id,
                IntentOutcome::Rejected {
                    reason: "late".into()
                }
            ),
            Err(HubError::InvalidRequestState {
                request: request_id,
                state: RequestState::Fulfilled
            })
        );

        assert_eq!(
            intent_results(&mut source_rx),
            vec![(
                request_id,
                IntentResult::Fulfilled {
                    result: Some(result)
                }
            )]
        );
        assert!(!state.timers.is_armed(TimerKey::Intent(request_id)));
    }

    #[tokio::test]
    async fn resolved_app_without_listener_fails() {
        let (mut state, _timers) = hub_with_charts(HubConfig::default());
        let (source, _rx) = connect(&mut state, "blotter");
        let (chart, _chart_rx) = connect(&mut state, "chart");

        assert_eq!(
            state.raise_intent(source, "ViewChart", Context::instrument("AAPL"), None),
            Err(HubError::NoIntentListener {
                instance: chart,
                intent: "ViewChart".into()
            })
        );
        assert_eq!(state.pending_count(), 0);
    }

    #[tokio::test]
    async fn two_candidates_need_resolution() {
        let (mut state, _timers) = hub_with_charts(HubConfig::default());
        let (source, mut source_rx) = connect(&mut state, "blotter");
        let (chart, _chart_rx) = connect(&mut state, "chart");
        let (pro, mut pro_rx) = connect(&mut state, "chart-pro");
        let (outsider, _outsider_rx) = connect(&mut state, "news");
        state.add_intent_listener(chart, "ViewChart").unwrap();
        state.add_intent_listener(pro, "ViewChart").unwrap();

        let resolution = state
            .raise_intent(source, "ViewChart", Context::instrument("MSFT"), None)
            .unwrap();
        let IntentResolution::NeedsResolution {
            request_id,
            candidates,
        } = resolution.clone()
        else {
            panic!("expected resolution, got {resolution:?}");
        };
        let apps: Vec<_> = candidates.iter().map(|c| c.app_id.as_str()).collect();
        assert_eq!(apps, ["chart", "chart-pro"]);

        assert_eq!(
            state.resolve_intent_target(source, request_id, outsider),
            Err(HubError::InvalidTarget(outsider))
        );
        assert_eq!(
            state.intents.state_of(&request_id),
            Some(RequestState::AwaitingResolution)
        );

        let chosen = state.resolve_intent_target(source, request_id, pro).unwrap();
        assert_eq!(chosen.instance_id, pro);
        assert_eq!(intent_deliveries(&mut pro_rx), vec![request_id]);

        state
            .respond_to_intent(pro, request_id, IntentOutcome::Rejected { reason: "busy".into() })
            .unwrap();
        let results = intent_results(&mut source_rx);
        assert!(matches!(
            results.as_slice(),
            [(_, IntentResult::Rejected { error })] if error.code == ErrorKind::TargetRejected
        ));
    }

    #[tokio::test]
    async fn resolution_without_listener_keeps_request_open() {
        let (mut state, _timers) = hub_with_charts(HubConfig::default());
        let (source, _rx) = connect(&mut state, "blotter");
        let (chart, _chart_rx) = connect(&mut state, "chart");
        let (pro, _pro_rx) = connect(&mut state, "chart-pro");
        state.add_intent_listener(pro, "ViewChart").unwrap();

        let request_id = state
            .raise_intent(source, "ViewChart", Context::instrument("MSFT"), None)
            .unwrap()
            .request_id();

        assert_eq!(
            state.resolve_intent_target(source, request_id, chart),
            Err(HubError::NoIntentListener {
                instance: chart,
                intent: "ViewChart".into()
            })
        );
        assert!(state.resolve_intent_target(source, request_id, pro).is_ok());
        assert_eq!(
            state.intents.state_of(&request_id),
            Some(RequestState::AwaitingResult)
        );
    }

    #[tokio::test]
    async fn target_app_id_narrows_candidates() {
        let (mut state, _timers) = hub_with_charts(HubConfig::default());
        let (source, _rx) = connect(&mut state, "blotter");
        let (_chart, _chart_rx) = connect(&mut state, "chart");
        let (pro, _pro_rx) = connect(&mut state, "chart-pro");
        state.add_intent_listener(pro, "ViewChart").unwrap();

        let resolution = state
            .raise_intent(
                source,
                "ViewChart",
                Context::instrument("MSFT"),
                Some("chart-pro"),
            )
            .unwrap();
        assert!(matches!(
            resolution,
            IntentResolution::Dispatched { target, .. } if target.instance_id == pro
        ));

        let err = state
            .raise_intent(
                source,
                "ViewChart",
                Context::new("fdc3.contact"),
                Some("chart-pro"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoCapableApp);
    }

    #[tokio::test]
    async fn only_the_target_may_respond() {
        let (mut state, _timers) = hub_with_charts(HubConfig::default());
        let (source, _rx) = connect(&mut state, "blotter");
        let (chart, _chart_rx) = connect(&mut state, "chart");
        state.add_intent_listener(chart, "ViewChart").unwrap();

        let request_id = state
            .raise_intent(source, "ViewChart", Context::instrument("AAPL"), None)
            .unwrap()
            .request_id();
        assert_eq!(
            state.respond_to_intent(source, request_id, IntentOutcome::Fulfilled { result: None }),
            Err(HubError::InvalidTarget(source))
        );
        let unknown = RequestId::new();
        assert_eq!(
            state.respond_to_intent(chart, unknown, IntentOutcome::Fulfilled { result: None }),
            Err(HubError::UnknownRequest(unknown))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_intent_times_out_once() {
        let (mut state, mut fired_rx) = hub_with_charts(HubConfig {
            intent_timeout_ms: 1_000,
            ..HubConfig::default()
        });
        let (source, mut source_rx) = connect(&mut state, "blotter");
        let (chart, mut chart_rx) = connect(&mut state, "chart");
        state.add_intent_listener(chart, "ViewChart").unwrap();
        state.heartbeat(source).unwrap();

        let request_id = state
            .raise_intent(source, "ViewChart", Context::instrument("AAPL"), None)
            .unwrap()
            .request_id();

        let fired = fired_rx.recv().await.unwrap();
        state.on_timer(fired);

        let results = intent_results(&mut source_rx);
        assert!(matches!(
            results.as_slice(),
            [(id, IntentResult::Rejected { error })]
                if *id == request_id && error.code == ErrorKind::IntentTimeout
        ));
        assert!(drain(&mut chart_rx).iter().any(|m| matches!(
            m,
            ServerMessage::IntentCancelled { request_id: id, .. } if *id == request_id
        )));
        assert_eq!(
            state.respond_to_intent(chart, request_id, IntentOutcome::Fulfilled { result: None }),
            Err(HubError::InvalidRequestState {
                request: request_id,
                state: RequestState::TimedOut
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_intent_expires() {
        let (mut state, mut fired_rx) = hub_with_charts(HubConfig {
            resolution_timeout_ms: 500,
            ..HubConfig::default()
        });
        let (source, mut source_rx) = connect(&mut state, "blotter");
        let (chart, mut chart_rx) = connect(&mut state, "chart");
        let (pro, _pro_rx) = connect(&mut state, "chart-pro");
        state.add_intent_listener(chart, "ViewChart").unwrap();
        state.add_intent_listener(pro, "ViewChart").unwrap();

        let resolution = state
            .raise_intent(source, "ViewChart", Context::instrument("MSFT"), None)
            .unwrap();
        assert!(matches!(resolution, IntentResolution::NeedsResolution { .. }));
        let request_id = resolution.request_id();

        let fired = fired_rx.recv().await.unwrap();
        assert_eq!(fired.key, TimerKey::Intent(request_id));
        state.on_timer(fired);

        let results = intent_results(&mut source_rx);
        assert!(matches!(
            results.as_slice(),
            [(id, IntentResult::Rejected { error })]
                if *id == request_id && error.code == ErrorKind::IntentTimeout
        ));
        assert_eq!(state.pending_count(), 0);
        assert_eq!(
            state.intents.state_of(&request_id),
            Some(RequestState::TimedOut)
        );
        assert_eq!(
            state.resolve_intent_target(source, request_id, chart),
            Err(HubError::InvalidRequestState {
                request: request_id,
                state: RequestState::TimedOut
            })
        );
        assert!(drain(&mut chart_rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn answered_intent_never_times_out() {
        let (mut state, mut fired_rx) = hub_with_charts(HubConfig {
            intent_timeout_ms: 1_000,
            heartbeat_timeout_ms: 60_000,
            ..HubConfig::default()
        });
        let (source, mut source_rx) = connect(&mut state, "blotter");
        let (chart, _chart_rx) = connect(&mut state, "chart");
        state.add_intent_listener(chart, "ViewChart").unwrap();

        let request_id = state
            .raise_intent(source, "ViewChart", Context::instrument("AAPL"), None)
            .unwrap()
            .request_id();
        state
            .respond_to_intent(chart, request_id, IntentOutcome::Fulfilled { result: None })
            .unwrap();

        let waited = tokio::time::timeout(Duration::from_secs(5), fired_rx.recv()).await;
        assert!(waited.is_err(), "no deadline should fire");
        assert_eq!(intent_results(&mut source_rx).len(), 1);
    }

    #[tokio::test]
    async fn target_disconnect_times_out_request() {
        let (mut state, _timers) = hub_with_charts(HubConfig::default());
        let (source, mut source_rx) = connect(&mut state, "blotter");
        let (chart, _chart_rx) = connect(&mut state, "chart");
        state.add_intent_listener(chart, "ViewChart").unwrap();

        let request_id = state
            .raise_intent(source, "ViewChart", Context::instrument("AAPL"), None)
            .unwrap()
            .request_id();
        state.disconnect(chart);

        assert_eq!(
            state.intents.state_of(&request_id),
            Some(RequestState::TimedOut)
        );
        let results = intent_results(&mut source_rx);
        assert!(matches!(
            results.as_slice(),
            [(_, IntentResult::Rejected { error })] if error.code == ErrorKind::IntentTimeout
        ));
    }

    #[tokio::test]
    async fn source_disconnect_rejects_and_cancels() {
        let (mut state, _timers) = hub_with_charts(HubConfig::default());
        let (source, _rx) = connect(&mut state, "blotter");
        let (chart, mut chart_rx) = connect(&mut state, "chart");
        state.add_intent_listener(chart, "ViewChart").unwrap();

        let request_id = state
            .raise_intent(source, "ViewChart", Context::instrument("AAPL"), None)
            .unwrap()
            .request_id();
        state.disconnect(source);

        assert_eq!(
            state.intents.state_of(&request_id),
            Some(RequestState::Rejected)
        );
        assert!(drain(&mut chart_rx).iter().any(|m| matches!(
            m,
            ServerMessage::IntentCancelled { error, .. }
                if error.code == ErrorKind::SourceDisconnected
        )));
        assert!(!state.timers.is_armed(TimerKey::Intent(request_id)));
    }

    #[tokio::test]
    async fn departed_candidate_leaves_the_list() {
        let (mut state, _timers) = hub_with_charts(HubConfig::default());
        let (source, _rx) = connect(&mut state, "blotter");
        let (chart, _chart_rx) = connect(&mut state, "chart");
        let (_pro, _pro_rx) = connect(&mut state, "chart-pro");

        let request_id = state
            .raise_intent(source, "ViewChart", Context::instrument("AAPL"), None)
            .unwrap()
            .request_id();
        state.disconnect(chart);

        assert_eq!(state.intents.get(&request_id).unwrap().candidates.len(), 1);
        assert_eq!(
            state.resolve_intent_target(source, request_id, chart),
            Err(HubError::InvalidTarget(chart))
        );
    }

    #[tokio::test]
    async fn find_intent_lists_running_and_directory_apps() {
        let (mut state, _timers) = hub_with_charts(HubConfig::default());
        let (_chart, _chart_rx) = connect(&mut state, "chart");

        let found = state.find_intent("ViewChart", Some("fdc3.instrument")).unwrap();
        assert_eq!(found.instances.len(), 1);
        assert_eq!(found.apps.len(), 2);

        assert_eq!(
            state.find_intent("StartCall", None).unwrap_err().kind(),
            ErrorKind::NoCapableApp
        );

        let by_context: Vec<_> = state
            .find_intents_by_context("fdc3.instrument")
            .into_iter()
            .map(|ai| ai.intent)
            .collect();
        assert_eq!(by_context, ["ViewChart", "ViewNews"]);
    }

    #[test]
    fn finished_requests_are_forgotten_beyond_the_limit() {
        let mut table = IntentTable::new(1);
        let ids = [RequestId::new(), RequestId::new()];
        for id in ids {
            table.insert(PendingIntentRequest {
                request_id: id,
                source: InstanceId::new(),
                intent: "ViewChart".into(),
                context: Arc::new(Context::instrument("AAPL")),
                candidates: Vec::new(),
                target: None,
                state: RequestState::AwaitingResolution,
            });
            table.finish(&id, RequestState::Rejected);
        }
        assert_eq!(table.state_of(&ids[0]), None);
        assert_eq!(table.state_of(&ids[1]), Some(RequestState::Rejected));
        assert!(table.is_empty());
    }
}
