//! Routing state machine.
//!
//! One user turn runs `Dispatch -> (ToolPending | Validating) -> ... -> Done`.
//! Each transition that changes conversation state is a pure function of
//! the previous snapshot and the agent's reply (`resolve_calls`,
//! `apply_tool_step`, `apply_verdict`); the driver in `run_turn` only
//! awaits the external calls between them.

use crate::envelope::AgentEnvelope;
use crate::loop_detector::{LoopDetector, loop_guidance, transfer_chain};
use crate::retry::{RetryController, RetryDecision};
use crate::settings::RouterSettings;
use crate::suggestions::parse_suggestions;
use crate::validation::{ValidationOutcome, ValidationPolicy, transfer_context};
use futures_util::future::join_all;
use metrics::counter;
use std::sync::Arc;
use switchboard_core::handoff::{self, CallKind};
use switchboard_core::{
    AgentDescriptor, AgentInvoker, AgentRegistry, AgentReply, ConversationState, EventSink,
    HandoffSeed, Message, ResponseJudge, RoutingRejection, SwitchboardError, ToolCall,
    ToolExecutor, ToolOutput, TransferAlert, TurnEvent,
};
use tracing::{debug, error, info, warn};

/// Reply shown when a turn cannot produce an agent response.
pub const FALLBACK_REPLY: &str = "I wasn't able to generate a response. Please try again.";

/// What happens to one tool call of an agent reply.
#[derive(Debug, Clone, PartialEq)]
pub enum CallDisposition {
    Execute(ToolCall),
    Reject {
        call: ToolCall,
        rejection: RoutingRejection,
    },
    AcceptHandoff {
        call: ToolCall,
        target: String,
        task_description: String,
    },
}

impl CallDisposition {
    pub fn call(&self) -> &ToolCall {
        match self {
            CallDisposition::Execute(call)
            | CallDisposition::Reject { call, .. }
            | CallDisposition::AcceptHandoff { call, .. } => call,
        }
    }
}

/// Routing decision for a reply that carries tool calls.
#[derive(Debug, Clone, PartialEq)]
pub struct CallPlan {
    /// One entry per tool call, in issue order.
    pub dispositions: Vec<CallDisposition>,
    pub alert: Option<TransferAlert>,
    pub guidance: Option<String>,
    /// Set when the reply must go through the retry path instead.
    pub malformed: Option<String>,
}

impl CallPlan {
    pub fn accepted_handoff(&self) -> Option<(&str, &str)> {
        self.dispositions.iter().find_map(|d| match d {
            CallDisposition::AcceptHandoff {
                target,
                task_description,
                ..
            } => Some((target.as_str(), task_description.as_str())),
            _ => None,
        })
    }

    pub fn rejections(&self) -> impl Iterator<Item = &RoutingRejection> {
        self.dispositions.iter().filter_map(|d| match d {
            CallDisposition::Reject { rejection, .. } => Some(rejection),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictTransition {
    Accepted { reply: String },
    Retry { feedback: String, retry_count: u32 },
    /// Retry bound reached; the last response is accepted unvalidated.
    Exhausted { reply: String, feedback: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Accepted,
    ForcedAccept,
    Failed,
    StepLimit,
}

impl TurnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnStatus::Accepted => "accepted",
            TurnStatus::ForcedAccept => "forced_accept",
            TurnStatus::Failed => "failed",
            TurnStatus::StepLimit => "step_limit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: ConversationState,
    pub reply: String,
    pub status: TurnStatus,
    pub steps: usize,
}

enum Phase {
    Dispatch,
    ToolPending {
        agent: AgentDescriptor,
        reply: AgentReply,
    },
    Validating {
        agent: AgentDescriptor,
        text: String,
    },
    Done {
        reply: String,
        status: TurnStatus,
    },
}

enum MalformedStep {
    Retry(ConversationState, String),
    Exhausted(ConversationState),
}

pub struct Router {
    registry: Arc<AgentRegistry>,
    envelope: AgentEnvelope,
    tools: Arc<dyn ToolExecutor>,
    validation: ValidationPolicy,
    detector: LoopDetector,
    retry: RetryController,
    settings: RouterSettings,
}

impl Router {
    pub fn new(
        settings: RouterSettings,
        registry: Arc<AgentRegistry>,
        invoker: Arc<dyn AgentInvoker>,
        tools: Arc<dyn ToolExecutor>,
        judge: Arc<dyn ResponseJudge>,
    ) -> Result<Self, SwitchboardError> {
        registry.validate(&settings.root_agent)?;
        if let Some(name) = &settings.suggestions_agent
            && !registry.is_spectator(name)
        {
            return Err(SwitchboardError::Registry(format!(
                "suggestions agent '{name}' must be a registered spectator"
            )));
        }
        let envelope = AgentEnvelope::new(
            registry.clone(),
            invoker,
            tools.clone(),
            settings.max_messages,
            settings.retry_error_window,
        );
        let validation = ValidationPolicy::new(judge)
            .with_timeout(settings.validator_timeout)
            .with_context_window(settings.validation_context_window);
        Ok(Self {
            registry,
            envelope,
            tools,
            validation,
            detector: LoopDetector::new(settings.loop_threshold),
            retry: RetryController::new(settings.max_retries),
            settings,
        })
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Fresh state for a thread that has no checkpoint yet.
    pub fn new_state(&self, thread_id: &str) -> ConversationState {
        ConversationState::new(thread_id, self.settings.root_agent.clone())
    }

    fn refresh_history(&self, state: &mut ConversationState) {
        let registry = &self.registry;
        state.refresh_transfer_history(self.settings.transfer_window, |name| {
            registry.is_spectator(name)
        });
    }

    /// Append the user message and clear leftovers of the previous turn.
    pub fn begin_turn(&self, state: ConversationState, user_text: &str) -> ConversationState {
        let mut next = state;
        next.messages.push(Message::user(user_text));
        next.retry_context = None;
        next.handoff_seed = None;
        next.alerts.clear();
        next.loop_guidance = None;
        next.suggested_questions.clear();
        self.refresh_history(&mut next);
        next
    }

    /// The agent to dispatch, falling back to the root agent when the
    /// stored one is unknown or a spectator.
    pub fn resolve_agent(
        &self,
        state: &mut ConversationState,
    ) -> Result<AgentDescriptor, SwitchboardError> {
        if let Some(agent) = self.registry.get(&state.current_agent)
            && !agent.spectator
        {
            return Ok(agent.clone());
        }
        let root = &self.settings.root_agent;
        if !state.current_agent.is_empty() {
            warn!(
                "thread={}: current agent '{}' is not dispatchable, falling back to {}",
                state.thread_id, state.current_agent, root
            );
        }
        let agent = self
            .registry
            .get(root)
            .cloned()
            .ok_or_else(|| SwitchboardError::Registry(format!("root agent '{root}' missing")))?;
        state.current_agent = agent.name.clone();
        Ok(agent)
    }

    /// Decide every tool call of `calls`. Pure.
    ///
    /// Order of checks for handoffs: more than one handoff in the reply,
    /// self-transfer, unknown or spectator or non-partner target, and
    /// finally loop detection.
    pub fn resolve_calls(
        &self,
        state: &ConversationState,
        agent: &AgentDescriptor,
        calls: &[ToolCall],
    ) -> CallPlan {
        let kinds: Vec<CallKind> = calls.iter().map(handoff::classify).collect();
        let handoff_targets: Vec<String> = kinds
            .iter()
            .filter_map(|k| match k {
                CallKind::Handoff { target, .. } => Some(target.clone()),
                CallKind::Malformed { call, .. } => Some(
                    call.name
                        .strip_prefix(handoff::HANDOFF_PREFIX)
                        .unwrap_or(&call.name)
                        .to_string(),
                ),
                CallKind::Domain(_) => None,
            })
            .collect();
        let simultaneous = handoff_targets.len() > 1;

        let mut plan = CallPlan {
            dispositions: Vec::with_capacity(calls.len()),
            alert: simultaneous.then(|| TransferAlert::Simultaneous {
                targets: handoff_targets.clone(),
            }),
            guidance: None,
            malformed: None,
        };

        for (call, kind) in calls.iter().zip(kinds) {
            let disposition = match kind {
                CallKind::Domain(call) => CallDisposition::Execute(call),
                _ if simultaneous => CallDisposition::Reject {
                    call: call.clone(),
                    rejection: RoutingRejection::SimultaneousTransfer {
                        targets: handoff_targets.clone(),
                    },
                },
                CallKind::Malformed { call, reason } => {
                    plan.malformed = Some(format!(
                        "Tool call '{}' is malformed: {reason}.",
                        call.name
                    ));
                    CallDisposition::Reject {
                        rejection: RoutingRejection::MalformedToolCall {
                            name: call.name.clone(),
                            reason,
                        },
                        call,
                    }
                }
                CallKind::Handoff {
                    target,
                    task_description,
                    ..
                } => match self.check_handoff(state, agent, &target) {
                    Ok(()) => CallDisposition::AcceptHandoff {
                        call: call.clone(),
                        target,
                        task_description,
                    },
                    Err(rejection) => {
                        if let RoutingRejection::TransferLoop { reason } = &rejection {
                            plan.alert = Some(TransferAlert::Loop {
                                reason: reason.clone(),
                            });
                            plan.guidance = Some(loop_guidance(
                                &agent.name,
                                agent.primary_function.as_deref(),
                                &state.transfer_history,
                            ));
                        }
                        CallDisposition::Reject {
                            call: call.clone(),
                            rejection,
                        }
                    }
                },
            };
            plan.dispositions.push(disposition);
        }
        plan
    }

    fn check_handoff(
        &self,
        state: &ConversationState,
        agent: &AgentDescriptor,
        target: &str,
    ) -> Result<(), RoutingRejection> {
        if target == agent.name || target == state.current_agent {
            return Err(RoutingRejection::SelfTransfer);
        }
        let Some(descriptor) = self.registry.get(target) else {
            return Err(RoutingRejection::UnknownAgent {
                target: target.to_string(),
            });
        };
        if descriptor.spectator {
            return Err(RoutingRejection::SpectatorTarget {
                target: target.to_string(),
            });
        }
        if !agent.partners.contains(target) {
            return Err(RoutingRejection::NotPartner {
                from: agent.name.clone(),
                to: target.to_string(),
            });
        }
        let verdict = self
            .detector
            .detect(&agent.name, target, &state.transfer_history);
        match verdict.reason() {
            Some(reason) => Err(RoutingRejection::TransferLoop {
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Fixed outputs for calls that are not executed.
    pub fn planned_output(disposition: &CallDisposition) -> Option<ToolOutput> {
        match disposition {
            CallDisposition::Execute(_) => None,
            CallDisposition::Reject { rejection, .. } => {
                Some(ToolOutput::error(rejection.to_string()))
            }
            CallDisposition::AcceptHandoff { target, .. } => {
                Some(ToolOutput::ok(handoff::accepted_text(target)))
            }
        }
    }

    /// Append the agent's tool-call message and one result per call in
    /// issue order, then apply an accepted handoff. Pure.
    pub fn apply_tool_step(
        &self,
        state: &ConversationState,
        agent: &str,
        reply: &AgentReply,
        plan: &CallPlan,
        outputs: Vec<ToolOutput>,
    ) -> ConversationState {
        let mut next = state.clone();
        next.messages.push(Message::agent_calls(
            agent,
            reply.content.clone(),
            reply.tool_calls.clone(),
        ));

        let mut outputs = outputs.into_iter();
        for disposition in &plan.dispositions {
            let call = disposition.call();
            let output = outputs.next().unwrap_or_else(|| {
                ToolOutput::error("Tool execution result missing (internal error)")
            });
            next.messages.push(Message::ToolResult {
                tool_name: call.name.clone(),
                call_id: call.call_id.clone(),
                content: output.content,
                is_error: output.is_error,
                side_data: output.side_data,
            });
        }

        if let Some(alert) = &plan.alert {
            next.alerts.push(alert.clone());
        }
        if let Some(guidance) = &plan.guidance {
            next.loop_guidance = Some(guidance.clone());
        }
        if let Some((target, task_description)) = plan.accepted_handoff() {
            next.current_agent = target.to_string();
            next.handoff_seed = Some(HandoffSeed {
                from_agent: agent.to_string(),
                task_description: task_description.to_string(),
                log_index: next.messages.len(),
            });
            next.retry_context = None;
            next.loop_guidance = None;
            // Alerts belong to the agent that raised them
            next.alerts.clear();
        }
        self.refresh_history(&mut next);
        next
    }

    /// Apply a validation outcome for a final reply. Pure.
    pub fn apply_verdict(
        &self,
        state: &ConversationState,
        agent: &str,
        text: &str,
        outcome: &ValidationOutcome,
    ) -> (ConversationState, VerdictTransition) {
        let mut next = state.clone();
        next.alerts.clear();

        if outcome.valid {
            let reply = self.finalize(&mut next, agent, text);
            return (next, VerdictTransition::Accepted { reply });
        }

        let feedback = outcome.feedback.clone().unwrap_or_default();
        let guidance = next.loop_guidance.clone().or_else(|| outcome.guidance.clone());
        match self.retry.on_rejection(
            next.retry_context.as_ref(),
            text,
            &feedback,
            guidance.as_deref(),
        ) {
            RetryDecision::Retry(context) => {
                let retry_count = context.retry_count;
                next.retry_context = Some(context);
                (
                    next,
                    VerdictTransition::Retry {
                        feedback,
                        retry_count,
                    },
                )
            }
            RetryDecision::Exhausted { .. } => {
                let reply = self.finalize(&mut next, agent, text);
                (next, VerdictTransition::Exhausted { reply, feedback })
            }
        }
    }

    fn apply_malformed(
        &self,
        state: &ConversationState,
        reply: &AgentReply,
        reason: &str,
    ) -> MalformedStep {
        let failed_attempt = reply
            .tool_calls
            .iter()
            .map(|c| format!("{}({})", c.name, c.arguments))
            .collect::<Vec<_>>()
            .join("\n");
        let mut next = state.clone();
        match self.retry.on_rejection(
            next.retry_context.as_ref(),
            &failed_attempt,
            reason,
            next.loop_guidance.as_deref(),
        ) {
            RetryDecision::Retry(context) => {
                next.retry_context = Some(context);
                MalformedStep::Retry(next, reason.to_string())
            }
            RetryDecision::Exhausted { .. } => {
                next.retry_context = None;
                MalformedStep::Exhausted(next)
            }
        }
    }

    /// Append the accepted reply and drop all per-turn transient state.
    fn finalize(&self, state: &mut ConversationState, agent: &str, text: &str) -> String {
        let reply = if text.trim().is_empty() {
            FALLBACK_REPLY.to_string()
        } else {
            text.to_string()
        };
        state.messages.push(Message::agent_text(agent, reply.clone()));
        state.retry_context = None;
        state.handoff_seed = None;
        state.loop_guidance = None;
        state.alerts.clear();
        state.trim_messages(self.settings.max_messages);
        self.refresh_history(state);
        reply
    }

    fn fail_turn(&self, mut state: ConversationState) -> ConversationState {
        state.retry_context = None;
        state.handoff_seed = None;
        state.loop_guidance = None;
        state.alerts.clear();
        state.trim_messages(self.settings.max_messages);
        self.refresh_history(&mut state);
        state
    }

    async fn execute_plan(&self, plan: &CallPlan) -> Vec<ToolOutput> {
        let futures = plan.dispositions.iter().map(|disposition| {
            let tools = self.tools.clone();
            async move {
                if let Some(output) = Self::planned_output(disposition) {
                    return output;
                }
                let call = disposition.call();
                let name = call.name.clone();
                let arguments = call.arguments.clone();
                let handle =
                    tokio::spawn(async move { tools.execute(&name, &arguments).await });
                match handle.await {
                    Ok(output) => output,
                    Err(e) => {
                        error!("tool '{}' panicked: {}", call.name, e);
                        ToolOutput::error("Tool crashed unexpectedly")
                    }
                }
            }
        });
        join_all(futures).await
    }

    async fn run_tools(
        &self,
        state: ConversationState,
        agent: &AgentDescriptor,
        reply: &AgentReply,
        events: &EventSink,
    ) -> ConversationState {
        let plan = self.resolve_calls(&state, agent, &reply.tool_calls);

        let mut state = state;
        if let Some(reason) = &plan.malformed {
            match self.apply_malformed(&state, reply, reason) {
                MalformedStep::Retry(next, feedback) => {
                    warn!(
                        "thread={}, agent={}: malformed tool call, retrying (retry_count={}): {}",
                        next.thread_id,
                        agent.name,
                        next.retry_context.as_ref().map_or(0, |c| c.retry_count),
                        feedback
                    );
                    counter!("switchboard_validation_failures_total").increment(1);
                    events.emit(TurnEvent::ValidationFailed { feedback }).await;
                    return next;
                }
                MalformedStep::Exhausted(next) => {
                    warn!(
                        "thread={}, agent={}: malformed tool call and retries exhausted, returning errors to agent",
                        next.thread_id, agent.name
                    );
                    counter!("switchboard_retries_exhausted_total").increment(1);
                    state = next;
                }
            }
        }

        for disposition in &plan.dispositions {
            let call = disposition.call();
            events
                .emit(TurnEvent::ToolStart {
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                    call_id: call.call_id.clone(),
                })
                .await;
        }

        let outputs = self.execute_plan(&plan).await;

        for (disposition, output) in plan.dispositions.iter().zip(&outputs) {
            let call = disposition.call();
            events
                .emit(TurnEvent::ToolEnd {
                    name: call.name.clone(),
                    output: output.content.clone(),
                    call_id: call.call_id.clone(),
                })
                .await;
        }

        let chain = transfer_chain(&state.transfer_history).join(" -> ");
        for rejection in plan.rejections() {
            counter!("switchboard_handoffs_total", "outcome" => rejection.kind()).increment(1);
            warn!(
                "thread={}, agent={}: handoff rejected ({}): {} [chain: {}]",
                state.thread_id,
                agent.name,
                rejection.kind(),
                rejection,
                chain
            );
        }

        let next = self.apply_tool_step(&state, &agent.name, reply, &plan, outputs);

        if let Some((target, _)) = plan.accepted_handoff() {
            counter!("switchboard_handoffs_total", "outcome" => "accepted").increment(1);
            info!(
                "thread={}: handoff {} -> {}",
                next.thread_id, agent.name, target
            );
            events
                .emit(TurnEvent::Handoff {
                    from: agent.name.clone(),
                    to: target.to_string(),
                })
                .await;
        }
        next
    }

    async fn run_suggestions(&self, state: &mut ConversationState, events: &EventSink) {
        let Some(agent) = self
            .settings
            .suggestions_agent
            .as_deref()
            .and_then(|name| self.registry.get(name))
        else {
            return;
        };
        // Spectator: never touches current_agent or the log.
        match self.envelope.execute(agent, state).await {
            Ok(reply) => {
                let questions = parse_suggestions(reply.content.as_deref().unwrap_or_default());
                if questions.is_empty() {
                    return;
                }
                state.suggested_questions.clone_from(&questions);
                events.emit(TurnEvent::Suggestions { questions }).await;
            }
            Err(e) => warn!("thread={}: suggestions skipped: {}", state.thread_id, e),
        }
    }

    /// Run one user turn to completion.
    ///
    /// External failures degrade the reply instead of erroring; only an
    /// inconsistent registry produces `Err`.
    pub async fn run_turn(
        &self,
        state: ConversationState,
        user_text: &str,
        events: &EventSink,
    ) -> Result<TurnOutcome, SwitchboardError> {
        let mut state = self.begin_turn(state, user_text);
        let mut steps = 0usize;
        let mut phase = Phase::Dispatch;

        info!(
            "thread={}: turn started with agent {}",
            state.thread_id, state.current_agent
        );

        loop {
            phase = match phase {
                Phase::Dispatch => {
                    if steps >= self.settings.max_steps {
                        warn!(
                            "thread={}, agent={}: step limit of {} reached",
                            state.thread_id, state.current_agent, self.settings.max_steps
                        );
                        state = self.fail_turn(state);
                        Phase::Done {
                            reply: FALLBACK_REPLY.to_string(),
                            status: TurnStatus::StepLimit,
                        }
                    } else {
                        steps += 1;
                        let agent = self.resolve_agent(&mut state)?;
                        match self.envelope.execute(&agent, &state).await {
                            Ok(reply) if reply.has_tool_calls() => {
                                Phase::ToolPending { agent, reply }
                            }
                            Ok(reply) => Phase::Validating {
                                agent,
                                text: reply.content.unwrap_or_default(),
                            },
                            Err(e) => {
                                error!(
                                    "thread={}, retry_count={}: {}",
                                    state.thread_id,
                                    state.retry_context.as_ref().map_or(0, |c| c.retry_count),
                                    e
                                );
                                state = self.fail_turn(state);
                                Phase::Done {
                                    reply: FALLBACK_REPLY.to_string(),
                                    status: TurnStatus::Failed,
                                }
                            }
                        }
                    }
                }
                Phase::ToolPending { agent, reply } => {
                    state = self.run_tools(state, &agent, &reply, events).await;
                    Phase::Dispatch
                }
                Phase::Validating { agent, text } => {
                    let context = transfer_context(&state, &self.detector);
                    let outcome = self
                        .validation
                        .evaluate(&text, &agent, &state, &context)
                        .await;
                    if let Some(feedback) = outcome.feedback.as_ref().filter(|_| !outcome.valid) {
                        counter!("switchboard_validation_failures_total").increment(1);
                        events
                            .emit(TurnEvent::ValidationFailed {
                                feedback: feedback.clone(),
                            })
                            .await;
                    }
                    let (next, transition) =
                        self.apply_verdict(&state, &agent.name, &text, &outcome);
                    state = next;
                    match transition {
                        VerdictTransition::Accepted { reply } => Phase::Done {
                            reply,
                            status: TurnStatus::Accepted,
                        },
                        VerdictTransition::Retry {
                            feedback,
                            retry_count,
                        } => {
                            info!(
                                "thread={}, agent={}: response rejected, retry {}/{}: {}",
                                state.thread_id,
                                agent.name,
                                retry_count,
                                self.retry.max_retries(),
                                feedback
                            );
                            Phase::Dispatch
                        }
                        VerdictTransition::Exhausted { reply, feedback } => {
                            warn!(
                                "thread={}, agent={}: retries exhausted, accepting last response (last feedback: {})",
                                state.thread_id, agent.name, feedback
                            );
                            counter!("switchboard_retries_exhausted_total").increment(1);
                            Phase::Done {
                                reply,
                                status: TurnStatus::ForcedAccept,
                            }
                        }
                    }
                }
                Phase::Done { reply, status } => {
                    events
                        .emit(TurnEvent::LlmMessage {
                            content: reply.clone(),
                        })
                        .await;
                    if matches!(status, TurnStatus::Accepted | TurnStatus::ForcedAccept) {
                        self.run_suggestions(&mut state, events).await;
                    }
                    counter!("switchboard_turns_total", "outcome" => status.as_str()).increment(1);
                    debug!(
                        "thread={}: turn finished as {} after {} steps",
                        state.thread_id,
                        status.as_str(),
                        steps
                    );
                    return Ok(TurnOutcome {
                        state,
                        reply,
                        status,
                        steps,
                    });
                }
            };
        }
    }
}
