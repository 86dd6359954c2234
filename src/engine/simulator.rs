use std::sync::Arc;
use std::time::Duration;

use crate::engine::gateway::{AgentGateway, AgentRequest};
use crate::engine::llm::{ChatMessage, ChatModel};
use crate::engine::overrides;
use crate::engine::types::{ConversationTurn, OverridableNode, Persona, StateValues, TurnRole};
use crate::error::AppError;

/// Policy knobs for one simulated conversation. The round count and delay
/// are operational constants, not derived from conversation content.
#[derive(Debug, Clone)]
pub struct SimulationPolicy {
    /// Round-trips per conversation (each contributes two turns).
    pub rounds: usize,
    /// Pause between round-trips, respecting external rate limits.
    pub turn_delay: Duration,
}

impl Default for SimulationPolicy {
    fn default() -> Self {
        Self {
            rounds: 5,
            turn_delay: Duration::from_millis(300),
        }
    }
}

/// Drives one fixed-length scripted conversation between a synthetic
/// persona and the target agent, alternating persona-turn generation and
/// agent invocation.
pub struct ConversationSimulator {
    llm: Arc<dyn ChatModel>,
    gateway: Arc<dyn AgentGateway>,
    policy: SimulationPolicy,
}

impl ConversationSimulator {
    pub fn new(llm: Arc<dyn ChatModel>, gateway: Arc<dyn AgentGateway>) -> Self {
        Self::with_policy(llm, gateway, SimulationPolicy::default())
    }

    pub fn with_policy(
        llm: Arc<dyn ChatModel>,
        gateway: Arc<dyn AgentGateway>,
        policy: SimulationPolicy,
    ) -> Self {
        Self {
            llm,
            gateway,
            policy,
        }
    }

    /// Run the conversation to its fixed length and return the transcript.
    ///
    /// The chat id returned by the agent's first reply is reused on every
    /// later turn, keeping the exchange one logical session on the agent
    /// side. Node-prompt overrides are resolved once up front and sent with
    /// every turn.
    pub async fn simulate(
        &self,
        persona: &Persona,
        nodes: &[OverridableNode],
        state_values: &StateValues,
    ) -> Result<Vec<ConversationTurn>, AppError> {
        let resolved = overrides::build_override_config(nodes, state_values);
        let override_config = (!resolved.is_empty()).then_some(resolved);

        let mut transcript: Vec<ConversationTurn> = Vec::with_capacity(self.policy.rounds * 2);
        let mut chat_id: Option<String> = None;

        for round in 0..self.policy.rounds {
            if round > 0 && !self.policy.turn_delay.is_zero() {
                tokio::time::sleep(self.policy.turn_delay).await;
            }

            let user_message = self.next_user_turn(persona, &transcript).await?;

            let reply = self
                .gateway
                .send(AgentRequest {
                    question: user_message.clone(),
                    chat_id: chat_id.clone(),
                    override_config: override_config.clone(),
                })
                .await?;

            if chat_id.is_none() {
                chat_id = reply.chat_id.clone();
            }

            transcript.push(ConversationTurn {
                role: TurnRole::User,
                content: user_message,
                trace_data: None,
            });
            transcript.push(ConversationTurn {
                role: TurnRole::Assistant,
                content: reply.text,
                trace_data: reply.agent_reasoning,
            });
        }

        tracing::debug!(
            persona_id = %persona.id,
            turns = transcript.len(),
            "conversation complete"
        );
        Ok(transcript)
    }

    /// Ask the model for the persona's next message.
    ///
    /// The history is role-inverted: the persona's own earlier messages are
    /// presented as assistant turns (they are this model's prior output)
    /// and the target agent's replies as user turns.
    async fn next_user_turn(
        &self,
        persona: &Persona,
        transcript: &[ConversationTurn],
    ) -> Result<String, AppError> {
        let mut messages = vec![ChatMessage::system(persona_voice_prompt(persona))];
        for turn in transcript {
            match turn.role {
                TurnRole::User => messages.push(ChatMessage::assistant(&turn.content)),
                TurnRole::Assistant => messages.push(ChatMessage::user(&turn.content)),
            }
        }
        if transcript.is_empty() {
            messages.push(ChatMessage::user(
                "Open the conversation with your first message to the assistant.",
            ));
        }

        self.llm.complete(&messages).await
    }
}

fn persona_voice_prompt(persona: &Persona) -> String {
    format!(
        "You are role-playing a user talking to a customer-facing AI assistant.\n\n\
         Name: {}\nRole: {}\nGoal: {}\nContext: {}\nTone: {}\n\n\
         Stay in character for the whole conversation. Write exactly one message \
         per turn, in plain text, the way this person would type it. Pursue your \
         goal; react naturally to what the assistant says. Never mention that you \
         are simulated or part of a test.",
        persona.name, persona.role, persona.goal, persona.context, persona.tone
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::engine::gateway::AgentReply;

    use super::*;

    struct CountingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for CountingModel {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            // The persona generator only ever sees inverted history: its own
            // prior messages as "assistant", agent replies as "user". The
            // synthetic opener instruction appears on the first call only.
            assert_eq!(messages[0].role, "system");
            let expected = if call == 0 { 2 } else { 2 * call + 1 };
            assert_eq!(messages.len(), expected);
            Ok(format!("persona message {call}"))
        }
    }

    struct RecordingGateway {
        requests: Mutex<Vec<AgentRequest>>,
    }

    #[async_trait]
    impl AgentGateway for RecordingGateway {
        async fn send(&self, request: AgentRequest) -> Result<AgentReply, AppError> {
            let turn = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request);
                requests.len()
            };
            Ok(AgentReply {
                text: format!("agent reply {turn}"),
                chat_id: Some("chat-77".into()),
                chat_message_id: Some(format!("msg-{turn}")),
                agent_reasoning: Some(json!([{ "node": "agent", "step": turn }])),
            })
        }
    }

    fn persona() -> Persona {
        Persona {
            id: "persona-1".into(),
            name: "Dana".into(),
            role: "shopper".into(),
            goal: "track an order".into(),
            context: "ordered last week".into(),
            tone: "impatient".into(),
        }
    }

    fn test_policy() -> SimulationPolicy {
        SimulationPolicy {
            rounds: 5,
            turn_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_full_conversation_shape() {
        let gateway = Arc::new(RecordingGateway {
            requests: Mutex::new(Vec::new()),
        });
        let simulator = ConversationSimulator::with_policy(
            Arc::new(CountingModel {
                calls: AtomicUsize::new(0),
            }),
            gateway.clone(),
            test_policy(),
        );

        let nodes = vec![OverridableNode {
            id: "node-1".into(),
            label: "Agent".into(),
            node_type: "conversationalAgent".into(),
            system_message_prompt: Some("You are {brand_name}.".into()),
            human_message_prompt: None,
        }];
        let state: StateValues = [("brand_name".to_string(), "Acme".to_string())].into();

        let transcript = simulator.simulate(&persona(), &nodes, &state).await.unwrap();

        assert_eq!(transcript.len(), 10);
        assert!(transcript
            .iter()
            .step_by(2)
            .all(|t| t.role == TurnRole::User));
        // Agent turns carry the reasoning trace through opaquely.
        assert!(transcript[1].trace_data.is_some());
        assert!(transcript[0].trace_data.is_none());

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests.len(), 5);
        // First turn opens the session; every later turn reuses the chat id
        // the agent handed back.
        assert!(requests[0].chat_id.is_none());
        assert!(requests[1..]
            .iter()
            .all(|r| r.chat_id.as_deref() == Some("chat-77")));
        // Overrides ride along on every single turn, fully resolved.
        for request in requests.iter() {
            let overrides = request.override_config.as_ref().unwrap();
            assert_eq!(overrides.system_message_prompt["node-1"], "You are Acme.");
        }
    }

    #[tokio::test]
    async fn test_no_override_config_when_no_nodes() {
        let gateway = Arc::new(RecordingGateway {
            requests: Mutex::new(Vec::new()),
        });
        let simulator = ConversationSimulator::with_policy(
            Arc::new(CountingModel {
                calls: AtomicUsize::new(0),
            }),
            gateway.clone(),
            SimulationPolicy {
                rounds: 1,
                turn_delay: Duration::ZERO,
            },
        );

        simulator
            .simulate(&persona(), &[], &StateValues::new())
            .await
            .unwrap();
        assert!(gateway.requests.lock().unwrap()[0].override_config.is_none());
    }

    struct FailingGateway;

    #[async_trait]
    impl AgentGateway for FailingGateway {
        async fn send(&self, _request: AgentRequest) -> Result<AgentReply, AppError> {
            Err(AppError::Simulation("agent returned 502: bad gateway".into()))
        }
    }

    #[tokio::test]
    async fn test_gateway_failure_propagates() {
        let simulator = ConversationSimulator::with_policy(
            Arc::new(CountingModel {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FailingGateway),
            test_policy(),
        );
        let err = simulator
            .simulate(&persona(), &[], &StateValues::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "simulation");
    }
}
