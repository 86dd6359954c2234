use crate::engine::gateway::OverrideConfig;
use crate::engine::template;
use crate::engine::types::{OverridableNode, StateValues};

// ============================================================================
// Node classification
// ============================================================================

/// Classification of one configuration-graph node, decided once at
/// ingestion instead of re-sniffing name/type strings at each use site.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeClass {
    /// The node carries editable prompt slots.
    Prompted {
        system_prompt: Option<String>,
        human_prompt: Option<String>,
    },
    /// Nothing to override on this node.
    NotPrompted,
}

impl NodeClass {
    /// Classify a raw graph node by its declared prompt inputs.
    pub fn classify(inputs: &serde_json::Value) -> Self {
        let system_prompt = prompt_field(inputs, "systemMessagePrompt");
        let human_prompt = prompt_field(inputs, "humanMessagePrompt");

        if system_prompt.is_none() && human_prompt.is_none() {
            NodeClass::NotPrompted
        } else {
            NodeClass::Prompted {
                system_prompt,
                human_prompt,
            }
        }
    }
}

fn prompt_field(inputs: &serde_json::Value, key: &str) -> Option<String> {
    inputs
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
}

/// Build an `OverridableNode` from one raw graph node, or None when the
/// node carries no prompt slots. This is the single place graph data turns
/// into typed nodes; everything downstream works on the typed form.
pub fn ingest_node(
    id: &str,
    label: &str,
    node_type: &str,
    inputs: &serde_json::Value,
) -> Option<OverridableNode> {
    match NodeClass::classify(inputs) {
        NodeClass::Prompted {
            system_prompt,
            human_prompt,
        } => Some(OverridableNode {
            id: id.to_string(),
            label: label.to_string(),
            node_type: node_type.to_string(),
            system_message_prompt: system_prompt,
            human_message_prompt: human_prompt,
        }),
        NodeClass::NotPrompted => None,
    }
}

// ============================================================================
// Override building
// ============================================================================

/// Resolve every node's system prompt against the state map and return the
/// full override set.
///
/// Every prompt present is sent explicitly, not just ones that differ from
/// the agent's stored defaults, so repeated runs see identical agent
/// behavior regardless of what the agent considers "default".
pub fn build_override_config(
    nodes: &[OverridableNode],
    state_values: &StateValues,
) -> OverrideConfig {
    let mut overrides = OverrideConfig::default();
    for node in nodes {
        if let Some(prompt) = &node.system_message_prompt {
            overrides
                .system_message_prompt
                .insert(node.id.clone(), template::resolve(prompt, state_values));
        }
    }
    overrides
}
