//! Agent Card generation for `GET /a2a/agent-card` and `.well-known/agent.json`.
//!
//! Advertises the gateway's REST interface, its event stream, and the
//! task-delegation skills other agents can call.

use crate::a2a::types::*;

/// Build the Agent Card for a gateway listening on `host:port`.
pub fn build_agent_card(host: &str, port: u16) -> AgentCard {
    let base_url = format!("http://{}:{}", host, port);
    let modes = || vec!["text/plain".to_string(), "application/json".to_string()];

    AgentCard {
        name: format!("A2A Gateway (v{})", crate::VERSION),
        description: Some(
            "Task coordination gateway for agent-to-agent delegation with \
             lifecycle tracking and replayable event streams."
                .to_string(),
        ),
        version: Some(crate::VERSION.to_string()),
        documentation_url: None,
        supported_interfaces: vec![
            SupportedInterface {
                url: format!("{}/a2a", base_url),
                protocol_binding: "HTTP+JSON".to_string(),
                protocol_version: Some("1.0".to_string()),
            },
            SupportedInterface {
                url: format!("{}/a2a/events", base_url),
                protocol_binding: "SSE".to_string(),
                protocol_version: None,
            },
        ],
        provider: Some(AgentProvider {
            organization: "A2A Gateway Contributors".to_string(),
            url: None,
        }),
        capabilities: AgentCapabilities {
            streaming: true,
            push_notifications: false,
            state_transition_history: true,
        },
        skills: vec![
            AgentSkill {
                id: "task-delegation".to_string(),
                name: "Task Delegation".to_string(),
                description: Some(
                    "Accept a task from another agent and track it from submission to completion."
                        .to_string(),
                ),
                tags: vec!["tasks".to_string(), "delegation".to_string()],
                examples: vec!["Review the attached pull request and report findings.".to_string()],
                input_modes: modes(),
                output_modes: modes(),
            },
            AgentSkill {
                id: "task-events".to_string(),
                name: "Lifecycle Events".to_string(),
                description: Some(
                    "Stream task lifecycle events with Last-Event-ID resume.".to_string(),
                ),
                tags: vec!["events".to_string(), "sse".to_string()],
                examples: vec![],
                input_modes: vec![],
                output_modes: vec!["text/event-stream".to_string()],
            },
        ],
        default_input_modes: modes(),
        default_output_modes: modes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_agent_card() {
        let card = build_agent_card("127.0.0.1", 18790);
        assert!(card.name.contains("A2A Gateway"));
        assert_eq!(card.skills.len(), 2);
        assert_eq!(card.supported_interfaces[0].url, "http://127.0.0.1:18790/a2a");
        assert!(card.capabilities.streaming);
        assert!(card.capabilities.state_transition_history);
    }
}
