//! ReAct response parsing.
//!
//! Assistant messages follow the Thought / Action / Action Input /
//! Final Answer format. Sections span lines until the next section marker;
//! `Final Answer:` marks the response complete.

use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReactResponse {
    pub thought: Option<String>,
    pub action: Option<String>,
    pub action_input: Option<Value>,
    pub final_answer: Option<String>,
    pub is_complete: bool,
}

const SECTION_MARKERS: [&str; 4] = ["Thought:", "Action:", "Action Input:", "Final Answer:"];

pub fn parse_react_response(text: &str) -> ReactResponse {
    let mut response = ReactResponse::default();
    let mut current: Option<(&str, Vec<&str>)> = None;

    let mut flush = |section: &str, lines: &[&str], response: &mut ReactResponse| {
        let content = lines.join("\n").trim().to_string();
        if content.is_empty() {
            return;
        }
        match section {
            "Thought:" => response.thought = Some(content),
            "Action:" => response.action = Some(content),
            "Action Input:" => {
                // JSON when it parses, raw string otherwise.
                response.action_input = Some(
                    serde_json::from_str(&content).unwrap_or(Value::String(content)),
                )
            }
            "Final Answer:" => response.final_answer = Some(content),
            _ => {}
        }
    };

    for line in text.lines() {
        let trimmed = line.trim_start();
        let marker = SECTION_MARKERS
            .iter()
            .find(|marker| trimmed.starts_with(**marker));
        match marker {
            Some(marker) => {
                if let Some((section, lines)) = current.take() {
                    flush(section, &lines, &mut response);
                }
                let rest = &trimmed[marker.len()..];
                current = Some((marker, vec![rest]));
            }
            None => {
                if let Some((_, lines)) = current.as_mut() {
                    lines.push(line);
                }
            }
        }
    }
    if let Some((section, lines)) = current.take() {
        flush(section, &lines, &mut response);
    }

    response.is_complete = response.final_answer.is_some();
    response
}

/// Split a dotted `server.tool` action name. Tools may themselves contain
/// dots, so only the first dot separates.
pub fn split_action(action: &str) -> Option<(&str, &str)> {
    let (server, tool) = action.split_once('.')?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_thought_action_input() {
        let text = "Thought: I should inspect the pods.\n\
                    Action: kubernetes-server.list_pods\n\
                    Action Input: {\"namespace\": \"default\"}";
        let parsed = parse_react_response(text);
        assert_eq!(parsed.thought.as_deref(), Some("I should inspect the pods."));
        assert_eq!(parsed.action.as_deref(), Some("kubernetes-server.list_pods"));
        assert_eq!(
            parsed.action_input,
            Some(serde_json::json!({"namespace": "default"}))
        );
        assert!(!parsed.is_complete);
        assert!(parsed.final_answer.is_none());
    }

    #[test]
    fn parses_final_answer() {
        let text = "Thought: I have enough information.\nFinal Answer: The pod is healthy.";
        let parsed = parse_react_response(text);
        assert!(parsed.is_complete);
        assert_eq!(parsed.final_answer.as_deref(), Some("The pod is healthy."));
        assert!(parsed.action.is_none());
    }

    #[test]
    fn multiline_final_answer_is_preserved() {
        let text = "Final Answer: Summary:\n- pod p1 is Running\n- no restarts observed";
        let parsed = parse_react_response(text);
        assert_eq!(
            parsed.final_answer.as_deref(),
            Some("Summary:\n- pod p1 is Running\n- no restarts observed")
        );
    }

    #[test]
    fn non_json_action_input_stays_a_string() {
        let text = "Action: k8s.describe_pod\nAction Input: pod p1 in default";
        let parsed = parse_react_response(text);
        assert_eq!(
            parsed.action_input,
            Some(Value::String("pod p1 in default".into()))
        );
    }

    #[test]
    fn freeform_text_parses_to_nothing() {
        let parsed = parse_react_response("I am not sure what to do here.");
        assert_eq!(parsed, ReactResponse::default());
        assert!(!parsed.is_complete);
    }

    #[test]
    fn indented_markers_are_recognized() {
        let text = "  Thought: indented\n  Final Answer: done";
        let parsed = parse_react_response(text);
        assert_eq!(parsed.thought.as_deref(), Some("indented"));
        assert!(parsed.is_complete);
    }

    #[test]
    fn split_action_on_first_dot() {
        assert_eq!(
            split_action("kubernetes-server.list_pods"),
            Some(("kubernetes-server", "list_pods"))
        );
        assert_eq!(
            split_action("srv.tools.list"),
            Some(("srv", "tools.list"))
        );
        assert_eq!(split_action("no-dot"), None);
        assert_eq!(split_action(".tool"), None);
        assert_eq!(split_action("server."), None);
    }
}
