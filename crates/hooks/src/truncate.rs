//! Per-message truncation applied by the capture layer before persistence.

use tarsy_domain::interaction::{LLMInteraction, MessageRole};

/// Clone an interaction with oversized user messages cut down for capture.
///
/// Only user-role content is truncated: the leading `max_size` characters
/// are kept and a marker recording both sizes is appended. System and
/// assistant messages pass through verbatim: assistant messages may be
/// summaries of large tool outputs that downstream consumers need intact.
/// The original interaction is never mutated.
pub fn truncate_conversation_for_capture(
    interaction: &LLMInteraction,
    max_size: usize,
) -> LLMInteraction {
    let mut copy = interaction.clone();
    for message in &mut copy.conversation {
        if message.role != MessageRole::User {
            continue;
        }
        let original_size = message.content.chars().count();
        if original_size <= max_size {
            continue;
        }
        let mut truncated: String = message.content.chars().take(max_size).collect();
        truncated.push_str(&format!(
            "[HOOK TRUNCATED - Original size: {original_size} chars, Hook size: {max_size} chars]"
        ));
        message.content = truncated;
    }
    copy
}
