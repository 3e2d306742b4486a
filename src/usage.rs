// Token accounting for aggregated (non-streaming) completions
// Author: kelexine (https://github.com/kelexine)

use crate::models::openai::{ChatMessage, Usage};
use std::sync::OnceLock;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

/// Tokens added per message for the chat markup around role and content.
const TOKENS_PER_MESSAGE: usize = 4;
/// Tokens priming the assistant reply.
const REPLY_PRIMING_TOKENS: usize = 3;

fn encoder() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| match cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            warn!("Failed to load cl100k_base, falling back to estimates: {}", e);
            None
        }
    })
    .as_ref()
}

/// Count the tokens of `text` with cl100k, or estimate at four bytes a token.
pub fn count_tokens(text: &str) -> usize {
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len().div_ceil(4),
    }
}

/// Tokens of a chat prompt, including per-message overhead.
pub fn prompt_tokens(messages: &[ChatMessage]) -> usize {
    let body: usize = messages
        .iter()
        .map(|m| TOKENS_PER_MESSAGE + count_tokens(&m.role) + count_tokens(&m.content.to_text()))
        .sum();
    body + REPLY_PRIMING_TOKENS
}

/// Usage block of a completed turn.
pub fn usage_for(messages: &[ChatMessage], completion: &str) -> Usage {
    let prompt = prompt_tokens(messages) as u32;
    let completion = count_tokens(completion) as u32;
    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::openai::MessageContent;

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens(""), 0);
        assert!(count_tokens("Hello world") >= 2);
    }

    #[test]
    fn test_usage_totals() {
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Text("Hi there".to_string()),
        }];
        let usage = usage_for(&messages, "Hello!");
        assert!(usage.prompt_tokens > REPLY_PRIMING_TOKENS as u32);
        assert!(usage.completion_tokens >= 1);
        assert_eq!(usage.total_tokens, usage.prompt_tokens + usage.completion_tokens);
    }
}
