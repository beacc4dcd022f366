//! 消息工具函数

use graphfusion_core::Message;

/// 截断消息列表，使总词数不超过 max_tokens
///
/// 从最新消息向前累加，超出预算即停止；返回结果保持原有顺序。
pub fn trim_messages(messages: &[Message], max_tokens: usize) -> Vec<Message> {
    let mut count = 0;
    let mut kept = Vec::new();

    for message in messages.iter().rev() {
        count += message.word_count();
        if count > max_tokens {
            break;
        }
        kept.push(message.clone());
    }

    kept.reverse();
    kept
}

/// Anthropic 模型识别
pub fn is_anthropic_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    ["anthropic/", "claude-", "claude/"]
        .iter()
        .any(|prefix| lower.contains(prefix))
}
