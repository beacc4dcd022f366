//! Token 计数器

use graphfusion_core::{GraphFusionError, Message, Result};
use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base};

/// Token 计数器 Trait
pub trait TokenCounter: Send + Sync {
    /// 计算文本的 token 数量
    fn count(&self, text: &str) -> usize;

    /// 计算消息的 token 数量 (含 4 token 格式开销)
    fn count_message(&self, message: &Message) -> usize {
        4 + self.count(&message.content)
    }

    fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum::<usize>() + 3
    }
}

/// 简单 Token 计数器 (基于字符估算)
pub struct SimpleTokenCounter;

impl SimpleTokenCounter {
    fn is_cjk(c: char) -> bool {
        matches!(c, '\u{4E00}'..='\u{9FFF}')
    }
}

impl TokenCounter for SimpleTokenCounter {
    fn count(&self, text: &str) -> usize {
        let cjk = text.chars().filter(|c| Self::is_cjk(*c)).count();
        let other = text.chars().count() - cjk;

        // 中文约 1.5 字符 = 1 token，其他约 4 字符 = 1 token
        (cjk as f32 / 1.5).ceil() as usize + (other as f32 / 4.0).ceil() as usize
    }
}

/// tiktoken 计数器
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = if model.starts_with("gpt-4o") || model.starts_with("o1") {
            o200k_base()
        } else {
            cl100k_base()
        }
        .map_err(|e| GraphFusionError::AIProvider(format!("加载分词器失败: {}", e)))?;

        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// 创建 Token 计数器，tiktoken 加载失败时回退到估算
pub fn create_token_counter(model: &str) -> Box<dyn TokenCounter> {
    match TiktokenCounter::for_model(model) {
        Ok(counter) => Box::new(counter),
        Err(e) => {
            tracing::debug!("Falling back to simple token counter: {}", e);
            Box::new(SimpleTokenCounter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_counter() {
        let counter = SimpleTokenCounter;
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
        assert_eq!(counter.count("你好世"), 2);
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn test_message_overhead() {
        let counter = SimpleTokenCounter;
        let messages = vec![Message::user("abcd"), Message::assistant("abcd")];
        assert_eq!(counter.count_messages(&messages), 5 + 5 + 3);
    }

    #[test]
    fn test_tiktoken_counter() {
        let counter = create_token_counter("gpt-4");
        assert!(counter.count("Hello, world!") > 0);
    }
}
