//! 模型上下文窗口表

use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const DEFAULT_CONTEXT_WINDOW_SIZE: usize = 8192;
pub const CONTEXT_WINDOW_USAGE_RATIO: f64 = 0.75;

/// 已知模型的上下文窗口 (token)
pub static LLM_CONTEXT_WINDOW_SIZES: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    HashMap::from([
        // openai
        ("gpt-4", 8192),
        ("gpt-4o", 128000),
        ("gpt-4o-mini", 128000),
        ("gpt-4-turbo", 128000),
        ("o1-preview", 128000),
        ("o1-mini", 128000),
        // anthropic
        ("claude-3-5-sonnet", 200000),
        ("claude-3-5-haiku", 200000),
        ("claude-3-opus", 200000),
        ("claude-3-haiku", 200000),
        // gemini
        ("gemini-2.0-flash", 1048576),
        ("gemini-1.5-pro", 2097152),
        ("gemini-1.5-flash", 1048576),
        ("gemini-1.5-flash-8b", 1048576),
        // deepseek
        ("deepseek-chat", 128000),
        // groq
        ("gemma2-9b-it", 8192),
        ("gemma-7b-it", 8192),
        ("llama3-groq-70b-8192-tool-use-preview", 8192),
        ("llama3-groq-8b-8192-tool-use-preview", 8192),
        ("llama-3.1-70b-versatile", 131072),
        ("llama-3.1-8b-instant", 131072),
        ("llama-3.2-1b-preview", 8192),
        ("llama-3.2-3b-preview", 8192),
        ("llama-3.2-11b-text-preview", 8192),
        ("llama-3.2-90b-text-preview", 8192),
        ("llama3-70b-8192", 8192),
        ("llama3-8b-8192", 8192),
        ("mixtral-8x7b-32768", 32768),
        ("llama-3.3-70b-versatile", 128000),
        ("llama-3.3-70b-instruct", 128000),
        // sambanova
        ("Meta-Llama-3.3-70B-Instruct", 131072),
        ("QwQ-32B-Preview", 8192),
        ("Qwen2.5-72B-Instruct", 8192),
        ("Qwen2.5-Coder-32B-Instruct", 8192),
        ("Meta-Llama-3.1-405B-Instruct", 8192),
        ("Meta-Llama-3.1-70B-Instruct", 131072),
        ("Meta-Llama-3.1-8B-Instruct", 131072),
        ("Llama-3.2-90B-Vision-Instruct", 16384),
        ("Llama-3.2-11B-Vision-Instruct", 16384),
        ("Meta-Llama-3.2-3B-Instruct", 4096),
        ("Meta-Llama-3.2-1B-Instruct", 16384),
    ])
});

/// 查询模型上下文窗口
///
/// 先精确匹配 (忽略 `provider/` 前缀)，再取模型名以之开头的最长表项，均未命中返回默认值。
pub fn context_window_size(model: &str) -> usize {
    let bare = model.rsplit('/').next().unwrap_or(model);

    if let Some(size) = LLM_CONTEXT_WINDOW_SIZES.get(bare) {
        return *size;
    }

    LLM_CONTEXT_WINDOW_SIZES
        .iter()
        .filter(|(key, _)| bare.starts_with(*key))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, size)| *size)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW_SIZE)
}

/// 可用上下文窗口 (总窗口的 75%)
pub fn usable_context_window(model: &str) -> usize {
    (context_window_size(model) as f64 * CONTEXT_WINDOW_USAGE_RATIO) as usize
}

/// 按名称排序的模型列表
pub fn known_models() -> Vec<(&'static str, usize)> {
    let mut models: Vec<_> = LLM_CONTEXT_WINDOW_SIZES
        .iter()
        .map(|(k, v)| (*k, *v))
        .collect();
    models.sort_by(|a, b| a.0.cmp(b.0));
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_lookup() {
        assert_eq!(context_window_size("gpt-4"), 8192);
        assert_eq!(context_window_size("gpt-4o"), 128000);
        assert_eq!(context_window_size("gemini-1.5-pro"), 2097152);
    }

    #[test]
    fn test_prefix_lookup_prefers_longest_key() {
        // gpt-4o-mini-2024-07-18 matches gpt-4, gpt-4o and gpt-4o-mini
        assert_eq!(context_window_size("gpt-4o-mini-2024-07-18"), 128000);
        assert_eq!(context_window_size("gpt-4-0613"), 8192);
        assert_eq!(context_window_size("anthropic/claude-3-5-sonnet-20241022"), 200000);
    }

    #[test]
    fn test_unknown_model_uses_default() {
        assert_eq!(context_window_size("my-local-model"), DEFAULT_CONTEXT_WINDOW_SIZE);
        assert_eq!(usable_context_window("my-local-model"), 6144);
    }

    #[test]
    fn test_known_models_sorted() {
        let models = known_models();
        assert!(models.windows(2).all(|w| w[0].0 <= w[1].0));
    }
}
