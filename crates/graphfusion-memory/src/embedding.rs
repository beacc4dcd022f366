//! Embedding Provider Trait
//!
//! 定义独立的嵌入向量生成接口

use async_trait::async_trait;
use graphfusion_core::{GraphFusionError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

pub type Embedding = Vec<f32>;
pub type Embeddings = Vec<Embedding>;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Embedding>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

/// 余弦相似度，任一向量为零时返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = magnitude(a) * magnitude(b);
    if denom == 0.0 {
        return 0.0;
    }
    dot_product(a, b) / denom
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid token pattern"));

/// 特征哈希嵌入
///
/// 离线、确定性的默认嵌入模型：小写词元经 FNV-1a 哈希到固定维度并带符号累加，
/// 最后做 L2 归一化。相同文本总是得到相同向量。
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimensions: usize,
}

impl HashEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn encode(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimensions];
        let lower = text.to_lowercase();

        for token in TOKEN_RE.find_iter(&lower) {
            let hash = fnv1a(token.as_str().as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = magnitude(&vector);
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    fn name(&self) -> &str {
        "hash"
    }

    fn model(&self) -> &str {
        "fnv1a-feature-hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.encode(text))
    }
}

pub struct OpenAIEmbedding {
    model: String,
    dimensions: usize,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIEmbedding {
    pub fn new(api_key: String) -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self.dimensions = match model {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };
        self
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| GraphFusionError::AIProvider("Empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "input": texts,
                "model": self.model,
            }))
            .send()
            .await
            .map_err(|e| GraphFusionError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(GraphFusionError::AIProvider(error));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GraphFusionError::AIProvider(e.to_string()))?;

        let data = json["data"]
            .as_array()
            .ok_or_else(|| GraphFusionError::AIProvider("Invalid response format".to_string()))?;

        Ok(data
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .map(|values| values.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
                    .unwrap_or_default()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_hash_embedding_deterministic_and_normalised() {
        let model = HashEmbedding::new(64);
        let a = model.encode("Graph neural networks");
        let b = model.encode("graph NEURAL networks!");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!((magnitude(&a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedding_empty_text() {
        let model = HashEmbedding::new(8);
        assert!(model.encode("  ...  ").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_similar_texts_score_higher() {
        let model = HashEmbedding::new(256);
        let query = model.embed("rust memory safety").await.unwrap();
        let close = model.embed("memory safety in rust programs").await.unwrap();
        let far = model.embed("baking sourdough bread").await.unwrap();
        assert!(model.similarity(&query, &close) > model.similarity(&query, &far));
    }
}
