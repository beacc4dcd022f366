//! 记忆访问分析

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

const RECENT_WINDOW: usize = 100;
const TREND_WINDOW: usize = 10;
const HISTOGRAM_BINS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    pub timestamp: DateTime<Utc>,
    pub memory_key: String,
    pub query_latency_ms: f64,
    pub cache_hit: bool,
    pub importance: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryMetrics {
    pub total_memories: usize,
    pub active_memories: usize,
    pub memory_usage_bytes: usize,
    pub avg_importance: f64,
    pub cache_hit_rate: f64,
    pub query_latency_ms: f64,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHealth {
    pub status: HealthStatus,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalPatterns {
    pub hourly_access: BTreeMap<u32, usize>,
    pub peak_hours: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_latency: f64,
    pub p95_latency: f64,
    pub latency_trend: Trend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    pub counts: Vec<usize>,
    pub bins: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportanceDistribution {
    pub histogram: Histogram,
    pub statistics: DistributionStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub current_metrics: MemoryMetrics,
    pub temporal_patterns: TemporalPatterns,
    pub performance_metrics: PerformanceMetrics,
    pub importance_distribution: ImportanceDistribution,
    pub memory_health: MemoryHealth,
}

/// 记忆访问分析器
#[derive(Debug, Clone)]
pub struct MemoryAnalytics {
    window_size: usize,
    history: VecDeque<AccessRecord>,
    last_access: HashMap<String, DateTime<Utc>>,
}

impl Default for MemoryAnalytics {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl MemoryAnalytics {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            history: VecDeque::new(),
            last_access: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn record_memory_access(
        &mut self,
        memory_key: &str,
        query_latency_ms: f64,
        cache_hit: bool,
        importance: f64,
    ) {
        self.record_memory_access_at(memory_key, query_latency_ms, cache_hit, importance, Utc::now());
    }

    pub fn record_memory_access_at(
        &mut self,
        memory_key: &str,
        query_latency_ms: f64,
        cache_hit: bool,
        importance: f64,
        timestamp: DateTime<Utc>,
    ) {
        self.history.push_back(AccessRecord {
            timestamp,
            memory_key: memory_key.to_string(),
            query_latency_ms,
            cache_hit,
            importance,
        });
        while self.history.len() > self.window_size {
            self.history.pop_front();
        }
        self.last_access.insert(memory_key.to_string(), timestamp);
    }

    fn recent(&self) -> impl Iterator<Item = &AccessRecord> {
        let skip = self.history.len().saturating_sub(RECENT_WINDOW);
        self.history.iter().skip(skip)
    }

    fn latencies(&self) -> Vec<f64> {
        self.history.iter().map(|r| r.query_latency_ms).collect()
    }

    fn importances(&self) -> Vec<f64> {
        self.history.iter().map(|r| r.importance).collect()
    }

    /// 基于最近 100 条记录的指标
    pub fn get_current_metrics(&self) -> MemoryMetrics {
        self.metrics_at(Utc::now())
    }

    fn metrics_at(&self, now: DateTime<Utc>) -> MemoryMetrics {
        if self.history.is_empty() {
            return MemoryMetrics::default();
        }

        let recent: Vec<&AccessRecord> = self.recent().collect();
        let active_cutoff = now - Duration::hours(24);

        MemoryMetrics {
            total_memories: self.last_access.len(),
            active_memories: self
                .last_access
                .values()
                .filter(|t| **t > active_cutoff)
                .count(),
            memory_usage_bytes: recent
                .iter()
                .map(|r| serde_json::to_string(r).map(|s| s.len()).unwrap_or(0))
                .sum(),
            avg_importance: mean(recent.iter().map(|r| r.importance)),
            cache_hit_rate: mean(recent.iter().map(|r| if r.cache_hit { 1.0 } else { 0.0 })),
            query_latency_ms: mean(recent.iter().map(|r| r.query_latency_ms)),
            compression_ratio: 0.0,
        }
    }

    pub fn generate_report(&self) -> AnalyticsReport {
        let metrics = self.get_current_metrics();
        let latencies = self.latencies();
        let importances = self.importances();

        let mut hourly_access: BTreeMap<u32, usize> = BTreeMap::new();
        for record in &self.history {
            *hourly_access.entry(record.timestamp.hour()).or_default() += 1;
        }
        let mut peaks: Vec<(u32, usize)> = hourly_access.iter().map(|(h, c)| (*h, *c)).collect();
        peaks.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        AnalyticsReport {
            temporal_patterns: TemporalPatterns {
                peak_hours: peaks.into_iter().take(3).map(|(h, _)| h).collect(),
                hourly_access,
            },
            performance_metrics: PerformanceMetrics {
                avg_latency: mean(latencies.iter().copied()),
                p95_latency: percentile(&latencies, 95.0),
                latency_trend: calculate_trend(&latencies, TREND_WINDOW),
            },
            importance_distribution: ImportanceDistribution {
                histogram: histogram(&importances),
                statistics: DistributionStats {
                    mean: mean(importances.iter().copied()),
                    median: percentile(&importances, 50.0),
                    std: std_dev(&importances),
                },
            },
            memory_health: assess_health(&metrics),
            current_metrics: metrics,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values.iter().copied());
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// 线性插值百分位
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// [0, 1] 区间等宽 10 桶直方图
fn histogram(values: &[f64]) -> Histogram {
    let mut counts = vec![0usize; HISTOGRAM_BINS];
    for value in values {
        let bin = ((value.clamp(0.0, 1.0) * HISTOGRAM_BINS as f64) as usize).min(HISTOGRAM_BINS - 1);
        counts[bin] += 1;
    }
    Histogram {
        counts,
        bins: (0..=HISTOGRAM_BINS).map(|i| i as f64 / HISTOGRAM_BINS as f64).collect(),
    }
}

/// 比较最近 window 个值与之前 window 个值的均值
pub fn calculate_trend(values: &[f64], window: usize) -> Trend {
    if window == 0 || values.len() < window * 2 {
        return Trend::InsufficientData;
    }
    let n = values.len();
    let recent = mean(values[n - window..].iter().copied());
    let previous = mean(values[n - 2 * window..n - window].iter().copied());

    if recent < previous * 0.95 {
        Trend::Improving
    } else if recent > previous * 1.05 {
        Trend::Degrading
    } else {
        Trend::Stable
    }
}

fn assess_health(metrics: &MemoryMetrics) -> MemoryHealth {
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    if metrics.cache_hit_rate < 0.8 {
        warnings.push("Low cache hit rate".to_string());
        recommendations.push("Consider increasing cache size or adjusting caching strategy".to_string());
    }
    if metrics.query_latency_ms > 100.0 {
        warnings.push("High query latency".to_string());
        recommendations.push("Consider optimizing index or reducing memory size".to_string());
    }
    if metrics.memory_usage_bytes as f64 > 1e9 {
        warnings.push("High memory usage".to_string());
        recommendations.push("Consider increasing compression ratio or pruning old memories".to_string());
    }

    let status = match warnings.len() {
        0 => HealthStatus::Healthy,
        1 | 2 => HealthStatus::Warning,
        _ => HealthStatus::Critical,
    };

    MemoryHealth {
        status,
        warnings,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_metrics() {
        let analytics = MemoryAnalytics::default();
        assert_eq!(analytics.get_current_metrics(), MemoryMetrics::default());
    }

    #[test]
    fn test_window_is_bounded() {
        let mut analytics = MemoryAnalytics::new(5);
        for i in 0..10 {
            analytics.record_memory_access(&format!("k{}", i % 3), 1.0, true, 0.5);
        }
        assert_eq!(analytics.len(), 5);
        assert_eq!(analytics.get_current_metrics().total_memories, 3);
    }

    #[test]
    fn test_metrics_and_health() {
        let mut analytics = MemoryAnalytics::default();
        analytics.record_memory_access("a", 200.0, false, 0.2);
        analytics.record_memory_access("b", 100.0, true, 0.4);

        let metrics = analytics.get_current_metrics();
        assert_eq!(metrics.total_memories, 2);
        assert_eq!(metrics.active_memories, 2);
        assert!((metrics.cache_hit_rate - 0.5).abs() < 1e-9);
        assert!((metrics.query_latency_ms - 150.0).abs() < 1e-9);
        assert!((metrics.avg_importance - 0.3).abs() < 1e-9);
        assert!(metrics.memory_usage_bytes > 0);

        let report = analytics.generate_report();
        assert_eq!(report.memory_health.status, HealthStatus::Warning);
        assert_eq!(report.memory_health.warnings.len(), 2);
        assert_eq!(report.memory_health.recommendations.len(), 2);
    }

    #[test]
    fn test_trend() {
        let flat = vec![10.0; 20];
        assert_eq!(calculate_trend(&flat, 10), Trend::Stable);
        assert_eq!(calculate_trend(&flat[..19], 10), Trend::InsufficientData);

        let mut faster = vec![10.0; 10];
        faster.extend(vec![5.0; 10]);
        assert_eq!(calculate_trend(&faster, 10), Trend::Improving);

        let mut slower = vec![5.0; 10];
        slower.extend(vec![10.0; 10]);
        assert_eq!(calculate_trend(&slower, 10), Trend::Degrading);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values: Vec<f64> = (1..=5).map(|v| v as f64).collect();
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert!((percentile(&values, 95.0) - 4.8).abs() < 1e-9);
    }

    #[test]
    fn test_report_hourly_and_histogram() {
        let mut analytics = MemoryAnalytics::default();
        let at = |h| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap();
        analytics.record_memory_access_at("a", 1.0, true, 0.05, at(9));
        analytics.record_memory_access_at("a", 1.0, true, 0.95, at(9));
        analytics.record_memory_access_at("b", 1.0, true, 1.0, at(14));

        let report = analytics.generate_report();
        assert_eq!(report.temporal_patterns.hourly_access.get(&9), Some(&2));
        assert_eq!(report.temporal_patterns.peak_hours, vec![9, 14]);
        assert_eq!(report.importance_distribution.histogram.counts[0], 1);
        assert_eq!(report.importance_distribution.histogram.counts[9], 2);
        assert_eq!(report.importance_distribution.histogram.bins.len(), 11);
        assert_eq!(report.current_metrics.active_memories, 0);
    }
}
