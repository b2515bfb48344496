//! Routing policy models.

use serde::{Deserialize, Serialize};

use super::model::{ModelCapability, ProviderKind};

/// Policy used by the router to pick a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    CostOptimized,
    PerformanceOptimized,
    QualityOptimized,
    #[default]
    Balanced,
    RoundRobin,
    Manual,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CostOptimized => "cost_optimized",
            Self::PerformanceOptimized => "performance_optimized",
            Self::QualityOptimized => "quality_optimized",
            Self::Balanced => "balanced",
            Self::RoundRobin => "round_robin",
            Self::Manual => "manual",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "cost_optimized" | "cost" => Some(Self::CostOptimized),
            "performance_optimized" | "performance" | "speed" => Some(Self::PerformanceOptimized),
            "quality_optimized" | "quality" => Some(Self::QualityOptimized),
            "balanced" => Some(Self::Balanced),
            "round_robin" => Some(Self::RoundRobin),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constraints and policy for one routing request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingContext {
    pub strategy: RoutingStrategy,
    pub required_capabilities: Vec<ModelCapability>,
    pub min_context_length: Option<u32>,
    /// Ceiling on the average of input and output price per 1k tokens
    pub max_cost_per_1k_tokens: Option<f64>,
    pub preferred_providers: Vec<ProviderKind>,
    pub excluded_providers: Vec<ProviderKind>,
    /// Model id used by the manual strategy
    pub manual_model: Option<String>,
}

impl RoutingContext {
    pub fn new(strategy: RoutingStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn manual(model_id: impl Into<String>) -> Self {
        Self {
            strategy: RoutingStrategy::Manual,
            manual_model: Some(model_id.into()),
            ..Default::default()
        }
    }

    pub fn requiring(mut self, capability: ModelCapability) -> Self {
        self.required_capabilities.push(capability);
        self
    }

    pub const fn with_min_context(mut self, tokens: u32) -> Self {
        self.min_context_length = Some(tokens);
        self
    }

    pub const fn with_max_cost(mut self, cost: f64) -> Self {
        self.max_cost_per_1k_tokens = Some(cost);
        self
    }

    pub fn prefer(mut self, provider: ProviderKind) -> Self {
        self.preferred_providers.push(provider);
        self
    }

    pub fn exclude(mut self, provider: ProviderKind) -> Self {
        self.excluded_providers.push(provider);
        self
    }
}

/// Ordered substring lookup used by the name-based ranking heuristics.
///
/// The first entry whose pattern occurs in the lowercased model name wins;
/// names matching nothing get `default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingTable<T> {
    pub entries: Vec<(String, T)>,
    pub default: T,
}

impl<T: Copy> RankingTable<T> {
    pub fn new(entries: &[(&str, T)], default: T) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(pattern, rank)| ((*pattern).to_string(), *rank))
                .collect(),
            default,
        }
    }

    pub fn rank(&self, model_name: &str) -> T {
        let name = model_name.to_lowercase();
        self.entries
            .iter()
            .find(|(pattern, _)| name.contains(pattern.as_str()))
            .map_or(self.default, |(_, rank)| *rank)
    }
}

impl RankingTable<u32> {
    /// Speed tier, lower is faster.
    pub fn speed_tiers() -> Self {
        Self::new(
            &[
                ("haiku", 0),
                ("small", 1),
                ("mini", 1),
                ("turbo", 2),
                ("medium", 3),
                ("large", 4),
                ("opus", 5),
                ("ultra", 6),
            ],
            3,
        )
    }

    /// Quality tier, lower is better.
    pub fn quality_tiers() -> Self {
        Self::new(
            &[
                ("opus", 0),
                ("ultra", 0),
                ("large", 1),
                ("turbo", 2),
                ("medium", 3),
                ("small", 4),
                ("mini", 5),
                ("haiku", 5),
            ],
            3,
        )
    }

    /// Rank of `model_name` scaled into `[0, 1]` by the largest rank in the
    /// table.
    pub fn normalized(&self, model_name: &str) -> f64 {
        let max = self
            .entries
            .iter()
            .map(|(_, rank)| *rank)
            .chain(std::iter::once(self.default))
            .max()
            .unwrap_or_default();
        if max == 0 {
            return 0.0;
        }
        f64::from(self.rank(model_name)) / f64::from(max)
    }
}
