//! Model catalog with availability tracking.
//!
//! Holds [`ModelInfo`] entries keyed by `provider:model_name`, optional
//! provider clients bound per model for health probing, and the background
//! monitor that keeps availability current.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::domain::models::{
    HealthConfig, ModelCapabilities, ModelCapability, ModelInfo, ProviderKind, RankingTable,
};
use crate::domain::ports::ModelProvider;
use crate::services::health_monitor::HealthMonitor;

/// Filter for [`ModelRegistry::list_models`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFilter {
    pub provider: Option<ProviderKind>,
    /// Matches models carrying at least one of these tags
    pub tags: Vec<String>,
    pub available_only: bool,
}

impl Default for ModelFilter {
    fn default() -> Self {
        Self {
            provider: None,
            tags: Vec::new(),
            available_only: true,
        }
    }
}

impl ModelFilter {
    /// Every model, available or not.
    pub fn all() -> Self {
        Self {
            available_only: false,
            ..Self::default()
        }
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    fn matches(&self, info: &ModelInfo) -> bool {
        if self.available_only && !info.is_available {
            return false;
        }
        if self.provider.is_some_and(|p| p != info.provider) {
            return false;
        }
        self.tags.is_empty() || info.has_any_tag(&self.tags)
    }
}

/// Outcome of one health check cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub healthy: usize,
    pub total: usize,
    pub results: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStats {
    pub total: usize,
    pub available: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRegistryStats {
    pub total_models: usize,
    pub available_models: usize,
    pub unavailable_models: usize,
    pub providers: BTreeMap<String, ProviderStats>,
    pub health_check_interval_secs: u64,
    pub monitoring_active: bool,
}

/// Registry of known models.
pub struct ModelRegistry {
    models: RwLock<BTreeMap<String, ModelInfo>>,
    providers: RwLock<HashMap<String, Arc<dyn ModelProvider>>>,
    speed_tiers: RankingTable<u32>,
    interval: Duration,
    retry_interval: Duration,
    monitor: Mutex<Option<HealthMonitor>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// Empty registry with default speed tiers and health intervals.
    pub fn new() -> Self {
        let health = HealthConfig::default();
        Self {
            models: RwLock::new(BTreeMap::new()),
            providers: RwLock::new(HashMap::new()),
            speed_tiers: RankingTable::<u32>::speed_tiers(),
            interval: Duration::from_secs(health.interval_secs),
            retry_interval: Duration::from_secs(health.retry_secs),
            monitor: Mutex::new(None),
        }
    }

    /// Registry seeded with the built-in OpenAI and Anthropic catalog.
    pub fn with_default_catalog() -> Self {
        Self::new().with_models(default_catalog())
    }

    pub fn with_models(mut self, models: impl IntoIterator<Item = ModelInfo>) -> Self {
        let catalog = self.models.get_mut();
        for info in models {
            catalog.insert(info.id(), info);
        }
        self
    }

    pub fn with_speed_tiers(mut self, speed_tiers: RankingTable<u32>) -> Self {
        self.speed_tiers = speed_tiers;
        self
    }

    pub fn with_health_config(mut self, health: &HealthConfig) -> Self {
        self.interval = Duration::from_secs(health.interval_secs);
        self.retry_interval = Duration::from_secs(health.retry_secs);
        self
    }

    /// Add or replace a catalog entry. Returns its model id.
    pub async fn register_model(&self, info: ModelInfo) -> String {
        let id = info.id();
        let replaced = self.models.write().await.insert(id.clone(), info).is_some();
        tracing::info!(model_id = %id, replaced, "registered model");
        id
    }

    /// Register a model from its parts.
    pub async fn register(
        &self,
        provider: ProviderKind,
        model_name: &str,
        display_name: &str,
        capabilities: ModelCapabilities,
        tags: &[&str],
    ) -> String {
        let info = ModelInfo::new(provider, model_name, display_name, capabilities)
            .with_tags(tags.iter().copied());
        self.register_model(info).await
    }

    /// Remove a model and any provider bound to it.
    pub async fn unregister_model(&self, model_id: &str) -> bool {
        let removed = self.models.write().await.remove(model_id).is_some();
        if removed {
            self.providers.write().await.remove(model_id);
            tracing::info!(model_id = %model_id, "unregistered model");
        }
        removed
    }

    pub async fn get_model(&self, model_id: &str) -> Option<ModelInfo> {
        self.models.read().await.get(model_id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.models.read().await.len()
    }

    pub async fn list_models(&self, filter: &ModelFilter) -> Vec<ModelInfo> {
        self.models
            .read()
            .await
            .values()
            .filter(|info| filter.matches(info))
            .cloned()
            .collect()
    }

    /// Distinct providers with at least one registered model, sorted.
    pub async fn list_providers(&self) -> Vec<ProviderKind> {
        let mut providers: Vec<ProviderKind> =
            self.models.read().await.values().map(|m| m.provider).collect();
        providers.sort();
        providers.dedup();
        providers
    }

    /// Available models with `capability`, cheapest first.
    ///
    /// `max_cost` bounds the average of input and output price per 1k tokens.
    pub async fn find_models_by_capability(
        &self,
        capability: ModelCapability,
        min_context_length: Option<u32>,
        max_cost: Option<f64>,
    ) -> Vec<ModelInfo> {
        let mut found: Vec<ModelInfo> = self
            .models
            .read()
            .await
            .values()
            .filter(|m| m.is_available && m.capabilities.supports(capability))
            .filter(|m| min_context_length.is_none_or(|min| m.capabilities.max_context_length >= min))
            .filter(|m| max_cost.is_none_or(|max| m.capabilities.average_cost_per_1k() <= max))
            .cloned()
            .collect();
        sort_by_cost(&mut found);
        found
    }

    /// Cheapest available model meeting every constraint.
    pub async fn get_cheapest_model(
        &self,
        min_context_length: Option<u32>,
        required_capabilities: &[ModelCapability],
    ) -> Option<ModelInfo> {
        let mut candidates = self.available_with(required_capabilities).await;
        candidates.retain(|m| {
            min_context_length.is_none_or(|min| m.capabilities.max_context_length >= min)
        });
        sort_by_cost(&mut candidates);
        candidates.into_iter().next()
    }

    /// Fastest available model by the speed heuristic.
    pub async fn get_fastest_model(&self, required_capabilities: &[ModelCapability]) -> Option<ModelInfo> {
        let candidates = self.available_with(required_capabilities).await;
        self.rank_fastest(candidates).into_iter().next()
    }

    /// Order `candidates` fastest first. Equal tiers keep their input order.
    pub fn rank_fastest(&self, mut candidates: Vec<ModelInfo>) -> Vec<ModelInfo> {
        candidates.sort_by_key(|m| self.speed_tiers.rank(&m.model_name));
        candidates
    }

    async fn available_with(&self, required: &[ModelCapability]) -> Vec<ModelInfo> {
        self.models
            .read()
            .await
            .values()
            .filter(|m| m.is_available && m.capabilities.supports_all(required))
            .cloned()
            .collect()
    }

    /// Attach the client used to probe `model_id`.
    pub async fn bind_provider(&self, model_id: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        let model_id = model_id.into();
        tracing::debug!(model_id = %model_id, "bound health probe provider");
        self.providers.write().await.insert(model_id, provider);
    }

    pub async fn unbind_provider(&self, model_id: &str) -> bool {
        self.providers.write().await.remove(model_id).is_some()
    }

    /// Probe one model and update its availability.
    ///
    /// Unknown models report `false`. A model without a bound provider is
    /// reported healthy and its state is left alone.
    pub async fn health_check(&self, model_id: &str) -> bool {
        if !self.models.read().await.contains_key(model_id) {
            return false;
        }

        let provider = self.providers.read().await.get(model_id).cloned();
        let Some(provider) = provider else {
            tracing::warn!(model_id = %model_id, "no provider bound, skipping health probe");
            return true;
        };

        let healthy = AssertUnwindSafe(provider.validate_config())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!(model_id = %model_id, "health probe panicked");
                false
            });

        let mut models = self.models.write().await;
        if let Some(info) = models.get_mut(model_id) {
            let was_available = info.is_available;
            info.record_health_check(healthy);
            if was_available && !info.is_available {
                tracing::warn!(
                    model_id = %model_id,
                    failures = info.health_check_failures,
                    "model marked unavailable"
                );
            } else if !was_available && info.is_available {
                tracing::info!(model_id = %model_id, "model available again");
            }
        }
        healthy
    }

    /// Probe every registered model concurrently.
    pub async fn health_check_all(&self) -> HealthSummary {
        let ids: Vec<String> = self.models.read().await.keys().cloned().collect();
        let outcomes = join_all(ids.iter().map(|id| self.health_check(id))).await;

        let results: BTreeMap<String, bool> = ids.into_iter().zip(outcomes).collect();
        let healthy = results.values().filter(|ok| **ok).count();
        HealthSummary {
            healthy,
            total: results.len(),
            results,
        }
    }

    /// Start the background health monitor. Warns and does nothing when it
    /// is already running.
    pub async fn start_health_monitoring(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().await;
        if monitor.as_ref().is_some_and(|m| !m.is_finished()) {
            tracing::warn!("health monitoring already running");
            return;
        }
        *monitor = Some(HealthMonitor::spawn(
            Arc::downgrade(self),
            self.interval,
            self.retry_interval,
        ));
    }

    /// Stop the background monitor and wait for it to exit.
    pub async fn stop_health_monitoring(&self) {
        let monitor = self.monitor.lock().await.take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|m| !m.is_finished())
    }

    pub async fn stats(&self) -> ModelRegistryStats {
        let monitoring_active = self.is_monitoring().await;
        let models = self.models.read().await;

        let mut providers: BTreeMap<String, ProviderStats> = BTreeMap::new();
        for info in models.values() {
            let entry = providers.entry(info.provider.as_str().to_string()).or_default();
            entry.total += 1;
            if info.is_available {
                entry.available += 1;
            }
        }
        let available_models = models.values().filter(|m| m.is_available).count();

        ModelRegistryStats {
            total_models: models.len(),
            available_models,
            unavailable_models: models.len() - available_models,
            providers,
            health_check_interval_secs: self.interval.as_secs(),
            monitoring_active,
        }
    }
}

fn sort_by_cost(models: &mut [ModelInfo]) {
    models.sort_by(|a, b| {
        a.capabilities
            .total_cost_per_1k()
            .total_cmp(&b.capabilities.total_cost_per_1k())
    });
}

/// The built-in OpenAI and Anthropic models.
pub fn default_catalog() -> Vec<ModelInfo> {
    let caps = |fc: bool, vision: bool, json: bool, ctx: u32, input: f64, output: f64| ModelCapabilities {
        supports_streaming: true,
        supports_function_calling: fc,
        supports_vision: vision,
        supports_json_mode: json,
        max_context_length: ctx,
        max_output_tokens: 4096,
        cost_per_1k_input_tokens: input,
        cost_per_1k_output_tokens: output,
        ..ModelCapabilities::default()
    };

    vec![
        ModelInfo::new(
            ProviderKind::OpenAi,
            "gpt-4-turbo-preview",
            "GPT-4 Turbo",
            caps(true, false, true, 128_000, 0.01, 0.03),
        )
        .with_tags(["openai", "gpt4", "large", "premium"]),
        ModelInfo::new(
            ProviderKind::OpenAi,
            "gpt-4",
            "GPT-4",
            caps(true, false, false, 8192, 0.03, 0.06),
        )
        .with_tags(["openai", "gpt4", "large", "premium"]),
        ModelInfo::new(
            ProviderKind::OpenAi,
            "gpt-3.5-turbo",
            "GPT-3.5 Turbo",
            caps(true, false, true, 16_385, 0.0005, 0.0015),
        )
        .with_tags(["openai", "gpt35", "fast", "affordable"]),
        ModelInfo::new(
            ProviderKind::Anthropic,
            "claude-3-opus-20240229",
            "Claude 3 Opus",
            caps(true, true, false, 200_000, 0.015, 0.075),
        )
        .with_tags(["anthropic", "claude3", "large", "premium", "vision"]),
        ModelInfo::new(
            ProviderKind::Anthropic,
            "claude-3-sonnet-20240229",
            "Claude 3 Sonnet",
            caps(true, true, false, 200_000, 0.003, 0.015),
        )
        .with_tags(["anthropic", "claude3", "medium", "balanced", "vision"]),
        ModelInfo::new(
            ProviderKind::Anthropic,
            "claude-3-haiku-20240307",
            "Claude 3 Haiku",
            caps(true, true, false, 200_000, 0.00025, 0.00125),
        )
        .with_tags(["anthropic", "claude3", "small", "fast", "affordable", "vision"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::MockProvider;
    use crate::domain::models::ModelConfig;

    fn reporting(healthy: bool) -> Arc<dyn ModelProvider> {
        let config = ModelConfig::new(ProviderKind::Ollama, "llama3");
        if healthy {
            Arc::new(MockProvider::new(config, ModelCapabilities::default()))
        } else {
            Arc::new(MockProvider::failing(config, ModelCapabilities::default(), "down"))
        }
    }

    #[tokio::test]
    async fn test_default_catalog_contents() {
        let registry = ModelRegistry::with_default_catalog();
        assert_eq!(registry.count().await, 6);

        let opus = registry.get_model("anthropic:claude-3-opus-20240229").await.unwrap();
        assert_eq!(opus.display_name, "Claude 3 Opus");
        assert!(opus.capabilities.supports_vision);
        assert_eq!(
            registry.list_providers().await,
            vec![ProviderKind::OpenAi, ProviderKind::Anthropic]
        );
    }

    #[tokio::test]
    async fn test_list_models_filters() {
        let registry = ModelRegistry::with_default_catalog();
        let anthropic = registry
            .list_models(&ModelFilter::default().with_provider(ProviderKind::Anthropic))
            .await;
        assert_eq!(anthropic.len(), 3);

        let affordable = registry
            .list_models(&ModelFilter::default().with_tag("affordable").with_tag("nope"))
            .await;
        let ids: Vec<String> = affordable.iter().map(ModelInfo::id).collect();
        assert_eq!(ids, vec!["anthropic:claude-3-haiku-20240307", "openai:gpt-3.5-turbo"]);
    }

    #[tokio::test]
    async fn test_find_by_capability_is_sorted_by_cost() {
        let registry = ModelRegistry::with_default_catalog();
        let json = registry
            .find_models_by_capability(ModelCapability::JsonMode, None, None)
            .await;
        let names: Vec<&str> = json.iter().map(|m| m.model_name.as_str()).collect();
        assert_eq!(names, vec!["gpt-3.5-turbo", "gpt-4-turbo-preview"]);

        let cheap_vision = registry
            .find_models_by_capability(ModelCapability::Vision, Some(100_000), Some(0.01))
            .await;
        let names: Vec<&str> = cheap_vision.iter().map(|m| m.model_name.as_str()).collect();
        assert_eq!(names, vec!["claude-3-haiku-20240307", "claude-3-sonnet-20240229"]);
    }

    #[tokio::test]
    async fn test_find_function_calling_excludes_models_without_it() {
        let registry = ModelRegistry::with_default_catalog();
        let plain = ModelInfo::new(
            ProviderKind::Ollama,
            "llama2",
            "Llama 2",
            ModelCapabilities {
                supports_function_calling: false,
                ..ModelCapabilities::default()
            },
        );
        let plain_id = registry.register_model(plain).await;

        let found = registry
            .find_models_by_capability(ModelCapability::FunctionCalling, None, None)
            .await;
        assert!(found.iter().all(|m| m.id() != plain_id));
        assert_eq!(found.len(), 6);
        assert!(found
            .windows(2)
            .all(|pair| pair[0].capabilities.total_cost_per_1k() <= pair[1].capabilities.total_cost_per_1k()));
        assert_eq!(found[0].model_name, "claude-3-haiku-20240307");
    }

    #[tokio::test]
    async fn test_cheapest_and_fastest() {
        let registry = ModelRegistry::with_default_catalog();
        let cheapest = registry.get_cheapest_model(None, &[]).await.unwrap();
        assert_eq!(cheapest.model_name, "claude-3-haiku-20240307");

        let cheapest_large = registry.get_cheapest_model(Some(100_000), &[ModelCapability::JsonMode]).await.unwrap();
        assert_eq!(cheapest_large.model_name, "gpt-4-turbo-preview");

        let fastest = registry.get_fastest_model(&[]).await.unwrap();
        assert_eq!(fastest.model_name, "claude-3-haiku-20240307");

        // both "turbo" tier; ties keep catalog order
        let fastest_json = registry.get_fastest_model(&[ModelCapability::JsonMode]).await.unwrap();
        assert_eq!(fastest_json.model_name, "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn test_health_check_unknown_and_unbound() {
        let registry = ModelRegistry::with_default_catalog();
        assert!(!registry.health_check("openai:nope").await);

        assert!(registry.health_check("openai:gpt-4").await);
        let info = registry.get_model("openai:gpt-4").await.unwrap();
        assert!(info.last_health_check.is_none());
    }

    #[tokio::test]
    async fn test_failures_mark_model_unavailable() {
        let registry = ModelRegistry::with_default_catalog();
        registry.bind_provider("openai:gpt-4", reporting(false)).await;

        for _ in 0..2 {
            assert!(!registry.health_check("openai:gpt-4").await);
        }
        assert!(registry.get_model("openai:gpt-4").await.unwrap().is_available);

        registry.health_check("openai:gpt-4").await;
        assert!(!registry.get_model("openai:gpt-4").await.unwrap().is_available);
        assert_eq!(registry.stats().await.unavailable_models, 1);

        registry.bind_provider("openai:gpt-4", reporting(true)).await;
        assert!(registry.health_check("openai:gpt-4").await);
        let info = registry.get_model("openai:gpt-4").await.unwrap();
        assert!(info.is_available);
        assert_eq!(info.health_check_failures, 0);
    }

    #[tokio::test]
    async fn test_health_check_all_summary() {
        let registry = ModelRegistry::with_default_catalog();
        registry.bind_provider("openai:gpt-4", reporting(false)).await;

        let summary = registry.health_check_all().await;
        assert_eq!(summary.total, 6);
        assert_eq!(summary.healthy, 5);
        assert_eq!(summary.results.get("openai:gpt-4"), Some(&false));
    }

    #[tokio::test]
    async fn test_unregister_drops_binding() {
        let registry = ModelRegistry::with_default_catalog();
        registry.bind_provider("openai:gpt-4", reporting(true)).await;

        assert!(registry.unregister_model("openai:gpt-4").await);
        assert!(!registry.unbind_provider("openai:gpt-4").await);
        assert!(!registry.unregister_model("openai:gpt-4").await);
        assert_eq!(registry.count().await, 5);
    }

    #[tokio::test]
    async fn test_monitoring_lifecycle() {
        let registry = Arc::new(ModelRegistry::with_default_catalog().with_health_config(&HealthConfig {
            enabled: true,
            interval_secs: 3600,
            retry_secs: 60,
        }));
        registry.bind_provider("openai:gpt-4", reporting(false)).await;

        registry.start_health_monitoring().await;
        registry.start_health_monitoring().await;
        assert!(registry.stats().await.monitoring_active);

        // first cycle runs immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        let info = registry.get_model("openai:gpt-4").await.unwrap();
        assert_eq!(info.health_check_failures, 1);

        registry.stop_health_monitoring().await;
        assert!(!registry.is_monitoring().await);
        assert_eq!(registry.stats().await.health_check_interval_secs, 3600);
    }

    #[tokio::test]
    async fn test_register_from_parts() {
        let registry = ModelRegistry::new();
        let id = registry
            .register(
                ProviderKind::Ollama,
                "llama3",
                "Llama 3",
                ModelCapabilities::default(),
                &["local"],
            )
            .await;
        assert_eq!(id, "ollama:llama3");
        let local = registry.list_models(&ModelFilter::all().with_tag("local")).await;
        assert_eq!(local.len(), 1);
    }
}
