//! Strategy-driven model routing.
//!
//! Picks a model from the [`ModelRegistry`] for each request, builds and
//! caches its provider client, and walks the configured fallback chain when
//! the primary call fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    apply_credentials, ChatMessage, GenerationParams, ModelConfig, ModelInfo, ModelResponse,
    RouterSettings, RoutingContext, RoutingStrategy,
};
use crate::domain::ports::{ModelProvider, ModelStream, ProviderFactory};
use crate::services::model_registry::{ModelFilter, ModelRegistry, ModelRegistryStats};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingStats {
    pub default_strategy: RoutingStrategy,
    pub cached_providers: usize,
    pub round_robin_index: usize,
    pub registry: ModelRegistryStats,
}

/// Routes requests to models by strategy.
pub struct ModelRouter {
    registry: Arc<ModelRegistry>,
    factory: Arc<dyn ProviderFactory>,
    settings: RouterSettings,
    providers: RwLock<HashMap<String, Arc<dyn ModelProvider>>>,
    round_robin: AtomicUsize,
}

impl ModelRouter {
    pub fn new(
        registry: Arc<ModelRegistry>,
        factory: Arc<dyn ProviderFactory>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            registry,
            factory,
            settings,
            providers: RwLock::new(HashMap::new()),
            round_robin: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Routing context using the configured default strategy.
    pub fn default_context(&self) -> RoutingContext {
        RoutingContext::new(self.settings.default_strategy)
    }

    /// Choose a model for `context`.
    pub async fn select_model(&self, context: &RoutingContext) -> DomainResult<ModelInfo> {
        let selected = match context.strategy {
            RoutingStrategy::Manual => {
                let model_id = context
                    .manual_model
                    .as_deref()
                    .ok_or_else(|| DomainError::config("manual routing requires a model id"))?;
                return self
                    .registry
                    .get_model(model_id)
                    .await
                    .ok_or_else(|| DomainError::model_not_found(model_id));
            }
            RoutingStrategy::CostOptimized => {
                let mut candidates = self.candidates(context).await?;
                candidates.sort_by(|a, b| {
                    a.capabilities
                        .total_cost_per_1k()
                        .total_cmp(&b.capabilities.total_cost_per_1k())
                });
                candidates.swap_remove(0)
            }
            RoutingStrategy::PerformanceOptimized => {
                let candidates = self.candidates(context).await?;
                self.registry.rank_fastest(candidates).swap_remove(0)
            }
            RoutingStrategy::QualityOptimized => {
                let mut candidates = self.candidates(context).await?;
                candidates.sort_by_key(|m| self.settings.quality_tiers.rank(&m.model_name));
                candidates.swap_remove(0)
            }
            RoutingStrategy::Balanced => {
                let mut candidates = self.candidates(context).await?;
                candidates.sort_by(|a, b| self.balance_score(a).total_cmp(&self.balance_score(b)));
                candidates.swap_remove(0)
            }
            RoutingStrategy::RoundRobin => {
                let mut candidates = self.candidates(context).await?;
                let cursor = self.round_robin.fetch_add(1, Ordering::SeqCst);
                let index = cursor % candidates.len();
                candidates.swap_remove(index)
            }
        };

        tracing::debug!(
            strategy = %context.strategy,
            model_id = %selected.id(),
            "selected model"
        );
        Ok(selected)
    }

    /// Available models satisfying every constraint of `context`; never
    /// empty.
    async fn candidates(&self, context: &RoutingContext) -> DomainResult<Vec<ModelInfo>> {
        let candidates: Vec<ModelInfo> = self
            .registry
            .list_models(&ModelFilter::default())
            .await
            .into_iter()
            .filter(|m| {
                context.preferred_providers.is_empty()
                    || context.preferred_providers.contains(&m.provider)
            })
            .filter(|m| !context.excluded_providers.contains(&m.provider))
            .filter(|m| {
                context
                    .min_context_length
                    .is_none_or(|min| m.capabilities.max_context_length >= min)
            })
            .filter(|m| {
                context
                    .max_cost_per_1k_tokens
                    .is_none_or(|max| m.capabilities.average_cost_per_1k() <= max)
            })
            .filter(|m| m.capabilities.supports_all(&context.required_capabilities))
            .collect();

        if candidates.is_empty() {
            return Err(DomainError::NoSuitableModel(describe(context)));
        }
        Ok(candidates)
    }

    /// Lower is better.
    fn balance_score(&self, model: &ModelInfo) -> f64 {
        let ceiling = self.settings.cost_ceiling_per_1k;
        let cost = if ceiling > 0.0 {
            (model.capabilities.average_cost_per_1k() / ceiling).min(1.0)
        } else {
            1.0
        };
        let tier = self.settings.quality_tiers.normalized(&model.model_name);
        let weight = self.settings.cost_weight;
        weight * cost + (1.0 - weight) * (1.0 - tier)
    }

    /// Select a model and generate a response, falling back along the
    /// model's configured chain on failure.
    pub async fn route(
        &self,
        messages: &[ChatMessage],
        context: &RoutingContext,
        params: &GenerationParams,
    ) -> DomainResult<ModelResponse> {
        let started = Instant::now();
        let model = self.select_model(context).await?;
        let selection_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        let model_id = model.id();
        let provider = self.provider_for(&model).await?;

        match provider.generate(messages, params).await {
            Ok(mut response) => {
                annotate(&mut response, context.strategy, selection_time_ms, &model_id);
                Ok(response)
            }
            Err(primary) => {
                tracing::warn!(model_id = %model_id, error = %primary, "primary model failed");
                let fallbacks = self
                    .settings
                    .fallbacks
                    .get(&model_id)
                    .cloned()
                    .unwrap_or_else(|| provider.config().fallback_models.clone());
                let (mut response, fallback_id) = self
                    .generate_with_fallbacks(&fallbacks, messages, params, primary)
                    .await?;
                annotate(&mut response, context.strategy, selection_time_ms, &fallback_id);
                response.annotate("is_fallback", Value::Bool(true));
                response.annotate("fallback_model", json!(fallback_id));
                Ok(response)
            }
        }
    }

    /// Try `fallbacks` in order, skipping unknown and unavailable models.
    /// Returns the first success with the id of the model that produced it.
    async fn generate_with_fallbacks(
        &self,
        fallbacks: &[String],
        messages: &[ChatMessage],
        params: &GenerationParams,
        primary: DomainError,
    ) -> DomainResult<(ModelResponse, String)> {
        if fallbacks.is_empty() {
            return Err(primary);
        }

        let mut last_error = primary.to_string();
        for fallback_id in fallbacks {
            let Some(model) = self.registry.get_model(fallback_id).await else {
                tracing::warn!(fallback_model = %fallback_id, "fallback model not registered, skipping");
                continue;
            };
            if !model.is_available {
                tracing::warn!(fallback_model = %fallback_id, "fallback model unavailable, skipping");
                continue;
            }

            let attempt = match self.provider_for(&model).await {
                Ok(provider) => provider.generate(messages, params).await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(response) => {
                    tracing::info!(fallback_model = %fallback_id, "fallback model succeeded");
                    return Ok((response, fallback_id.clone()));
                }
                Err(e) => {
                    tracing::warn!(fallback_model = %fallback_id, error = %e, "fallback model failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(DomainError::AllFallbacksExhausted { last_error })
    }

    /// Select a model and stream its response.
    ///
    /// Fails with [`DomainError::StreamingUnsupported`] before any provider
    /// call when the selected model cannot stream.
    pub async fn route_stream(
        &self,
        messages: &[ChatMessage],
        context: &RoutingContext,
        params: &GenerationParams,
    ) -> DomainResult<ModelStream> {
        let model = self.select_model(context).await?;
        if !model.capabilities.supports_streaming {
            return Err(DomainError::StreamingUnsupported(model.id()));
        }
        let provider = self.provider_for(&model).await?;
        provider.generate_stream(messages, params).await
    }

    /// Cached client for `model`, built on first use.
    ///
    /// Concurrent first uses may each build a client; the first one stored
    /// is kept and the others are dropped. A newly stored client is also
    /// bound to the registry so health monitoring checks it.
    pub async fn provider_for(&self, model: &ModelInfo) -> DomainResult<Arc<dyn ModelProvider>> {
        let model_id = model.id();
        if let Some(provider) = self.providers.read().await.get(&model_id) {
            return Ok(Arc::clone(provider));
        }

        let config = self.model_config(model);
        let created = self.factory.create(config, model.capabilities.clone())?;
        tracing::debug!(model_id = %model_id, "created provider client");

        let provider = {
            let mut providers = self.providers.write().await;
            Arc::clone(providers.entry(model_id.clone()).or_insert(created))
        };
        self.registry.bind_provider(model_id, Arc::clone(&provider)).await;
        Ok(provider)
    }

    fn model_config(&self, model: &ModelInfo) -> ModelConfig {
        let mut config = ModelConfig::new(model.provider, model.model_name.clone());
        apply_credentials(&self.settings.credentials, &mut config);
        if let Some(fallbacks) = self.settings.fallbacks.get(&model.id()) {
            config.fallback_models.clone_from(fallbacks);
        }
        config
    }

    /// Drop every cached provider client and its health binding.
    /// Returns how many were cached.
    pub async fn clear_cache(&self) -> usize {
        let cleared: Vec<String> = self.providers.write().await.drain().map(|(id, _)| id).collect();
        for model_id in &cleared {
            self.registry.unbind_provider(model_id).await;
        }
        tracing::info!(cleared = cleared.len(), "provider cache cleared");
        cleared.len()
    }

    pub async fn routing_stats(&self) -> RoutingStats {
        RoutingStats {
            default_strategy: self.settings.default_strategy,
            cached_providers: self.providers.read().await.len(),
            round_robin_index: self.round_robin.load(Ordering::SeqCst),
            registry: self.registry.stats().await,
        }
    }
}

fn annotate(response: &mut ModelResponse, strategy: RoutingStrategy, selection_time_ms: f64, model_id: &str) {
    response.annotate("routing_strategy", json!(strategy.as_str()));
    response.annotate("selection_time_ms", json!(selection_time_ms));
    response.annotate("model_id", json!(model_id));
}

fn describe(context: &RoutingContext) -> String {
    let capabilities: Vec<&str> = context
        .required_capabilities
        .iter()
        .map(|c| c.as_str())
        .collect();
    format!(
        "strategy={}, capabilities=[{}], min_context={:?}, max_cost={:?}",
        context.strategy,
        capabilities.join(", "),
        context.min_context_length,
        context.max_cost_per_1k_tokens
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::{MockProvider, MockProviderFactory};
    use crate::domain::models::{ModelCapabilities, ModelCapability, ProviderKind};

    fn info(name: &str, avg_cost: f64) -> ModelInfo {
        ModelInfo::new(
            ProviderKind::Ollama,
            name,
            name,
            ModelCapabilities {
                cost_per_1k_input_tokens: avg_cost,
                cost_per_1k_output_tokens: avg_cost,
                ..ModelCapabilities::default()
            },
        )
    }

    fn router_with(models: Vec<ModelInfo>, factory: Arc<MockProviderFactory>, settings: RouterSettings) -> ModelRouter {
        let registry = Arc::new(ModelRegistry::new().with_models(models));
        ModelRouter::new(registry, factory, settings)
    }

    fn failing(name: &str) -> Arc<MockProvider> {
        Arc::new(MockProvider::failing(
            ModelConfig::new(ProviderKind::Ollama, name),
            ModelCapabilities::default(),
            "upstream 503",
        ))
    }

    #[tokio::test]
    async fn test_balanced_prefers_cheap_small_model() {
        let router = router_with(
            vec![info("claude-3-opus", 0.09), info("claude-3-haiku", 0.001)],
            Arc::new(MockProviderFactory::new()),
            RouterSettings::default(),
        );
        let selected = router
            .select_model(&RoutingContext::new(RoutingStrategy::Balanced))
            .await
            .unwrap();
        assert_eq!(selected.model_name, "claude-3-haiku");
    }

    #[tokio::test]
    async fn test_cost_quality_and_performance() {
        let router = router_with(
            vec![info("model-large", 0.02), info("model-mini", 0.001), info("model-opus", 0.05)],
            Arc::new(MockProviderFactory::new()),
            RouterSettings::default(),
        );

        let cheapest = router.select_model(&RoutingContext::new(RoutingStrategy::CostOptimized)).await.unwrap();
        assert_eq!(cheapest.model_name, "model-mini");

        let best = router.select_model(&RoutingContext::new(RoutingStrategy::QualityOptimized)).await.unwrap();
        assert_eq!(best.model_name, "model-opus");

        let fastest = router
            .select_model(&RoutingContext::new(RoutingStrategy::PerformanceOptimized))
            .await
            .unwrap();
        assert_eq!(fastest.model_name, "model-mini");
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let router = router_with(
            vec![info("a", 0.01), info("b", 0.01), info("c", 0.01)],
            Arc::new(MockProviderFactory::new()),
            RouterSettings::default(),
        );
        let context = RoutingContext::new(RoutingStrategy::RoundRobin);
        let mut picked = Vec::new();
        for _ in 0..4 {
            picked.push(router.select_model(&context).await.unwrap().model_name);
        }
        assert_eq!(picked, vec!["a", "b", "c", "a"]);
        assert_eq!(router.routing_stats().await.round_robin_index, 4);
    }

    #[tokio::test]
    async fn test_constraints_and_manual() {
        let router = router_with(
            vec![info("a", 0.01)],
            Arc::new(MockProviderFactory::new()),
            RouterSettings::default(),
        );

        let vision = RoutingContext::default().requiring(ModelCapability::Vision);
        assert!(matches!(router.select_model(&vision).await, Err(DomainError::NoSuitableModel(_))));

        let excluded = RoutingContext::default().exclude(ProviderKind::Ollama);
        assert!(router.select_model(&excluded).await.is_err());

        let manual_missing = RoutingContext::new(RoutingStrategy::Manual);
        assert!(matches!(
            router.select_model(&manual_missing).await,
            Err(DomainError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            router.select_model(&RoutingContext::manual("ollama:zzz")).await,
            Err(DomainError::NotFound { .. })
        ));
        let manual = router.select_model(&RoutingContext::manual("ollama:a")).await.unwrap();
        assert_eq!(manual.model_name, "a");
    }

    #[tokio::test]
    async fn test_route_annotates_and_caches_provider() {
        let factory = Arc::new(MockProviderFactory::new());
        let router = router_with(vec![info("a", 0.01)], factory.clone(), RouterSettings::default());

        let context = RoutingContext::new(RoutingStrategy::CostOptimized);
        let params = GenerationParams::default();
        let response = router.route(&[ChatMessage::user("hi")], &context, &params).await.unwrap();
        assert_eq!(response.content, "[a] hi");
        assert_eq!(response.metadata["routing_strategy"], "cost_optimized");
        assert_eq!(response.metadata["model_id"], "ollama:a");
        assert!(response.metadata["selection_time_ms"].is_number());

        router.route(&[ChatMessage::user("again")], &context, &params).await.unwrap();
        assert_eq!(factory.created(), 1);
        assert_eq!(router.clear_cache().await, 1);
        assert_eq!(router.routing_stats().await.cached_providers, 0);
    }

    #[tokio::test]
    async fn test_fallback_skips_unknown_and_uses_next() {
        let factory = Arc::new(MockProviderFactory::new());
        factory.insert("ollama:primary", failing("primary"));

        let mut settings = RouterSettings::default();
        settings.fallbacks.insert(
            "ollama:primary".to_string(),
            vec!["ollama:ghost".to_string(), "ollama:backup".to_string()],
        );
        let router = router_with(
            vec![info("primary", 0.001), info("backup", 0.05)],
            factory,
            settings,
        );

        let response = router
            .route(
                &[ChatMessage::user("hi")],
                &RoutingContext::new(RoutingStrategy::CostOptimized),
                &GenerationParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(response.content, "[backup] hi");
        assert_eq!(response.metadata["is_fallback"], true);
        assert_eq!(response.metadata["fallback_model"], "ollama:backup");
    }

    #[tokio::test]
    async fn test_all_fallbacks_failing() {
        let factory = Arc::new(MockProviderFactory::new());
        factory.insert("ollama:primary", failing("primary"));
        factory.insert("ollama:backup", failing("backup"));

        let mut settings = RouterSettings::default();
        settings
            .fallbacks
            .insert("ollama:primary".to_string(), vec!["ollama:backup".to_string()]);
        let router = router_with(vec![info("primary", 0.001), info("backup", 0.05)], factory, settings);

        let err = router
            .route(
                &[ChatMessage::user("hi")],
                &RoutingContext::new(RoutingStrategy::CostOptimized),
                &GenerationParams::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AllFallbacksExhausted { .. }));
        assert!(err.to_string().contains("upstream 503"));
    }

    #[tokio::test]
    async fn test_no_fallbacks_returns_primary_error() {
        let factory = Arc::new(MockProviderFactory::new());
        factory.insert("ollama:primary", failing("primary"));
        let router = router_with(vec![info("primary", 0.001)], factory, RouterSettings::default());

        let err = router
            .route(&[ChatMessage::user("hi")], &router.default_context(), &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::BackendExecutionFailure(_)));
    }

    #[tokio::test]
    async fn test_built_provider_is_bound_for_health_checks() {
        let factory = Arc::new(MockProviderFactory::new());
        factory.insert("ollama:flaky", failing("flaky"));
        let router = router_with(vec![info("flaky", 0.01), info("steady", 0.02)], factory, RouterSettings::default());

        let flaky = router.registry().get_model("ollama:flaky").await.unwrap();
        router.provider_for(&flaky).await.unwrap();

        for round in 1..=3 {
            let summary = router.registry().health_check_all().await;
            assert!(!summary.results["ollama:flaky"], "round {round}");
            assert!(summary.results["ollama:steady"]);
        }
        let flaky = router.registry().get_model("ollama:flaky").await.unwrap();
        assert!(!flaky.is_available);
        assert_eq!(flaky.health_check_failures, 3);
        assert!(router.registry().get_model("ollama:steady").await.unwrap().is_available);

        assert_eq!(router.clear_cache().await, 1);
        assert!(!router.registry().unbind_provider("ollama:flaky").await);
    }

    #[tokio::test]
    async fn test_unhealthy_fallback_is_skipped() {
        let factory = Arc::new(MockProviderFactory::new());
        factory.insert("ollama:primary", failing("primary"));
        factory.insert("ollama:sick", failing("sick"));

        let mut settings = RouterSettings::default();
        settings.fallbacks.insert(
            "ollama:primary".to_string(),
            vec!["ollama:sick".to_string(), "ollama:backup".to_string()],
        );
        let router = router_with(
            vec![info("primary", 0.001), info("sick", 0.01), info("backup", 0.05)],
            factory,
            settings,
        );

        let sick = router.registry().get_model("ollama:sick").await.unwrap();
        router.provider_for(&sick).await.unwrap();
        for _ in 0..3 {
            router.registry().health_check("ollama:sick").await;
        }
        assert!(!router.registry().get_model("ollama:sick").await.unwrap().is_available);

        let context = RoutingContext::new(RoutingStrategy::CostOptimized);
        let response = router
            .route(&[ChatMessage::user("hi")], &context, &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(response.metadata["fallback_model"], "ollama:backup");
    }

    #[tokio::test]
    async fn test_stream_rejected_without_streaming_support() {
        let factory = Arc::new(MockProviderFactory::new());
        let mut model = info("batch-only", 0.01);
        model.capabilities.supports_streaming = false;
        let router = router_with(vec![model], factory.clone(), RouterSettings::default());

        let result = router
            .route_stream(&[ChatMessage::user("hi")], &router.default_context(), &GenerationParams::default())
            .await;
        assert!(matches!(result, Err(DomainError::StreamingUnsupported(_))));
        assert_eq!(factory.created(), 0);
    }
}
