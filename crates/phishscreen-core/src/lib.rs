//! Core cascaded phishing and social-engineering detection pipeline.
//!
//! Three stages — a deterministic reputation/pattern filter, a fine-tuned
//! transformer classifier with a manual-override scanner, and a
//! retrieval-augmented LLM detective — are driven by a single orchestrator
//! that applies short-circuit and fusion rules between them. All durable
//! state lives behind the [`store::PersistenceStore`] trait.

pub mod config;
pub mod error;
pub mod feedback;
pub mod llm_client;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod retrieval;
pub mod stage1;
pub mod stage2;
pub mod stage3;
pub mod store;
pub mod training;

use std::sync::Arc;

use config::PipelineConfig;
use llm_client::{HttpLlmClient, LlmClient, LlmClientConfig};
use pipeline::Pipeline;
use stage1::ReputationFilter;
use stage2::{load_initial_model, ModelRegistry, TransformerClassifier};
use stage3::Detective;
use store::{InMemoryStore, PersistenceStore};
use training::{TrainingConfig, TrainingPipeline, TrainingRegistry};

/// Wires every component together from a single [`PipelineConfig`], the way
/// a deployment's composition root would. Tests and alternate deployments
/// can still construct each component directly.
pub struct PhishScreen {
    pub pipeline: Pipeline,
    pub training: TrainingPipeline,
    pub store: Arc<dyn PersistenceStore>,
    pub model_registry: Arc<ModelRegistry>,
    pub training_registry: Arc<TrainingRegistry>,
}

impl PhishScreen {
    pub fn new(config: PipelineConfig) -> Self {
        let store: Arc<dyn PersistenceStore> = Arc::new(InMemoryStore::new());
        let initial_model = load_initial_model(
            config.use_custom_model,
            config.custom_model_path.as_deref(),
            config.custom_model_version.as_deref(),
        );
        let model_registry = Arc::new(ModelRegistry::new(initial_model));
        let training_registry = Arc::new(TrainingRegistry::new());

        let stage1 = ReputationFilter::new();
        let stage2 = TransformerClassifier::new(
            model_registry.clone(),
            config.confidence_threshold,
            config.high_confidence_threshold,
        );

        let llm_client: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(LlmClientConfig {
            api_key: config.llm_api_key.clone(),
            base_url: config.llm_base_url.clone(),
            model: config.llm_model.clone(),
            timeout: std::time::Duration::from_secs(config.llm_timeout_secs),
            max_retries: config.llm_max_retries,
            circuit_breaker_threshold: config.llm_circuit_breaker_threshold,
            circuit_breaker_window: config.llm_circuit_breaker_window,
        }));
        let detective =
            Detective::new(llm_client).with_max_parse_retries(config.llm_max_parse_retries);

        let pipeline = Pipeline::new(config.clone(), store.clone(), stage1, stage2, detective);

        let training_config = TrainingConfig {
            min_samples: config.training_min_samples,
            min_per_class: config.training_min_per_class,
            promotion_delta: config.training_delta,
            ..TrainingConfig::default()
        };
        let training = TrainingPipeline::new(
            store.clone(),
            model_registry.clone(),
            training_registry.clone(),
            training_config,
        );

        Self {
            pipeline,
            training,
            store,
            model_registry,
            training_registry,
        }
    }
}
