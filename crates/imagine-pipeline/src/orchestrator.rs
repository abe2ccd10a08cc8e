//! Generation orchestration: trigger, wait, split, persist.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisService, MockAnalysis};
use crate::config::{DEFAULT_TILE_QUALITY, PipelineConfig};
use crate::decompose::{AssetFetcher, GridDecomposer, HttpAssetFetcher};
use crate::errors::{ConfigError, ListenError, PipelineError};
use crate::event::{SharedStream, StreamConnector};
use crate::listener::{CompletionListener, CompletionWaiter, ListenerIdentity, MockListener};
use crate::model::{GenerationOutcome, JournalOutcome};
use crate::policy::RetryPolicy;
use crate::trigger::{GenerationTrigger, MockTrigger};
use crate::upload::{DurableUploader, MemoryObjectStore, ObjectStore};
use crate::vendors::discord::{DiscordClientConfig, DiscordTrigger};
use crate::vendors::gemini::{GeminiAnalysis, GeminiClientConfig};
use crate::vendors::supabase::{SupabaseStore, SupabaseStoreConfig};

struct OrchestratorInner {
    trigger: Arc<dyn GenerationTrigger>,
    waiter: Arc<dyn CompletionWaiter>,
    decomposer: GridDecomposer,
    uploader: DurableUploader,
    analysis: Option<Arc<dyn AnalysisService>>,
    /// Held across trigger and wait so at most one generation is outstanding in the channel.
    channel_gate: Option<Semaphore>,
    stream: Option<Arc<SharedStream>>,
}

/// Runs the full generation pipeline for one prompt at a time per call.
///
/// Cheap to clone; clones share collaborators, the notification stream and the channel gate.
#[derive(Clone)]
pub struct GenerationOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl GenerationOrchestrator {
    pub fn builder() -> GenerationOrchestratorBuilder {
        GenerationOrchestratorBuilder::default()
    }

    /// Selects mock or real collaborators from configuration.
    ///
    /// `connector` feeds the completion listener; it is not used in mock mode. Storage falls back
    /// to memory in mock mode when no object store is configured.
    pub fn from_config(
        config: &PipelineConfig,
        connector: Arc<dyn StreamConnector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut builder = Self::builder()
            .upload_policy(config.upload_policy.clone())
            .tile_quality(config.tile_quality)
            .serialize_per_channel(config.serialize_per_channel)
            .asset_fetcher(Arc::new(HttpAssetFetcher::with_default_timeout()?));

        builder = if config.mock_mode {
            builder
                .trigger(Arc::new(MockTrigger::default()))
                .waiter(Arc::new(MockListener::default()))
        } else {
            let channel = config
                .channel_id()
                .ok_or_else(|| ConfigError::missing("DISCORD_CHANNEL_ID"))?;
            let stream = Arc::new(SharedStream::new(connector));
            let listener = CompletionListener::new(
                Arc::clone(&stream),
                ListenerIdentity::new(config.service.application_id.as_str(), channel),
            )
            .with_timeout(config.timeout);
            builder
                .trigger(Arc::new(DiscordTrigger::new(DiscordClientConfig::from_service(
                    &config.service,
                ))?))
                .waiter(Arc::new(listener))
                .stream(stream)
        };

        let store: Arc<dyn ObjectStore> = match SupabaseStoreConfig::from_storage(&config.storage) {
            Ok(store_config) => Arc::new(SupabaseStore::new(store_config)?),
            Err(_) if config.mock_mode => {
                info!("no object store configured; mock mode keeps tiles in memory");
                Arc::new(MemoryObjectStore::default())
            }
            Err(err) => return Err(err),
        };
        builder = builder.object_store(store);

        let analysis: Arc<dyn AnalysisService> = if config.analysis.mock {
            Arc::new(MockAnalysis::default())
        } else {
            Arc::new(GeminiAnalysis::new(GeminiClientConfig::from_analysis(
                &config.analysis,
            )?)?)
        };
        builder.analysis(analysis).build()
    }

    /// Generates a composite for `prompt`, splits it and persists the tiles.
    ///
    /// A failed upload does not fail the call: the outcome carries the warning and no paths.
    pub async fn generate(&self, prompt: &str) -> Result<GenerationOutcome, PipelineError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PipelineError::Validation("No image prompt provided.".into()));
        }
        let inner = &self.inner;
        let request_id = Uuid::new_v4();

        let (request, completion) = {
            let _permit = match &inner.channel_gate {
                Some(gate) => Some(
                    gate.acquire()
                        .await
                        .map_err(|_| PipelineError::Listen(ListenError::StreamClosed))?,
                ),
                None => None,
            };
            let request = inner.trigger.trigger(prompt).await.inspect_err(|err| {
                warn!(%request_id, error = %err, "generation trigger failed");
            })?;
            info!(%request_id, token = %request.correlation_token, "generation triggered");
            let completion = inner.waiter.wait(&request).await?;
            (request, completion)
        };

        let asset_url = completion
            .image_urls
            .first()
            .cloned()
            .ok_or(PipelineError::NoAsset)?;
        let tiles = inner.decomposer.decompose(&asset_url).await?;
        let upload = inner
            .uploader
            .upload(&request_id.to_string(), &tiles)
            .await;

        info!(%request_id, token = %request.correlation_token, paths = upload.paths.len(), "generation finished");
        Ok(GenerationOutcome {
            request_id,
            correlation_token: request.correlation_token,
            image_urls: completion.image_urls,
            tiles: tiles.into(),
            upload_error: upload.warning(),
            paths: upload.paths,
        })
    }

    /// Analyses `text`, then generates images for the prompt it produced.
    ///
    /// Only analysis failures fail the call. Generation errors are kept in the outcome next to
    /// the analysis text.
    pub async fn journal(
        &self,
        text: &str,
        model: Option<&str>,
    ) -> Result<JournalOutcome, PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Validation(
                "Please enter some text to analyze.".into(),
            ));
        }
        let analysis = self
            .inner
            .analysis
            .as_ref()
            .ok_or_else(|| ConfigError::missing("analysis_service"))?;
        let result = analysis.analyze(text, model).await?;

        let generation = match result.image_prompt.as_deref() {
            Some(prompt) => {
                let outcome = self.generate(prompt).await;
                if let Err(err) = &outcome {
                    warn!(phase = ?err.phase(), error = %err, "image generation failed; keeping analysis");
                }
                Some(outcome)
            }
            None => {
                info!("analysis produced no image prompt");
                None
            }
        };

        Ok(JournalOutcome {
            analysis_text: result.analysis_text,
            image_prompt: result.image_prompt,
            generation,
        })
    }

    /// Closes the notification stream and the channel gate. Outstanding waits end with an error.
    pub fn shutdown(&self) {
        if let Some(gate) = &self.inner.channel_gate {
            gate.close();
        }
        if let Some(stream) = &self.inner.stream {
            stream.shutdown();
        }
    }
}

/// Collects collaborators before creating a [`GenerationOrchestrator`].
pub struct GenerationOrchestratorBuilder {
    trigger: Option<Arc<dyn GenerationTrigger>>,
    waiter: Option<Arc<dyn CompletionWaiter>>,
    asset_fetcher: Option<Arc<dyn AssetFetcher>>,
    object_store: Option<Arc<dyn ObjectStore>>,
    analysis: Option<Arc<dyn AnalysisService>>,
    stream: Option<Arc<SharedStream>>,
    upload_policy: RetryPolicy,
    tile_quality: u8,
    serialize_per_channel: bool,
}

impl Default for GenerationOrchestratorBuilder {
    fn default() -> Self {
        Self {
            trigger: None,
            waiter: None,
            asset_fetcher: None,
            object_store: None,
            analysis: None,
            stream: None,
            upload_policy: RetryPolicy::default(),
            tile_quality: DEFAULT_TILE_QUALITY,
            serialize_per_channel: false,
        }
    }
}

impl GenerationOrchestratorBuilder {
    pub fn trigger(mut self, trigger: Arc<dyn GenerationTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn waiter(mut self, waiter: Arc<dyn CompletionWaiter>) -> Self {
        self.waiter = Some(waiter);
        self
    }

    pub fn asset_fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.asset_fetcher = Some(fetcher);
        self
    }

    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn analysis(mut self, analysis: Arc<dyn AnalysisService>) -> Self {
        self.analysis = Some(analysis);
        self
    }

    /// Stream shut down together with the orchestrator.
    pub fn stream(mut self, stream: Arc<SharedStream>) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn upload_policy(mut self, policy: RetryPolicy) -> Self {
        self.upload_policy = policy;
        self
    }

    pub fn tile_quality(mut self, quality: u8) -> Self {
        self.tile_quality = quality;
        self
    }

    pub fn serialize_per_channel(mut self, enabled: bool) -> Self {
        self.serialize_per_channel = enabled;
        self
    }

    /// Builds the orchestrator. Trigger, waiter and object store are required.
    pub fn build(self) -> Result<GenerationOrchestrator, ConfigError> {
        let mut missing = Vec::new();
        if self.trigger.is_none() {
            missing.push("trigger".to_string());
        }
        if self.waiter.is_none() {
            missing.push("completion_waiter".to_string());
        }
        if self.object_store.is_none() {
            missing.push("object_store".to_string());
        }
        let (Some(trigger), Some(waiter), Some(store)) =
            (self.trigger, self.waiter, self.object_store)
        else {
            return Err(ConfigError::Missing { keys: missing });
        };
        if self.tile_quality == 0 || self.tile_quality > 100 {
            return Err(ConfigError::invalid("tile_quality", "must be within 1..=100"));
        }

        let fetcher = match self.asset_fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpAssetFetcher::with_default_timeout()?),
        };
        Ok(GenerationOrchestrator {
            inner: Arc::new(OrchestratorInner {
                trigger,
                waiter,
                decomposer: GridDecomposer::new(fetcher).with_quality(self.tile_quality),
                uploader: DurableUploader::new(store).with_policy(self.upload_policy),
                analysis: self.analysis,
                channel_gate: self.serialize_per_channel.then(|| Semaphore::new(1)),
                stream: self.stream,
            }),
        })
    }
}
