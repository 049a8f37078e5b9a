//! PipelineManager: builds the process's full pipeline set from a RoutingTable
//! and owns their lifetime afterward

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::factory::PipelineFactory;
use crate::pipeline::Pipeline;
use crate::preprocessor::RoutingTable;
use crate::router::LoadBalancerRouter;

/// Owns every live Pipeline and the router pools they're registered into
pub struct PipelineManager {
    factory: PipelineFactory,
    pipelines: DashMap<String, Arc<Pipeline>>,
    router: Arc<LoadBalancerRouter>,
    config_name: String,
    port: u16,
}

impl PipelineManager {
    /// A manager with no pipelines yet, bound to an existing router
    pub fn new(router: Arc<LoadBalancerRouter>, config_name: impl Into<String>, port: u16) -> Self {
        Self {
            factory: PipelineFactory::new(),
            pipelines: DashMap::new(),
            router,
            config_name: config_name.into(),
            port,
        }
    }

    /// Build, handshake, and register every pipeline named by `table`
    ///
    /// Rows sharing `(provider, target_model, api_key_index)` across virtual
    /// models reuse one built pipeline, registered into every virtual model's
    /// pool that references it. If any row fails to build or handshake, every
    /// pipeline created during this call is stopped and dropped in creation
    /// order and the failure propagates — initialization is all-or-nothing.
    ///
    /// # Errors
    ///
    /// Propagates the first `ConfigurationInvalid` or `HandshakeFailed` hit
    /// while building the table.
    pub async fn initialize_from_routing_table(&self, table: &RoutingTable) -> Result<(), PipelineError> {
        let mut created_this_call: Vec<Arc<Pipeline>> = Vec::new();
        let mut built: HashMap<String, Arc<Pipeline>> = HashMap::new();

        let result = self.build_all(table, &mut created_this_call, &mut built).await;

        match result {
            Ok(()) => {
                self.write_pipeline_table_artifact(table).await;
                info!(total_pipelines = self.pipelines.len(), "pipeline manager initialized");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "pipeline initialization failed, unwinding pipelines created this call");
                for pipeline in created_this_call.iter().rev() {
                    if let Err(stop_err) = pipeline.stop().await {
                        error!(pipeline_id = %pipeline.metadata.pipeline_id, error = %stop_err, "failed to stop pipeline during init unwind");
                    }
                    self.pipelines.remove(&pipeline.metadata.pipeline_id);
                }
                Err(e)
            }
        }
    }

    async fn build_all(
        &self,
        table: &RoutingTable,
        created_this_call: &mut Vec<Arc<Pipeline>>,
        built: &mut HashMap<String, Arc<Pipeline>>,
    ) -> Result<(), PipelineError> {
        for (virtual_model, entries) in table {
            for entry in entries {
                let id = crate::pipeline::pipeline_id(&entry.provider, &entry.target_model, entry.api_key_index);

                if !built.contains_key(&id) {
                    let pipeline = Arc::new(self.factory.build(entry)?);
                    pipeline.handshake().await?;
                    created_this_call.push(Arc::clone(&pipeline));
                    self.pipelines.insert(id.clone(), Arc::clone(&pipeline));
                    built.insert(id.clone(), pipeline);
                }

                self.router.register(virtual_model, &id, entry.blacklist.clone());
            }
        }
        Ok(())
    }

    /// Look up a live pipeline by id
    pub fn get(&self, pipeline_id: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.get(pipeline_id).map(|p| Arc::clone(&p))
    }

    /// Stop and drop a pipeline, cancelling any in-flight executions against it
    ///
    /// Removes the pipeline from the router's pools first, so no new request
    /// can be picked against it while the stop is underway, then cancels its
    /// root token to abort in-flight requests, then stops its stages.
    pub async fn destroy_pipeline(&self, pipeline_id: &str) -> Result<(), PipelineError> {
        let Some((_, pipeline)) = self.pipelines.remove(pipeline_id) else {
            return Ok(());
        };
        info!(pipeline_id, "destroying pipeline");
        self.router.unregister(pipeline_id);
        pipeline.cancel();
        pipeline.stop().await
    }

    /// Current status of every live pipeline
    pub fn health_check(&self) -> HashMap<String, crate::pipeline::PipelineSnapshot> {
        self.pipelines.iter().map(|e| (e.key().clone(), e.value().snapshot())).collect()
    }

    async fn write_pipeline_table_artifact(&self, table: &RoutingTable) {
        let artifact = self.build_artifact(table);
        let Ok(json) = serde_json::to_string_pretty(&artifact) else {
            error!("failed to serialize pipeline-table artifact");
            return;
        };

        let Some(home) = dirs::home_dir() else {
            error!("no home directory available, skipping pipeline-table artifact");
            return;
        };

        let generated_path = home
            .join(".route-claudecode")
            .join("config")
            .join("generated")
            .join(format!("{}-pipeline-table.json", self.config_name));
        if let Err(e) = write_artifact(&generated_path, &json).await {
            error!(path = %generated_path.display(), error = %e, "failed to write pipeline-table artifact");
        }

        let debug_path = home
            .join(".route-claudecode")
            .join("debug-logs")
            .join(format!("port-{}", self.port))
            .join(format!("{}_{}-pipeline-table.json", Utc::now().timestamp(), self.config_name));
        if let Err(e) = write_artifact(&debug_path, &json).await {
            error!(path = %debug_path.display(), error = %e, "failed to write debug-log pipeline-table artifact");
        }
    }

    fn build_artifact(&self, table: &RoutingTable) -> PipelineTableArtifact {
        let mut all = Vec::new();
        let mut grouped: HashMap<String, Vec<PipelineTableEntry>> = HashMap::new();

        for (virtual_model, entries) in table {
            for entry in entries {
                let id = crate::pipeline::pipeline_id(&entry.provider, &entry.target_model, entry.api_key_index);
                let Some(pipeline) = self.pipelines.get(&id) else { continue };
                let snapshot = pipeline.snapshot();
                let artifact_entry = PipelineTableEntry {
                    pipeline_id: id.clone(),
                    virtual_model: virtual_model.clone(),
                    provider: entry.provider.clone(),
                    target_model: entry.target_model.clone(),
                    api_key_index: entry.api_key_index,
                    endpoint: pipeline.metadata.endpoint_url.to_string(),
                    status: format!("{:?}", snapshot.status),
                    created_at: now_rfc3339(),
                    handshake_time: snapshot.last_handshake_time.map(|_| now_rfc3339()),
                    architecture: PipelineArchitecture {
                        transformer: StageArtifact {
                            id: format!("{}-transformer", entry.provider),
                            name: pipeline.metadata.transformer_name.clone(),
                            stage_type: "transformer".to_owned(),
                            status: format!("{:?}", snapshot.stage_statuses[0]),
                        },
                        protocol: StageArtifact {
                            id: format!("{}-protocol", entry.provider),
                            name: pipeline.metadata.protocol_name.clone(),
                            stage_type: "protocol".to_owned(),
                            status: format!("{:?}", snapshot.stage_statuses[1]),
                        },
                        server_compatibility: StageArtifact {
                            id: format!("{}-compatibility", entry.provider),
                            name: pipeline.metadata.server_compatibility_name.clone(),
                            stage_type: "server_compatibility".to_owned(),
                            status: format!("{:?}", snapshot.stage_statuses[2]),
                        },
                        server: ServerStageArtifact {
                            id: format!("{}-server", entry.provider),
                            name: pipeline.metadata.server_name.clone(),
                            stage_type: "server".to_owned(),
                            status: format!("{:?}", snapshot.stage_statuses[3]),
                            endpoint: pipeline.metadata.endpoint_url.to_string(),
                        },
                    },
                };
                grouped.entry(virtual_model.clone()).or_default().push(artifact_entry.clone());
                all.push(artifact_entry);
            }
        }

        PipelineTableArtifact {
            config_name: self.config_name.clone(),
            config_file: format!("{}.json", self.config_name),
            generated_at: now_rfc3339(),
            total_pipelines: self.pipelines.len(),
            pipelines_grouped_by_virtual_model: grouped,
            all_pipelines: all,
        }
    }
}

#[cfg(test)]
impl PipelineManager {
    /// Insert a pre-built, already-handshaken pipeline directly, bypassing
    /// `initialize_from_routing_table`'s factory construction
    pub(crate) fn insert_for_test(&self, pipeline_id: &str, pipeline: Arc<Pipeline>) {
        self.pipelines.insert(pipeline_id.to_owned(), pipeline);
    }
}

#[cfg(test)]
mod tests {
    use ccrouter_config::{BlacklistConfig, ProviderProtocol};
    use indexmap::IndexMap;
    use secrecy::SecretString;

    use super::*;
    use crate::pipeline::pipeline_id;
    use crate::preprocessor::RouteEntry;

    fn entry(virtual_model: &str, provider: &str, target_model: &str, declared_transformer: &str, priority: u32) -> RouteEntry {
        RouteEntry {
            virtual_model: virtual_model.to_owned(),
            provider: provider.to_owned(),
            target_model: target_model.to_owned(),
            api_key_index: 0,
            api_key: SecretString::from("k0"),
            api_base_url: "https://example.invalid".parse().unwrap(),
            declared_protocol: ProviderProtocol::Openai,
            declared_server_compatibility: "passthrough".to_owned(),
            declared_transformer: declared_transformer.to_owned(),
            max_tokens: None,
            header_rules: Vec::new(),
            blacklist: BlacklistConfig::default(),
            is_security_enhanced: false,
            priority,
        }
    }

    #[tokio::test]
    async fn a_failure_partway_through_build_all_unwinds_every_pipeline_created_this_call() {
        let (router, _rx) = LoadBalancerRouter::new();
        let manager = PipelineManager::new(Arc::new(router), "test", 0);

        let mut table: RoutingTable = IndexMap::new();
        table.insert("vm1".to_owned(), vec![entry("vm1", "good-provider", "good-model", "anthropic-to-openai", 0)]);
        table.insert("vm2".to_owned(), vec![entry("vm2", "bad-provider", "bad-model", "no-such-transformer", 0)]);

        let result = manager.initialize_from_routing_table(&table).await;
        assert!(result.is_err());

        let good_id = pipeline_id("good-provider", "good-model", 0);
        assert!(manager.get(&good_id).is_none(), "pipeline built before the failing row must be unwound");
    }

    #[tokio::test]
    async fn a_successful_build_all_registers_every_pipeline() {
        let (router, _rx) = LoadBalancerRouter::new();
        let manager = PipelineManager::new(Arc::new(router), "test", 0);

        let mut table: RoutingTable = IndexMap::new();
        table.insert("vm1".to_owned(), vec![entry("vm1", "good-provider", "good-model", "anthropic-to-openai", 0)]);

        manager.initialize_from_routing_table(&table).await.unwrap();

        let good_id = pipeline_id("good-provider", "good-model", 0);
        assert!(manager.get(&good_id).is_some());
    }
}

async fn write_artifact(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Serialize)]
struct StageArtifact {
    id: String,
    name: String,
    #[serde(rename = "type")]
    stage_type: String,
    status: String,
}

#[derive(Debug, Clone, Serialize)]
struct ServerStageArtifact {
    id: String,
    name: String,
    #[serde(rename = "type")]
    stage_type: String,
    status: String,
    endpoint: String,
}

#[derive(Debug, Clone, Serialize)]
struct PipelineArchitecture {
    transformer: StageArtifact,
    protocol: StageArtifact,
    server_compatibility: StageArtifact,
    server: ServerStageArtifact,
}

#[derive(Debug, Clone, Serialize)]
struct PipelineTableEntry {
    pipeline_id: String,
    virtual_model: String,
    provider: String,
    target_model: String,
    api_key_index: usize,
    endpoint: String,
    status: String,
    created_at: String,
    handshake_time: Option<String>,
    architecture: PipelineArchitecture,
}

#[derive(Debug, Serialize)]
struct PipelineTableArtifact {
    config_name: String,
    config_file: String,
    generated_at: String,
    total_pipelines: usize,
    pipelines_grouped_by_virtual_model: HashMap<String, Vec<PipelineTableEntry>>,
    all_pipelines: Vec<PipelineTableEntry>,
}
