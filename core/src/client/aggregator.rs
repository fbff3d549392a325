use crate::client::{ConnectionDescriptor, ToolConnection};
use crate::error::ToolError;
use crate::traits::{ToolSource, ToolSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// What to do when a configured source cannot be reached during discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFailurePolicy {
    #[default]
    FailFast,
    /// Drop the source's tools, log a warning and keep going.
    Degrade,
}

/// How tools exported under the same name by different sources are named.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameConflictPolicy {
    /// Prefix only the colliding tools with `<source>__`.
    #[default]
    Prefix,
    /// Prefix every tool with `<source>__`.
    AlwaysPrefix,
    /// Fail aggregation on any collision.
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorPolicy {
    pub on_source_failure: SourceFailurePolicy,
    pub on_name_conflict: NameConflictPolicy,
}

/// One row of the aggregated tool table.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTool {
    pub resolved_name: String,
    pub source: String,
    pub spec: ToolSpec,
}

struct Route {
    connection: Arc<ToolConnection>,
    tool: String,
}

#[derive(Default)]
struct AggregatorState {
    connections: HashMap<String, Arc<ToolConnection>>,
    routes: HashMap<String, Route>,
    table: Vec<ResolvedTool>,
    excluded: Vec<String>,
}

/// Merges the catalogs of several tool sources into one flat namespace.
pub struct ToolAggregator {
    descriptors: Vec<ConnectionDescriptor>,
    policy: AggregatorPolicy,
    state: RwLock<AggregatorState>,
}

impl std::fmt::Debug for ToolAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolAggregator")
            .field(
                "sources",
                &self.descriptors.iter().map(|d| &d.name).collect::<Vec<_>>(),
            )
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ToolAggregator {
    pub fn new(descriptors: Vec<ConnectionDescriptor>) -> Self {
        Self {
            descriptors,
            policy: AggregatorPolicy::default(),
            state: RwLock::new(AggregatorState::default()),
        }
    }

    pub fn with_policy(mut self, policy: AggregatorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn descriptors(&self) -> &[ConnectionDescriptor] {
        &self.descriptors
    }

    /// Connects any source without a live connection, re-fetches every
    /// catalog and rebuilds the aggregated table.
    pub async fn get_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(self
            .refresh_table()
            .await?
            .into_iter()
            .map(|row| ToolSpec {
                name: row.resolved_name,
                ..row.spec
            })
            .collect())
    }

    /// Like [`ToolAggregator::get_tools`] but keeps the owning source of each
    /// row.
    pub async fn refresh_table(&self) -> Result<Vec<ResolvedTool>, ToolError> {
        let mut seen = HashSet::new();
        if let Some(dup) = self.descriptors.iter().find(|d| !seen.insert(d.name.as_str())) {
            return Err(ToolError::Aggregation {
                server: dup.name.clone(),
                message: "source name is configured more than once".to_string(),
            });
        }

        let mut state = self.state.write().await;
        let mut catalogs = Vec::with_capacity(self.descriptors.len());
        let mut excluded = Vec::new();

        for descriptor in &self.descriptors {
            match fetch_catalog(&mut state.connections, descriptor).await {
                Ok(catalog) => catalogs.push((descriptor.name.clone(), catalog)),
                Err(e) => match self.policy.on_source_failure {
                    SourceFailurePolicy::FailFast => {
                        return Err(ToolError::Aggregation {
                            server: descriptor.name.clone(),
                            message: e.to_string(),
                        });
                    }
                    SourceFailurePolicy::Degrade => {
                        warn!(source = %descriptor.name, error = %e, "Excluding unreachable tool source");
                        excluded.push(descriptor.name.clone());
                    }
                },
            }
        }

        let table = resolve_names(&catalogs, self.policy.on_name_conflict)?;

        let mut routes = HashMap::with_capacity(table.len());
        for row in &table {
            if let Some(connection) = state.connections.get(&row.source) {
                routes.insert(
                    row.resolved_name.clone(),
                    Route {
                        connection: Arc::clone(connection),
                        tool: row.spec.name.clone(),
                    },
                );
            }
        }

        info!(
            tools = table.len(),
            sources = catalogs.len(),
            excluded = excluded.len(),
            "Tool catalog aggregated"
        );

        state.routes = routes;
        state.table = table.clone();
        state.excluded = excluded;
        Ok(table)
    }

    /// Routes a call by resolved name to the connection that owns it.
    pub async fn invoke(&self, resolved_name: &str, arguments: Value) -> Result<Value, ToolError> {
        let (connection, tool) = {
            let state = self.state.read().await;
            let route = state
                .routes
                .get(resolved_name)
                .ok_or_else(|| ToolError::UnknownTool(resolved_name.to_string()))?;
            (Arc::clone(&route.connection), route.tool.clone())
        };

        connection.invoke(&tool, arguments).await
    }

    /// Rows of the table built by the last successful discovery.
    pub async fn table(&self) -> Vec<ResolvedTool> {
        self.state.read().await.table.clone()
    }

    /// Sources dropped by the last discovery under [`SourceFailurePolicy::Degrade`].
    pub async fn excluded_sources(&self) -> Vec<String> {
        self.state.read().await.excluded.clone()
    }

    pub async fn close(&self) {
        let mut state = self.state.write().await;
        state.routes.clear();
        state.table.clear();
        for (name, connection) in state.connections.drain() {
            if let Err(e) = connection.close().await {
                warn!(source = %name, error = %e, "Failed to close tool source session");
            }
        }
    }
}

async fn fetch_catalog(
    connections: &mut HashMap<String, Arc<ToolConnection>>,
    descriptor: &ConnectionDescriptor,
) -> Result<Vec<ToolSpec>, ToolError> {
    if let Some(connection) = connections.get(&descriptor.name) {
        match connection.refresh().await {
            Ok(catalog) => return Ok(catalog),
            Err(e) => {
                if let Err(close_error) = connection.close().await {
                    debug!(
                        source = %descriptor.name,
                        "Closing stale session failed: {}",
                        close_error
                    );
                }
                connections.remove(&descriptor.name);
                return Err(e);
            }
        }
    }

    let connection = ToolConnection::connect(descriptor.clone()).await?;
    let catalog = connection.catalog();
    connections.insert(descriptor.name.clone(), Arc::new(connection));
    Ok(catalog)
}

/// Assigns every tool a name that is unique across all catalogs. The result
/// depends only on the input order, so repeated runs agree.
pub fn resolve_names(
    catalogs: &[(String, Vec<ToolSpec>)],
    policy: NameConflictPolicy,
) -> Result<Vec<ResolvedTool>, ToolError> {
    let mut owners: HashMap<&str, Vec<&str>> = HashMap::new();
    for (source, catalog) in catalogs {
        for spec in catalog {
            owners.entry(spec.name.as_str()).or_default().push(source.as_str());
        }
    }

    let mut seen = HashSet::new();
    let mut table = Vec::new();

    for (source, catalog) in catalogs {
        for spec in catalog {
            let exporters = &owners[spec.name.as_str()];
            let collides = exporters.len() > 1;

            let resolved_name = match policy {
                NameConflictPolicy::AlwaysPrefix => namespaced(source, &spec.name),
                NameConflictPolicy::Prefix if collides => namespaced(source, &spec.name),
                NameConflictPolicy::Reject if collides => {
                    return Err(ToolError::Aggregation {
                        server: source.clone(),
                        message: format!(
                            "tool '{}' is exported by several sources: {}",
                            spec.name,
                            exporters.join(", ")
                        ),
                    });
                }
                _ => spec.name.clone(),
            };

            if !seen.insert(resolved_name.clone()) {
                return Err(ToolError::Aggregation {
                    server: source.clone(),
                    message: format!("resolved tool name '{resolved_name}' is not unique"),
                });
            }

            table.push(ResolvedTool {
                resolved_name,
                source: source.clone(),
                spec: spec.clone(),
            });
        }
    }

    Ok(table)
}

/// `<source>__<tool>`, restricted to the characters chat-completion APIs
/// accept in function names.
fn namespaced(source: &str, tool: &str) -> String {
    format!("{source}__{tool}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl ToolSource for ToolAggregator {
    async fn get_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        ToolAggregator::get_tools(self).await
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        ToolAggregator::invoke(self, name, arguments).await
    }
}
