use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::api::ToolCatalog;

/// Where a function name lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    pub tool_source_id: String,
    pub description: String,
}

type SourceFunctions = HashMap<String, String>;

/// Maps function names requested by the model onto selected tool sources.
///
/// Catalogs are fetched on first use per source and kept until [`clear`].
///
/// [`clear`]: ToolResolver::clear
#[derive(Clone)]
pub struct ToolResolver {
    catalog: Arc<dyn ToolCatalog>,
    cache: Arc<RwLock<HashMap<String, SourceFunctions>>>,
}

impl ToolResolver {
    pub fn new(catalog: Arc<dyn ToolCatalog>) -> Self {
        Self {
            catalog,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// First source, in selection order, exporting `function_name`.
    pub async fn resolve(&self, function_name: &str, source_ids: &[String]) -> Option<ResolvedTool> {
        let index = self.reverse_index(source_ids).await;
        let resolved = index.get(function_name).cloned();
        if resolved.is_none() {
            debug!(
                target: "parley::tools",
                function = function_name,
                sources = ?source_ids,
                "Function not exported by any selected source"
            );
        }
        resolved
    }

    /// Function name to source, first selected source winning.
    pub async fn reverse_index(&self, source_ids: &[String]) -> HashMap<String, ResolvedTool> {
        self.ensure_cached(source_ids).await;

        let cache = self.cache.read().await;
        let mut index = HashMap::new();
        for source_id in source_ids {
            let Some(functions) = cache.get(source_id) else {
                continue;
            };
            for (name, description) in functions {
                index
                    .entry(name.clone())
                    .or_insert_with(|| ResolvedTool {
                        tool_source_id: source_id.clone(),
                        description: description.clone(),
                    });
            }
        }
        index
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    async fn ensure_cached(&self, source_ids: &[String]) {
        let missing: Vec<String> = {
            let cache = self.cache.read().await;
            source_ids
                .iter()
                .filter(|id| !cache.contains_key(*id))
                .cloned()
                .collect()
        };
        if missing.is_empty() {
            return;
        }

        match self.catalog.fetch_catalogs(&missing).await {
            Ok(catalogs) => {
                let mut cache = self.cache.write().await;
                for catalog in catalogs {
                    let functions = cache.entry(catalog.source_id).or_default();
                    for tool in catalog.tools {
                        functions.insert(tool.name, tool.description);
                    }
                }
                // Sources the server did not return export nothing.
                for source_id in missing {
                    cache.entry(source_id).or_default();
                }
            }
            Err(e) => {
                warn!(
                    target: "parley::tools",
                    sources = ?missing,
                    "Failed to fetch tool catalogs: {e}"
                );
            }
        }
    }
}
