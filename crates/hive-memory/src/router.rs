//! Query router for the hybrid memory system.
//!
//! Dispatches a logical query across the registered adapters using one of
//! five strategies: direct, cross-store, cascading, federated, and
//! context-aware. The router is stateless beyond its reference to the
//! coordinator; every record it returns carries the name of the adapter
//! that produced it in `source`.

use std::collections::BTreeMap;

use futures::future::join_all;
use hive_core::{
    cosine_similarity, deduplicate_records, embedding_from_metadata, query_results_from_records,
    GroupedMemoryResults, HiveResult, MemoryQueryResults, MemoryRecord, MemoryStore, SearchQuery,
    VectorStore,
};

use crate::coordinator::MemoryCoordinator;

/// Default adapter order for cascading queries: document, relational,
/// vector, graph. Unregistered names are skipped.
const CASCADE_ORDER: [&str; 4] = ["json", "sqlite", "vector", "graph"];

/// Default result width for vector-backed direct queries
const DEFAULT_TOP_K: usize = 5;

/// Strategy selector for [`QueryRouter::route`]
#[derive(Debug, Clone)]
pub enum QueryStrategy {
    Direct { store: String },
    Cross { stores: Option<Vec<String>> },
    Cascading { order: Option<Vec<String>> },
    Federated,
    ContextAware {
        context: BTreeMap<String, String>,
        store: Option<String>,
    },
}

/// Response shape, varying with the strategy
#[derive(Debug, Clone)]
pub enum RouteResponse {
    Single(MemoryQueryResults),
    Grouped(GroupedMemoryResults),
    Records(Vec<MemoryRecord>),
}

/// Stateless strategy dispatcher
pub struct QueryRouter<'a> {
    coordinator: &'a MemoryCoordinator,
}

impl<'a> QueryRouter<'a> {
    pub fn new(coordinator: &'a MemoryCoordinator) -> Self {
        Self { coordinator }
    }

    /// Query a single store and return normalized results.
    ///
    /// The registry name wins over whatever source tag the adapter itself
    /// emitted, so every returned record names a registered adapter.
    pub async fn direct_query(&self, query: &str, store: &str) -> HiveResult<MemoryQueryResults> {
        let store = store.to_lowercase();
        let Some(entry) = self.coordinator.registry().get(&store) else {
            tracing::warn!(store = %store, "adapter not found");
            return Ok(query_results_from_records(&store, Vec::new()));
        };

        let records = if let Some(memory) = entry.memory() {
            memory.search(&SearchQuery::content(query)).await?
        } else if let Some(vector) = entry.vector() {
            let embedding = self.coordinator.embed_text(query);
            vector.similarity_search(&embedding, DEFAULT_TOP_K).await?
        } else {
            tracing::warn!(store = %store, "adapter supports no direct query surface");
            Vec::new()
        };

        let mut results = query_results_from_records(&store, records);
        for record in &mut results.records {
            record.source = Some(store.clone());
        }
        Ok(results)
    }

    /// Query several stores concurrently and group the results
    pub async fn cross_store_query(
        &self,
        query: &str,
        stores: Option<&[&str]>,
    ) -> HiveResult<GroupedMemoryResults> {
        let selected: Vec<String> = match stores {
            Some(names) => names.iter().map(|name| name.to_lowercase()).collect(),
            None => self
                .coordinator
                .registry()
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        };

        let futures = selected.iter().map(|store| {
            let store = store.clone();
            async move {
                let results = self.direct_query(query, &store).await;
                (store, results)
            }
        });

        let mut by_store = BTreeMap::new();
        for (store, results) in join_all(futures).await {
            match results {
                Ok(results) => {
                    by_store.insert(store, results);
                }
                Err(error) => {
                    tracing::warn!(store = %store, error = %error, "cross-store query leg failed");
                }
            }
        }

        Ok(GroupedMemoryResults {
            by_store,
            combined: None,
            query: Some(query.to_string()),
            metadata: None,
        })
    }

    /// Query stores sequentially, concatenating unique records
    pub async fn cascading_query(
        &self,
        query: &str,
        order: Option<&[&str]>,
    ) -> HiveResult<Vec<MemoryRecord>> {
        let order: Vec<&str> = match order {
            Some(order) => order.to_vec(),
            None => CASCADE_ORDER.to_vec(),
        };

        let mut collected = Vec::new();
        for store in order {
            if !self.coordinator.registry().contains(store) {
                continue;
            }
            let results = self.direct_query(query, store).await?;
            collected.extend(results.records);
        }
        Ok(deduplicate_records(collected))
    }

    fn record_embedding(&self, record: &MemoryRecord) -> Vec<f32> {
        embedding_from_metadata(&record.item.metadata)
            .or_else(|| embedding_from_metadata(&record.metadata))
            .unwrap_or_else(|| self.coordinator.embed_text(&record.item.content_text()))
    }

    /// Aggregate results from every store and rerank by cosine similarity
    /// against the query embedding, descending
    pub async fn federated_query(&self, query: &str) -> HiveResult<Vec<MemoryRecord>> {
        let grouped = self.cross_store_query(query, None).await?;
        let unique = deduplicate_records(grouped.all_records());

        let query_embedding = self.coordinator.embed_text(query);
        let mut scored: Vec<(f32, MemoryRecord)> = unique
            .into_iter()
            .map(|record| {
                let similarity =
                    cosine_similarity(&query_embedding, &self.record_embedding(&record));
                (similarity, record)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .map(|(similarity, mut record)| {
                record.similarity = Some(similarity);
                record
            })
            .collect())
    }

    /// Prefix the query with `key:value` pairs from the context, then
    /// delegate to direct or cross-store
    pub async fn context_aware_query(
        &self,
        query: &str,
        context: &BTreeMap<String, String>,
        store: Option<&str>,
    ) -> HiveResult<RouteResponse> {
        let context_str = context
            .iter()
            .map(|(key, value)| format!("{key}:{value}"))
            .collect::<Vec<_>>()
            .join(" ");
        let enhanced = format!("{query} {context_str}");
        let enhanced = enhanced.trim();

        match store {
            Some(store) => Ok(RouteResponse::Single(
                self.direct_query(enhanced, store).await?,
            )),
            None => Ok(RouteResponse::Grouped(
                self.cross_store_query(enhanced, None).await?,
            )),
        }
    }

    /// Route a query according to `strategy`
    pub async fn route(&self, query: &str, strategy: QueryStrategy) -> HiveResult<RouteResponse> {
        match strategy {
            QueryStrategy::Direct { store } => Ok(RouteResponse::Single(
                self.direct_query(query, &store).await?,
            )),
            QueryStrategy::Cross { stores } => {
                let refs: Option<Vec<&str>> = stores
                    .as_ref()
                    .map(|names| names.iter().map(String::as_str).collect());
                Ok(RouteResponse::Grouped(
                    self.cross_store_query(query, refs.as_deref()).await?,
                ))
            }
            QueryStrategy::Cascading { order } => {
                let refs: Option<Vec<&str>> = order
                    .as_ref()
                    .map(|names| names.iter().map(String::as_str).collect());
                Ok(RouteResponse::Records(
                    self.cascading_query(query, refs.as_deref()).await?,
                ))
            }
            QueryStrategy::Federated => {
                Ok(RouteResponse::Records(self.federated_query(query).await?))
            }
            QueryStrategy::ContextAware { context, store } => {
                self.context_aware_query(query, &context, store.as_deref())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::adapters::vector::VectorMemoryAdapter;
    use hive_core::{MemoryItem, MemoryType, MemoryVector, MetricsRegistry, VectorStore};
    use serde_json::json;
    use std::sync::Arc;

    async fn coordinator() -> MemoryCoordinator {
        let metrics = MetricsRegistry::new();
        let json_store = Arc::new(InMemoryStore::new(metrics.clone()));
        let graph_store = Arc::new(InMemoryStore::new(metrics.clone()));
        let vectors = Arc::new(VectorMemoryAdapter::new(metrics.clone()));

        let coordinator = MemoryCoordinator::builder()
            .metrics(metrics)
            .register(json_store.clone().register_as("json"))
            .unwrap()
            .register(graph_store.clone().register_as("graph"))
            .unwrap()
            .register(vectors.clone().register_as("vector"))
            .unwrap()
            .build();

        coordinator
            .update_item(
                "json",
                MemoryItem::new("doc-1", json!("release notes draft v2"), MemoryType::Working),
            )
            .await
            .unwrap();
        coordinator
            .update_item(
                "graph",
                MemoryItem::new("doc-1", json!("release notes draft v2"), MemoryType::Working),
            )
            .await
            .unwrap();
        coordinator
            .update_item(
                "graph",
                MemoryItem::new("doc-2", json!("meeting summary"), MemoryType::Working),
            )
            .await
            .unwrap();

        let embedding = coordinator.embed_text("release notes draft");
        vectors
            .store_vector(MemoryVector::new("vec-1", embedding).with_content("release notes draft"))
            .await
            .unwrap();

        coordinator
    }

    #[tokio::test]
    async fn direct_query_tags_sources() {
        let coordinator = coordinator().await;
        let router = QueryRouter::new(&coordinator);
        let results = router.direct_query("release", "json").await.unwrap();
        assert_eq!(results.store, "json");
        assert_eq!(results.records.len(), 1);
        assert_eq!(results.records[0].source.as_deref(), Some("json"));
    }

    #[tokio::test]
    async fn direct_query_on_unknown_store_is_empty() {
        let coordinator = coordinator().await;
        let router = QueryRouter::new(&coordinator);
        let results = router.direct_query("anything", "bogus").await.unwrap();
        assert!(results.records.is_empty());
    }

    #[tokio::test]
    async fn cross_store_groups_by_store() {
        let coordinator = coordinator().await;
        let router = QueryRouter::new(&coordinator);
        let grouped = router.cross_store_query("release", None).await.unwrap();
        assert!(grouped.by_store.contains_key("json"));
        assert!(grouped.by_store.contains_key("graph"));
        assert_eq!(grouped.query.as_deref(), Some("release"));
        for (store, results) in &grouped.by_store {
            for record in &results.records {
                assert_eq!(record.source.as_deref(), Some(store.as_str()));
            }
        }
    }

    #[tokio::test]
    async fn cascading_deduplicates_by_source_and_id() {
        let coordinator = coordinator().await;
        let router = QueryRouter::new(&coordinator);
        let records = router
            .cascading_query("release", Some(&["json", "graph", "json"]))
            .await
            .unwrap();
        // doc-1 appears in both stores but with distinct sources; the
        // duplicate json leg collapses
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn federated_orders_by_cosine_descending() {
        let coordinator = coordinator().await;
        let router = QueryRouter::new(&coordinator);
        let records = router.federated_query("release notes draft").await.unwrap();
        assert!(!records.is_empty());
        let similarities: Vec<f32> = records
            .iter()
            .map(|record| record.similarity.unwrap())
            .collect();
        for pair in similarities.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        // The stored vector embeds the query text exactly, so it ranks first
        assert_eq!(records[0].item.id, "vec-1");
    }

    #[tokio::test]
    async fn context_aware_prefixes_pairs() {
        let coordinator = coordinator().await;
        let router = QueryRouter::new(&coordinator);
        let mut context = BTreeMap::new();
        context.insert("project".to_string(), "release".to_string());

        let response = router
            .context_aware_query("notes", &context, Some("json"))
            .await
            .unwrap();
        match response {
            RouteResponse::Single(results) => assert_eq!(results.store, "json"),
            _ => panic!("expected single-store response"),
        }
    }

    #[tokio::test]
    async fn route_dispatches_all_strategies() {
        let coordinator = coordinator().await;
        let router = QueryRouter::new(&coordinator);

        assert!(matches!(
            router
                .route(
                    "release",
                    QueryStrategy::Direct {
                        store: "json".into()
                    }
                )
                .await
                .unwrap(),
            RouteResponse::Single(_)
        ));
        assert!(matches!(
            router
                .route("release", QueryStrategy::Cross { stores: None })
                .await
                .unwrap(),
            RouteResponse::Grouped(_)
        ));
        assert!(matches!(
            router
                .route("release", QueryStrategy::Cascading { order: None })
                .await
                .unwrap(),
            RouteResponse::Records(_)
        ));
        assert!(matches!(
            router
                .route("release", QueryStrategy::Federated)
                .await
                .unwrap(),
            RouteResponse::Records(_)
        ));
    }
}
