//! `GraphStore`: node/edge persistence, adjacency, text resolution and
//! snapshot lifecycle (spec.md §4.3 "Graph access"), layered over
//! `StorageBackend` the way the teacher's `StorageManager` layers typed
//! JSON access over raw bytes.

use std::sync::Arc;

use bv_common::error::BvError;
use bv_common::ids::anchor_to_storage_key;
use bv_models::node::{Edge, Node};

use crate::bm25::{bm25_rank, tokenize, Document};
use crate::kv::{StorageBackend, StorageError};

const NODE_PREFIX: &str = "node/";
const ADJ_PREFIX: &str = "adj/";
const SNAPSHOT_ETAG_KEY: &str = "meta/snapshot_etag";

fn node_key(storage_key: &str) -> String {
    format!("{NODE_PREFIX}{storage_key}")
}

fn adj_key(storage_key: &str) -> String {
    format!("{ADJ_PREFIX}{storage_key}")
}

fn to_bv_error(e: StorageError) -> BvError {
    match e {
        StorageError::KeyNotFound(k) => BvError::NotFound(k),
        other => BvError::StorageUnavailable(other.to_string()),
    }
}

/// One hop of `next_decisions_from_event` (spec.md §4.3): the decision
/// reached plus the edge that reached it, kept together so the alias tail
/// (§4.7) can emit `{type, from, to, timestamp}` wire edges without a
/// second lookup.
#[derive(Debug, Clone)]
pub struct NextDecision {
    pub id: String,
    pub title: String,
    pub domain: String,
    pub timestamp: String,
    pub edge_kind: bv_models::node::EdgeType,
    pub edge_timestamp: Option<String>,
}

#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    async fn get_node(&self, anchor_id: &str) -> Result<Option<Node>, BvError>;
    async fn get_edges_adjacent(&self, anchor_id: &str) -> Result<Vec<Edge>, BvError>;

    /// Outbound LED_TO/CAUSAL edges from `event_anchor`, restricted to the
    /// event's own domain, capped to `limit`, ordered by `(edge.timestamp
    /// desc, decision.timestamp desc, decision.id asc)` (spec §4.3, §4.7).
    async fn next_decisions_from_event(
        &self,
        event_anchor: &str,
        limit: usize,
    ) -> Result<Vec<NextDecision>, BvError>;
    /// BM25 over title+description, or brute-force vector cosine when
    /// `query_vector` is given and at least one scoped node carries an
    /// `embedding` (spec §4.3, §4.5 `resolve/text`). Returns
    /// `(matches, vector_used)`.
    async fn resolve_text(
        &self,
        query: &str,
        domain_scopes: &[String],
        limit: usize,
        query_vector: Option<&[f64]>,
    ) -> Result<(Vec<(String, f64)>, bool), BvError>;

    async fn get_snapshot_etag(&self) -> Result<Option<String>, BvError>;
    async fn set_snapshot_etag(&self, etag: &str) -> Result<(), BvError>;

    async fn upsert_node(&self, node: &Node) -> Result<(), BvError>;
    async fn upsert_edge(&self, edge: &Edge) -> Result<(), BvError>;

    /// Delete every node whose `snapshot_etag` no longer matches
    /// `current_etag`, along with every edge incident to a pruned node
    /// (both the stale node's own adjacency entries and the dangling
    /// references left behind on its surviving neighbours), returning
    /// `(nodes_removed, edges_removed)` (spec §4.14 "upsert-then-prune";
    /// §4.3 `prune_stale(etag)`).
    async fn prune_stale(&self, current_etag: &str) -> Result<(usize, usize), BvError>;

    async fn list_all_nodes(&self) -> Result<Vec<Node>, BvError>;
}

/// Generic implementation over any `StorageBackend`; `SledGraphStore` and
/// `MemoryGraphStore` are thin aliases around this with their concrete
/// backend, matching the teacher's `StorageManager<T>` pattern.
pub struct BackendGraphStore<T: StorageBackend> {
    backend: Arc<T>,
}

impl<T: StorageBackend> BackendGraphStore<T> {
    pub fn new(backend: T) -> Self {
        BackendGraphStore {
            backend: Arc::new(backend),
        }
    }

    async fn edges_for(&self, storage_key: &str) -> Result<Vec<Edge>, BvError> {
        let raw = self
            .backend
            .get(&adj_key(storage_key))
            .await
            .map_err(to_bv_error)?;
        let Some(bytes) = raw else { return Ok(Vec::new()) };
        serde_json::from_slice::<Vec<Edge>>(&bytes).map_err(BvError::serialization)
    }

    async fn append_edge_to_adjacency(&self, storage_key: &str, edge: &Edge) -> Result<(), BvError> {
        let mut edges = self.edges_for(storage_key).await?;
        let new_id = edge.id()?;
        if !edges
            .iter()
            .any(|e| e.id().map(|id| id == new_id).unwrap_or(false))
        {
            edges.push(edge.clone());
        }
        let bytes = serde_json::to_vec(&edges).map_err(BvError::serialization)?;
        self.backend
            .put(&adj_key(storage_key), bytes)
            .await
            .map_err(to_bv_error)
    }
}

#[async_trait::async_trait]
impl<T: StorageBackend> GraphStore for BackendGraphStore<T> {
    async fn get_node(&self, anchor_id: &str) -> Result<Option<Node>, BvError> {
        let key = anchor_to_storage_key(anchor_id)?;
        let raw = self.backend.get(&node_key(&key)).await.map_err(to_bv_error)?;
        match raw {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(BvError::serialization)?,
            )),
            None => Ok(None),
        }
    }

    async fn get_edges_adjacent(&self, anchor_id: &str) -> Result<Vec<Edge>, BvError> {
        let key = anchor_to_storage_key(anchor_id)?;
        self.edges_for(&key).await
    }

    async fn next_decisions_from_event(
        &self,
        event_anchor: &str,
        limit: usize,
    ) -> Result<Vec<NextDecision>, BvError> {
        let Some(event) = self.get_node(event_anchor).await? else {
            return Ok(Vec::new());
        };
        let edges = self.get_edges_adjacent(event_anchor).await?;
        let mut hits = Vec::new();
        for edge in edges {
            if edge.from != event_anchor || !edge.kind.is_causal_kind() {
                continue;
            }
            let Some(decision) = self.get_node(&edge.to).await? else {
                continue;
            };
            if decision.domain != event.domain {
                continue;
            }
            hits.push(NextDecision {
                id: decision.id,
                title: decision.title,
                domain: decision.domain,
                timestamp: decision.timestamp,
                edge_kind: edge.kind,
                edge_timestamp: edge.timestamp,
            });
        }
        // Three stable sorts, least- to most-significant key, so ties at
        // each stage fall back to the previous stage's order (spec §4.3:
        // edge.ts desc, decision.ts desc, decision.id asc).
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        hits.sort_by(|a, b| b.edge_timestamp.cmp(&a.edge_timestamp));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn resolve_text(
        &self,
        query: &str,
        domain_scopes: &[String],
        limit: usize,
        query_vector: Option<&[f64]>,
    ) -> Result<(Vec<(String, f64)>, bool), BvError> {
        if bv_common::ids::is_valid_anchor(query) {
            if let Some(node) = self.get_node(query).await? {
                return Ok((vec![(node.id, 1.0)], false));
            }
        }

        let nodes = self.list_all_nodes().await?;
        let scoped: Vec<&Node> = nodes
            .iter()
            .filter(|n| domain_scopes.is_empty() || domain_scopes.iter().any(|s| {
                s.strip_suffix("/*")
                    .map(|p| n.domain == p || n.domain.starts_with(&format!("{p}/")))
                    .unwrap_or(n.domain == *s)
            }))
            .collect();

        if let Some(qvec) = query_vector {
            let docs: Vec<(&str, &[f64])> = scoped
                .iter()
                .filter_map(|n| n.embedding.as_deref().map(|e| (n.id.as_str(), e)))
                .collect();
            if !docs.is_empty() {
                let mut ranked = crate::bm25::cosine_rank(qvec, &docs);
                ranked.truncate(limit.max(1));
                return Ok((ranked, true));
            }
        }

        let docs: Vec<Document> = scoped
            .iter()
            .map(|n| {
                let mut text = format!("{} {} ", n.title, n.description);
                text.push_str(&n.tags.join(" "));
                Document {
                    id: &n.id,
                    tokens: tokenize(&text),
                }
            })
            .collect();

        let mut ranked = bm25_rank(query, &docs);
        ranked.truncate(limit.max(1));
        Ok((ranked, false))
    }

    async fn get_snapshot_etag(&self) -> Result<Option<String>, BvError> {
        let raw = self
            .backend
            .get(SNAPSHOT_ETAG_KEY)
            .await
            .map_err(to_bv_error)?;
        Ok(raw.map(|b| String::from_utf8_lossy(&b).to_string()))
    }

    async fn set_snapshot_etag(&self, etag: &str) -> Result<(), BvError> {
        self.backend
            .put(SNAPSHOT_ETAG_KEY, etag.as_bytes().to_vec())
            .await
            .map_err(to_bv_error)
    }

    async fn upsert_node(&self, node: &Node) -> Result<(), BvError> {
        let key = node.storage_key()?;
        let bytes = serde_json::to_vec(node).map_err(BvError::serialization)?;
        self.backend
            .put(&node_key(&key), bytes)
            .await
            .map_err(to_bv_error)
    }

    async fn upsert_edge(&self, edge: &Edge) -> Result<(), BvError> {
        let from_key = anchor_to_storage_key(&edge.from)?;
        let to_key = anchor_to_storage_key(&edge.to)?;
        self.append_edge_to_adjacency(&from_key, edge).await?;
        self.append_edge_to_adjacency(&to_key, edge).await
    }

    async fn prune_stale(&self, current_etag: &str) -> Result<(usize, usize), BvError> {
        let keys = self
            .backend
            .list_keys(NODE_PREFIX)
            .await
            .map_err(to_bv_error)?;

        let mut stale_storage_keys = std::collections::HashSet::new();
        let mut survivor_storage_keys = Vec::new();
        for key in &keys {
            let Some(bytes) = self.backend.get(key).await.map_err(to_bv_error)? else {
                continue;
            };
            let node: Node = serde_json::from_slice(&bytes).map_err(BvError::serialization)?;
            let storage_key = key.trim_start_matches(NODE_PREFIX).to_string();
            let stale = node
                .snapshot_etag
                .as_deref()
                .map(|e| e != current_etag)
                .unwrap_or(true);
            if stale {
                stale_storage_keys.insert(storage_key);
            } else {
                survivor_storage_keys.push(storage_key);
            }
        }

        let mut edges_removed = std::collections::HashSet::new();

        for storage_key in &stale_storage_keys {
            for edge in self.edges_for(storage_key).await? {
                if let Ok(id) = edge.id() {
                    edges_removed.insert(id);
                }
            }
            self.backend
                .delete(&node_key(storage_key))
                .await
                .map_err(to_bv_error)?;
            self.backend
                .delete(&adj_key(storage_key))
                .await
                .map_err(to_bv_error)?;
        }

        // A surviving node's adjacency list may still reference a now-deleted
        // neighbour on the other end; drop those dangling entries too.
        for storage_key in &survivor_storage_keys {
            let edges = self.edges_for(storage_key).await?;
            let mut kept = Vec::with_capacity(edges.len());
            let mut changed = false;
            for edge in edges {
                let from_stale = anchor_to_storage_key(&edge.from)
                    .map(|k| stale_storage_keys.contains(&k))
                    .unwrap_or(false);
                let to_stale = anchor_to_storage_key(&edge.to)
                    .map(|k| stale_storage_keys.contains(&k))
                    .unwrap_or(false);
                if from_stale || to_stale {
                    if let Ok(id) = edge.id() {
                        edges_removed.insert(id);
                    }
                    changed = true;
                } else {
                    kept.push(edge);
                }
            }
            if changed {
                let bytes = serde_json::to_vec(&kept).map_err(BvError::serialization)?;
                self.backend
                    .put(&adj_key(storage_key), bytes)
                    .await
                    .map_err(to_bv_error)?;
            }
        }

        Ok((stale_storage_keys.len(), edges_removed.len()))
    }

    async fn list_all_nodes(&self) -> Result<Vec<Node>, BvError> {
        let keys = self
            .backend
            .list_keys(NODE_PREFIX)
            .await
            .map_err(to_bv_error)?;
        let mut nodes = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = self.backend.get(&key).await.map_err(to_bv_error)? {
                nodes.push(serde_json::from_slice(&bytes).map_err(BvError::serialization)?);
            }
        }
        Ok(nodes)
    }
}

pub type MemoryGraphStore = BackendGraphStore<crate::kv::MemoryStorage>;
pub type SledGraphStore = BackendGraphStore<crate::kv::SledStorage>;

impl MemoryGraphStore {
    pub fn new_in_memory() -> Self {
        BackendGraphStore::new(crate::kv::MemoryStorage::new())
    }
}

impl SledGraphStore {
    pub fn open_path(path: &str) -> Result<Self, BvError> {
        let backend = crate::kv::SledStorage::open(path).map_err(to_bv_error)?;
        Ok(BackendGraphStore::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_models::node::{EdgeType, NodeKind, Sensitivity};

    fn node(id: &str, domain: &str, title: &str, description: &str) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Decision,
            domain: domain.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            tags: vec![],
            x_extra: Default::default(),
            decision_maker: None,
            sensitivity: Sensitivity::Low,
            namespaces: vec![],
            roles_allowed: vec![],
            embedding: None,
            snapshot_etag: Some("snap-1".into()),
        }
    }

    #[tokio::test]
    async fn upsert_and_get_node_roundtrips() {
        let store = MemoryGraphStore::new_in_memory();
        let n = node("eng#d-1", "eng", "Adopt gRPC", "latency reasons");
        store.upsert_node(&n).await.unwrap();
        let fetched = store.get_node("eng#d-1").await.unwrap().unwrap();
        assert_eq!(fetched.title, "Adopt gRPC");
    }

    fn event(id: &str, domain: &str) -> Node {
        Node {
            kind: NodeKind::Event,
            ..node(id, domain, "Price drop", "observed in market")
        }
    }

    #[tokio::test]
    async fn next_decisions_from_event_follows_causal_kind_edges_in_domain() {
        let store = MemoryGraphStore::new_in_memory();
        store.upsert_node(&event("eng#e-1", "eng")).await.unwrap();
        store.upsert_node(&node("eng#d-1", "eng", "Adopt gRPC", "latency")).await.unwrap();
        store.upsert_node(&node("hr#d-1", "hr", "Hire more", "growth")).await.unwrap();
        store
            .upsert_edge(&Edge {
                kind: EdgeType::LedTo,
                from: "eng#e-1".into(),
                to: "eng#d-1".into(),
                timestamp: Some("2026-01-02T00:00:00Z".into()),
                domain: None,
            })
            .await
            .unwrap();
        // Out-of-domain target must not appear even though the edge exists.
        store
            .upsert_edge(&Edge {
                kind: EdgeType::Causal,
                from: "eng#e-1".into(),
                to: "hr#d-1".into(),
                timestamp: Some("2026-01-03T00:00:00Z".into()),
                domain: None,
            })
            .await
            .unwrap();
        let decisions = store.next_decisions_from_event("eng#e-1", 3).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].id, "eng#d-1");
    }

    #[tokio::test]
    async fn next_decisions_from_event_caps_to_limit() {
        let store = MemoryGraphStore::new_in_memory();
        store.upsert_node(&event("eng#e-1", "eng")).await.unwrap();
        for i in 1..=5 {
            let id = format!("eng#d-{i}");
            store.upsert_node(&node(&id, "eng", "title", "desc")).await.unwrap();
            store
                .upsert_edge(&Edge {
                    kind: EdgeType::LedTo,
                    from: "eng#e-1".into(),
                    to: id,
                    timestamp: Some(format!("2026-01-0{i}T00:00:00Z")),
                    domain: None,
                })
                .await
                .unwrap();
        }
        let decisions = store.next_decisions_from_event("eng#e-1", 3).await.unwrap();
        assert_eq!(decisions.len(), 3);
        // edge.ts desc: d-5, d-4, d-3
        assert_eq!(decisions[0].id, "eng#d-5");
        assert_eq!(decisions[2].id, "eng#d-3");
    }

    #[tokio::test]
    async fn resolve_text_ranks_by_bm25_and_respects_domain_scope() {
        let store = MemoryGraphStore::new_in_memory();
        store
            .upsert_node(&node("eng#d-1", "eng", "Adopt gRPC", "latency across services"))
            .await
            .unwrap();
        store
            .upsert_node(&node("hr#d-1", "hr", "Adopt gRPC policy", "unrelated hr text"))
            .await
            .unwrap();
        let (results, vector_used) = store
            .resolve_text("grpc latency", &["eng/*".to_string()], 5, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "eng#d-1");
        assert!(!vector_used);
    }

    #[tokio::test]
    async fn resolve_text_uses_vector_cosine_when_embeddings_present() {
        let store = MemoryGraphStore::new_in_memory();
        let mut a = node("eng#d-1", "eng", "Adopt gRPC", "latency across services");
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = node("eng#d-2", "eng", "Adopt REST", "billing services");
        b.embedding = Some(vec![0.0, 1.0]);
        store.upsert_node(&a).await.unwrap();
        store.upsert_node(&b).await.unwrap();

        let (results, vector_used) = store
            .resolve_text("irrelevant text", &[], 5, Some(&[1.0, 0.1]))
            .await
            .unwrap();
        assert!(vector_used);
        assert_eq!(results.first().unwrap().0, "eng#d-1");
    }

    #[tokio::test]
    async fn resolve_text_falls_back_to_bm25_when_no_embeddings_present() {
        let store = MemoryGraphStore::new_in_memory();
        store
            .upsert_node(&node("eng#d-1", "eng", "Adopt gRPC", "latency across services"))
            .await
            .unwrap();
        let (results, vector_used) = store
            .resolve_text("grpc latency", &[], 5, Some(&[1.0, 0.1]))
            .await
            .unwrap();
        assert!(!vector_used);
        assert_eq!(results.first().unwrap().0, "eng#d-1");
    }

    #[tokio::test]
    async fn prune_stale_removes_nodes_with_old_etag() {
        let store = MemoryGraphStore::new_in_memory();
        store
            .upsert_node(&node("eng#d-1", "eng", "Adopt gRPC", "latency"))
            .await
            .unwrap();
        let (pruned, edges_removed) = store.prune_stale("snap-2").await.unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(edges_removed, 0);
        assert!(store.get_node("eng#d-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prune_stale_drops_edges_incident_to_pruned_nodes_on_both_sides() {
        let store = MemoryGraphStore::new_in_memory();
        store.upsert_node(&event("eng#e-1", "eng")).await.unwrap();
        store.upsert_node(&node("eng#d-1", "eng", "Adopt gRPC", "latency")).await.unwrap();
        store
            .upsert_edge(&Edge {
                kind: EdgeType::LedTo,
                from: "eng#e-1".into(),
                to: "eng#d-1".into(),
                timestamp: Some("2026-01-02T00:00:00Z".into()),
                domain: None,
            })
            .await
            .unwrap();
        // Mark only the event stale by re-upserting the decision under the new etag.
        let mut fresh_decision = node("eng#d-1", "eng", "Adopt gRPC", "latency");
        fresh_decision.snapshot_etag = Some("snap-2".into());
        store.upsert_node(&fresh_decision).await.unwrap();

        let (pruned, edges_removed) = store.prune_stale("snap-2").await.unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(edges_removed, 1);
        assert!(store.get_node("eng#e-1").await.unwrap().is_none());
        let remaining_edges = store.get_edges_adjacent("eng#d-1").await.unwrap();
        assert!(remaining_edges.is_empty());
    }
}
