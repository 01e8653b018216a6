//! End-to-end batch pipeline: collect → parse → infer kind → canonicalise
//! → validate → normalise → whitelist → enrich → derive links → check
//! referential integrity → compute `snapshot_etag` → upsert → prune →
//! build catalogs (spec.md §4.14).

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use bv_models::node::Edge;
use storage::GraphStore;

use crate::collect::{collect_batches, Batch};
use crate::error::IngestError;
use crate::links::{derive_and_check, observed_field_keys, relation_catalog, LinkedNode};
use crate::model::parse_record;
use crate::normalize::field_catalog;
use crate::schema::{build_record, Built};

#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub batches: usize,
    pub nodes_upserted: usize,
    pub edges_upserted: usize,
    pub nodes_removed: usize,
    pub edges_removed: usize,
    pub snapshot_etag: String,
    #[serde(skip)]
    pub field_catalog: Vec<String>,
    #[serde(skip)]
    pub relation_catalog: Vec<&'static str>,
}

struct Collected {
    nodes: Vec<LinkedNode>,
    transitions: Vec<Edge>,
    files: Vec<(PathBuf, Vec<u8>)>,
}

fn read_and_build(batch: &Batch, errors: &mut Vec<String>) -> Collected {
    let mut nodes = Vec::new();
    let mut transitions = Vec::new();
    let mut files = Vec::new();

    for path in &batch.files {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                errors.push(format!("{}: {e}", path.display()));
                continue;
            }
        };
        files.push((path.clone(), bytes.clone()));
        let text = match String::from_utf8(bytes) {
            Ok(t) => t,
            Err(e) => {
                errors.push(format!("{}: not valid UTF-8: {e}", path.display()));
                continue;
            }
        };
        let record = match parse_record(path.clone(), &text) {
            Ok(r) => r,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        match build_record(record, errors) {
            Some(Built::Node { node, refs }) => nodes.push(LinkedNode { node, refs }),
            Some(Built::Transition { edge }) => transitions.push(edge),
            None => {}
        }
    }

    Collected { nodes, transitions, files }
}

/// Runs the full ingest pipeline against `fixtures_dir`, writing to `store`.
pub async fn run(
    store: &dyn GraphStore,
    fixtures_dir: &Path,
) -> Result<IngestSummary, IngestError> {
    let batches = collect_batches(fixtures_dir)
        .map_err(|e| IngestError::Other(anyhow::anyhow!("{}: {e}", fixtures_dir.display())))?;
    if batches.is_empty() {
        return Err(IngestError::NoFixtures(fixtures_dir.display().to_string()));
    }

    let mut all_nodes = Vec::new();
    let mut all_transitions = Vec::new();
    let mut all_files: Vec<(PathBuf, Vec<u8>)> = Vec::new();
    let mut validation_errors = Vec::new();

    for batch in &batches {
        info!(batch = %batch.name, files = batch.files.len(), "reading batch");
        let collected = read_and_build(batch, &mut validation_errors);
        all_nodes.extend(collected.nodes);
        all_transitions.extend(collected.transitions);
        all_files.extend(collected.files);
    }

    if !validation_errors.is_empty() {
        return Err(IngestError::Validation(validation_errors));
    }

    let path_for = {
        let lookup: std::collections::BTreeMap<String, String> = all_nodes
            .iter()
            .map(|n| (n.node.id.clone(), n.node.domain.clone()))
            .collect();
        move |id: &str| lookup.get(id).cloned().unwrap_or_else(|| id.to_string())
    };

    let edges = derive_and_check(&all_nodes, &all_transitions, path_for)
        .map_err(IngestError::ReferentialIntegrity)?;

    all_files.sort_by(|a, b| a.0.cmp(&b.0));
    let etag = crate::etag::compute(&all_files);

    let mut nodes_upserted = 0usize;
    for linked in &all_nodes {
        let mut node = linked.node.clone();
        node.snapshot_etag = Some(etag.clone());
        store
            .upsert_node(&node)
            .await
            .map_err(|e| IngestError::Other(anyhow::anyhow!(e)))?;
        nodes_upserted += 1;
    }

    let mut edges_upserted = 0usize;
    for edge in &edges {
        store
            .upsert_edge(edge)
            .await
            .map_err(|e| IngestError::Other(anyhow::anyhow!(e)))?;
        edges_upserted += 1;
    }

    let (nodes_removed, edges_removed) = store
        .prune_stale(&etag)
        .await
        .map_err(|e| IngestError::Other(anyhow::anyhow!(e)))?;
    store
        .set_snapshot_etag(&etag)
        .await
        .map_err(|e| IngestError::Other(anyhow::anyhow!(e)))?;
    if nodes_removed > 0 {
        warn!(nodes_removed, edges_removed, "pruned stale nodes not present in this snapshot");
    }

    let fields = field_catalog(&observed_field_keys(&all_nodes));

    Ok(IngestSummary {
        batches: batches.len(),
        nodes_upserted,
        edges_upserted,
        nodes_removed,
        edges_removed,
        snapshot_etag: etag,
        field_catalog: fields,
        relation_catalog: relation_catalog(),
    })
}
