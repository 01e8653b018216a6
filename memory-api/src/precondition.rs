//! Snapshot precondition enforcement shared by every Memory endpoint
//! (spec.md I6, §4.5, §8 P7): the client's `X-Snapshot-ETag` header or
//! body field must equal the server's current snapshot, else 412.

use bv_common::error::{BvError, PreconditionSubkind};
use storage::GraphStore;

/// `body_etag` (the request's own `snapshot_etag` field, when the wire
/// shape carries one) takes precedence over the header, matching the
/// spec's "body `snapshot_etag` or header" phrasing.
pub async fn enforce(
    graph: &dyn GraphStore,
    header_etag: Option<&str>,
    body_etag: Option<&str>,
) -> Result<String, BvError> {
    let current = graph.get_snapshot_etag().await?;
    let Some(current) = current else {
        return Err(BvError::Precondition {
            subkind: PreconditionSubkind::NoSnapshot,
        });
    };

    let presented = body_etag
        .filter(|s| !s.is_empty())
        .or_else(|| header_etag.filter(|s| !s.is_empty()));

    let Some(presented) = presented else {
        return Err(BvError::Precondition {
            subkind: PreconditionSubkind::Missing,
        });
    };

    if presented != current {
        return Err(BvError::Precondition {
            subkind: PreconditionSubkind::Mismatch,
        });
    }

    Ok(current)
}
