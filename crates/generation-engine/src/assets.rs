//! Upload of locally held images
//!
//! Before compiling, every ancestor carrying image data without a stable
//! remote identifier gets one upload. Uploads run concurrently and are all
//! awaited. Each success is written back to its node as soon as it lands, so
//! when a sibling fails the cycle fails but the finished uploads are kept and
//! a retry skips them.

use futures_util::future::join_all;
use serde_json::{json, Map};

use crate::error::{EngineError, Result};
use crate::graph::GraphHost;
use crate::service::GenerationService;
use crate::types::{attrs, GraphNode, NodeId};

/// Attribute triple describing one uploadable image on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSlot {
    pub data_key: &'static str,
    pub id_key: &'static str,
    pub url_key: &'static str,
}

/// The node's main image
pub const IMAGE_SLOT: UploadSlot = UploadSlot {
    data_key: attrs::IMAGE_DATA,
    id_key: attrs::IMAGE_ID,
    url_key: attrs::IMAGE_URL,
};

/// An inpainting mask
pub const MASK_SLOT: UploadSlot = UploadSlot {
    data_key: attrs::MASK_DATA,
    id_key: attrs::MASK_ID,
    url_key: attrs::MASK_URL,
};

/// One image waiting to be uploaded
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub node_id: NodeId,
    pub slot: UploadSlot,
    pub data: String,
}

/// Find every slot holding local data but no remote identifier
pub fn pending_uploads(nodes: &[GraphNode]) -> Vec<PendingUpload> {
    nodes
        .iter()
        .flat_map(|node| {
            [IMAGE_SLOT, MASK_SLOT].into_iter().filter_map(move |slot| {
                if node.str_attr(slot.id_key).is_some() {
                    return None;
                }
                node.str_attr(slot.data_key).map(|data| PendingUpload {
                    node_id: node.id.clone(),
                    slot,
                    data: data.to_string(),
                })
            })
        })
        .collect()
}

/// Upload all pending images of `nodes`, writing identifiers back through
/// `graph`.
///
/// Returns the number of uploads performed.
///
/// A failing upload does not cut its siblings short: the error is reported
/// only once every upload has settled, so the caller waits for the slowest
/// one. When several fail, the first in node order is returned.
pub async fn resolve_assets(
    graph: &dyn GraphHost,
    service: &dyn GenerationService,
    nodes: &[GraphNode],
) -> Result<usize> {
    let pending = pending_uploads(nodes);
    if pending.is_empty() {
        return Ok(0);
    }
    log::debug!("Uploading {} local images", pending.len());

    let uploads = pending.iter().map(|upload| async move {
        let uploaded = service
            .upload_image(&upload.data)
            .await
            .map_err(|source| {
                log::warn!("Upload for node '{}' failed: {}", upload.node_id, source);
                EngineError::Upload {
                    node_id: upload.node_id.clone(),
                    source,
                }
            })?;

        let mut patch = Map::new();
        patch.insert(upload.slot.id_key.to_string(), json!(uploaded.id));
        patch.insert(upload.slot.url_key.to_string(), json!(uploaded.url));
        graph.update_node_data(&upload.node_id, patch);
        log::debug!("Uploaded image for node '{}' as '{}'", upload.node_id, uploaded.id);
        Ok::<(), EngineError>(())
    });

    let results = join_all(uploads).await;
    let count = results.len();
    results.into_iter().collect::<Result<Vec<()>>>()?;
    Ok(count)
}
