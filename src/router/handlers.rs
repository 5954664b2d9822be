use axum::{extract::State, Json};
use serde::Serialize;

use crate::importer::block_service::{ImportHandle, ImportState};

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusDto {
    pub state: ImportState,
    pub queue_depth: usize,
    pub imported: u64,
    pub last_hash: Option<String>,
    pub waiting_for_tip: bool,
    pub failed: bool,
}

impl From<&ImportHandle> for StatusDto {
    fn from(handle: &ImportHandle) -> Self {
        Self {
            state: handle.state(),
            queue_depth: handle.queue_depth(),
            imported: handle.imported(),
            last_hash: handle.last_hash(),
            waiting_for_tip: handle.has_retry_timer(),
            failed: handle.has_failed(),
        }
    }
}

pub async fn status(State(handle): State<ImportHandle>) -> Json<StatusDto> {
    Json(StatusDto::from(&handle))
}
