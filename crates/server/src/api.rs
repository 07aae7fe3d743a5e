//! REST API endpoints for run management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use orchestrator::{
    ExecutionMode, JobError, JobStatus, RunOutcome, RunSummary, Scene, SceneConfig, SceneEstimate,
    SetupError,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::state::{AppState, RunRecord};

/// Handler error: status code plus message
pub type ApiError = (StatusCode, String);

// ---------------------------------------------------------------------------
// Request/Response Types
// ---------------------------------------------------------------------------

/// Request body for submitting a run. Exactly one field must be set.
#[derive(Debug, Default, Deserialize)]
pub struct CreateRunRequest {
    /// Scene file name in the configs directory, without `.json`
    #[serde(default)]
    pub scene: Option<String>,
    /// Inline scene
    #[serde(default)]
    pub config: Option<SceneConfig>,
}

/// Response for run submission
#[derive(Debug, Serialize)]
pub struct CreateRunResponse {
    /// Run ID
    pub run_id: Uuid,
    /// Where the run executes
    pub mode: ExecutionMode,
    /// Size estimate behind the mode choice
    pub estimate: SceneEstimate,
    /// WebSocket URL for progress
    pub ws_url: String,
    /// Frames produced (immediate runs)
    pub frames: Option<usize>,
    /// Final summary (immediate runs)
    pub summary: Option<RunSummary>,
}

/// Scene file metadata
#[derive(Debug, Serialize)]
pub struct SceneInfo {
    /// File stem, used to submit it
    pub file: String,
    /// Scene name from the file
    pub name: String,
    /// Working timestep
    pub dt: f64,
    /// Steps for the full duration
    pub total_steps: u64,
    /// Size estimate
    pub estimate: SceneEstimate,
}

/// List of available scenes
#[derive(Debug, Serialize)]
pub struct SceneListResponse {
    /// Scenes that assembled
    pub scenes: Vec<SceneInfo>,
}

/// Run status response
#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    /// Run ID
    pub run_id: Uuid,
    /// Where the run executes
    pub mode: ExecutionMode,
    /// Current status
    pub status: JobStatus,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn scene_path(state: &AppState, name: &str) -> PathBuf {
    // Strip path components so names cannot leave the configs directory.
    let safe_name = name.replace("..", "").replace(['/', '\\'], "");
    state.configs_dir.join(format!("{safe_name}.json"))
}

fn setup_error(e: SetupError) -> ApiError {
    let code = match e {
        SetupError::Io { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    (code, e.to_string())
}

fn job_error(e: JobError) -> ApiError {
    let code = match &e {
        JobError::Setup(_) => StatusCode::BAD_REQUEST,
        JobError::ResourceExhausted { .. } => StatusCode::INSUFFICIENT_STORAGE,
        JobError::Dispatch { .. } => StatusCode::SERVICE_UNAVAILABLE,
        JobError::Run(_) | JobError::WorkerPanic(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, e.to_string())
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid run id '{id}'")))
}

// ---------------------------------------------------------------------------
// API Handlers
// ---------------------------------------------------------------------------

/// GET /api/scenes - List scene files that assemble
pub async fn list_scenes(State(state): State<Arc<AppState>>) -> Result<Json<SceneListResponse>, ApiError> {
    let entries = std::fs::read_dir(&state.configs_dir).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to read configs directory: {e}"),
        )
    })?;

    let mut scenes = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match Scene::load(&path) {
            Ok(scene) => scenes.push(SceneInfo {
                file: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                name: scene.name().to_string(),
                dt: scene.dt(),
                total_steps: scene.total_steps(),
                estimate: scene.estimate(),
            }),
            Err(e) => {
                tracing::warn!("Skipping scene {:?}: {}", path, e);
            }
        }
    }
    scenes.sort_by(|a, b| a.file.cmp(&b.file));

    Ok(Json(SceneListResponse { scenes }))
}

/// POST /api/runs - Submit a scene
///
/// Immediate runs complete before the response is sent.
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRunRequest>,
) -> Result<Json<CreateRunResponse>, ApiError> {
    let scene = match (req.scene, req.config) {
        (Some(name), None) => Scene::load(scene_path(&state, &name)).map_err(setup_error)?,
        (None, Some(config)) => {
            Scene::assemble(&config, &state.configs_dir).map_err(setup_error)?
        }
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                "Exactly one of 'scene' or 'config' is required".to_string(),
            ))
        }
    };

    let scheduler = Arc::clone(&state.scheduler);
    let handle = tokio::task::spawn_blocking(move || scheduler.submit(scene))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Run task failed: {e}")))?
        .map_err(job_error)?;

    let (record, frames, summary) = match handle.outcome {
        RunOutcome::Immediate { summary, frames } => {
            let count = frames.len();
            (
                RunRecord::Immediate {
                    summary: summary.clone(),
                    frames: count,
                },
                Some(count),
                Some(summary),
            )
        }
        RunOutcome::Queued(job) => (RunRecord::Queued(job), None, None),
    };
    state.runs().insert(handle.id, record);

    tracing::info!("Run {} submitted in {:?} mode", handle.id, handle.mode);

    Ok(Json(CreateRunResponse {
        run_id: handle.id,
        mode: handle.mode,
        estimate: handle.estimate,
        ws_url: format!("ws://localhost:{}/ws/runs/{}", state.port, handle.id),
        frames,
        summary,
    }))
}

/// GET /api/runs/{id} - Get run status
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    let run_id = parse_id(&id)?;
    let runs = state.runs();
    let record = runs
        .get(&run_id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Run '{id}' not found")))?;

    Ok(Json(RunStatusResponse {
        run_id,
        mode: record.mode(),
        status: record.status(),
    }))
}

/// POST /api/runs/{id}/cancel - Cancel a queued run
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    let run_id = parse_id(&id)?;
    let runs = state.runs();
    let record = runs
        .get(&run_id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Run '{id}' not found")))?;

    match record {
        RunRecord::Queued(job) => job.cancel(),
        RunRecord::Immediate { .. } => {
            return Err((StatusCode::CONFLICT, format!("Run '{id}' already finished")));
        }
    }

    Ok(Json(RunStatusResponse {
        run_id,
        mode: record.mode(),
        status: record.status(),
    }))
}
