//! WebSocket endpoint streaming run progress

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use orchestrator::{JobState, JobStatus, ProgressEvent};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use uuid::Uuid;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Binary Protocol Tags
// ---------------------------------------------------------------------------

/// Server message: progress report
pub const TAG_PROGRESS: u8 = 0x01;
/// Server message: status change
pub const TAG_STATUS: u8 = 0x02;

/// Client message prefix
pub const TAG_COMMAND: u8 = 0x80;
/// Client command: cancel the run
pub const CMD_CANCEL: u8 = 0x01;

/// Commands a client may send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    /// Stop the run after its current step
    Cancel,
}

// ---------------------------------------------------------------------------
// WebSocket Handler
// ---------------------------------------------------------------------------

/// WebSocket upgrade handler for /ws/runs/{id}
pub async fn ws_run_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let run_id = match Uuid::parse_str(&id) {
        Ok(run_id) if state.runs().contains_key(&run_id) => run_id,
        _ => return (axum::http::StatusCode::NOT_FOUND, "Run not found").into_response(),
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, state, run_id))
}

/// Current status of a run, if it still exists
fn current_status(state: &AppState, run_id: &Uuid) -> Option<JobStatus> {
    state.runs().get(run_id).map(|r| r.status())
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, run_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    // Only the first connection gets the progress stream; later ones see
    // status changes only.
    let progress: Option<Receiver<ProgressEvent>> = state.job(&run_id).and_then(|j| j.take_progress());

    let Some(mut last) = current_status(&state, &run_id) else {
        return;
    };
    if let Err(e) = sender.send(Message::Binary(encode_status(&last))).await {
        tracing::error!("Failed to send initial status: {}", e);
        return;
    }

    let mut poll = interval(Duration::from_millis(100));

    while !last.state.is_terminal() {
        tokio::select! {
            _ = poll.tick() => {
                // Drain before awaiting; the receiver cannot be held across sends.
                let events: Vec<ProgressEvent> = progress
                    .as_ref()
                    .map(|rx| rx.try_iter().collect())
                    .unwrap_or_default();
                for event in events {
                    if let Err(e) = sender.send(Message::Binary(encode_progress(&event))).await {
                        tracing::error!("Failed to send progress: {}", e);
                        return;
                    }
                }

                let Some(status) = current_status(&state, &run_id) else {
                    break;
                };
                if status.state != last.state {
                    if let Err(e) = sender.send(Message::Binary(encode_status(&status))).await {
                        tracing::error!("Failed to send status: {}", e);
                        return;
                    }
                }
                last = status;
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => match parse_command(&data) {
                        Ok(ClientCommand::Cancel) => {
                            if let Some(job) = state.job(&run_id) {
                                tracing::info!("Cancel requested over WebSocket for run {}", run_id);
                                job.cancel();
                            }
                        }
                        Err(e) => tracing::warn!("Ignoring client message: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("WebSocket closed for run {}", run_id);
                        return;
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        return;
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ---------------------------------------------------------------------------
// Binary Protocol
// ---------------------------------------------------------------------------

/// Progress message (tag 0x01)
/// Format: tag(u8) + step(u64) + total_steps(u64) + time(f64) + particles(u32) + eta_seconds(f32)
pub fn encode_progress(event: &ProgressEvent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(33);
    buf.push(TAG_PROGRESS);
    buf.extend_from_slice(&event.step.to_le_bytes());
    buf.extend_from_slice(&event.total_steps.to_le_bytes());
    buf.extend_from_slice(&event.time.to_le_bytes());
    buf.extend_from_slice(&(event.particles as u32).to_le_bytes());
    buf.extend_from_slice(&(event.eta_seconds as f32).to_le_bytes());
    buf
}

/// Status byte: 0=Queued, 1=Running, 2=Finished, 3=Failed, 4=Cancelled
pub fn state_byte(state: JobState) -> u8 {
    match state {
        JobState::Queued => 0,
        JobState::Running => 1,
        JobState::Finished => 2,
        JobState::Failed => 3,
        JobState::Cancelled => 4,
    }
}

/// Status message (tag 0x02)
/// Format: tag(u8) + state(u8) + step(u64) + message_length(u16) + message(utf8)
pub fn encode_status(status: &JobStatus) -> Vec<u8> {
    let message = status.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
    let bytes = message.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);

    let mut buf = Vec::with_capacity(12 + len);
    buf.push(TAG_STATUS);
    buf.push(state_byte(status.state));
    buf.extend_from_slice(&status.step.to_le_bytes());
    buf.extend_from_slice(&(len as u16).to_le_bytes());
    buf.extend_from_slice(&bytes[..len]);
    buf
}

/// Parse a client command
pub fn parse_command(data: &[u8]) -> Result<ClientCommand, String> {
    match data {
        [TAG_COMMAND, CMD_CANCEL, ..] => Ok(ClientCommand::Cancel),
        [TAG_COMMAND, cmd, ..] => Err(format!("Unknown command: 0x{cmd:02x}")),
        [tag, _, ..] => Err(format!("Unknown command tag: 0x{tag:02x}")),
        _ => Err("Command too short".to_string()),
    }
}
