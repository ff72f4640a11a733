use axum::extract::ws::Message;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};
use uuid::Uuid;

/// A payload relayed between the clients of one room. The payload itself is
/// opaque to the server; only the sending session is tracked so it can be
/// skipped when fanning out.
#[derive(Clone, Debug)]
pub struct Frame {
    pub sender: Uuid,
    pub payload: Message,
}

/// The per-session view of a room's engine: where to push frames arriving
/// from the client, where to read frames destined for it, and a signal that
/// flips when the room is torn down.
pub struct EngineConn {
    pub inbound: broadcast::Sender<Frame>,
    pub outbound: broadcast::Receiver<Frame>,
    pub shutdown: watch::Receiver<bool>,
}

/// The synchronization engine bound 1:1 to a room for its lifetime.
///
/// The room manager never inspects message payloads; it only hands each
/// attached session over to the engine and tears the engine down when the
/// room closes.
pub trait SyncEngine: Send + Sync + 'static {
    /// Register a freshly attached session and hand back its relay channels.
    fn connect(&self, session_id: Uuid) -> EngineConn;

    /// Tear the engine down, force-disconnecting every attached session.
    /// Must be idempotent.
    fn close(&self);
}

/// Builds the engine for a new room. Returning `Err` aborts room creation
/// and the pending connection is rejected with a server-error close.
pub type EngineFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn SyncEngine>, String> + Send + Sync>;

/// Broadcast fan-out engine: every text/binary frame a session sends is
/// relayed verbatim to every other session in the same room.
pub struct RelayEngine {
    board_id: String,
    frames: broadcast::Sender<Frame>,
    shutdown: watch::Sender<bool>,
}

impl RelayEngine {
    pub fn new(board_id: &str) -> Self {
        let (frames, _rx) = broadcast::channel::<Frame>(100);
        let (shutdown, _rx) = watch::channel(false);
        Self {
            board_id: board_id.to_string(),
            frames,
            shutdown,
        }
    }

    /// Factory wiring `RelayEngine` in as the production engine.
    pub fn factory() -> EngineFactory {
        Arc::new(|board_id| Ok(Arc::new(RelayEngine::new(board_id)) as Arc<dyn SyncEngine>))
    }
}

impl SyncEngine for RelayEngine {
    fn connect(&self, session_id: Uuid) -> EngineConn {
        debug!("[{}] engine connect for session {}", self.board_id, session_id);
        EngineConn {
            inbound: self.frames.clone(),
            outbound: self.frames.subscribe(),
            shutdown: self.shutdown.subscribe(),
        }
    }

    fn close(&self) {
        if *self.shutdown.borrow() {
            return;
        }
        warn!("[{}] engine shutting down", self.board_id);
        self.shutdown.send_replace(true);
    }
}
