use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::engine::SyncEngine;
use super::session::Session;

/// Lifecycle of a room.
///
/// `Active` rooms accept attach/detach. `Closing` rooms are mid-teardown and
/// accept nothing; attaches that find one fall back to the registry, which
/// treats it as absent and builds a replacement. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomState {
    Active,
    Closing,
    Closed,
}

/// Returned by [`Room::attach`] when the room was already past `Active`.
/// The caller recovers by asking the registry for a fresh room.
#[derive(Debug)]
pub struct RoomClosed;

struct EvictionTimer {
    epoch: u64,
    handle: JoinHandle<()>,
}

struct RoomInner {
    state: RoomState,
    sessions: HashSet<Uuid>,
    // Armed only while `sessions` is empty. The epoch outlives the abort:
    // a reaper task that already woke up must still match it under this
    // lock before it may close the room.
    pending_eviction: Option<EvictionTimer>,
    eviction_epoch: u64,
}

/// The per-board unit of shared state: one engine instance plus the set of
/// currently attached sessions.
pub struct Room {
    board_id: String,
    engine: Arc<dyn SyncEngine>,
    inner: Mutex<RoomInner>,
}

impl Room {
    pub fn new(board_id: &str, engine: Arc<dyn SyncEngine>) -> Self {
        Self {
            board_id: board_id.to_string(),
            engine,
            inner: Mutex::new(RoomInner {
                state: RoomState::Active,
                sessions: HashSet::new(),
                pending_eviction: None,
                eviction_epoch: 0,
            }),
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn engine(&self) -> &Arc<dyn SyncEngine> {
        &self.engine
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.state == RoomState::Active
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    /// Whether an idle-eviction timer is currently armed.
    pub async fn eviction_armed(&self) -> bool {
        self.inner.lock().await.pending_eviction.is_some()
    }

    /// Attach a session, canceling any pending idle eviction.
    ///
    /// Cancellation happens under the same lock that guards the session set,
    /// so an attach that lands before the timer fires always wins; a timer
    /// that already moved the room past `Active` makes this return
    /// `RoomClosed` and the caller re-resolves the board to a fresh room.
    pub async fn attach(&self, session: &Session) -> Result<(), RoomClosed> {
        let mut inner = self.inner.lock().await;
        if inner.state != RoomState::Active {
            return Err(RoomClosed);
        }
        if let Some(timer) = inner.pending_eviction.take() {
            debug!("Canceled pending eviction for room {}", self.board_id);
            timer.handle.abort();
        }
        inner.sessions.insert(session.session_id);
        Ok(())
    }

    /// Detach a session. If the room is left with zero sessions, `arm` is
    /// invoked (still under the room lock) with a fresh eviction epoch and
    /// must spawn the single-shot reaper task for that epoch.
    pub async fn detach(&self, session_id: Uuid, arm: impl FnOnce(u64) -> JoinHandle<()>) {
        let mut inner = self.inner.lock().await;
        if inner.state != RoomState::Active {
            return;
        }
        if !inner.sessions.remove(&session_id) {
            return;
        }
        if inner.sessions.is_empty() {
            inner.eviction_epoch += 1;
            let epoch = inner.eviction_epoch;
            debug!("Room {} is empty, scheduling eviction", self.board_id);
            inner.pending_eviction = Some(EvictionTimer {
                epoch,
                handle: arm(epoch),
            });
        }
    }

    /// Move `Active -> Closing`. Returns false if the room already left
    /// `Active` (idempotent close) or, when `epoch` is given, if the timer
    /// that fired was canceled or superseded since it was armed.
    pub async fn begin_close(&self, epoch: Option<u64>) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != RoomState::Active {
            return false;
        }
        if let Some(required) = epoch {
            match inner.pending_eviction {
                Some(ref timer) if timer.epoch == required => {}
                _ => return false,
            }
        }
        inner.state = RoomState::Closing;
        if let Some(timer) = inner.pending_eviction.take() {
            // Only safe when closing administratively; on the epoch path the
            // armed timer is the caller itself.
            if epoch.is_none() {
                timer.handle.abort();
            }
        }
        true
    }

    /// Move `Closing -> Closed` after the engine has been torn down.
    pub async fn finish_close(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = RoomState::Closed;
        inner.sessions.clear();
    }
}
