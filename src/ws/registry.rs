use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::engine::EngineFactory;
use super::room::Room;
use super::session::Session;

/// Process-wide boardId -> [`Room`] lookup and lifecycle authority.
///
/// The sole place rooms are created, reused and evicted. Lock order is
/// always map first, then the room's own state; rooms are independent of
/// one another, so cross-room traffic never serializes here beyond the
/// brief map lookup.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    engine_factory: EngineFactory,
    idle_timeout: Duration,
    // Handed to reaper tasks so they do not keep the registry alive.
    this: Weak<RoomRegistry>,
}

impl RoomRegistry {
    pub fn new(engine_factory: EngineFactory, idle_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            rooms: Mutex::new(HashMap::new()),
            engine_factory,
            idle_timeout,
            this: this.clone(),
        })
    }

    /// Return the Active room for `board_id`, creating it (and its engine)
    /// if there is none. A room already mid-teardown is treated as absent
    /// and replaced, so callers never see a dying room.
    pub async fn get_or_create(&self, board_id: &str) -> Result<Arc<Room>, String> {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(board_id) {
            if room.is_active().await {
                return Ok(Arc::clone(room));
            }
            rooms.remove(board_id);
        }

        // Engine failure leaves no entry behind, so a later attempt
        // retries cleanly.
        let engine = (self.engine_factory)(board_id)?;
        let room = Arc::new(Room::new(board_id, engine));
        rooms.insert(board_id.to_string(), Arc::clone(&room));
        info!("Created room: {} ({} total)", board_id, rooms.len());
        Ok(room)
    }

    /// Resolve the session's board to a room and attach to it. If the room
    /// closes between resolution and attach, resolve again; the registry
    /// then supplies a fresh room, so no session is ever attached to a room
    /// mid-teardown.
    pub async fn attach(&self, session: &Session) -> Result<Arc<Room>, String> {
        loop {
            let room = self.get_or_create(&session.board_id).await?;
            if room.attach(session).await.is_ok() {
                return Ok(room);
            }
        }
    }

    /// Detach a session from its room. If the room is left empty this arms
    /// the idle reaper: a single-shot task that closes and evicts the room
    /// after the grace period, unless a new attach cancels it first.
    pub async fn detach(&self, room: &Arc<Room>, session_id: Uuid) {
        let registry = self.this.clone();
        // The reaper targets this exact room instance, never whatever
        // happens to own the board id when it wakes up.
        let room_ref = Arc::downgrade(room);
        let grace = self.idle_timeout;
        room.detach(session_id, move |epoch| {
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if let (Some(registry), Some(room)) = (registry.upgrade(), room_ref.upgrade()) {
                    info!("Closing idle room: {}", room.board_id());
                    registry.evict(&room, Some(epoch)).await;
                }
            })
        })
        .await;
    }

    /// Administrative close: tear the room down now, regardless of attached
    /// sessions.
    pub async fn close_room(&self, board_id: &str) {
        let room = self.rooms.lock().await.get(board_id).cloned();
        if let Some(room) = room {
            self.evict(&room, None).await;
        }
    }

    /// Number of reachable (Active) rooms.
    pub async fn count(&self) -> usize {
        let rooms = self.rooms.lock().await;
        let mut n = 0;
        for room in rooms.values() {
            if room.is_active().await {
                n += 1;
            }
        }
        n
    }

    /// Run the Active -> Closing -> Closed sequence for one room and drop
    /// the registry entry. A room no longer registered, a room that already
    /// left Active, or a reaper whose epoch was canceled or superseded is a
    /// no-op; the engine is torn down exactly once.
    async fn evict(&self, room: &Arc<Room>, epoch: Option<u64>) {
        let mut rooms = self.rooms.lock().await;
        match rooms.get(room.board_id()) {
            Some(entry) if Arc::ptr_eq(entry, room) => {}
            _ => return,
        }
        if !room.begin_close(epoch).await {
            return;
        }
        rooms.remove(room.board_id());
        drop(rooms);

        // Force-disconnects any straggling sessions.
        room.engine().close();
        room.finish_close().await;
        info!("Closed room: {}", room.board_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::engine::{EngineConn, SyncEngine};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::{broadcast, watch};

    const GRACE: Duration = Duration::from_secs(60);

    struct StubEngine {
        closes: Arc<AtomicUsize>,
    }

    impl SyncEngine for StubEngine {
        fn connect(&self, _session_id: Uuid) -> EngineConn {
            let (frames, outbound) = broadcast::channel(8);
            let (_tx, shutdown) = watch::channel(false);
            EngineConn {
                inbound: frames,
                outbound,
                shutdown,
            }
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Counters {
        created: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    fn stub_registry(grace: Duration) -> (Arc<RoomRegistry>, Counters) {
        let created = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let counters = Counters {
            created: Arc::clone(&created),
            closed: Arc::clone(&closed),
        };
        let factory: EngineFactory = Arc::new(move |_board_id| {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubEngine {
                closes: Arc::clone(&closed),
            }) as Arc<dyn SyncEngine>)
        });
        (RoomRegistry::new(factory, grace), counters)
    }

    #[tokio::test]
    async fn same_board_resolves_to_same_room() {
        let (registry, counters) = stub_registry(GRACE);
        let a = registry.get_or_create("xyz").await.unwrap();
        let b = registry.get_or_create("xyz").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_boards_get_distinct_rooms() {
        let (registry, _) = stub_registry(GRACE);
        let a = registry.get_or_create("a").await.unwrap();
        let b = registry.get_or_create("b").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_room_is_closed_and_replaced_after_grace() {
        let (registry, counters) = stub_registry(GRACE);
        let s = Session::new("xyz");
        let room = registry.attach(&s).await.unwrap();
        registry.detach(&room, s.session_id).await;
        assert!(room.eviction_armed().await);

        tokio::time::sleep(GRACE + Duration::from_millis(1)).await;
        assert_eq!(registry.count().await, 0);
        assert!(!room.is_active().await);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

        // A later connection gets a brand new room with a fresh engine.
        let again = registry.get_or_create("xyz").await.unwrap();
        assert!(!Arc::ptr_eq(&room, &again));
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_before_grace_reuses_room() {
        let (registry, counters) = stub_registry(GRACE);
        let s1 = Session::new("xyz");
        let room = registry.attach(&s1).await.unwrap();
        registry.detach(&room, s1.session_id).await;

        tokio::time::sleep(GRACE / 2).await;
        let s2 = Session::new("xyz");
        let reused = registry.attach(&s2).await.unwrap();
        assert!(Arc::ptr_eq(&room, &reused));
        assert!(!room.eviction_armed().await);

        // Well past the original deadline: the canceled timer must not fire.
        tokio::time::sleep(GRACE * 2).await;
        assert!(room.is_active().await);
        assert_eq!(registry.count().await, 1);
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_sessions_share_a_room_until_both_leave() {
        let (registry, _) = stub_registry(GRACE);
        let a = Session::new("xyz");
        let b = Session::new("xyz");
        let room_a = registry.attach(&a).await.unwrap();
        let room_b = registry.attach(&b).await.unwrap();
        assert!(Arc::ptr_eq(&room_a, &room_b));
        assert_eq!(room_a.session_count().await, 2);

        registry.detach(&room_a, a.session_id).await;
        assert!(room_a.is_active().await);
        assert!(!room_a.eviction_armed().await);

        registry.detach(&room_b, b.session_id).await;
        assert!(room_b.eviction_armed().await);

        tokio::time::sleep(GRACE + Duration::from_millis(1)).await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn close_room_tears_engine_down_once() {
        let (registry, counters) = stub_registry(GRACE);
        registry.get_or_create("xyz").await.unwrap();

        registry.close_room("xyz").await;
        registry.close_room("xyz").await;
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn attach_after_close_gets_a_fresh_room() {
        let (registry, _) = stub_registry(GRACE);
        let old = registry.get_or_create("xyz").await.unwrap();
        registry.close_room("xyz").await;

        let s = Session::new("xyz");
        let fresh = registry.attach(&s).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(fresh.is_active().await);
        assert_eq!(fresh.session_count().await, 1);
    }

    #[tokio::test]
    async fn engine_failure_leaves_no_entry() {
        let fail_once = Arc::new(AtomicBool::new(true));
        let factory: EngineFactory = {
            let fail_once = Arc::clone(&fail_once);
            Arc::new(move |_board_id| {
                if fail_once.swap(false, Ordering::SeqCst) {
                    Err("engine resources exhausted".to_string())
                } else {
                    Ok(Arc::new(StubEngine {
                        closes: Arc::new(AtomicUsize::new(0)),
                    }) as Arc<dyn SyncEngine>)
                }
            })
        };
        let registry = RoomRegistry::new(factory, GRACE);

        assert!(registry.get_or_create("xyz").await.is_err());
        assert_eq!(registry.count().await, 0);

        // The board id was never registered, so the retry starts clean.
        assert!(registry.get_or_create("xyz").await.is_ok());
        assert_eq!(registry.count().await, 1);
    }
}
