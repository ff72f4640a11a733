use uuid::Uuid;

/// One client's attached real-time connection to a room.
///
/// The id is generated fresh per connection and never reused; the board
/// binding is fixed for the session's lifetime (a session never migrates
/// rooms). The transport itself stays with the connection task, which closes
/// it exactly once.
#[derive(Clone, Debug)]
pub struct Session {
    pub session_id: Uuid,
    pub board_id: String,
}

impl Session {
    pub fn new(board_id: &str) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            board_id: board_id.to_string(),
        }
    }
}
