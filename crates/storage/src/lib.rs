use std::collections::HashSet;

pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{SessionId, TurnId};
pub use sqlite::SqliteStorage;
pub use types::{ChatTurn, NewChatTurn, SYSTEM_AUTHOR, TokenCounts, TurnRole};

pub trait TurnStore: Send + Sync {
    fn insert_turn(&self, input: NewChatTurn) -> StorageResult<ChatTurn>;
    fn update_turns(&self, turns: Vec<ChatTurn>) -> StorageResult<Vec<ChatTurn>>;
    /// Loads a turn regardless of its deleted flag.
    fn get_turn(&self, turn_id: TurnId) -> StorageResult<Option<ChatTurn>>;
    /// Visible turns of one session, newest first.
    fn list_session_turns(&self, session_id: SessionId) -> StorageResult<Vec<ChatTurn>>;

    /// Flags the given turns as deleted and returns how many rows changed.
    ///
    /// Turns that are already deleted are left alone; when nothing changes no
    /// update is issued at all.
    fn soft_delete_turns(&self, session_id: SessionId, turn_ids: &[TurnId]) -> StorageResult<usize> {
        let mut seen = HashSet::with_capacity(turn_ids.len());
        let mut changed = Vec::with_capacity(turn_ids.len());
        for turn_id in turn_ids {
            if !seen.insert(*turn_id) {
                continue;
            }
            let turn = self
                .get_turn(*turn_id)?
                .filter(|turn| turn.session_id == session_id)
                .ok_or_else(|| StorageError::NotFound {
                    stage: "turn-soft-delete-load",
                    entity: "chat_turn",
                    id: turn_id.to_string(),
                })?;

            if !turn.deleted {
                changed.push(ChatTurn {
                    deleted: true,
                    ..turn
                });
            }
        }

        if changed.is_empty() {
            return Ok(0);
        }

        let count = changed.len();
        self.update_turns(changed)?;
        tracing::debug!(session_id = %session_id, count, "soft deleted chat turns");
        Ok(count)
    }
}
