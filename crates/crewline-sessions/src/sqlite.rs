//! SQLite-backed `ConversationStore`, for anyone who wants durable storage
//! (spec.md §6). Grounded on the teacher's `skynet-sessions` (`db.rs`'s
//! `init_db` pattern, `manager.rs`'s `Mutex<Connection>` wrapper and
//! query-row-or-none idiom).

use std::sync::Mutex;

use async_trait::async_trait;
use crewline_core::error::{CrewlineError, Result};
use crewline_core::types::{Conversation, ConversationMetadata};
use rusqlite::Connection;

use crate::store::ConversationStore;

/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT PRIMARY KEY,
            agent_name          TEXT NOT NULL,
            user_id             TEXT,
            current_crew_member TEXT,
            metadata            TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_agent
            ON conversations(agent_name, updated_at DESC);",
    )
    .map_err(|e| CrewlineError::Store(e.to_string()))?;
    Ok(())
}

/// Wraps a single SQLite connection in a `Mutex` — sufficient for the
/// single-node deployment this crate targets (spec.md §9, consistent with
/// the teacher's own sizing note on `SessionManager`).
pub struct SqliteConversationStore {
    db: Mutex<Connection>,
}

impl SqliteConversationStore {
    /// Wrap an already-open connection, running `init_db` on it.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| CrewlineError::Store(e.to_string()))?;
        Self::new(conn)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let metadata_json: String = row.get(4)?;
    let metadata: ConversationMetadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    Ok(Conversation {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        user_id: row.get(2)?,
        current_crew_member: row.get(3)?,
        metadata,
    })
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, agent_name, user_id, current_crew_member, metadata
             FROM conversations WHERE id = ?1",
            rusqlite::params![conversation_id],
            row_to_conversation,
        ) {
            Ok(conv) => Ok(Some(conv)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CrewlineError::Store(e.to_string())),
        }
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        let metadata_json = serde_json::to_string(&conversation.metadata)?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations (id, agent_name, user_id, current_crew_member, metadata, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                agent_name = excluded.agent_name,
                user_id = excluded.user_id,
                current_crew_member = excluded.current_crew_member,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
            rusqlite::params![
                conversation.id,
                conversation.agent_name,
                conversation.user_id,
                conversation.current_crew_member,
                metadata_json,
                now,
            ],
        )
        .map_err(|e| CrewlineError::Store(e.to_string()))?;
        Ok(())
    }
}
