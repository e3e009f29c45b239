use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use guia_core::{Estado, SessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// One persisted session, with the five structured fields deserialized.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub created_at: String,
    pub updated_at: String,
    pub estado: Estado,
    pub pro_id: String,
    pub area_id: String,
    pub current_node: String,
    pub history: Value,
    pub decisiones: Value,
    pub bloqueos: Value,
    pub inputs: Value,
    pub logs: Value,
}

/// Whole-field replacement for any subset of the mutable columns.
/// `None` keeps the stored value.
#[derive(Clone, Debug, Default)]
pub struct SessionPatch {
    pub estado: Option<Estado>,
    pub current_node: Option<String>,
    pub history: Option<Value>,
    pub decisiones: Option<Value>,
    pub bloqueos: Option<Value>,
    pub inputs: Option<Value>,
    pub logs: Option<Value>,
}

/// The four append-oriented list columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListField {
    History,
    Decisiones,
    Bloqueos,
    Logs,
}

impl ListField {
    pub fn column(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Decisiones => "decisiones",
            Self::Bloqueos => "bloqueos",
            Self::Logs => "logs",
        }
    }
}

const SELECT_COLUMNS: &str = "id, created_at, updated_at, estado, pro_id, area_id, current_node,
        history, decisiones, bloqueos, inputs, logs";

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new session at the given entry step. Fails with `Conflict`
    /// if the id already exists.
    #[instrument(skip(self), fields(session_id = %id, pro_id, area_id))]
    pub fn create(
        &self,
        id: &SessionId,
        pro_id: &str,
        area_id: &str,
        current_node: &str,
    ) -> Result<SessionRow, StoreError> {
        let now = now_iso();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, created_at, updated_at, estado, pro_id, area_id, current_node)
                 VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    now,
                    Estado::EnCurso.as_str(),
                    pro_id,
                    area_id,
                    current_node,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!("session {id} already exists"))
                }
                other => StoreError::from(other),
            })?;

            Ok(SessionRow {
                id: id.clone(),
                created_at: now.clone(),
                updated_at: now.clone(),
                estado: Estado::EnCurso,
                pro_id: pro_id.to_string(),
                area_id: area_id.to_string(),
                current_node: current_node.to_string(),
                history: Value::Array(Vec::new()),
                decisiones: Value::Array(Vec::new()),
                bloqueos: Value::Array(Vec::new()),
                inputs: Value::Object(serde_json::Map::new()),
                logs: Value::Array(Vec::new()),
            })
        })
    }

    /// Get a session by id.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            fetch(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("session {id}")))
        })
    }

    /// Replace any subset of the mutable fields; unspecified fields keep
    /// their stored value. `updated_at` is refreshed regardless of which
    /// fields changed. The write is a single UPDATE statement.
    #[instrument(skip(self, patch), fields(session_id = %id))]
    pub fn replace_fields(
        &self,
        id: &SessionId,
        patch: &SessionPatch,
    ) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let prev = fetch(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;

            let now = now_iso();
            let estado = patch.estado.unwrap_or(prev.estado);
            let current_node = patch.current_node.as_deref().unwrap_or(&prev.current_node);
            let history = serialize_or_keep(patch.history.as_ref(), &prev.history)?;
            let decisiones = serialize_or_keep(patch.decisiones.as_ref(), &prev.decisiones)?;
            let bloqueos = serialize_or_keep(patch.bloqueos.as_ref(), &prev.bloqueos)?;
            let inputs = serialize_or_keep(patch.inputs.as_ref(), &prev.inputs)?;
            let logs = serialize_or_keep(patch.logs.as_ref(), &prev.logs)?;

            conn.execute(
                "UPDATE sessions SET
                    updated_at = ?1, estado = ?2, current_node = ?3,
                    history = ?4, decisiones = ?5, bloqueos = ?6, inputs = ?7, logs = ?8
                 WHERE id = ?9",
                rusqlite::params![
                    now,
                    estado.as_str(),
                    current_node,
                    history,
                    decisiones,
                    bloqueos,
                    inputs,
                    logs,
                    id.as_str(),
                ],
            )?;

            fetch(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("session {id}")))
        })
    }

    /// Append one entry to a list column. The read-modify-write happens
    /// under the connection lock, so concurrent appends never drop entries.
    #[instrument(skip(self, entry), fields(session_id = %id, column = field.column()))]
    pub fn append_entry(
        &self,
        id: &SessionId,
        field: ListField,
        entry: Value,
    ) -> Result<SessionRow, StoreError> {
        let column = field.column();
        self.db.with_conn(|conn| {
            let prev = fetch(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;

            let stored = match field {
                ListField::History => &prev.history,
                ListField::Decisiones => &prev.decisiones,
                ListField::Bloqueos => &prev.bloqueos,
                ListField::Logs => &prev.logs,
            };
            let mut list = stored
                .as_array()
                .cloned()
                .ok_or_else(|| StoreError::CorruptRow {
                    table: "sessions",
                    column: field.column(),
                    detail: "expected a JSON array".to_string(),
                })?;
            list.push(entry);

            let now = now_iso();
            conn.execute(
                &format!("UPDATE sessions SET {column} = ?1, updated_at = ?2 WHERE id = ?3"),
                rusqlite::params![serde_json::to_string(&list)?, now, id.as_str()],
            )?;

            fetch(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("session {id}")))
        })
    }

    /// Set one key in the `inputs` map, leaving the rest of the map intact.
    #[instrument(skip(self, value), fields(session_id = %id, key))]
    pub fn set_input(
        &self,
        id: &SessionId,
        key: &str,
        value: Value,
    ) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let prev = fetch(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;

            let mut map = prev
                .inputs
                .as_object()
                .cloned()
                .ok_or_else(|| StoreError::CorruptRow {
                    table: "sessions",
                    column: "inputs",
                    detail: "expected a JSON object".to_string(),
                })?;
            map.insert(key.to_string(), value);

            let now = now_iso();
            conn.execute(
                "UPDATE sessions SET inputs = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![
                    serde_json::to_string(&Value::Object(map))?,
                    now,
                    id.as_str()
                ],
            )?;

            fetch(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("session {id}")))
        })
    }

    /// Cheap liveness probe for health reporting.
    pub fn ping(&self) -> bool {
        self.db
            .with_conn(|conn| {
                conn.execute_batch("SELECT 1")?;
                Ok(true)
            })
            .unwrap_or(false)
    }
}

fn serialize_or_keep(new: Option<&Value>, prev: &Value) -> Result<String, StoreError> {
    let value = new.unwrap_or(prev);
    Ok(serde_json::to_string(value)?)
}

/// RFC 3339 UTC with fixed millisecond precision: equal-length strings, so
/// timestamp ordering survives string comparison.
fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn fetch(
    conn: &rusqlite::Connection,
    id: &SessionId,
) -> Result<Option<SessionRow>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM sessions WHERE id = ?1"
    ))?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_session(row)?)),
        None => Ok(None),
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    let estado_str: String = row_helpers::get(row, 3, "sessions", "estado")?;
    let history: String = row_helpers::get(row, 7, "sessions", "history")?;
    let decisiones: String = row_helpers::get(row, 8, "sessions", "decisiones")?;
    let bloqueos: String = row_helpers::get(row, 9, "sessions", "bloqueos")?;
    let inputs: String = row_helpers::get(row, 10, "sessions", "inputs")?;
    let logs: String = row_helpers::get(row, 11, "sessions", "logs")?;

    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        created_at: row_helpers::get(row, 1, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 2, "sessions", "updated_at")?,
        estado: row_helpers::parse_enum(&estado_str, "sessions", "estado")?,
        pro_id: row_helpers::get(row, 4, "sessions", "pro_id")?,
        area_id: row_helpers::get(row, 5, "sessions", "area_id")?,
        current_node: row_helpers::get(row, 6, "sessions", "current_node")?,
        history: row_helpers::parse_json(&history, "sessions", "history")?,
        decisiones: row_helpers::parse_json(&decisiones, "sessions", "decisiones")?,
        bloqueos: row_helpers::parse_json(&bloqueos, "sessions", "bloqueos")?,
        inputs: row_helpers::parse_json(&inputs, "sessions", "inputs")?,
        logs: row_helpers::parse_json(&logs, "sessions", "logs")?,
    })
}
