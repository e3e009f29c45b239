/// SQL DDL for the session store.
/// WAL mode + foreign keys enabled at connection time.
///
/// Version 1 was the single-procedure schema (no `pro_id`/`area_id`); those
/// columns are added in place with defaults when an old database is opened.
pub const SCHEMA_VERSION: u32 = 2;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id           TEXT PRIMARY KEY,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    estado       TEXT NOT NULL DEFAULT 'EN_CURSO',
    pro_id       TEXT NOT NULL DEFAULT 'PRO141',
    area_id      TEXT NOT NULL DEFAULT 'inventario',
    current_node TEXT NOT NULL DEFAULT 'S0_alcance',
    history      TEXT NOT NULL DEFAULT '[]',
    decisiones   TEXT NOT NULL DEFAULT '[]',
    bloqueos     TEXT NOT NULL DEFAULT '[]',
    inputs       TEXT NOT NULL DEFAULT '{}',
    logs         TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

/// Created after the additive column migration: a legacy table only has
/// pro_id once that migration ran.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_sessions_pro ON sessions(pro_id);
CREATE INDEX IF NOT EXISTS idx_sessions_estado ON sessions(estado);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

/// Columns added after version 1, with the defaults that keep legacy rows
/// loadable. Applied via `ALTER TABLE` when missing.
pub const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("pro_id", "pro_id TEXT NOT NULL DEFAULT 'PRO141'"),
    ("area_id", "area_id TEXT NOT NULL DEFAULT 'inventario'"),
];
