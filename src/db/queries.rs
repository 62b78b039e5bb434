pub const CREATE_KV: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
  key        TEXT PRIMARY KEY,
  value      TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
"#;

pub const SELECT_VALUE: &str = "SELECT value FROM kv WHERE key = ?1";

pub const UPSERT_VALUE: &str = r#"
INSERT INTO kv (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key)
DO UPDATE SET value=excluded.value, updated_at=excluded.updated_at
"#;

pub const DELETE_VALUE: &str = "DELETE FROM kv WHERE key = ?1";

pub const USED_BYTES_EXCLUDING: &str =
    "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) FROM kv WHERE key != ?1";

pub const VALUE_SIZES: &str =
    "SELECT key, LENGTH(CAST(value AS BLOB)) FROM kv ORDER BY key ASC";

pub fn schema_statements() -> Vec<&'static str> {
    vec![CREATE_KV]
}
