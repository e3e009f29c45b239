use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a JSON string column, returning CorruptRow on parse failure.
pub fn parse_json(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use guia_core::Estado;

    #[test]
    fn parse_enum_success() {
        let result: Result<Estado, _> = parse_enum("EN_CURSO", "sessions", "estado");
        assert!(result.is_ok());
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<Estado, _> = parse_enum("INVALID", "sessions", "estado");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow {
                table: "sessions",
                column: "estado",
                ..
            })
        ));
    }

    #[test]
    fn parse_json_success() {
        let result = parse_json(r#"{"key": "value"}"#, "sessions", "inputs");
        assert!(result.is_ok());
        assert_eq!(result.unwrap()["key"], "value");
    }

    #[test]
    fn parse_json_failure() {
        let result = parse_json("not valid json", "sessions", "inputs");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow {
                table: "sessions",
                column: "inputs",
                ..
            })
        ));
    }
}
