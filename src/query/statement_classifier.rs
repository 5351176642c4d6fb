/// How the caller expects a statement's outcome to be shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Fetch rows and column names
    ExpectsRows,
    /// Reply with a fixed acknowledgement
    ExpectsAcknowledgement,
}

/// Decides the response shape for a piece of SQL text.
///
/// The decision only affects how a result is returned. Whether the statement is
/// allowed at all is left to the database under the read-only transaction.
pub trait StatementClassifier: Send + Sync {
    fn classify(&self, sql: &str) -> StatementKind;
}

/// Leading-keyword heuristic: trimmed text starting with `select`, in any case.
///
/// `WITH ... SELECT`, leading comments and multi-statement text are not
/// recognised and fall through to `ExpectsAcknowledgement`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrefixClassifier;

impl PrefixClassifier {
    const ROW_KEYWORD: &'static str = "select";

    #[inline]
    pub fn is_select(sql: &str) -> bool {
        let trimmed = sql.trim();
        let bytes = trimmed.as_bytes();

        if bytes.len() >= 6 {
            match &bytes[0..6] {
                b"SELECT" | b"select" | b"Select" => return true,
                _ => {}
            }
        }

        // Mixed case falls back to a case-insensitive compare
        trimmed.len() >= Self::ROW_KEYWORD.len()
            && trimmed.as_bytes()[..Self::ROW_KEYWORD.len()].eq_ignore_ascii_case(Self::ROW_KEYWORD.as_bytes())
    }
}

impl StatementClassifier for PrefixClassifier {
    fn classify(&self, sql: &str) -> StatementKind {
        if Self::is_select(sql) {
            StatementKind::ExpectsRows
        } else {
            StatementKind::ExpectsAcknowledgement
        }
    }
}
