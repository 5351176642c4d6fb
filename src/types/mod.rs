pub mod result_set;
pub mod value_converter;

pub use result_set::{QueryResult, RawResultSet, Row};
pub use value_converter::ValueConverter;

/// Driver message text for a `tokio-postgres` error.
///
/// Server-side errors render as `SEVERITY: message` (plus detail and hint when
/// present) without the driver's generic "db error" prefix. Client-side errors
/// render with their full cause chain.
pub fn pg_error_message(err: &tokio_postgres::Error) -> String {
    if let Some(db_err) = err.as_db_error() {
        let mut message = format!("{}: {}", db_err.severity(), db_err.message());
        if let Some(detail) = db_err.detail() {
            message.push_str("\nDETAIL: ");
            message.push_str(detail);
        }
        if let Some(hint) = db_err.hint() {
            message.push_str("\nHINT: ");
            message.push_str(hint);
        }
        return message;
    }

    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}
