pub mod executor;
pub mod statement_classifier;

pub use executor::QueryExecutor;
pub use statement_classifier::{PrefixClassifier, StatementClassifier, StatementKind};
