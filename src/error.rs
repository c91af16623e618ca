//! Error types shared by the table runtime, the array layer and local expressions.

use crate::table::TableId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("compilation of `{op}` is not implemented")]
    Unsupported { op: String },

    #[error("invariant violated in {context}: expected {expected}, got {actual}")]
    InvariantViolation {
        context: &'static str,
        expected: String,
        actual: String,
    },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("failed to build compiled function ({cause:#}); source was:\n{source_text}")]
    Codegen {
        source_text: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("missing local input `{name}`")]
    MissingInput { name: String },

    #[error("local expression node {node} has {found} dependencies, limit is {limit}")]
    TooManyDependencies {
        node: u64,
        limit: usize,
        found: usize,
    },

    #[error("backend `{backend}` is not available")]
    BackendUnavailable { backend: String },

    #[error("kernel failed on table {table} shard {shard}: {cause}")]
    KernelFailed {
        table: TableId,
        shard: usize,
        #[source]
        cause: anyhow::Error,
    },

    #[error("accumulator failed on table {table}: {cause}")]
    Accumulator {
        table: TableId,
        #[source]
        cause: anyhow::Error,
    },

    #[error("unknown table {0}")]
    UnknownTable(TableId),

    #[error("table {0} has been destroyed")]
    TableDestroyed(TableId),

    #[error("table {0} was registered with different key/value types")]
    TableTypeMismatch(TableId),

    #[error("worker {0} is shut down")]
    WorkerGone(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    pub(crate) fn shape_mismatch(
        context: &'static str,
        expected: &[usize],
        actual: &[usize],
    ) -> Self {
        Error::InvariantViolation {
            context,
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }
}
