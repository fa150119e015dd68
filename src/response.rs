use crate::catalog::types::Value;
use crate::error::{ErrorClass, LivecatError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    /// Rejected or failed without side effects; the caller may fix the request.
    GracefulFailure,
    /// The procedure itself aborted.
    UserAbort,
    ServerUnavailable,
    ConnectionLost,
    UnexpectedFailure,
}

impl ResponseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseStatus::Success => "SUCCESS",
            ResponseStatus::GracefulFailure => "GRACEFUL_FAILURE",
            ResponseStatus::UserAbort => "USER_ABORT",
            ResponseStatus::ServerUnavailable => "SERVER_UNAVAILABLE",
            ResponseStatus::ConnectionLost => "CONNECTION_LOST",
            ResponseStatus::UnexpectedFailure => "UNEXPECTED_FAILURE",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultTable {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// One-row `STATUS = 0` table returned by successful system procedures.
    pub fn status_ok() -> Self {
        let mut table = Self::new(&["STATUS"]);
        table.push_row(vec![Value::Integer(0)]);
        table
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Rows whose `column` equals `value`.
    pub fn rows_where<'a>(
        &'a self,
        column: &str,
        value: &'a Value,
    ) -> impl Iterator<Item = &'a Vec<Value>> + 'a {
        let idx = self.column_index(column);
        self.rows
            .iter()
            .filter(move |row| idx.and_then(|i| row.get(i)) == Some(value))
    }
}

/// Successful response to a procedure or system-procedure call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    pub status: ResponseStatus,
    pub tables: Vec<ResultTable>,
    /// Generation the call ran under.
    pub generation: u64,
}

impl ClientResponse {
    pub fn success(generation: u64, tables: Vec<ResultTable>) -> Self {
        Self {
            status: ResponseStatus::Success,
            tables,
            generation,
        }
    }

    pub fn first_table(&self) -> Option<&ResultTable> {
        self.tables.first()
    }
}

/// Failure reported to exactly one caller. Never fatal to the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct ProcedureFailure {
    pub status: ResponseStatus,
    pub code: &'static str,
    pub class: ErrorClass,
    pub message: String,
}

impl From<LivecatError> for ProcedureFailure {
    fn from(err: LivecatError) -> Self {
        let status = match &err {
            LivecatError::Paused => ResponseStatus::ServerUnavailable,
            LivecatError::SessionInvalidated { .. }
            | LivecatError::AuthenticationRejected
            | LivecatError::NodeEvicted { .. } => ResponseStatus::ConnectionLost,
            other if other.class() == ErrorClass::Commit => ResponseStatus::UnexpectedFailure,
            _ => ResponseStatus::GracefulFailure,
        };
        Self {
            status,
            code: err.code_str(),
            class: err.class(),
            message: err.to_string(),
        }
    }
}

pub type CallResult = Result<ClientResponse, ProcedureFailure>;

#[cfg(test)]
mod tests {
    use super::{ProcedureFailure, ResponseStatus, ResultTable};
    use crate::catalog::types::Value;
    use crate::error::LivecatError;

    #[test]
    fn status_table_has_one_row() {
        let table = ResultTable::status_ok();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.value(0, "status"), Some(&Value::Integer(0)));
    }

    #[test]
    fn failures_map_to_statuses() {
        let paused = ProcedureFailure::from(LivecatError::Paused);
        assert_eq!(paused.status, ResponseStatus::ServerUnavailable);
        assert!(paused.message.contains("paused"));

        let missing = ProcedureFailure::from(LivecatError::ProcedureNotFound {
            name: "InsertOrderLineBatched".into(),
        });
        assert_eq!(missing.status, ResponseStatus::GracefulFailure);
        assert_eq!(missing.code, "procedure_not_found");

        let incomplete = ProcedureFailure::from(LivecatError::CommitIncomplete { generation: 4 });
        assert_eq!(incomplete.status, ResponseStatus::UnexpectedFailure);
    }

    #[test]
    fn rows_where_filters_by_column() {
        let mut table = ResultTable::new(&["NAME", "KIND"]);
        table.push_row(vec!["a".into(), "x".into()]);
        table.push_row(vec!["b".into(), "y".into()]);
        let wanted = Value::from("y");
        let hits: Vec<_> = table.rows_where("kind", &wanted).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0][0], Value::from("b"));
    }
}
