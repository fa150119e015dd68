use thiserror::Error;

/// Coarse failure classes surfaced to callers of the update surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before any validation work started; safe to retry later.
    Admission,
    /// The proposed change is invalid; the active catalog is untouched.
    Validation,
    /// The cluster-wide install step failed.
    Commit,
    /// An ordinary call failed; never fatal to the server.
    Application,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Admission => write!(f, "admission"),
            ErrorClass::Validation => write!(f, "validation"),
            ErrorClass::Commit => write!(f, "commit"),
            ErrorClass::Application => write!(f, "application"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivecatErrorCode {
    Io,
    Encode,
    Decode,
    InvalidConfig,
    IntegrityError,
    CatalogNotFound,
    InvalidArtifact,
    Deployment,
    Ddl,
    ClassLoad,
    PlanFailure,
    NonFinalStatement,
    SizeLimitExceeded,
    UnsupportedChange,
    TablesMustBeEmpty,
    Conflict,
    RejectedByBlocker,
    Paused,
    SchemaModeMismatch,
    ParameterError,
    PermissionDenied,
    AuthenticationRejected,
    SessionInvalidated,
    ProcedureNotFound,
    ProcedureFailed,
    AmbiguousClass,
    ClassNotFound,
    CommitVoteFailed,
    CommitIncomplete,
    NodeEvicted,
    QueryTimeout,
    Validation,
}

impl LivecatErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            LivecatErrorCode::Io => "io",
            LivecatErrorCode::Encode => "encode",
            LivecatErrorCode::Decode => "decode",
            LivecatErrorCode::InvalidConfig => "invalid_config",
            LivecatErrorCode::IntegrityError => "integrity_error",
            LivecatErrorCode::CatalogNotFound => "catalog_not_found",
            LivecatErrorCode::InvalidArtifact => "invalid_artifact",
            LivecatErrorCode::Deployment => "deployment",
            LivecatErrorCode::Ddl => "ddl",
            LivecatErrorCode::ClassLoad => "class_load",
            LivecatErrorCode::PlanFailure => "plan_failure",
            LivecatErrorCode::NonFinalStatement => "non_final_statement",
            LivecatErrorCode::SizeLimitExceeded => "size_limit_exceeded",
            LivecatErrorCode::UnsupportedChange => "unsupported_change",
            LivecatErrorCode::TablesMustBeEmpty => "tables_must_be_empty",
            LivecatErrorCode::Conflict => "conflict",
            LivecatErrorCode::RejectedByBlocker => "rejected_by_blocker",
            LivecatErrorCode::Paused => "paused",
            LivecatErrorCode::SchemaModeMismatch => "schema_mode_mismatch",
            LivecatErrorCode::ParameterError => "parameter_error",
            LivecatErrorCode::PermissionDenied => "permission_denied",
            LivecatErrorCode::AuthenticationRejected => "authentication_rejected",
            LivecatErrorCode::SessionInvalidated => "session_invalidated",
            LivecatErrorCode::ProcedureNotFound => "procedure_not_found",
            LivecatErrorCode::ProcedureFailed => "procedure_failed",
            LivecatErrorCode::AmbiguousClass => "ambiguous_class",
            LivecatErrorCode::ClassNotFound => "class_not_found",
            LivecatErrorCode::CommitVoteFailed => "commit_vote_failed",
            LivecatErrorCode::CommitIncomplete => "commit_incomplete",
            LivecatErrorCode::NodeEvicted => "node_evicted",
            LivecatErrorCode::QueryTimeout => "query_timeout",
            LivecatErrorCode::Validation => "validation",
        }
    }
}

#[derive(Debug, Error)]
pub enum LivecatError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("integrity error: {message}")]
    IntegrityError { message: String },
    #[error("Database catalog not found: {path}")]
    CatalogNotFound { path: String },
    #[error("{0}")]
    InvalidArtifact(String),
    #[error("Unable to update deployment configuration: {0}")]
    Deployment(String),
    #[error("DDL error: {0}")]
    Ddl(String),
    #[error("Error loading class '{class_name}': {reason}")]
    ClassLoad { class_name: String, reason: String },
    #[error("Failed to plan for statement ({statement}) in procedure {procedure}: {reason}")]
    PlanFailure {
        procedure: String,
        statement: String,
        reason: String,
    },
    #[error(
        "Procedure {procedure} declares SQL statement {statement} that is not final; \
         statements must be final fields known when the procedure is loaded"
    )]
    NonFinalStatement { procedure: String, statement: String },
    #[error(
        "catalog footprint of {required_bytes} bytes exceeds the configured limit of {limit_bytes} bytes"
    )]
    SizeLimitExceeded {
        required_bytes: usize,
        limit_bytes: usize,
    },
    #[error("The requested catalog change(s) are not supported:\n{0}")]
    UnsupportedChange(String),
    #[error("Unable to make requested schema change:\n{0}")]
    TablesMustBeEmpty(String),
    #[error("{0}")]
    Conflict(String),
    #[error(
        "Can't do a catalog update while an elastic join or rejoin is active (blocker '{blocker}' held by {owner})"
    )]
    RejectedByBlocker { blocker: String, owner: String },
    #[error("Server is paused and is available in read-only mode - please try again later.")]
    Paused,
    #[error("{0}")]
    SchemaModeMismatch(String),
    #[error("{0}")]
    ParameterError(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("Authentication rejected")]
    AuthenticationRejected,
    #[error("session {session_id} is no longer valid under the current security configuration")]
    SessionInvalidated { session_id: u64 },
    #[error("Procedure {name} was not found")]
    ProcedureNotFound { name: String },
    #[error("Procedure {procedure} failed: {reason}")]
    ProcedureFailed { procedure: String, reason: String },
    #[error("class name '{name}' is ambiguous; candidates: {}", candidates.join(", "))]
    AmbiguousClass {
        name: String,
        candidates: Vec<String>,
    },
    #[error("class '{name}' was not found")]
    ClassNotFound { name: String },
    #[error("Catalog verification failed on one or more hosts: node {node_id}: {reason}")]
    CommitVoteFailed { node_id: u32, reason: String },
    #[error(
        "generation {generation} was recorded but no node acknowledged the install; re-query catalog state"
    )]
    CommitIncomplete { generation: u64 },
    #[error("node {node_id} was evicted after failing to install a committed catalog; rejoin required")]
    NodeEvicted { node_id: u32 },
    #[error("Transaction Interrupted: procedure {procedure} exceeded the query timeout of {timeout_ms} ms")]
    QueryTimeout { procedure: String, timeout_ms: u64 },
    #[error("validation error: {0}")]
    Validation(String),
}

impl LivecatError {
    pub fn code(&self) -> LivecatErrorCode {
        match self {
            LivecatError::Io(_) => LivecatErrorCode::Io,
            LivecatError::Encode(_) => LivecatErrorCode::Encode,
            LivecatError::Decode(_) => LivecatErrorCode::Decode,
            LivecatError::InvalidConfig { .. } => LivecatErrorCode::InvalidConfig,
            LivecatError::IntegrityError { .. } => LivecatErrorCode::IntegrityError,
            LivecatError::CatalogNotFound { .. } => LivecatErrorCode::CatalogNotFound,
            LivecatError::InvalidArtifact(_) => LivecatErrorCode::InvalidArtifact,
            LivecatError::Deployment(_) => LivecatErrorCode::Deployment,
            LivecatError::Ddl(_) => LivecatErrorCode::Ddl,
            LivecatError::ClassLoad { .. } => LivecatErrorCode::ClassLoad,
            LivecatError::PlanFailure { .. } => LivecatErrorCode::PlanFailure,
            LivecatError::NonFinalStatement { .. } => LivecatErrorCode::NonFinalStatement,
            LivecatError::SizeLimitExceeded { .. } => LivecatErrorCode::SizeLimitExceeded,
            LivecatError::UnsupportedChange(_) => LivecatErrorCode::UnsupportedChange,
            LivecatError::TablesMustBeEmpty(_) => LivecatErrorCode::TablesMustBeEmpty,
            LivecatError::Conflict(_) => LivecatErrorCode::Conflict,
            LivecatError::RejectedByBlocker { .. } => LivecatErrorCode::RejectedByBlocker,
            LivecatError::Paused => LivecatErrorCode::Paused,
            LivecatError::SchemaModeMismatch(_) => LivecatErrorCode::SchemaModeMismatch,
            LivecatError::ParameterError(_) => LivecatErrorCode::ParameterError,
            LivecatError::PermissionDenied(_) => LivecatErrorCode::PermissionDenied,
            LivecatError::AuthenticationRejected => LivecatErrorCode::AuthenticationRejected,
            LivecatError::SessionInvalidated { .. } => LivecatErrorCode::SessionInvalidated,
            LivecatError::ProcedureNotFound { .. } => LivecatErrorCode::ProcedureNotFound,
            LivecatError::ProcedureFailed { .. } => LivecatErrorCode::ProcedureFailed,
            LivecatError::AmbiguousClass { .. } => LivecatErrorCode::AmbiguousClass,
            LivecatError::ClassNotFound { .. } => LivecatErrorCode::ClassNotFound,
            LivecatError::CommitVoteFailed { .. } => LivecatErrorCode::CommitVoteFailed,
            LivecatError::CommitIncomplete { .. } => LivecatErrorCode::CommitIncomplete,
            LivecatError::NodeEvicted { .. } => LivecatErrorCode::NodeEvicted,
            LivecatError::QueryTimeout { .. } => LivecatErrorCode::QueryTimeout,
            LivecatError::Validation(_) => LivecatErrorCode::Validation,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            LivecatError::Conflict(_)
            | LivecatError::RejectedByBlocker { .. }
            | LivecatError::Paused
            | LivecatError::SchemaModeMismatch(_)
            | LivecatError::ParameterError(_)
            | LivecatError::PermissionDenied(_)
            | LivecatError::AuthenticationRejected
            | LivecatError::SessionInvalidated { .. }
            | LivecatError::NodeEvicted { .. } => ErrorClass::Admission,
            LivecatError::CatalogNotFound { .. }
            | LivecatError::InvalidArtifact(_)
            | LivecatError::Deployment(_)
            | LivecatError::Ddl(_)
            | LivecatError::ClassLoad { .. }
            | LivecatError::PlanFailure { .. }
            | LivecatError::NonFinalStatement { .. }
            | LivecatError::SizeLimitExceeded { .. }
            | LivecatError::UnsupportedChange(_)
            | LivecatError::TablesMustBeEmpty(_)
            | LivecatError::AmbiguousClass { .. }
            | LivecatError::ClassNotFound { .. }
            | LivecatError::Validation(_) => ErrorClass::Validation,
            LivecatError::CommitVoteFailed { .. }
            | LivecatError::CommitIncomplete { .. }
            | LivecatError::IntegrityError { .. }
            | LivecatError::Io(_)
            | LivecatError::Encode(_)
            | LivecatError::Decode(_)
            | LivecatError::InvalidConfig { .. } => ErrorClass::Commit,
            LivecatError::ProcedureNotFound { .. }
            | LivecatError::ProcedureFailed { .. }
            | LivecatError::QueryTimeout { .. } => ErrorClass::Application,
        }
    }

    /// True when the caller may resubmit the identical request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LivecatError::Conflict(_) | LivecatError::RejectedByBlocker { .. } | LivecatError::Paused
        )
    }
}
