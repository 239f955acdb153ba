use thiserror::Error;

use crate::types::TableId;

/// Convenience alias for `Result<T, KestrelError>`.
pub type KestrelResult<T> = Result<T, KestrelError>;

/// Error classification for retry/escalation decisions.
///
/// - `UserError`   — bad plan, bad statement, unknown table; fix the input
/// - `Retryable`   — partition moved mid-scan; a caller MAY re-plan and retry
/// - `Transient`   — store unavailable/backpressure; client MAY retry after back-off
/// - `InternalBug` — should never happen; triggers alert + diagnostic dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    Transient,
    InternalBug,
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum KestrelError {
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Statistics error: {0}")]
    Stats(#[from] StatsError),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Transient resource/availability error.
    #[error("Transient: {reason} (retry after {retry_after_ms}ms)")]
    Transient { reason: String, retry_after_ms: u64 },

    /// Internal bug; should never occur in production.
    /// Always carries a unique `error_code` and `debug_context` for post-mortem.
    #[error("InternalBug [{error_code}]: {message} | context: {debug_context}")]
    InternalBug {
        error_code: &'static str,
        message: String,
        debug_context: String,
    },
}

/// Plan-construction errors. All of these are detected before any scan is
/// issued; none are retried.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Empty key range: start {start_hex} is not below end {end_hex}")]
    EmptyRange { start_hex: String, end_hex: String },

    #[error("UNION ALL requires at least one branch")]
    EmptyUnion,

    #[error("UNION ALL branch {0} carries its own OFFSET/LIMIT window")]
    BranchWindow(usize),

    #[error("Plan splits into {groups} scan groups, exceeding max_scan_groups={max}")]
    TooManyGroups { groups: usize, max: usize },

    #[error("Malformed statement: {0}")]
    Statement(String),
}

/// Scan-execution errors surfaced by the transport mid-stream.
///
/// Any of these aborts the whole query: the merge stage never drops or
/// retries a failed group's rows, since partial counts would corrupt
/// OFFSET/LIMIT semantics.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Table not found: {0}")]
    TableNotFound(TableId),

    #[error("Partition moved during scan: {0}")]
    PartitionMoved(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Guidepost statistics errors.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Unknown statistics attribute: {0:?}")]
    UnknownAttribute(String),

    #[error("Statistics collection for {table} exceeded max_guideposts_per_table={max}")]
    TooManyGuideposts { table: String, max: usize },
}

// ── KestrelError classification & helpers ────────────────────────────────────

impl KestrelError {
    /// Classify this error for retry/escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KestrelError::Plan(_) => ErrorKind::UserError,
            KestrelError::Stats(_) => ErrorKind::UserError,
            KestrelError::Scan(e) => match e {
                ScanError::TableNotFound(_) => ErrorKind::UserError,
                ScanError::PartitionMoved(_) => ErrorKind::Retryable,
                ScanError::Unavailable(_) => ErrorKind::Transient,
            },
            KestrelError::Transient { .. } => ErrorKind::Transient,
            KestrelError::Internal(_) => ErrorKind::InternalBug,
            KestrelError::InternalBug { .. } => ErrorKind::InternalBug,
        }
    }

    pub fn is_user_error(&self) -> bool {
        self.kind() == ErrorKind::UserError
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_internal_bug(&self) -> bool {
        self.kind() == ErrorKind::InternalBug
    }

    /// Suggested client back-off before retrying, in milliseconds.
    /// Zero for errors that should not be retried.
    pub fn retry_after_ms(&self) -> u64 {
        match self {
            KestrelError::Transient { retry_after_ms, .. } => *retry_after_ms,
            KestrelError::Scan(ScanError::PartitionMoved(_)) => 50,
            KestrelError::Scan(ScanError::Unavailable(_)) => 200,
            _ => 0,
        }
    }

    /// Construct a transient availability error.
    pub fn transient(reason: impl Into<String>, retry_after_ms: u64) -> Self {
        KestrelError::Transient {
            reason: reason.into(),
            retry_after_ms,
        }
    }

    /// Construct an internal bug error with error code and context, emitting
    /// a structured log entry at the point of classification.
    pub fn internal_bug(
        error_code: &'static str,
        message: impl Into<String>,
        debug_context: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let debug_context = debug_context.into();
        tracing::error!(
            error_code = error_code,
            debug_context = debug_context.as_str(),
            "FATAL [{}]: {}",
            error_code,
            message
        );
        KestrelError::InternalBug {
            error_code,
            message,
            debug_context,
        }
    }

    /// Add context string to an error, **preserving error classification**.
    ///
    /// The context is folded into the variant's free-text field where one
    /// exists; variants without one are returned unchanged. `kind()` is
    /// never altered by adding context.
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        let ctx = ctx.into();
        match self {
            KestrelError::Internal(msg) => KestrelError::Internal(format!("{ctx}: {msg}")),
            KestrelError::Transient {
                reason,
                retry_after_ms,
            } => KestrelError::Transient {
                reason: format!("{ctx}: {reason}"),
                retry_after_ms,
            },
            KestrelError::InternalBug {
                error_code,
                message,
                debug_context,
            } => KestrelError::InternalBug {
                error_code,
                message: format!("{ctx}: {message}"),
                debug_context,
            },
            KestrelError::Scan(ScanError::PartitionMoved(msg)) => {
                KestrelError::Scan(ScanError::PartitionMoved(format!("{ctx}: {msg}")))
            }
            KestrelError::Scan(ScanError::Unavailable(msg)) => {
                KestrelError::Scan(ScanError::Unavailable(format!("{ctx}: {msg}")))
            }
            other => other,
        }
    }
}

/// Bail with a plan-construction error.
/// Usage: `bail_plan!("UNION ALL branch {} is empty", i)`
#[macro_export]
macro_rules! bail_plan {
    ($msg:expr) => {
        return Err($crate::error::KestrelError::Plan(
            $crate::error::PlanError::Statement($msg.to_string()),
        ))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::error::KestrelError::Plan(
            $crate::error::PlanError::Statement(format!($fmt, $($arg)*)),
        ))
    };
}

/// Add context to a Result, preserving error classification.
/// Usage: `some_result.ctx("stage=merge, group=3")?`
pub trait ErrorContext<T> {
    fn ctx(self, context: &str) -> Result<T, KestrelError>;
    fn ctx_with(self, f: impl FnOnce() -> String) -> Result<T, KestrelError>;
}

impl<T, E: Into<KestrelError>> ErrorContext<T> for Result<T, E> {
    fn ctx(self, context: &str) -> Result<T, KestrelError> {
        self.map_err(|e| e.into().with_context(context))
    }
    fn ctx_with(self, f: impl FnOnce() -> String) -> Result<T, KestrelError> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── ErrorKind classification ─────────────────────────────────────────────

    #[test]
    fn test_plan_errors_are_user_errors() {
        let e = KestrelError::Plan(PlanError::EmptyUnion);
        assert_eq!(e.kind(), ErrorKind::UserError);
        assert!(e.is_user_error());
        assert!(!e.is_retryable());
        assert!(!e.is_transient());
    }

    #[test]
    fn test_partition_moved_is_retryable() {
        let e = KestrelError::Scan(ScanError::PartitionMoved("t1 split".into()));
        assert_eq!(e.kind(), ErrorKind::Retryable);
        assert!(e.retry_after_ms() > 0);
    }

    #[test]
    fn test_unavailable_is_transient() {
        let e = KestrelError::Scan(ScanError::Unavailable("store down".into()));
        assert_eq!(e.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_table_not_found_is_user_error() {
        let e = KestrelError::Scan(ScanError::TableNotFound(TableId(9)));
        assert_eq!(e.kind(), ErrorKind::UserError);
        assert_eq!(e.retry_after_ms(), 0);
    }

    #[test]
    fn test_internal_bug_classification() {
        let e = KestrelError::internal_bug("E-TEST-001", "impossible state", "ctx");
        assert!(e.is_internal_bug());
        let msg = format!("{}", e);
        assert!(msg.contains("E-TEST-001"));
        assert!(msg.contains("impossible state"));
    }

    // ── Context preservation ─────────────────────────────────────────────────

    #[test]
    fn test_with_context_preserves_transient_kind() {
        let e = KestrelError::transient("backpressure", 100).with_context("group=2");
        assert_eq!(e.kind(), ErrorKind::Transient);
        assert!(format!("{}", e).contains("group=2"));
        assert_eq!(e.retry_after_ms(), 100);
    }

    #[test]
    fn test_with_context_preserves_scan_kind() {
        let e = KestrelError::Scan(ScanError::PartitionMoved("p3".into())).with_context("q=1");
        assert_eq!(e.kind(), ErrorKind::Retryable);
        assert!(format!("{}", e).contains("q=1: p3"));
    }

    #[test]
    fn test_ctx_trait_on_result() {
        let r: Result<(), ScanError> = Err(ScanError::Unavailable("x".into()));
        let e = r.ctx("stage=scatter").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_bail_plan_macro() {
        fn build(bad: bool) -> KestrelResult<()> {
            if bad {
                bail_plan!("branch {} rejected", 2);
            }
            Ok(())
        }
        let e = build(true).unwrap_err();
        assert!(e.is_user_error());
        assert!(format!("{}", e).contains("branch 2 rejected"));
    }

    #[test]
    fn test_from_conversions() {
        fn fails_scan() -> KestrelResult<()> {
            Err(ScanError::Unavailable("io".into()))?
        }
        fn fails_stats() -> KestrelResult<()> {
            Err(StatsError::UnknownAttribute("bogus".into()))?
        }
        assert!(fails_scan().unwrap_err().is_transient());
        assert!(fails_stats().unwrap_err().is_user_error());
    }
}
