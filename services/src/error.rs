use common::format_validation_errors;
use sea_orm::{DbErr, SqlErr};
use validator::ValidationErrors;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Everything the attendance ledger can refuse or fail with.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Attendance session {0} not found")]
    SessionNotFound(i64),

    #[error("Attendance session {0} is not active")]
    SessionNotActive(i64),

    #[error("Class {0} not found")]
    ClassNotFound(i64),

    #[error("Student {student_id} is not enrolled in class {class_id}")]
    NotEnrolled { student_id: i64, class_id: i64 },

    #[error("Attendance already recorded for student {student_id} in session {session_id}")]
    DuplicateCheckIn { session_id: i64, student_id: i64 },

    #[error("Invalid or missing check-in token")]
    InvalidToken,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to recompute counts for session {session_id}: {source}")]
    RecomputeFailed {
        session_id: i64,
        #[source]
        source: DbErr,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(DbErr),
}

impl LedgerError {
    /// Store-side failures that may succeed when the same unit is run again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::StoreUnavailable(_) | LedgerError::RecomputeFailed { .. }
        )
    }

    /// Expected outcomes a caller shows to the user as a refusal.
    pub fn is_rejection(&self) -> bool {
        !self.is_transient()
    }

    pub(crate) fn recompute(session_id: i64) -> impl FnOnce(DbErr) -> LedgerError {
        move |source| LedgerError::RecomputeFailed { session_id, source }
    }
}

/// Constraint violations are permanent and surface as `InvalidInput`; every
/// other store error is treated as the store being unavailable.
impl From<DbErr> for LedgerError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::ForeignKeyConstraintViolation(_)) => LedgerError::InvalidInput(
                "Referenced student, class or teacher does not exist".into(),
            ),
            Some(SqlErr::UniqueConstraintViolation(detail)) => {
                LedgerError::InvalidInput(format!("Duplicate entry: {detail}"))
            }
            _ => LedgerError::StoreUnavailable(err),
        }
    }
}

impl From<ValidationErrors> for LedgerError {
    fn from(errors: ValidationErrors) -> Self {
        LedgerError::InvalidInput(format_validation_errors(&errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_are_transient() {
        assert!(LedgerError::StoreUnavailable(DbErr::Custom("locked".into())).is_transient());
        assert!(LedgerError::recompute(3)(DbErr::RecordNotUpdated).is_transient());
    }

    #[test]
    fn non_constraint_store_errors_stay_transient() {
        let err = LedgerError::from(DbErr::Custom("database is locked".into()));
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn validation_outcomes_are_rejections() {
        let rejections = [
            LedgerError::SessionNotFound(1),
            LedgerError::SessionNotActive(1),
            LedgerError::NotEnrolled {
                student_id: 2,
                class_id: 3,
            },
            LedgerError::DuplicateCheckIn {
                session_id: 1,
                student_id: 2,
            },
            LedgerError::InvalidToken,
            LedgerError::InvalidInput("Referenced student, class or teacher does not exist".into()),
        ];
        assert!(rejections.iter().all(LedgerError::is_rejection));
    }

    #[test]
    fn messages_name_the_ids() {
        let err = LedgerError::DuplicateCheckIn {
            session_id: 7,
            student_id: 42,
        };
        assert_eq!(
            err.to_string(),
            "Attendance already recorded for student 42 in session 7"
        );
    }
}
