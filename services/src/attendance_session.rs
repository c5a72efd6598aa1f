//! Attendance session lifecycle.
//!
//! [`AttendanceSessionLedger`] opens sessions, keeps their denormalized counts
//! in step with the underlying records and moves them into a terminal state.
//! It keeps no state between calls: every operation re-reads what it needs
//! inside its own transaction.

use chrono::{DateTime, NaiveDate, Utc};
use common::config::AppConfig;
use db::models::{
    attendance_record,
    attendance_session::{self, AttendanceCounts, CheckInMethod, NewSession, SessionStatus},
    class, enrollment,
};
use log::{debug, info};
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use validator::Validate;

use crate::error::{LedgerError, LedgerResult};
use crate::retry::RetryPolicy;

pub use db::models::attendance_session::Model as AttendanceSession;

#[derive(Debug, Clone, Default)]
pub struct LedgerConfig {
    /// Applied to every transactional unit that includes a count recompute.
    pub retry: RetryPolicy,
}

impl LedgerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            retry: RetryPolicy {
                attempts: config.recompute_retry_attempts,
                backoff: Duration::from_millis(config.recompute_retry_backoff_ms),
            },
        }
    }
}

/// Input for [`AttendanceSessionLedger::open`]. The teacher id is trusted as
/// already verified by the caller.
#[derive(Debug, Clone, Validate)]
pub struct OpenSession {
    pub class_id: i64,
    pub teacher_id: i64,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Session name must be between 1 and 255 characters"
    ))]
    pub name: String,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub method: CheckInMethod,
    /// Required for [`CheckInMethod::Qr`]. Stored trimmed and compared
    /// verbatim on check-in.
    pub check_in_token: Option<String>,
    pub late_allowed: bool,
    #[validate(range(
        min = 0,
        max = 240,
        message = "Late allowance must be between 0 and 240 minutes"
    ))]
    pub late_minutes: i32,
}

impl OpenSession {
    fn into_new_session(self) -> LedgerResult<NewSession> {
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            return Err(LedgerError::InvalidInput("Session name must not be blank".into()));
        }

        let check_in_token = self
            .check_in_token
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());
        if self.method == CheckInMethod::Qr && check_in_token.is_none() {
            return Err(LedgerError::InvalidInput("QR sessions require a check-in token".into()));
        }

        Ok(NewSession {
            class_id: self.class_id,
            teacher_id: self.teacher_id,
            name,
            date: self.date,
            start_time: self.start_time,
            method: self.method,
            check_in_token,
            late_allowed: self.late_allowed,
            late_minutes: self.late_minutes,
        })
    }
}

/// Terminal state requested by [`AttendanceSessionLedger::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    Completed,
    Cancelled,
}

impl From<CloseReason> for SessionStatus {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::Completed => SessionStatus::Completed,
            CloseReason::Cancelled => SessionStatus::Cancelled,
        }
    }
}

pub struct AttendanceSessionLedger {
    db: DatabaseConnection,
    config: LedgerConfig,
}

impl AttendanceSessionLedger {
    pub fn new(db: DatabaseConnection, config: LedgerConfig) -> Self {
        Self { db, config }
    }

    pub fn with_defaults(db: DatabaseConnection) -> Self {
        Self::new(db, LedgerConfig::default())
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Opens an `active` session with zeroed counts and `total_students` set
    /// to the class's current enrolled roster size.
    pub async fn open(&self, params: OpenSession) -> LedgerResult<AttendanceSession> {
        params.validate()?;
        let new_session = params.into_new_session()?;
        let class_id = new_session.class_id;

        let txn = self.db.begin().await?;
        if class::Model::find_by_id(&txn, class_id).await?.is_none() {
            return Err(LedgerError::ClassNotFound(class_id));
        }
        let roster = enrollment::Model::enrolled_student_ids(&txn, class_id).await?;
        let session =
            attendance_session::Model::create(&txn, new_session, roster.len() as i32).await?;
        txn.commit().await?;

        info!(
            "Opened attendance session {} '{}' for class {} ({} enrolled)",
            session.id, session.name, class_id, session.total_students
        );
        Ok(session)
    }

    /// Recalculates the session's counts from its records and the current
    /// roster. Terminal sessions keep the snapshot taken when they closed.
    pub async fn recompute_counts(&self, session_id: i64) -> LedgerResult<AttendanceSession> {
        let retry = self.config.retry;
        retry
            .run("recompute_counts", move || self.recompute_once(session_id))
            .await
    }

    async fn recompute_once(&self, session_id: i64) -> LedgerResult<AttendanceSession> {
        let txn = self.db.begin().await?;
        let session = claim_session(&txn, session_id).await?;
        if session.status.is_terminal() {
            txn.rollback().await?;
            return self.find_session(session_id).await;
        }

        let counts = recompute_in(&txn, &session).await?;
        txn.commit().await.map_err(LedgerError::recompute(session_id))?;

        debug!(
            "Recomputed session {session_id}: {} present, {} absent, {} late, {} excused of {}",
            counts.present, counts.absent, counts.late, counts.excused, counts.total_students
        );
        Ok(with_counts(session, counts))
    }

    /// Moves an `active` session to `completed` (stamping the end time) or
    /// `cancelled`, taking a final count snapshot. Closing a session that is
    /// already terminal changes nothing and succeeds.
    pub async fn close(
        &self,
        session_id: i64,
        reason: CloseReason,
    ) -> LedgerResult<AttendanceSession> {
        let retry = self.config.retry;
        retry
            .run("close", move || self.close_once(session_id, reason))
            .await
    }

    async fn close_once(
        &self,
        session_id: i64,
        reason: CloseReason,
    ) -> LedgerResult<AttendanceSession> {
        let txn = self.db.begin().await?;
        let session = claim_session(&txn, session_id).await?;
        if session.status.is_terminal() {
            txn.rollback().await?;
            debug!(
                "Session {session_id} already {}; ignoring close({reason:?})",
                session.status
            );
            return self.find_session(session_id).await;
        }

        recompute_in(&txn, &session).await?;
        let end_time = match reason {
            CloseReason::Completed => Some(Utc::now()),
            CloseReason::Cancelled => None,
        };
        let closed =
            attendance_session::Model::finish(&txn, session_id, reason.into(), end_time).await?;
        txn.commit().await?;

        info!(
            "Closed attendance session {session_id} as {} ({} of {} marked)",
            closed.status,
            closed.counts().marked(),
            closed.total_students
        );
        Ok(closed)
    }

    /// Replaces the session's audit notes. Allowed in every state.
    pub async fn annotate(
        &self,
        session_id: i64,
        notes: Option<String>,
    ) -> LedgerResult<AttendanceSession> {
        if attendance_session::Model::find_by_id(&self.db, session_id)
            .await?
            .is_none()
        {
            return Err(LedgerError::SessionNotFound(session_id));
        }
        let notes = notes.filter(|n| !n.trim().is_empty());
        Ok(attendance_session::Model::set_notes(&self.db, session_id, notes).await?)
    }

    pub async fn find_session(&self, session_id: i64) -> LedgerResult<AttendanceSession> {
        attendance_session::Model::find_by_id(&self.db, session_id)
            .await?
            .ok_or(LedgerError::SessionNotFound(session_id))
    }

    pub async fn sessions_for_class(&self, class_id: i64) -> LedgerResult<Vec<AttendanceSession>> {
        Ok(attendance_session::Model::find_by_class(&self.db, class_id).await?)
    }

    /// Deletes the session together with all of its records.
    pub async fn delete_session(&self, session_id: i64) -> LedgerResult<()> {
        if !attendance_session::Model::delete_by_id(&self.db, session_id).await? {
            return Err(LedgerError::SessionNotFound(session_id));
        }
        info!("Deleted attendance session {session_id}");
        Ok(())
    }
}

/// Takes the session's write lock for the enclosing transaction, then reads it.
pub(crate) async fn claim_session<C>(db: &C, session_id: i64) -> LedgerResult<AttendanceSession>
where
    C: ConnectionTrait,
{
    if !attendance_session::Model::claim(db, session_id).await? {
        return Err(LedgerError::SessionNotFound(session_id));
    }
    attendance_session::Model::find_by_id(db, session_id)
        .await?
        .ok_or(LedgerError::SessionNotFound(session_id))
}

/// Tallies the session's records against the current roster and writes the
/// counts. Must run inside the same transaction as any record change it covers.
pub(crate) async fn recompute_in<C>(
    db: &C,
    session: &AttendanceSession,
) -> LedgerResult<AttendanceCounts>
where
    C: ConnectionTrait,
{
    let to_err = || LedgerError::recompute(session.id);

    let roster: HashSet<i64> = enrollment::Model::enrolled_student_ids(db, session.class_id)
        .await
        .map_err(to_err())?
        .into_iter()
        .collect();
    let records = attendance_record::Model::find_by_session(db, session.id)
        .await
        .map_err(to_err())?;

    let counts = AttendanceCounts::tally(&roster, &records);
    attendance_session::Model::write_counts(db, session.id, counts)
        .await
        .map_err(to_err())?;
    Ok(counts)
}

fn with_counts(mut session: AttendanceSession, counts: AttendanceCounts) -> AttendanceSession {
    session.present_count = counts.present;
    session.absent_count = counts.absent;
    session.late_count = counts.late;
    session.excused_count = counts.excused;
    session.total_students = counts.total_students;
    session
}
