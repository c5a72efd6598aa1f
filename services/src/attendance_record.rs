use chrono::{DateTime, Duration, Utc};
use db::models::{
    attendance_record::{self, NewRecord},
    enrollment,
};
use log::debug;
use sea_orm::TransactionTrait;

use crate::attendance_session::{
    AttendanceSession, AttendanceSessionLedger, claim_session, recompute_in,
};
use crate::error::{LedgerError, LedgerResult};

pub use db::models::attendance_record::{AttendanceStatus, MarkOrigin, Model as AttendanceRecord};

/// A status submitted for one student in one session.
#[derive(Debug, Clone)]
pub struct MarkAttendance {
    pub session_id: i64,
    pub student_id: i64,
    pub status: AttendanceStatus,
    pub origin: MarkOrigin,
    pub notes: Option<String>,
}

/// A student's own check-in, e.g. from scanning the session's QR code.
#[derive(Debug, Clone)]
pub struct CheckIn {
    pub session_id: i64,
    pub student_id: i64,
    pub token: Option<String>,
    pub at: DateTime<Utc>,
}

struct MarkTarget {
    session_id: i64,
    student_id: i64,
    origin: MarkOrigin,
    notes: Option<String>,
    at: DateTime<Utc>,
}

/// Checks a presented token against the session's. Sessions without a token
/// accept anything.
pub fn verify_token(session: &AttendanceSession, presented: Option<&str>) -> LedgerResult<()> {
    match session.check_in_token.as_deref() {
        None => Ok(()),
        Some(expected) if presented == Some(expected) => Ok(()),
        Some(_) => Err(LedgerError::InvalidToken),
    }
}

/// `Present` up to `start_time + grace`, `Late` afterwards. The grace is the
/// late allowance when enabled and zero otherwise.
pub fn arrival_status(session: &AttendanceSession, at: DateTime<Utc>) -> AttendanceStatus {
    let grace = if session.late_allowed {
        Duration::minutes(i64::from(session.late_minutes.max(0)))
    } else {
        Duration::zero()
    };

    if at <= session.start_time + grace {
        AttendanceStatus::Present
    } else {
        AttendanceStatus::Late
    }
}

impl AttendanceSessionLedger {
    /// Records `status` for the student and refreshes the session counts in
    /// the same transaction.
    ///
    /// Teacher and system marks overwrite any earlier mark. Student marks are
    /// write-once and require an `enrolled` membership in the session's class.
    pub async fn mark_attendance(&self, params: MarkAttendance) -> LedgerResult<AttendanceRecord> {
        let status = params.status;
        let target = MarkTarget {
            session_id: params.session_id,
            student_id: params.student_id,
            origin: params.origin,
            notes: params.notes.filter(|n| !n.trim().is_empty()),
            at: Utc::now(),
        };
        self.submit(target, move |_| Ok(status)).await
    }

    /// Self check-in: verifies the token, derives present/late from the
    /// arrival time and records the mark as student-originated.
    pub async fn check_in(&self, params: CheckIn) -> LedgerResult<AttendanceRecord> {
        let token = params.token;
        let at = params.at;
        let target = MarkTarget {
            session_id: params.session_id,
            student_id: params.student_id,
            origin: MarkOrigin::Student,
            notes: None,
            at,
        };
        self.submit(target, move |session| {
            verify_token(session, token.as_deref())?;
            Ok(arrival_status(session, at))
        })
        .await
    }

    pub async fn records_for_session(
        &self,
        session_id: i64,
    ) -> LedgerResult<Vec<AttendanceRecord>> {
        self.find_session(session_id).await?;
        Ok(attendance_record::Model::find_by_session(self.db(), session_id).await?)
    }

    async fn submit<D>(&self, target: MarkTarget, decide: D) -> LedgerResult<AttendanceRecord>
    where
        D: Fn(&AttendanceSession) -> LedgerResult<AttendanceStatus>,
    {
        let retry = self.config().retry;
        let (target, decide) = (&target, &decide);
        let result = retry
            .run("mark_attendance", move || self.submit_once(target, decide))
            .await;

        match &result {
            Ok(record) => debug!(
                "Session {}: student {} marked {} by {}",
                record.session_id, record.student_id, record.status, record.origin
            ),
            Err(err) if err.is_rejection() => debug!(
                "Session {}: mark for student {} rejected: {err}",
                target.session_id, target.student_id
            ),
            Err(_) => {}
        }
        result
    }

    async fn submit_once<D>(
        &self,
        target: &MarkTarget,
        decide: &D,
    ) -> LedgerResult<AttendanceRecord>
    where
        D: Fn(&AttendanceSession) -> LedgerResult<AttendanceStatus>,
    {
        let txn = self.db().begin().await?;
        let session = claim_session(&txn, target.session_id).await?;
        if !session.is_active() {
            return Err(LedgerError::SessionNotActive(session.id));
        }

        let record = NewRecord {
            session_id: session.id,
            student_id: target.student_id,
            status: decide(&session)?,
            marked_at: target.at,
            origin: target.origin,
            notes: target.notes.clone(),
        };

        let stored = match target.origin {
            MarkOrigin::Student => {
                let enrolled =
                    enrollment::Model::is_enrolled(&txn, target.student_id, session.class_id)
                        .await?;
                if !enrolled {
                    return Err(LedgerError::NotEnrolled {
                        student_id: target.student_id,
                        class_id: session.class_id,
                    });
                }
                attendance_record::Model::insert_once(&txn, record)
                    .await?
                    .ok_or(LedgerError::DuplicateCheckIn {
                        session_id: session.id,
                        student_id: target.student_id,
                    })?
            }
            MarkOrigin::Teacher | MarkOrigin::System => {
                attendance_record::Model::upsert(&txn, record).await?
            }
        };

        recompute_in(&txn, &session).await?;
        txn.commit().await?;
        Ok(stored)
    }
}
