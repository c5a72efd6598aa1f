use chrono::NaiveDate;
use db::models::{
    attendance_record::{self, AttendanceStatus},
    attendance_session::{self, SessionStatus},
    class, enrollment,
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::attendance_record::AttendanceRecord;
use crate::attendance_session::{AttendanceSession, AttendanceSessionLedger};
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub class_id: i64,
    /// Inclusive bounds on the session date.
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub student_id: Option<i64>,
    /// Also count sessions that are still open. Cancelled sessions never count.
    pub include_active: bool,
}

impl ReportFilter {
    pub fn for_class(class_id: i64) -> Self {
        Self {
            class_id,
            ..Default::default()
        }
    }

    fn admits(&self, session: &AttendanceSession) -> bool {
        let status_ok = match session.status {
            SessionStatus::Completed => true,
            SessionStatus::Active => self.include_active,
            SessionStatus::Cancelled => false,
        };
        status_ok
            && self.from.is_none_or(|from| session.date >= from)
            && self.to.is_none_or(|to| session.date <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentAttendanceSummary {
    pub student_id: i64,
    pub sessions: i32,
    pub present: i32,
    pub late: i32,
    pub absent: i32,
    pub excused: i32,
    /// Sessions without any record for the student.
    pub unmarked: i32,
    pub attendance_rate: f64,
}

impl StudentAttendanceSummary {
    fn empty(student_id: i64, sessions: i32) -> Self {
        Self {
            student_id,
            sessions,
            present: 0,
            late: 0,
            absent: 0,
            excused: 0,
            unmarked: sessions,
            attendance_rate: 0.0,
        }
    }
}

/// Folds the records of the given sessions into one summary per student,
/// ordered by student id. Records for students outside `students` or for
/// sessions not in `sessions` are ignored.
pub fn summarize(
    students: &[i64],
    sessions: &[AttendanceSession],
    records: &[AttendanceRecord],
) -> Vec<StudentAttendanceSummary> {
    let session_count = sessions.len() as i32;
    let mut by_student: BTreeMap<i64, StudentAttendanceSummary> = students
        .iter()
        .map(|&id| (id, StudentAttendanceSummary::empty(id, session_count)))
        .collect();

    for record in records {
        if !sessions.iter().any(|s| s.id == record.session_id) {
            continue;
        }
        let Some(summary) = by_student.get_mut(&record.student_id) else {
            continue;
        };
        match record.status {
            AttendanceStatus::Present => summary.present += 1,
            AttendanceStatus::Late => summary.late += 1,
            AttendanceStatus::Absent => summary.absent += 1,
            AttendanceStatus::Excused => summary.excused += 1,
        }
        summary.unmarked -= 1;
    }

    by_student
        .into_values()
        .map(|mut summary| {
            if summary.sessions > 0 {
                summary.attendance_rate =
                    f64::from(summary.present + summary.late) / f64::from(summary.sessions);
            }
            summary
        })
        .collect()
}

impl AttendanceSessionLedger {
    /// Per-student attendance for a class over the sessions `filter` admits.
    /// Students are the class's current enrolled roster.
    pub async fn class_report(
        &self,
        filter: &ReportFilter,
    ) -> LedgerResult<Vec<StudentAttendanceSummary>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(LedgerError::InvalidInput(format!(
                    "Report range starts after it ends ({from} > {to})"
                )));
            }
        }

        let db = self.db();
        if class::Model::find_by_id(db, filter.class_id).await?.is_none() {
            return Err(LedgerError::ClassNotFound(filter.class_id));
        }

        let mut students = enrollment::Model::enrolled_student_ids(db, filter.class_id).await?;
        if let Some(student_id) = filter.student_id {
            students.retain(|&id| id == student_id);
        }

        let sessions: Vec<AttendanceSession> =
            attendance_session::Model::find_by_class(db, filter.class_id)
                .await?
                .into_iter()
                .filter(|s| filter.admits(s))
                .collect();
        let session_ids: Vec<i64> = sessions.iter().map(|s| s.id).collect();
        let records = attendance_record::Model::find_by_sessions(db, &session_ids).await?;

        Ok(summarize(&students, &sessions, &records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance_record::{MarkAttendance, MarkOrigin};
    use crate::attendance_session::{CloseReason, OpenSession};
    use chrono::{TimeZone, Utc};
    use db::models::attendance_session::CheckInMethod;
    use db::test_utils::{create_class, create_teacher, enroll_students, setup_test_db};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
    }

    async fn open_on(
        ledger: &AttendanceSessionLedger,
        class_id: i64,
        teacher_id: i64,
        d: u32,
    ) -> i64 {
        ledger
            .open(OpenSession {
                class_id,
                teacher_id,
                name: format!("Day {d}"),
                date: day(d),
                start_time: Utc.with_ymd_and_hms(2025, 9, d, 8, 0, 0).unwrap(),
                method: CheckInMethod::Manual,
                check_in_token: None,
                late_allowed: false,
                late_minutes: 0,
            })
            .await
            .unwrap()
            .id
    }

    async fn mark(
        ledger: &AttendanceSessionLedger,
        session_id: i64,
        student_id: i64,
        status: AttendanceStatus,
    ) {
        ledger
            .mark_attendance(MarkAttendance {
                session_id,
                student_id,
                status,
                origin: MarkOrigin::Teacher,
                notes: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_report_counts_completed_sessions_in_range() {
        let db = setup_test_db().await;
        let teacher = create_teacher(&db, "teacher").await;
        let class = create_class(&db, "Grade 9 Maths", teacher.id).await;
        let students = enroll_students(&db, class.id, "learner", 2).await;
        let (a, b) = (students[0].id, students[1].id);
        let ledger = AttendanceSessionLedger::with_defaults(db);

        let mon = open_on(&ledger, class.id, teacher.id, 1).await;
        mark(&ledger, mon, a, AttendanceStatus::Present).await;
        mark(&ledger, mon, b, AttendanceStatus::Absent).await;
        ledger.close(mon, CloseReason::Completed).await.unwrap();

        let tue = open_on(&ledger, class.id, teacher.id, 2).await;
        mark(&ledger, tue, a, AttendanceStatus::Late).await;
        ledger.close(tue, CloseReason::Completed).await.unwrap();

        let wed = open_on(&ledger, class.id, teacher.id, 3).await;
        mark(&ledger, wed, a, AttendanceStatus::Absent).await;
        ledger.close(wed, CloseReason::Cancelled).await.unwrap();

        let thu = open_on(&ledger, class.id, teacher.id, 4).await;
        mark(&ledger, thu, b, AttendanceStatus::Present).await;

        let report = ledger.class_report(&ReportFilter::for_class(class.id)).await.unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].student_id, a);
        assert_eq!(
            (report[0].sessions, report[0].present, report[0].late, report[0].absent),
            (2, 1, 1, 0)
        );
        assert_eq!(report[0].attendance_rate, 1.0);
        assert_eq!((report[1].absent, report[1].unmarked), (1, 1));
        assert_eq!(report[1].attendance_rate, 0.0);

        let with_active = ledger
            .class_report(&ReportFilter {
                include_active: true,
                student_id: Some(b),
                ..ReportFilter::for_class(class.id)
            })
            .await
            .unwrap();
        assert_eq!(with_active.len(), 1);
        assert_eq!((with_active[0].sessions, with_active[0].present), (3, 1));

        let ranged = ledger
            .class_report(&ReportFilter {
                from: Some(day(2)),
                to: Some(day(2)),
                ..ReportFilter::for_class(class.id)
            })
            .await
            .unwrap();
        assert_eq!(ranged[0].sessions, 1);
        assert_eq!(ranged[0].late, 1);
        assert_eq!(ranged[1].unmarked, 1);
    }

    #[tokio::test]
    async fn test_report_rejects_bad_filters() {
        let db = setup_test_db().await;
        let teacher = create_teacher(&db, "teacher").await;
        let class = create_class(&db, "Grade 9 Maths", teacher.id).await;
        let ledger = AttendanceSessionLedger::with_defaults(db);

        let missing = ledger.class_report(&ReportFilter::for_class(404)).await;
        assert!(matches!(missing, Err(LedgerError::ClassNotFound(404))));

        let reversed = ledger
            .class_report(&ReportFilter {
                from: Some(day(5)),
                to: Some(day(1)),
                ..ReportFilter::for_class(class.id)
            })
            .await;
        assert!(matches!(reversed, Err(LedgerError::InvalidInput(_))));

        let empty = ledger.class_report(&ReportFilter::for_class(class.id)).await.unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_summarize_without_sessions_has_zero_rate() {
        let summary = summarize(&[7], &[], &[]);
        assert_eq!(summary, vec![StudentAttendanceSummary::empty(7, 0)]);
        assert_eq!(summary[0].attendance_rate, 0.0);
    }
}
