use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::QueryOrder;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::{Display, EnumString};

use super::attendance_record::{self, AttendanceStatus};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "attendance_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub class_id: i64,
    pub teacher_id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub method: CheckInMethod,
    #[serde(skip_serializing)]
    pub check_in_token: Option<String>,
    pub late_allowed: bool,
    pub late_minutes: i32,
    pub present_count: i32,
    pub absent_count: i32,
    pub late_count: i32,
    pub excused_count: i32,
    pub total_students: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SessionStatus {
    #[sea_orm(string_value = "active")]
    Active,

    #[sea_orm(string_value = "completed")]
    Completed,

    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl SessionStatus {
    /// `Completed` and `Cancelled` have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CheckInMethod {
    #[sea_orm(string_value = "manual")]
    Manual,

    #[sea_orm(string_value = "qr")]
    Qr,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::class::Entity",
        from = "Column::ClassId",
        to = "super::class::Column::Id"
    )]
    Class,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::TeacherId",
        to = "super::user::Column::Id"
    )]
    Teacher,
    #[sea_orm(has_many = "super::attendance_record::Entity")]
    Records,
}

impl Related<super::class::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Class.def()
    }
}

impl Related<super::attendance_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Records.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Column values for a session about to be inserted.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub class_id: i64,
    pub teacher_id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub method: CheckInMethod,
    pub check_in_token: Option<String>,
    pub late_allowed: bool,
    pub late_minutes: i32,
}

/// The denormalized per-session tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceCounts {
    pub present: i32,
    pub absent: i32,
    pub late: i32,
    pub excused: i32,
    pub total_students: i32,
}

impl AttendanceCounts {
    /// Tallies `records` whose student is in `roster`; everyone else is ignored.
    ///
    /// `total_students` is the roster size, so the status counts never exceed it
    /// as long as records are unique per student.
    pub fn tally<'a, I>(roster: &HashSet<i64>, records: I) -> Self
    where
        I: IntoIterator<Item = &'a attendance_record::Model>,
    {
        let mut counts = AttendanceCounts {
            total_students: roster.len() as i32,
            ..Default::default()
        };
        for record in records {
            if !roster.contains(&record.student_id) {
                continue;
            }
            match record.status {
                AttendanceStatus::Present => counts.present += 1,
                AttendanceStatus::Absent => counts.absent += 1,
                AttendanceStatus::Late => counts.late += 1,
                AttendanceStatus::Excused => counts.excused += 1,
            }
        }
        counts
    }

    pub fn marked(&self) -> i32 {
        self.present + self.absent + self.late + self.excused
    }
}

impl Model {
    pub async fn create<C>(db: &C, params: NewSession, total_students: i32) -> Result<Model, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        ActiveModel {
            class_id: Set(params.class_id),
            teacher_id: Set(params.teacher_id),
            name: Set(params.name),
            date: Set(params.date),
            start_time: Set(params.start_time),
            end_time: Set(None),
            status: Set(SessionStatus::Active),
            method: Set(params.method),
            check_in_token: Set(params.check_in_token),
            late_allowed: Set(params.late_allowed),
            late_minutes: Set(params.late_minutes),
            present_count: Set(0),
            absent_count: Set(0),
            late_count: Set(0),
            excused_count: Set(0),
            total_students: Set(total_students),
            notes: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_id<C>(db: &C, id: i64) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find_by_id(id).one(db).await
    }

    /// Bumps `updated_at` so the enclosing transaction holds the row's write
    /// lock before anything else is read. Returns `false` if no such session.
    pub async fn claim<C>(db: &C, id: i64) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        let res = Entity::update_many()
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    /// Writes every count column in one statement.
    pub async fn write_counts<C>(db: &C, id: i64, counts: AttendanceCounts) -> Result<(), DbErr>
    where
        C: ConnectionTrait,
    {
        let res = Entity::update_many()
            .col_expr(Column::PresentCount, Expr::value(counts.present))
            .col_expr(Column::AbsentCount, Expr::value(counts.absent))
            .col_expr(Column::LateCount, Expr::value(counts.late))
            .col_expr(Column::ExcusedCount, Expr::value(counts.excused))
            .col_expr(Column::TotalStudents, Expr::value(counts.total_students))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .exec(db)
            .await?;

        if res.rows_affected == 0 {
            return Err(DbErr::RecordNotUpdated);
        }
        Ok(())
    }

    /// Moves the session to a terminal status. `end_time` is left as-is when `None`.
    pub async fn finish<C>(
        db: &C,
        id: i64,
        status: SessionStatus,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Model, DbErr>
    where
        C: ConnectionTrait,
    {
        let model = Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("Attendance session {id} not found")))?;

        let mut active: ActiveModel = model.into();
        active.status = Set(status);
        if end_time.is_some() {
            active.end_time = Set(end_time);
        }
        active.updated_at = Set(Utc::now());
        active.update(db).await
    }

    pub async fn set_notes<C>(db: &C, id: i64, notes: Option<String>) -> Result<Model, DbErr>
    where
        C: ConnectionTrait,
    {
        let model = Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("Attendance session {id} not found")))?;

        let mut active: ActiveModel = model.into();
        active.notes = Set(notes);
        active.updated_at = Set(Utc::now());
        active.update(db).await
    }

    pub async fn find_by_class<C>(db: &C, class_id: i64) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::ClassId.eq(class_id))
            .order_by_asc(Column::Date)
            .order_by_asc(Column::StartTime)
            .order_by_asc(Column::Id)
            .all(db)
            .await
    }

    /// Deletes the session. Its records go with it via `ON DELETE CASCADE`.
    pub async fn delete_by_id<C>(db: &C, id: i64) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        let res = Entity::delete_by_id(id).exec(db).await?;
        Ok(res.rows_affected > 0)
    }

    pub fn counts(&self) -> AttendanceCounts {
        AttendanceCounts {
            present: self.present_count,
            absent: self.absent_count,
            late: self.late_count,
            excused: self.excused_count,
            total_students: self.total_students,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attendance_record::MarkOrigin;
    use crate::test_utils::{create_class, create_teacher, setup_test_db};
    use chrono::TimeZone;

    fn record(student_id: i64, status: AttendanceStatus) -> attendance_record::Model {
        attendance_record::Model {
            id: student_id,
            session_id: 1,
            student_id,
            status,
            marked_at: Utc::now(),
            origin: MarkOrigin::Teacher,
            notes: None,
        }
    }

    fn new_session(class_id: i64, teacher_id: i64) -> NewSession {
        NewSession {
            class_id,
            teacher_id,
            name: "Period 1".into(),
            date: NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
            start_time: Utc.with_ymd_and_hms(2025, 9, 8, 8, 0, 0).unwrap(),
            method: CheckInMethod::Manual,
            check_in_token: None,
            late_allowed: false,
            late_minutes: 0,
        }
    }

    #[test]
    fn test_tally_ignores_students_outside_roster() {
        let roster: HashSet<i64> = [1, 2, 3, 4].into_iter().collect();
        let records = vec![
            record(1, AttendanceStatus::Present),
            record(2, AttendanceStatus::Late),
            record(3, AttendanceStatus::Excused),
            record(9, AttendanceStatus::Present),
        ];

        let counts = AttendanceCounts::tally(&roster, &records);

        assert_eq!(
            counts,
            AttendanceCounts {
                present: 1,
                absent: 0,
                late: 1,
                excused: 1,
                total_students: 4,
            }
        );
        assert!(counts.marked() <= counts.total_students);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
    }

    #[tokio::test]
    async fn test_create_starts_active_with_zero_counts() {
        let db = setup_test_db().await;
        let teacher = create_teacher(&db, "teach").await;
        let class = create_class(&db, "Biology", teacher.id).await;

        let s = Model::create(&db, new_session(class.id, teacher.id), 3)
            .await
            .unwrap();

        assert!(s.is_active());
        assert_eq!(s.counts().marked(), 0);
        assert_eq!(s.total_students, 3);
        assert_eq!(s.end_time, None);
    }

    #[tokio::test]
    async fn test_write_counts_updates_all_fields() {
        let db = setup_test_db().await;
        let teacher = create_teacher(&db, "teach").await;
        let class = create_class(&db, "Biology", teacher.id).await;
        let s = Model::create(&db, new_session(class.id, teacher.id), 0)
            .await
            .unwrap();

        let counts = AttendanceCounts {
            present: 2,
            absent: 1,
            late: 1,
            excused: 1,
            total_students: 6,
        };
        Model::write_counts(&db, s.id, counts).await.unwrap();

        let reloaded = Model::find_by_id(&db, s.id).await.unwrap().unwrap();
        assert_eq!(reloaded.counts(), counts);
    }

    #[tokio::test]
    async fn test_write_counts_on_missing_session_fails() {
        let db = setup_test_db().await;
        let res = Model::write_counts(&db, 404, AttendanceCounts::default()).await;
        assert!(matches!(res, Err(DbErr::RecordNotUpdated)));
        assert!(!Model::claim(&db, 404).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_class_orders_by_date_then_start() {
        let db = setup_test_db().await;
        let teacher = create_teacher(&db, "teach").await;
        let class = create_class(&db, "Biology", teacher.id).await;

        let mut later = new_session(class.id, teacher.id);
        later.date = NaiveDate::from_ymd_opt(2025, 9, 9).unwrap();
        later.start_time = Utc.with_ymd_and_hms(2025, 9, 9, 8, 0, 0).unwrap();
        let later = Model::create(&db, later, 0).await.unwrap();
        let earlier = Model::create(&db, new_session(class.id, teacher.id), 0)
            .await
            .unwrap();

        let ids: Vec<i64> = Model::find_by_class(&db, class.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![earlier.id, later.id]);
    }
}
