use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::QueryOrder;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "attendance_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    pub student_id: i64,
    pub status: AttendanceStatus,
    pub marked_at: DateTime<Utc>,
    pub origin: MarkOrigin,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
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
pub enum AttendanceStatus {
    #[sea_orm(string_value = "present")]
    Present,

    #[sea_orm(string_value = "absent")]
    Absent,

    #[sea_orm(string_value = "late")]
    Late,

    #[sea_orm(string_value = "excused")]
    Excused,
}

/// Who produced the mark.
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
pub enum MarkOrigin {
    #[sea_orm(string_value = "teacher")]
    Teacher,

    #[sea_orm(string_value = "student")]
    Student,

    #[sea_orm(string_value = "system")]
    System,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attendance_session::Entity",
        from = "Column::SessionId",
        to = "super::attendance_session::Column::Id"
    )]
    Session,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::StudentId",
        to = "super::user::Column::Id"
    )]
    Student,
}

impl Related<super::attendance_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// A mark as submitted, before it is written.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub session_id: i64,
    pub student_id: i64,
    pub status: AttendanceStatus,
    pub marked_at: DateTime<Utc>,
    pub origin: MarkOrigin,
    pub notes: Option<String>,
}

impl NewRecord {
    fn into_active_model(self) -> ActiveModel {
        ActiveModel {
            session_id: Set(self.session_id),
            student_id: Set(self.student_id),
            status: Set(self.status),
            marked_at: Set(self.marked_at),
            origin: Set(self.origin),
            notes: Set(self.notes),
            ..Default::default()
        }
    }
}

fn on_session_student() -> OnConflict {
    OnConflict::columns([Column::SessionId, Column::StudentId])
}

impl Model {
    pub async fn find_for_student<C>(
        db: &C,
        session_id: i64,
        student_id: i64,
    ) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .filter(Column::StudentId.eq(student_id))
            .one(db)
            .await
    }

    pub async fn find_by_session<C>(db: &C, session_id: i64) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .order_by_asc(Column::StudentId)
            .all(db)
            .await
    }

    pub async fn find_by_sessions<C>(db: &C, session_ids: &[i64]) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        if session_ids.is_empty() {
            return Ok(Vec::new());
        }
        Entity::find()
            .filter(Column::SessionId.is_in(session_ids.iter().copied()))
            .order_by_asc(Column::SessionId)
            .order_by_asc(Column::StudentId)
            .all(db)
            .await
    }

    /// Inserts the mark, or overwrites status, time, origin and notes of the
    /// existing record for the same (session, student).
    pub async fn upsert<C>(db: &C, record: NewRecord) -> Result<Model, DbErr>
    where
        C: ConnectionTrait,
    {
        let (session_id, student_id) = (record.session_id, record.student_id);

        Entity::insert(record.into_active_model())
            .on_conflict(
                on_session_student()
                    .update_columns([
                        Column::Status,
                        Column::MarkedAt,
                        Column::Origin,
                        Column::Notes,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;

        Self::find_for_student(db, session_id, student_id)
            .await?
            .ok_or_else(|| {
                DbErr::RecordNotFound(format!(
                    "Attendance record for session {session_id}, student {student_id} vanished after upsert"
                ))
            })
    }

    /// Inserts the mark only if the student has no record in the session yet.
    /// Returns `None` when a record already existed; it is left untouched.
    pub async fn insert_once<C>(db: &C, record: NewRecord) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        let (session_id, student_id) = (record.session_id, record.student_id);

        let inserted = Entity::insert(record.into_active_model())
            .on_conflict(on_session_student().do_nothing().to_owned())
            .exec_without_returning(db)
            .await?;

        if inserted == 0 {
            return Ok(None);
        }
        Self::find_for_student(db, session_id, student_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attendance_session::{self, CheckInMethod, NewSession};
    use crate::test_utils::{create_class, create_student, create_teacher, setup_test_db};
    use chrono::{NaiveDate, TimeZone};
    use sea_orm::{DatabaseConnection, PaginatorTrait};

    async fn seed_session(db: &DatabaseConnection) -> (attendance_session::Model, i64) {
        let teacher = create_teacher(db, "teach").await;
        let class = create_class(db, "Chemistry", teacher.id).await;
        let student = create_student(db, "stud").await;
        let session = attendance_session::Model::create(
            db,
            NewSession {
                class_id: class.id,
                teacher_id: teacher.id,
                name: "Lab".into(),
                date: NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
                start_time: Utc.with_ymd_and_hms(2025, 9, 8, 10, 0, 0).unwrap(),
                method: CheckInMethod::Manual,
                check_in_token: None,
                late_allowed: false,
                late_minutes: 0,
            },
            1,
        )
        .await
        .unwrap();
        (session, student.id)
    }

    fn mark(session_id: i64, student_id: i64, status: AttendanceStatus) -> NewRecord {
        NewRecord {
            session_id,
            student_id,
            status,
            marked_at: Utc::now(),
            origin: MarkOrigin::Teacher,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_single_row() {
        let db = setup_test_db().await;
        let (session, student_id) = seed_session(&db).await;

        let first = Model::upsert(&db, mark(session.id, student_id, AttendanceStatus::Absent))
            .await
            .unwrap();
        let mut again = mark(session.id, student_id, AttendanceStatus::Present);
        again.notes = Some("arrived after register".into());
        let second = Model::upsert(&db, again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, AttendanceStatus::Present);
        assert_eq!(second.notes.as_deref(), Some("arrived after register"));
        assert_eq!(Entity::find().count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_once_leaves_existing_record() {
        let db = setup_test_db().await;
        let (session, student_id) = seed_session(&db).await;

        let first = Model::insert_once(&db, mark(session.id, student_id, AttendanceStatus::Present))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = Model::insert_once(&db, mark(session.id, student_id, AttendanceStatus::Late))
            .await
            .unwrap();
        assert!(second.is_none());

        let stored = Model::find_for_student(&db, session.id, student_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn test_records_cascade_with_session() {
        let db = setup_test_db().await;
        let (session, student_id) = seed_session(&db).await;
        Model::upsert(&db, mark(session.id, student_id, AttendanceStatus::Present))
            .await
            .unwrap();

        assert!(attendance_session::Model::delete_by_id(&db, session.id).await.unwrap());
        assert!(Model::find_by_session(&db, session.id).await.unwrap().is_empty());
    }
}
