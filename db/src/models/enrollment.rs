use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Class-roster membership of a student.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "enrollments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub student_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub class_id: i64,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Only `Enrolled` members count toward session totals and may self-check-in.
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
pub enum EnrollmentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,

    #[sea_orm(string_value = "enrolled")]
    Enrolled,

    #[sea_orm(string_value = "rejected")]
    Rejected,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::StudentId",
        to = "super::user::Column::Id"
    )]
    Student,
    #[sea_orm(
        belongs_to = "super::class::Entity",
        from = "Column::ClassId",
        to = "super::class::Column::Id"
    )]
    Class,
}

impl Related<super::class::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Class.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Adds the student to the roster or moves an existing membership to `status`.
    pub async fn set_status<C>(
        db: &C,
        student_id: i64,
        class_id: i64,
        status: EnrollmentStatus,
    ) -> Result<(), DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        let row = ActiveModel {
            student_id: Set(student_id),
            class_id: Set(class_id),
            status: Set(status),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Entity::insert(row)
            .on_conflict(
                OnConflict::columns([Column::StudentId, Column::ClassId])
                    .update_columns([Column::Status, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        Ok(())
    }

    /// Roster query: ids of every `Enrolled` student of the class, ascending.
    pub async fn enrolled_student_ids<C>(db: &C, class_id: i64) -> Result<Vec<i64>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .select_only()
            .column(Column::StudentId)
            .filter(Column::ClassId.eq(class_id))
            .filter(Column::Status.eq(EnrollmentStatus::Enrolled))
            .order_by_asc(Column::StudentId)
            .into_tuple::<i64>()
            .all(db)
            .await
    }

    pub async fn is_enrolled<C>(db: &C, student_id: i64, class_id: i64) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        let row = Entity::find_by_id((student_id, class_id)).one(db).await?;
        Ok(matches!(row, Some(m) if m.status == EnrollmentStatus::Enrolled))
    }
}
