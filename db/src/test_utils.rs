use common::database::database_url;
use migration::Migrator;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::path::Path;

use crate::models::{
    class,
    enrollment::{self, EnrollmentStatus},
    user::{self, UserRole},
};

/// Fresh in-memory database with every migration applied.
///
/// The pool is pinned to one connection: each SQLite memory connection is its
/// own database.
pub async fn setup_test_db() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(opts)
        .await
        .expect("Failed to connect to in-memory db");
    Migrator::up(&db, None).await.expect("Failed to run migrations");

    db
}

/// Migrated database in the SQLite file at `path`, behind a pool of
/// `max_connections`. Concurrent transactions on it contend for the file's
/// write lock.
pub async fn setup_file_test_db(path: &Path, max_connections: u32) -> DatabaseConnection {
    let mut opts = ConnectOptions::new(database_url(&path.to_string_lossy()));
    opts.max_connections(max_connections)
        .min_connections(1)
        .sqlx_logging(false);

    let db = Database::connect(opts)
        .await
        .expect("Failed to connect to file db");
    Migrator::up(&db, None).await.expect("Failed to run migrations");

    db
}

pub async fn create_teacher(db: &DatabaseConnection, username: &str) -> user::Model {
    user::Model::create(db, username, &format!("{username}@school.test"), UserRole::Teacher)
        .await
        .expect("create teacher")
}

pub async fn create_student(db: &DatabaseConnection, username: &str) -> user::Model {
    user::Model::create(db, username, &format!("{username}@school.test"), UserRole::Student)
        .await
        .expect("create student")
}

pub async fn create_class(db: &DatabaseConnection, name: &str, teacher_id: i64) -> class::Model {
    class::Model::create(db, name, teacher_id)
        .await
        .expect("create class")
}

/// Creates `count` students named `{prefix}1..` and enrolls them in the class.
pub async fn enroll_students(
    db: &DatabaseConnection,
    class_id: i64,
    prefix: &str,
    count: usize,
) -> Vec<user::Model> {
    let mut students = Vec::with_capacity(count);
    for i in 1..=count {
        let student = create_student(db, &format!("{prefix}{i}")).await;
        enrollment::Model::set_status(db, student.id, class_id, EnrollmentStatus::Enrolled)
            .await
            .expect("enroll student");
        students.push(student);
    }
    students
}
