use sea_orm_migration::prelude::*;

use crate::migrations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(migrations::m202509010001_create_users::Migration),
            Box::new(migrations::m202509010002_create_classes::Migration),
            Box::new(migrations::m202509010003_create_enrollments::Migration),
            Box::new(migrations::m202509080001_create_attendance::Migration),
        ]
    }
}
