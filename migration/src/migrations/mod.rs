pub mod m202509010001_create_users;
pub mod m202509010002_create_classes;
pub mod m202509010003_create_enrollments;
pub mod m202509080001_create_attendance;
