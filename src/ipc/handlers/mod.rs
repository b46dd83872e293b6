pub mod backup_exchange;
pub mod billing;
pub mod classes;
pub mod core;
pub mod courses;
pub mod fees;
pub mod library;
pub mod students;
pub mod teachers;
pub mod timetable;
