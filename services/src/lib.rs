pub mod attendance_record;
pub mod attendance_report;
pub mod attendance_session;
pub mod error;
pub mod retry;

pub use attendance_record::{
    AttendanceRecord, AttendanceStatus, CheckIn, MarkAttendance, MarkOrigin,
};
pub use attendance_report::{ReportFilter, StudentAttendanceSummary};
pub use attendance_session::{
    AttendanceSession, AttendanceSessionLedger, CloseReason, LedgerConfig, OpenSession,
};
pub use error::{LedgerError, LedgerResult};
pub use retry::RetryPolicy;
