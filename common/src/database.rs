//! Resolution of the `DATABASE_PATH` setting, which may hold either a bare
//! SQLite file path or a full DSN.

/// True when `path_or_url` already names a driver.
fn is_dsn(path_or_url: &str) -> bool {
    path_or_url.starts_with("sqlite:")
        || path_or_url.starts_with("postgres://")
        || path_or_url.starts_with("mysql://")
}

/// Turns a bare SQLite file path into a DSN; DSNs pass through unchanged.
pub fn database_url(path_or_url: &str) -> String {
    if is_dsn(path_or_url) {
        path_or_url.to_owned()
    } else {
        // yields sqlite:///abs/path for absolute paths
        format!("sqlite://{path_or_url}?mode=rwc")
    }
}

/// The SQLite file behind `path_or_url`, if there is one on disk.
///
/// In-memory and non-SQLite DSNs have no file.
pub fn database_file(path_or_url: &str) -> Option<&str> {
    if !is_dsn(path_or_url) {
        return Some(path_or_url);
    }
    let rest = path_or_url.strip_prefix("sqlite://")?;
    let file = rest.split('?').next().unwrap_or(rest);
    if file.is_empty() || file == ":memory:" {
        None
    } else {
        Some(file)
    }
}
