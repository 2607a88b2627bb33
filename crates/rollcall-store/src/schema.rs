use crate::faculty;
use rusqlite::{params, Connection};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS faculty (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    faculty_id TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL,
    password_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL,
    course TEXT NOT NULL,
    face_encoding BLOB
);

CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id TEXT NOT NULL,
    date TEXT NOT NULL,
    time TEXT NOT NULL,
    status TEXT NOT NULL,
    FOREIGN KEY (student_id) REFERENCES students (student_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS attendance_present_once_per_day
    ON attendance (student_id, date) WHERE status = 'Present';

CREATE INDEX IF NOT EXISTS attendance_by_date ON attendance (date, time);
";

const DEFAULT_FACULTY_ID: &str = "admin";
const DEFAULT_FACULTY_NAME: &str = "Administrator";
const DEFAULT_FACULTY_PASSWORD: &str = "admin123";

/// Create tables and seed the default faculty account on a fresh database.
pub(crate) fn ensure(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;

    let seeded = conn.execute(
        "INSERT OR IGNORE INTO faculty (faculty_id, name, password_hash) VALUES (?1, ?2, ?3)",
        params![
            DEFAULT_FACULTY_ID,
            DEFAULT_FACULTY_NAME,
            faculty::hash_password(DEFAULT_FACULTY_PASSWORD)
        ],
    )?;
    if seeded > 0 {
        tracing::warn!(
            faculty_id = DEFAULT_FACULTY_ID,
            "seeded default faculty account; change its password"
        );
    }
    Ok(())
}
