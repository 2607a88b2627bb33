//! Attendance ledger: at most one "Present" row per student per calendar day.
//!
//! [`Store::record_present`] runs its existence check and insert inside one
//! `BEGIN IMMEDIATE` transaction, so overlapping callers (threads sharing the
//! store, or separate connections to the same file) serialize on the write
//! lock and only the first inserts. A partial unique index backs the same
//! invariant at the schema level.

use crate::{Store, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Row, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";
pub const STATUS_PRESENT: &str = "Present";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance write rolled back: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordResult {
    Inserted,
    AlreadyPresentToday,
}

/// One attendance row joined with the student's name and course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: String,
    pub name: String,
    pub course: String,
    pub date: String,
    pub time: String,
    pub status: String,
}

impl AttendanceRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            name: row.get(2)?,
            course: row.get(3)?,
            date: row.get(4)?,
            time: row.get(5)?,
            status: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AttendanceStats {
    /// Distinct dates on which anyone was marked.
    pub total_days: u64,
    pub present_days: u64,
    pub percentage: f64,
}

const SELECT_JOINED: &str = "
    SELECT a.id, s.student_id, s.name, s.course, a.date, a.time, a.status
    FROM attendance a
    JOIN students s ON a.student_id = s.student_id";

impl Store {
    /// Mark `student_id` present on the calendar day of `at`.
    ///
    /// Returns [`RecordResult::AlreadyPresentToday`] without writing when a
    /// row for that day exists. Any failure rolls the transaction back.
    pub fn record_present(
        &self,
        student_id: &str,
        at: NaiveDateTime,
    ) -> Result<RecordResult, LedgerError> {
        let date = at.format(DATE_FORMAT).to_string();
        let time = at.format(TIME_FORMAT).to_string();

        let result = self.with_conn(|conn| {
            // Dropping `tx` without commit rolls back.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM attendance \
                 WHERE student_id = ?1 AND date = ?2 AND status = ?3)",
                params![student_id, date, STATUS_PRESENT],
                |row| row.get(0),
            )?;
            if exists {
                return Ok(RecordResult::AlreadyPresentToday);
            }

            tx.execute(
                "INSERT INTO attendance (student_id, date, time, status) VALUES (?1, ?2, ?3, ?4)",
                params![student_id, date, time, STATUS_PRESENT],
            )?;
            tx.commit()?;
            Ok(RecordResult::Inserted)
        });

        match &result {
            Ok(RecordResult::Inserted) => {
                tracing::info!(student_id, %date, %time, "attendance marked")
            }
            Ok(RecordResult::AlreadyPresentToday) => {
                tracing::debug!(student_id, %date, "attendance already marked today")
            }
            Err(e) => tracing::error!(student_id, %date, error = %e, "failed to mark attendance"),
        }
        Ok(result?)
    }

    /// Number of distinct dates present in the ledger.
    pub fn total_distinct_dates(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(DISTINCT date) FROM attendance", [], |r| r.get(0))?;
            Ok(n as u64)
        })
    }

    /// Number of dates on which `student_id` is marked present.
    pub fn days_present(&self, student_id: &str) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT date) FROM attendance WHERE student_id = ?1 AND status = ?2",
                params![student_id, STATUS_PRESENT],
                |r| r.get(0),
            )?;
            Ok(n as u64)
        })
    }

    pub fn attendance_stats(&self, student_id: &str) -> Result<AttendanceStats, StoreError> {
        let total_days = self.total_distinct_dates()?;
        let present_days = self.days_present(student_id)?;
        let percentage = if total_days > 0 {
            present_days as f64 / total_days as f64 * 100.0
        } else {
            0.0
        };
        Ok(AttendanceStats {
            total_days,
            present_days,
            percentage,
        })
    }

    /// Every event, newest first.
    pub fn all_events(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.query_records(
            &format!("{SELECT_JOINED} ORDER BY a.date DESC, a.time DESC"),
            &[],
        )
    }

    /// Events of one student, newest first.
    pub fn events_for_student(
        &self,
        student_id: &str,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.query_records(
            &format!("{SELECT_JOINED} WHERE a.student_id = ?1 ORDER BY a.date DESC, a.time DESC"),
            &[student_id],
        )
    }

    /// Events on one date in the order they were marked.
    pub fn events_on_date(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let date = date.format(DATE_FORMAT).to_string();
        self.query_records(
            &format!("{SELECT_JOINED} WHERE a.date = ?1 ORDER BY a.time ASC"),
            &[date.as_str()],
        )
    }

    fn query_records(&self, sql: &str, args: &[&str]) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter()),
                AttendanceRecord::from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}
