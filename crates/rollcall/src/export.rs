//! CSV export of the attendance ledger.

use rollcall_store::AttendanceRecord;
use std::io::{self, Write};
use std::path::Path;

pub const CSV_HEADER: [&str; 6] = ["Student ID", "Name", "Course", "Date", "Time", "Status"];

/// Write `records` as CSV with a header row. Returns the number of data rows.
pub fn write_csv<W: Write>(mut out: W, records: &[AttendanceRecord]) -> io::Result<usize> {
    write_row(&mut out, &CSV_HEADER)?;
    for r in records {
        write_row(
            &mut out,
            &[
                r.student_id.as_str(),
                r.name.as_str(),
                r.course.as_str(),
                r.date.as_str(),
                r.time.as_str(),
                r.status.as_str(),
            ],
        )?;
    }
    out.flush()?;
    Ok(records.len())
}

/// Export to `path`. With no records nothing is written and `Ok(0)` is returned.
pub fn export_to_path(path: &Path, records: &[AttendanceRecord]) -> io::Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }
    let file = std::fs::File::create(path)?;
    let n = write_csv(io::BufWriter::new(file), records)?;
    tracing::info!(path = %path.display(), rows = n, "attendance exported");
    Ok(n)
}

fn write_row<W: Write>(out: &mut W, fields: &[&str]) -> io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        write_field(out, field)?;
    }
    out.write_all(b"\n")
}

fn write_field<W: Write>(out: &mut W, field: &str) -> io::Result<()> {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        write!(out, "\"{}\"", field.replace('"', "\"\""))
    } else {
        out.write_all(field.as_bytes())
    }
}
