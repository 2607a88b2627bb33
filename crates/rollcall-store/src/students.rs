//! Student registry and the gallery source backed by it.

use crate::{Store, StoreError};
use rollcall_core::{Descriptor, EnrolledRecord, GallerySource, Identity};
use rusqlite::{params, ErrorCode, OptionalExtension};

impl Store {
    /// Insert a new student with its descriptor. Rejects an existing `student_id`.
    pub fn enroll(&self, identity: &Identity, descriptor: &Descriptor) -> Result<(), StoreError> {
        let blob = descriptor.to_le_bytes();
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO students (student_id, name, course, face_encoding) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![identity.student_id, identity.name, identity.course, blob],
            );
            match inserted {
                Ok(_) => {
                    tracing::info!(student_id = %identity.student_id, "student enrolled");
                    Ok(())
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::DuplicateIdentity(identity.student_id.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn student_exists(&self, student_id: &str) -> Result<bool, StoreError> {
        Ok(self.find_student(student_id)?.is_some())
    }

    pub fn find_student(&self, student_id: &str) -> Result<Option<Identity>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT student_id, name, course FROM students WHERE student_id = ?1",
                    params![student_id],
                    |row| {
                        Ok(Identity {
                            student_id: row.get(0)?,
                            name: row.get(1)?,
                            course: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    /// Like [`Store::find_student`], but a missing ID is an error.
    pub fn student(&self, student_id: &str) -> Result<Identity, StoreError> {
        self.find_student(student_id)?
            .ok_or_else(|| StoreError::UnknownStudent(student_id.to_string()))
    }

    pub fn student_count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
            Ok(n as usize)
        })
    }
}

impl GallerySource for Store {
    type Error = StoreError;

    /// All students in registration order, including those without a descriptor.
    fn enrolled_records(&self) -> Result<Vec<EnrolledRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT student_id, name, course, face_encoding FROM students ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(EnrolledRecord {
                    identity: Identity {
                        student_id: row.get(0)?,
                        name: row.get(1)?,
                        course: row.get(2)?,
                    },
                    encoding: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}
