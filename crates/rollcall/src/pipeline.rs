//! Per-frame decision logic: match each detection and mark attendance.

use chrono::NaiveDateTime;
use rollcall_core::{BoundingBox, FaceDetection, Gallery, Identity, MatchResult, Matcher};
use rollcall_store::{RecordResult, Store};

pub const LABEL_UNKNOWN: &str = "Unknown";
pub const LABEL_NO_STUDENTS: &str = "No registered students";
pub const STATUS_IDLE: &str = "Looking for faces";

/// What happened to one recognised face in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attendance {
    Marked,
    AlreadyMarked,
    Failed(String),
}

/// One face in a processed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceVerdict {
    Recognized {
        identity: Identity,
        distance: f64,
        attendance: Attendance,
    },
    Unknown,
    NoRegisteredStudents,
}

impl FaceVerdict {
    /// Text drawn under the face box.
    pub fn label(&self) -> String {
        match self {
            FaceVerdict::Recognized { identity, .. } => identity.label(),
            FaceVerdict::Unknown => LABEL_UNKNOWN.to_string(),
            FaceVerdict::NoRegisteredStudents => LABEL_NO_STUDENTS.to_string(),
        }
    }

    /// Status line contribution for this face.
    pub fn status(&self) -> String {
        match self {
            FaceVerdict::Recognized {
                identity,
                attendance,
                ..
            } => match attendance {
                Attendance::Marked => format!("Attendance marked for {}", identity.name),
                Attendance::AlreadyMarked => {
                    format!("Attendance already marked for {} today", identity.name)
                }
                Attendance::Failed(_) => format!("Error marking attendance for {}", identity.name),
            },
            FaceVerdict::Unknown => "Unknown face".to_string(),
            FaceVerdict::NoRegisteredStudents => LABEL_NO_STUDENTS.to_string(),
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, FaceVerdict::Recognized { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceReport {
    pub bbox: BoundingBox,
    pub verdict: FaceVerdict,
}

/// Outcome of one frame: per-face verdicts and a single status line.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub faces: Vec<FaceReport>,
    pub status: String,
}

impl FrameReport {
    pub fn marked(&self) -> usize {
        self.faces
            .iter()
            .filter(|f| {
                matches!(
                    f.verdict,
                    FaceVerdict::Recognized {
                        attendance: Attendance::Marked,
                        ..
                    }
                )
            })
            .count()
    }
}

/// Match every detection against `gallery` and record attendance for each hit.
///
/// Ledger failures are reported per face and never abort the frame.
pub fn judge_frame(
    detections: Vec<FaceDetection>,
    gallery: &Gallery,
    matcher: &dyn Matcher,
    tolerance: f64,
    store: &Store,
    now: NaiveDateTime,
) -> FrameReport {
    let mut faces = Vec::with_capacity(detections.len());

    for detection in detections {
        let verdict = if gallery.is_empty() {
            FaceVerdict::NoRegisteredStudents
        } else {
            match gallery.lookup(matcher, &detection.descriptor, tolerance) {
                MatchResult::Matched { identity, distance } => {
                    let attendance = mark(store, &identity, now);
                    FaceVerdict::Recognized {
                        identity,
                        distance,
                        attendance,
                    }
                }
                MatchResult::Unmatched => FaceVerdict::Unknown,
            }
        };
        faces.push(FaceReport {
            bbox: detection.bbox,
            verdict,
        });
    }

    let status = status_line(&faces);
    FrameReport { faces, status }
}

fn mark(store: &Store, identity: &Identity, now: NaiveDateTime) -> Attendance {
    match store.record_present(&identity.student_id, now) {
        Ok(RecordResult::Inserted) => Attendance::Marked,
        Ok(RecordResult::AlreadyPresentToday) => Attendance::AlreadyMarked,
        Err(e) => Attendance::Failed(e.to_string()),
    }
}

/// Distinct per-face messages in detection order, joined with "; ".
fn status_line(faces: &[FaceReport]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for face in faces {
        let part = face.verdict.status();
        if !parts.contains(&part) {
            parts.push(part);
        }
    }
    if parts.is_empty() {
        STATUS_IDLE.to_string()
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use rollcall_core::{Descriptor, DESCRIPTOR_DIM};

    pub fn descriptor(x: f64) -> Descriptor {
        let mut values = vec![0.0; DESCRIPTOR_DIM];
        values[0] = x;
        Descriptor::new(values).unwrap()
    }

    pub fn identity(id: &str, name: &str) -> Identity {
        Identity {
            student_id: id.to_string(),
            name: name.to_string(),
            course: "BSc CS".to_string(),
        }
    }

    pub fn detection(x: f64) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 40.0,
                height: 40.0,
                confidence: 0.9,
                landmarks: None,
            },
            descriptor: descriptor(x),
        }
    }
}
