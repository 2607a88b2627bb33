//! Enrolled face gallery.
//!
//! A [`Gallery`] is an immutable snapshot built from storage. Lookups never
//! mutate it; a reload builds a new snapshot and swaps it into a
//! [`SharedGallery`], so a reader holding the previous `Arc` finishes its
//! lookup against the old entries.

use crate::types::{Descriptor, GalleryEntry, Identity, MatchResult, Matcher};
use std::sync::{Arc, RwLock};

/// A stored enrollment record as read from persistence.
#[derive(Debug, Clone)]
pub struct EnrolledRecord {
    pub identity: Identity,
    /// Raw descriptor blob; `None` for partially registered students.
    pub encoding: Option<Vec<u8>>,
}

/// Anything that can enumerate enrolled records in a stable order.
pub trait GallerySource {
    type Error;

    fn enrolled_records(&self) -> Result<Vec<EnrolledRecord>, Self::Error>;
}

/// Immutable set of (identity, descriptor) pairs.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    /// Build a snapshot from every record that carries a valid descriptor.
    ///
    /// Records without a descriptor are skipped. Blobs of the wrong length are
    /// skipped with a warning rather than failing the whole load.
    pub fn load<S: GallerySource>(source: &S) -> Result<Self, S::Error> {
        let records = source.enrolled_records()?;
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: impl IntoIterator<Item = EnrolledRecord>) -> Self {
        let mut entries = Vec::new();
        let mut skipped = 0usize;

        for record in records {
            let Some(blob) = record.encoding else {
                continue;
            };
            match Descriptor::from_le_bytes(&blob) {
                Ok(descriptor) => entries.push(GalleryEntry {
                    identity: record.identity,
                    descriptor,
                }),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        student_id = %record.identity.student_id,
                        error = %e,
                        "skipping malformed stored descriptor"
                    );
                }
            }
        }

        tracing::info!(size = entries.len(), skipped, "gallery loaded");
        Self { entries }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    /// Compare a probe against this snapshot.
    pub fn lookup(&self, matcher: &dyn Matcher, probe: &Descriptor, tolerance: f64) -> MatchResult {
        matcher.compare(probe, &self.entries, tolerance)
    }
}

/// The active gallery snapshot, shared between the capture loop and enrollment.
#[derive(Debug, Default)]
pub struct SharedGallery {
    active: RwLock<Arc<Gallery>>,
}

impl SharedGallery {
    pub fn new(gallery: Gallery) -> Self {
        Self {
            active: RwLock::new(Arc::new(gallery)),
        }
    }

    /// Current snapshot. The lock is held only long enough to clone the `Arc`.
    pub fn snapshot(&self) -> Arc<Gallery> {
        match self.active.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a freshly built snapshot.
    pub fn replace(&self, gallery: Gallery) {
        let next = Arc::new(gallery);
        match self.active.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Rebuild from `source` and swap. On error the current snapshot stays active.
    pub fn reload<S: GallerySource>(&self, source: &S) -> Result<usize, S::Error> {
        let gallery = Gallery::load(source)?;
        let size = gallery.size();
        self.replace(gallery);
        Ok(size)
    }
}
