//! Crash-recovery journal.
//!
//! A single binary file holding a versioned snapshot of the whole field
//! slice. After every completed visit the file is truncated and rewritten
//! from the start, so the on-disk state never reflects a visit whose
//! readout is still pending. On startup an existing journal is loaded in
//! place of parsing the script; fields carry their focus plans with them,
//! so nothing else needs recovering.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::astro::time::CalendarDate;
use crate::error::{Result, SchedulerError};
use crate::models::field::{Field, MAX_FIELDS};

/// Journal file name, in the working directory.
pub const JOURNAL_FILE: &str = "scheduler.bin";

/// Bump when the snapshot layout changes; a mismatched journal is ignored
/// and the script is parsed afresh.
const JOURNAL_VERSION: u32 = 1;

const JOURNAL_MAGIC: [u8; 4] = *b"SSJ1";

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: CalendarDate,
    fields: Vec<Field>,
}

/// Open journal with its file handle held for the night.
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Open (or create) the journal file, holding the handle.
    pub fn open(path: impl AsRef<Path>) -> Result<Journal> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| {
                SchedulerError::FatalState(format!("cannot open journal {}: {e}", path.display()))
            })?;
        Ok(Journal { path, file })
    }

    /// Load the saved field slice, if the journal holds a usable snapshot.
    ///
    /// Returns `None` (not an error) for an empty, stale-format, or
    /// corrupt journal: the caller then parses the script afresh.
    pub fn load(&mut self) -> Result<Option<Vec<Field>>> {
        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;

        if bytes.is_empty() {
            return Ok(None);
        }
        if bytes.len() < JOURNAL_MAGIC.len() || bytes[..4] != JOURNAL_MAGIC {
            log::warn!("journal {} is not in the current format, ignoring", self.path.display());
            return Ok(None);
        }

        let snapshot: Snapshot = match bincode::deserialize(&bytes[4..]) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("journal {} unreadable ({e}), ignoring", self.path.display());
                return Ok(None);
            }
        };
        if snapshot.version != JOURNAL_VERSION {
            log::warn!(
                "journal version {} does not match {}, ignoring",
                snapshot.version,
                JOURNAL_VERSION
            );
            return Ok(None);
        }
        if snapshot.fields.len() > MAX_FIELDS {
            log::warn!("journal holds {} fields, over the cap; ignoring", snapshot.fields.len());
            return Ok(None);
        }

        let (fresh, started, completed) =
            snapshot.fields.iter().fold((0, 0, 0), |(f, s, c), field| {
                if field.n_done == 0 {
                    (f + 1, s, c)
                } else if field.is_complete() {
                    (f, s, c + 1)
                } else {
                    (f, s + 1, c)
                }
            });
        log::info!(
            "journal: {} fields, {fresh} fresh, {started} started, {completed} completed",
            snapshot.fields.len()
        );

        Ok(Some(snapshot.fields))
    }

    /// Truncate and rewrite the whole journal from the current field
    /// slice. Called after every completed visit.
    pub fn save(&mut self, fields: &[Field], now: CalendarDate) -> Result<()> {
        let snapshot =
            Snapshot { version: JOURNAL_VERSION, saved_at: now, fields: fields.to_vec() };
        let bytes = bincode::serialize(&snapshot)
            .map_err(|e| SchedulerError::FatalState(format!("journal encode failed: {e}")))?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        self.file.write_all(&JOURNAL_MAGIC)?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::field::{FieldKind, FocusPlan, SurveyClass, VisitRecord};

    fn sample_fields() -> Vec<Field> {
        let mut sky = Field::new(
            0,
            2,
            "3.5 10.0 Y 60 3600 3 0 # pair_a".into(),
            3.5,
            10.0,
            FieldKind::Sky,
            60.0 / 3600.0,
            1.0,
            3,
            SurveyClass::None,
        );
        sky.doable = true;
        sky.jd_rise = Some(2_454_165.5);
        sky.jd_set = Some(2_454_165.9);
        sky.record_visit(VisitRecord {
            ut: 3.2,
            jd: 2_454_165.633,
            lst: 9.1,
            ha: -0.4,
            airmass: 1.1,
            actual_expt_hours: 60.0 / 3600.0,
            filename: "20070305031200Y".into(),
        });

        let mut focus = Field::new(
            1,
            3,
            "12.0 0.0 F 30 3600 5 0 0.05 25.30".into(),
            12.0,
            0.0,
            FieldKind::Focus,
            30.0 / 3600.0,
            1.0,
            5,
            SurveyClass::None,
        );
        focus.focus = Some(FocusPlan { increment_mm: 0.05, default_mm: 25.30 });

        vec![sky, focus]
    }

    fn now() -> CalendarDate {
        CalendarDate::new(2007, 3, 5, 4, 30, 12.0)
    }

    #[test]
    fn round_trip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(JOURNAL_FILE);

        let fields = sample_fields();
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.save(&fields, now()).unwrap();
        }

        let mut journal = Journal::open(&path).unwrap();
        let loaded = journal.load().unwrap().expect("snapshot present");
        assert_eq!(loaded, fields);
        // the focus plan travels with the field
        assert_eq!(loaded[1].focus, Some(FocusPlan { increment_mm: 0.05, default_mm: 25.30 }));
    }

    #[test]
    fn empty_journal_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(dir.path().join(JOURNAL_FILE)).unwrap();
        assert!(journal.load().unwrap().is_none());
    }

    #[test]
    fn garbage_journal_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        std::fs::write(&path, b"not a journal at all").unwrap();
        let mut journal = Journal::open(&path).unwrap();
        assert!(journal.load().unwrap().is_none());
    }

    #[test]
    fn rewrite_shrinks_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        let mut journal = Journal::open(&path).unwrap();

        let mut fields = sample_fields();
        journal.save(&fields, now()).unwrap();
        let large = std::fs::metadata(&path).unwrap().len();

        fields.pop();
        journal.save(&fields, now()).unwrap();
        let small = std::fs::metadata(&path).unwrap().len();
        assert!(small < large);

        let loaded = journal.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn progress_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(JOURNAL_FILE);

        let mut fields = sample_fields();
        fields[0].n_done = 3; // completed
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.save(&fields, now()).unwrap();
        }

        let mut journal = Journal::open(&path).unwrap();
        let loaded = journal.load().unwrap().unwrap();
        assert!(loaded[0].is_complete());
        assert_eq!(loaded[1].n_done, 0);
    }
}
