//! Survey log files: the per-visit history strip, the exposure log, and
//! the completed-field roster.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{Result, SchedulerError};
use crate::models::field::Field;

/// One compact status line per completed visit.
pub const HISTORY_FILE: &str = "survey.hist";

/// One line per exposure.
pub const LOG_OBS_FILE: &str = "log.obs";

/// Verbatim script lines of completed fields, written at shutdown.
pub const COMPLETED_FIELDS_FILE: &str = "fields.completed";

/// The three survey log files, opened for append at startup.
pub struct SurveyLogs {
    history: File,
    obs: File,
    completed: File,
}

impl SurveyLogs {
    /// Open all three files in `dir`. Failure is fatal at startup.
    pub fn open_in(dir: &Path) -> Result<SurveyLogs> {
        let open = |name: &str| {
            OpenOptions::new().create(true).append(true).open(dir.join(name)).map_err(|e| {
                SchedulerError::FatalState(format!("cannot open log file {name}: {e}"))
            })
        };
        Ok(SurveyLogs {
            history: open(HISTORY_FILE)?,
            obs: open(LOG_OBS_FILE)?,
            completed: open(COMPLETED_FIELDS_FILE)?,
        })
    }

    /// Append one history line: the truncated jd followed by one progress
    /// character per field (`.` done, `0..9` visits so far).
    pub fn write_history(&mut self, jd: f64, fields: &[Field]) -> Result<()> {
        let mut line = format!("{:12.6} ", jd - 2_450_000.0);
        for f in fields {
            line.push_str(&f.history_char());
        }
        line.push('\n');
        self.history.write_all(line.as_bytes())?;
        self.history.flush()?;
        Ok(())
    }

    /// Append one exposure line: position, kind, progress, timing, and
    /// the filename stem, with the verbatim script comment carried along.
    #[allow(clippy::too_many_arguments)]
    pub fn write_observation(
        &mut self,
        field: &Field,
        exp_seconds: f64,
        ha: f64,
        jd: f64,
        actual_expt_hours: f64,
        filename: &str,
    ) -> Result<()> {
        let mut line = format!(
            "{:10.6} {:10.6} {} {} {:6.1} {:10.6} {:11.6} {:10.6} {} # {} {}",
            field.ra,
            field.dec,
            field.kind.code(),
            field.n_done,
            exp_seconds,
            ha,
            jd,
            actual_expt_hours,
            filename,
            field.kind.description(),
            field.field_number,
        );
        if let Some(tail) = field.comment_tail() {
            line.push_str(tail);
        }
        line.push('\n');
        self.obs.write_all(line.as_bytes())?;
        self.obs.flush()?;
        Ok(())
    }

    /// Write the final roster: the verbatim request line of every
    /// completed field.
    pub fn write_completed(&mut self, fields: &[Field]) -> Result<usize> {
        let mut n = 0;
        for f in fields.iter().filter(|f| f.is_complete()) {
            self.completed.write_all(f.script_line.as_bytes())?;
            if !f.script_line.ends_with('\n') {
                self.completed.write_all(b"\n")?;
            }
            n += 1;
        }
        self.completed.flush()?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::field::{FieldKind, SurveyClass};

    fn field(n_done: usize, n_required: usize) -> Field {
        let mut f = Field::new(
            0,
            1,
            "3.5 10.0 Y 60 3600 3 0 # pair_a".into(),
            3.5,
            10.0,
            FieldKind::Sky,
            60.0 / 3600.0,
            1.0,
            n_required,
            SurveyClass::None,
        );
        f.n_done = n_done;
        f
    }

    #[test]
    fn history_line_marks_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut logs = SurveyLogs::open_in(dir.path()).unwrap();
        logs.write_history(2_454_165.5, &[field(3, 3), field(1, 3), field(0, 3)]).unwrap();

        let text = std::fs::read_to_string(dir.path().join(HISTORY_FILE)).unwrap();
        assert!(text.trim_end().ends_with(".10"), "line was {text:?}");
        assert!(text.contains("4165.5"));
    }

    #[test]
    fn obs_line_carries_comment_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut logs = SurveyLogs::open_in(dir.path()).unwrap();
        let mut f = field(1, 3);
        f.n_done = 1;
        logs.write_observation(&f, 60.0, -0.4, 2_454_165.633, 60.0 / 3600.0, "20070305031200Y")
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join(LOG_OBS_FILE)).unwrap();
        assert!(text.contains("20070305031200Y"));
        assert!(text.contains("pair_a"));
        assert!(text.contains(" Y "));
    }

    #[test]
    fn completed_roster_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut logs = SurveyLogs::open_in(dir.path()).unwrap();
        let n = logs.write_completed(&[field(3, 3), field(1, 3)]).unwrap();
        assert_eq!(n, 1);

        let text = std::fs::read_to_string(dir.path().join(COMPLETED_FIELDS_FILE)).unwrap();
        assert_eq!(text, "3.5 10.0 Y 60 3600 3 0 # pair_a\n");
    }
}
