//! Sequence-file parser.
//!
//! One field per non-blank, non-`#` line:
//!
//! ```text
//! <ra_hr> <dec_deg> <kind_char> <exp_seconds> <interval_seconds> <n_required> <survey_code> [# comment]
//! ```
//!
//! A `Focus` record carries two additional floats, `<focus_increment>`
//! `<focus_default>`. A line `FILTER <name>` sets the filter for subsequent
//! records. Malformed or out-of-range records are rejected with a warning
//! and parsing continues; the verbatim line (comment tail included) is kept
//! on every accepted field for log reproduction.

use std::path::Path;

use crate::models::field::{Field, FieldKind, FocusPlan, SurveyClass, MAX_FIELDS, MAX_VISITS};

/// Bounds on plan parameters, exposure in seconds and intervals in hours.
pub const MAX_EXPT_SECONDS: f64 = 1000.0;
pub const MAX_INTERVAL_HOURS: f64 = 12.0;
pub const MIN_INTERVAL_HOURS: f64 = 900.0 / 3600.0;

/// Declination limits protecting the mount.
pub const MIN_DEC_DEG: f64 = -89.0;
pub const MAX_DEC_DEG: f64 = 30.0;

/// Focus-plan limits, mm.
pub const MIN_FOCUS_MM: f64 = 24.0;
pub const MAX_FOCUS_MM: f64 = 28.0;
pub const MIN_FOCUS_INCREMENT_MM: f64 = 0.025;
pub const MAX_FOCUS_INCREMENT_MM: f64 = 0.10;

/// Filter names the camera recognises.
pub const FILTER_NAMES: [&str; 4] = ["rgzz", "none", "fake", "clear"];

/// Result of parsing a sequence file.
#[derive(Debug, Clone, Default)]
pub struct SequenceLoad {
    pub fields: Vec<Field>,
    /// Filter named by the last `FILTER` line, if any.
    pub filter: Option<String>,
    /// Total lines read, used to re-parse only the growth of sidecar
    /// files.
    pub lines_read: usize,
}

/// Parse a sequence file. Field numbering starts at `first_field_number`
/// (non-zero when appending sidecar records to a live slice), and lines up
/// to `skip_lines` are ignored so a growing sidecar is only parsed beyond
/// the previously seen point.
pub fn load_sequence(
    path: &Path,
    first_field_number: usize,
    skip_lines: usize,
) -> std::io::Result<SequenceLoad> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_sequence(&content, first_field_number, skip_lines))
}

/// Parse sequence text. See [`load_sequence`].
pub fn parse_sequence(content: &str, first_field_number: usize, skip_lines: usize) -> SequenceLoad {
    let mut load = SequenceLoad::default();

    for (index, raw_line) in content.lines().enumerate() {
        let line_number = index + 1;
        load.lines_read = line_number;
        if line_number <= skip_lines {
            continue;
        }

        let line = raw_line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with("FILTER") || line.starts_with("filter") {
            let mut words = line.split_whitespace();
            words.next();
            match words.next() {
                Some(name) => {
                    if !FILTER_NAMES.contains(&name) {
                        log::warn!("unexpected filter name: {name}");
                    }
                    load.filter = Some(name.to_string());
                }
                None => log::warn!("FILTER line {line_number} names no filter"),
            }
            continue;
        }

        let field_number = first_field_number + load.fields.len();
        match parse_field_line(line, raw_line, field_number, line_number) {
            Ok(field) => {
                if load.fields.len() >= MAX_FIELDS {
                    log::warn!("sequence holds more than {MAX_FIELDS} fields, ignoring the rest");
                    break;
                }
                load.fields.push(field);
            }
            Err(reason) => {
                log::warn!("bad field line {line_number}: {reason}: {raw_line}");
            }
        }
    }

    load
}

fn parse_field_line(
    line: &str,
    raw_line: &str,
    field_number: usize,
    line_number: usize,
) -> Result<Field, String> {
    // the comment tail stays on the stored script line only
    let body = line.split('#').next().unwrap_or("");
    let words: Vec<&str> = body.split_whitespace().collect();
    if words.len() < 7 {
        return Err(format!("expected 7 values, found {}", words.len()));
    }

    let ra: f64 = words[0].parse().map_err(|_| "bad RA")?;
    let dec: f64 = words[1].parse().map_err(|_| "bad Dec")?;
    let kind = FieldKind::from_code(words[2]).ok_or("bad kind code")?;
    let expt_seconds: f64 = words[3].parse().map_err(|_| "bad exposure time")?;
    let interval_seconds: f64 = words[4].parse().map_err(|_| "bad interval")?;
    let n_required: usize = words[5].parse().map_err(|_| "bad visit count")?;
    let survey_code: i32 = words[6].parse().map_err(|_| "bad survey code")?;
    let survey = SurveyClass::from_code(survey_code).ok_or("survey code out of range")?;

    if !(0.0..24.0).contains(&ra) {
        return Err(format!("RA {ra} out of range"));
    }
    if !(-90.0..=90.0).contains(&dec) {
        return Err(format!("Dec {dec} out of range"));
    }
    if !(0.0..=MAX_EXPT_SECONDS).contains(&expt_seconds) {
        return Err(format!("exposure {expt_seconds} s out of range"));
    }
    let interval_hours = interval_seconds / 3600.0;
    if !(MIN_INTERVAL_HOURS..=MAX_INTERVAL_HOURS).contains(&interval_hours) {
        return Err(format!("interval {interval_seconds} s out of range"));
    }
    if n_required < 1 || n_required > MAX_VISITS {
        return Err(format!("visit count {n_required} out of range"));
    }

    let mut field = Field::new(
        field_number,
        line_number,
        raw_line.to_string(),
        ra,
        dec,
        kind,
        expt_seconds / 3600.0,
        interval_hours,
        n_required,
        survey,
    );

    if kind == FieldKind::Focus {
        if words.len() < 9 {
            return Err("focus record missing increment and default".to_string());
        }
        let increment_mm: f64 = words[7].parse().map_err(|_| "bad focus increment")?;
        let default_mm: f64 = words[8].parse().map_err(|_| "bad focus default")?;
        let plan = FocusPlan { increment_mm, default_mm };
        let start = plan.start_mm(n_required);
        if !(MIN_FOCUS_INCREMENT_MM..=MAX_FOCUS_INCREMENT_MM).contains(&increment_mm)
            || start < MIN_FOCUS_MM
            || start > MAX_FOCUS_MM
            || start + n_required as f64 * increment_mm > MAX_FOCUS_MM
        {
            return Err(format!(
                "focus parameters out of range: increment {increment_mm} default {default_mm}"
            ));
        }
        field.focus = Some(plan);
    }

    Ok(field)
}
