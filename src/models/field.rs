//! The field entity: one intended observation, scheduled for repeated
//! visits, with its plan, feasibility window, progress, and per-visit
//! history.

use serde::{Deserialize, Serialize};

/// Maximum number of visits per field.
pub const MAX_VISITS: usize = 100;

/// Maximum number of fields per sequence script.
pub const MAX_FIELDS: usize = 500;

/// What kind of exposure a field requests. Kinds other than `Sky` carry
/// kind-specific feasibility windows and pointing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Sky,
    Dark,
    DomeFlat,
    EveningFlat,
    MorningFlat,
    Focus,
    OffsetPointing,
}

impl FieldKind {
    /// Parse the one-character kind code used in sequence files. Both cases
    /// are accepted.
    pub fn from_code(code: &str) -> Option<FieldKind> {
        match code {
            "Y" | "y" => Some(FieldKind::Sky),
            "N" | "n" => Some(FieldKind::Dark),
            "F" | "f" => Some(FieldKind::Focus),
            "P" | "p" => Some(FieldKind::OffsetPointing),
            "E" | "e" => Some(FieldKind::EveningFlat),
            "M" | "m" => Some(FieldKind::MorningFlat),
            "L" | "l" => Some(FieldKind::DomeFlat),
            _ => None,
        }
    }

    /// The canonical one-character code, as written to logs.
    pub fn code(&self) -> &'static str {
        match self {
            FieldKind::Sky => "Y",
            FieldKind::Dark => "N",
            FieldKind::Focus => "F",
            FieldKind::OffsetPointing => "P",
            FieldKind::EveningFlat => "E",
            FieldKind::MorningFlat => "M",
            FieldKind::DomeFlat => "L",
        }
    }

    /// Image-type description used in FITS headers and filenames.
    pub fn description(&self) -> &'static str {
        match self {
            FieldKind::Sky => "sky",
            FieldKind::Dark => "dark",
            FieldKind::Focus => "focus",
            FieldKind::OffsetPointing => "offset",
            FieldKind::EveningFlat => "pmskyflat",
            FieldKind::MorningFlat => "amskyflat",
            FieldKind::DomeFlat => "domeskyflat",
        }
    }

    /// True when taking this kind of exposure opens the shutter (and so
    /// requires the telescope to point somewhere sensible).
    pub fn shutter_open(&self) -> bool {
        !matches!(self, FieldKind::Dark)
    }

    /// True for the kinds that skip telescope pointing entirely.
    pub fn skips_pointing(&self) -> bool {
        matches!(self, FieldKind::Dark | FieldKind::DomeFlat)
    }
}

/// Survey class of a field. `MustDo` overrides normal time-budget vetoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SurveyClass {
    #[default]
    None,
    Tno,
    SNe,
    MustDo,
}

impl SurveyClass {
    /// Numeric survey codes used in sequence files. Code 4 is a legacy
    /// alias that maps onto `MustDo`.
    pub fn from_code(code: i32) -> Option<SurveyClass> {
        match code {
            0 => Some(SurveyClass::None),
            1 => Some(SurveyClass::Tno),
            2 => Some(SurveyClass::SNe),
            3 | 4 => Some(SurveyClass::MustDo),
            _ => None,
        }
    }
}

/// Scheduler-transient status of a field, recomputed before every
/// selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FieldStatus {
    #[default]
    NotDoable,
    Ready,
    DoNow,
    TooLate,
}

/// Why the selector picked a field; stamped on the field for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionCode {
    #[default]
    NotSelected,
    FirstDoNowFlat,
    FirstDoNowDark,
    FirstDoNow,
    FirstReadyPair,
    FirstLatePair,
    LeastTimeReadyMustDo,
    LeastTimeLateMustDo,
    LeastTimeReady,
    MostTimeLate,
}

impl std::fmt::Display for SelectionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SelectionCode::NotSelected => "NOT_SELECTED",
            SelectionCode::FirstDoNowFlat => "FIRST_DO_NOW_FLAT",
            SelectionCode::FirstDoNowDark => "FIRST_DO_NOW_DARK",
            SelectionCode::FirstDoNow => "FIRST_DO_NOW",
            SelectionCode::FirstReadyPair => "FIRST_READY_PAIR",
            SelectionCode::FirstLatePair => "FIRST_LATE_PAIR",
            SelectionCode::LeastTimeReadyMustDo => "LEAST_TIME_READY_MUST_DO",
            SelectionCode::LeastTimeLateMustDo => "LEAST_TIME_LATE_MUST_DO",
            SelectionCode::LeastTimeReady => "LEAST_TIME_READY",
            SelectionCode::MostTimeLate => "MOST_TIME_LATE",
        };
        f.write_str(s)
    }
}

/// Focus-sequence parameters carried by `Focus` fields, so a journal reload
/// recovers them without re-parsing the script.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusPlan {
    /// Focus step between exposures, mm.
    pub increment_mm: f64,
    /// Focus to fall back to when the sequence fails, mm.
    pub default_mm: f64,
}

impl FocusPlan {
    /// First focus setting of a sequence of `n_required` exposures,
    /// centered on the default.
    pub fn start_mm(&self, n_required: usize) -> f64 {
        self.default_mm - (n_required / 2) as f64 * self.increment_mm
    }
}

/// One completed visit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VisitRecord {
    /// UT of day at exposure start, hours.
    pub ut: f64,
    /// Julian date at exposure start.
    pub jd: f64,
    /// Local sidereal time at exposure start, hours.
    pub lst: f64,
    /// Hour angle of the field at exposure start, hours.
    pub ha: f64,
    /// Airmass at exposure start.
    pub airmass: f64,
    /// Actual exposure duration, hours.
    pub actual_expt_hours: f64,
    /// Image filename stem (yyyymmddhhmmss + kind code).
    pub filename: String,
}

/// An intended observation at a celestial position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    // identity
    pub field_number: usize,
    pub line_number: usize,
    /// The verbatim request line, kept for log reproduction.
    pub script_line: String,

    // position
    /// Right ascension, decimal hours in [0, 24).
    pub ra: f64,
    /// Declination, decimal degrees in [-90, +90].
    pub dec: f64,
    /// Galactic longitude/latitude, degrees.
    pub gal_long: f64,
    pub gal_lat: f64,
    /// Ecliptic longitude/latitude, degrees.
    pub ecl_long: f64,
    pub ecl_lat: f64,
    /// Epoch of observation (Julian years).
    pub epoch: f64,

    // plan
    pub kind: FieldKind,
    /// Exposure duration, hours.
    pub expt_hours: f64,
    /// Interval between repeat visits, hours.
    pub interval_hours: f64,
    /// Number of visits required (1..=MAX_VISITS).
    pub n_required: usize,
    pub survey: SurveyClass,
    pub focus: Option<FocusPlan>,

    // feasibility cache
    pub doable: bool,
    /// Start of the feasibility window (airmass and hour-angle limited for
    /// sky fields, kind-specific otherwise). None until initialized or when
    /// the field never rises.
    pub jd_rise: Option<f64>,
    /// End of the feasibility window.
    pub jd_set: Option<f64>,

    // progress
    pub n_done: usize,
    /// Earliest jd at which the next visit may start.
    pub jd_next: Option<f64>,
    /// Remaining time the field is up, hours.
    pub time_up: f64,
    /// Time required to complete the remaining visits, hours.
    pub time_required: f64,
    /// `time_up - time_required`, hours; negative only for `TooLate`.
    pub time_left: f64,

    // per-visit history, bounded by MAX_VISITS
    pub visits: Vec<VisitRecord>,
    /// Consecutive bad readouts on this field.
    pub bad_read_count: usize,

    // scheduler transients
    pub status: FieldStatus,
    pub selection_code: SelectionCode,
}

impl Field {
    /// A fresh field from its plan; feasibility is filled in by
    /// `init_fields`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        field_number: usize,
        line_number: usize,
        script_line: String,
        ra: f64,
        dec: f64,
        kind: FieldKind,
        expt_hours: f64,
        interval_hours: f64,
        n_required: usize,
        survey: SurveyClass,
    ) -> Field {
        Field {
            field_number,
            line_number,
            script_line,
            ra,
            dec,
            gal_long: 0.0,
            gal_lat: 0.0,
            ecl_long: 0.0,
            ecl_lat: 0.0,
            epoch: 2000.0,
            kind,
            expt_hours,
            interval_hours,
            n_required,
            survey,
            focus: None,
            doable: false,
            jd_rise: None,
            jd_set: None,
            n_done: 0,
            jd_next: None,
            time_up: 0.0,
            time_required: 0.0,
            time_left: 0.0,
            visits: Vec::new(),
            bad_read_count: 0,
            status: FieldStatus::NotDoable,
            selection_code: SelectionCode::NotSelected,
        }
    }

    /// Visits still required.
    pub fn n_left(&self) -> usize {
        self.n_required.saturating_sub(self.n_done)
    }

    /// True once every required visit is done.
    pub fn is_complete(&self) -> bool {
        self.n_done >= self.n_required
    }

    /// Record a completed visit and schedule the next one.
    pub fn record_visit(&mut self, visit: VisitRecord) {
        self.jd_next = Some(visit.jd + self.interval_hours / 24.0);
        self.visits.truncate(self.n_done);
        self.visits.push(visit);
        self.n_done += 1;
    }

    /// Roll back the last visit after a bad readout so the selector
    /// reschedules it.
    pub fn unrecord_last_visit(&mut self, jd_now: f64) {
        if self.n_done > 0 {
            self.n_done -= 1;
            self.visits.truncate(self.n_done);
            self.jd_next = Some(jd_now);
        }
    }

    /// The verbatim `# ...` comment tail of the request line, if any.
    pub fn comment_tail(&self) -> Option<&str> {
        self.script_line.find('#').map(|i| self.script_line[i + 1..].trim_end())
    }

    /// Compact progress character for the history file: `.` when done,
    /// else the visit count.
    pub fn history_char(&self) -> String {
        if self.is_complete() {
            ".".to_string()
        } else {
            format!("{}", self.n_done.min(9))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sky_field() -> Field {
        Field::new(0, 1, "3.5 10.0 Y 60 3600 3 0".into(), 3.5, 10.0, FieldKind::Sky, 60.0 / 3600.0, 1.0, 3, SurveyClass::None)
    }

    #[test]
    fn kind_codes_round_trip() {
        for kind in [
            FieldKind::Sky,
            FieldKind::Dark,
            FieldKind::DomeFlat,
            FieldKind::EveningFlat,
            FieldKind::MorningFlat,
            FieldKind::Focus,
            FieldKind::OffsetPointing,
        ] {
            assert_eq!(FieldKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(FieldKind::from_code("?"), None);
    }

    #[test]
    fn survey_code_four_is_must_do() {
        assert_eq!(SurveyClass::from_code(4), Some(SurveyClass::MustDo));
        assert_eq!(SurveyClass::from_code(7), None);
    }

    #[test]
    fn record_and_unrecord_visits() {
        let mut f = sky_field();
        f.record_visit(VisitRecord { jd: 2_454_165.5, ..Default::default() });
        assert_eq!(f.n_done, 1);
        assert!((f.jd_next.unwrap() - (2_454_165.5 + 1.0 / 24.0)).abs() < 1e-12);

        f.unrecord_last_visit(2_454_165.6);
        assert_eq!(f.n_done, 0);
        assert!(f.visits.is_empty());
        assert_eq!(f.jd_next, Some(2_454_165.6));
    }

    #[test]
    fn focus_plan_start() {
        let plan = FocusPlan { increment_mm: 0.05, default_mm: 25.30 };
        assert!((plan.start_mm(5) - 25.20).abs() < 1e-12);
    }

    #[test]
    fn history_chars() {
        let mut f = sky_field();
        assert_eq!(f.history_char(), "0");
        f.n_done = 3;
        assert_eq!(f.history_char(), ".");
    }

    #[test]
    fn comment_tail_extraction() {
        let mut f = sky_field();
        f.script_line = "3.5 10.0 Y 60 3600 3 0 # field_a".into();
        assert_eq!(f.comment_tail(), Some(" field_a"));
    }
}
