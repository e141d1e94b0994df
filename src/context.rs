//! Scheduler context: everything the observation loop threads through its
//! iterations, plus the wall/simulated clock.

use std::path::PathBuf;

use tokio::time::{sleep, Duration};

use crate::astro::time::{date_to_jd, jd_to_date, CalendarDate};
use crate::error::Result;
use crate::fits::FitsHeader;
use crate::journal::Journal;
use crate::logs::SurveyLogs;
use crate::models::field::Field;
use crate::models::site::Site;
use crate::night::{NightContext, TwilightChoice};
use crate::parsing::weather::WeatherLog;
use crate::signals::SignalFlags;

/// Seconds the loop idles when nothing is ready.
pub const LOOP_WAIT_SECS: f64 = 10.0;

/// Switches and knobs that were file-scope globals in earlier incarnations
/// of this scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub twilight: TwilightChoice,
    /// Apply empirical pointing corrections on repeat sky visits.
    pub pointing_corrections: bool,
    /// Apply empirical tracking-rate corrections.
    pub tracking_corrections: bool,
    /// Dither deep-coadd sky fields between repeats.
    pub deep_dither: bool,
    /// Block on each exposure's readout instead of overlapping it with the
    /// next slew.
    pub wait_for_readout: bool,
    pub loop_wait_secs: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            twilight: TwilightChoice::TwelveDegree,
            pointing_corrections: false,
            tracking_corrections: false,
            deep_dither: false,
            wait_for_readout: false,
            loop_wait_secs: LOOP_WAIT_SECS,
        }
    }
}

/// Wall clock for operations, stepped clock for simulated runs. The
/// simulated clock advances when the loop sleeps and when exposures
/// complete.
#[derive(Debug, Clone)]
pub enum Clock {
    Real,
    Simulated { jd: f64 },
}

impl Clock {
    pub fn is_simulated(&self) -> bool {
        matches!(self, Clock::Simulated { .. })
    }

    /// Current julian date.
    pub fn now_jd(&self) -> Result<f64> {
        match self {
            Clock::Real => date_to_jd(CalendarDate::now()),
            Clock::Simulated { jd } => Ok(*jd),
        }
    }

    /// Current calendar date (UT).
    pub fn now_date(&self) -> Result<CalendarDate> {
        match self {
            Clock::Real => Ok(CalendarDate::now()),
            Clock::Simulated { jd } => Ok(jd_to_date(*jd)?.0),
        }
    }

    /// Current UT of day, hours.
    pub fn now_ut(&self) -> Result<f64> {
        Ok(self.now_date()?.ut_hours())
    }

    /// Advance a simulated clock; no effect on the wall clock.
    pub fn advance_hours(&mut self, hours: f64) {
        if let Clock::Simulated { jd } = self {
            *jd += hours / 24.0;
        }
    }

    /// Sleep in real time, or step the simulated clock forward.
    pub async fn sleep_secs(&mut self, secs: f64) {
        match self {
            Clock::Real => sleep(Duration::from_secs_f64(secs.max(0.0))).await,
            Clock::Simulated { jd } => *jd += secs / 86_400.0,
        }
    }
}

/// State threaded through the observation loop. Owns the field slice, the
/// night context, the FITS buffer, and the journal; the command channels
/// are passed to the loop separately.
pub struct SchedulerContext {
    pub site: Site,
    pub night: NightContext,
    pub fields: Vec<Field>,
    pub fits: FitsHeader,
    pub flags: SignalFlags,
    pub journal: Journal,
    pub logs: SurveyLogs,
    pub clock: Clock,
    pub config: SchedulerConfig,

    /// Current filter, set by FILTER lines in the sequence file.
    pub filter: String,
    pub sequence_path: PathBuf,
    /// Lines of the sidecar file already consumed.
    pub sidecar_lines_seen: usize,
    /// Weather windows for simulated runs.
    pub weather: Option<WeatherLog>,
    /// True for a simulated run: the command channels are never touched
    /// and exposures advance the clock instead of taking time.
    pub simulation: bool,

    // loop state
    pub prev_index: Option<usize>,
    pub first_exposure: bool,
    pub focus_done: bool,
    pub offset_done: bool,
    /// True while the mount is stopped (not tracking).
    pub stopped: bool,
    pub stowed: bool,
    /// UT of the last exposure, for the clear-interval check.
    pub ut_prev: Option<f64>,
    /// Accumulated telescope pointing offsets, degrees.
    pub ra_offset_deg: f64,
    pub dec_offset_deg: f64,
    /// Fallback focus for the night, mm.
    pub focus_default_mm: f64,
}

impl SchedulerContext {
    /// The sidecar path: `<sequence_file>.add`.
    pub fn sidecar_path(&self) -> PathBuf {
        let mut name = self.sequence_path.as_os_str().to_os_string();
        name.push(".add");
        PathBuf::from(name)
    }
}
