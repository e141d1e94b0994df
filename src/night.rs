//! Night context: the almanac for one date plus the derived
//! observing-window bounds.

use crate::astro::almanac::{tonight, ut_of_jd, NightTimes};
use crate::astro::time::{local_sidereal_time, CalendarDate};
use crate::error::Result;
use crate::models::site::Site;

/// Hours to wait after the end of evening twilight before starting.
pub const STARTUP_DELAY_HOURS: f64 = 0.0;

/// Minimum time to make an observation, hours.
pub const MIN_EXECUTION_TIME_HOURS: f64 = 0.029;

/// Which twilight bounds the observing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwilightChoice {
    TwelveDegree,
    EighteenDegree,
}

/// The almanac for one night plus the observing-window bounds the
/// scheduler works inside. Immutable once built for a given date.
#[derive(Debug, Clone)]
pub struct NightContext {
    pub times: NightTimes,
    pub date: CalendarDate,

    /// Start of the observing window (twilight + startup delay).
    pub jd_start: f64,
    pub ut_start: f64,
    pub lst_start: f64,

    /// End of the observing window (morning twilight less the minimum
    /// execution time).
    pub jd_end: f64,
    pub ut_end: f64,
    pub lst_end: f64,
}

impl NightContext {
    /// Build the context for the night whose evening falls on `date`.
    ///
    /// If the window would span more than 12 hours it is contracted
    /// symmetrically: the clock-difference arithmetic downstream assumes no
    /// window exceeds 12 sidereal hours.
    pub fn init(date: CalendarDate, site: &Site, twilight: TwilightChoice) -> Result<NightContext> {
        let times = tonight(date, site)?;

        let (jd_evening, jd_morning) = match twilight {
            TwilightChoice::TwelveDegree => (times.jd_evening12, times.jd_morning12),
            TwilightChoice::EighteenDegree => (times.jd_evening18, times.jd_morning18),
        };

        let mut jd_start = jd_evening + STARTUP_DELAY_HOURS / 24.0;
        let mut jd_end = jd_morning - MIN_EXECUTION_TIME_HOURS / 24.0;

        let span_hours = (jd_end - jd_start) * 24.0;
        if span_hours > 12.0 {
            let trim = (span_hours - 12.0) / 2.0 / 24.0;
            jd_start += trim;
            jd_end -= trim;
            log::warn!(
                "night spans {span_hours:.2} h, contracting window to 12 h on both ends"
            );
        }

        let lst = |jd: f64| local_sidereal_time(jd, site.longitude_hours_west);

        Ok(NightContext {
            times,
            date,
            jd_start,
            ut_start: ut_of_jd(jd_start),
            lst_start: lst(jd_start),
            jd_end,
            ut_end: ut_of_jd(jd_end),
            lst_end: lst(jd_end),
        })
    }

    /// Dark-window hours remaining after `jd`.
    pub fn dark_hours_remaining(&self, jd: f64) -> f64 {
        ((self.jd_end - jd.max(self.jd_start)) * 24.0).max(0.0)
    }

    /// Whole-night hours remaining after `jd` (until sunrise).
    pub fn night_hours_remaining(&self, jd: f64) -> f64 {
        ((self.times.jd_sunrise - jd) * 24.0).max(0.0)
    }
}
