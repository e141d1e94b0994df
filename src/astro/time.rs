//! Julian date, calendar, and sidereal time conversions.
//!
//! The JD↔calendar pair rounds both directions from the same julian date,
//! so a date pushed through a round trip agrees exactly at midnight
//! boundaries (to the second-level rounding documented on `jd_to_date`).

use chrono::{Datelike, Timelike, Utc};

use crate::error::{Result, SchedulerError};

/// Julian date at the J2000.0 standard epoch.
pub const J2000: f64 = 2_451_545.0;

/// 1901 Jan 1, the calendrical lower limit of the conversions here.
pub const FIRST_JD: f64 = 2_415_387.0;

/// 2099 Dec 31, the calendrical upper limit.
pub const LAST_JD: f64 = 2_488_070.0;

/// A civil date and time, always UTC in this crate.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: f64,
}

impl CalendarDate {
    pub fn new(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: f64) -> Self {
        Self { year, month, day, hour, minute, second }
    }

    /// Midnight UT on the given civil date.
    pub fn at_midnight(year: i32, month: u32, day: u32) -> Self {
        Self::new(year, month, day, 0, 0, 0.0)
    }

    /// The current UTC instant.
    pub fn now() -> Self {
        let t = Utc::now();
        Self::new(
            t.year(),
            t.month(),
            t.day(),
            t.hour(),
            t.minute(),
            t.second() as f64 + t.nanosecond() as f64 / 1e9,
        )
    }

    /// UT of day in decimal hours.
    pub fn ut_hours(&self) -> f64 {
        self.hour as f64 + self.minute as f64 / 60.0 + self.second / 3600.0
    }
}

/// Convert a calendar date (UT) to a julian date.
///
/// Valid between [`FIRST_JD`] and [`LAST_JD`]; outside that window an
/// `OutOfRange` error is returned.
pub fn date_to_jd(date: CalendarDate) -> Result<f64> {
    let (mut y, mut m) = (date.year as f64, date.month as f64);
    if date.month <= 2 {
        y -= 1.0;
        m += 12.0;
    }
    let a = (y / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();
    let day_frac = date.ut_hours() / 24.0;
    let jd = (365.25 * (y + 4716.0)).floor() + (30.6001 * (m + 1.0)).floor() + date.day as f64 + b
        - 1524.5
        + day_frac;

    if !(FIRST_JD..=LAST_JD).contains(&jd) {
        return Err(SchedulerError::OutOfRange { what: "julian date", value: jd });
    }
    Ok(jd)
}

/// Convert a julian date back to a calendar date, also returning the day of
/// week (0 = Sunday).
///
/// The instant is rounded to the nearest second before decomposition, so the
/// calendar fields and the day of week always agree, arbitrarily close to
/// midnight.
pub fn jd_to_date(jd: f64) -> Result<(CalendarDate, u32)> {
    if !(FIRST_JD..=LAST_JD).contains(&jd) {
        return Err(SchedulerError::OutOfRange { what: "julian date", value: jd });
    }

    // round to the nearest second, then decompose
    let jd = (jd * 86_400.0).round() / 86_400.0;

    let z = (jd + 0.5).floor();
    let f = jd + 0.5 - z;
    let alpha = ((z - 1_867_216.25) / 36_524.25).floor();
    let a = z + 1.0 + alpha - (alpha / 4.0).floor();
    let b = a + 1524.0;
    let c = ((b - 122.1) / 365.25).floor();
    let d = (365.25 * c).floor();
    let e = ((b - d) / 30.6001).floor();

    let day = (b - d - (30.6001 * e).floor()) as u32;
    let month = if e < 14.0 { e - 1.0 } else { e - 13.0 } as u32;
    let year = if month > 2 { c - 4716.0 } else { c - 4715.0 } as i32;

    let mut secs = (f * 86_400.0).round();
    let hour = (secs / 3600.0).floor();
    secs -= hour * 3600.0;
    let minute = (secs / 60.0).floor();
    secs -= minute * 60.0;

    let dow = ((jd + 1.5).floor() as i64).rem_euclid(7) as u32;

    Ok((CalendarDate::new(year, month, day, hour as u32, minute as u32, secs), dow))
}

/// Local sidereal time in decimal hours for a julian date and a west
/// longitude in decimal hours.
pub fn local_sidereal_time(jd: f64, longitude_hours_west: f64) -> f64 {
    let jd_int = jd.floor();
    let jd_frac = jd - jd_int;
    let (jd_mid, ut) =
        if jd_frac < 0.5 { (jd_int - 0.5, jd_frac + 0.5) } else { (jd_int + 0.5, jd_frac - 0.5) };
    let t = (jd_mid - J2000) / 36_525.0;
    let mut sid =
        (24_110.54841 + 8_640_184.812866 * t + 0.093104 * t * t - 6.2e-6 * t * t * t) / 86_400.0;
    sid -= sid.floor();
    sid += 1.002_737_909_3 * ut - longitude_hours_west / 24.0;
    sid = (sid - sid.floor()) * 24.0;
    if sid < 0.0 {
        sid += 24.0;
    }
    sid
}

/// Hour angle in decimal hours, normalized to [-12, +12), for an RA and LST
/// both in decimal hours. Negative means east of the meridian.
pub fn hour_angle(ra_hours: f64, lst_hours: f64) -> f64 {
    let mut ha = lst_hours - ra_hours;
    while ha < -12.0 {
        ha += 24.0;
    }
    while ha >= 12.0 {
        ha -= 24.0;
    }
    ha
}

/// Signed difference `h2 - h1` between two clock values on a 24-hour dial,
/// in [-12, +12). Downstream arithmetic assumes no window spans more than
/// 12 hours; the night context enforces that.
pub fn clock_difference(h1: f64, h2: f64) -> f64 {
    let mut dt = h2 - h1;
    if dt > 12.0 {
        dt -= 24.0;
    }
    if dt < -12.0 {
        dt += 24.0;
    }
    dt
}

/// Normalize an RA to [0, 24) hours.
pub fn normalize_ra(ra_hours: f64) -> f64 {
    let mut ra = ra_hours % 24.0;
    if ra < 0.0 {
        ra += 24.0;
    }
    ra
}
