//! Nightly almanac: sunset, twilights, midnight, sunrise, moonrise and
//! moonset, and the moon's position and phase, bundled for one local date
//! at one site.
//!
//! Rise/set and twilight times are found by scanning the 24 hours after
//! local noon at two-minute steps and bisecting each altitude crossing;
//! they are good to a couple of seconds of the underlying ephemeris, which
//! is itself good to a minute or two.

use crate::astro::moon::{moon_altitude, moon_illuminated_fraction, moon_position};
use crate::astro::sun::sun_altitude;
use crate::astro::time::{date_to_jd, local_sidereal_time, CalendarDate};
use crate::error::{Result, SchedulerError};
use crate::models::site::Site;

/// Sun altitude at the moment of rise/set, before horizon depression:
/// refraction plus semi-diameter.
const RISE_SET_ALTITUDE: f64 = -0.83;

/// Sun altitudes defining the 12 and 18 degree twilights.
const TWILIGHT_12: f64 = -12.0;
const TWILIGHT_18: f64 = -18.0;

/// Scan step for the crossing search, days (two minutes).
const SCAN_STEP: f64 = 2.0 / 1440.0;

/// Event times for one night. All `jd_*` fields are julian dates; `ut_*`
/// are UT hours of day in [0, 24); `lst_*` are local sidereal hours.
/// Immutable once built for a given date.
#[derive(Debug, Clone)]
pub struct NightTimes {
    pub jd_sunset: f64,
    pub jd_evening12: f64,
    pub jd_evening18: f64,
    pub jd_midnight: f64,
    pub jd_morning18: f64,
    pub jd_morning12: f64,
    pub jd_sunrise: f64,
    pub jd_moonrise: Option<f64>,
    pub jd_moonset: Option<f64>,

    pub ut_sunset: f64,
    pub ut_evening12: f64,
    pub ut_evening18: f64,
    pub ut_midnight: f64,
    pub ut_morning18: f64,
    pub ut_morning12: f64,
    pub ut_sunrise: f64,

    pub lst_sunset: f64,
    pub lst_evening12: f64,
    pub lst_evening18: f64,
    pub lst_midnight: f64,
    pub lst_morning18: f64,
    pub lst_morning12: f64,
    pub lst_sunrise: f64,

    /// Moon RA (hours) and Dec (degrees) at local midnight.
    pub ra_moon: f64,
    pub dec_moon: f64,
    /// Illuminated fraction of the moon at local midnight, [0, 1].
    pub percent_moon: f64,
}

/// UT hours of day for a julian date.
pub fn ut_of_jd(jd: f64) -> f64 {
    let f = jd + 0.5;
    (f - f.floor()) * 24.0
}

/// Build the almanac for the night whose local evening falls on `date`.
///
/// Fails with `OutOfRange` when the sun never crosses one of the required
/// altitudes in the 24 hours after local noon (polar sites; not supported).
pub fn tonight(date: CalendarDate, site: &Site) -> Result<NightTimes> {
    // local noon in UT for the evening date
    let midnight_local = CalendarDate::at_midnight(date.year, date.month, date.day);
    let jd_noon = date_to_jd(midnight_local)? + (12.0 + site.std_zone_hours) / 24.0;
    let jd_midnight = jd_noon + 0.5;

    let horizon = RISE_SET_ALTITUDE - site.horizon_depression_deg;
    let sun_alt = |jd: f64| sun_altitude(jd, site.latitude_deg, site.longitude_hours_west);

    let jd_sunset = falling_crossing(&sun_alt, horizon, jd_noon, jd_midnight)
        .ok_or(SchedulerError::OutOfRange { what: "sunset", value: jd_noon })?;
    let jd_evening12 = falling_crossing(&sun_alt, TWILIGHT_12, jd_sunset, jd_midnight)
        .ok_or(SchedulerError::OutOfRange { what: "evening 12-deg twilight", value: jd_sunset })?;
    let jd_evening18 = falling_crossing(&sun_alt, TWILIGHT_18, jd_evening12, jd_midnight + 0.1)
        .ok_or(SchedulerError::OutOfRange {
        what: "evening 18-deg twilight",
        value: jd_evening12,
    })?;

    let jd_morning18 = rising_crossing(&sun_alt, TWILIGHT_18, jd_midnight - 0.1, jd_noon + 1.0)
        .ok_or(SchedulerError::OutOfRange {
        what: "morning 18-deg twilight",
        value: jd_midnight,
    })?;
    let jd_morning12 = rising_crossing(&sun_alt, TWILIGHT_12, jd_morning18, jd_noon + 1.0).ok_or(
        SchedulerError::OutOfRange { what: "morning 12-deg twilight", value: jd_morning18 },
    )?;
    let jd_sunrise = rising_crossing(&sun_alt, horizon, jd_morning12, jd_noon + 1.0)
        .ok_or(SchedulerError::OutOfRange { what: "sunrise", value: jd_morning12 })?;

    let moon_alt = |jd: f64| moon_altitude(jd, site.latitude_deg, site.longitude_hours_west);
    let jd_moonrise = rising_crossing(&moon_alt, horizon, jd_noon, jd_noon + 1.0);
    let jd_moonset = falling_crossing(&moon_alt, horizon, jd_noon, jd_noon + 1.0);

    let (ra_moon, dec_moon, _parallax) = moon_position(jd_midnight);
    let percent_moon = moon_illuminated_fraction(jd_midnight);

    let lst = |jd: f64| local_sidereal_time(jd, site.longitude_hours_west);

    Ok(NightTimes {
        jd_sunset,
        jd_evening12,
        jd_evening18,
        jd_midnight,
        jd_morning18,
        jd_morning12,
        jd_sunrise,
        jd_moonrise,
        jd_moonset,
        ut_sunset: ut_of_jd(jd_sunset),
        ut_evening12: ut_of_jd(jd_evening12),
        ut_evening18: ut_of_jd(jd_evening18),
        ut_midnight: ut_of_jd(jd_midnight),
        ut_morning18: ut_of_jd(jd_morning18),
        ut_morning12: ut_of_jd(jd_morning12),
        ut_sunrise: ut_of_jd(jd_sunrise),
        lst_sunset: lst(jd_sunset),
        lst_evening12: lst(jd_evening12),
        lst_evening18: lst(jd_evening18),
        lst_midnight: lst(jd_midnight),
        lst_morning18: lst(jd_morning18),
        lst_morning12: lst(jd_morning12),
        lst_sunrise: lst(jd_sunrise),
        ra_moon,
        dec_moon,
        percent_moon,
    })
}

/// First jd in [from, to] where `f` crosses `threshold` from above to below.
fn falling_crossing<F: Fn(f64) -> f64>(f: &F, threshold: f64, from: f64, to: f64) -> Option<f64> {
    let mut jd = from;
    let mut prev = f(jd) - threshold;
    while jd < to {
        let next_jd = jd + SCAN_STEP;
        let next = f(next_jd) - threshold;
        if prev > 0.0 && next <= 0.0 {
            return Some(bisect(f, threshold, jd, next_jd));
        }
        jd = next_jd;
        prev = next;
    }
    None
}

/// First jd in [from, to] where `f` crosses `threshold` from below to above.
fn rising_crossing<F: Fn(f64) -> f64>(f: &F, threshold: f64, from: f64, to: f64) -> Option<f64> {
    let mut jd = from;
    let mut prev = f(jd) - threshold;
    while jd < to {
        let next_jd = jd + SCAN_STEP;
        let next = f(next_jd) - threshold;
        if prev < 0.0 && next >= 0.0 {
            return Some(bisect(f, threshold, jd, next_jd));
        }
        jd = next_jd;
        prev = next;
    }
    None
}

fn bisect<F: Fn(f64) -> f64>(f: &F, threshold: f64, mut lo: f64, mut hi: f64) -> f64 {
    let lo_sign = (f(lo) - threshold).signum();
    for _ in 0..30 {
        let mid = (lo + hi) / 2.0;
        if ((f(mid) - threshold).signum() - lo_sign).abs() < f64::EPSILON {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo + hi) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::site::Site;

    fn test_site() -> Site {
        Site::default_site()
    }

    #[test]
    fn night_is_ordered() {
        let nt = tonight(CalendarDate::at_midnight(2007, 3, 5), &test_site()).unwrap();
        assert!(nt.jd_sunset < nt.jd_evening12);
        assert!(nt.jd_evening12 < nt.jd_evening18);
        assert!(nt.jd_evening18 < nt.jd_morning18);
        assert!(nt.jd_morning18 < nt.jd_morning12);
        assert!(nt.jd_morning12 < nt.jd_sunrise);
    }

    #[test]
    fn night_duration_is_sane() {
        let nt = tonight(CalendarDate::at_midnight(2007, 3, 5), &test_site()).unwrap();
        let dark_hours = (nt.jd_morning18 - nt.jd_evening18) * 24.0;
        assert!((6.0..12.0).contains(&dark_hours), "dark = {dark_hours} h");
        let night_hours = (nt.jd_sunrise - nt.jd_sunset) * 24.0;
        assert!((8.0..14.0).contains(&night_hours), "night = {night_hours} h");
    }

    #[test]
    fn ut_fields_in_range() {
        let nt = tonight(CalendarDate::at_midnight(2007, 3, 5), &test_site()).unwrap();
        for ut in [nt.ut_sunset, nt.ut_evening12, nt.ut_midnight, nt.ut_morning12, nt.ut_sunrise] {
            assert!((0.0..24.0).contains(&ut), "ut = {ut}");
        }
        assert!((0.0..=1.0).contains(&nt.percent_moon));
    }
}
