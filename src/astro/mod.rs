//! Astronomical time and geometry oracle.
//!
//! Pure functions with no hidden state. Conventions, used everywhere and
//! never converted silently: right ascension, sidereal time, and hour angle
//! in decimal hours; declination, latitude, altitude, and azimuth in decimal
//! degrees; longitude in decimal hours *west*; Julian dates in days.

pub mod almanac;
pub mod coords;
pub mod moon;
pub mod sun;
pub mod time;

pub use almanac::{tonight, NightTimes};
pub use coords::{
    airmass, altitude, clamped_asin, ecliptic, galactic, precess, BELOW_HORIZON_AIRMASS,
};
pub use time::{
    clock_difference, date_to_jd, hour_angle, jd_to_date, local_sidereal_time, CalendarDate,
    FIRST_JD, LAST_JD,
};
