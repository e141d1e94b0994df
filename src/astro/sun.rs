//! Low-precision solar position.
//!
//! Astronomical Almanac low-precision series, good to ~0.01 degrees over
//! the supported JD range. That comfortably meets the one-to-two minute
//! accuracy quoted for the rise/set and twilight searches downstream.

use crate::astro::coords::{altitude, atan_circ, DEG_IN_RADIAN, HRS_IN_RADIAN};
use crate::astro::time::{hour_angle, local_sidereal_time, J2000};

/// Geocentric apparent RA (hours) and Dec (degrees) of the sun at `jd`.
pub fn sun_position(jd: f64) -> (f64, f64) {
    let n = jd - J2000;

    // mean longitude and mean anomaly, degrees
    let l = 280.460 + 0.985_647_4 * n;
    let g = (357.528 + 0.985_600_3 * n) / DEG_IN_RADIAN;

    // ecliptic longitude and obliquity, radians
    let lambda = (l + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()) / DEG_IN_RADIAN;
    let epsilon = (23.439 - 4.0e-7 * n) / DEG_IN_RADIAN;

    let ra = atan_circ(lambda.cos(), epsilon.cos() * lambda.sin()) * HRS_IN_RADIAN;
    let dec = (epsilon.sin() * lambda.sin()).asin() * DEG_IN_RADIAN;
    (ra, dec)
}

/// Altitude of the sun (degrees) at `jd` as seen from a site at the given
/// latitude (degrees) and west longitude (hours).
pub fn sun_altitude(jd: f64, lat_deg: f64, longitude_hours_west: f64) -> f64 {
    let (ra, dec) = sun_position(jd);
    let lst = local_sidereal_time(jd, longitude_hours_west);
    let ha = hour_angle(ra, lst);
    altitude(dec, ha, lat_deg).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sun_near_equinox() {
        // 2025 Mar 20 was the equinox; dec within ~0.5 deg of zero
        let jd = 2_460_754.5; // 2025 Mar 20.0 UT
        let (_ra, dec) = sun_position(jd);
        assert!(dec.abs() < 0.6, "dec = {dec}");
    }

    #[test]
    fn sun_near_solstice() {
        // 2025 Jun 21: dec close to +23.4, ra close to 6h
        let jd = 2_460_847.5;
        let (ra, dec) = sun_position(jd);
        assert!((dec - 23.4).abs() < 0.2, "dec = {dec}");
        assert!((ra - 6.0).abs() < 0.3, "ra = {ra}");
    }

    #[test]
    fn sun_below_horizon_at_local_midnight() {
        // sentinel site, local midnight in June
        let jd = 2_460_847.5 + 7.0 / 24.0;
        let alt = sun_altitude(jd, 31.9533, 7.44111);
        assert!(alt < -20.0, "alt = {alt}");
    }
}
