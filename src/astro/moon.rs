//! Low-precision lunar position and illuminated fraction.
//!
//! Astronomical Almanac low-precision series (~0.3 degree), topocentric
//! correction folded into the altitude through the horizontal parallax.
//! Good to a couple of minutes in the rise/set searches, which matches the
//! accuracy the night context quotes.

use crate::astro::coords::{altitude, atan_circ, clamped_asin, DEG_IN_RADIAN, HRS_IN_RADIAN};
use crate::astro::sun::sun_position;
use crate::astro::time::{hour_angle, local_sidereal_time, J2000};

/// Geocentric RA (hours), Dec (degrees), and horizontal parallax (degrees)
/// of the moon at `jd`.
pub fn moon_position(jd: f64) -> (f64, f64, f64) {
    let t = (jd - J2000) / 36_525.0;
    let d = |deg: f64| deg / DEG_IN_RADIAN;

    // ecliptic longitude, degrees
    let lambda = 218.32 + 481_267.883 * t + 6.29 * d(134.9 + 477_198.85 * t).sin()
        - 1.27 * d(259.2 - 413_335.38 * t).sin()
        + 0.66 * d(235.7 + 890_534.23 * t).sin()
        + 0.21 * d(269.9 + 954_397.70 * t).sin()
        - 0.19 * d(357.5 + 35_999.05 * t).sin()
        - 0.11 * d(186.6 + 966_404.05 * t).sin();

    // ecliptic latitude, degrees
    let beta = 5.13 * d(93.3 + 483_202.03 * t).sin() + 0.28 * d(228.2 + 960_400.87 * t).sin()
        - 0.28 * d(318.3 + 6_003.18 * t).sin()
        - 0.17 * d(217.6 - 407_332.20 * t).sin();

    // horizontal parallax, degrees
    let parallax = 0.9508
        + 0.0518 * d(134.9 + 477_198.85 * t).cos()
        + 0.0095 * d(259.2 - 413_335.38 * t).cos()
        + 0.0078 * d(235.7 + 890_534.23 * t).cos()
        + 0.0028 * d(269.9 + 954_397.70 * t).cos();

    let lambda = d(lambda);
    let beta = d(beta);
    let epsilon = d(23.439 - 4.0e-7 * (jd - J2000));

    let x = lambda.cos() * beta.cos();
    let y = epsilon.cos() * lambda.sin() * beta.cos() - epsilon.sin() * beta.sin();
    let z = epsilon.sin() * lambda.sin() * beta.cos() + epsilon.cos() * beta.sin();

    let ra = atan_circ(x, y) * HRS_IN_RADIAN;
    let dec = clamped_asin(z) * DEG_IN_RADIAN;
    (ra, dec, parallax)
}

/// Illuminated fraction of the lunar disk at `jd`, in [0, 1].
pub fn moon_illuminated_fraction(jd: f64) -> f64 {
    let (ra_m, dec_m, _) = moon_position(jd);
    let (ra_s, dec_s) = sun_position(jd);

    let a_m = ra_m / HRS_IN_RADIAN;
    let d_m = dec_m / DEG_IN_RADIAN;
    let a_s = ra_s / HRS_IN_RADIAN;
    let d_s = dec_s / DEG_IN_RADIAN;

    // elongation from the spherical cosine law
    let cos_e = d_s.sin() * d_m.sin() + d_s.cos() * d_m.cos() * (a_s - a_m).cos();
    (1.0 - cos_e) / 2.0
}

/// Topocentric altitude of the moon (degrees) at `jd` from a site at the
/// given latitude (degrees) and west longitude (hours). The parallax
/// depression is applied directly to the geocentric altitude.
pub fn moon_altitude(jd: f64, lat_deg: f64, longitude_hours_west: f64) -> f64 {
    let (ra, dec, parallax) = moon_position(jd);
    let lst = local_sidereal_time(jd, longitude_hours_west);
    let ha = hour_angle(ra, lst);
    let (alt, _az) = altitude(dec, ha, lat_deg);
    alt - parallax * (alt / DEG_IN_RADIAN).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_bounds() {
        for i in 0..30 {
            let f = moon_illuminated_fraction(J2000 + i as f64);
            assert!((0.0..=1.0).contains(&f), "f = {f}");
        }
    }

    #[test]
    fn full_moon_is_bright_new_moon_is_dark() {
        // 2000 Jan 6 was a new moon, 2000 Jan 21 a full moon
        let new = moon_illuminated_fraction(2_451_550.3);
        let full = moon_illuminated_fraction(2_451_565.2);
        assert!(new < 0.1, "new = {new}");
        assert!(full > 0.9, "full = {full}");
    }

    #[test]
    fn parallax_is_near_a_degree() {
        let (_, _, p) = moon_position(J2000);
        assert!((0.89..1.02).contains(&p), "p = {p}");
    }
}
