//! Spherical-astronomy identities: altitude, airmass, precession, and the
//! galactic and ecliptic coordinate transforms.
//!
//! Units on every signature: RA and hour angle in decimal hours; Dec,
//! latitude, altitude, azimuth, and the galactic/ecliptic angles in decimal
//! degrees; epochs in Julian years.

use crate::astro::time::J2000;

pub const DEG_IN_RADIAN: f64 = 57.295_779_513_082_3;
pub const HRS_IN_RADIAN: f64 = 3.819_718_634_205;
pub const ARCSEC_IN_RADIAN: f64 = 206_264.806_247_1;

/// Airmass value reported for a position at or below the horizon.
pub const BELOW_HORIZON_AIRMASS: f64 = 1000.0;

/// Mean obliquity of the ecliptic, stored as cos/sin the way the transform
/// uses them.
const COS_OBLIQUITY: f64 = 0.917_407_7;
const SIN_OBLIQUITY: f64 = 0.397_948_6;

/// Rotation from equatorial (B1950) to galactic direction cosines. Derived
/// once from the IAU galactic pole (12h49m, +27.4 deg, 1950) and zero of
/// longitude; stored rather than recomputed from Euler angles each call.
const GALACTIC_ROTATION: [[f64; 3]; 3] = [
    [-0.066_988_739_415, -0.872_755_765_853, -0.483_538_914_631],
    [0.492_728_466_047, -0.450_346_958_025, 0.744_584_633_299],
    [-0.867_600_811_168, -0.188_374_601_707, 0.460_199_784_759],
];

/// arcsine with the argument clamped to [-1, +1]. Arguments beyond the
/// bounds by more than 0.01 indicate an upstream arithmetic fault and are
/// logged before clamping.
pub fn clamped_asin(x: f64) -> f64 {
    if x.abs() > 1.01 {
        log::warn!("argument of asin exceeds bounds: {x}");
    }
    x.clamp(-1.0, 1.0).asin()
}

/// Altitude and azimuth in degrees for a declination (deg), hour angle
/// (hours), and latitude (deg). Azimuth is measured east from north,
/// [0, 360).
pub fn altitude(dec_deg: f64, ha_hours: f64, lat_deg: f64) -> (f64, f64) {
    let dec = dec_deg / DEG_IN_RADIAN;
    let ha = ha_hours / HRS_IN_RADIAN;
    let lat = lat_deg / DEG_IN_RADIAN;

    let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * ha.cos();
    let alt = clamped_asin(sin_alt);

    let y = -dec.cos() * ha.sin();
    let x = dec.sin() * lat.cos() - dec.cos() * ha.cos() * lat.sin();
    let az = atan_circ(x, y) * DEG_IN_RADIAN;

    (alt * DEG_IN_RADIAN, az)
}

/// Airmass (secant of zenith distance) for an hour angle (hours),
/// declination (deg), and site latitude (deg). Positions at or below the
/// horizon report [`BELOW_HORIZON_AIRMASS`].
pub fn airmass(ha_hours: f64, dec_deg: f64, lat_deg: f64) -> f64 {
    let (alt, _az) = altitude(dec_deg, ha_hours, lat_deg);
    if alt <= 0.0 {
        BELOW_HORIZON_AIRMASS
    } else {
        1.0 / (alt / DEG_IN_RADIAN).sin()
    }
}

/// Precess (ra in hours, dec in deg) from one epoch to another using the
/// IAU 1976 rotation: zeta, z, theta as cubic polynomials in time, per
/// Taff's rigorous matrix method. Accurate over several centuries.
pub fn precess(ra_hours: f64, dec_deg: f64, epoch_in: f64, epoch_out: f64) -> (f64, f64) {
    let ti = (epoch_in - 2000.0) / 100.0;
    let tf = (epoch_out - 2000.0 - 100.0 * ti) / 100.0;

    let zeta = (2306.2181 + 1.39656 * ti + 0.000139 * ti * ti) * tf
        + (0.30188 - 0.000344 * ti) * tf * tf
        + 0.017998 * tf * tf * tf;
    let z = zeta + (0.79280 + 0.000410 * ti) * tf * tf + 0.000205 * tf * tf * tf;
    let theta = (2004.3109 - 0.8533 * ti - 0.000217 * ti * ti) * tf
        - (0.42665 + 0.000217 * ti) * tf * tf
        - 0.041833 * tf * tf * tf;

    let zeta = zeta / ARCSEC_IN_RADIAN;
    let z = z / ARCSEC_IN_RADIAN;
    let theta = theta / ARCSEC_IN_RADIAN;

    let (cz, sz) = (z.cos(), z.sin());
    let (czeta, szeta) = (zeta.cos(), zeta.sin());
    let (ct, st) = (theta.cos(), theta.sin());

    let p = [
        [czeta * cz * ct - szeta * sz, -szeta * cz * ct - czeta * sz, -cz * st],
        [czeta * sz * ct + szeta * cz, -szeta * sz * ct + czeta * cz, -sz * st],
        [czeta * st, -szeta * st, ct],
    ];

    let ra = ra_hours / HRS_IN_RADIAN;
    let dec = dec_deg / DEG_IN_RADIAN;
    let v = [dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin()];
    let rotated = [
        p[0][0] * v[0] + p[0][1] * v[1] + p[0][2] * v[2],
        p[1][0] * v[0] + p[1][1] * v[1] + p[1][2] * v[2],
        p[2][0] * v[0] + p[2][1] * v[1] + p[2][2] * v[2],
    ];

    cartesian_to_radec(rotated[0], rotated[1], rotated[2])
}

/// Galactic longitude and latitude (deg) for (ra in hours, dec in deg) at
/// the given epoch: precess to 1950, then rotate by the stored matrix.
pub fn galactic(ra_hours: f64, dec_deg: f64, epoch: f64) -> (f64, f64) {
    let (r1950, d1950) = precess(ra_hours, dec_deg, epoch, 1950.0);
    let ra = r1950 / HRS_IN_RADIAN;
    let dec = d1950 / DEG_IN_RADIAN;

    let v = [dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin()];
    let p = &GALACTIC_ROTATION;
    let x1 = p[0][0] * v[0] + p[0][1] * v[1] + p[0][2] * v[2];
    let y1 = p[1][0] * v[0] + p[1][1] * v[1] + p[1][2] * v[2];
    let z1 = p[2][0] * v[0] + p[2][1] * v[1] + p[2][2] * v[2];

    let glong = atan_circ(x1, y1) * DEG_IN_RADIAN;
    let glat = clamped_asin(z1) * DEG_IN_RADIAN;
    (glong, glat)
}

/// Ecliptic longitude and latitude (deg) for (ra in hours, dec in deg,
/// epoch) evaluated at the epoch of the given julian date. Returns
/// (longitude, latitude, epoch_of_date).
pub fn ecliptic(ra_hours: f64, dec_deg: f64, epoch: f64, jd: f64) -> (f64, f64, f64) {
    let epoch_of_date = 2000.0 + (jd - J2000) / 365.25;
    let (ra_now, dec_now) = precess(ra_hours, dec_deg, epoch, epoch_of_date);

    let a = ra_now * 15.0 / DEG_IN_RADIAN;
    let d = dec_now / DEG_IN_RADIAN;

    let beta = clamped_asin(d.sin() * COS_OBLIQUITY - d.cos() * a.sin() * SIN_OBLIQUITY);
    let mut lambda =
        clamped_asin((d.sin() * SIN_OBLIQUITY + d.cos() * a.sin() * COS_OBLIQUITY) / beta.cos());
    if d.cos() * a.cos() / beta.cos() < 0.0 {
        lambda = std::f64::consts::PI - lambda;
    }

    let mut lon = lambda * DEG_IN_RADIAN;
    while lon < 0.0 {
        lon += 360.0;
    }
    while lon > 360.0 {
        lon -= 360.0;
    }
    (lon, beta * DEG_IN_RADIAN, epoch_of_date)
}

/// Quadrant-correct arctangent returning [0, 2π) for coordinates (x, y).
pub fn atan_circ(x: f64, y: f64) -> f64 {
    use std::f64::consts::PI;
    let theta = if x == 0.0 {
        if y > 0.0 {
            PI / 2.0
        } else if y < 0.0 {
            3.0 * PI / 2.0
        } else {
            0.0
        }
    } else {
        let mut t = (y / x).atan();
        if x < 0.0 {
            t += PI;
        }
        t
    };
    if theta < 0.0 {
        theta + 2.0 * PI
    } else {
        theta
    }
}

/// Convert a direction-cosine triplet back to (ra hours, dec deg).
fn cartesian_to_radec(x: f64, y: f64, z: f64) -> (f64, f64) {
    let m = (x * x + y * y + z * z).sqrt();
    let (x, y, z) = (x / m, y / m, z / m);
    let xy = (x * x + y * y).sqrt();
    if xy < 1e-10 {
        // too close to the pole
        let dec = if z < 0.0 { -90.0 } else { 90.0 };
        return (0.0, dec);
    }
    let ra = atan_circ(x, y) * HRS_IN_RADIAN;
    let dec = clamped_asin(z) * DEG_IN_RADIAN;
    (ra, dec)
}
