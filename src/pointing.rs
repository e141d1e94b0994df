//! Pointing refinements: the square-spiral dither pattern for flats, and
//! the empirical pointing and tracking-rate corrections applied to repeat
//! sky visits.
//!
//! Corrections are subtracted from the field RA/Dec before pointing. The
//! piecewise slopes were fitted from on-sky fields; they stay behind
//! context switches that default off.

/// Dither grid step for flat fields, degrees (10 arcsec).
pub const FLAT_DITHER_STEP_DEG: f64 = 0.002778;

/// Dither grid step for deep-search coadds, degrees (5 arcsec).
pub const DEEP_DITHER_STEP_DEG: f64 = 0.001389;

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// Offset in (ra, dec) degrees for dither iteration `n` on a square-spiral
/// grid centered on the nominal pointing: iteration 0 is the center,
/// 1..=8 walk the smallest square, 9..=24 the next, and so on out to
/// iteration 120.
pub fn dither_offset(iteration: usize, step_deg: f64) -> (f64, f64) {
    if iteration == 0 {
        return (0.0, 0.0);
    }

    let (square, first) = match iteration {
        1..=8 => (3i64, 1),
        9..=24 => (5, 9),
        25..=48 => (7, 25),
        49..=80 => (9, 49),
        81..=120 => (11, 81),
        _ => {
            log::warn!("dither iteration {iteration} beyond the grid, recentering");
            return (0.0, 0.0);
        }
    };

    let i = (iteration - first) as i64;
    let side = i / (square - 1);
    let half = square / 2;
    let along = i - side * (square - 1);

    let (ra, dec) = match side {
        0 => (half, along - half),
        1 => (along - half + 1, half),
        2 => (-half, along - half + 1),
        _ => (along - half, -half),
    };

    (ra as f64 * step_deg, dec as f64 * step_deg)
}

/// RA tracking-rate correction in arcsec/hour for an hour angle (hours)
/// and declination (degrees); subtracted from the sidereal rate.
pub fn ra_rate_correction(ha_hours: f64, dec_deg: f64) -> f64 {
    let base = if ha_hours > 0.0 {
        if dec_deg < -30.0 {
            0.010
        } else if dec_deg < 30.0 {
            0.017
        } else if dec_deg < 50.0 {
            0.013
        } else {
            0.010
        }
    } else if dec_deg < -30.0 || dec_deg >= 30.0 {
        0.003
    } else {
        0.005
    };
    // negative rates drive the telescope faster than sidereal
    -base * 3600.0 / (dec_deg * DEG_TO_RAD).cos()
}

/// Dec tracking-rate correction in arcsec/hour for an hour angle (hours).
pub fn dec_rate_correction(ha_hours: f64, _dec_deg: f64) -> f64 {
    let rate = 0.004 + (-0.012 * (ha_hours + 2.0) / 6.0);
    -rate * 3600.0
}

const RA_HA_CHANGE: f64 = 0.0;
const RA_SLOPE1: f64 = -0.002375;
const RA_SLOPE2: f64 = -0.021;

const DEC_HA_CHANGE1: f64 = 0.0;
const DEC_HA_CHANGE2: f64 = 2.0;
const DEC_SLOPE1: f64 = -0.0008125;
const DEC_SLOPE2: f64 = -0.00325;
const DEC_SLOPE3: f64 = -0.00675;

/// Pointing correction in RA (degrees) for a field first observed at hour
/// angle `ha0` and revisited at hour angle `ha` (both hours): the flexure
/// slope integrated piecewise between the two hour angles.
pub fn ra_pointing_correction(ha0: f64, ha: f64) -> f64 {
    if ha0 < RA_HA_CHANGE {
        if ha < RA_HA_CHANGE {
            RA_SLOPE1 * (ha - ha0)
        } else {
            RA_SLOPE1 * (RA_HA_CHANGE - ha0) + RA_SLOPE2 * (ha - RA_HA_CHANGE)
        }
    } else if ha > RA_HA_CHANGE {
        RA_SLOPE2 * (ha - ha0)
    } else {
        RA_SLOPE2 * (RA_HA_CHANGE - ha0) + RA_SLOPE1 * (ha - RA_HA_CHANGE)
    }
}

/// Pointing correction in Dec (degrees) between hour angles `ha0` and `ha`
/// (hours), with the slope changing at two break points.
pub fn dec_pointing_correction(ha0: f64, ha: f64) -> f64 {
    if ha0 < DEC_HA_CHANGE1 {
        if ha < DEC_HA_CHANGE1 {
            DEC_SLOPE1 * (ha - ha0)
        } else if ha < DEC_HA_CHANGE2 {
            DEC_SLOPE1 * (DEC_HA_CHANGE1 - ha0) + DEC_SLOPE2 * (ha - DEC_HA_CHANGE1)
        } else {
            DEC_SLOPE1 * (DEC_HA_CHANGE1 - ha0)
                + DEC_SLOPE2 * (DEC_HA_CHANGE2 - DEC_HA_CHANGE1)
                + DEC_SLOPE3 * (ha - DEC_HA_CHANGE2)
        }
    } else if ha0 < DEC_HA_CHANGE2 {
        if ha < DEC_HA_CHANGE1 {
            DEC_SLOPE1 * (ha - DEC_HA_CHANGE1) + DEC_SLOPE2 * (DEC_HA_CHANGE1 - ha0)
        } else if ha < DEC_HA_CHANGE2 {
            DEC_SLOPE2 * (ha - ha0)
        } else {
            DEC_SLOPE2 * (DEC_HA_CHANGE2 - ha0) + DEC_SLOPE3 * (ha - DEC_HA_CHANGE2)
        }
    } else if ha < DEC_HA_CHANGE1 {
        DEC_SLOPE1 * (ha - DEC_HA_CHANGE1)
            + DEC_SLOPE2 * (DEC_HA_CHANGE1 - DEC_HA_CHANGE2)
            + DEC_SLOPE3 * (DEC_HA_CHANGE2 - ha0)
    } else if ha < DEC_HA_CHANGE2 {
        DEC_SLOPE2 * (ha - DEC_HA_CHANGE2) + DEC_SLOPE3 * (DEC_HA_CHANGE2 - ha0)
    } else {
        DEC_SLOPE3 * (ha - ha0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dither_center_then_ring() {
        assert_eq!(dither_offset(0, FLAT_DITHER_STEP_DEG), (0.0, 0.0));

        // iterations 1..=8 stay on the 3x3 ring
        for n in 1..=8 {
            let (ra, dec) = dither_offset(n, 1.0);
            assert!(ra.abs() <= 1.0 + 1e-12 && dec.abs() <= 1.0 + 1e-12, "n={n}: ({ra},{dec})");
            assert!(ra != 0.0 || dec != 0.0);
        }

        // iterations 9..=24 reach the 5x5 ring
        for n in 9..=24 {
            let (ra, dec) = dither_offset(n, 1.0);
            assert!(ra.abs().max(dec.abs()) > 1.0 + 1e-12, "n={n}: ({ra},{dec})");
            assert!(ra.abs() <= 2.0 + 1e-12 && dec.abs() <= 2.0 + 1e-12);
        }
    }

    #[test]
    fn dither_positions_are_distinct_within_a_ring() {
        let mut seen = std::collections::HashSet::new();
        for n in 1..=8 {
            let (ra, dec) = dither_offset(n, 1.0);
            assert!(seen.insert((ra as i64, dec as i64)), "duplicate at {n}");
        }
    }

    #[test]
    fn pointing_corrections_vanish_in_place() {
        assert_eq!(ra_pointing_correction(1.5, 1.5), 0.0);
        assert_eq!(dec_pointing_correction(-1.0, -1.0), 0.0);
    }

    #[test]
    fn west_correction_accumulates() {
        let c1 = ra_pointing_correction(0.5, 1.0);
        let c2 = ra_pointing_correction(0.5, 2.0);
        assert!(c2 < c1 && c1 < 0.0);
    }

    #[test]
    fn rates_scale_with_declination() {
        let equator = ra_rate_correction(1.0, 0.0);
        let south = ra_rate_correction(1.0, -60.0);
        assert!(south.abs() > equator.abs());
        assert!(equator < 0.0);
    }
}
