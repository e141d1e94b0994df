//! Field lifecycle and selection policy.
//!
//! `init_fields` prices every field against the night (feasibility window,
//! moon, declination limits), `update_field_status` advances the lifecycle
//! as time passes, and `select_next` applies the deterministic multi-tier
//! priority that picks the next field to observe.

use crate::astro::coords::{airmass, ecliptic, galactic};
use crate::astro::time::{clock_difference, hour_angle};
use crate::models::field::{Field, FieldKind, FieldStatus, SelectionCode, SurveyClass};
use crate::models::site::Site;
use crate::night::{NightContext, MIN_EXECUTION_TIME_HOURS};
use crate::parsing::sequence::{MAX_DEC_DEG, MIN_DEC_DEG, MIN_INTERVAL_HOURS};

#[cfg(test)]
mod tests;

/// Feasibility limits for sky fields.
pub const MAX_AIRMASS: f64 = 2.0;
/// Relaxed airmass limit for far-southern fields.
pub const MAX_AIRMASS_SOUTH: f64 = 2.2;
const SOUTH_DEC_LIMIT: f64 = -27.0;
pub const MAX_HOUR_ANGLE: f64 = 4.3;

/// Minimum pointing separation from a bright moon, degrees.
pub const MIN_MOON_SEPARATION_DEG: f64 = 15.0;

/// Step of the rise/set search, sidereal hours (one clock minute).
const LST_SEARCH_INCREMENT_HOURS: f64 = 0.00166;
const SIDEREAL_DAY_IN_HOURS: f64 = 23.934_469_72;

/// Sky flats wait this long after sunset and stop this long before
/// sunrise, days.
pub const SKYFLAT_WAIT_DAYS: f64 = 0.5 / 24.0;

/// RA gap between paired fields: one dither step of 0.5 degrees on the
/// sky, in hours at the equator, compared with a 1.1x tolerance.
pub const PAIR_RA_STEP_HOURS: f64 = 0.5 / 15.0;
const PAIR_TOLERANCE: f64 = 1.1;

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// Advance one field's lifecycle status for the current jd. Idempotent for
/// a fixed jd: a second call leaves the status unchanged.
pub fn update_field_status(f: &mut Field, jd: f64, bad_weather: bool) -> FieldStatus {
    if !f.doable {
        f.status = FieldStatus::NotDoable;
        return f.status;
    }

    if f.n_done == f.n_required {
        f.doable = false;
        f.status = FieldStatus::NotDoable;
        return f.status;
    }

    let (Some(jd_rise), Some(jd_set), Some(jd_next)) = (f.jd_rise, f.jd_set, f.jd_next) else {
        f.doable = false;
        f.status = FieldStatus::NotDoable;
        return f.status;
    };

    // not risen yet
    if jd < jd_rise {
        f.status = FieldStatus::NotDoable;
        return f.status;
    }

    // already set
    if jd > jd_set {
        f.doable = false;
        f.status = FieldStatus::NotDoable;
        return f.status;
    }

    // not yet time for the next visit
    if jd_next - jd > MIN_EXECUTION_TIME_HOURS / 24.0 {
        f.status = FieldStatus::NotDoable;
        return f.status;
    }

    match f.kind {
        FieldKind::Dark | FieldKind::DomeFlat => {
            f.status = FieldStatus::DoNow;
        }
        FieldKind::Focus
        | FieldKind::OffsetPointing
        | FieldKind::EveningFlat
        | FieldKind::MorningFlat => {
            f.status =
                if bad_weather { FieldStatus::NotDoable } else { FieldStatus::DoNow };
        }
        FieldKind::Sky => {
            f.time_required = f.n_left() as f64 * f.interval_hours;
            f.time_up = ((jd_set - jd) * 24.0).max(0.0);
            f.time_left = f.time_up - f.time_required;
            f.status =
                if f.time_left < 0.0 { FieldStatus::TooLate } else { FieldStatus::Ready };
        }
    }
    f.status
}

/// Shorten a field's repeat interval so that `time_left` becomes zero. When
/// the shortened interval would fall below the minimum, the field is marked
/// not doable instead.
pub fn shorten_interval(f: &mut Field) {
    let n_left = f.n_left();
    if n_left == 0 {
        f.doable = false;
        return;
    }
    let new_interval = f.time_up / n_left as f64;
    if new_interval > MIN_INTERVAL_HOURS {
        f.time_required = f.time_up;
        f.interval_hours = new_interval;
        f.time_left = 0.0;
        log::info!(
            "field {}: interval shortened to {:7.1} s",
            f.field_number,
            new_interval * 3600.0
        );
    } else {
        f.doable = false;
        log::info!(
            "field {}: cannot shorten interval below {:5.0} s, dropping",
            f.field_number,
            MIN_INTERVAL_HOURS * 3600.0
        );
    }
}

/// True when `first` and `second` form a dither pair: two Sky fields at
/// the same declination whose RA gap is one dither step.
pub fn paired_fields(first: &Field, second: &Field) -> bool {
    if first.kind != FieldKind::Sky || second.kind != FieldKind::Sky {
        return false;
    }
    if first.dec != second.dec {
        return false;
    }
    let step = PAIR_RA_STEP_HOURS / (first.dec * DEG_TO_RAD).cos();
    clock_difference(first.ra, second.ra).abs() < step * PAIR_TOLERANCE
}

/// Pick the next field to observe, or `None` when nothing is ready.
///
/// Updates every field's status as a side effect and stamps the selection
/// reason on the returned field. Tiers, in order: Ready MustDo, TooLate
/// MustDo (with interval shortening), first DoNow (flats before darks),
/// paired-field bias, Ready with least time left, TooLate with most time
/// left (shortened).
pub fn select_next(
    fields: &mut [Field],
    prev_index: Option<usize>,
    jd: f64,
    bad_weather: bool,
) -> Option<usize> {
    for f in fields.iter_mut() {
        update_field_status(f, jd, bad_weather);
    }

    // tier 1: Ready MustDo with the least time left
    if let Some(i) = best_by(fields, |f| {
        f.status == FieldStatus::Ready && f.survey == SurveyClass::MustDo
    }) {
        fields[i].selection_code = SelectionCode::LeastTimeReadyMustDo;
        return Some(i);
    }

    // tier 2: TooLate MustDo with the least time left, interval shortened
    if let Some(i) = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.status == FieldStatus::TooLate && f.survey == SurveyClass::MustDo)
        .min_by(|(_, a), (_, b)| a.time_left.total_cmp(&b.time_left))
        .map(|(i, _)| i)
    {
        shorten_interval(&mut fields[i]);
        if update_field_status(&mut fields[i], jd, bad_weather) == FieldStatus::Ready {
            fields[i].selection_code = SelectionCode::LeastTimeLateMustDo;
            return Some(i);
        }
    }

    // tier 3: first DoNow, flats ahead of darks ahead of the rest
    if let Some(i) = fields.iter().position(|f| {
        f.status == FieldStatus::DoNow
            && matches!(
                f.kind,
                FieldKind::DomeFlat | FieldKind::EveningFlat | FieldKind::MorningFlat
            )
    }) {
        fields[i].selection_code = SelectionCode::FirstDoNowFlat;
        return Some(i);
    }
    if let Some(i) = fields
        .iter()
        .position(|f| f.status == FieldStatus::DoNow && f.kind == FieldKind::Dark)
    {
        fields[i].selection_code = SelectionCode::FirstDoNowDark;
        return Some(i);
    }
    if let Some(i) = fields.iter().position(|f| f.status == FieldStatus::DoNow) {
        fields[i].selection_code = SelectionCode::FirstDoNow;
        return Some(i);
    }

    // tier 4: the pair of the field just observed jumps the queue
    if let Some(prev) = prev_index {
        let next = prev + 1;
        if next < fields.len()
            && fields[next].doable
            && paired_fields(&fields[prev], &fields[next])
        {
            match fields[next].status {
                FieldStatus::Ready => {
                    fields[next].selection_code = SelectionCode::FirstReadyPair;
                    return Some(next);
                }
                FieldStatus::TooLate => {
                    shorten_interval(&mut fields[next]);
                    update_field_status(&mut fields[next], jd, bad_weather);
                    fields[next].selection_code = SelectionCode::FirstLatePair;
                    return Some(next);
                }
                _ => {}
            }
        }
    }

    // tier 5: Ready with the least time left
    if let Some(i) = best_by(fields, |f| f.status == FieldStatus::Ready) {
        fields[i].selection_code = SelectionCode::LeastTimeReady;
        return Some(i);
    }

    // tier 6: TooLate with the most time left, interval shortened
    if let Some(i) = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.status == FieldStatus::TooLate)
        .max_by(|(_, a), (_, b)| {
            a.time_left.total_cmp(&b.time_left).then(b.field_number.cmp(&a.field_number))
        })
        .map(|(i, _)| i)
    {
        shorten_interval(&mut fields[i]);
        if update_field_status(&mut fields[i], jd, bad_weather) == FieldStatus::Ready {
            fields[i].selection_code = SelectionCode::MostTimeLate;
            return Some(i);
        }
    }

    None
}

/// Least `time_left` among fields passing `pred`; ties broken by fewest
/// visits remaining, then lowest index.
fn best_by<P: Fn(&Field) -> bool>(fields: &[Field], pred: P) -> Option<usize> {
    fields
        .iter()
        .enumerate()
        .filter(|&(_, f)| pred(f))
        .min_by(|&(ia, a), &(ib, b)| {
            a.time_left
                .total_cmp(&b.time_left)
                .then(a.n_left().cmp(&b.n_left()))
                .then(ia.cmp(&ib))
        })
        .map(|(i, _)| i)
}

/// True when the field sits too close to a bright moon tonight.
pub fn moon_interference(f: &Field, night: &NightContext) -> bool {
    if night.times.percent_moon <= 0.5 {
        return false;
    }
    let dra = clock_difference(night.times.ra_moon, f.ra) * 15.0;
    let ddec = night.times.dec_moon - f.dec;
    (dra * dra + ddec * ddec).sqrt() < MIN_MOON_SEPARATION_DEG
}

/// Jd at which a position first satisfies both the airmass and hour-angle
/// limits inside the observing window, or `None` when it never does.
/// Stepwise search at one-minute granularity from the start of the window.
pub fn rise_time(
    ra: f64,
    dec: f64,
    max_airmass: f64,
    max_ha: f64,
    night: &NightContext,
    site: &Site,
) -> Option<f64> {
    let mut jd = night.jd_start;
    let mut lst = night.lst_start;
    let within = |lst: f64| {
        let ha = hour_angle(ra, lst);
        airmass(ha, dec, site.latitude_deg) <= max_airmass && ha.abs() <= max_ha
    };

    if within(lst) {
        return Some(jd);
    }
    while jd < night.jd_end {
        jd += LST_SEARCH_INCREMENT_HOURS / SIDEREAL_DAY_IN_HOURS;
        lst += LST_SEARCH_INCREMENT_HOURS;
        if lst > 24.0 {
            lst -= 24.0;
        }
        if within(lst) {
            return Some(jd);
        }
    }
    None
}

/// Jd after which the limits stop holding, searched backwards from the end
/// of the window. `None` when the position is never up.
pub fn set_time(
    ra: f64,
    dec: f64,
    max_airmass: f64,
    max_ha: f64,
    night: &NightContext,
    site: &Site,
) -> Option<f64> {
    let mut jd = night.jd_end;
    let mut lst = night.lst_end;
    let within = |lst: f64| {
        let ha = hour_angle(ra, lst);
        airmass(ha, dec, site.latitude_deg) <= max_airmass && ha.abs() <= max_ha
    };

    if within(lst) {
        return Some(jd);
    }
    while jd > night.jd_start {
        jd -= LST_SEARCH_INCREMENT_HOURS / SIDEREAL_DAY_IN_HOURS;
        lst -= LST_SEARCH_INCREMENT_HOURS;
        if lst < 0.0 {
            lst += 24.0;
        }
        if within(lst) {
            return Some(jd);
        }
    }
    None
}

/// Initialize every field's feasibility against the night: rise/set
/// windows, derived coordinates, moon and declination vetoes, initial
/// `jd_next`. Returns the number of observable fields.
///
/// Fields already exercised tonight (journal reload) keep their progress;
/// their windows and vetoes are still recomputed.
pub fn init_fields(
    fields: &mut [Field],
    night: &NightContext,
    site: &Site,
    jd_now: f64,
) -> usize {
    let dark_hours = night.dark_hours_remaining(jd_now);
    let night_hours = night.night_hours_remaining(jd_now);
    let jd_window_start = night.jd_start.max(jd_now);

    let mut n_observable = 0;

    for f in fields.iter_mut() {
        f.status = FieldStatus::NotDoable;
        f.selection_code = SelectionCode::NotSelected;

        let (gal_long, gal_lat) = galactic(f.ra, f.dec, f.epoch);
        f.gal_long = gal_long;
        f.gal_lat = gal_lat;
        let (ecl_long, ecl_lat, epoch_of_date) = ecliptic(f.ra, f.dec, f.epoch, night.jd_start);
        f.ecl_long = ecl_long;
        f.ecl_lat = ecl_lat;
        f.epoch = epoch_of_date;

        match f.kind {
            // darks and dome flats go any time until sunrise
            FieldKind::Dark | FieldKind::DomeFlat => {
                f.doable = true;
                f.jd_rise = Some(jd_now);
                f.jd_set = Some(night.times.jd_sunrise);
                if f.jd_next.is_none() {
                    f.jd_next = Some(jd_now);
                }
                f.time_up = night_hours;
                f.time_left = night_hours;
                n_observable += 1;
            }

            // focus and offset pointing go any time it is dark
            FieldKind::Focus | FieldKind::OffsetPointing => {
                if jd_now < night.jd_end {
                    f.doable = true;
                    f.jd_rise = Some(jd_window_start);
                    f.jd_set = Some(night.jd_end);
                    f.jd_next = Some(f.jd_next.unwrap_or(jd_window_start));
                    f.time_up = dark_hours;
                    f.time_left = dark_hours;
                    n_observable += 1;
                } else {
                    f.doable = false;
                    log::info!(
                        "field {}: morning twilight has started, skipping {}",
                        f.field_number,
                        f.kind.description()
                    );
                }
            }

            // evening flats run from just after sunset to the start of the
            // observing window
            FieldKind::EveningFlat => {
                if jd_now < night.jd_start {
                    f.doable = true;
                    let rise = (night.times.jd_sunset + SKYFLAT_WAIT_DAYS).max(jd_now);
                    f.jd_rise = Some(rise);
                    f.jd_set = Some(night.jd_start);
                    f.jd_next = Some(rise);
                    f.time_up = (night.jd_start - rise) * 24.0;
                    f.time_left = (night.jd_start - jd_now) * 24.0;
                    n_observable += 1;
                } else {
                    f.doable = false;
                    log::info!("field {}: evening twilight has ended, skipping flat", f.field_number);
                }
            }

            // morning flats run from the end of the window to just before
            // sunrise
            FieldKind::MorningFlat => {
                let last = night.times.jd_sunrise - SKYFLAT_WAIT_DAYS;
                if jd_now < last {
                    f.doable = true;
                    let rise = night.jd_end.max(jd_now);
                    f.jd_rise = Some(rise);
                    f.jd_set = Some(last);
                    f.jd_next = Some(rise);
                    f.time_up = (last - rise) * 24.0;
                    f.time_left = (last - jd_now) * 24.0;
                    n_observable += 1;
                } else {
                    f.doable = false;
                    log::info!("field {}: morning twilight has ended, skipping flat", f.field_number);
                }
            }

            FieldKind::Sky => {
                let max_am =
                    if f.dec <= SOUTH_DEC_LIMIT { MAX_AIRMASS_SOUTH } else { MAX_AIRMASS };
                f.jd_rise = rise_time(f.ra, f.dec, max_am, MAX_HOUR_ANGLE, night, site);
                f.jd_set = set_time(f.ra, f.dec, max_am, MAX_HOUR_ANGLE, night, site);

                let (Some(jd_rise), Some(jd_set)) = (f.jd_rise, f.jd_set) else {
                    f.doable = false;
                    f.jd_next = None;
                    f.time_left = -1.0;
                    log::info!(
                        "field {}: {:7.3} {:7.3} never rises",
                        f.field_number, f.ra, f.dec
                    );
                    continue;
                };

                f.time_up = ((jd_set - jd_rise.max(jd_now)) * 24.0).max(0.0);
                f.time_required = f.n_left() as f64 * f.interval_hours;
                f.time_left = f.time_up - f.time_required;

                if moon_interference(f, night) {
                    f.doable = false;
                    f.jd_next = None;
                    log::info!(
                        "field {}: {:7.3} {:7.3} too close to the moon",
                        f.field_number, f.ra, f.dec
                    );
                } else if f.dec > MAX_DEC_DEG || f.dec < MIN_DEC_DEG {
                    f.doable = false;
                    log::info!(
                        "field {}: dec {:7.3} outside mount limits",
                        f.field_number, f.dec
                    );
                } else if f.survey != SurveyClass::MustDo && f.time_left < 0.0 {
                    f.doable = false;
                    f.jd_next = None;
                    log::info!(
                        "field {}: {:7.3} {:7.3} up too short for {} visits",
                        f.field_number, f.ra, f.dec, f.n_left()
                    );
                } else {
                    f.doable = true;
                    if f.jd_next.is_none() {
                        f.jd_next =
                            Some(if jd_now > jd_rise { night.jd_start } else { jd_rise });
                    }
                    n_observable += 1;
                }
            }
        }

        log::debug!(
            "field {}: doable={} kind={} rise={:?} set={:?} next={:?} time_up={:7.3} time_left={:7.3}",
            f.field_number,
            f.doable,
            f.kind.description(),
            f.jd_rise,
            f.jd_set,
            f.jd_next,
            f.time_up,
            f.time_left,
        );
    }

    n_observable
}
