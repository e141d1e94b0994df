//! The observation loop: advance time, ask the selector for a field, drive
//! the telescope and camera through the exposure, and commit state to the
//! recovery journal after every visit.

use std::path::Path;

use crate::astro::coords::airmass;
use crate::astro::time::{clock_difference, hour_angle, normalize_ra, CalendarDate};
use crate::camera::protocol::{CLEAR_INTERVAL_HOURS, NUM_CAMERA_CLEARS, READOUT_TIME_SEC};
use crate::camera::{Camera, ExposeRequest, ExposureMode, MAX_BAD_READOUTS};
use crate::context::{Clock, SchedulerContext};
use crate::error::{Result, SchedulerError};
use crate::fits;
use crate::models::field::{FieldKind, VisitRecord, MAX_FIELDS, MAX_VISITS};
use crate::parsing::sequence::{load_sequence, MAX_FOCUS_MM, MIN_FOCUS_MM};
use crate::parsing::weather::day_of_year;
use crate::pointing::{
    dec_pointing_correction, dec_rate_correction, dither_offset, ra_pointing_correction,
    ra_rate_correction, DEEP_DITHER_STEP_DEG, FLAT_DITHER_STEP_DEG,
};
use crate::scheduler::{init_fields, select_next};
use crate::telescope::Telescope;

/// Exposures longer than this split into sub-exposures west of the
/// meridian, hours.
pub const LONG_EXPT_HOURS: f64 = 3600.0 / 3600.0;

/// Fixed per-exposure overhead (readout plus margin), hours.
pub const EXPOSURE_OVERHEAD_HOURS: f64 = (READOUT_TIME_SEC + 5.0) / 3600.0;

/// Time to change focus, hours.
pub const FOCUS_OVERHEAD_HOURS: f64 = 0.00555;

/// Largest change from the expected default focus, mm.
pub const MAX_FOCUS_CHANGE_MM: f64 = 0.3;

/// Focus-analysis output consumed after a focus sequence, one
/// `best focus: <mm>` line per exposure.
pub const FOCUS_ESTIMATES_FILE: &str = "best_focus.dat";

/// Pointing-offset measurement consumed after an offset exposure.
pub const TELESCOPE_OFFSETS_FILE: &str = "telescope_offsets.dat";

/// Pointing offsets beyond this many degrees are discarded.
const MAX_POINTING_OFFSET_DEG: f64 = 1.0;

/// End-of-night accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub fields_loaded: usize,
    pub fields_observable: usize,
    pub fields_completed: usize,
}

/// Run the observation loop until sunrise or a terminate signal.
pub async fn run_night(
    ctx: &mut SchedulerContext,
    tel: &mut dyn Telescope,
    cam: &mut dyn Camera,
) -> Result<RunSummary> {
    let simulated = ctx.simulation;

    // wait for sunset; in a simulated run just jump there
    if simulated {
        if ctx.clock.now_jd()? < ctx.night.times.jd_sunset {
            ctx.clock = Clock::Simulated { jd: ctx.night.times.jd_sunset };
        }
    } else {
        loop {
            let jd = ctx.clock.now_jd()?;
            if jd >= ctx.night.times.jd_sunset {
                break;
            }
            log::info!(
                "UT {:9.5}: waiting for sunset at jd {:12.6}",
                ctx.clock.now_ut()?,
                ctx.night.times.jd_sunset - 2_450_000.0
            );
            ctx.clock.sleep_secs(60.0).await;
        }
    }

    if ctx.clock.now_jd()? > ctx.night.times.jd_sunrise {
        log::warn!("sun is already up, nothing to observe");
        return Ok(RunSummary { fields_loaded: ctx.fields.len(), ..Default::default() });
    }

    let mut telescope_ready = false;
    if !simulated {
        // the camera must answer at startup; that failure is fatal
        let status = cam.update_status().await.map_err(|e| {
            SchedulerError::FatalState(format!("camera status unavailable at startup: {e}"))
        })?;
        log::info!("camera status at startup:\n{}", status.summary());

        match tel.update_status().await {
            Ok(status) => {
                log::info!("telescope status at startup: {}", status.summary());
                telescope_ready = true;
            }
            Err(e) => log::warn!("telescope status not yet available: {e}"),
        }
    } else {
        ctx.stowed = false;
        telescope_ready = true;
    }

    let jd = ctx.clock.now_jd()?;
    let observable = init_fields(&mut ctx.fields, &ctx.night, &ctx.site, jd);
    log::info!("UT {:9.6}: starting observations, {observable} fields observable", ctx.clock.now_ut()?);

    let mut summary = RunSummary {
        fields_loaded: ctx.fields.len(),
        fields_observable: observable,
        fields_completed: 0,
    };

    loop {
        if ctx.flags.terminated() {
            log::warn!("terminating on signal");
            break;
        }

        let jd = ctx.clock.now_jd()?;
        if jd > ctx.night.times.jd_sunrise {
            break;
        }

        absorb_sidecar(ctx, jd);

        // classify the weather; a telescope that will not answer counts as
        // bad weather and the loop keeps checking until sunrise
        let mut bad_weather = false;
        if simulated {
            bad_weather = simulated_weather_bad(ctx, jd);
        } else if ctx.flags.paused() {
            log::info!("UT {:9.6}: paused, skipping telescope check", ctx.clock.now_ut()?);
        } else {
            match tel.update_status().await {
                Ok(status) => {
                    telescope_ready = true;
                    if status.dome_open {
                        ctx.stowed = false;
                    } else {
                        bad_weather = true;
                    }
                }
                Err(e) => {
                    log::warn!("cannot update telescope status: {e}");
                    telescope_ready = false;
                    bad_weather = true;
                }
            }

            if telescope_ready && bad_weather && !ctx.stopped {
                do_stop(ctx, tel).await;
            }
        }

        // pause is cooperative: stop the mount and idle one tick
        if ctx.flags.paused() {
            if telescope_ready && !simulated {
                if bad_weather && !ctx.stowed {
                    do_stow(ctx, tel).await;
                } else if !ctx.stopped {
                    do_stop(ctx, tel).await;
                }
            }
            ctx.clock.sleep_secs(ctx.config.loop_wait_secs).await;
            continue;
        }

        // a finished focus sequence settles the focus before anything else
        if !simulated && focus_epilogue_due(ctx) {
            finish_focus_sequence(ctx, tel, cam).await?;
            continue;
        }

        // a finished offset exposure settles the pointing offsets
        if !simulated && offset_epilogue_due(ctx) {
            finish_offset_exposure(ctx, tel, cam).await;
            continue;
        }

        let selected = select_next(&mut ctx.fields, ctx.prev_index, jd, bad_weather);

        let Some(index) = selected else {
            if telescope_ready && !simulated && !ctx.stopped {
                do_stop(ctx, tel).await;
            }
            log::debug!("UT {:9.6}: no fields ready to observe", ctx.clock.now_ut()?);
            ctx.clock.sleep_secs(ctx.config.loop_wait_secs).await;
            continue;
        };

        log::info!(
            "UT {:9.6}: selected field {index}: {}",
            ctx.clock.now_ut()?,
            ctx.fields[index].selection_code
        );

        let kind = ctx.fields[index].kind;
        let can_observe = kind.skips_pointing() || (!bad_weather && telescope_ready);
        if !can_observe {
            if !telescope_ready {
                log::info!("waiting for the telescope to come up");
            } else {
                log::info!("waiting for the dome to open");
            }
            ctx.clock.sleep_secs(ctx.config.loop_wait_secs).await;
            continue;
        }

        if ctx.focus_done && kind == FieldKind::Focus {
            ctx.focus_done = false;
        } else if ctx.offset_done && kind == FieldKind::OffsetPointing {
            ctx.offset_done = false;
        }

        let result = if simulated {
            observe_simulated(ctx, index).await
        } else {
            observe(ctx, tel, cam, index).await
        };

        let observed = result.is_ok();
        if let Err(e) = result {
            log::error!("error observing field {index}: {e}");
            if telescope_ready && !simulated && !ctx.stopped {
                do_stop(ctx, tel).await;
            }
        }

        // journal writes linearize with n_done: the snapshot on disk never
        // counts a visit whose readout is still pending, so a crash before
        // the readout confirms re-observes that visit
        let now = ctx.clock.now_date()?;
        if observed && cam.readout_pending() && ctx.fields[index].n_done > 0 {
            let mut masked = ctx.fields.clone();
            masked[index].unrecord_last_visit(ctx.clock.now_jd()?);
            ctx.journal.save(&masked, now)?;
        } else {
            ctx.journal.save(&ctx.fields, now)?;
        }
        ctx.logs.write_history(ctx.clock.now_jd()?, &ctx.fields)?;

        ctx.prev_index = Some(index);
    }

    log::info!("UT {:9.6}: ending observations", ctx.clock.now_ut()?);

    // shutdown waits out a pending readout rather than cancelling it
    if let Err(e) = cam.wait_readout().await {
        log::warn!("bad readout at shutdown: {e}");
        if let Some(prev) = ctx.prev_index {
            let jd = ctx.clock.now_jd()?;
            ctx.fields[prev].unrecord_last_visit(jd);
        }
    }

    if !simulated {
        if let Err(e) = tel.stow().await {
            log::warn!("could not stow the telescope: {e}");
        } else {
            ctx.stowed = true;
            ctx.stopped = true;
        }
    }

    summary.fields_completed = ctx.logs.write_completed(&ctx.fields)?;
    let now = ctx.clock.now_date()?;
    ctx.journal.save(&ctx.fields, now)?;

    log::info!(
        "{} fields loaded, {} observable, {} completed",
        summary.fields_loaded,
        summary.fields_observable,
        summary.fields_completed
    );
    Ok(summary)
}

/// Append any new records from the sidecar file to the live slice.
fn absorb_sidecar(ctx: &mut SchedulerContext, jd: f64) {
    let path = ctx.sidecar_path();
    if !path.exists() {
        return;
    }
    let load = match load_sequence(&path, ctx.fields.len(), ctx.sidecar_lines_seen) {
        Ok(load) => load,
        Err(e) => {
            log::warn!("error loading new observations from {}: {e}", path.display());
            return;
        }
    };
    if load.lines_read <= ctx.sidecar_lines_seen && load.fields.is_empty() {
        return;
    }
    ctx.sidecar_lines_seen = load.lines_read.max(ctx.sidecar_lines_seen);
    if let Some(filter) = load.filter {
        ctx.filter = filter;
    }
    if load.fields.is_empty() {
        return;
    }
    if ctx.fields.len() + load.fields.len() > MAX_FIELDS {
        log::warn!("too many new fields to add, ignoring the sidecar growth");
        return;
    }

    let mut new_fields = load.fields;
    let observable = init_fields(&mut new_fields, &ctx.night, &ctx.site, jd);
    if observable == 0 {
        log::info!("no observable fields among the {} sidecar additions", new_fields.len());
        return;
    }
    log::info!("adding {} new fields to the queue, {observable} observable", new_fields.len());
    ctx.fields.extend(new_fields);
}

/// In a simulated run the weather file alone decides the weather.
fn simulated_weather_bad(ctx: &SchedulerContext, jd: f64) -> bool {
    let Some(weather) = &ctx.weather else {
        return false;
    };
    // UT hours since the start of the window, allowed past 24 at night
    let ut = ctx.night.ut_start + (jd - ctx.night.jd_start) * 24.0;
    let doy = 1 + day_of_year(ctx.night.date.year, ctx.night.date.month, ctx.night.date.day);
    !weather.is_good(doy as f64 + ut / 24.0)
}

fn focus_epilogue_due(ctx: &SchedulerContext) -> bool {
    if ctx.focus_done {
        return false;
    }
    match ctx.prev_index {
        Some(i) => ctx.fields[i].kind == FieldKind::Focus && ctx.fields[i].is_complete(),
        None => false,
    }
}

fn offset_epilogue_due(ctx: &SchedulerContext) -> bool {
    if ctx.offset_done {
        return false;
    }
    match ctx.prev_index {
        Some(i) => ctx.fields[i].kind == FieldKind::OffsetPointing && ctx.fields[i].is_complete(),
        None => false,
    }
}

/// After the last exposure of a focus sequence: wait out its readout, take
/// the median best focus, and command it, falling back to the night's
/// default when the sequence is unusable. A focus that will not converge
/// leaves the default in place; observing continues either way.
async fn finish_focus_sequence(
    ctx: &mut SchedulerContext,
    tel: &mut dyn Telescope,
    cam: &mut dyn Camera,
) -> Result<()> {
    let Some(index) = ctx.prev_index else {
        return Ok(());
    };

    if let Err(e) = cam.wait_readout().await {
        log::warn!("bad readout of the last focus exposure, retrying it: {e}");
        let jd = ctx.clock.now_jd()?;
        ctx.fields[index].unrecord_last_visit(jd);
        return Ok(());
    }

    let default = ctx.focus_default_mm;
    let target = match median_focus(Path::new(FOCUS_ESTIMATES_FILE)) {
        Some(median)
            if (MIN_FOCUS_MM..=MAX_FOCUS_MM).contains(&median)
                && (median - default).abs() <= MAX_FOCUS_CHANGE_MM =>
        {
            log::info!("focus sequence complete, best focus {median:8.5} mm");
            median
        }
        Some(median) => {
            log::warn!("best focus {median:8.5} mm not usable, using default {default:8.5} mm");
            default
        }
        None => {
            log::warn!("no focus estimates found, using default {default:8.5} mm");
            default
        }
    };

    match tel.set_focus(target).await {
        Ok(()) => log::info!("telescope focus set to {target:8.5} mm"),
        Err(e) => log::warn!("focus did not converge ({e}); continuing at the default"),
    }
    ctx.focus_done = true;
    Ok(())
}

/// After an offset exposure: wait out its readout and absorb the measured
/// pointing offsets, keeping the previous values when the measurement is
/// missing or out of range.
async fn finish_offset_exposure(
    ctx: &mut SchedulerContext,
    _tel: &mut dyn Telescope,
    cam: &mut dyn Camera,
) {
    let Some(index) = ctx.prev_index else {
        return;
    };

    if let Err(e) = cam.wait_readout().await {
        log::warn!("bad readout of the offset exposure, retrying it: {e}");
        if let Ok(jd) = ctx.clock.now_jd() {
            ctx.fields[index].unrecord_last_visit(jd);
        }
        return;
    }

    match read_pointing_offsets(Path::new(TELESCOPE_OFFSETS_FILE)) {
        Some((ra, dec))
            if ra.abs() <= MAX_POINTING_OFFSET_DEG && dec.abs() <= MAX_POINTING_OFFSET_DEG =>
        {
            ctx.ra_offset_deg = ra;
            ctx.dec_offset_deg = dec;
            log::info!("telescope offsets set to {ra:8.6} {dec:8.6} deg");
        }
        Some((ra, dec)) => {
            log::warn!("measured offsets {ra:8.5} {dec:8.5} out of range, keeping previous values");
        }
        None => log::warn!("unable to read offsets, keeping previous values"),
    }
    ctx.offset_done = true;
}

/// Observe one field: slew, settle the previous readout, push the header,
/// and expose (splitting long west-side exposures).
async fn observe(
    ctx: &mut SchedulerContext,
    tel: &mut dyn Telescope,
    cam: &mut dyn Camera,
    index: usize,
) -> Result<()> {
    let kind = ctx.fields[index].kind;
    log::info!(
        "observing {} field {}, visit {}",
        kind.description(),
        ctx.fields[index].field_number,
        ctx.fields[index].n_done + 1
    );

    let mut status = if kind.skips_pointing() {
        None
    } else {
        Some(tel.update_status().await?)
    };
    let mut lst = status.as_ref().map(|s| s.lst).unwrap_or(ctx.night.lst_start);

    // kind-specific targets on the first visit; sky repeats pick up
    // pointing corrections instead
    let mut ha = 0.0;
    let mut ra_correction = 0.0;
    let mut dec_correction = 0.0;
    let mut ra_rate = 0.0;
    let mut dec_rate = 0.0;
    let mut num_exposures = 1usize;
    let mut exp_hours = ctx.fields[index].expt_hours;

    {
        let f = &mut ctx.fields[index];
        match kind {
            FieldKind::Focus | FieldKind::OffsetPointing => {
                if f.n_done == 0 {
                    ha = -1.0;
                    f.ra = normalize_ra(lst + 1.0);
                    f.dec = 0.0;
                    log::info!("pointing {} at {:12.6} {:12.5}", kind.description(), f.ra, f.dec);
                }
            }
            FieldKind::EveningFlat => {
                if f.n_done == 0 {
                    ha = -3.0;
                    f.ra = normalize_ra(lst + 3.0);
                    f.dec = 0.0;
                    log::info!("pointing {} at {:12.6} {:12.5}", kind.description(), f.ra, f.dec);
                }
            }
            FieldKind::MorningFlat => {
                if f.n_done == 0 {
                    ha = 4.0;
                    f.ra = normalize_ra(lst - 4.0);
                    f.dec = 0.0;
                    log::info!("pointing {} at {:12.6} {:12.5}", kind.description(), f.ra, f.dec);
                }
            }
            FieldKind::Sky => {
                ha = hour_angle(f.ra, lst);
                if f.n_done > 0 && ctx.config.pointing_corrections {
                    let ha0 = f.visits.first().map(|v| v.ha).unwrap_or(ha);
                    ra_correction = ra_pointing_correction(ha0, ha);
                    dec_correction = dec_pointing_correction(ha0, ha);
                }
                if ctx.config.tracking_corrections {
                    ra_rate = ra_rate_correction(ha, f.dec);
                    dec_rate = dec_rate_correction(ha, f.dec);
                }

                // long exposures west of the meridian accrue tracking
                // error; split them into equal sub-exposures
                if ha > 0.0 && f.expt_hours > LONG_EXPT_HOURS {
                    num_exposures = (f.expt_hours / LONG_EXPT_HOURS) as usize + 1;
                    exp_hours = f.expt_hours / num_exposures as f64;
                    f.n_required += num_exposures - 1;
                    if f.n_required > MAX_VISITS {
                        return Err(SchedulerError::OutOfRange {
                            what: "visits after exposure split",
                            value: f.n_required as f64,
                        });
                    }
                    log::info!(
                        "long exposure in the west: splitting into {num_exposures} x {:6.1} s",
                        exp_hours * 3600.0
                    );
                }
            }
            FieldKind::Dark | FieldKind::DomeFlat => {}
        }
    }

    if !kind.skips_pointing() {
        let (ra, dec) = pointing_target(ctx, index, ra_correction, dec_correction);
        log::debug!("pointing telescope to {ra:12.6} {dec:12.5}");
        tel.point(ra, dec, ra_rate, dec_rate).await?;
        ctx.stopped = false;
        status = Some(tel.update_status().await?);
        lst = status.as_ref().map(|s| s.lst).unwrap_or(lst);
    }

    // each focus exposure steps the focus along the plan
    if kind == FieldKind::Focus {
        let f = &ctx.fields[index];
        let plan = f.focus.ok_or(SchedulerError::FatalState(
            "focus field carries no focus plan".to_string(),
        ))?;
        let focus = plan.start_mm(f.n_required) + plan.increment_mm * f.n_done as f64;
        if !(MIN_FOCUS_MM..=MAX_FOCUS_MM).contains(&focus) {
            return Err(SchedulerError::OutOfRange { what: "focus setting", value: focus });
        }
        log::info!("setting focus to {focus:8.5} mm");
        tel.set_focus(focus).await?;
        status = Some(tel.update_status().await?);
    }

    // refresh the header with the pointing actually achieved
    if let Some(status) = &status {
        ctx.fits.update(fits::RA_KEYWORD, &format!("{:8.4}", status.ra))?;
        ctx.fits.update(fits::DEC_KEYWORD, &format!("{:8.4}", status.dec))?;
        ctx.fits.update(fits::LST_KEYWORD, &format!("{:8.4}", status.lst))?;
        ctx.fits.update(fits::FOCUS_KEYWORD, &format!("{:8.4}", status.focus_mm))?;
    }
    ctx.fits.update(fits::HA_KEYWORD, &format!("{ha:8.4}"))?;
    let filter = ctx.filter.clone();
    ctx.fits.update(fits::FILTERNAME_KEYWORD, &filter)?;
    let filter_id = if ctx.filter.contains("rgzz") || ctx.filter.contains("fake") { "4" } else { "0" };
    ctx.fits.update(fits::FILTERID_KEYWORD, filter_id)?;

    // settle the previous readout; a bad one rolls the previous field back
    // so the selector naturally reschedules it
    if let Err(e) = cam.wait_readout().await {
        log::warn!("bad readout before field {index}: {e}");
        if let Some(prev) = ctx.prev_index {
            if ctx.fields[prev].n_done > 0 {
                log::warn!("setting the last exposure of field {prev} to undone");
                let jd = ctx.clock.now_jd()?;
                ctx.fields[prev].unrecord_last_visit(jd);
                ctx.fields[prev].bad_read_count += 1;
                if ctx.fields[prev].bad_read_count > MAX_BAD_READOUTS {
                    log::warn!("too many bad readouts on field {prev}, dropping it");
                    ctx.fields[prev].doable = false;
                }
            }
        }
    }

    // clear the sensor after a long idle gap
    let ut_now = ctx.clock.now_ut()?;
    let stale = match ctx.ut_prev {
        Some(prev) => clock_difference(prev, ut_now) > CLEAR_INTERVAL_HOURS,
        None => true,
    };
    if stale {
        log::info!("clearing camera before exposure");
        for n in 0..NUM_CAMERA_CLEARS {
            log::debug!("clear {n}");
            cam.clear().await?;
        }
    }

    let mut bad_read_count = ctx.fields[index].bad_read_count;
    let mut n = 1;
    while n <= num_exposures {
        let date = ctx.clock.now_date()?;
        let jd = ctx.clock.now_jd()?;
        let ut = date.ut_hours();
        let filename = image_filename(&date, kind);

        push_exposure_header(ctx, cam, index, &filename).await?;

        let request = ExposeRequest {
            shutter_open: kind.shutter_open(),
            exp_time_sec: exp_hours * 3600.0,
            file_root: filename.clone(),
            mode: if ctx.first_exposure { ExposureMode::First } else { ExposureMode::Next },
            wait: ctx.config.wait_for_readout,
        };
        let actual_sec = cam.expose(&request).await?;
        ctx.first_exposure = false;
        ctx.ut_prev = Some(ctx.clock.now_ut()?);

        let f = &mut ctx.fields[index];
        let am = airmass(ha, f.dec, ctx.site.latitude_deg);
        f.record_visit(VisitRecord {
            ut,
            jd,
            lst,
            ha,
            airmass: am,
            actual_expt_hours: actual_sec / 3600.0,
            filename: filename.clone(),
        });
        log::info!(
            "UT {ut:10.6} JD {:12.6}: exposed field {} RA {:9.6} Dec {:9.5} n_done {} of {} ({})",
            jd - 2_450_000.0,
            f.field_number,
            f.ra,
            f.dec,
            f.n_done,
            f.n_required,
            kind.description()
        );
        ctx.logs.write_observation(
            &ctx.fields[index],
            exp_hours * 3600.0,
            ha,
            jd,
            actual_sec / 3600.0,
            &filename,
        )?;

        // between sub-exposures the readout must settle before re-exposing
        if n < num_exposures {
            if let Err(e) = cam.wait_readout().await {
                log::warn!("bad readout of sub-exposure {n}, repeating it: {e}");
                let jd = ctx.clock.now_jd()?;
                ctx.fields[index].unrecord_last_visit(jd);
                bad_read_count += 1;
                ctx.fields[index].bad_read_count = bad_read_count;
                if bad_read_count > MAX_BAD_READOUTS {
                    return Err(SchedulerError::Camera(format!(
                        "too many bad readouts on field {index}"
                    )));
                }
                continue;
            }
            let status = tel.update_status().await?;
            lst = status.lst;
            ha = hour_angle(ctx.fields[index].ra, lst);
        }
        n += 1;
    }
    ctx.fields[index].bad_read_count = 0;

    Ok(())
}

/// The simulated observation path: no telescope, no camera, time advances
/// by the exposure plus overhead.
async fn observe_simulated(ctx: &mut SchedulerContext, index: usize) -> Result<()> {
    let kind = ctx.fields[index].kind;
    let lst0 = crate::astro::time::local_sidereal_time(
        ctx.clock.now_jd()?,
        ctx.site.longitude_hours_west,
    );

    {
        let f = &mut ctx.fields[index];
        if f.n_done == 0 {
            match kind {
                FieldKind::Focus | FieldKind::OffsetPointing => {
                    f.ra = normalize_ra(lst0 + 1.0);
                    f.dec = 0.0;
                }
                FieldKind::EveningFlat => {
                    f.ra = normalize_ra(lst0 + 3.0);
                    f.dec = 0.0;
                }
                FieldKind::MorningFlat => {
                    f.ra = normalize_ra(lst0 - 4.0);
                    f.dec = 0.0;
                }
                _ => {}
            }
        }
    }

    let exp_hours = ctx.fields[index].expt_hours;
    let mut dt_hours = exp_hours + EXPOSURE_OVERHEAD_HOURS;
    if kind == FieldKind::Focus {
        dt_hours += FOCUS_OVERHEAD_HOURS;
    }

    let date = ctx.clock.now_date()?;
    let jd = ctx.clock.now_jd()?;
    let lst = crate::astro::time::local_sidereal_time(jd, ctx.site.longitude_hours_west);
    let ha = hour_angle(ctx.fields[index].ra, lst);
    let filename = image_filename(&date, kind);

    let f = &mut ctx.fields[index];
    let am = airmass(ha, f.dec, ctx.site.latitude_deg);
    f.record_visit(VisitRecord {
        ut: date.ut_hours(),
        jd,
        lst,
        ha,
        airmass: am,
        actual_expt_hours: exp_hours,
        filename: filename.clone(),
    });
    log::info!(
        "UT {:10.6} JD {:12.6}: exposed field {} RA {:9.6} Dec {:9.5} n_done {} of {} ({})",
        date.ut_hours(),
        jd - 2_450_000.0,
        f.field_number,
        f.ra,
        f.dec,
        f.n_done,
        f.n_required,
        kind.description()
    );
    ctx.logs.write_observation(
        &ctx.fields[index],
        exp_hours * 3600.0,
        ha,
        jd,
        exp_hours,
        &filename,
    )?;

    ctx.clock.advance_hours(dt_hours);
    ctx.ut_prev = Some(ctx.clock.now_ut()?);
    Ok(())
}

/// Where the telescope actually points for this visit: dithered for flats,
/// offset- and flexure-corrected for sky fields.
fn pointing_target(
    ctx: &SchedulerContext,
    index: usize,
    ra_correction_deg: f64,
    dec_correction_deg: f64,
) -> (f64, f64) {
    let f = &ctx.fields[index];
    match f.kind {
        FieldKind::EveningFlat | FieldKind::MorningFlat => {
            let (ra_dither, dec_dither) = dither_offset(f.n_done, FLAT_DITHER_STEP_DEG);
            log::debug!("dithering {} by {ra_dither:7.5} {dec_dither:7.5} deg", f.kind.description());
            (normalize_ra(f.ra + ra_dither / 15.0), f.dec + dec_dither)
        }
        FieldKind::Sky => {
            let mut ra = f.ra - (ctx.ra_offset_deg + ra_correction_deg) / 15.0;
            let mut dec = f.dec - ctx.dec_offset_deg - dec_correction_deg;
            if ctx.config.deep_dither && f.n_required == 6 {
                let (ra_dither, dec_dither) = dither_offset(f.n_done, DEEP_DITHER_STEP_DEG);
                ra = f.ra + ra_dither / 15.0;
                dec = f.dec + dec_dither;
            }
            (normalize_ra(ra), dec)
        }
        _ => (f.ra, f.dec),
    }
}

/// Push the per-exposure header words: sequence number, image type, file
/// stem, julian date, and the script comment.
async fn push_exposure_header(
    ctx: &mut SchedulerContext,
    cam: &mut dyn Camera,
    index: usize,
    filename: &str,
) -> Result<()> {
    let jd = ctx.clock.now_jd()?;
    let (sequence, imagetype, comment, fieldid) = {
        let f = &ctx.fields[index];
        let comment = match f.comment_tail() {
            Some(tail) => format!("'{}'", tail.trim()),
            None => "'no comment'".to_string(),
        };
        let fieldid = format!("{}", f.field_number);
        (format!("{}", f.n_done + 1), f.kind.description().to_string(), comment, fieldid)
    };

    ctx.fits.update(fits::SEQUENCE_KEYWORD, &sequence)?;
    ctx.fits.update(fits::IMAGETYPE_KEYWORD, &imagetype)?;
    ctx.fits.update(fits::FLATFILE_KEYWORD, filename)?;
    ctx.fits.update(fits::UJD_KEYWORD, &format!("{jd:14.6}"))?;
    ctx.fits.update(fits::COMMENT_KEYWORD, &comment)?;
    ctx.fits.update(fits::FIELDID_KEYWORD, &fieldid)?;

    cam.push_header(&ctx.fits).await
}

/// Stop the mount after an idle minute, re-polling the status first.
async fn do_stop(ctx: &mut SchedulerContext, tel: &mut dyn Telescope) {
    ctx.clock.sleep_secs(60.0).await;
    if let Err(e) = tel.update_status().await {
        log::warn!("do_stop: cannot update telescope status: {e}");
    }
    match tel.stop().await {
        Ok(()) => ctx.stopped = true,
        Err(e) => log::warn!("error stopping telescope: {e}"),
    }
}

/// Stow the mount. The controller usually self-stows before closing the
/// dome, so a failed reply still counts as stowed.
async fn do_stow(ctx: &mut SchedulerContext, tel: &mut dyn Telescope) {
    ctx.clock.sleep_secs(60.0).await;
    if let Err(e) = tel.stow().await {
        log::warn!("could not stow telescope: {e}");
    }
    ctx.stowed = true;
    ctx.stopped = true;
    if let Err(e) = tel.update_status().await {
        log::warn!("do_stow: cannot update telescope status: {e}");
    }
}

/// Image filename stem: `yyyymmddhhmmss` plus the kind code.
pub fn image_filename(date: &CalendarDate, kind: FieldKind) -> String {
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}{}",
        date.year,
        date.month,
        date.day,
        date.hour,
        date.minute,
        date.second as u32,
        kind.code()
    )
}

/// Median of the `best focus:` values in the focus-analysis output.
pub fn median_focus(path: &Path) -> Option<f64> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut values: Vec<f64> = content
        .lines()
        .filter_map(|line| {
            line.strip_prefix("best focus:")
                .or_else(|| line.split("best focus:").nth(1))
                .and_then(|rest| rest.split_whitespace().next())
                .and_then(|w| w.parse().ok())
        })
        .collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    Some(if n % 2 == 0 { (values[n / 2 - 1] + values[n / 2]) / 2.0 } else { values[n / 2] })
}

/// Read the measured pointing offsets: one line, two floats, degrees.
pub fn read_pointing_offsets(path: &Path) -> Option<(f64, f64)> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut words = content.split_whitespace();
    let ra = words.next()?.parse().ok()?;
    let dec = words.next()?.parse().ok()?;
    Some((ra, dec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::field::FieldKind;

    #[test]
    fn filename_stem_layout() {
        let date = CalendarDate::new(2007, 3, 5, 4, 30, 12.7);
        assert_eq!(image_filename(&date, FieldKind::Sky), "20070305043012Y");
        assert_eq!(image_filename(&date, FieldKind::Dark), "20070305043012N");
    }

    #[test]
    fn median_focus_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best_focus.dat");

        std::fs::write(&path, "best focus: 25.30\nbest focus: 25.20\nbest focus: 25.40\n")
            .unwrap();
        assert!((median_focus(&path).unwrap() - 25.30).abs() < 1e-12);

        std::fs::write(&path, "best focus: 25.30\nbest focus: 25.20\n").unwrap();
        assert!((median_focus(&path).unwrap() - 25.25).abs() < 1e-12);

        std::fs::write(&path, "nothing here\n").unwrap();
        assert!(median_focus(&path).is_none());
        assert!(median_focus(dir.path().join("missing").as_path()).is_none());
    }

    #[test]
    fn offsets_file_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telescope_offsets.dat");
        std::fs::write(&path, "0.0125 -0.0042\n").unwrap();
        let (ra, dec) = read_pointing_offsets(&path).unwrap();
        assert!((ra - 0.0125).abs() < 1e-12);
        assert!((dec + 0.0042).abs() < 1e-12);
        assert!(read_pointing_offsets(dir.path().join("missing").as_path()).is_none());
    }

    #[test]
    fn exposure_split_counts() {
        // 2 x LONG + epsilon splits into exactly 3
        let expt = 2.0 * LONG_EXPT_HOURS + 1e-6;
        let n = (expt / LONG_EXPT_HOURS) as usize + 1;
        assert_eq!(n, 3);

        // just under the limit leaves a single exposure
        let expt = LONG_EXPT_HOURS * 0.99;
        assert!(expt <= LONG_EXPT_HOURS);
    }
}
