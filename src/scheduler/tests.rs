use super::*;
use crate::astro::time::CalendarDate;
use crate::models::field::{Field, FieldKind, FieldStatus, SelectionCode, SurveyClass, VisitRecord};
use crate::night::{NightContext, TwilightChoice};
use crate::models::site::Site;

const JD0: f64 = 2_454_165.5;

fn sky(ra: f64, dec: f64, interval_hours: f64, n_required: usize, survey: SurveyClass) -> Field {
    let mut f = Field::new(
        0,
        1,
        format!("{ra} {dec} Y 60 {} {n_required} 0", interval_hours * 3600.0),
        ra,
        dec,
        FieldKind::Sky,
        60.0 / 3600.0,
        interval_hours,
        n_required,
        survey,
    );
    f.doable = true;
    f.jd_rise = Some(JD0);
    f.jd_set = Some(JD0 + 8.0 / 24.0);
    f.jd_next = Some(JD0);
    f
}

fn dark() -> Field {
    let mut f = Field::new(
        0,
        1,
        "0.0 0.0 N 60 9600 3 0".into(),
        0.0,
        0.0,
        FieldKind::Dark,
        60.0 / 3600.0,
        9600.0 / 3600.0,
        3,
        SurveyClass::None,
    );
    f.doable = true;
    f.jd_rise = Some(JD0);
    f.jd_set = Some(JD0 + 12.0 / 24.0);
    f.jd_next = Some(JD0);
    f
}

fn night() -> NightContext {
    NightContext::init(
        CalendarDate::at_midnight(2007, 3, 5),
        &Site::default_site(),
        TwilightChoice::TwelveDegree,
    )
    .unwrap()
}

#[test]
fn completed_field_flips_doable() {
    let mut f = sky(3.5, 10.0, 1.0, 2, SurveyClass::None);
    f.n_done = 2;
    assert_eq!(update_field_status(&mut f, JD0 + 0.01, false), FieldStatus::NotDoable);
    assert!(!f.doable);
}

#[test]
fn not_risen_and_already_set() {
    let mut f = sky(3.5, 10.0, 1.0, 2, SurveyClass::None);
    assert_eq!(update_field_status(&mut f, JD0 - 0.01, false), FieldStatus::NotDoable);
    assert!(f.doable, "not-risen must not clear doable");

    assert_eq!(update_field_status(&mut f, JD0 + 9.0 / 24.0, false), FieldStatus::NotDoable);
    assert!(!f.doable, "past jd_set clears doable");
}

#[test]
fn ready_exactly_at_rise() {
    let mut f = sky(3.5, 10.0, 1.0, 2, SurveyClass::None);
    assert_eq!(update_field_status(&mut f, JD0, false), FieldStatus::Ready);
}

#[test]
fn waiting_for_next_visit() {
    let mut f = sky(3.5, 10.0, 1.0, 3, SurveyClass::None);
    f.n_done = 1;
    f.jd_next = Some(JD0 + 2.0 / 24.0);
    assert_eq!(update_field_status(&mut f, JD0 + 0.5 / 24.0, false), FieldStatus::NotDoable);
    assert!(f.doable);
    // close enough to the next slot
    assert_eq!(
        update_field_status(&mut f, JD0 + 2.0 / 24.0 - 0.01 / 24.0, false),
        FieldStatus::Ready
    );
}

#[test]
fn dark_is_do_now_even_in_bad_weather() {
    let mut f = dark();
    assert_eq!(update_field_status(&mut f, JD0 + 0.01, true), FieldStatus::DoNow);
}

#[test]
fn flats_respect_weather() {
    let mut f = dark();
    f.kind = FieldKind::EveningFlat;
    assert_eq!(update_field_status(&mut f, JD0 + 0.01, true), FieldStatus::NotDoable);
    assert_eq!(update_field_status(&mut f, JD0 + 0.01, false), FieldStatus::DoNow);
}

#[test]
fn too_late_when_time_runs_out() {
    // 3 visits at 3-hour intervals against an 8-hour window
    let mut f = sky(3.5, 10.0, 3.0, 3, SurveyClass::None);
    assert_eq!(update_field_status(&mut f, JD0, false), FieldStatus::TooLate);
    assert!(f.time_left < 0.0);
    assert!(f.doable, "too-late fields stay doable");
}

#[test]
fn status_update_is_idempotent() {
    let jd = JD0 + 0.02;
    for field in [
        sky(3.5, 10.0, 1.0, 3, SurveyClass::None),
        sky(3.5, 10.0, 3.0, 3, SurveyClass::None),
        dark(),
    ] {
        let mut f = field;
        let first = update_field_status(&mut f, jd, false);
        let after = f.clone();
        let second = update_field_status(&mut f, jd, false);
        assert_eq!(first, second);
        assert_eq!(after, f);
    }
}

#[test]
fn do_now_dark_selected_over_ready_sky() {
    let mut fields = vec![sky(3.5, 10.0, 1.0, 3, SurveyClass::None), dark()];
    fields[1].field_number = 1;
    let i = select_next(&mut fields, None, JD0 + 0.01, false).unwrap();
    assert_eq!(i, 1);
    assert_eq!(fields[1].selection_code, SelectionCode::FirstDoNowDark);
}

#[test]
fn ready_must_do_takes_the_top_tier() {
    let mut fields = vec![dark(), sky(3.5, 10.0, 1.0, 3, SurveyClass::MustDo)];
    fields[1].field_number = 1;
    let i = select_next(&mut fields, None, JD0 + 0.01, false).unwrap();
    assert_eq!(i, 1);
    assert_eq!(fields[1].selection_code, SelectionCode::LeastTimeReadyMustDo);
}

#[test]
fn late_must_do_shortens_interval() {
    // interval 1 h, 3 visits, only 1.5 h of window left
    let mut f = sky(18.0, 0.0, 1.0, 3, SurveyClass::MustDo);
    f.jd_set = Some(JD0 + 1.5 / 24.0);
    let mut fields = vec![f];
    let i = select_next(&mut fields, None, JD0, false).unwrap();
    assert_eq!(i, 0);
    assert_eq!(fields[0].selection_code, SelectionCode::LeastTimeLateMustDo);
    assert_eq!(fields[0].status, FieldStatus::Ready);
    // new interval = time_up / n_left = 1.5 / 3 = 0.5 h
    assert!((fields[0].interval_hours - 0.5).abs() < 1e-9);
}

#[test]
fn shortening_refused_below_minimum_interval() {
    // 0.5 h of window for 3 visits: 0.1 h each, below the 0.25 h floor
    let mut f = sky(18.0, 0.0, 1.0, 3, SurveyClass::MustDo);
    f.jd_set = Some(JD0 + 0.5 / 24.0);
    let mut fields = vec![f];
    assert_eq!(select_next(&mut fields, None, JD0, false), None);
    assert!(!fields[0].doable);
}

#[test]
fn paired_field_follows_its_mate() {
    let dec: f64 = 10.0;
    let step = 0.5 / 15.0 / (dec.to_radians()).cos();
    let mut fields = vec![
        sky(3.5, dec, 1.0, 3, SurveyClass::None),
        sky(3.5 + step, dec, 1.0, 3, SurveyClass::None),
        // a decoy with far less time left
        sky(3.5, 20.0, 1.0, 3, SurveyClass::None),
    ];
    fields[1].field_number = 1;
    fields[2].field_number = 2;
    fields[2].jd_set = Some(JD0 + 3.2 / 24.0);

    assert!(paired_fields(&fields[0], &fields[1]));
    let i = select_next(&mut fields, Some(0), JD0 + 0.01, false).unwrap();
    assert_eq!(i, 1);
    assert_eq!(fields[1].selection_code, SelectionCode::FirstReadyPair);
}

#[test]
fn unpaired_neighbors_do_not_jump_the_queue() {
    let mut fields = vec![
        sky(3.5, 10.0, 1.0, 3, SurveyClass::None),
        sky(9.0, 10.0, 1.0, 3, SurveyClass::None),
    ];
    fields[1].field_number = 1;
    assert!(!paired_fields(&fields[0], &fields[1]));
    let i = select_next(&mut fields, Some(0), JD0 + 0.01, false).unwrap();
    // least-time tier picks by time_left, not adjacency; both equal here so
    // the lower index wins
    assert_eq!(i, 0);
}

#[test]
fn least_time_ready_breaks_ties_by_visits_remaining() {
    let mut a = sky(3.5, 10.0, 1.0, 3, SurveyClass::None);
    a.n_done = 0;
    let mut b = sky(3.5, 10.0, 1.0, 3, SurveyClass::None);
    b.field_number = 1;
    b.n_done = 1;
    // give b one fewer visit remaining but identical time_left
    b.jd_set = Some(JD0 + 7.0 / 24.0);
    let mut fields = vec![a, b];
    update_field_status(&mut fields[0], JD0, false);
    update_field_status(&mut fields[1], JD0, false);
    assert!((fields[0].time_left - fields[1].time_left).abs() < 1e-9);

    let i = select_next(&mut fields, None, JD0, false).unwrap();
    assert_eq!(i, 1);
}

#[test]
fn nothing_ready_returns_none() {
    let mut fields = vec![sky(3.5, 10.0, 1.0, 3, SurveyClass::None)];
    fields[0].jd_rise = Some(JD0 + 1.0);
    fields[0].jd_set = Some(JD0 + 1.2);
    assert_eq!(select_next(&mut fields, None, JD0, false), None);
}

#[test]
fn moon_veto_within_separation() {
    let mut nc = night();
    nc.times.percent_moon = 0.9;
    nc.times.ra_moon = 6.0;
    nc.times.dec_moon = 10.0;

    let close = sky(6.2, 12.0, 1.0, 3, SurveyClass::None);
    let far = sky(12.0, -20.0, 1.0, 3, SurveyClass::None);
    assert!(moon_interference(&close, &nc));
    assert!(!moon_interference(&far, &nc));

    // a faint moon vetoes nothing
    nc.times.percent_moon = 0.3;
    assert!(!moon_interference(&close, &nc));
}

#[test]
fn init_fields_moon_veto_is_permanent_for_the_night() {
    let mut nc = night();
    nc.times.percent_moon = 0.9;
    // place the moon on the meridian at window start
    nc.times.ra_moon = nc.lst_start;
    nc.times.dec_moon = 10.0;

    let site = Site::default_site();
    let mut fields =
        vec![sky(nc.lst_start, 10.0, 1.0, 3, SurveyClass::None)];
    fields[0].jd_rise = None;
    fields[0].jd_set = None;
    fields[0].jd_next = None;
    fields[0].doable = false;

    let n = init_fields(&mut fields, &nc, &site, nc.jd_start);
    assert_eq!(n, 0);
    assert!(!fields[0].doable);
    assert_eq!(update_field_status(&mut fields[0], nc.jd_start, false), FieldStatus::NotDoable);
}

#[test]
fn init_fields_windows_for_each_kind() {
    let nc = night();
    let site = Site::default_site();

    let mut dark_field = dark();
    dark_field.jd_rise = None;
    dark_field.jd_set = None;
    dark_field.jd_next = None;

    let mut evening = dark();
    evening.kind = FieldKind::EveningFlat;
    evening.field_number = 1;
    evening.jd_next = None;

    let mut morning = dark();
    morning.kind = FieldKind::MorningFlat;
    morning.field_number = 2;
    morning.jd_next = None;

    // a field transiting mid-window
    let lst_mid = crate::astro::time::local_sidereal_time(
        (nc.jd_start + nc.jd_end) / 2.0,
        site.longitude_hours_west,
    );
    let mut up = sky(lst_mid, 10.0, 1.0, 3, SurveyClass::None);
    up.field_number = 3;
    up.jd_rise = None;
    up.jd_set = None;
    up.jd_next = None;

    let mut fields = vec![dark_field, evening, morning, up];
    let jd_now = nc.times.jd_sunset + 0.01;
    let n = init_fields(&mut fields, &nc, &site, jd_now);
    assert_eq!(n, 4);

    assert_eq!(fields[0].jd_set, Some(nc.times.jd_sunrise));
    assert_eq!(fields[1].jd_set, Some(nc.jd_start));
    assert!(fields[1].jd_rise.unwrap() >= nc.times.jd_sunset);
    assert_eq!(fields[2].jd_rise, Some(nc.jd_end));
    assert!(fields[2].jd_set.unwrap() < nc.times.jd_sunrise);

    let rise = fields[3].jd_rise.unwrap();
    let set = fields[3].jd_set.unwrap();
    assert!(rise >= nc.jd_start && set <= nc.jd_end && rise < set);
    // transiting field is up for a healthy slice of the window
    assert!((set - rise) * 24.0 > 4.0);
}

#[test]
fn rise_and_set_respect_hour_angle_limit() {
    let nc = night();
    let site = Site::default_site();
    let lst_mid = crate::astro::time::local_sidereal_time(
        (nc.jd_start + nc.jd_end) / 2.0,
        site.longitude_hours_west,
    );

    // overhead all night
    let rise = rise_time(lst_mid, site.latitude_deg, MAX_AIRMASS, MAX_HOUR_ANGLE, &nc, &site);
    assert!(rise.is_some());

    // twelve hours away never rises
    let anti = (lst_mid + 12.0) % 24.0;
    assert!(rise_time(anti, -10.0, MAX_AIRMASS, MAX_HOUR_ANGLE, &nc, &site).is_none());
    assert!(set_time(anti, -10.0, MAX_AIRMASS, MAX_HOUR_ANGLE, &nc, &site).is_none());
}

#[test]
fn visits_recorded_in_order() {
    let mut f = sky(3.5, 10.0, 1.0, 3, SurveyClass::None);
    for n in 0..3 {
        f.record_visit(VisitRecord {
            jd: JD0 + n as f64 * 0.05,
            ut: 1.0,
            lst: 2.0,
            ha: 0.0,
            airmass: 1.2,
            actual_expt_hours: 60.0 / 3600.0,
            filename: format!("2007030500000{n}Y"),
        });
    }
    assert!(f.is_complete());
    assert_eq!(f.visits.len(), 3);
    assert!(f.visits.windows(2).all(|w| w[0].jd < w[1].jd));
}
