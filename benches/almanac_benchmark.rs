use criterion::{black_box, criterion_group, criterion_main, Criterion};

use survey_scheduler::astro::almanac::tonight;
use survey_scheduler::astro::coords::{airmass, galactic, precess};
use survey_scheduler::astro::time::{date_to_jd, jd_to_date, CalendarDate};
use survey_scheduler::models::site::Site;

fn bench_jd_conversions(c: &mut Criterion) {
    let date = CalendarDate::new(2007, 3, 5, 4, 30, 12.0);
    c.bench_function("date_to_jd", |b| b.iter(|| date_to_jd(black_box(date)).unwrap()));

    let jd = date_to_jd(date).unwrap();
    c.bench_function("jd_to_date", |b| b.iter(|| jd_to_date(black_box(jd)).unwrap()));
}

fn bench_geometry(c: &mut Criterion) {
    c.bench_function("airmass", |b| {
        b.iter(|| airmass(black_box(2.5), black_box(-12.0), black_box(31.9533)))
    });
    c.bench_function("precess", |b| {
        b.iter(|| precess(black_box(6.75), black_box(-16.72), 2000.0, 1950.0))
    });
    c.bench_function("galactic", |b| {
        b.iter(|| galactic(black_box(17.7611), black_box(-29.008), 2000.0))
    });
}

fn bench_tonight(c: &mut Criterion) {
    let site = Site::default_site();
    let date = CalendarDate::at_midnight(2007, 3, 5);
    c.bench_function("tonight", |b| b.iter(|| tonight(black_box(date), &site).unwrap()));
}

criterion_group!(benches, bench_jd_conversions, bench_geometry, bench_tonight);
criterion_main!(benches);
