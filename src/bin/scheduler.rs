//! Nightly survey scheduler.
//!
//! ```text
//! scheduler <sequence_file> <yyyy> <mo> <d> <verbose_level> [<weather_file>]
//! ```
//!
//! The date names the local evening of the night to schedule. Verbose is
//! 0, 1, or 2. A weather file switches the run to simulation: time advances
//! by exposure durations and loop ticks, and the command channels are
//! never touched. Exit code 0 on a normal night, 1 after a terminate
//! signal, -1 on a fatal startup error.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};

use survey_scheduler::astro::time::{date_to_jd, CalendarDate};
use survey_scheduler::camera::CameraClient;
use survey_scheduler::context::{Clock, SchedulerConfig, SchedulerContext};
use survey_scheduler::executor::run_night;
use survey_scheduler::fits::FitsHeader;
use survey_scheduler::journal::{Journal, JOURNAL_FILE};
use survey_scheduler::logs::SurveyLogs;
use survey_scheduler::models::site::Site;
use survey_scheduler::night::NightContext;
use survey_scheduler::parsing::sequence::load_sequence;
use survey_scheduler::parsing::weather::WeatherLog;
use survey_scheduler::signals::{install_signal_handlers, SignalFlags};
use survey_scheduler::telescope::TelescopeClient;

struct Args {
    sequence_file: PathBuf,
    year: i32,
    month: u32,
    day: u32,
    verbose: u8,
    weather_file: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 6 && args.len() != 7 {
        anyhow::bail!(
            "syntax: scheduler sequence_file yyyy mm dd verbose_level [weather_file]"
        );
    }
    Ok(Args {
        sequence_file: PathBuf::from(&args[1]),
        year: args[2].parse().context("bad year")?,
        month: args[3].parse().context("bad month")?,
        day: args[4].parse().context("bad day")?,
        verbose: args[5].parse().context("bad verbose level")?,
        weather_file: args.get(6).map(PathBuf::from),
    })
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();
}

async fn run(args: Args) -> Result<bool> {
    let site = Site::from_env().context("loading site record")?;
    log::info!(
        "site {}: longitude {:10.6} h W, latitude {:10.6}",
        site.name,
        site.longitude_hours_west,
        site.latitude_deg
    );

    let date = CalendarDate::at_midnight(args.year, args.month, args.day);
    let config = SchedulerConfig::default();
    let night = NightContext::init(date, &site, config.twilight).context("building night context")?;
    log::info!(
        "night: ut start {:9.5}  ut end {:9.5}  moon fraction {:5.2}",
        night.ut_start,
        night.ut_end,
        night.times.percent_moon
    );

    let flags = SignalFlags::new();
    install_signal_handlers(&flags).context("installing signal handlers")?;

    // an existing journal resumes the night; otherwise parse the script
    let mut journal = Journal::open(JOURNAL_FILE).context("opening recovery journal")?;
    let mut filter = "none".to_string();
    let (fields, sidecar_lines_seen) = match journal.load().context("reading recovery journal")? {
        Some(fields) => {
            log::info!("continuing observation of {} fields from the journal", fields.len());
            (fields, 0)
        }
        None => {
            let load = load_sequence(&args.sequence_file, 0, 0)
                .with_context(|| format!("loading script {}", args.sequence_file.display()))?;
            if load.fields.is_empty() {
                anyhow::bail!("no usable fields in {}", args.sequence_file.display());
            }
            log::info!("{} fields loaded from the script", load.fields.len());
            if let Some(f) = load.filter {
                filter = f;
            }
            (load.fields, 0)
        }
    };

    let focus_default_mm = fields
        .iter()
        .find_map(|f| f.focus)
        .map(|plan| plan.default_mm)
        .unwrap_or(25.30);

    let weather = match &args.weather_file {
        Some(path) => Some(
            WeatherLog::load(path)
                .with_context(|| format!("loading weather file {}", path.display()))?,
        ),
        None => None,
    };
    let simulated = weather.is_some();

    let clock = if simulated {
        Clock::Simulated { jd: date_to_jd(date).context("start date outside JD limits")? }
    } else {
        Clock::Real
    };

    let logs = SurveyLogs::open_in(std::path::Path::new(".")).context("opening log files")?;

    let camera_host = std::env::var("CAMERA_HOST").unwrap_or_else(|_| {
        hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_default()
    });

    let mut ctx = SchedulerContext {
        site,
        night,
        fields,
        fits: FitsHeader::standard(),
        flags: flags.clone(),
        journal,
        logs,
        clock,
        config,
        filter,
        sequence_path: args.sequence_file,
        sidecar_lines_seen,
        weather,
        simulation: simulated,
        prev_index: None,
        first_exposure: true,
        focus_done: false,
        offset_done: false,
        stopped: true,
        stowed: true,
        ut_prev: None,
        ra_offset_deg: 0.0,
        dec_offset_deg: 0.0,
        focus_default_mm,
    };

    let mut telescope = TelescopeClient::new(camera_host.clone());
    let mut camera = CameraClient::new(camera_host);

    let summary = run_night(&mut ctx, &mut telescope, &mut camera)
        .await
        .context("observation loop failed")?;

    log::info!(
        "night complete: {}/{} fields finished",
        summary.fields_completed,
        summary.fields_loaded
    );
    Ok(flags.terminated())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(255);
        }
    };
    init_logging(args.verbose);

    match run(args).await {
        Ok(terminated) => {
            if terminated {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(255)
        }
    }
}
