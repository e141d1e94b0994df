//! Shared fakes and builders for the observation-loop tests.

use std::path::PathBuf;

use async_trait::async_trait;

use survey_scheduler::astro::time::CalendarDate;
use survey_scheduler::camera::{Camera, ExposeRequest};
use survey_scheduler::context::{Clock, SchedulerConfig, SchedulerContext};
use survey_scheduler::error::{Result, SchedulerError};
use survey_scheduler::fits::FitsHeader;
use survey_scheduler::journal::Journal;
use survey_scheduler::logs::SurveyLogs;
use survey_scheduler::models::camera::{CameraStatus, ControllerFlag};
use survey_scheduler::models::field::Field;
use survey_scheduler::models::site::Site;
use survey_scheduler::models::telescope::TelescopeStatus;
use survey_scheduler::night::{NightContext, TwilightChoice};
use survey_scheduler::signals::SignalFlags;
use survey_scheduler::telescope::Telescope;

/// A telescope that accepts everything and reports an open dome.
#[derive(Debug, Default)]
pub struct FakeTelescope {
    pub lst: f64,
    pub focus_mm: f64,
    pub dome_open: bool,
    pub pointings: Vec<(f64, f64)>,
    pub stops: usize,
    pub stows: usize,
}

impl FakeTelescope {
    pub fn open() -> FakeTelescope {
        FakeTelescope { dome_open: true, focus_mm: 25.30, ..Default::default() }
    }
}

#[async_trait]
impl Telescope for FakeTelescope {
    async fn update_status(&mut self) -> Result<TelescopeStatus> {
        Ok(TelescopeStatus {
            lst: self.lst,
            focus_mm: self.focus_mm,
            dome_open: self.dome_open,
            filter: "rgzz".to_string(),
            ..Default::default()
        })
    }

    async fn point(&mut self, ra_hours: f64, dec_deg: f64, _ra_rate: f64, _dec_rate: f64)
        -> Result<()> {
        self.pointings.push((ra_hours, dec_deg));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.stops += 1;
        Ok(())
    }

    async fn stow(&mut self) -> Result<()> {
        self.stows += 1;
        Ok(())
    }

    async fn set_focus(&mut self, focus_mm: f64) -> Result<()> {
        self.focus_mm = focus_mm;
        Ok(())
    }

    async fn get_focus(&mut self) -> Result<f64> {
        Ok(self.focus_mm)
    }
}

/// A camera that exposes instantly. Readouts listed in `bad_readouts`
/// (1-based exposure numbers) report bad when their readout is awaited.
#[derive(Debug, Default)]
pub struct FakeCamera {
    pub exposures: Vec<ExposeRequest>,
    pub clears: usize,
    pub headers_pushed: usize,
    pub bad_readouts: Vec<usize>,
    pub pending: Option<usize>,
}

#[async_trait]
impl Camera for FakeCamera {
    async fn update_status(&mut self) -> Result<CameraStatus> {
        let mut status = CameraStatus { ready: true, ..CameraStatus::default() };
        for flag in ControllerFlag::ALL {
            status.flags[flag as usize] = 0;
        }
        Ok(status)
    }

    async fn set_header(&mut self, _keyword: &str, _value: &str) -> Result<()> {
        self.headers_pushed += 1;
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        self.clears += 1;
        Ok(())
    }

    async fn expose(&mut self, request: &ExposeRequest) -> Result<f64> {
        self.exposures.push(request.clone());
        self.pending = Some(self.exposures.len());
        Ok(request.exp_time_sec)
    }

    async fn wait_readout(&mut self) -> Result<()> {
        match self.pending.take() {
            Some(n) if self.bad_readouts.contains(&n) => {
                Err(SchedulerError::Camera(format!("bad readout of exposure {n}")))
            }
            _ => Ok(()),
        }
    }

    fn readout_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// A context for the sentinel site on 2007 Mar 5, with the clock parked at
/// sunset and logs/journal in a fresh temporary directory. The directory
/// guard is returned so the files outlive the test body.
pub fn test_context(fields: Vec<Field>, simulation: bool) -> (SchedulerContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let site = Site::default_site();
    let date = CalendarDate::at_midnight(2007, 3, 5);
    let night = NightContext::init(date, &site, TwilightChoice::TwelveDegree).unwrap();
    let journal = Journal::open(dir.path().join("scheduler.bin")).unwrap();
    let logs = SurveyLogs::open_in(dir.path()).unwrap();
    let clock = Clock::Simulated { jd: night.times.jd_sunset };

    let ctx = SchedulerContext {
        site,
        night,
        fields,
        fits: FitsHeader::standard(),
        flags: SignalFlags::new(),
        journal,
        logs,
        clock,
        config: SchedulerConfig::default(),
        filter: "rgzz".to_string(),
        sequence_path: PathBuf::from(dir.path().join("sequence.txt")),
        sidecar_lines_seen: 0,
        weather: None,
        simulation,
        prev_index: None,
        first_exposure: true,
        focus_done: false,
        offset_done: false,
        stopped: true,
        stowed: true,
        ut_prev: None,
        ra_offset_deg: 0.0,
        dec_offset_deg: 0.0,
        focus_default_mm: 25.30,
    };
    (ctx, dir)
}
