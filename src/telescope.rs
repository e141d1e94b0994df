//! Telescope command channel.
//!
//! Line-oriented request/reply over a single TCP port. A reply starting
//! with `ok` is success, `error` is failure; a short delay is inserted
//! between successive commands. Focus changes follow a back-off rule to
//! take up backlash before any decrement.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

use crate::error::{Result, SchedulerError};
use crate::models::telescope::{TelescopeStatus, WeatherReadings};
use crate::parsing::sequence::{MAX_FOCUS_MM, MIN_FOCUS_MM};

pub const TELESCOPE_PORT: u16 = 3911;

pub const LST_COMMAND: &str = "lst";
pub const STATUS_COMMAND: &str = "status";
pub const DOMESTATUS_COMMAND: &str = "domestatus";
pub const WEATHER_COMMAND: &str = "weather";
pub const POSRD_COMMAND: &str = "posrd";
pub const TRACK_COMMAND: &str = "track";
pub const SET_TRACKING_COMMAND: &str = "settracking";
pub const STOW_COMMAND: &str = "stow";
pub const STOP_COMMAND: &str = "stop";
pub const SETFOCUS_COMMAND: &str = "setfocus";
pub const GETFOCUS_COMMAND: &str = "getfocus";
pub const FILTER_COMMAND: &str = "filter";

pub const DONE_REPLY: &str = "ok";
pub const ERROR_REPLY: &str = "error";

/// Timeouts, seconds.
const POINT_TIMEOUT_SEC: f64 = 300.0;
const FOCUS_TIMEOUT_SEC: f64 = 300.0;
const COMMAND_TIMEOUT_SEC: f64 = 300.0;

/// Delay between successive commands, milliseconds.
const COMMAND_DELAY_MS: u64 = 100;

/// Focus convergence rule: approach from below after backing off by the
/// maximum deviation, retry the setting, and verify the readback.
pub const MAX_FOCUS_DEVIATION_MM: f64 = 0.05;
pub const NUM_FOCUS_ITERATIONS: usize = 2;

/// Command seam to the telescope controller. The TCP client implements it
/// for operations; tests drive the observation loop with a scripted fake.
#[async_trait]
pub trait Telescope: Send {
    /// Poll dome state, LST, focus, pointing, and weather.
    async fn update_status(&mut self) -> Result<TelescopeStatus>;

    /// Slew to (ra hours, dec degrees) and track, optionally with tracking
    /// rate corrections in arcsec/hour.
    async fn point(&mut self, ra_hours: f64, dec_deg: f64, ra_rate: f64, dec_rate: f64)
        -> Result<()>;

    /// Stop tracking.
    async fn stop(&mut self) -> Result<()>;

    /// Stow the telescope.
    async fn stow(&mut self) -> Result<()>;

    /// Move the focus to `focus_mm`, honouring the back-off rule.
    async fn set_focus(&mut self, focus_mm: f64) -> Result<()>;

    /// Read the current focus, mm.
    async fn get_focus(&mut self) -> Result<f64>;
}

/// TCP client for the telescope controller.
pub struct TelescopeClient {
    host: String,
    port: u16,
}

impl TelescopeClient {
    pub fn new(host: impl Into<String>) -> TelescopeClient {
        TelescopeClient { host: host.into(), port: TELESCOPE_PORT }
    }

    pub fn with_port(mut self, port: u16) -> TelescopeClient {
        self.port = port;
        self
    }

    async fn command(&mut self, line: &str, timeout_sec: f64) -> Result<String> {
        let deadline = Duration::from_secs_f64(timeout_sec.max(1.0));
        log::trace!("telescope <- {line:?}");

        let run = async {
            let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await?;

            let mut reader = BufReader::new(stream);
            let mut reply = String::new();
            reader.read_line(&mut reply).await?;
            Ok::<String, std::io::Error>(reply.trim_end().to_string())
        };

        let reply = match timeout(deadline, run).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                return Err(SchedulerError::Network(format!(
                    "telescope command {line:?} failed: {e}"
                )))
            }
            Err(_) => {
                return Err(SchedulerError::Network(format!(
                    "telescope command {line:?} timed out after {timeout_sec:.0} s"
                )))
            }
        };

        sleep(Duration::from_millis(COMMAND_DELAY_MS)).await;

        if reply.is_empty() || reply.starts_with(ERROR_REPLY) {
            Err(SchedulerError::Network(format!("telescope command {line:?} returned: {reply}")))
        } else if reply.starts_with(DONE_REPLY) {
            log::trace!("telescope -> {reply:?}");
            Ok(reply)
        } else {
            Err(SchedulerError::Network(format!(
                "bad response from telescope to {line:?}: {reply}"
            )))
        }
    }

    /// Issue one focus command and read back the achieved value.
    async fn command_focus_once(&mut self, focus_mm: f64) -> Result<f64> {
        let line = format!("{SETFOCUS_COMMAND} {focus_mm:9.5}");
        self.command(&line, FOCUS_TIMEOUT_SEC).await?;
        self.get_focus().await
    }
}

/// Parse the weather reply: readings follow `:` separators in the order
/// temperature, humidity, wind speed, wind direction, dew point.
fn parse_weather(reply: &str) -> WeatherReadings {
    let mut values = reply.split(':').skip(1).map(|chunk| {
        chunk
            .split_whitespace()
            .next()
            .and_then(|w| w.parse::<f64>().ok())
            .unwrap_or(0.0)
    });
    WeatherReadings {
        temperature_c: values.next().unwrap_or(0.0),
        humidity_percent: values.next().unwrap_or(0.0),
        wind_speed: values.next().unwrap_or(0.0),
        wind_direction_deg: values.next().unwrap_or(0.0),
        dew_point_c: values.next().unwrap_or(0.0),
    }
}

fn second_word_f64(reply: &str) -> Option<f64> {
    reply.split_whitespace().nth(1).and_then(|w| w.parse().ok())
}

#[async_trait]
impl Telescope for TelescopeClient {
    async fn update_status(&mut self) -> Result<TelescopeStatus> {
        let mut status = TelescopeStatus {
            ut: crate::astro::time::CalendarDate::now().ut_hours(),
            ..TelescopeStatus::default()
        };

        let reply = self.command(DOMESTATUS_COMMAND, COMMAND_TIMEOUT_SEC).await?;
        status.dome_open = reply.contains("open");

        let reply = self.command(LST_COMMAND, COMMAND_TIMEOUT_SEC).await?;
        status.lst = second_word_f64(&reply)
            .ok_or_else(|| SchedulerError::Network(format!("bad lst reply: {reply}")))?;

        status.focus_mm = self.get_focus().await?;

        let reply = self.command(POSRD_COMMAND, COMMAND_TIMEOUT_SEC).await?;
        let mut words = reply.split_whitespace().skip(1);
        status.ra = words.next().and_then(|w| w.parse().ok()).unwrap_or(0.0);
        status.dec = words.next().and_then(|w| w.parse().ok()).unwrap_or(0.0);

        let reply = self.command(WEATHER_COMMAND, COMMAND_TIMEOUT_SEC).await?;
        status.weather = parse_weather(&reply);

        status.filter = "UNKNOWN".to_string();
        Ok(status)
    }

    async fn point(&mut self, ra_hours: f64, dec_deg: f64, ra_rate: f64, dec_rate: f64)
        -> Result<()> {
        let ra = if ra_hours > 24.0 { ra_hours - 24.0 } else { ra_hours };
        let line = format!("{TRACK_COMMAND} {ra:9.6} {dec_deg:9.5}");
        self.command(&line, POINT_TIMEOUT_SEC).await?;

        if ra_rate != 0.0 || dec_rate != 0.0 {
            let line = format!("{SET_TRACKING_COMMAND} {ra_rate:9.6} {dec_rate:9.6}");
            self.command(&line, POINT_TIMEOUT_SEC).await?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.command(STOP_COMMAND, POINT_TIMEOUT_SEC).await.map(|_| ())
    }

    async fn stow(&mut self) -> Result<()> {
        self.command(STOW_COMMAND, POINT_TIMEOUT_SEC).await.map(|_| ())
    }

    async fn set_focus(&mut self, focus_mm: f64) -> Result<()> {
        if focus_mm < MIN_FOCUS_MM || focus_mm > MAX_FOCUS_MM - MAX_FOCUS_DEVIATION_MM {
            return Err(SchedulerError::OutOfRange { what: "focus setting", value: focus_mm });
        }

        let current = self.get_focus().await?;
        log::debug!("set_focus: current {current:8.5} mm, target {focus_mm:8.5} mm");

        // back off past the target before any decrement, to take up backlash
        if focus_mm < current {
            let overshoot = current + MAX_FOCUS_DEVIATION_MM;
            log::debug!("set_focus: advancing to {overshoot:8.5} mm before decrement");
            self.command_focus_once(overshoot).await?;
        }

        let mut achieved = current;
        for _ in 0..NUM_FOCUS_ITERATIONS {
            achieved = self.command_focus_once(focus_mm).await?;
        }

        if (achieved - focus_mm).abs() > MAX_FOCUS_DEVIATION_MM {
            return Err(SchedulerError::Focus { target: focus_mm, achieved });
        }
        Ok(())
    }

    async fn get_focus(&mut self) -> Result<f64> {
        let reply = self.command(GETFOCUS_COMMAND, COMMAND_TIMEOUT_SEC).await?;
        second_word_f64(&reply)
            .ok_or_else(|| SchedulerError::Network(format!("bad focus reply: {reply}")))
    }
}
