//! Camera command channel.
//!
//! Two TCP ports on the camera-controller host carry the line protocol:
//! one for commands, one for status polls, so status stays readable while
//! a long exposure command is outstanding. Each command opens a fresh
//! connection, writes one line, and reads one reply line under an explicit
//! deadline.
//!
//! An exposure issued with `wait = false` runs in a worker task so the
//! telescope can reposition during readout. The worker takes a start token
//! from a bounded channel, sends the expose command, and delivers the
//! reply through a capacity-one done channel; `wait_readout` consumes the
//! done token (with a readout-derived deadline) before the next exposure.

pub mod protocol;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration, Instant};

use crate::error::{Result, SchedulerError};
use crate::fits::FitsHeader;
use crate::models::camera::CameraStatus;
pub use protocol::ExposureMode;
use protocol::*;

/// Abort a field after this many consecutive bad readouts.
pub const MAX_BAD_READOUTS: usize = 3;

/// One exposure request.
#[derive(Debug, Clone)]
pub struct ExposeRequest {
    pub shutter_open: bool,
    pub exp_time_sec: f64,
    pub file_root: String,
    pub mode: ExposureMode,
    /// When false, the command runs in a worker task and the call returns
    /// once the exposure time has elapsed, leaving the readout pending.
    pub wait: bool,
}

/// Command seam to the camera. The TCP client implements it for
/// operations; tests drive the observation loop with a scripted fake.
#[async_trait]
pub trait Camera: Send {
    /// Poll the status channel.
    async fn update_status(&mut self) -> Result<CameraStatus>;

    /// Add one keyword/value to the image header kept by the controller.
    async fn set_header(&mut self, keyword: &str, value: &str) -> Result<()>;

    /// Clear the sensor once.
    async fn clear(&mut self) -> Result<()>;

    /// Start an exposure. Returns the actual exposure seconds.
    async fn expose(&mut self, request: &ExposeRequest) -> Result<f64>;

    /// Wait for the pending readout (if any) to complete. An `Err` means a
    /// bad readout: the caller rolls back the previous visit.
    async fn wait_readout(&mut self) -> Result<()>;

    /// True while an exposure's readout has not yet been confirmed good.
    fn readout_pending(&self) -> bool {
        false
    }

    /// Push the whole FITS buffer, one word at a time.
    async fn push_header(&mut self, header: &FitsHeader) -> Result<()> {
        for (keyword, value) in header.iter() {
            self.set_header(keyword, value).await?;
        }
        Ok(())
    }
}

/// TCP client for the camera controller.
pub struct CameraClient {
    host: String,
    command_port: u16,
    status_port: u16,
    /// False when the controller was not configured with a status socket;
    /// exposure completion is then inferred from elapsed time.
    status_channel_active: bool,
    command_id: u64,
    pending_readout: Option<mpsc::Receiver<Result<String>>>,
}

impl CameraClient {
    pub fn new(host: impl Into<String>) -> CameraClient {
        CameraClient {
            host: host.into(),
            command_port: COMMAND_PORT,
            status_port: STATUS_PORT,
            status_channel_active: true,
            command_id: 0,
            pending_readout: None,
        }
    }

    pub fn with_ports(mut self, command_port: u16, status_port: u16) -> CameraClient {
        self.command_port = command_port;
        self.status_port = status_port;
        self
    }

    pub fn without_status_channel(mut self) -> CameraClient {
        self.status_channel_active = false;
        self
    }

    fn next_id(&mut self) -> u64 {
        self.command_id += 1;
        self.command_id
    }

    async fn command(&mut self, line: &str, timeout_sec: f64) -> Result<String> {
        let id = self.next_id();
        let reply =
            send_command(&self.host, self.command_port, line, timeout_sec, id).await?;
        if reply_ok(&reply) {
            Ok(reply)
        } else {
            Err(SchedulerError::Camera(format!("command {line:?} returned: {reply}")))
        }
    }

    /// Sleep out the exposure, then poll the status channel until every
    /// controller drops the `Exposing` state. Returns the actual exposure
    /// seconds.
    async fn wait_exposure_end(&mut self, exp_time_sec: f64) -> Result<f64> {
        sleep(Duration::from_secs_f64(exp_time_sec.max(0.0))).await;

        if !self.status_channel_active {
            return Ok(exp_time_sec);
        }

        let deadline = Instant::now() + Duration::from_secs_f64(exp_time_sec.max(1.0) + 5.0);
        loop {
            let status = self.update_status().await?;
            if status.error {
                return Err(SchedulerError::Camera(format!(
                    "camera error while exposing: {}",
                    status.comment
                )));
            }
            if status.exposure_finished() {
                return Ok(exp_time_sec);
            }
            if Instant::now() >= deadline {
                return Err(SchedulerError::Camera(
                    "timeout waiting for exposure to end".to_string(),
                ));
            }
            sleep(Duration::from_millis(100)).await;
        }
    }
}

#[async_trait]
impl Camera for CameraClient {
    async fn update_status(&mut self) -> Result<CameraStatus> {
        let id = self.next_id();
        let reply =
            send_command(&self.host, self.status_port, STATUS_COMMAND, CAMERA_TIMEOUT_SEC, id)
                .await?;
        if !reply_ok(&reply) {
            return Err(SchedulerError::Camera(format!("status poll returned: {reply}")));
        }
        Ok(parse_status(&reply))
    }

    async fn set_header(&mut self, keyword: &str, value: &str) -> Result<()> {
        let line = format!("{HEADER_COMMAND} {keyword} {value}");
        self.command(&line, CAMERA_TIMEOUT_SEC).await.map(|_| ())
    }

    async fn clear(&mut self) -> Result<()> {
        let line = format!("{CLEAR_COMMAND} {CLEAR_TIME_SEC}");
        self.command(&line, CLEAR_TIME_SEC as f64 + 5.0).await.map(|_| ())
    }

    async fn expose(&mut self, request: &ExposeRequest) -> Result<f64> {
        let shutter = if request.shutter_open { "True" } else { "False" };
        let line = format!(
            "{EXPOSE_COMMAND} {shutter} {:9.3} {} {}",
            request.exp_time_sec, request.file_root, request.mode
        );
        let deadline_sec = expose_timeout(request.mode, request.exp_time_sec, request.wait);

        log::debug!("expose command [{line}], timeout {deadline_sec:.0} s, wait {}", request.wait);

        if request.wait {
            self.command(&line, deadline_sec).await?;
            Ok(request.exp_time_sec)
        } else {
            // start token and done slot, both bounded to one
            let (start_tx, mut start_rx) = mpsc::channel::<()>(1);
            let (done_tx, done_rx) = mpsc::channel::<Result<String>>(1);

            let host = self.host.clone();
            let port = self.command_port;
            let id = self.next_id();
            tokio::spawn(async move {
                // bounded wait for the start token
                let started =
                    timeout(Duration::from_secs_f64(deadline_sec), start_rx.recv()).await;
                let result = match started {
                    Ok(Some(())) => send_command(&host, port, &line, deadline_sec, id).await,
                    _ => Err(SchedulerError::Camera(
                        "exposure worker never received its start token".to_string(),
                    )),
                };
                let result = result.and_then(|reply| {
                    if reply_ok(&reply) {
                        Ok(reply)
                    } else {
                        Err(SchedulerError::Camera(format!("expose returned: {reply}")))
                    }
                });
                let _ = done_tx.send(result).await;
            });

            start_tx
                .send(())
                .await
                .map_err(|_| SchedulerError::Camera("exposure worker exited early".to_string()))?;
            self.pending_readout = Some(done_rx);

            self.wait_exposure_end(request.exp_time_sec).await
        }
    }

    fn readout_pending(&self) -> bool {
        self.pending_readout.is_some()
    }

    async fn wait_readout(&mut self) -> Result<()> {
        let Some(mut done_rx) = self.pending_readout.take() else {
            return Ok(());
        };
        let deadline = Duration::from_secs_f64(READOUT_TIME_SEC + TRANSFER_TIME_SEC + 5.0);
        match timeout(deadline, done_rx.recv()).await {
            Ok(Some(Ok(_reply))) => Ok(()),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Err(SchedulerError::Camera("exposure worker dropped".to_string())),
            Err(_) => Err(SchedulerError::Camera("timeout waiting for readout".to_string())),
        }
    }
}

/// Open a connection, write one command line, and read one reply line
/// under `timeout_sec`. Commands are spaced by a short delay.
async fn send_command(
    host: &str,
    port: u16,
    command: &str,
    timeout_sec: f64,
    id: u64,
) -> Result<String> {
    let deadline = Duration::from_secs_f64(timeout_sec.max(1.0));
    log::trace!("send_command[{id}]: {host}:{port} <- {command:?} (timeout {timeout_sec:.0} s)");

    let run = async {
        let mut stream = TcpStream::connect((host, port)).await?;
        stream.write_all(command.as_bytes()).await?;
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
                "command {command:?} to {host}:{port} failed: {e}"
            )))
        }
        Err(_) => {
            return Err(SchedulerError::Network(format!(
                "command {command:?} to {host}:{port} timed out after {timeout_sec:.0} s"
            )))
        }
    };

    sleep(Duration::from_millis(COMMAND_DELAY_MS)).await;
    log::trace!("send_command[{id}]: reply {reply:?}");
    Ok(reply)
}
