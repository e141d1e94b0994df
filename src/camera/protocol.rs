//! Camera wire protocol: command verbs, exposure modes, reply timeouts,
//! and the status-payload parser.
//!
//! Commands are single ASCII lines `<verb> <args...>`. Replies are a single
//! line beginning with `DONE` or `ERROR`, followed by comma-separated
//! `'<keyword>': <value>` pairs where values are `True`/`False` or a
//! `'quoted'` string. State flags are four-character binary strings, one
//! bit per controller.

use crate::models::camera::{CameraStatus, ControllerFlag};

pub const DONE_REPLY: &str = "DONE";
pub const ERROR_REPLY: &str = "ERROR";

pub const STATUS_COMMAND: &str = "status";
pub const EXPOSE_COMMAND: &str = "expose";
pub const CLEAR_COMMAND: &str = "clear";
pub const HEADER_COMMAND: &str = "header";
pub const OPEN_SHUTTER_COMMAND: &str = "open_shutter";
pub const CLOSE_SHUTTER_COMMAND: &str = "close_shutter";

/// TCP ports on the camera-controller host.
pub const COMMAND_PORT: u16 = 5000;
pub const STATUS_PORT: u16 = 5001;

/// Seconds the controller takes to read an image off the sensor.
pub const READOUT_TIME_SEC: f64 = 40.0;
/// Seconds to fetch an image from controller memory to the host.
pub const TRANSFER_TIME_SEC: f64 = 10.0;
/// Seconds of clearing per clear command.
pub const CLEAR_TIME_SEC: u32 = 20;
/// Clears issued when the inter-exposure gap exceeds the clear interval.
pub const NUM_CAMERA_CLEARS: usize = 2;
/// Hours since the last readout that trigger a clear.
pub const CLEAR_INTERVAL_HOURS: f64 = 0.1;
/// Timeout for commands with quick replies, seconds.
pub const CAMERA_TIMEOUT_SEC: f64 = 5.0;
/// Spacing inserted between successive commands, milliseconds.
pub const COMMAND_DELAY_MS: u64 = 100;
/// Grace added to every reply timeout, seconds.
const TIMEOUT_GRACE_SEC: f64 = 5.0;

/// Exposure modes sequencing the expose/readout/fetch phases across
/// overlapping exposures.
///
/// `Single` runs all three phases sequentially. `First` exposes and reads
/// out, leaving the fetch for later. `Next` exposes and reads out while
/// fetching the previous image in parallel. `Last` only fetches the
/// previous image. The fastest duty cycle is `First, Next, ..., Next,
/// Last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureMode {
    Single,
    First,
    Next,
    Last,
}

impl ExposureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureMode::Single => "single",
            ExposureMode::First => "first",
            ExposureMode::Next => "next",
            ExposureMode::Last => "last",
        }
    }
}

impl std::fmt::Display for ExposureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply deadline for an expose command, seconds. The mode affects only
/// this timeout.
pub fn expose_timeout(mode: ExposureMode, exp_time_sec: f64, wait: bool) -> f64 {
    let t = if wait {
        match mode {
            ExposureMode::Single => exp_time_sec + READOUT_TIME_SEC + TRANSFER_TIME_SEC,
            ExposureMode::First => exp_time_sec + READOUT_TIME_SEC,
            ExposureMode::Next => (exp_time_sec + READOUT_TIME_SEC).max(TRANSFER_TIME_SEC),
            ExposureMode::Last => TRANSFER_TIME_SEC,
        }
    } else {
        match mode {
            ExposureMode::Last => READOUT_TIME_SEC,
            _ => exp_time_sec + READOUT_TIME_SEC,
        }
    };
    t + TIMEOUT_GRACE_SEC
}

/// True when a reply line indicates success.
pub fn reply_ok(reply: &str) -> bool {
    !reply.is_empty() && reply.contains(DONE_REPLY) && !reply.contains(ERROR_REPLY)
}

/// Extract the value string for `keyword` from a reply payload: the text
/// between the `:` after the keyword and the next `,` (or end), with any
/// surrounding quotes stripped.
pub fn value_string(reply: &str, keyword: &str) -> Option<String> {
    let quoted = format!("'{keyword}'");
    let start = reply.find(&quoted).map(|i| i + quoted.len()).or_else(|| {
        // tolerate unquoted keywords
        reply.find(keyword).map(|i| i + keyword.len())
    })?;
    let rest = &reply[start..];
    let after_colon = &rest[rest.find(':')? + 1..];
    let end = after_colon.find([',', '}', ']']).unwrap_or(after_colon.len());
    let raw = after_colon[..end].trim();
    Some(raw.trim_matches('\'').trim().to_string())
}

fn bool_value(reply: &str, keyword: &str) -> bool {
    match value_string(reply, keyword) {
        Some(v) => {
            let lower = v.to_ascii_lowercase();
            if lower.contains("true") {
                true
            } else if lower.contains("false") {
                false
            } else {
                log::warn!("value {v:?} for {keyword} does not express a boolean");
                false
            }
        }
        None => false,
    }
}

/// Parse a four-character binary mask like `0000` or `1111`. Returns -1 on
/// anything malformed.
pub fn binary_mask(s: &str) -> i32 {
    if s.is_empty() || !s.chars().all(|c| c == '0' || c == '1') {
        return -1;
    }
    i32::from_str_radix(s, 2).unwrap_or(-1)
}

/// Parse a full status reply into a [`CameraStatus`].
pub fn parse_status(reply: &str) -> CameraStatus {
    let mut status = CameraStatus {
        ready: bool_value(reply, "ready"),
        error: bool_value(reply, "error"),
        state: value_string(reply, "state").unwrap_or_else(|| "UNKNOWN".to_string()),
        comment: value_string(reply, "comment").unwrap_or_default(),
        date: value_string(reply, "date").unwrap_or_default(),
        ..CameraStatus::default()
    };
    for flag in ControllerFlag::ALL {
        status.flags[flag as usize] = value_string(reply, flag.keyword())
            .map(|v| binary_mask(&v))
            .unwrap_or(-1);
    }
    status
}
