//! Polled camera status.
//!
//! The camera is a mosaic driven by four controllers; every state flag is a
//! 4-bit mask with one bit per controller. A mask of 0 means no controller
//! has the state, 15 means all four do.

/// All controllers share the negative state.
pub const ALL_NEGATIVE: i32 = 0;

/// All controllers share the positive state.
pub const ALL_POSITIVE: i32 = 15;

/// Named controller state flags, in wire order. The wire keyword for each
/// flag is its upper-case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerFlag {
    NoStatus,
    Unknown,
    Idle,
    Exposing,
    ReadoutPending,
    Reading,
    Fetching,
    Flushing,
    Erasing,
    Purging,
    AutoClear,
    AutoFlush,
    PowerOn,
    PowerOff,
    PowerBad,
    FetchPending,
    Error,
    Active,
    Errored,
}

impl ControllerFlag {
    pub const ALL: [ControllerFlag; 19] = [
        ControllerFlag::NoStatus,
        ControllerFlag::Unknown,
        ControllerFlag::Idle,
        ControllerFlag::Exposing,
        ControllerFlag::ReadoutPending,
        ControllerFlag::Reading,
        ControllerFlag::Fetching,
        ControllerFlag::Flushing,
        ControllerFlag::Erasing,
        ControllerFlag::Purging,
        ControllerFlag::AutoClear,
        ControllerFlag::AutoFlush,
        ControllerFlag::PowerOn,
        ControllerFlag::PowerOff,
        ControllerFlag::PowerBad,
        ControllerFlag::FetchPending,
        ControllerFlag::Error,
        ControllerFlag::Active,
        ControllerFlag::Errored,
    ];

    /// Keyword used for this flag in status replies.
    pub fn keyword(&self) -> &'static str {
        match self {
            ControllerFlag::NoStatus => "NOSTATUS",
            ControllerFlag::Unknown => "UNKNOWN",
            ControllerFlag::Idle => "IDLE",
            ControllerFlag::Exposing => "EXPOSING",
            ControllerFlag::ReadoutPending => "READOUT_PENDING",
            ControllerFlag::Reading => "READING",
            ControllerFlag::Fetching => "FETCHING",
            ControllerFlag::Flushing => "FLUSHING",
            ControllerFlag::Erasing => "ERASING",
            ControllerFlag::Purging => "PURGING",
            ControllerFlag::AutoClear => "AUTOCLEAR",
            ControllerFlag::AutoFlush => "AUTOFLUSH",
            ControllerFlag::PowerOn => "POWERON",
            ControllerFlag::PowerOff => "POWEROFF",
            ControllerFlag::PowerBad => "POWERBAD",
            ControllerFlag::FetchPending => "FETCH_PENDING",
            ControllerFlag::Error => "ERROR",
            ControllerFlag::Active => "ACTIVE",
            ControllerFlag::Errored => "ERRORED",
        }
    }
}

/// Parsed camera status reply.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraStatus {
    pub ready: bool,
    pub error: bool,
    /// Free-text state word.
    pub state: String,
    pub comment: String,
    /// ISO-8601 timestamp as reported.
    pub date: String,
    /// Per-flag 4-bit masks; -1 when the flag was missing from the reply.
    pub flags: [i32; ControllerFlag::ALL.len()],
}

impl Default for CameraStatus {
    fn default() -> Self {
        CameraStatus {
            ready: false,
            error: false,
            state: String::new(),
            comment: String::new(),
            date: String::new(),
            flags: [-1; ControllerFlag::ALL.len()],
        }
    }
}

impl CameraStatus {
    /// Mask for one state flag.
    pub fn flag(&self, flag: ControllerFlag) -> i32 {
        self.flags[flag as usize]
    }

    /// True once every controller has dropped the `Exposing` state.
    pub fn exposure_finished(&self) -> bool {
        self.flag(ControllerFlag::Exposing) == ALL_NEGATIVE
    }

    /// Multi-line status dump for the log.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{:>20}  : {}\n", "UT date", self.date));
        out.push_str(&format!("{:>20}  : {}\n", "state", self.state));
        out.push_str(&format!("{:>20}  : {}\n", "comment", self.comment));
        out.push_str(&format!("{:>20}  : {}\n", "ready", self.ready));
        out.push_str(&format!("{:>20}  : {}\n", "error", self.error));
        for flag in ControllerFlag::ALL {
            out.push_str(&format!("{:>20}  : {:04b}\n", flag.keyword(), self.flag(flag).max(0)));
        }
        out
    }
}
