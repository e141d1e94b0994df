//! Polled telescope status.

/// Weather readings reported by the telescope controller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeatherReadings {
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub wind_speed: f64,
    pub wind_direction_deg: f64,
    pub dew_point_c: f64,
}

/// Snapshot of the telescope controller state, refreshed by polling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelescopeStatus {
    /// UT of day at the poll, hours.
    pub ut: f64,
    /// Local sidereal time, hours.
    pub lst: f64,
    /// Current pointing, RA hours / Dec degrees.
    pub ra: f64,
    pub dec: f64,
    /// Focus position, mm.
    pub focus_mm: f64,
    /// True when the dome reports open.
    pub dome_open: bool,
    pub filter: String,
    /// Accumulated pointing offsets, degrees; subtracted from sky
    /// pointings.
    pub ra_offset_deg: f64,
    pub dec_offset_deg: f64,
    pub weather: WeatherReadings,
}

impl TelescopeStatus {
    /// One-line status summary for the log.
    pub fn summary(&self) -> String {
        format!(
            "UT {:10.6}  LST {:10.6}  RA {:10.6}  Dec {:10.6}  dome {}  focus {:7.3}  filter {}  temp {:5.1}  humid {:5.1}  wind {:5.1}@{:5.1}",
            self.ut,
            self.lst,
            self.ra,
            self.dec,
            if self.dome_open { "open" } else { "closed" },
            self.focus_mm,
            self.filter,
            self.weather.temperature_c,
            self.weather.humidity_percent,
            self.weather.wind_speed,
            self.weather.wind_direction_deg,
        )
    }
}
