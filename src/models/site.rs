//! Observing-site parameters and the site table.
//!
//! Sites are loaded once at startup from a TOML table keyed by name; the
//! `SITE_NAME` environment variable selects the record and `DEFAULT` is the
//! compiled-in fallback.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// The site table is read from disk once per process.
static SITE_TABLE: OnceCell<Option<Vec<Site>>> = OnceCell::new();

/// Daylight-saving policy tag. The scheduler itself runs on UT; the tag is
/// carried for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DstPolicy {
    #[default]
    None,
    NorthAmerica,
    Spain,
    Southern,
}

/// Site-specific parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    pub abbreviation: String,
    /// West longitude in decimal hours.
    pub longitude_hours_west: f64,
    /// North latitude in decimal degrees.
    pub latitude_deg: f64,
    /// Elevation above sea level, meters.
    pub elevation_sea_m: f64,
    /// Elevation above the effective surrounding horizon, meters.
    pub elevation_horizon_m: f64,
    /// Depression of the horizon in degrees, applied to rise/set altitudes.
    pub horizon_depression_deg: f64,
    /// Standard time zone offset in hours (west positive).
    pub std_zone_hours: f64,
    pub zone_name: String,
    #[serde(default)]
    pub dst: DstPolicy,
}

/// Site table file: a list of `[[site]]` records.
#[derive(Debug, Deserialize)]
struct SiteTable {
    #[serde(rename = "site")]
    sites: Vec<Site>,
}

impl Site {
    /// The compiled-in `DEFAULT` site record.
    pub fn default_site() -> Site {
        Site {
            name: "DEFAULT".to_string(),
            abbreviation: "D".to_string(),
            longitude_hours_west: 7.44111,
            latitude_deg: 31.9533,
            elevation_sea_m: 1925.0,
            elevation_horizon_m: 500.0,
            horizon_depression_deg: 0.7174,
            std_zone_hours: 7.0,
            zone_name: "Mountain".to_string(),
            dst: DstPolicy::None,
        }
    }

    /// Load the site named by the `SITE_NAME` environment variable, falling
    /// back to `DEFAULT` when unset.
    pub fn from_env() -> Result<Site> {
        let name = match std::env::var("SITE_NAME") {
            Ok(n) => n,
            Err(_) => {
                log::warn!("environment variable SITE_NAME is not set, using DEFAULT");
                "DEFAULT".to_string()
            }
        };
        Site::load(&name)
    }

    /// Look up a site by name in the site table. `DEFAULT` always resolves,
    /// table or no table.
    pub fn load(name: &str) -> Result<Site> {
        let table = SITE_TABLE.get_or_init(|| {
            for path in Self::table_search_paths() {
                if path.exists() {
                    match Self::read_table(&path) {
                        Ok(table) => return Some(table),
                        Err(e) => {
                            log::warn!("unusable site table {}: {e}", path.display());
                            return None;
                        }
                    }
                }
            }
            None
        });

        if let Some(table) = table {
            if let Some(site) = table.iter().find(|s| s.name == name) {
                return Ok(site.clone());
            }
        }
        if name == "DEFAULT" {
            Ok(Site::default_site())
        } else {
            Err(SchedulerError::FatalState(format!("site {name:?} not found in any site table")))
        }
    }

    fn table_search_paths() -> Vec<PathBuf> {
        vec![PathBuf::from("sites.toml"), PathBuf::from("config/sites.toml")]
    }

    fn read_table(path: &Path) -> Result<Vec<Site>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::FatalState(format!("failed to read site table: {e}")))?;
        let table: SiteTable = toml::from_str(&content)
            .map_err(|e| SchedulerError::FatalState(format!("failed to parse site table: {e}")))?;
        Ok(table.sites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_site_is_sentinel() {
        let s = Site::default_site();
        assert!((s.longitude_hours_west - 7.44111).abs() < 1e-9);
        assert!((s.latitude_deg - 31.9533).abs() < 1e-9);
    }

    #[test]
    fn parse_site_table() {
        let toml = r#"
[[site]]
name = "La Silla"
abbreviation = "LS"
longitude_hours_west = 4.7153
latitude_deg = -29.257
elevation_sea_m = 2347.0
elevation_horizon_m = 2347.0
horizon_depression_deg = 0.0
std_zone_hours = 4.0
zone_name = "Chilean"
dst = "southern"
"#;
        let table: SiteTable = toml::from_str(toml).unwrap();
        assert_eq!(table.sites.len(), 1);
        assert_eq!(table.sites[0].abbreviation, "LS");
        assert_eq!(table.sites[0].dst, DstPolicy::Southern);
    }
}
