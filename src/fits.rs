//! FITS header buffer: an ordered list of keyword/value pairs pushed to the
//! camera controller one at a time before each exposure.

use crate::error::{Result, SchedulerError};

/// Cap on the number of header words.
pub const MAX_FITS_WORDS: usize = 100;

pub const FILTERNAME_KEYWORD: &str = "filterna";
pub const FILTERID_KEYWORD: &str = "filterid";
pub const LST_KEYWORD: &str = "lst";
pub const HA_KEYWORD: &str = "ha";
pub const IMAGETYPE_KEYWORD: &str = "imagetyp";
pub const DARKFILE_KEYWORD: &str = "darkfile";
pub const FLATFILE_KEYWORD: &str = "flatfile";
pub const SEQUENCE_KEYWORD: &str = "sequence";
pub const RA_KEYWORD: &str = "tele-ra";
pub const DEC_KEYWORD: &str = "tele-dec";
pub const FOCUS_KEYWORD: &str = "focus";
pub const FIELDID_KEYWORD: &str = "fieldid";
pub const UJD_KEYWORD: &str = "ujd";
pub const COMMENT_KEYWORD: &str = "comment";

const BLANK_VALUE: &str = "UNKNOWN";

/// Ordered keyword/value buffer. Keywords are unique: `update` replaces,
/// `add` appends.
#[derive(Debug, Clone, Default)]
pub struct FitsHeader {
    words: Vec<(String, String)>,
}

impl FitsHeader {
    /// Header pre-populated with the standard keywords, all blank.
    pub fn standard() -> FitsHeader {
        let mut header = FitsHeader::default();
        for (keyword, value) in [
            (FILTERNAME_KEYWORD, BLANK_VALUE),
            (FILTERID_KEYWORD, "0"),
            (LST_KEYWORD, "0.0"),
            (HA_KEYWORD, "0.0"),
            (IMAGETYPE_KEYWORD, BLANK_VALUE),
            (DARKFILE_KEYWORD, BLANK_VALUE),
            (FLATFILE_KEYWORD, BLANK_VALUE),
            (SEQUENCE_KEYWORD, BLANK_VALUE),
            (RA_KEYWORD, "0.0"),
            (DEC_KEYWORD, "0.0"),
            (FOCUS_KEYWORD, "0.0"),
            (FIELDID_KEYWORD, BLANK_VALUE),
            (UJD_KEYWORD, "0.0"),
            (COMMENT_KEYWORD, BLANK_VALUE),
        ] {
            header.add(keyword, value).expect("standard header fits the cap");
        }
        header
    }

    /// Append a new keyword. Fails when the cap is reached.
    pub fn add(&mut self, keyword: &str, value: &str) -> Result<()> {
        if self.words.len() >= MAX_FITS_WORDS {
            return Err(SchedulerError::FatalState(format!(
                "FITS header full, cannot add {keyword}"
            )));
        }
        self.words.push((keyword.to_string(), normalize_value(value)));
        Ok(())
    }

    /// Replace the value of an existing keyword. Unknown keywords are an
    /// error, matching the original header discipline.
    pub fn update(&mut self, keyword: &str, value: &str) -> Result<()> {
        log::debug!("fits header: setting {keyword} to {value}");
        match self.words.iter_mut().find(|(k, _)| k == keyword) {
            Some((_, v)) => {
                *v = normalize_value(value);
                Ok(())
            }
            None => Err(SchedulerError::FatalState(format!(
                "FITS header keyword {keyword} not recognised"
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Iterate the words in insertion order, as they are pushed to the
    /// camera.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.words.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn normalize_value(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        BLANK_VALUE.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_replaces_add_appends() {
        let mut h = FitsHeader::standard();
        let n = h.len();
        h.update(LST_KEYWORD, "13.5").unwrap();
        assert_eq!(h.len(), n);
        assert_eq!(h.iter().find(|(k, _)| *k == LST_KEYWORD).unwrap().1, "13.5");

        h.add("extrakey", "1").unwrap();
        assert_eq!(h.len(), n + 1);
    }

    #[test]
    fn unknown_keyword_rejected() {
        let mut h = FitsHeader::standard();
        assert!(h.update("nope", "1").is_err());
    }

    #[test]
    fn blank_values_become_unknown() {
        let mut h = FitsHeader::standard();
        h.update(COMMENT_KEYWORD, "  ").unwrap();
        assert_eq!(h.iter().find(|(k, _)| *k == COMMENT_KEYWORD).unwrap().1, "UNKNOWN");
    }

    #[test]
    fn cap_enforced() {
        let mut h = FitsHeader::default();
        for i in 0..MAX_FITS_WORDS {
            h.add(&format!("k{i}"), "v").unwrap();
        }
        assert!(h.add("overflow", "v").is_err());
    }

    #[test]
    fn order_preserved() {
        let h = FitsHeader::standard();
        let first = h.iter().next().unwrap();
        assert_eq!(first.0, FILTERNAME_KEYWORD);
    }
}
