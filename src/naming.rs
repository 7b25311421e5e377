//! Artifact naming: date-partitioned folders and timestamped filenames.
//!
//! Layout on disk is `<outputDir>/<dd-mm-yyyy>/<key>__<HH-MM-SS>.<ext>`,
//! with `<key>__error__<HH-MM-SS>.png` for diagnostic screenshots. `parse`
//! is the inverse, used by offline tooling to map files back to jobs.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};

const DATE_FOLDER_FORMAT: &str = "%d-%m-%Y";
const TIME_FORMAT: &str = "%H-%M-%S";
const ERROR_MARKER: &str = "__error";

/// Folder name for the given instant, local time: `dd-mm-yyyy`.
pub fn date_folder(instant: DateTime<Local>) -> String {
    instant.format(DATE_FOLDER_FORMAT).to_string()
}

/// Artifact filename: `<key>__<HH-MM-SS>.<ext>`.
pub fn filename(key: &str, extension: &str, instant: DateTime<Local>) -> String {
    format!("{key}__{}.{extension}", instant.format(TIME_FORMAT))
}

/// Diagnostic screenshot filename: `<key>__error__<HH-MM-SS>.png`.
pub fn error_screenshot_filename(key: &str, instant: DateTime<Local>) -> String {
    format!("{key}{ERROR_MARKER}__{}.png", instant.format(TIME_FORMAT))
}

/// A filename decomposed back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArtifact {
    pub key: String,
    pub extension: String,
    pub is_error_diagnostic: bool,
    pub time: NaiveTime,
    /// Present when the surrounding date folder was supplied.
    pub date: Option<NaiveDate>,
}

impl ParsedArtifact {
    /// Full timestamp at second resolution, when the date folder was known.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.date.map(|date| date.and_time(self.time))
    }
}

/// Inverse of [`filename`] / [`error_screenshot_filename`].
///
/// Keys may themselves contain `__`, so the timestamp is taken from the last
/// separator. Returns `None` for names this service did not produce.
pub fn parse(filename: &str, date_folder: Option<&str>) -> Option<ParsedArtifact> {
    let (stem, extension) = filename.rsplit_once('.')?;
    let (mut key, time_part) = stem.rsplit_once("__")?;
    if key.is_empty() {
        return None;
    }

    let time = NaiveTime::parse_from_str(time_part, TIME_FORMAT).ok()?;

    let is_error_diagnostic = key.ends_with(ERROR_MARKER);
    if is_error_diagnostic {
        key = &key[..key.len() - ERROR_MARKER.len()];
        if key.is_empty() {
            return None;
        }
    }

    let date = match date_folder {
        Some(folder) => Some(NaiveDate::parse_from_str(folder, DATE_FOLDER_FORMAT).ok()?),
        None => None,
    };

    Some(ParsedArtifact {
        key: key.to_string(),
        extension: extension.to_string(),
        is_error_diagnostic,
        time,
        date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap()
    }

    #[test]
    fn folder_and_filenames() {
        assert_eq!(date_folder(instant()), "07-03-2024");
        assert_eq!(filename("invoice-1", "pdf", instant()), "invoice-1__14-05-09.pdf");
        assert_eq!(filename("shot", "jpeg", instant()), "shot__14-05-09.jpeg");
        assert_eq!(
            error_screenshot_filename("invoice-1", instant()),
            "invoice-1__error__14-05-09.png"
        );
    }

    #[test]
    fn parse_roundtrip_at_second_resolution() {
        let t = instant();
        let name = filename("invoice-1", "pdf", t);
        let parsed = parse(&name, Some(&date_folder(t))).unwrap();

        assert_eq!(parsed.key, "invoice-1");
        assert_eq!(parsed.extension, "pdf");
        assert!(!parsed.is_error_diagnostic);
        assert_eq!(parsed.timestamp().unwrap(), t.naive_local());
    }

    #[test]
    fn parse_handles_keys_containing_separator() {
        let t = instant();
        let name = filename("a__b", "png", t);
        let parsed = parse(&name, None).unwrap();
        assert_eq!(parsed.key, "a__b");
        assert_eq!(parsed.date, None);
    }

    #[test]
    fn parse_recognizes_error_diagnostics() {
        let t = instant();
        let name = error_screenshot_filename("invoice-1", t);
        let parsed = parse(&name, Some(&date_folder(t))).unwrap();
        assert_eq!(parsed.key, "invoice-1");
        assert!(parsed.is_error_diagnostic);
        assert_eq!(parsed.extension, "png");
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert!(parse("random.pdf", None).is_none());
        assert!(parse("key__notatime.pdf", None).is_none());
        assert!(parse("__12-00-00.pdf", None).is_none());
        assert!(parse("no-extension__12-00-00", None).is_none());
        assert!(parse("k__12-00-00.pdf", Some("2024-03-07")).is_none());
    }
}
