use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

pub(crate) fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

/// `YYYY-MM-DD HH:MM:SS`, used in export headers.
pub(crate) fn format_human(value: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    value.format(&format).unwrap_or_else(|_| value.to_string())
}

/// `YYYYmmdd_HHMMSS`, used in export file names.
pub(crate) fn format_compact(value: OffsetDateTime) -> String {
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    value.format(&format).unwrap_or_else(|_| value.unix_timestamp().to_string())
}
