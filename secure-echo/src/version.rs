//! Build information printed by the `version` subcommand.
//!
//! `ECHO_BUILD_CODE` and `ECHO_BUILD_TIMESTAMP` (unix seconds) are read at
//! compile time, so release pipelines can stamp the binary.

use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

pub const BUILD_CODE: Option<&str> = option_env!("ECHO_BUILD_CODE");
pub const BUILD_TIMESTAMP: Option<&str> = option_env!("ECHO_BUILD_TIMESTAMP");

/// Formats a unix timestamp for display, `unknown` when absent or invalid
pub fn release_date(timestamp: Option<&str>) -> String {
    timestamp
        .and_then(|ts| ts.trim().parse::<i64>().ok())
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        .and_then(|date| date.format(&Rfc2822).ok())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn describe() -> String {
    format!(
        "version: {}\nbuild code: {}\nrelease date: {}\nplatform: {}/{}",
        env!("CARGO_PKG_VERSION"),
        BUILD_CODE.unwrap_or("dev"),
        release_date(BUILD_TIMESTAMP),
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_date() {
        assert_eq!(release_date(Some("0")), "Thu, 01 Jan 1970 00:00:00 +0000");
        assert_eq!(release_date(Some("yesterday")), "unknown");
        assert_eq!(release_date(None), "unknown");
    }

    #[test]
    fn test_describe_mentions_version() {
        assert!(describe().contains(env!("CARGO_PKG_VERSION")));
    }
}
