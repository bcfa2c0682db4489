//! Human-readable timeouts such as "500ms", "30s" or "2m".

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{de, Deserialize, Deserializer};

/// Parse a duration string.
///
/// Supported units: `ms`, `s`, `m`, `h`. Case-insensitive; surrounding
/// whitespace is ignored.
///
/// ```
/// use ccp_client::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .context("Duration must end with ms, s, m, or h")?;
    let (num, unit) = s.split_at(split);

    let num: u64 = num
        .parse()
        .with_context(|| format!("Invalid number in duration: {s}"))?;

    let millis = match unit {
        "ms" => Some(num),
        "s" => num.checked_mul(1_000),
        "m" => num.checked_mul(60_000),
        "h" => num.checked_mul(3_600_000),
        other => bail!("Unknown duration unit '{other}' (expected ms, s, m, or h)"),
    }
    .context("Duration is too large")?;

    Ok(Duration::from_millis(millis))
}

/// Serde deserializer for optional duration strings.
///
/// Use with `#[serde(default, deserialize_with = "deserialize_duration_opt")]`.
pub fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    opt.map(|s| parse_duration(&s).map_err(de::Error::custom))
        .transpose()
}
