/// Environment-style configuration helpers shared by the binaries.
///
/// Values are read through a lookup function rather than `std::env`
/// directly so parsing can be tested with a plain map.

use std::str::FromStr;

use crate::error::ConfigError;
use crate::protocol::ChunkSize;

/// Default UDP port for video, audio and acks.
pub const DEFAULT_PORT: u16 = 7723;

/// Read and parse an optional variable. Empty values count as unset.
pub fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

pub fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var(lookup, key)?.unwrap_or(default))
}

/// Boolean flag: `1`/`true`/`yes`/`on` and their opposites, case-insensitive.
pub fn parse_flag<F>(lookup: &F, key: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}

pub fn parse_chunk_size<F>(lookup: &F, key: &'static str) -> Result<ChunkSize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var::<usize, F>(lookup, key)? {
        Some(size) => ChunkSize::new(size),
        None => Ok(ChunkSize::DEFAULT),
    }
}

#[cfg(test)]
pub(crate) fn map_lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
    let map: std::collections::HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}
