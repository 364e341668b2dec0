use std::env;
use std::sync::OnceLock;

static LTC_COMPILE_CACHE_SIZE: OnceLock<usize> = OnceLock::new();
static LTC_RNG_SEED: OnceLock<Option<u64>> = OnceLock::new();
static LTC_LOG_GRAPHS: OnceLock<bool> = OnceLock::new();

pub(crate) const DEFAULT_COMPILE_CACHE_SIZE: usize = 64;

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_usize(name: &str, value: &str) -> Option<usize> {
    match value.trim().parse::<usize>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(variable = name, value, "ignoring non-numeric environment value");
            None
        }
    }
}

/// Capacity of the executor's compiled-computation cache (`LTC_COMPILE_CACHE_SIZE`).
pub(crate) fn compile_cache_size() -> usize {
    *LTC_COMPILE_CACHE_SIZE.get_or_init(|| match env::var("LTC_COMPILE_CACHE_SIZE") {
        Ok(value) if !value.trim().is_empty() => {
            parse_usize("LTC_COMPILE_CACHE_SIZE", &value)
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_COMPILE_CACHE_SIZE)
        }
        _ => DEFAULT_COMPILE_CACHE_SIZE,
    })
}

/// Optional startup seed forwarded to the backend RNG (`LTC_RNG_SEED`).
pub(crate) fn rng_seed() -> Option<u64> {
    *LTC_RNG_SEED.get_or_init(|| match env::var("LTC_RNG_SEED") {
        Ok(value) if !value.trim().is_empty() => {
            parse_usize("LTC_RNG_SEED", &value).map(|seed| seed as u64)
        }
        _ => None,
    })
}

/// Dumps backend text for every freshly compiled computation (`LTC_LOG_GRAPHS`).
pub(crate) fn log_graphs() -> bool {
    *LTC_LOG_GRAPHS.get_or_init(|| match env::var("LTC_LOG_GRAPHS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// Comma separated replication device list (`LTC_REPLICATION_DEVICES`); not cached.
pub(crate) fn replication_devices() -> Vec<String> {
    match env::var("LTC_REPLICATION_DEVICES") {
        Ok(value) => value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value} should parse as true");
        }
        for value in ["0", "false", "off", ""] {
            assert!(!parse_bool(value), "{value} should parse as false");
        }
    }

    #[test]
    fn parse_usize_rejects_garbage() {
        assert_eq!(parse_usize("X", "12"), Some(12));
        assert_eq!(parse_usize("X", "twelve"), None);
    }
}
