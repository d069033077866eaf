//! Small shared helpers: duration parsing and hostname resolution.

use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;

/// Parses a human-readable duration (`5m`, `30s`, `2h`, `1h30m`). Falls back
/// to `fallback` and logs a warning if the string cannot be parsed.
pub fn parse_duration_with_fallback(s: &str, fallback: Duration) -> Duration {
    match parse_duration(s) {
        Some(d) => d,
        None => {
            log::warn!("invalid duration {s:?}, falling back to {fallback:?}");
            fallback
        }
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut chars = s.char_indices().peekable();
    let mut start = 0;
    let mut saw_any = false;

    while let Some(&(idx, c)) = chars.peek() {
        if c.is_ascii_digit() || c == '.' {
            chars.next();
            continue;
        }
        // unit character(s) starting at idx
        let number: f64 = s[start..idx].parse().ok()?;
        let unit_start = idx;
        chars.next();
        let mut unit_end = idx + c.len_utf8();
        // allow multi-char units in the future; today units are single ASCII letters
        while let Some(&(next_idx, next_c)) = chars.peek() {
            if next_c.is_ascii_digit() || next_c == '.' {
                break;
            }
            chars.next();
            unit_end = next_idx + next_c.len_utf8();
        }
        let unit = &s[unit_start..unit_end];
        let seconds = match unit {
            "s" => number,
            "m" => number * 60.0,
            "h" => number * 3600.0,
            _ => return None,
        };
        total += Duration::from_secs_f64(seconds);
        saw_any = true;
        start = unit_end;
    }

    if !saw_any {
        return None;
    }
    Some(total)
}

const ADJECTIVES: &[&str] = &[
    "quiet", "brisk", "amber", "lucky", "sly", "bold", "hazy", "calm", "sharp", "tidy",
];
const NOUNS: &[&str] = &[
    "otter", "falcon", "marble", "ember", "willow", "badger", "comet", "pebble", "lantern",
    "sparrow",
];

/// OS hostname, or a stable random `adjective-noun` fallback if unavailable.
/// The fallback is generated once and held for the process lifetime by the
/// caller.
pub fn resolve_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(silly_name)
}

fn silly_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).unwrap_or(&"quiet");
    let noun = NOUNS.choose(&mut rng).unwrap_or(&"otter");
    let suffix: u16 = rng.gen_range(0..10_000);
    format!("{adjective}-{noun}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_units() {
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
    }

    #[test]
    fn falls_back_on_garbage() {
        let fallback = Duration::from_secs(60);
        assert_eq!(parse_duration_with_fallback("not-a-duration", fallback), fallback);
    }

    #[test]
    fn hostname_is_never_empty() {
        assert!(!resolve_hostname().is_empty());
    }
}
