use chrono::{DateTime, SecondsFormat, Utc};

/// Name prefix used when no room identifier is available
pub const FALLBACK_PREFIX: &str = "recording";

/// `<room>_<timestamp>`, or `recording_<timestamp>` without a usable room
///
/// The timestamp is ISO-8601 UTC with millisecond precision.
pub fn artifact_name(room: Option<&str>, at: DateTime<Utc>) -> String {
    let timestamp = at.to_rfc3339_opts(SecondsFormat::Millis, true);
    match room.map(str::trim).filter(|r| !r.is_empty()) {
        Some(room) => format!("{}_{}", room, timestamp),
        None => format!("{}_{}", FALLBACK_PREFIX, timestamp),
    }
}

/// Room identifier from a title like `"Weekly Sync | Meet"`
///
/// Everything before the last whitespace-then-`|`, if non-empty.
pub fn room_from_title(title: &str) -> Option<String> {
    let title = title.lines().next().unwrap_or("");
    let chars: Vec<(usize, char)> = title.char_indices().collect();

    for i in (1..chars.len()).rev() {
        let (_, c) = chars[i];
        let (ws_pos, prev) = chars[i - 1];
        if c == '|' && prev.is_whitespace() && ws_pos > 0 {
            return Some(title[..ws_pos].to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 27, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_name_with_room() {
        assert_eq!(
            artifact_name(Some("standup"), at()),
            "standup_2025-10-27T14:30:00.000Z"
        );
    }

    #[test]
    fn test_name_fallback() {
        assert_eq!(artifact_name(None, at()), "recording_2025-10-27T14:30:00.000Z");
        assert_eq!(artifact_name(Some("  "), at()), "recording_2025-10-27T14:30:00.000Z");
    }

    #[test]
    fn test_room_from_title() {
        assert_eq!(room_from_title("Weekly Sync | Meet"), Some("Weekly Sync".to_string()));
    }

    #[test]
    fn test_room_from_title_uses_last_separator() {
        assert_eq!(room_from_title("a | b | Meet"), Some("a | b".to_string()));
    }

    #[test]
    fn test_room_from_title_without_separator() {
        assert_eq!(room_from_title("Meet"), None);
        assert_eq!(room_from_title(" | Meet"), None);
        assert_eq!(room_from_title("a|b"), None);
    }
}
