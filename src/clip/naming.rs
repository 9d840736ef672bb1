use crate::trigger::TriggerEvent;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

/// Resolve configured timezone, falling back to UTC on parse errors
pub fn resolve_timezone(tz_name: &str) -> Tz {
    match tz_name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!("Invalid clip timezone '{}', falling back to UTC", tz_name);
            chrono_tz::UTC
        }
    }
}

/// File stem for a clip: `event_<local time>_<label>_<short id>`
pub fn clip_file_stem(
    trigger: &TriggerEvent,
    started_at: DateTime<Utc>,
    timezone: &Tz,
    clip_id: Uuid,
) -> String {
    let local = started_at.with_timezone(timezone);
    let simple = clip_id.simple().to_string();
    format!(
        "event_{}_{}_{}",
        local.format("%Y%m%d_%H%M%S_%3f"),
        trigger.file_label(),
        &simple[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_stem_uses_timezone() {
        let trigger = TriggerEvent::new("person_detected");
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let clip_id = Uuid::parse_str("0123456789abcdef0123456789abcdef").unwrap();

        let utc = clip_file_stem(&trigger, at, &chrono_tz::UTC, clip_id);
        assert_eq!(utc, "event_20240301_123005_000_person_detected_01234567");

        let tokyo = clip_file_stem(&trigger, at, &resolve_timezone("Asia/Tokyo"), clip_id);
        assert_eq!(tokyo, "event_20240301_213005_000_person_detected_01234567");
    }

    #[test]
    fn test_invalid_timezone_falls_back_to_utc() {
        assert_eq!(resolve_timezone("Mars/Olympus_Mons"), chrono_tz::UTC);
    }
}
