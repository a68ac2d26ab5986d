use chrono::{DateTime, Duration, Utc};

/// Online approximation: active within `window` of `now`.
pub fn is_recently_active(
    last_active_at: DateTime<Utc>,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    now.signed_duration_since(last_active_at) <= window
}

/// Human readable "last seen" line shown under a counterpart's name.
pub fn presence_label(
    last_active_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> Option<String> {
    let last_active_at = last_active_at?;
    if is_recently_active(last_active_at, now, window) {
        return Some("Active now".to_string());
    }

    let time = last_active_at.format("%-I:%M %p");
    let today = now.date_naive();
    let day = last_active_at.date_naive();
    let label = if day == today {
        format!("Active today at {time}")
    } else if today.pred_opt() == Some(day) {
        format!("Active yesterday at {time}")
    } else if last_active_at > now - Duration::days(7) {
        format!("Active {} at {time}", last_active_at.format("%A"))
    } else {
        format!("Active {} at {time}", last_active_at.format("%b %-d"))
    };
    Some(label)
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
