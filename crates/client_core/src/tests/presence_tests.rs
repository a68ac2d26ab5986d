use super::*;

fn at(raw: &str) -> DateTime<Utc> {
    raw.parse().expect("timestamp")
}

fn window() -> Duration {
    Duration::minutes(5)
}

#[test]
fn online_window_is_inclusive() {
    let now = at("2024-05-10T12:00:00Z");
    assert!(is_recently_active(at("2024-05-10T11:55:00Z"), now, window()));
    assert!(!is_recently_active(at("2024-05-10T11:54:59Z"), now, window()));
}

#[test]
fn future_activity_counts_as_online() {
    let now = at("2024-05-10T12:00:00Z");
    assert!(is_recently_active(at("2024-05-10T12:01:00Z"), now, window()));
}

#[test]
fn labels_follow_recency_buckets() {
    let now = at("2024-05-10T18:00:00Z");

    assert_eq!(presence_label(None, now, window()), None);
    assert_eq!(
        presence_label(Some(at("2024-05-10T17:58:00Z")), now, window()).as_deref(),
        Some("Active now")
    );
    assert_eq!(
        presence_label(Some(at("2024-05-10T09:05:00Z")), now, window()).as_deref(),
        Some("Active today at 9:05 AM")
    );
    assert_eq!(
        presence_label(Some(at("2024-05-09T21:30:00Z")), now, window()).as_deref(),
        Some("Active yesterday at 9:30 PM")
    );
    assert_eq!(
        presence_label(Some(at("2024-05-06T08:00:00Z")), now, window()).as_deref(),
        Some("Active Monday at 8:00 AM")
    );
    assert_eq!(
        presence_label(Some(at("2024-03-02T14:15:00Z")), now, window()).as_deref(),
        Some("Active Mar 2 at 2:15 PM")
    );
}
