use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use super::*;

#[tokio::test(start_paused = true)]
async fn rearming_replaces_previous_timer() {
    let fired = Arc::new(AtomicU32::new(0));
    let mut slot = TimerSlot::default();

    for _ in 0..3 {
        let fired = Arc::clone(&fired);
        slot.arm(Instant::now() + Duration::from_secs(1), move |_| async move {
            fired.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_timer_never_fires() {
    let fired = Arc::new(AtomicU32::new(0));
    let mut slot = TimerSlot::default();
    let counter = Arc::clone(&fired);
    slot.arm(Instant::now() + Duration::from_secs(1), move |_| async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(slot.is_armed());

    slot.cancel();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!slot.is_armed());
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn stale_generation_is_not_claimed() {
    let mut slot = TimerSlot::default();
    assert!(!slot.take_if_current(0));

    slot.cancel();
    assert!(!slot.take_if_current(0));
}

#[tokio::test(start_paused = true)]
async fn fired_timer_claims_its_generation_once() {
    let slot = Arc::new(tokio::sync::Mutex::new(TimerSlot::default()));
    let claims = Arc::new(AtomicU32::new(0));

    {
        let shared = Arc::clone(&slot);
        let claims = Arc::clone(&claims);
        slot.lock()
            .await
            .arm(Instant::now() + Duration::from_secs(1), move |generation| async move {
                let mut guard = shared.lock().await;
                if guard.take_if_current(generation) {
                    claims.fetch_add(1, Ordering::SeqCst);
                }
                assert!(!guard.take_if_current(generation));
            });
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(claims.load(Ordering::SeqCst), 1);
    assert!(!slot.lock().await.is_armed());
}

#[tokio::test(start_paused = true)]
async fn ticker_ticks_every_period_until_stopped() {
    let ticks = Arc::new(AtomicU32::new(0));
    let mut ticker = Ticker::default();
    let counter = Arc::clone(&ticks);
    ticker.start(Duration::from_secs(1), move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert!(ticker.is_running());

    ticker.stop();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
}
