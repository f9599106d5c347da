mod common;

use chrono::Duration;
use common::*;
use sentinel_db::models::notification::{NotificationRecord, NotificationType};
use std::sync::atomic::Ordering;

fn due_subscription(id: i64, user_id: i64) -> sentinel_db::models::subscription::Subscription {
    let mut sub = subscription(id, user_id, fixed_now() + Duration::hours(12));
    sub.autopay_enabled = true;
    sub.autopay_days_before = 1;
    sub.traffic_used_bytes = 5_000;
    sub
}

#[tokio::test]
async fn renewal_charges_extends_and_syncs_panel() {
    let world = World::new().await;
    let now = fixed_now();
    world.store.insert_user(user(1, 100_000));
    let sub = due_subscription(1, 1);
    let uuid = sub.panel_uuid.unwrap();
    let old_end = sub.end_date;
    world.store.insert_subscription(sub);
    world.store.edit(|s| {
        s.notifications.push(NotificationRecord {
            id: 500,
            user_id: 1,
            subscription_id: 1,
            notification_type: NotificationType::ExpiringSoon,
            threshold: 1,
            sent_at: now - Duration::hours(1),
        });
    });

    let report = world.run_check(&world.autopay(50_000), now).await;
    assert_eq!(report.succeeded, 1);

    let state = world.store.snapshot();
    assert_eq!(state.users[&1].balance, 50_000);
    assert_eq!(state.transactions.len(), 1);
    assert_eq!(state.transactions[0].amount, -50_000);
    let renewed = &state.subscriptions[&1];
    let new_end = old_end + Duration::days(30);
    assert_eq!(renewed.end_date, new_end);
    assert_eq!(renewed.traffic_used_bytes, 0);
    assert_eq!(
        world.panel.calls(),
        vec![
            PanelCall::Update {
                uuid,
                expire_at: new_end
            },
            PanelCall::ResetTraffic(uuid),
        ]
    );
    assert!(state.records_of(NotificationType::ExpiringSoon).is_empty());
    assert_eq!(state.records_of(NotificationType::AutopaySuccess).len(), 1);
    assert!(world.gateway.sent_to(10_001)[0].contains("500.00"));
}

#[tokio::test]
async fn promo_discount_is_applied_and_consumed() {
    let world = World::new().await;
    let now = fixed_now();
    let mut account = user(1, 100_000);
    account.promo_discount_percent = 20;
    account.promo_discount_expires_at = Some(now + Duration::days(1));
    world.store.insert_user(account);
    world.store.insert_subscription(due_subscription(1, 1));

    world.run_check(&world.autopay(50_000), now).await;

    let charged = world.store.user(1);
    assert_eq!(charged.balance, 60_000);
    assert_eq!(charged.promo_discount_percent, 0);
}

#[tokio::test]
async fn insufficient_balance_declines_and_warns_once() {
    let world = World::new().await;
    let now = fixed_now();
    world.store.insert_user(user(1, 10_000));
    let sub = due_subscription(1, 1);
    let end = sub.end_date;
    world.store.insert_subscription(sub);
    let processor = world.autopay(50_000);

    let report = world.run_check(&processor, now).await;
    assert_eq!(report.declined, 1);
    assert_eq!(report.failed, 0);

    let report = world.run_check(&processor, now + Duration::minutes(5)).await;
    assert_eq!(report.declined, 1);

    let state = world.store.snapshot();
    assert_eq!(state.users[&1].balance, 10_000);
    assert_eq!(state.subscriptions[&1].end_date, end);
    assert!(state.transactions.is_empty());
    let failed = state.records_of(NotificationType::AutopayFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].threshold as i64, end.timestamp().div_euclid(86_400));
    assert_eq!(world.gateway.sent_to(10_001).len(), 1);
    assert!(world.panel.calls().is_empty());
}

#[tokio::test]
async fn panel_failure_rolls_back_the_debit() {
    let world = World::new().await;
    let now = fixed_now();
    world.store.insert_user(user(1, 100_000));
    let sub = due_subscription(1, 1);
    let end = sub.end_date;
    world.store.insert_subscription(sub);
    world.panel.fail_updates.store(true, Ordering::SeqCst);

    let report = world.run_check(&world.autopay(50_000), now).await;
    assert_eq!(report.failed, 1);

    let state = world.store.snapshot();
    assert_eq!(state.users[&1].balance, 100_000);
    assert_eq!(state.subscriptions[&1].end_date, end);
    assert!(state.transactions.is_empty());
    assert!(state.notifications.is_empty());
}

#[tokio::test]
async fn subscriptions_outside_the_window_are_ignored() {
    let world = World::new().await;
    let now = fixed_now();
    world.store.insert_user(user(1, 100_000));
    world.store.insert_user(user(2, 100_000));
    let mut far = due_subscription(1, 1);
    far.end_date = now + Duration::days(10);
    world.store.insert_subscription(far);
    let mut manual = due_subscription(2, 2);
    manual.autopay_enabled = false;
    world.store.insert_subscription(manual);

    let report = world.run_check(&world.autopay(50_000), now).await;

    assert!(report.is_empty());
    assert!(world.store.snapshot().transactions.is_empty());
}

#[tokio::test]
async fn disabled_autopay_does_nothing() {
    let mut config = test_config();
    config.autopay.enabled = false;
    let world = World::with_config(config).await;
    world.store.insert_user(user(1, 100_000));
    world.store.insert_subscription(due_subscription(1, 1));

    let report = world.run_check(&world.autopay(50_000), fixed_now()).await;

    assert!(report.is_empty());
    assert_eq!(world.store.user(1).balance, 100_000);
}
