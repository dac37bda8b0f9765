use super::*;
use crate::queue::QueueConfig;
use crate::types::TaskStatus;
use chrono::TimeZone;

async fn queue() -> Arc<TaskQueue> {
    Arc::new(TaskQueue::in_memory(QueueConfig::default()).await.unwrap())
}

#[test]
fn interval_trigger_advances_by_period() {
    let from = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
    let next = Trigger::interval(6 * 3600).next_after(from).unwrap();
    assert_eq!(next, from + Duration::hours(6));
}

#[test]
fn cron_every_n_minutes() {
    let from = Utc.with_ymd_and_hms(2025, 3, 1, 10, 7, 30).unwrap();
    let next = Trigger::cron("*/15 * * * *").next_after(from).unwrap();
    assert_eq!(next, from + Duration::minutes(15));
}

#[test]
fn cron_every_n_hours() {
    let from = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
    let next = Trigger::cron("0 */6 * * *").next_after(from).unwrap();
    assert_eq!(next, from + Duration::hours(6));
}

#[test]
fn cron_daily_fires_at_fixed_time() {
    // Before 02:00 the next fire is today at 02:00.
    let from = Utc.with_ymd_and_hms(2025, 3, 1, 1, 30, 0).unwrap();
    let next = Trigger::cron("0 2 * * *").next_after(from).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 1, 2, 0, 0).unwrap());

    // After 02:00 it rolls to tomorrow.
    let from = Utc.with_ymd_and_hms(2025, 3, 1, 14, 0, 0).unwrap();
    let next = Trigger::cron("0 2 * * *").next_after(from).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 2, 2, 0, 0).unwrap());
}

#[test]
fn malformed_cron_yields_nothing() {
    let from = Utc::now();
    assert!(Trigger::cron("not a cron").next_after(from).is_none());
}

#[test]
fn default_calendar_covers_maintenance_kinds() {
    let calendar = default_calendar();
    let kinds: Vec<TaskKind> = calendar.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&TaskKind::RefreshIndex));
    assert!(kinds.contains(&TaskKind::PurgeOldConversations));
}

#[tokio::test]
async fn due_entries_are_enqueued_on_maintenance_lane() {
    let queue = queue().await;
    let entries = vec![ScheduleEntry::new(
        "refresh",
        Trigger::interval(3600),
        TaskKind::RefreshIndex,
        json!({}),
    )];
    let mut scheduler = Scheduler::new(queue.clone(), entries, SchedulerConfig::default());

    let start = Utc::now();
    scheduler.prime(start);

    // Not due yet: nothing enqueued.
    scheduler.tick(start + Duration::minutes(30)).await;
    assert_eq!(queue.pending_count(None).await.unwrap(), 0);

    // One period later the entry fires, onto the maintenance lane.
    scheduler.tick(start + Duration::hours(1)).await;
    assert_eq!(queue.pending_count(Some(Lane::Maintenance)).await.unwrap(), 1);

    let task = queue.dequeue(Lane::Maintenance).await.unwrap().unwrap();
    assert_eq!(task.kind, TaskKind::RefreshIndex);
}

#[tokio::test]
async fn duplicate_ticks_collapse_while_task_unsettled() {
    let queue = queue().await;
    let entries = vec![ScheduleEntry::new(
        "purge",
        Trigger::interval(60),
        TaskKind::PurgeOldConversations,
        json!({ "days_old": 90 }),
    )];
    let mut scheduler = Scheduler::new(queue.clone(), entries, SchedulerConfig::default());

    let start = Utc::now();
    scheduler.prime(start);
    scheduler.tick(start + Duration::minutes(1)).await;
    scheduler.tick(start + Duration::minutes(2)).await;
    scheduler.tick(start + Duration::minutes(3)).await;

    // Identical unsettled tasks collapsed into one.
    assert_eq!(queue.pending_count(None).await.unwrap(), 1);

    // Once settled, the next tick enqueues again.
    let task = queue.dequeue_any().await.unwrap().unwrap();
    queue.ack(task.id).await.unwrap();
    assert_eq!(
        queue.get_task(task.id).await.unwrap().status,
        TaskStatus::Succeeded
    );

    scheduler.tick(start + Duration::minutes(4)).await;
    assert_eq!(queue.pending_count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn disabled_scheduler_exits_immediately() {
    let queue = queue().await;
    let scheduler = Scheduler::new(
        queue.clone(),
        default_calendar(),
        SchedulerConfig::default().with_enabled(false),
    );

    let shutdown = CancellationToken::new();
    // Returns without waiting on the (uncancelled) token.
    scheduler.run(shutdown).await.unwrap();
    assert_eq!(queue.pending_count(None).await.unwrap(), 0);
}
