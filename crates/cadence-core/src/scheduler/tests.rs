
use super::*;
use std::time::Duration as StdDuration;

fn noop_task() -> TaskFn {
    Arc::new(|| Box::pin(async { Ok(()) }))
}

fn sleeping_task(millis: u64) -> TaskFn {
    Arc::new(move || {
        Box::pin(async move {
            tokio::time::sleep(StdDuration::from_millis(millis)).await;
            Ok(())
        })
    })
}

fn periodic(seconds: i64) -> Trigger {
    Trigger::periodic(Duration::seconds(seconds), chrono_tz::UTC)
}

#[tokio::test]
async fn test_gate_admits_up_to_capacity() {
    let gate = ExecutionGate::new(2, 10);

    let first = gate.admit().await.unwrap();
    let second = gate.admit().await.unwrap();
    assert_eq!(gate.active(), 2);
    assert_eq!(gate.queued(), 0);

    drop(first);
    assert_eq!(gate.active(), 1);
    drop(second);
    assert_eq!(gate.active(), 0);
}

#[tokio::test]
async fn test_gate_queue_full_is_an_error() {
    let gate = ExecutionGate::new(1, 1);
    let permit = gate.admit().await.unwrap();

    // One waiter fits in the queue.
    let waiter = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            let _permit = gate.admit().await.unwrap();
        })
    };
    for _ in 0..100 {
        if gate.queued() == 1 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(2)).await;
    }
    assert_eq!(gate.queued(), 1);

    // The queue is at capacity: the next admission fails synchronously.
    let err = gate.admit().await.unwrap_err();
    assert!(matches!(err, SchedulerError::QueueFull { capacity: 1 }));

    // Releasing the slot admits the waiter.
    drop(permit);
    waiter.await.unwrap();
    assert_eq!(gate.active(), 0);
    assert_eq!(gate.queued(), 0);
}

#[tokio::test]
async fn test_schedule_is_idempotent_by_name() {
    let scheduler = ConcurrentScheduler::new();

    let first = scheduler.schedule(noop_task(), periodic(60), "job").unwrap();
    let second = scheduler.schedule(noop_task(), periodic(60), "job").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(scheduler.total_count(), 1);
    scheduler.shutdown(false).await;
}

#[tokio::test]
async fn test_cancelled_name_can_be_reused() {
    let scheduler = ConcurrentScheduler::new();

    let first = scheduler.schedule(noop_task(), periodic(60), "job").unwrap();
    first.cancel(false).await;

    let second = scheduler.schedule(noop_task(), periodic(60), "job").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!second.is_cancelled());
    assert_eq!(scheduler.total_count(), 1);
    scheduler.shutdown(false).await;
}

#[tokio::test]
async fn test_schedule_after_shutdown_fails() {
    let scheduler = ConcurrentScheduler::new();
    scheduler.shutdown(false).await;
    assert!(scheduler.is_shutdown());

    let err = scheduler.schedule(noop_task(), periodic(60), "late").unwrap_err();
    assert!(matches!(err, SchedulerError::ShutdownInProgress));
}

#[tokio::test]
async fn test_shutdown_cancels_every_task() {
    let scheduler = ConcurrentScheduler::new();
    let mut tasks = Vec::new();
    for index in 0..3 {
        let trigger = Trigger::periodic(Duration::milliseconds(10), chrono_tz::UTC);
        tasks.push(
            scheduler
                .schedule(sleeping_task(5), trigger, format!("task-{index}"))
                .unwrap(),
        );
    }
    tokio::time::sleep(StdDuration::from_millis(40)).await;

    scheduler.shutdown(false).await;

    for task in &tasks {
        assert!(task.is_cancelled());
        assert!(!task.is_executing());
    }
    assert_eq!(scheduler.active_count(), 0);
    assert_eq!(scheduler.total_count(), 0);

    // Second shutdown is a no-op.
    scheduler.shutdown(true).await;
}

#[tokio::test]
async fn test_fixed_rate_sugar_builds_the_right_trigger() {
    let scheduler = ConcurrentScheduler::new();

    let task = scheduler
        .schedule_at_fixed_rate(noop_task(), Duration::seconds(30), "rate", None)
        .unwrap();
    assert!(matches!(task.trigger(), Trigger::FixedRate { .. }));

    let task = scheduler
        .schedule_with_fixed_delay(
            noop_task(),
            Duration::seconds(30),
            "delay",
            Some(Duration::seconds(5)),
        )
        .unwrap();
    match task.trigger() {
        Trigger::FixedDelay {
            delay,
            initial_delay,
            ..
        } => {
            assert_eq!(*delay, Duration::seconds(30));
            assert_eq!(*initial_delay, Some(Duration::seconds(5)));
        }
        other => panic!("unexpected trigger: {other:?}"),
    }
    scheduler.shutdown(false).await;
}

#[tokio::test]
async fn test_with_properties_validates() {
    let properties = SchedulerProperties {
        max_concurrency: 0,
        ..SchedulerProperties::default()
    };
    assert!(matches!(
        ConcurrentScheduler::with_properties(&properties),
        Err(SchedulerError::InvalidConfig(_))
    ));

    let properties = SchedulerProperties {
        max_concurrency: 2,
        queue_capacity: 4,
        timezone: Some("Europe/Berlin".to_string()),
        ..SchedulerProperties::default()
    };
    let scheduler = ConcurrentScheduler::with_properties(&properties).unwrap();
    assert_eq!(scheduler.default_zone().name(), "Europe/Berlin");
}

#[tokio::test]
async fn test_queue_full_is_recorded_as_task_failure() {
    let properties = SchedulerProperties {
        max_concurrency: 1,
        queue_capacity: 1,
        timezone: Some("UTC".to_string()),
        ..SchedulerProperties::default()
    };
    let scheduler = ConcurrentScheduler::with_properties(&properties).unwrap();

    // Three eager tasks with long closures: one runs, one queues, the third
    // is rejected and must record the rejection as a failure. Fixed-delay
    // triggers keep the rejected task's retries spaced, since a failure
    // counts as a completion.
    let mut tasks = Vec::new();
    for index in 0..3 {
        let trigger = Trigger::fixed_delay(Duration::milliseconds(10), None, chrono_tz::UTC);
        tasks.push(
            scheduler
                .schedule(sleeping_task(300), trigger, format!("greedy-{index}"))
                .unwrap(),
        );
    }

    let mut saw_queue_full = false;
    for _ in 0..100 {
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        saw_queue_full = tasks.iter().any(|task| {
            task.execution_context()
                .last_error()
                .map(|error| error.to_string().contains("queue full"))
                .unwrap_or(false)
        });
        if saw_queue_full {
            break;
        }
    }
    assert!(saw_queue_full, "no task recorded a queue-full failure");
    assert!(scheduler.queued_count() <= 1);

    scheduler.shutdown(true).await;
}
