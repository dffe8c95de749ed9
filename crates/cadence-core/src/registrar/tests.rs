
use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

fn counting_task(counter: Arc<AtomicUsize>) -> TaskFn {
    Arc::new(move || {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    })
}

fn utc_properties() -> SchedulerProperties {
    SchedulerProperties {
        timezone: Some("UTC".to_string()),
        ..SchedulerProperties::default()
    }
}

#[tokio::test]
async fn test_registrations_are_held_until_ready() {
    let registrar = Registrar::new(utc_properties()).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    registrar
        .register_periodic(
            "held",
            Duration::milliseconds(10),
            counting_task(Arc::clone(&counter)),
        )
        .unwrap();

    assert!(registrar.has_tasks());
    assert!(registrar.tasks().is_empty());

    // Nothing runs before ready.
    tokio::time::sleep(StdDuration::from_millis(40)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    registrar.ready().unwrap();
    assert_eq!(registrar.tasks().len(), 1);

    tokio::time::sleep(StdDuration::from_millis(60)).await;
    assert!(counter.load(Ordering::SeqCst) >= 2);

    registrar.destroy().await;
}

#[tokio::test]
async fn test_registration_after_ready_schedules_immediately() {
    let registrar = Registrar::new(utc_properties()).unwrap();
    registrar.ready().unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    registrar
        .register_fixed_rate(
            "immediate",
            Duration::milliseconds(10),
            None,
            counting_task(Arc::clone(&counter)),
        )
        .unwrap();

    tokio::time::sleep(StdDuration::from_millis(60)).await;
    assert!(counter.load(Ordering::SeqCst) >= 2);

    registrar.destroy().await;
}

#[tokio::test]
async fn test_duplicate_names_keep_the_first_registration() {
    let registrar = Registrar::new(utc_properties()).unwrap();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    registrar
        .register_periodic(
            "dup",
            Duration::milliseconds(10),
            counting_task(Arc::clone(&first)),
        )
        .unwrap();
    registrar
        .register_periodic(
            "dup",
            Duration::milliseconds(10),
            counting_task(Arc::clone(&second)),
        )
        .unwrap();

    registrar.ready().unwrap();
    assert_eq!(registrar.tasks().len(), 1);

    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert!(first.load(Ordering::SeqCst) >= 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);

    registrar.destroy().await;
}

#[tokio::test]
async fn test_attached_scheduler_is_used() {
    let scheduler = Arc::new(
        ConcurrentScheduler::with_properties(&utc_properties()).unwrap(),
    );
    let registrar = Registrar::new(utc_properties()).unwrap();
    registrar.attach_scheduler(Arc::clone(&scheduler));

    registrar
        .register_periodic("attached", Duration::seconds(60), counting_task(Arc::default()))
        .unwrap();
    registrar.ready().unwrap();

    assert_eq!(scheduler.total_count(), 1);
    registrar.destroy().await;
    assert!(scheduler.is_shutdown());
}

#[tokio::test]
async fn test_destroy_cancels_tasks() {
    let registrar = Registrar::new(utc_properties()).unwrap();
    registrar
        .register_periodic("doomed", Duration::milliseconds(10), counting_task(Arc::default()))
        .unwrap();
    registrar.ready().unwrap();

    let tasks = registrar.tasks();
    registrar.destroy().await;

    assert!(tasks.iter().all(|task| task.is_cancelled()));
    assert!(!registrar.has_tasks());
}

#[tokio::test]
async fn test_runnable_objects_can_be_registered() {
    struct Beat {
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Runnable for Beat {
        async fn run(&self) -> std::result::Result<(), TaskError> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let counter = Arc::new(AtomicUsize::new(0));
    let beat = Arc::new(Beat {
        counter: Arc::clone(&counter),
    });

    let registrar = Registrar::new(utc_properties()).unwrap();
    registrar
        .register_periodic("beat", Duration::milliseconds(10), runnable_task(beat))
        .unwrap();
    registrar.ready().unwrap();

    tokio::time::sleep(StdDuration::from_millis(60)).await;
    assert!(counter.load(Ordering::SeqCst) >= 2);

    registrar.destroy().await;
}

#[tokio::test]
async fn test_declared_registration_builds_and_names() {
    let registrar = Registrar::new(utc_properties()).unwrap();

    let declaration: ScheduleDeclaration = serde_json::from_str(
        r#"{"scope": "jobs::Report", "operation": "generate", "cron": "0 0 4 * * *"}"#,
    )
    .unwrap();
    registrar
        .register_declared(&declaration, counting_task(Arc::default()))
        .unwrap();
    registrar.ready().unwrap();

    let tasks = registrar.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name(), "cron-jobs-report-report-generate");

    registrar.destroy().await;
}

#[tokio::test]
async fn test_declared_registration_rejects_conflicts() {
    let registrar = Registrar::new(utc_properties()).unwrap();

    let declaration = ScheduleDeclaration {
        scope: "jobs::Report".to_string(),
        operation: "generate".to_string(),
        spec: TriggerSpec {
            cron: Some("0 0 4 * * *".to_string()),
            fixed_rate: Some(Duration::seconds(10)),
            ..TriggerSpec::default()
        },
        ..ScheduleDeclaration::default()
    };

    let err = registrar
        .register_declared(&declaration, counting_task(Arc::default()))
        .unwrap_err();
    match err {
        SchedulerError::ConflictingTriggers(source) => {
            assert_eq!(source, "jobs::Report::generate");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_declared_registration_requires_a_trigger() {
    let registrar = Registrar::new(utc_properties()).unwrap();
    let declaration = ScheduleDeclaration {
        scope: "jobs::Report".to_string(),
        operation: "generate".to_string(),
        ..ScheduleDeclaration::default()
    };

    let err = registrar
        .register_declared(&declaration, counting_task(Arc::default()))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NoTriggerSpecified));
}

#[test]
fn test_name_generator_with_prefix() {
    let names = TaskNameGenerator::new(Some("Nightly".to_string()));
    assert_eq!(
        names.generate(TaskKind::Cron, "jobs::Report", "Generate"),
        "nightly-generate"
    );
}

#[test]
fn test_name_generator_without_prefix() {
    let names = TaskNameGenerator::default();
    assert_eq!(
        names.generate(TaskKind::Scheduled, "jobs::Cleanup", "sweep"),
        "scheduled-jobs-cleanup-cleanup-sweep"
    );
    assert_eq!(
        names.generate(TaskKind::Periodic, "Heartbeat", "tick"),
        "periodic-heartbeat-heartbeat-tick"
    );
}

#[test]
fn test_task_kind_of_trigger() {
    let zone = chrono_tz::UTC;
    assert_eq!(
        TaskKind::of(&Trigger::periodic(Duration::seconds(1), zone)),
        TaskKind::Periodic
    );
    assert_eq!(
        TaskKind::of(&Trigger::fixed_rate(Duration::seconds(1), None, zone)),
        TaskKind::Scheduled
    );
    assert_eq!(
        TaskKind::of(&Trigger::fixed_delay(Duration::seconds(1), None, zone)),
        TaskKind::Scheduled
    );
}
