mod common;

use backoff::backoff::Stop;
use common::{init_tracing, read_rows, rows_for, runner, runner_with, success_reply, ScriptedStages, Step};
use roster_enricher::{
    BatchRunner, EnricherError, Entity, KeyPosition, NameListSource, Outcome, OutcomeStatus, ResultStore,
    RetryScheduler, StaticSource, TwoStagePipeline,
};
use std::sync::Arc;
use std::time::Duration;

fn success(name: &str) -> Outcome {
    Outcome {
        entity: Entity::parse(name).unwrap(),
        role: "Coach".to_string(),
        organization: "Wingate".to_string(),
        key_position: KeyPosition::No,
        reason: "recorded earlier".to_string(),
        reference_link: String::new(),
        status: OutcomeStatus::Success,
    }
}

#[tokio::test]
async fn resume_skips_recorded_entities() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");

    let store = ResultStore::new(&output);
    store.append(&success("Alice Cohen")).unwrap();
    store.append(&success("Ben Levi")).unwrap();
    let before = std::fs::read_to_string(&output).unwrap();

    let stages = ScriptedStages::new();
    let report = runner(&["Alice Cohen", "Ben Levi", "Carmel Katz"], &stages, &output)
        .run()
        .await
        .unwrap();

    assert_eq!(stages.calls(), vec!["Carmel Katz"]);
    assert_eq!(report.source_total, 3);
    assert_eq!(report.already_recorded, 2);
    assert_eq!(report.attempted, 1);

    let after = std::fs::read_to_string(&output).unwrap();
    assert!(after.starts_with(&before), "existing rows must not be rewritten");
    for name in ["Alice Cohen", "Ben Levi", "Carmel Katz"] {
        assert_eq!(rows_for(&output, name), 1, "{} should have exactly one row", name);
    }
}

#[tokio::test]
async fn rerun_after_completion_does_nothing() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");
    let names = ["Alice Cohen", "Ben Levi"];

    let stages = ScriptedStages::new();
    let first = runner(&names, &stages, &output).run().await.unwrap();
    assert_eq!(first.attempted, 2);

    let second = runner(&names, &stages, &output).run().await.unwrap();
    assert_eq!(second.attempted, 0);
    assert_eq!(second.already_recorded, 2);
    assert_eq!(stages.calls().len(), 2);
    assert_eq!(read_rows(&output).len(), 2);
}

#[tokio::test]
async fn rate_limits_are_retried_until_success() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");

    let stages = ScriptedStages::new().script(
        "Xena Mor",
        vec![Step::RateLimited, Step::RateLimited, Step::Reply(success_reply("Xena Mor"))],
    );
    let report = runner(&["Xena Mor"], &stages, &output).run().await.unwrap();

    assert_eq!(stages.calls(), vec!["Xena Mor"; 3]);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.operation_errors, 0);

    let rows = read_rows(&output);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0], vec!["Xena Mor", "Engineer", "Acme", "No", "scripted", ""]);
}

#[tokio::test]
async fn operation_error_does_not_halt_the_batch() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");

    let stages = ScriptedStages::new().script("Yael Bar", vec![Step::Fail("connection reset by peer".to_string())]);
    let report = runner(&["Xena Mor", "Yael Bar", "Zohar Tal"], &stages, &output)
        .run()
        .await
        .unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.operation_errors, 1);
    // Not retried.
    assert_eq!(stages.calls(), vec!["Xena Mor", "Yael Bar", "Zohar Tal"]);

    let rows = read_rows(&output);
    let names: Vec<&str> = rows.iter().map(|row| row[0].as_str()).collect();
    assert_eq!(names, vec!["Xena Mor", "Yael Bar", "Zohar Tal"]);
    assert_eq!(rows[1][1], "Script Error");
    assert!(rows[1][2].contains("connection reset by peer"));
    assert_eq!(rows[1][3], "Error");
    assert_eq!(rows[1][4], "");
    assert_eq!(rows[1][5], "");
}

#[tokio::test]
async fn malformed_classifier_reply_is_kept() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");

    let stages = ScriptedStages::new().script(
        "Xena Mor",
        vec![Step::Reply("I could not determine this.".to_string())],
    );
    let report = runner(&["Xena Mor"], &stages, &output).run().await.unwrap();

    assert_eq!(report.parse_failures, 1);
    let rows = read_rows(&output);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], "Parse Error");
    assert_eq!(rows[0][4], "I could not determine this.");

    let ledger = ResultStore::new(&output).load_ledger().unwrap();
    assert_eq!(ledger.status_counts().get(&OutcomeStatus::ParseFailure), Some(&1));
}

#[tokio::test]
async fn truncated_last_row_is_ignored_and_retried() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");
    std::fs::write(
        &output,
        "Name,Role,Company,Is Key Position,Reason,LinkedIn\n\
         Alice Cohen,Coach,Wingate,No,,\n\
         Ben Levi,CTO,SenSwim,Yes,Founder,\n\
         Carmel Katz,Eng",
    )
    .unwrap();

    let ledger = ResultStore::new(&output).load_ledger().unwrap();
    assert_eq!(ledger.len(), 2);
    assert!(ledger.contains(&Entity::parse("Alice Cohen").unwrap()));
    assert!(ledger.contains(&Entity::parse("Ben Levi").unwrap()));
    assert_eq!(ledger.skipped_rows(), 1);

    let stages = ScriptedStages::new();
    runner(&["Alice Cohen", "Ben Levi", "Carmel Katz"], &stages, &output)
        .run()
        .await
        .unwrap();

    assert_eq!(stages.calls(), vec!["Carmel Katz"]);
    let rows = read_rows(&output);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2], vec!["Carmel Katz", "Engineer", "Acme", "No", "scripted", ""]);
}

#[tokio::test]
async fn batch_cap_defers_the_rest() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");
    let names = ["Alice Cohen", "Ben Levi", "Carmel Katz"];

    let stages = ScriptedStages::new();
    let first = runner(&names, &stages, &output)
        .with_max_entities(Some(2))
        .run()
        .await
        .unwrap();
    assert_eq!(first.attempted, 2);
    assert_eq!(first.deferred, 1);

    let second = runner(&names, &stages, &output)
        .with_max_entities(Some(2))
        .run()
        .await
        .unwrap();
    assert_eq!(second.attempted, 1);
    assert_eq!(second.deferred, 0);
    assert_eq!(stages.calls(), vec!["Alice Cohen", "Ben Levi", "Carmel Katz"]);
}

#[tokio::test]
async fn duplicate_source_names_get_one_row() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");

    let stages = ScriptedStages::new();
    let report = runner(&["Alice Cohen", " Alice Cohen ", "", "Ben Levi"], &stages, &output)
        .run()
        .await
        .unwrap();

    assert_eq!(report.source_total, 2);
    assert_eq!(rows_for(&output, "Alice Cohen"), 1);
}

#[tokio::test]
async fn unreadable_source_aborts_before_any_work() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");
    let stages = ScriptedStages::new();

    let mut runner = BatchRunner::new(
        NameListSource::new(dir.path().join("missing.txt")),
        ResultStore::new(&output),
        TwoStagePipeline::new(Arc::new(stages.clone())),
        RetryScheduler::fixed(Duration::ZERO, Duration::ZERO),
    );
    let err = runner.run().await.unwrap_err();

    assert!(matches!(err, EnricherError::SourceUnavailable { .. }));
    assert!(stages.calls().is_empty());
    assert!(!output.exists());
}

#[tokio::test]
async fn exhausted_backoff_policy_records_an_error() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");

    let stages = ScriptedStages::new().script("Xena Mor", vec![Step::RateLimited]);
    let mut runner = BatchRunner::new(
        StaticSource::new(["Xena Mor", "Yael Bar"]),
        ResultStore::new(&output),
        TwoStagePipeline::new(Arc::new(stages.clone())),
        RetryScheduler::new(Stop {}, Duration::ZERO),
    );
    let report = runner.run().await.unwrap();

    assert_eq!(report.operation_errors, 1);
    assert_eq!(report.succeeded, 1);
    let rows = read_rows(&output);
    assert_eq!(rows[0][3], "Error");
    assert!(rows[0][2].contains("rate limited"));
}

#[tokio::test]
async fn multiline_name_is_recorded_once() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");
    let names = ["Gal\nNevo"];

    let stages = ScriptedStages::new();
    let first = runner(&names, &stages, &output).run().await.unwrap();
    let second = runner(&names, &stages, &output).run().await.unwrap();

    assert_eq!(first.attempted, 1);
    assert_eq!(second.attempted, 0);
    assert_eq!(second.already_recorded, 1);
    assert_eq!(stages.calls(), vec!["Gal Nevo"]);
    assert_eq!(rows_for(&output, "Gal Nevo"), 1);
}

#[tokio::test(start_paused = true)]
async fn pacing_follows_completed_entities_only() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.csv");

    let stages = ScriptedStages::new()
        .script(
            "Xena Mor",
            vec![Step::RateLimited, Step::Reply(success_reply("Xena Mor"))],
        )
        .script("Yael Bar", vec![Step::Fail("connection reset by peer".to_string())]);
    let scheduler = RetryScheduler::fixed(Duration::from_secs(60), Duration::from_secs(5));
    let mut runner = runner_with(&["Xena Mor", "Yael Bar", "Zohar Tal"], &stages, &output, scheduler);

    let start = tokio::time::Instant::now();
    let report = runner.run().await.unwrap();

    // One backoff for Xena, one pause after Xena; none after Yael's error or
    // after the last entity.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(65), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(66), "elapsed {:?}", elapsed);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.operation_errors, 1);
    assert_eq!(stages.calls(), vec!["Xena Mor", "Xena Mor", "Yael Bar", "Zohar Tal"]);
}
