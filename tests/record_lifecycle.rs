use std::error::Error;

use taskdag::fsm::{LeaseTable, TaskState};
use taskdag::store::{
    ClaimOutcome, CompleteOutcome, RecordFilter, RemoveOutcome, Store, TransitionRequest,
};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

fn open_store(dir: &TempDir) -> Result<Store, Box<dyn Error>> {
    Ok(Store::open(dir.path().join("data"), LeaseTable::default())?)
}

#[test]
fn add_then_get_round_trips_record_and_content() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    store.add_record("t1", "write the report", "general")?;

    let rec = store.get_record("t1").ok_or("record missing")?;
    assert_eq!(rec.state, TaskState::Pending);
    assert_eq!(rec.task_category, "general");
    assert_eq!(rec.claim_generation, 0);
    assert_eq!(store.task_content("t1").as_deref(), Some("write the report"));
    Ok(())
}

#[test]
fn duplicate_add_is_a_no_op() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    store.add_record("t1", "first", "general")?;
    store.add_record("t1", "second", "research")?;

    let rec = store.get_record("t1").ok_or("record missing")?;
    assert_eq!(rec.task_category, "general");
    assert_eq!(store.task_content("t1").as_deref(), Some("first"));
    Ok(())
}

#[test]
fn records_survive_a_reopen() -> TestResult {
    let dir = TempDir::new()?;
    {
        let mut store = open_store(&dir)?;
        store.add_record("t1", "persisted", "code")?;
        assert_eq!(store.claim("t1", "w1")?, ClaimOutcome::Claimed { claim_generation: 0 });
    }

    let store = open_store(&dir)?;
    let rec = store.get_record("t1").ok_or("record missing")?;
    assert_eq!(rec.state, TaskState::Claimed);
    assert_eq!(rec.claimed_by.as_deref(), Some("w1"));
    assert_eq!(store.task_content("t1").as_deref(), Some("persisted"));
    Ok(())
}

#[test]
fn claim_outcomes_cover_contention_and_bad_states() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    store.add_record("t1", "x", "general")?;

    assert_eq!(store.claim("nope", "w1")?, ClaimOutcome::NotFound);
    assert_eq!(store.claim("t1", "w1")?, ClaimOutcome::Claimed { claim_generation: 0 });
    // A live lease cannot be stolen.
    assert_eq!(store.claim("t1", "w2")?, ClaimOutcome::AlreadyClaimed);

    store.transition("t1", TaskState::Processing, &TransitionRequest {
        worker_id: Some("w1".into()),
        ..TransitionRequest::default()
    })?;
    assert_eq!(store.claim("t1", "w2")?, ClaimOutcome::InvalidState);
    Ok(())
}

#[test]
fn full_happy_path_through_the_fsm() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    store.add_record("t1", "x", "general")?;
    store.claim("t1", "w1")?;

    store.transition("t1", TaskState::Processing, &TransitionRequest {
        worker_id: Some("w1".into()),
        ..TransitionRequest::default()
    })?;

    let rec = store.transition("t1", TaskState::Completed, &TransitionRequest {
        worker_id: Some("w1".into()),
        result: Some("done".into()),
        ..TransitionRequest::default()
    })?;
    assert_eq!(rec.state, TaskState::Completed);
    assert_eq!(rec.result.as_deref(), Some("done"));
    // Terminal states drop the lease.
    assert!(rec.claimed_by.is_none());
    assert!(rec.claimed_at.is_none());
    Ok(())
}

#[test]
fn only_the_lease_holder_may_advance() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    store.add_record("t1", "x", "general")?;
    store.claim("t1", "w1")?;

    let err = store
        .transition("t1", TaskState::Processing, &TransitionRequest {
            worker_id: Some("intruder".into()),
            ..TransitionRequest::default()
        })
        .unwrap_err();
    assert!(err.to_string().contains("worker mismatch"));

    // Force bypasses the identity gate.
    store.transition("t1", TaskState::Processing, &TransitionRequest {
        worker_id: Some("intruder".into()),
        force: true,
        ..TransitionRequest::default()
    })?;
    Ok(())
}

#[test]
fn illegal_edges_are_rejected() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    store.add_record("t1", "x", "general")?;

    // pending -> processing skips the claim.
    let err = store
        .transition("t1", TaskState::Processing, &TransitionRequest::default())
        .unwrap_err();
    assert!(err.to_string().contains("illegal state transition"));

    // completed is terminal.
    store.transition("t1", TaskState::Completed, &TransitionRequest::default())?;
    assert!(store
        .transition("t1", TaskState::Pending, &TransitionRequest::default())
        .is_err());
    Ok(())
}

#[test]
fn failed_tasks_can_be_retried() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    store.add_record("t1", "x", "general")?;
    store.claim("t1", "w1")?;
    store.transition("t1", TaskState::Processing, &TransitionRequest {
        worker_id: Some("w1".into()),
        ..TransitionRequest::default()
    })?;
    store.transition("t1", TaskState::Failed, &TransitionRequest {
        worker_id: Some("w1".into()),
        ..TransitionRequest::default()
    })?;

    store.transition("t1", TaskState::Pending, &TransitionRequest::default())?;
    assert_eq!(store.claim("t1", "w2")?, ClaimOutcome::Claimed { claim_generation: 0 });
    Ok(())
}

#[test]
fn mark_completed_requires_processing() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    store.add_record("t1", "x", "general")?;

    assert!(matches!(
        store.mark_completed("t1", None, Some("r"))?,
        CompleteOutcome::InvalidState
    ));
    assert!(matches!(
        store.mark_completed("nope", None, None)?,
        CompleteOutcome::NotFound
    ));

    store.claim("t1", "w1")?;
    store.transition("t1", TaskState::Processing, &TransitionRequest {
        worker_id: Some("w1".into()),
        ..TransitionRequest::default()
    })?;
    let outcome = store.mark_completed("t1", Some(0), Some("answer"))?;
    match outcome {
        CompleteOutcome::Completed(rec) => {
            assert_eq!(rec.result.as_deref(), Some("answer"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    Ok(())
}

#[test]
fn remove_is_limited_to_pending_records() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    store.add_record("t1", "x", "general")?;
    store.add_record("t2", "y", "general")?;
    store.claim("t2", "w1")?;

    assert_eq!(store.remove("missing")?, RemoveOutcome::NotFound);
    assert_eq!(store.remove("t2")?, RemoveOutcome::NotCancellable);
    assert_eq!(store.remove("t1")?, RemoveOutcome::Removed);
    assert!(store.get_record("t1").is_none());
    assert!(store.task_content("t1").is_none());
    Ok(())
}

#[test]
fn query_filters_and_paginates_deterministically() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    for i in 0..5 {
        let category = if i % 2 == 0 { "general" } else { "research" };
        store.add_record(&format!("t{i}"), "x", category)?;
    }
    store.claim("t0", "w1")?;

    let page = store.query(&RecordFilter {
        state: Some(TaskState::Pending),
        ..RecordFilter::default()
    });
    assert_eq!(page.total, 4);

    let page = store.query(&RecordFilter {
        task_category: Some("research".into()),
        ..RecordFilter::default()
    });
    assert_eq!(page.total, 2);
    assert!(page.records.iter().all(|r| r.task_category == "research"));

    let page = store.query(&RecordFilter {
        limit: Some(2),
        offset: 1,
        ..RecordFilter::default()
    });
    assert_eq!(page.total, 5);
    assert_eq!(page.records.len(), 2);

    // Two pages never overlap.
    let first = store.query(&RecordFilter { limit: Some(3), ..RecordFilter::default() });
    let second = store.query(&RecordFilter { limit: Some(3), offset: 3, ..RecordFilter::default() });
    let first_uids: Vec<_> = first.records.iter().map(|r| r.uid.clone()).collect();
    assert!(second.records.iter().all(|r| !first_uids.contains(&r.uid)));
    Ok(())
}

#[test]
fn counts_track_states() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    store.add_record("t1", "x", "general")?;
    store.add_record("t2", "y", "general")?;
    store.claim("t2", "w1")?;

    let counts = store.record_counts();
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.claimed, 1);
    assert_eq!(counts.completed, 0);
    Ok(())
}

#[test]
fn oversized_content_is_truncated() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    let big = "a".repeat(60_000);
    store.add_record("t1", &big, "general")?;
    let stored = store.task_content("t1").ok_or("content missing")?;
    assert_eq!(stored.len(), 50_000);
    Ok(())
}
