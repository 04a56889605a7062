use std::error::Error;

use taskdag::fsm::{LeaseTable, TaskState};
use taskdag::store::{Store, TransitionRequest};
use taskdag::workflow::engine;
use taskdag::workflow::{StepSpec, StepStatus, WorkflowCancelOutcome, WorkflowStatus};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

fn open_store(dir: &TempDir) -> Result<Store, Box<dyn Error>> {
    Ok(Store::open(dir.path().join("data"), LeaseTable::default())?)
}

fn spec(id: &str, content: &str, depends_on: &[&str]) -> StepSpec {
    StepSpec {
        id: id.to_string(),
        name: None,
        task_content: content.to_string(),
        task_category: None,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
    }
}

/// Drive a step's task record to completed and notify the engine.
fn complete_step(store: &mut Store, wf_id: &str, step_id: &str, result: &str) -> TestResult {
    let uid = format!("{wf_id}_{step_id}");
    store.claim(&uid, "worker")?;
    store.transition(&uid, TaskState::Processing, &TransitionRequest {
        worker_id: Some("worker".into()),
        ..TransitionRequest::default()
    })?;
    store.transition(&uid, TaskState::Completed, &TransitionRequest {
        worker_id: Some("worker".into()),
        result: Some(result.into()),
        ..TransitionRequest::default()
    })?;
    engine::on_task_completed(store, &uid)?;
    Ok(())
}

fn fail_step(store: &mut Store, wf_id: &str, step_id: &str) -> TestResult {
    let uid = format!("{wf_id}_{step_id}");
    store.claim(&uid, "worker")?;
    store.transition(&uid, TaskState::Processing, &TransitionRequest {
        worker_id: Some("worker".into()),
        ..TransitionRequest::default()
    })?;
    store.transition(&uid, TaskState::Failed, &TransitionRequest {
        worker_id: Some("worker".into()),
        ..TransitionRequest::default()
    })?;
    engine::on_task_failed(store, &uid)?;
    Ok(())
}

#[test]
fn chain_runs_one_step_at_a_time_and_carries_results() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    let wf = engine::create_workflow(
        &mut store,
        "report",
        vec![
            spec("s1", "gather sources", &[]),
            spec("s2", "write summary", &["s1"]),
        ],
        None,
    )?;

    // Only the dependency-free step starts.
    assert_eq!(wf.status, WorkflowStatus::Running);
    assert_eq!(wf.step("s1").ok_or("s1")?.status, StepStatus::Active);
    assert_eq!(wf.step("s2").ok_or("s2")?.status, StepStatus::Pending);
    let s1_uid = format!("{}_s1", wf.id);
    assert!(store.get_record(&s1_uid).is_some());
    assert!(store.get_record(&format!("{}_s2", wf.id)).is_none());

    complete_step(&mut store, &wf.id, "s1", "three sources found")?;

    // s2 started, with s1's result appended to its content.
    let wf = store.get_workflow(&wf.id).ok_or("workflow missing")?;
    assert_eq!(wf.step("s2").ok_or("s2")?.status, StepStatus::Active);
    let s2_content = store
        .task_content(&format!("{}_s2", wf.id))
        .ok_or("s2 content")?;
    assert!(s2_content.starts_with("write summary"));
    assert!(s2_content.contains("[result of step s1]"));
    assert!(s2_content.contains("three sources found"));

    complete_step(&mut store, &wf.id, "s2", "summary written")?;
    let wf = store.get_workflow(&wf.id).ok_or("workflow missing")?;
    assert_eq!(wf.status, WorkflowStatus::Completed);
    Ok(())
}

#[test]
fn fan_in_waits_for_every_dependency() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    let wf = engine::create_workflow(
        &mut store,
        "fan-in",
        vec![
            spec("a", "branch a", &[]),
            spec("b", "branch b", &[]),
            spec("join", "merge branches", &["a", "b"]),
        ],
        None,
    )?;

    assert_eq!(wf.step("a").ok_or("a")?.status, StepStatus::Active);
    assert_eq!(wf.step("b").ok_or("b")?.status, StepStatus::Active);

    complete_step(&mut store, &wf.id, "a", "a done")?;
    let mid = store.get_workflow(&wf.id).ok_or("workflow missing")?;
    assert_eq!(mid.step("join").ok_or("join")?.status, StepStatus::Pending);

    complete_step(&mut store, &wf.id, "b", "b done")?;
    let wf2 = store.get_workflow(&wf.id).ok_or("workflow missing")?;
    assert_eq!(wf2.step("join").ok_or("join")?.status, StepStatus::Active);

    // The join step sees both branch results.
    let content = store
        .task_content(&format!("{}_join", wf.id))
        .ok_or("join content")?;
    assert!(content.contains("a done"));
    assert!(content.contains("b done"));

    complete_step(&mut store, &wf.id, "join", "merged")?;
    let wf3 = store.get_workflow(&wf.id).ok_or("workflow missing")?;
    assert_eq!(wf3.status, WorkflowStatus::Completed);
    Ok(())
}

#[test]
fn any_step_failure_fails_the_workflow_immediately() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    // Diamond: bad and other fan in to join.
    let wf = engine::create_workflow(
        &mut store,
        "diamond",
        vec![
            spec("bad", "will fail", &[]),
            spec("other", "sibling branch", &[]),
            spec("join", "merge", &["bad", "other"]),
        ],
        None,
    )?;

    fail_step(&mut store, &wf.id, "bad")?;

    // One failed step fails the whole workflow in the same call, with the
    // sibling still mid-flight.
    let failed = store.get_workflow(&wf.id).ok_or("workflow missing")?;
    assert_eq!(failed.status, WorkflowStatus::Failed);
    assert_eq!(failed.step("bad").ok_or("bad")?.status, StepStatus::Failed);
    assert_eq!(failed.step("join").ok_or("join")?.status, StepStatus::Skipped);
    assert_eq!(failed.step("other").ok_or("other")?.status, StepStatus::Active);

    // The sibling's record finishes on its own, but a terminal workflow
    // ignores the completion.
    complete_step(&mut store, &wf.id, "other", "fine")?;
    let after = store.get_workflow(&wf.id).ok_or("workflow missing")?;
    assert_eq!(after.status, WorkflowStatus::Failed);
    assert_eq!(after.step("other").ok_or("other")?.status, StepStatus::Active);
    Ok(())
}

#[test]
fn failure_skips_transitive_dependents() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    let wf = engine::create_workflow(
        &mut store,
        "chain-of-three",
        vec![
            spec("bad", "will fail", &[]),
            spec("child", "depends on bad", &["bad"]),
            spec("grandchild", "depends on child", &["child"]),
        ],
        None,
    )?;

    fail_step(&mut store, &wf.id, "bad")?;

    let failed = store.get_workflow(&wf.id).ok_or("workflow missing")?;
    assert_eq!(failed.status, WorkflowStatus::Failed);
    assert_eq!(failed.step("child").ok_or("child")?.status, StepStatus::Skipped);
    assert_eq!(
        failed.step("grandchild").ok_or("grandchild")?.status,
        StepStatus::Skipped
    );
    // No records were ever created for the skipped steps.
    assert!(store.get_record(&format!("{}_child", wf.id)).is_none());
    Ok(())
}

#[test]
fn cancel_fails_active_records_and_skips_the_rest() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    let wf = engine::create_workflow(
        &mut store,
        "cancel-me",
        vec![spec("s1", "start", &[]), spec("s2", "later", &["s1"])],
        None,
    )?;

    // The active step's record is mid-flight when the cancel arrives.
    let s1_uid = format!("{}_s1", wf.id);
    store.claim(&s1_uid, "worker")?;

    assert_eq!(engine::cancel(&mut store, &wf.id)?, WorkflowCancelOutcome::Cancelled);

    let wf = store.get_workflow(&wf.id).ok_or("workflow missing")?;
    assert_eq!(wf.status, WorkflowStatus::Cancelled);
    assert_eq!(wf.step("s1").ok_or("s1")?.status, StepStatus::Skipped);
    assert_eq!(wf.step("s2").ok_or("s2")?.status, StepStatus::Skipped);

    let rec = store.get_record(&s1_uid).ok_or("record missing")?;
    assert_eq!(rec.state, TaskState::Failed);
    assert!(rec.claimed_by.is_none());

    // Cancelling twice is rejected, not an error.
    assert_eq!(
        engine::cancel(&mut store, &wf.id)?,
        WorkflowCancelOutcome::NotCancellable
    );
    assert_eq!(
        engine::cancel(&mut store, "wf_missing")?,
        WorkflowCancelOutcome::NotFound
    );
    Ok(())
}

#[test]
fn pending_step_records_are_removed_on_cancel() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    let wf = engine::create_workflow(
        &mut store,
        "unclaimed",
        vec![spec("s1", "never claimed", &[])],
        None,
    )?;

    // The step is active but its record is still pending, so the cancel
    // removes the record outright.
    engine::cancel(&mut store, &wf.id)?;
    assert!(store.get_record(&format!("{}_s1", wf.id)).is_none());

    let wf = store.get_workflow(&wf.id).ok_or("workflow missing")?;
    assert_eq!(wf.status, WorkflowStatus::Cancelled);
    Ok(())
}

#[test]
fn workflow_step_records_cannot_be_removed_directly() -> TestResult {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    let wf = engine::create_workflow(
        &mut store,
        "guarded",
        vec![spec("s1", "step", &[])],
        None,
    )?;

    let outcome = store.remove(&format!("{}_s1", wf.id))?;
    assert_eq!(outcome, taskdag::store::RemoveOutcome::WorkflowTask);
    Ok(())
}
