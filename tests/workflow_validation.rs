use taskdag::workflow::model::{validate_steps, StepSpec, MAX_STEPS};

fn spec(id: &str, depends_on: &[&str]) -> StepSpec {
    StepSpec {
        id: id.to_string(),
        name: None,
        task_content: format!("do {id}"),
        task_category: None,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn accepts_a_valid_dag() {
    let steps = vec![
        spec("a", &[]),
        spec("b", &["a"]),
        spec("c", &["a"]),
        spec("d", &["b", "c"]),
    ];
    assert!(validate_steps(&steps).is_ok());
}

#[test]
fn rejects_an_empty_step_list() {
    assert!(validate_steps(&[]).is_err());
}

#[test]
fn rejects_too_many_steps() {
    let steps: Vec<StepSpec> = (0..=MAX_STEPS).map(|i| spec(&format!("s{i}"), &[])).collect();
    let err = validate_steps(&steps).unwrap_err();
    assert!(err.to_string().contains("steps"));
}

#[test]
fn rejects_duplicate_step_ids() {
    let steps = vec![spec("a", &[]), spec("a", &[])];
    assert!(validate_steps(&steps).is_err());
}

#[test]
fn rejects_unknown_dependencies() {
    let steps = vec![spec("a", &["ghost"])];
    let err = validate_steps(&steps).unwrap_err();
    assert!(err.to_string().contains("ghost"));
}

#[test]
fn rejects_empty_id_or_content() {
    assert!(validate_steps(&[spec("", &[])]).is_err());

    let mut no_content = spec("a", &[]);
    no_content.task_content = String::new();
    assert!(validate_steps(&[no_content]).is_err());
}

#[test]
fn rejects_direct_and_indirect_cycles() {
    // a -> a
    assert!(validate_steps(&[spec("a", &["a"])]).is_err());

    // a -> b -> c -> a
    let steps = vec![spec("a", &["c"]), spec("b", &["a"]), spec("c", &["b"])];
    assert!(validate_steps(&steps).is_err());
}
