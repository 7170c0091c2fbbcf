use flowgraph::{custom, tag, Accept, DataStore, GraphError, Predicate, TagOptions};

#[test]
fn find_falls_back_to_the_configured_default() {
    let t = tag(
        Accept,
        TagOptions { default: Some(7u32), label: Some("retries") },
    );
    let store = DataStore::new();
    assert_eq!(t.find(&store), Some(7));
}

#[test]
fn get_fails_with_tag_not_found_when_no_default_and_no_entry() {
    let t = tag::<u32>(Accept, TagOptions { default: None, label: Some("retries") });
    let store = DataStore::new();
    let err = t.get(&store).unwrap_err();
    assert!(matches!(err, GraphError::TagNotFound { label: "retries" }));
}

#[test]
fn set_then_find_returns_the_first_pushed_value() {
    let t = tag::<u32>(Accept, TagOptions::default());
    let mut store = DataStore::new();
    t.set(&mut store, 1).unwrap();
    t.set(&mut store, 2).unwrap();
    assert_eq!(t.find(&store), Some(1));
    assert_eq!(t.some(&store), vec![1, 2]);
}

#[test]
fn predicate_validator_rejects_values_that_fail_the_check() {
    let t = tag(Predicate::new("must be positive", |v: &i32| *v > 0), TagOptions::default());
    let mut store = DataStore::new();
    assert!(t.set(&mut store, 5).is_ok());
    let err = t.set(&mut store, -1).unwrap_err();
    assert!(matches!(err, GraphError::SchemaValidationError { .. }));
}

#[test]
fn custom_validator_can_transform_the_value() {
    let t = tag(custom(|v: i32| Ok(v.abs())), TagOptions::default());
    let mut store = DataStore::new();
    t.set(&mut store, -5).unwrap();
    assert_eq!(t.find(&store), Some(5));
}

#[test]
fn data_store_extend_preserves_both_histories() {
    let t = tag::<u32>(Accept, TagOptions::default());
    let mut a = DataStore::new();
    t.set(&mut a, 1).unwrap();
    let mut b = DataStore::new();
    t.set(&mut b, 2).unwrap();
    a.extend(b);
    assert_eq!(t.some(&a), vec![1, 2]);
}
