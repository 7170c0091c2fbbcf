use std::cell::Cell;
use std::rc::Rc;

use flowgraph::{create_scope_with, preset, preset_with, provide, ScopeOptions};

#[tokio::test]
async fn preset_value_is_returned_without_running_the_factory() {
    let calls = Rc::new(Cell::new(0u32));
    let calls2 = Rc::clone(&calls);
    let exec = provide(
        move |_scope, _sink| {
            let calls = Rc::clone(&calls2);
            async move {
                calls.set(calls.get() + 1);
                Ok::<_, flowgraph::GraphError>(0u32)
            }
        },
        vec![],
    );

    let scope = create_scope_with(ScopeOptions {
        initial_values: vec![preset(&exec, 99u32)],
        ..Default::default()
    });

    let value = scope.resolve(&exec).await.unwrap();
    assert_eq!(*value, 99);
    assert_eq!(calls.get(), 0, "factory must never run when a preset value is supplied");
}

#[tokio::test]
async fn preset_with_runs_its_own_factory_instead_of_the_executors() {
    let calls = Rc::new(Cell::new(0u32));
    let calls2 = Rc::clone(&calls);
    let exec = provide(
        move |_scope, _sink| {
            let calls = Rc::clone(&calls2);
            async move {
                calls.set(calls.get() + 1);
                Ok::<_, flowgraph::GraphError>(0u32)
            }
        },
        vec![],
    );

    let preset_calls = Rc::new(Cell::new(0u32));
    let preset_calls2 = Rc::clone(&preset_calls);
    let scope = create_scope_with(ScopeOptions {
        initial_values: vec![preset_with(&exec, move |_scope, _sink| {
            let preset_calls = Rc::clone(&preset_calls2);
            async move {
                preset_calls.set(preset_calls.get() + 1);
                Ok::<_, flowgraph::GraphError>(7u32)
            }
        })],
        ..Default::default()
    });

    let value = scope.resolve(&exec).await.unwrap();
    assert_eq!(*value, 7);
    assert_eq!(calls.get(), 0, "the executor's own factory must never run");
    assert_eq!(preset_calls.get(), 1);

    scope.resolve(&exec).await.unwrap();
    assert_eq!(preset_calls.get(), 1, "resolution stays memoized after a preset factory runs");
}
