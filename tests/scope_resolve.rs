use flowgraph::{create_scope, derive, provide};

#[tokio::test]
async fn resolves_a_value_executor() {
    let scope = create_scope();
    let count = provide(|_scope, _sink| async { Ok::<_, flowgraph::GraphError>(7u32) }, vec![]);
    let v = scope.resolve(&count).await.unwrap();
    assert_eq!(*v, 7);
}

#[tokio::test]
async fn resolve_is_idempotent_and_memoized() {
    let scope = create_scope();
    let calls = std::rc::Rc::new(std::cell::Cell::new(0u32));
    let calls2 = calls.clone();
    let count = provide(
        move |_scope, _sink| {
            let calls = calls2.clone();
            async move {
                calls.set(calls.get() + 1);
                Ok::<_, flowgraph::GraphError>(1u32)
            }
        },
        vec![],
    );
    scope.resolve(&count).await.unwrap();
    scope.resolve(&count).await.unwrap();
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn derive_resolves_its_single_dependency_first() {
    let scope = create_scope();
    let base = provide(|_scope, _sink| async { Ok::<_, flowgraph::GraphError>(10u32) }, vec![]);
    let doubled = derive(
        base.clone(),
        |deps, _scope, _sink| {
            let base = deps.single::<u32>();
            async move { Ok::<_, flowgraph::GraphError>(*base * 2) }
        },
        vec![],
    );
    let v = scope.resolve(&doubled).await.unwrap();
    assert_eq!(*v, 20);
}

#[tokio::test]
async fn release_then_resolve_reruns_the_factory() {
    let scope = create_scope();
    let calls = std::rc::Rc::new(std::cell::Cell::new(0u32));
    let calls2 = calls.clone();
    let exec = provide(
        move |_scope, _sink| {
            let calls = calls2.clone();
            async move {
                calls.set(calls.get() + 1);
                Ok::<_, flowgraph::GraphError>(calls.get())
            }
        },
        vec![],
    );
    let first = scope.resolve(&exec).await.unwrap();
    assert_eq!(*first, 1);
    scope.release(&exec);
    let second = scope.resolve(&exec).await.unwrap();
    assert_eq!(*second, 2);
}
