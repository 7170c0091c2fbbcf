use flowgraph::scope::Mutation;
use flowgraph::{create_scope, derive, provide};

#[tokio::test]
async fn update_replaces_the_value() {
    let scope = create_scope();
    let count = provide(|_scope, _sink| async { Ok::<_, flowgraph::GraphError>(1u32) }, vec![]);
    scope.resolve(&count).await.unwrap();
    let updated = scope.update(&count, Mutation::value(9u32)).await.unwrap();
    assert_eq!(*updated, 9);
}

#[tokio::test]
async fn update_with_mutator_sees_the_previous_value() {
    let scope = create_scope();
    let count = provide(|_scope, _sink| async { Ok::<_, flowgraph::GraphError>(1u32) }, vec![]);
    scope.resolve(&count).await.unwrap();
    let updated = scope
        .update(&count, Mutation::with(|prev| *prev + 41))
        .await
        .unwrap();
    assert_eq!(*updated, 42);
}

#[tokio::test]
async fn reactive_dependents_cascade_on_update() {
    let scope = create_scope();
    let base = provide(|_scope, _sink| async { Ok::<_, flowgraph::GraphError>(1u32) }, vec![]);
    let doubled = derive(
        base.reactive(),
        |deps, _scope, _sink| {
            let base = deps.single::<u32>();
            async move { Ok::<_, flowgraph::GraphError>(*base * 2) }
        },
        vec![],
    );
    scope.resolve(&doubled).await.unwrap();
    scope.update(&base, Mutation::value(21u32)).await.unwrap();
    let v = scope.accessor(&doubled).get().unwrap();
    assert_eq!(*v, 42);
}

#[tokio::test]
async fn on_update_fires_only_after_the_initial_resolve() {
    let scope = create_scope();
    let base = provide(|_scope, _sink| async { Ok::<_, flowgraph::GraphError>(1u32) }, vec![]);
    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let seen2 = seen.clone();
    let _unsub = scope.on_update(&base, move |v: &u32| seen2.borrow_mut().push(*v));
    scope.resolve(&base).await.unwrap();
    assert!(seen.borrow().is_empty());
    scope.update(&base, Mutation::value(2u32)).await.unwrap();
    assert_eq!(*seen.borrow(), vec![2]);
}
