use flowgraph::{create_scope, provide};

#[tokio::test]
async fn release_runs_registered_cleanup() {
    let scope = create_scope();
    let cleaned = std::rc::Rc::new(std::cell::Cell::new(false));
    let cleaned2 = cleaned.clone();
    let exec = provide(
        move |_scope, sink| {
            let cleaned = cleaned2.clone();
            async move {
                sink.on_cleanup_infallible(move || cleaned.set(true));
                Ok::<_, flowgraph::GraphError>(1u32)
            }
        },
        vec![],
    );
    scope.resolve(&exec).await.unwrap();
    assert!(!cleaned.get());
    scope.release(&exec);
    assert!(cleaned.get());
}

#[tokio::test]
async fn update_runs_cleanup_before_recomputing() {
    let scope = create_scope();
    let cleaned = std::rc::Rc::new(std::cell::Cell::new(0u32));
    let cleaned2 = cleaned.clone();
    let exec = provide(
        move |_scope, sink| {
            let cleaned = cleaned2.clone();
            async move {
                sink.on_cleanup_infallible(move || cleaned.set(cleaned.get() + 1));
                Ok::<_, flowgraph::GraphError>(1u32)
            }
        },
        vec![],
    );
    scope.resolve(&exec).await.unwrap();
    scope
        .update(&exec, flowgraph::scope::Mutation::value(2u32))
        .await
        .unwrap();
    assert_eq!(cleaned.get(), 1);
}

#[tokio::test]
async fn dispose_runs_cleanups_in_reverse_resolution_order() {
    let scope = create_scope();
    let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

    let order_a = order.clone();
    let a = provide(
        move |_scope, sink| {
            let order = order_a.clone();
            async move {
                sink.on_cleanup_infallible(move || order.borrow_mut().push("a"));
                Ok::<_, flowgraph::GraphError>(())
            }
        },
        vec![],
    );
    let order_b = order.clone();
    let b = provide(
        move |_scope, sink| {
            let order = order_b.clone();
            async move {
                sink.on_cleanup_infallible(move || order.borrow_mut().push("b"));
                Ok::<_, flowgraph::GraphError>(())
            }
        },
        vec![],
    );

    scope.resolve(&a).await.unwrap();
    scope.resolve(&b).await.unwrap();
    scope.dispose();

    assert_eq!(*order.borrow(), vec!["b", "a"]);
}
