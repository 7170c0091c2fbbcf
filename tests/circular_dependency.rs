use flowgraph::{create_scope, derive, Executor, GraphError};

#[tokio::test]
async fn tied_forward_ref_cycle_is_rejected_at_resolve_time() {
    let (a, fwd) = Executor::forward_ref::<u32, u32, _, _>(
        |deps, _scope, _sink| {
            let b = deps.single::<u32>();
            async move { Ok::<_, GraphError>(*b + 1) }
        },
        vec![],
    );

    let b = derive(
        a.clone(),
        |deps, _scope, _sink| {
            let a = deps.single::<u32>();
            async move { Ok::<_, GraphError>(*a + 1) }
        },
        vec![],
    );

    fwd.tie(b.clone());

    let scope = create_scope();
    let err = scope.resolve(&a).await.unwrap_err();
    assert!(matches!(err, GraphError::CircularDependency { .. }));
}

#[tokio::test]
async fn untied_forward_ref_fails_with_a_distinct_error() {
    let (a, _fwd) = Executor::forward_ref::<u32, u32, _, _>(
        |deps, _scope, _sink| {
            let _: std::rc::Rc<u32> = deps.single::<u32>();
            async move { Ok::<_, GraphError>(0u32) }
        },
        vec![],
    );
    let scope = create_scope();
    let err = scope.resolve(&a).await.unwrap_err();
    assert!(matches!(err, GraphError::ForwardRefNotTied { .. }));
}
