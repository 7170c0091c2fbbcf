use std::cell::Cell;
use std::rc::Rc;

use flowgraph::{create_scope, provide};

#[tokio::test]
async fn concurrent_resolves_share_one_factory_invocation() {
    let scope = create_scope();
    let calls = Rc::new(Cell::new(0u32));
    let calls2 = Rc::clone(&calls);
    let exec = provide(
        move |_scope, _sink| {
            let calls = Rc::clone(&calls2);
            async move {
                calls.set(calls.get() + 1);
                // Yields once so the first `resolve` leaves a `Pending`
                // container behind before either call completes, forcing
                // the second `resolve` below to observe and await it
                // rather than invoking the factory again.
                tokio::task::yield_now().await;
                Ok::<_, flowgraph::GraphError>(123u32)
            }
        },
        vec![],
    );

    let (a, b) = tokio::join!(scope.resolve(&exec), scope.resolve(&exec));

    assert_eq!(*a.unwrap(), 123);
    assert_eq!(*b.unwrap(), 123);
    assert_eq!(calls.get(), 1, "factory must run exactly once for concurrent resolves");
}
