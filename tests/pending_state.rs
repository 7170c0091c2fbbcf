use std::rc::Rc;

use tokio::sync::Notify;
use tokio_test::{assert_pending, assert_ready};

use flowgraph::flow::{self, FlowOutcome};
use flowgraph::{create_scope, provide, ScopeExec};

#[tokio::test]
async fn resolve_stays_pending_until_the_factory_is_driven() {
    let scope = create_scope();
    let notify = Rc::new(Notify::new());
    let waiter = Rc::clone(&notify);
    let exec = provide(
        move |_scope, _sink| {
            let notify = Rc::clone(&waiter);
            async move {
                notify.notified().await;
                Ok::<_, flowgraph::GraphError>(42u32)
            }
        },
        vec![],
    );

    let mut task = tokio_test::task::spawn(scope.resolve(&exec));
    assert_pending!(task.poll());

    notify.notify_one();
    let value = assert_ready!(task.poll()).unwrap();
    assert_eq!(*value, 42);
}

#[tokio::test]
async fn exec_stays_pending_until_the_flow_is_driven() {
    let scope = create_scope();
    let notify = Rc::new(Notify::new());
    let waiter = Rc::clone(&notify);
    let gated = flow::flow(move |_ctx, _deps, input: u32| {
        let notify = Rc::clone(&waiter);
        async move {
            notify.notified().await;
            Ok(FlowOutcome::Ok::<u32, &'static str>(input))
        }
    });

    let mut task = tokio_test::task::spawn(scope.exec(&gated, 5).into_future());
    assert_pending!(task.poll());

    notify.notify_one();
    let details = assert_ready!(task.poll()).unwrap();
    assert_eq!(details.result, Some(5));
}
