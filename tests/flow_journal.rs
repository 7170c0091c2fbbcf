use std::cell::Cell;
use std::rc::Rc;

use flowgraph::flow::{self, FlowOutcome};
use flowgraph::{create_scope, GraphError, ScopeExec};

#[tokio::test]
async fn ctx_run_executes_once_per_key_and_replays_after() {
    let scope = create_scope();
    let calls = Rc::new(Cell::new(0u32));
    let calls2 = calls.clone();

    let job = flow::flow(move |ctx, _deps, _input: ()| {
        let calls = calls2.clone();
        async move {
            let first = ctx
                .run("shared-key", async move {
                    calls.set(calls.get() + 1);
                    Ok::<u32, GraphError>(calls.get())
                })
                .await
                .map_err(flow::FlowError::new)?;
            let second = ctx
                .run("shared-key", async { Ok::<u32, GraphError>(999) })
                .await
                .map_err(flow::FlowError::new)?;
            assert_eq!(*first, *second);
            Ok(FlowOutcome::Ok::<u32, ()>(*first))
        }
    });

    let details = scope.exec(&job, ()).await.unwrap();
    assert!(details.success);
    assert_eq!(details.result, Some(1));
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn sub_flow_runs_in_a_child_context_with_its_own_data_store() {
    let scope = create_scope();

    let child = flow::flow(move |_ctx, _deps, input: u32| async move {
        Ok(FlowOutcome::Ok::<u32, ()>(input * 2))
    });

    let parent = flow::flow(move |ctx, _deps, input: u32| {
        let child = child.clone();
        async move {
            let details = ctx.exec(&child, input).await.map_err(flow::FlowError::new)?;
            Ok(FlowOutcome::Ok::<u32, ()>(details.result.expect("child flow must have succeeded")))
        }
    });

    let details = scope.exec(&parent, 21).await.unwrap();
    assert!(details.success);
    assert_eq!(details.result, Some(42));
    assert_eq!(details.context.depth(), 0);
}

#[tokio::test]
async fn ko_outcomes_are_reported_without_a_graph_error() {
    let scope = create_scope();
    let job = flow::flow(|_ctx, _deps, _input: ()| async {
        Ok(FlowOutcome::Ko::<(), &'static str>("domain failure"))
    });
    let details = scope.exec(&job, ()).await.unwrap();
    assert!(!details.success);
    assert_eq!(details.error, Some("domain failure"));
}
