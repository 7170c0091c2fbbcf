use flowgraph::flow::{self, FlowOutcome, ParallelItem, ParallelKind};
use flowgraph::{create_scope, ScopeExec};

#[tokio::test]
async fn parallel_reports_all_ok_when_every_branch_succeeds() {
    let scope = create_scope();
    let child = flow::flow(|_ctx, _deps, input: u32| async move {
        Ok(FlowOutcome::Ok::<u32, &'static str>(input * 2))
    });

    let parent = flow::flow(move |ctx, _deps, inputs: Vec<u32>| {
        let child = child.clone();
        async move {
            let pending = inputs.into_iter().map(|i| ctx.exec(&child, i)).collect();
            let outcome = ctx.parallel(pending).await.map_err(flow::FlowError::new)?;
            Ok(FlowOutcome::Ok::<usize, &'static str>(outcome.stats.succeeded))
        }
    });

    let details = scope.exec(&parent, vec![1, 2, 3]).await.unwrap();
    assert!(details.success);
    assert_eq!(details.result, Some(3));
}

#[tokio::test]
async fn parallel_classifies_partial_and_all_ko() {
    let scope = create_scope();
    let flaky = flow::flow(|_ctx, _deps, input: u32| async move {
        if input % 2 == 0 {
            Ok(FlowOutcome::Ok::<u32, &'static str>(input))
        } else {
            Ok(FlowOutcome::Ko::<u32, &'static str>("odd"))
        }
    });

    let mixed = flow::flow(move |ctx, _deps, inputs: Vec<u32>| {
        let flaky = flaky.clone();
        async move {
            let pending = inputs.into_iter().map(|i| ctx.exec(&flaky, i)).collect();
            let outcome = ctx.parallel(pending).await.map_err(flow::FlowError::new)?;
            Ok(FlowOutcome::Ok::<ParallelKind, &'static str>(outcome.kind))
        }
    });

    let details = scope.exec(&mixed, vec![1, 2]).await.unwrap();
    assert_eq!(details.result, Some(ParallelKind::Partial));

    let all_ko = flow::flow(move |ctx, _deps, inputs: Vec<u32>| {
        let flaky = flaky_all_ko();
        async move {
            let pending = inputs.into_iter().map(|i| ctx.exec(&flaky, i)).collect();
            let outcome = ctx.parallel(pending).await.map_err(flow::FlowError::new)?;
            Ok(FlowOutcome::Ok::<ParallelKind, &'static str>(outcome.kind))
        }
    });
    let details = scope.exec(&all_ko, vec![1, 3]).await.unwrap();
    assert_eq!(details.result, Some(ParallelKind::AllKo));
}

fn flaky_all_ko() -> flowgraph::flow::FlowImpl<u32, u32, &'static str> {
    flow::flow(|_ctx, _deps, _input: u32| async move {
        Ok(FlowOutcome::Ko::<u32, &'static str>("always fails"))
    })
}

#[tokio::test]
async fn parallel_settled_never_errors_and_reports_per_item_stats() {
    let scope = create_scope();
    let child = flow::flow(|_ctx, _deps, input: u32| async move {
        if input == 0 {
            Ok(FlowOutcome::Ko::<u32, &'static str>("zero"))
        } else {
            Ok(FlowOutcome::Ok::<u32, &'static str>(input))
        }
    });

    let parent = flow::flow(move |ctx, _deps, inputs: Vec<u32>| {
        let child = child.clone();
        async move {
            let pending = inputs.into_iter().map(|i| ctx.exec(&child, i)).collect();
            let settled = ctx.parallel_settled(pending).await;
            Ok(FlowOutcome::Ok::<(usize, usize), &'static str>((
                settled.stats.succeeded,
                settled.stats.failed,
            )))
        }
    });

    let details = scope.exec(&parent, vec![0, 1, 2]).await.unwrap();
    assert!(details.success);
    assert_eq!(details.result, Some((2, 1)));
}

#[tokio::test]
async fn execute_parallel_runs_plain_functions_inline() {
    let scope = create_scope();
    let parent = flow::flow(|ctx, _deps, _input: ()| async move {
        let items = vec![
            ParallelItem::sync(|| FlowOutcome::Ok::<u32, &'static str>(1)),
            ParallelItem::sync(|| FlowOutcome::Ko::<u32, &'static str>("nope")),
            ParallelItem::sync(|| FlowOutcome::Ok::<u32, &'static str>(3)),
        ];
        let results = ctx.execute_parallel(items).await.map_err(flow::FlowError::new)?;
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        Ok(FlowOutcome::Ok::<usize, &'static str>(ok_count))
    });

    let details = scope.exec(&parent, ()).await.unwrap();
    assert!(details.success);
    assert_eq!(details.result, Some(2));
}

#[tokio::test]
async fn execute_parallel_mixes_plain_functions_and_flows() {
    let scope = create_scope();
    let child = flow::flow(|_ctx, _deps, input: u32| async move {
        Ok(FlowOutcome::Ok::<u32, &'static str>(input * 10))
    });

    let parent = flow::flow(move |ctx, _deps, _input: ()| {
        let child = child.clone();
        async move {
            let items = vec![
                ParallelItem::sync(|| FlowOutcome::Ok::<u32, &'static str>(1)),
                ParallelItem::flow(ctx.exec(&child, 2)),
            ];
            let results = ctx.execute_parallel(items).await.map_err(flow::FlowError::new)?;
            let values: Vec<u32> = results
                .into_iter()
                .map(|r| match r {
                    FlowOutcome::Ok(v) => v,
                    FlowOutcome::Ko(_) => 0,
                })
                .collect();
            Ok(FlowOutcome::Ok::<Vec<u32>, &'static str>(values))
        }
    });

    let details = scope.exec(&parent, ()).await.unwrap();
    assert!(details.success);
    assert_eq!(details.result, Some(vec![1, 20]));
}
