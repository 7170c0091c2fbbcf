use flowgraph::Promised;

#[tokio::test]
async fn ready_and_map_transform_the_success_value() {
    let p = Promised::<u32, &'static str>::ready(2).map(|v| v * 10);
    assert_eq!(p.await, Ok(20));
}

#[tokio::test]
async fn err_and_map_error_transform_the_error_value() {
    let p = Promised::<u32, &'static str>::err("boom").map_error(|e| format!("{e}!"));
    assert_eq!(p.await, Err("boom!".to_string()));
}

#[tokio::test]
async fn switch_chains_into_another_promised_on_success() {
    let p = Promised::<u32, &'static str>::ready(2)
        .switch(|v| Promised::ready(v + 1));
    assert_eq!(p.await, Ok(3));
}

#[tokio::test]
async fn switch_error_short_circuits_on_success_and_chains_on_failure() {
    let recovered = Promised::<u32, &'static str>::err("boom")
        .switch_error(|_e| Promised::<u32, &'static str>::ready(99));
    assert_eq!(recovered.await, Ok(99));
}

#[tokio::test]
async fn catch_recovers_an_error_into_a_success_value() {
    let p = Promised::<u32, &'static str>::err("boom").catch(|_e| 7);
    assert_eq!(p.await, Ok(7));
}

#[tokio::test]
async fn all_fails_fast_on_the_first_error() {
    let items = vec![
        Promised::<u32, &'static str>::ready(1),
        Promised::<u32, &'static str>::err("bad"),
        Promised::<u32, &'static str>::ready(3),
    ];
    let result = Promised::all(items).await;
    assert_eq!(result, Err("bad"));
}

#[tokio::test]
async fn all_settled_preserves_order_and_never_errors() {
    let items = vec![
        Promised::<u32, &'static str>::ready(1),
        Promised::<u32, &'static str>::err("bad"),
        Promised::<u32, &'static str>::ready(3),
    ];
    let result = Promised::all_settled(items).await.unwrap();
    assert_eq!(result, vec![Ok(1), Err("bad"), Ok(3)]);
}

#[tokio::test]
async fn race_resolves_with_whichever_settles_first() {
    let items = vec![Promised::<u32, &'static str>::ready(1)];
    let result = Promised::race(items).await;
    assert_eq!(result, Ok(1));
}
