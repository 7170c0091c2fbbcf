use std::cell::RefCell;
use std::rc::Rc;

use flowgraph::extension::{Extension, Next, Operation};
use flowgraph::{create_scope, provide, GraphError};

struct RecordingExtension {
    label: &'static str,
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl Extension for RecordingExtension {
    fn name(&self) -> &str {
        self.label
    }

    fn wrap(
        &self,
        _op: &Operation,
        _ctx: &Rc<RefCell<flowgraph::DataStore>>,
        next: Next,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Rc<dyn std::any::Any>, GraphError>>>> {
        self.log.borrow_mut().push(self.label);
        next()
    }
}

#[tokio::test]
async fn first_registered_extension_wraps_outermost() {
    let scope = create_scope();
    let log = Rc::new(RefCell::new(Vec::new()));

    scope.use_extension(RecordingExtension { label: "outer", log: log.clone() });
    scope.use_extension(RecordingExtension { label: "inner", log: log.clone() });

    let exec = provide(|_scope, _sink| async { Ok::<_, GraphError>(1u32) }, vec![]);
    scope.resolve(&exec).await.unwrap();

    assert_eq!(*log.borrow(), vec!["outer", "inner"]);
}

struct ShortCircuit;

impl Extension for ShortCircuit {
    fn wrap(
        &self,
        _op: &Operation,
        _ctx: &Rc<RefCell<flowgraph::DataStore>>,
        _next: Next,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Rc<dyn std::any::Any>, GraphError>>>> {
        Box::pin(async { Ok(Rc::new(99u32) as Rc<dyn std::any::Any>) })
    }
}

#[tokio::test]
async fn an_extension_may_short_circuit_without_calling_next() {
    let scope = create_scope();
    scope.use_extension(ShortCircuit);
    let exec = provide(|_scope, _sink| async { Ok::<_, GraphError>(1u32) }, vec![]);
    let v = scope.resolve(&exec).await.unwrap();
    assert_eq!(*v, 99);
}
