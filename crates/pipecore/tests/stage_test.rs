use async_trait::async_trait;
use pipecore::{
    ErrorHandler, EventBus, HandlerChain, LockCoordinator, MemoryLockStore, Message, Params,
    PipelineError, Plugin, PluginError, PluginSpec, SchedulerHandle, Stage, StageContext,
    StageWiring,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Takes the lock named in its config, then fails.
#[derive(Clone)]
struct LockThenFail {
    key: String,
}

#[async_trait]
impl Plugin for LockThenFail {
    fn plugin_type(&self) -> &str {
        "test.lock_then_fail"
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        assert!(ctx.get_lock(&self.key, msg).await?);
        Err(PluginError::ExecutionFailed("boom".to_string()))
    }
}

fn build_stage(store: Arc<MemoryLockStore>, handlers: HandlerChain) -> Arc<Stage> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let events = EventBus::new(16);
    let wiring = StageWiring {
        worker_id: 0,
        locks: LockCoordinator::new(store),
        emitter: events.create_emitter("orders", "charge"),
        scheduler: SchedulerHandle::detached(),
    };
    let plugin = LockThenFail {
        key: "order:7".to_string(),
    };
    Arc::new(Stage::new(
        "orders",
        "charge",
        PluginSpec::new("test.lock_then_fail"),
        Box::new(plugin),
        handlers,
        wiring,
    ))
}

fn counting(counter: &Arc<AtomicUsize>) -> ErrorHandler {
    let counter = Arc::clone(counter);
    ErrorHandler::func(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

#[tokio::test]
async fn test_error_without_handlers_propagates() {
    let store = Arc::new(MemoryLockStore::new());
    let stage = build_stage(store.clone(), HandlerChain::default());

    let result = stage.instance().process(Message::triggered(Params::new())).await;

    match result {
        Err(PipelineError::Plugin { task, key, source }) => {
            assert_eq!(task, "orders");
            assert_eq!(key, "charge");
            assert!(matches!(source, PluginError::ExecutionFailed(_)));
        }
        other => panic!("expected plugin error, got {:?}", other),
    }
    assert!(!store.contains("order:7"));
}

#[tokio::test]
async fn test_handled_error_releases_locks_first() {
    let store = Arc::new(MemoryLockStore::new());
    let seen_locked = Arc::new(AtomicUsize::new(0));

    let probe = {
        let store = store.clone();
        let seen_locked = seen_locked.clone();
        ErrorHandler::func(move |_, _| {
            if store.contains("order:7") {
                seen_locked.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
    };
    let stage = build_stage(store.clone(), HandlerChain::new(vec![probe, ErrorHandler::log()]));

    let result = stage.instance().process(Message::triggered(Params::new())).await;

    assert!(result.is_ok(), "handled failure completes the invocation");
    assert_eq!(seen_locked.load(Ordering::SeqCst), 0, "lock was still held in the chain");
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_chain_stops_at_first_handler_error() {
    let store = Arc::new(MemoryLockStore::new());
    let before = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));

    let chain = HandlerChain::new(vec![
        counting(&before),
        ErrorHandler::func(|_, _| Err(PluginError::Handler {
            handler: "alert".to_string(),
            message: "pager down".to_string(),
        })),
        counting(&after),
    ]);
    let stage = build_stage(store, chain);

    let result = stage.instance().process(Message::triggered(Params::new())).await;

    match result {
        Err(PipelineError::Plugin { source: PluginError::Handler { handler, .. }, .. }) => {
            assert_eq!(handler, "alert");
        }
        other => panic!("expected handler error, got {:?}", other),
    }
    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rethrow_handler_surfaces_stage_error() {
    let store = Arc::new(MemoryLockStore::new());
    let stage = build_stage(store, HandlerChain::new(vec![ErrorHandler::rethrow()]));

    let result = stage.instance().process(Message::triggered(Params::new())).await;

    assert!(matches!(
        result,
        Err(PipelineError::Plugin { source: PluginError::ExecutionFailed(_), .. })
    ));
}
