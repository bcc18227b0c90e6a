//! Typed event dispatch over the worker pool
//!
//! Strategies, order managers and market-data adapters exchange events
//! without knowing about each other: publishers hand an event to the bus,
//! the bus submits one pool task per subscribed handler. The bus itself
//! holds no threads; the pool executes everything.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

use parking_lot::RwLock;
use pool::{PoolConfig, PoolResult, ThreadPool};
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;
use tracing::warn;

/// Marker trait for events that can travel through the bus
pub trait BusEvent: Any + Send + Sync + 'static {}

impl<T: Any + Send + Sync + 'static> BusEvent for T {}

type DynEvent = dyn Any + Send + Sync;
type Handler = Arc<dyn Fn(&DynEvent) + Send + Sync>;

/// Process-wide bus instance; populated lazily, torn down explicitly.
static GLOBAL: RwLock<Option<Arc<EventBus>>> = RwLock::new(None);

/// Dispatches typed events to subscribed handlers on a shared thread pool
pub struct EventBus {
    pool: Arc<ThreadPool>,
    handlers: RwLock<FxHashMap<TypeId, Vec<Handler>>>,
}

impl EventBus {
    /// Create a bus that executes handlers on the given pool
    #[must_use]
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        Self {
            pool,
            handlers: RwLock::new(FxHashMap::default()),
        }
    }

    /// The process-wide bus, created on first use with a default pool
    ///
    /// # Errors
    /// Fails if the backing pool cannot spawn its workers.
    pub fn global() -> PoolResult<Arc<Self>> {
        if let Some(bus) = GLOBAL.read().as_ref() {
            return Ok(Arc::clone(bus));
        }

        let mut slot = GLOBAL.write();
        if let Some(bus) = slot.as_ref() {
            return Ok(Arc::clone(bus));
        }
        let pool = Arc::new(ThreadPool::with_config(PoolConfig {
            thread_name_prefix: "bus-worker".to_string(),
            ..PoolConfig::default()
        })?);
        let bus = Arc::new(Self::new(pool));
        *slot = Some(Arc::clone(&bus));
        Ok(bus)
    }

    /// Tear down the process-wide bus, draining in-flight handlers
    ///
    /// Intended for program exit. Publishing on a retained reference after
    /// teardown dispatches nothing.
    pub fn shutdown_global() {
        if let Some(bus) = GLOBAL.write().take() {
            bus.pool.stop(true);
        }
    }

    /// Register a handler for events of type `E`
    ///
    /// Handlers run on pool workers; a handler must not wait for the bus to
    /// go idle, or it deadlocks the pool.
    pub fn subscribe<E: BusEvent>(&self, handler: impl Fn(&E) + Send + Sync + 'static) {
        let erased: Handler = Arc::new(move |event: &DynEvent| {
            if let Some(event) = event.downcast_ref::<E>() {
                handler(event);
            }
        });
        self.handlers
            .write()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(erased);
    }

    /// Publish an event, dispatching one pool task per subscribed handler
    ///
    /// Returns the number of handlers the event was dispatched to. An event
    /// type nobody subscribed to dispatches to zero handlers; a stopped
    /// pool is logged and reports zero or a partial count.
    pub fn publish<E: BusEvent>(&self, event: E) -> usize {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.read();
            match handlers.get(&TypeId::of::<E>()) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };

        let event: Arc<DynEvent> = Arc::new(event);
        let mut dispatched = 0;
        for handler in snapshot {
            let event = Arc::clone(&event);
            match self.pool.submit(move || (*handler)(event.as_ref())) {
                Ok(_handle) => dispatched += 1,
                Err(err) => {
                    warn!("event dropped, pool rejected handler dispatch: {err}");
                    break;
                }
            }
        }
        dispatched
    }

    /// Suspend until every dispatched handler has run
    pub fn wait_idle(&self) {
        self.pool.wait_all();
    }
}
