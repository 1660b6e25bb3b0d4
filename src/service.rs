//! Service assembly: configuration in, a running loop and orchestrator out.
//!
//! Startup order matters. Handlers are registered on an owned dispatcher,
//! which is then frozen behind an `Arc`. The bridge is attached to the loop
//! before the orchestrator can hand it to any worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::bridge::{DiagnosticSink, EventBridge, EventLoop, StderrDiagnostics};
use crate::client::{ClientForwarder, ClientHub};
use crate::config::{validation_failure, ServiceConfig};
use crate::dispatch::{EventDispatcher, EventHandler};
use crate::error::ServiceError;
use crate::events::EventKind;
use crate::orchestrator::{ActivityTracker, ExecutionEngine, Orchestrator, SignalRouter};
use crate::sessions::{self, ConversationStore, InMemoryConversationStore, SessionAuthority};

pub struct ServiceBuilder {
    config: ServiceConfig,
    engine: Arc<dyn ExecutionEngine>,
    store: Option<Arc<dyn ConversationStore>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    handlers: Vec<(Option<EventKind>, Arc<dyn EventHandler>)>,
    install_global: bool,
}

impl ServiceBuilder {
    pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Extra handler for one event kind, invoked after the built-in ones.
    pub fn handler(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push((Some(kind), handler));
        self
    }

    pub fn handler_for_all(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push((None, handler));
        self
    }

    /// Also publish the session authority as the process-wide instance.
    pub fn install_global(mut self) -> Self {
        self.install_global = true;
        self
    }

    pub fn start(self) -> Result<Service, ServiceError> {
        let config = self.config;
        config.validate().map_err(validation_failure)?;

        let store: Arc<dyn ConversationStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryConversationStore::new()),
        };
        let authority = Arc::new(SessionAuthority::new(
            store,
            config.sessions.shard_count,
            config.sessions.on_conflict,
        ));
        let hub = Arc::new(ClientHub::new());

        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_all(Arc::new(ActivityTracker::new(authority.clone())));
        dispatcher.register_all(Arc::new(ClientForwarder::new(hub.clone())));
        for (kind, handler) in self.handlers {
            match kind {
                Some(kind) => dispatcher.register(kind, handler),
                None => dispatcher.register_all(handler),
            }
        }
        let dispatcher = Arc::new(dispatcher);
        let router = Arc::new(SignalRouter::new(
            dispatcher.clone(),
            config.progress_profiles()?,
        ));

        let diagnostics: Arc<dyn DiagnosticSink> = match self.diagnostics {
            Some(diagnostics) => diagnostics,
            None => Arc::new(StderrDiagnostics),
        };
        let bridge = EventBridge::new(diagnostics);
        let event_loop = EventLoop::start(&bridge, router.clone())?;

        if self.install_global {
            sessions::install_global(authority.clone())?;
        }

        let orchestrator = Arc::new(Orchestrator::new(
            authority.clone(),
            bridge.clone(),
            self.engine,
            router.clone(),
            hub.clone(),
            config.orchestrator_settings(),
        ));

        let sweeper = config.sweep_interval().map(|interval| {
            let authority = authority.clone();
            let router = router.clone();
            let hub = hub.clone();
            let max_idle = config.idle_timeout();
            event_loop.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // The first tick completes immediately.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    // Already on the loop thread: the router is touched directly.
                    for session_id in authority.sweep_idle(max_idle) {
                        router.forget(&session_id);
                        hub.disconnect(&session_id);
                    }
                }
            })
        });

        info!(
            shard_count = config.sessions.shard_count,
            handler_kinds = dispatcher.table().kinds().len(),
            "service started"
        );

        Ok(Service {
            config,
            authority,
            dispatcher,
            router,
            hub,
            orchestrator,
            bridge,
            event_loop: Some(event_loop),
            sweeper,
            global_installed: self.install_global,
        })
    }
}

pub struct Service {
    config: ServiceConfig,
    authority: Arc<SessionAuthority>,
    dispatcher: Arc<EventDispatcher>,
    router: Arc<SignalRouter>,
    hub: Arc<ClientHub>,
    orchestrator: Arc<Orchestrator>,
    bridge: EventBridge,
    event_loop: Option<EventLoop>,
    sweeper: Option<tokio::task::JoinHandle<()>>,
    global_installed: bool,
}

impl Service {
    pub fn builder(config: ServiceConfig, engine: Arc<dyn ExecutionEngine>) -> ServiceBuilder {
        ServiceBuilder {
            config,
            engine,
            store: None,
            diagnostics: None,
            handlers: Vec::new(),
            install_global: false,
        }
    }

    pub fn start(
        config: ServiceConfig,
        engine: Arc<dyn ExecutionEngine>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self, ServiceError> {
        Self::builder(config, engine).store(store).start()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn authority(&self) -> &Arc<SessionAuthority> {
        &self.authority
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn router(&self) -> &Arc<SignalRouter> {
        &self.router
    }

    pub fn hub(&self) -> &Arc<ClientHub> {
        &self.hub
    }

    pub fn bridge(&self) -> &EventBridge {
        &self.bridge
    }

    /// Wait until everything submitted so far has been delivered.
    pub fn sync(&self, timeout: Duration) -> bool {
        self.event_loop
            .as_ref()
            .map(|event_loop| event_loop.sync(timeout))
            .unwrap_or(false)
    }

    /// Cancel runs in flight, give them `grace` to report their terminal
    /// events, then stop the loop and release every session.
    pub fn shutdown(mut self, grace: Duration) {
        let cancelled = self.orchestrator.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "waiting for runs to stop");
            let deadline = Instant::now() + grace;
            while self.orchestrator.running() > 0 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if self.orchestrator.running() > 0 {
                warn!(
                    remaining = self.orchestrator.running(),
                    "runs still active at shutdown"
                );
            }
        }

        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        if let Some(event_loop) = self.event_loop.take() {
            event_loop.shutdown();
        }

        let evicted = if self.global_installed {
            sessions::teardown_global()
        } else {
            self.authority.evict_all()
        };
        let stats = self.bridge.stats();
        info!(
            evicted,
            submitted = stats.submitted,
            dropped = stats.dropped,
            "service stopped"
        );
    }
}
