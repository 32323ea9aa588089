//! # Change-event dispatcher
//!
//! Re-runs [`compile`] when the mesh changes. Producers send [`ChangeEvent`]s
//! to one queue; a router task fans them out to one worker task per
//! connected proxy. The router hands each worker the newest source through a
//! `watch` channel and never waits on it, so a slow worker folds pending
//! changes into its next pass without holding up the others. Compilation runs
//! on the blocking pool. Each worker publishes its latest result through a
//! second `watch` channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::catalog::PolicySource;
use crate::certificate::CertificateManager;
use crate::compiler::compile;
use crate::config::CompilerConfig;
use crate::domain::{Proxy, ServiceIdentity};
use crate::xds::CompiledResources;
use crate::{Error, Result};

/// Latest compilation outcome of one proxy.
#[derive(Debug, Clone, Default)]
pub struct ProxyState {
    /// Last successfully compiled resources.
    pub resources: Option<Arc<CompiledResources>>,
    /// Error of the most recent pass, cleared by the next successful one.
    pub last_error: Option<String>,
    /// Number of passes run so far.
    pub generation: u64,
}

pub type StateReceiver = watch::Receiver<ProxyState>;

/// Something that may change the resources of connected proxies.
pub enum ChangeEvent {
    /// The policy objects were replaced; every proxy is recompiled.
    SnapshotReplaced(Arc<dyn PolicySource>),
    /// Mesh-wide switches changed in the current source.
    MeshConfigChanged,
    ProxyConnected { proxy: Proxy, publisher: watch::Sender<ProxyState> },
    /// Stops the worker of the proxy with this id.
    ProxyDisconnected(String),
    /// Certificates of this identity were reissued.
    CertificateRotated(ServiceIdentity),
}

impl fmt::Debug for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEvent::SnapshotReplaced(_) => f.write_str("SnapshotReplaced"),
            ChangeEvent::MeshConfigChanged => f.write_str("MeshConfigChanged"),
            ChangeEvent::ProxyConnected { proxy, .. } => write!(f, "ProxyConnected({})", proxy.id),
            ChangeEvent::ProxyDisconnected(id) => write!(f, "ProxyDisconnected({})", id),
            ChangeEvent::CertificateRotated(identity) => write!(f, "CertificateRotated({})", identity),
        }
    }
}

struct ProxyWorker {
    identity: ServiceIdentity,
    /// Latest source; every send marks a pending pass.
    source: watch::Sender<Arc<dyn PolicySource>>,
    handle: JoinHandle<()>,
}

/// Shared, read-only inputs of every compilation.
#[derive(Clone)]
struct CompileContext {
    config: Arc<CompilerConfig>,
    certificates: Option<Arc<dyn CertificateManager>>,
}

/// Handle for sending events to a running dispatcher.
pub struct DispatcherHandle {
    events: mpsc::Sender<ChangeEvent>,
    shutdown_tx: watch::Sender<bool>,
    router: JoinHandle<()>,
}

impl DispatcherHandle {
    pub async fn send(&self, event: ChangeEvent) -> Result<()> {
        self.events.send(event).await.map_err(|_| Error::internal("Dispatcher is not running"))
    }

    /// Registers `proxy` and returns the channel its resources are published on.
    pub async fn connect(&self, proxy: Proxy) -> Result<StateReceiver> {
        let (publisher, receiver) = watch::channel(ProxyState::default());
        self.send(ChangeEvent::ProxyConnected { proxy, publisher }).await?;
        Ok(receiver)
    }

    pub async fn disconnect(&self, proxy_id: impl Into<String>) -> Result<()> {
        self.send(ChangeEvent::ProxyDisconnected(proxy_id.into())).await
    }

    /// Signals the router and every worker to stop.
    pub fn shutdown(&self) {
        info!("Initiating dispatcher shutdown");
        let _ = self.shutdown_tx.send(true);
    }

    /// Waits for the router and its workers to finish.
    pub async fn join(self) {
        drop(self.events);
        if let Err(e) = self.router.await {
            error!(error = %e, "Dispatcher router task failed");
        }
    }
}

pub struct Dispatcher {
    context: CompileContext,
    source: Arc<dyn PolicySource>,
    workers: HashMap<String, ProxyWorker>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Dispatcher {
    /// Starts the router task.
    pub fn spawn(
        config: CompilerConfig,
        source: Arc<dyn PolicySource>,
        certificates: Option<Arc<dyn CertificateManager>>,
    ) -> DispatcherHandle {
        let (events_tx, events_rx) = mpsc::channel(config.dispatcher.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = Dispatcher {
            context: CompileContext { config: Arc::new(config), certificates },
            source,
            workers: HashMap::new(),
            shutdown_rx,
        };
        let router = tokio::spawn(dispatcher.run(events_rx));

        DispatcherHandle { events: events_tx, shutdown_tx, router }
    }

    async fn run(mut self, mut events: mpsc::Receiver<ChangeEvent>) {
        info!("Dispatcher started");
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        let workers = std::mem::take(&mut self.workers);
        let count = workers.len();
        for (_, worker) in workers {
            drop(worker.source);
            if let Err(e) = worker.handle.await {
                error!(error = %e, "Proxy worker task failed");
            }
        }
        info!(workers = count, "Dispatcher stopped");
    }

    fn handle(&mut self, event: ChangeEvent) {
        debug!(event = ?event, "Dispatching change event");
        match event {
            ChangeEvent::SnapshotReplaced(source) => {
                self.source = source;
                self.recompile(|_| true);
            }
            ChangeEvent::MeshConfigChanged => self.recompile(|_| true),
            ChangeEvent::CertificateRotated(identity) => self.recompile(|w| w.identity == identity),
            ChangeEvent::ProxyConnected { proxy, publisher } => self.connect(proxy, publisher),
            ChangeEvent::ProxyDisconnected(id) => match self.workers.remove(&id) {
                Some(worker) => {
                    drop(worker.source);
                    info!(proxy_id = %id, "Proxy disconnected");
                }
                None => warn!(proxy_id = %id, "Disconnect for unknown proxy"),
            },
        }
    }

    fn connect(&mut self, proxy: Proxy, publisher: watch::Sender<ProxyState>) {
        let id = proxy.id.clone();
        if self.workers.remove(&id).is_some() {
            info!(proxy_id = %id, "Proxy reconnected, replacing its worker");
        }

        let (source, source_rx) = watch::channel(Arc::clone(&self.source));
        let identity = proxy.identity.clone();
        let handle = tokio::spawn(run_worker(
            proxy,
            self.context.clone(),
            source_rx,
            publisher,
            self.shutdown_rx.clone(),
        ));

        info!(proxy_id = %id, proxy_identity = %identity, "Proxy connected");
        self.workers.insert(id, ProxyWorker { identity, source, handle });
    }

    /// Hands the current source to every worker selected by `filter`.
    fn recompile(&mut self, filter: impl Fn(&ProxyWorker) -> bool) {
        let mut gone = Vec::new();
        for (id, worker) in self.workers.iter().filter(|(_, w)| filter(w)) {
            if worker.source.is_closed() {
                gone.push(id.clone());
                continue;
            }
            worker.source.send_replace(Arc::clone(&self.source));
        }
        for id in gone {
            warn!(proxy_id = %id, "Proxy worker exited, removing it");
            self.workers.remove(&id);
        }
    }
}

async fn run_worker(
    proxy: Proxy,
    context: CompileContext,
    mut sources: watch::Receiver<Arc<dyn PolicySource>>,
    publisher: watch::Sender<ProxyState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(proxy_id = %proxy.id, "Proxy worker started");
    let proxy = Arc::new(proxy);
    sources.mark_changed();
    loop {
        tokio::select! {
            changed = sources.changed() => {
                if changed.is_err() {
                    break;
                }
                // Sources replaced while the last pass ran are folded into this one.
                let source = Arc::clone(&*sources.borrow_and_update());
                let result = compile_blocking(Arc::clone(&proxy), source, context.clone()).await;
                publisher.send_modify(|state| {
                    state.generation += 1;
                    match result {
                        Ok(resources) => {
                            state.resources = Some(Arc::new(resources));
                            state.last_error = None;
                        }
                        Err(e) => {
                            error!(proxy_id = %proxy.id, error = %e, "Compilation failed, keeping previous resources");
                            state.last_error = Some(e.to_string());
                        }
                    }
                });
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    debug!(proxy_id = %proxy.id, "Proxy worker stopped");
}

async fn compile_blocking(
    proxy: Arc<Proxy>,
    source: Arc<dyn PolicySource>,
    context: CompileContext,
) -> Result<CompiledResources> {
    tokio::task::spawn_blocking(move || {
        compile(&proxy, source.as_ref(), &context.config, context.certificates.as_deref())
    })
    .await
    .map_err(|e| Error::internal(format!("Compilation task failed: {}", e)))?
}
