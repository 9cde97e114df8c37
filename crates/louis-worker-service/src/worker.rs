//! The translation worker and its client.
//!
//! One worker task owns the engine handle, the table store, and the
//! private filesystem. It reads [`Request`]s from a bounded inbox in
//! arrival order and answers each on its own `oneshot` channel, so every
//! request gets exactly one reply.
//!
//! While INIT is loading the engine and installing tables the worker keeps
//! reading its inbox: TRANSLATE is answered with `NotReady`, STATUS with a
//! snapshot, and further INITs are answered together with the first one.
//!
//! Dropping every [`WorkerClient`] closes the inbox; the worker finishes
//! and its private filesystem is removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

use louis_worker_common::{
    ConfigError, EngineError, ProtocolError, RuntimeConfig, TableConfig, TableError, WorkerError,
};
use louis_worker_core::store::{WorkerContext, create_store};
use louis_worker_core::{
    CompiledModule, EngineHandle, TranslationRequest, WasmEngine, translate_with,
};
use louis_worker_host::tables::split_list;
use louis_worker_host::{
    PrivateFs, TableSource, TableStore, create_linker, log_callback, source_from_config,
};

use crate::protocol::{
    Envelope, ErrorKind, ErrorPayload, Request, RequestId, Response, TableStatus,
    TranslatePayload, WorkerStatus,
};
use crate::state::{InitAction, ReadinessState};

/// Default capacity of the worker inbox.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Where the engine module comes from.
#[derive(Debug, Clone)]
pub enum ModuleSource {
    /// A compiled liblouis `.wasm` file.
    File(PathBuf),
    /// WebAssembly text.
    Wat(String),
}

/// Everything needed to spawn a worker.
pub struct WorkerOptions {
    /// Runtime configuration.
    pub config: RuntimeConfig,
    /// Engine module; `engine.module_path` from the config if `None`.
    pub module: Option<ModuleSource>,
    /// Table source; built from `tables.source` if `None`.
    pub source: Option<Arc<dyn TableSource>>,
    /// Inbox capacity.
    pub queue_depth: usize,
}

impl WorkerOptions {
    /// Options taking everything from `config`.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            module: None,
            source: None,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    /// Use a specific engine module.
    #[must_use]
    pub fn with_module(mut self, module: ModuleSource) -> Self {
        self.module = Some(module);
        self
    }

    /// Use a specific table source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn TableSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the inbox capacity.
    #[must_use]
    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }
}

/// A request and the channel its reply goes to.
struct Command {
    envelope: Envelope<Request>,
    reply: oneshot::Sender<Envelope<Response>>,
}

/// Spawn a worker on the current Tokio runtime.
///
/// The worker starts `Uninitialized`; send INIT to load the engine.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, no engine module is
/// configured, or the private filesystem cannot be created.
pub fn spawn(options: WorkerOptions) -> Result<WorkerClient, WorkerError> {
    let WorkerOptions {
        config,
        module,
        source,
        queue_depth,
    } = options;
    config.validate()?;

    let module = match module {
        Some(module) => module,
        None => config
            .engine
            .module_path
            .as_ref()
            .map(|path| ModuleSource::File(PathBuf::from(path)))
            .ok_or_else(|| ConfigError::invalid("engine.module_path is not set"))?,
    };
    let source = match source {
        Some(source) => source,
        None => source_from_config(&config.tables.source)?,
    };

    let engine = WasmEngine::new(&config.engine)?;
    let fs = PrivateFs::create()?;
    let tables = TableStore::new(source, fs).with_include_resolution(config.tables.resolve_includes);

    let context_id = format!("worker-{}", Uuid::new_v4());
    let (sender, inbox) = mpsc::channel(queue_depth.max(1));

    let worker = Worker {
        config,
        engine,
        module,
        state: ReadinessState::default(),
        handle: None,
        tables: Some(tables),
        context_id: context_id.clone(),
    };
    tokio::spawn(
        worker
            .run(inbox)
            .instrument(info_span!("worker", context_id = %context_id)),
    );

    Ok(WorkerClient {
        sender,
        next_id: Arc::new(AtomicU64::new(0)),
    })
}

/// State owned by the worker task.
struct Worker {
    config: RuntimeConfig,
    engine: WasmEngine,
    module: ModuleSource,
    state: ReadinessState,
    handle: Option<EngineHandle>,
    /// Lent to the initialization future while INIT runs.
    tables: Option<TableStore>,
    context_id: String,
}

impl Worker {
    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        info!("Worker started");

        while let Some(command) = inbox.recv().await {
            let Command {
                envelope: Envelope { id, body },
                reply,
            } = command;

            let response = match body {
                Request::Init => {
                    self.init(id, reply, &mut inbox).await;
                    continue;
                }
                Request::Status => Response::Status(self.status()),
                Request::Translate(payload) => self.translate(payload).await,
            };
            respond(reply, id, response);
        }

        info!(state = %self.state, "Worker stopped");
    }

    async fn init(
        &mut self,
        id: RequestId,
        reply: oneshot::Sender<Envelope<Response>>,
        inbox: &mut mpsc::Receiver<Command>,
    ) {
        match self.state.on_init() {
            InitAction::Start => self.run_init(id, reply, inbox).await,
            InitAction::AlreadyReady => {
                debug!("INIT while ready");
                respond(reply, id, self.ready_response());
            }
            InitAction::AlreadyFailed(error) => respond(reply, id, Response::Error(error)),
            InitAction::Wait => respond(reply, id, Response::Error(self.not_ready())),
        }
    }

    async fn run_init(
        &mut self,
        id: RequestId,
        reply: oneshot::Sender<Envelope<Response>>,
        inbox: &mut mpsc::Receiver<Command>,
    ) {
        info!("Initialization started");
        let start = Instant::now();

        let Some(tables) = self.tables.take() else {
            let error = ErrorPayload::new(ErrorKind::Internal, "table store unavailable");
            self.state.complete(Err(error.clone()));
            respond(reply, id, Response::Error(error));
            return;
        };

        let init = initialize(
            self.engine.clone(),
            self.module.clone(),
            self.config.clone(),
            tables,
            self.context_id.clone(),
        );
        tokio::pin!(init);

        let mut waiters = vec![(id, reply)];
        let (tables, outcome) = loop {
            tokio::select! {
                done = &mut init => break done,
                Some(command) = inbox.recv() => {
                    let id = command.envelope.id;
                    match command.envelope.body {
                        Request::Init => waiters.push((id, command.reply)),
                        Request::Status => respond(command.reply, id, Response::Status(self.status())),
                        Request::Translate(_) => {
                            respond(command.reply, id, Response::Error(self.not_ready()));
                        }
                    }
                }
            }
        };
        self.tables = Some(tables);

        let response = match outcome {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state.complete(Ok(()));
                info!(
                    duration_ms = start.elapsed().as_millis(),
                    waiters = waiters.len(),
                    "Worker ready"
                );
                self.ready_response()
            }
            Err(e) => {
                error!(error = %e, "Initialization failed");
                let error = ErrorPayload::from(&e);
                self.state.complete(Err(error.clone()));
                Response::Error(error)
            }
        };

        for (id, reply) in waiters {
            respond(reply, id, response.clone());
        }
    }

    #[instrument(skip_all, fields(chars = payload.text.len()))]
    async fn translate(&mut self, payload: TranslatePayload) -> Response {
        match self.try_translate(payload).await {
            Ok(braille) => Response::TranslateResult { braille },
            Err(e) => {
                warn!(error = %e, "Translation request failed");
                Response::Error(ErrorPayload::from(&e))
            }
        }
    }

    async fn try_translate(&mut self, payload: TranslatePayload) -> Result<String, WorkerError> {
        self.state.ensure_ready()?;
        let table_list = table_list(&self.config.tables, &payload)?;

        let state = self.state.name();
        let (Some(handle), Some(tables)) = (self.handle.as_mut(), self.tables.as_mut()) else {
            return Err(ProtocolError::NotReady {
                state: state.to_string(),
            }
            .into());
        };

        tables.install_list(&table_list).await?;
        tables.require_installed(&table_list)?;

        let request = TranslationRequest::new(payload.text, table_list)
            .with_mode(payload.mode.flags.bits());
        let result = translate_with(handle, &request, &self.config.execution).await?;
        Ok(result.braille)
    }

    fn status(&self) -> WorkerStatus {
        let handle = self.handle.as_ref();
        let tables = match &self.tables {
            Some(tables) => tables
                .records()
                .map(|r| TableStatus {
                    name: r.name.clone(),
                    installed: r.installed,
                })
                .collect(),
            // INIT holds the store; its defaults are still being installed.
            None => self
                .config
                .tables
                .default_tables
                .iter()
                .map(|name| TableStatus {
                    name: name.clone(),
                    installed: false,
                })
                .collect(),
        };
        WorkerStatus {
            state: self.state.name().to_string(),
            version: handle.map(|h| h.version().to_string()),
            tables,
            log_callback_registrations: handle
                .map_or(0, |h| u32::from(h.log_callback_slot().is_some())),
            function_table_size: handle.and_then(EngineHandle::function_table_size),
            translations: handle.map_or(0, |h| h.context().metrics.translations),
        }
    }

    fn ready_response(&self) -> Response {
        Response::Ready {
            version: self
                .handle
                .as_ref()
                .map(|h| h.version().to_string())
                .unwrap_or_default(),
        }
    }

    fn not_ready(&self) -> ErrorPayload {
        ErrorPayload::from(&WorkerError::from(ProtocolError::NotReady {
            state: self.state.name().to_string(),
        }))
    }
}

/// Load the engine, then install the default tables.
///
/// Takes the table store by value and always hands it back.
#[instrument(skip_all, fields(context_id = %context_id))]
async fn initialize(
    engine: WasmEngine,
    module: ModuleSource,
    config: RuntimeConfig,
    mut tables: TableStore,
    context_id: String,
) -> (TableStore, Result<EngineHandle, WorkerError>) {
    let loaded = load_engine(&engine, module, &config, tables.root(), context_id).await;
    let result = match loaded {
        Ok(handle) => install_defaults(&mut tables, &config.tables)
            .await
            .map(|()| handle),
        Err(e) => Err(e),
    };
    (tables, result)
}

async fn load_engine(
    engine: &WasmEngine,
    module: ModuleSource,
    config: &RuntimeConfig,
    table_root: &Path,
    context_id: String,
) -> Result<EngineHandle, WorkerError> {
    let compiled = compile(engine.clone(), module).await?;
    let linker = create_linker(engine)?;
    let context = WorkerContext::new(
        context_id,
        Some(table_root),
        config.engine.max_memory_bytes(),
    )?;
    let store = create_store(engine, &config.execution, context)?;

    let mut handle = EngineHandle::load(&compiled, &linker, store, &config.execution).await?;
    handle.register_log_callback(log_callback()).await?;
    Ok(handle)
}

async fn compile(engine: WasmEngine, module: ModuleSource) -> Result<CompiledModule, EngineError> {
    tokio::task::spawn_blocking(move || match module {
        ModuleSource::File(path) => CompiledModule::from_file(&engine, path),
        ModuleSource::Wat(wat) => CompiledModule::from_wat(engine.inner(), &wat),
    })
    .await
    .map_err(|e| EngineError::load_failed(format!("Compilation task failed: {e}")))?
}

async fn install_defaults(tables: &mut TableStore, config: &TableConfig) -> Result<(), WorkerError> {
    for name in &config.default_tables {
        tables.install(name).await?;
    }
    Ok(())
}

/// The table list for a request.
///
/// Falls back to the first default table and appends the configured math
/// table for the request's math code. Names are trimmed and rejoined with
/// bare commas, since the engine does not trim list members.
fn table_list(config: &TableConfig, payload: &TranslatePayload) -> Result<String, TableError> {
    let base = match &payload.table {
        Some(table) => table.as_str(),
        None => config
            .default_tables
            .first()
            .map(String::as_str)
            .ok_or_else(|| TableError::invalid_name(""))?,
    };

    let mut names = split_list(base)?;
    if let Some(extra) = config.math_tables.get(payload.mode.math.key()) {
        if !names.contains(&extra.as_str()) {
            names.push(extra.as_str());
        }
    }
    Ok(names.join(","))
}

fn respond(reply: oneshot::Sender<Envelope<Response>>, id: RequestId, response: Response) {
    if reply.send(Envelope::new(id, response)).is_err() {
        debug!(id, "Requester dropped before the reply");
    }
}

/// Handle for sending requests to a worker.
///
/// Cheap to clone. Ids handed out by [`WorkerClient::request`] are unique
/// per worker.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    sender: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
}

/// A reply that has not arrived yet.
#[derive(Debug)]
pub struct PendingReply {
    id: RequestId,
    receiver: oneshot::Receiver<Envelope<Response>>,
}

impl PendingReply {
    /// Id of the request this reply answers.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait for the reply.
    pub async fn wait(self) -> Result<Envelope<Response>, ProtocolError> {
        self.receiver.await.map_err(|_| ProtocolError::WorkerGone)
    }
}

impl WorkerClient {
    /// Allocate a request id.
    pub fn next_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Queue a request without waiting for its reply.
    ///
    /// Requests are processed in the order they are queued.
    pub async fn dispatch(&self, envelope: Envelope<Request>) -> Result<PendingReply, ProtocolError> {
        let (reply, receiver) = oneshot::channel();
        let id = envelope.id;
        self.sender
            .send(Command { envelope, reply })
            .await
            .map_err(|_| ProtocolError::WorkerGone)?;
        Ok(PendingReply { id, receiver })
    }

    /// Send a request and wait for its reply.
    pub async fn send(&self, envelope: Envelope<Request>) -> Result<Envelope<Response>, ProtocolError> {
        self.dispatch(envelope).await?.wait().await
    }

    /// Send a request with a fresh id and return the reply body.
    pub async fn request(&self, body: Request) -> Result<Response, ProtocolError> {
        let reply = self.send(Envelope::new(self.next_id(), body)).await?;
        Ok(reply.body)
    }

    /// Send INIT.
    pub async fn init(&self) -> Result<Response, ProtocolError> {
        self.request(Request::Init).await
    }

    /// Send TRANSLATE.
    pub async fn translate(&self, payload: TranslatePayload) -> Result<Response, ProtocolError> {
        self.request(Request::Translate(payload)).await
    }

    /// Send STATUS.
    pub async fn status(&self) -> Result<WorkerStatus, ProtocolError> {
        match self.request(Request::Status).await? {
            Response::Status(status) => Ok(status),
            _ => Err(ProtocolError::WorkerGone),
        }
    }
}
