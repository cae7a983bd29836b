//! The coordinator as a long-lived tokio task. Front ends talk to it through
//! a [`CoordinatorHandle`]; the task serializes lifecycle transitions while
//! fetches run concurrently on their own tasks.

use std::collections::HashSet;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{
    Coordinator, FetchOutcome, FetchRequest, Fetcher, Generation, Interceptor, LifecycleState,
    OfflineError, Registration,
};

const COMMAND_CAPACITY: usize = 64;
const NOTICE_CAPACITY: usize = 16;

pub type ClientId = u64;

/// Broadcast to every connected front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// A new generation took over; reload to pick up new assets
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub state: LifecycleState,
    pub active: Option<Registration>,
    pub generations: Vec<String>,
    pub clients: usize,
    pub precache_entries: usize,
    pub runtime_entries: usize,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Register(Reply<LifecycleState>),
    Connect(Reply<ClientId>),
    Disconnect(ClientId),
    SkipWaiting,
    Fetch(FetchRequest, Reply<Result<FetchOutcome, OfflineError>>),
    Status(Reply<CoordinatorStatus>),
    InstallDone(Result<Generation, OfflineError>),
    Shutdown,
}

#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    notices: broadcast::Sender<Notice>,
}

impl CoordinatorHandle {
    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, OfflineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| OfflineError::Closed)?;
        rx.await.map_err(|_| OfflineError::Closed)
    }

    async fn send(&self, command: Command) -> Result<(), OfflineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| OfflineError::Closed)
    }

    /// Installs the current definition if needed and resolves once the
    /// attempt settled. `Redundant` means the install failed and the
    /// previous generation keeps serving.
    pub async fn register(&self) -> Result<LifecycleState, OfflineError> {
        self.call(Command::Register).await
    }

    pub async fn connect(&self) -> Result<ClientId, OfflineError> {
        self.call(Command::Connect).await
    }

    pub async fn disconnect(&self, client: ClientId) -> Result<(), OfflineError> {
        self.send(Command::Disconnect(client)).await
    }

    /// Activates a waiting generation without waiting for clients to leave.
    pub async fn skip_waiting(&self) -> Result<(), OfflineError> {
        self.send(Command::SkipWaiting).await
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome, OfflineError> {
        self.call(|reply| Command::Fetch(request, reply)).await?
    }

    pub async fn status(&self) -> Result<CoordinatorStatus, OfflineError> {
        self.call(Command::Status).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub async fn shutdown(&self) -> Result<(), OfflineError> {
        self.send(Command::Shutdown).await
    }
}

struct Service<F> {
    coordinator: Coordinator<F>,
    interceptor: Option<Interceptor<F>>,
    skip_waiting: bool,
    clients: HashSet<ClientId>,
    next_client: ClientId,
    waiting_registrations: Vec<Reply<LifecycleState>>,
    notices: broadcast::Sender<Notice>,
    commands: mpsc::WeakSender<Command>,
}

impl<F: Fetcher> Service<F> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Register(reply) => self.register(reply),
                Command::Connect(reply) => {
                    self.next_client += 1;
                    self.clients.insert(self.next_client);
                    let _ = reply.send(self.next_client);
                }
                Command::Disconnect(client) => {
                    self.clients.remove(&client);
                    self.maybe_activate();
                }
                Command::SkipWaiting => {
                    self.skip_waiting = true;
                    self.maybe_activate();
                }
                Command::Fetch(request, reply) => self.fetch(request, reply),
                Command::Status(reply) => {
                    let _ = reply.send(self.status());
                }
                Command::InstallDone(result) => self.install_done(result),
                Command::Shutdown => break,
            }
        }
        log::info!("offline: coordinator stopped");
    }

    fn register(&mut self, reply: Reply<LifecycleState>) {
        match self.coordinator.state() {
            LifecycleState::Installing => {
                self.waiting_registrations.push(reply);
                return;
            }
            LifecycleState::Installed | LifecycleState::Activating => {
                let _ = reply.send(self.coordinator.state());
                return;
            }
            _ => {}
        }

        if !self.coordinator.needs_install() {
            let _ = reply.send(self.coordinator.state());
            return;
        }

        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        self.waiting_registrations.push(reply);
        let job = self.coordinator.begin_install();
        tokio::spawn(async move {
            let result = job.run().await;
            let _ = commands.send(Command::InstallDone(result)).await;
        });
    }

    fn install_done(&mut self, result: Result<Generation, OfflineError>) {
        // the failure is logged by the coordinator
        if self.coordinator.finish_install(result).is_ok() {
            self.maybe_activate();
        }

        let state = self.coordinator.state();
        for reply in self.waiting_registrations.drain(..) {
            let _ = reply.send(state);
        }
    }

    fn maybe_activate(&mut self) {
        if self.coordinator.state() != LifecycleState::Installed {
            return;
        }

        let first_install = self.coordinator.active().is_none();
        if !(self.skip_waiting || first_install || self.clients.is_empty()) {
            log::info!(
                "offline: new generation waiting for {} clients",
                self.clients.len()
            );
            return;
        }

        match self.coordinator.activate() {
            Ok(_) => {
                self.interceptor = self.coordinator.interceptor();
                // nobody listening is fine
                let _ = self.notices.send(Notice::Updated);
            }
            Err(e) => log::error!("offline: activation failed: {e}"),
        }
    }

    fn fetch(&self, request: FetchRequest, reply: Reply<Result<FetchOutcome, OfflineError>>) {
        let Some(interceptor) = self.interceptor.clone() else {
            let _ = reply.send(Ok(FetchOutcome::Passthrough));
            return;
        };

        tokio::spawn(async move {
            let _ = reply.send(interceptor.handle(&request).await);
        });
    }

    fn status(&self) -> CoordinatorStatus {
        let storage = self.coordinator.storage();
        let generations = storage.keys().unwrap_or_else(|e| {
            log::warn!("offline: cannot list generations: {e}");
            vec![]
        });

        let count = |name: Option<&String>| {
            name.filter(|name| storage.has(name))
                .and_then(|name| storage.open(name).ok())
                .map(|generation| generation.len())
                .unwrap_or(0)
        };
        let active = self.coordinator.active().cloned();

        CoordinatorStatus {
            state: self.coordinator.state(),
            precache_entries: count(active.as_ref().map(|r| &r.precache)),
            runtime_entries: count(active.as_ref().map(|r| &r.runtime)),
            active,
            generations,
            clients: self.clients.len(),
        }
    }
}

/// Starts the coordinator task. Must be called from within a tokio runtime.
pub fn spawn<F: Fetcher>(
    coordinator: Coordinator<F>,
    skip_waiting: bool,
) -> (CoordinatorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

    let service = Service {
        interceptor: coordinator.interceptor(),
        coordinator,
        skip_waiting,
        clients: HashSet::new(),
        next_client: 0,
        waiting_registrations: vec![],
        notices: notices.clone(),
        commands: tx.downgrade(),
    };

    let task = tokio::spawn(service.run(rx));
    (
        CoordinatorHandle {
            commands: tx,
            notices,
        },
        task,
    )
}
