//! Session controller: provisions a VM, attaches its display, tears it down.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde_json::Value;
use tokio::{
    sync::watch,
    time::{Instant, timeout},
};
use vm_session_core::{
    BackendClient, ClientContext, ConnectionHandle, CredentialStore, DisplayConnector,
    DisplayContainer, DisplayEvent, DisplayEvents, DisplayOptions, EndpointCandidate, EventStore,
    Session, SessionConfig, SessionEvent, SessionId, SessionState, StartedVm, StopTrigger,
    traits::{InfoError, StartError},
};
use vm_session_transport::resolve_endpoints;

/// Session controller error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Start failed: {0}")]
    Start(#[from] StartError),
    #[error("Retry budget exceeded after {elapsed:?}")]
    RetryBudgetExceeded { elapsed: Duration },
    #[error("No authentication token")]
    NoCredential,
    #[error("Session already active")]
    AlreadyActive,
    #[error("Session has ended")]
    Ended,
    #[error("No session issued")]
    NoSession,
    #[error("Info request failed: {0}")]
    Info(#[from] InfoError),
}

/// How a `start` call finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Display stream is live.
    Connected {
        session_id: SessionId,
        endpoint: EndpointCandidate,
    },
    /// A termination trigger won the race; the session was stopped.
    Stopped,
}

/// The session the controller currently owns.
struct ActiveSession {
    id: SessionId,
    endpoint: Option<String>,
    stop_issued: bool,
    created_at: i64,
}

impl ActiveSession {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            endpoint: None,
            stop_issued: false,
            created_at: now(),
        }
    }
}

struct Inner {
    state: SessionState,
    session: Option<ActiveSession>,
    handle: Option<ConnectionHandle>,
    stop_trigger: Option<StopTrigger>,
}

/// State shared with background tasks (start call, stream watcher).
struct Shared {
    inner: Mutex<Inner>,
    events: Arc<EventStore>,
    backend: Arc<dyn BackendClient>,
    stopped: watch::Sender<bool>,
    /// A backend start call is in flight.
    starting: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, to: SessionState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        tracing::info!(
            session_id = inner.session.as_ref().map_or("-", |s| s.id.as_str()),
            %from,
            %to,
            "Session state changed"
        );
        self.events.push(SessionEvent::StateChanged { from, to });
    }

    /// Record a termination trigger and claim the stop request, if any is owed.
    fn begin_stop(&self, trigger: StopTrigger) -> Option<SessionId> {
        let mut inner = self.lock();
        if inner.stop_trigger.is_none() {
            inner.stop_trigger = Some(trigger);
        }
        if let Some(handle) = inner.handle.take() {
            handle.disconnect();
        }
        self.set_state(&mut inner, SessionState::Ended);
        self.stopped.send_replace(true);

        let session = inner.session.as_mut().filter(|s| !s.stop_issued)?;
        session.stop_issued = true;
        let id = session.id.clone();
        self.events.push(SessionEvent::StopIssued {
            session_id: id.clone(),
            trigger,
        });
        Some(id)
    }

    /// Deliver a claimed stop request. Failures are logged and dropped.
    async fn dispatch_stop(&self, session_id: &SessionId, trigger: StopTrigger) {
        tracing::info!(%session_id, ?trigger, "Stopping VM");
        if trigger.is_detached() {
            self.backend.stop_detached(session_id);
        } else if let Err(e) = self.backend.stop(session_id).await {
            tracing::warn!(%session_id, "Stop request failed: {e}");
        }
    }

    /// Adopt a freshly issued session, or stop it if termination won the race.
    async fn adopt(&self, started: StartedVm) -> Option<SessionId> {
        let id = started.session_id;
        self.events.push(SessionEvent::SessionIssued {
            session_id: id.clone(),
        });

        let late_trigger = {
            let mut inner = self.lock();
            if inner.state == SessionState::Starting {
                inner.session = Some(ActiveSession::new(id.clone()));
                self.set_state(&mut inner, SessionState::Connecting);
                None
            } else {
                let trigger = inner.stop_trigger.unwrap_or(StopTrigger::Teardown);
                let mut session = ActiveSession::new(id.clone());
                session.stop_issued = true;
                inner.session = Some(session);
                self.events.push(SessionEvent::StopIssued {
                    session_id: id.clone(),
                    trigger,
                });
                Some(trigger)
            }
        };

        match late_trigger {
            None => Some(id),
            Some(trigger) => {
                tracing::info!(session_id = %id, "Start resolved after termination");
                self.dispatch_stop(&id, trigger).await;
                None
            }
        }
    }

    /// Forward stream events until the stream ends, then mark the session ended.
    async fn watch_stream(self: Arc<Self>, handle_id: uuid::Uuid, mut events: DisplayEvents) {
        let reason = loop {
            match events.recv().await {
                Some(DisplayEvent::Disconnected { reason }) => break reason,
                Some(event) => self.events.push(SessionEvent::Display(event)),
                None => break "display adapter closed".to_string(),
            }
        };

        self.events
            .push(SessionEvent::Display(DisplayEvent::Disconnected {
                reason: reason.clone(),
            }));

        let mut inner = self.lock();
        let current = inner.handle.as_ref().is_some_and(|h| h.id() == handle_id);
        if current && inner.state == SessionState::Connected {
            inner.handle = None;
            tracing::info!(%reason, "Display stream ended");
            self.set_state(&mut inner, SessionState::Ended);
        }
    }
}

enum Attempt {
    Connected(ConnectionHandle, DisplayEvents),
    Failed(String),
    Stopped,
}

/// Drives one VM session from start to teardown.
///
/// Termination triggers (`stop`, `stop_on_unload`, dropping the controller)
/// may arrive at any point; the first one wins and each issued session
/// receives exactly one stop request.
pub struct SessionController {
    shared: Arc<Shared>,
    display: Arc<dyn DisplayConnector>,
    credentials: Option<Arc<dyn CredentialStore>>,
    context: ClientContext,
    config: SessionConfig,
    container: DisplayContainer,
}

impl SessionController {
    /// Create a controller in the `Idle` state.
    #[must_use]
    pub fn new(
        backend: Arc<dyn BackendClient>,
        display: Arc<dyn DisplayConnector>,
        context: ClientContext,
        config: SessionConfig,
    ) -> Self {
        let (stopped, _) = watch::channel(false);
        let (starting, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    session: None,
                    handle: None,
                    stop_trigger: None,
                }),
                events: Arc::new(EventStore::new()),
                backend,
                stopped,
                starting,
            }),
            display,
            credentials: None,
            context,
            config,
            container: DisplayContainer::new(),
        }
    }

    /// Require a credential, attached to every stream URL.
    #[must_use]
    pub fn with_credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Render into an existing container.
    #[must_use]
    pub fn with_container(mut self, container: DisplayContainer) -> Self {
        self.container = container;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Snapshot of the current session, if one was issued.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        let inner = self.shared.lock();
        inner.session.as_ref().map(|s| Session {
            id: s.id.clone(),
            state: inner.state,
            endpoint: s.endpoint.clone(),
            stop_issued: s.stop_issued,
            created_at: s.created_at,
        })
    }

    /// Live connection handle, if any.
    #[must_use]
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.shared.lock().handle.clone()
    }

    /// Event store for status observers.
    #[must_use]
    pub fn events(&self) -> Arc<EventStore> {
        Arc::clone(&self.shared.events)
    }

    /// Container the display renders into.
    #[must_use]
    pub const fn container(&self) -> &DisplayContainer {
        &self.container
    }

    /// Provision a VM and attach its display stream.
    ///
    /// # Errors
    /// Returns error if the backend rejects the start, no credential is
    /// available, or no endpoint connects within the retry budget. In the
    /// latter two cases the provisioned VM is stopped before returning.
    pub async fn start(&self) -> Result<StartOutcome, SessionError> {
        {
            let mut inner = self.shared.lock();
            match inner.state {
                SessionState::Idle => self.shared.set_state(&mut inner, SessionState::Starting),
                SessionState::Ended => return Err(SessionError::Ended),
                SessionState::Starting | SessionState::Connecting | SessionState::Connected => {
                    return Err(SessionError::AlreadyActive);
                }
            }
        }

        // The backend call runs detached so its result is handled even if
        // this future is dropped.
        let shared = Arc::clone(&self.shared);
        shared.starting.send_replace(true);
        let task = tokio::spawn(async move {
            let result = match shared.backend.start().await {
                Ok(started) => Ok(shared.adopt(started).await),
                Err(e) => Err(e),
            };
            shared.starting.send_replace(false);
            result
        });

        let issued = match task.await {
            Ok(result) => result,
            Err(e) => Err(StartError::Unreachable(format!("start task failed: {e}"))),
        };

        match issued {
            Ok(Some(id)) => self.establish(&id).await,
            Ok(None) => Ok(StartOutcome::Stopped),
            Err(e) => {
                tracing::warn!("VM start failed: {e}");
                let err = SessionError::Start(e);
                let mut inner = self.shared.lock();
                if inner.state == SessionState::Starting {
                    self.shared.set_state(&mut inner, SessionState::Idle);
                }
                self.shared.events.push(SessionEvent::Failed {
                    message: format!("Error: {err}"),
                });
                Err(err)
            }
        }
    }

    /// Stop the session, waiting for the backend's answer.
    ///
    /// Idempotent; only the first trigger sends a stop request.
    pub async fn stop(&self) {
        if let Some(id) = self.shared.begin_stop(StopTrigger::Explicit) {
            self.shared.dispatch_stop(&id, StopTrigger::Explicit).await;
        }
    }

    /// Stop the session without waiting, for use while the client is exiting.
    pub fn stop_on_unload(&self) {
        if let Some(id) = self.shared.begin_stop(StopTrigger::Unload) {
            tracing::info!(session_id = %id, "Stopping VM on unload");
            self.shared.backend.stop_detached(&id);
        }
    }

    /// Wait until no backend start call is in flight.
    ///
    /// A start that resolves after termination is stopped before this
    /// returns (awaited for an explicit stop). Owners that are about to exit
    /// call this after `stop` so a late session is not leaked.
    pub async fn settled(&self) {
        let mut starting = self.shared.starting.subscribe();
        let _ = starting.wait_for(|starting| !*starting).await;
    }

    /// Backend diagnostics for the current session.
    ///
    /// # Errors
    /// Returns error if no session was issued or the backend call fails.
    pub async fn info(&self) -> Result<Value, SessionError> {
        let id = self
            .shared
            .lock()
            .session
            .as_ref()
            .map(|s| s.id.clone())
            .ok_or(SessionError::NoSession)?;
        Ok(self.shared.backend.info(&id).await?)
    }

    async fn establish(&self, id: &SessionId) -> Result<StartOutcome, SessionError> {
        let token = match &self.credentials {
            Some(store) => match store.load() {
                Some(token) => Some(token),
                None => return self.abandon(SessionError::NoCredential).await,
            },
            None => None,
        };

        let entered = Instant::now();
        let budget = self.config.retry_budget();
        let mut stopped = self.shared.stopped.subscribe();
        let mut attempt = 0u32;

        loop {
            for candidate in resolve_endpoints(id, &self.context, self.config.backend_port) {
                if *stopped.borrow() {
                    return Ok(StartOutcome::Stopped);
                }
                let elapsed = entered.elapsed();
                if elapsed >= budget {
                    return self
                        .abandon(SessionError::RetryBudgetExceeded { elapsed })
                        .await;
                }

                attempt += 1;
                let url = token
                    .as_deref()
                    .map_or_else(|| candidate.url.clone(), |t| candidate.url_with_token(t));
                tracing::debug!(
                    session_id = %id,
                    kind = %candidate.kind,
                    endpoint = %candidate.url,
                    attempt,
                    "Connecting display"
                );

                match self.attempt(&url, budget - elapsed, &mut stopped).await {
                    Attempt::Connected(handle, events) => {
                        return Ok(self.promote(id, candidate, handle, events));
                    }
                    Attempt::Failed(error) => {
                        tracing::debug!(
                            session_id = %id,
                            kind = %candidate.kind,
                            attempt,
                            "Candidate failed: {error}"
                        );
                        self.shared.events.push(SessionEvent::CandidateFailed {
                            kind: candidate.kind,
                            url: candidate.url,
                            error,
                        });
                    }
                    Attempt::Stopped => return Ok(StartOutcome::Stopped),
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.retry_backoff()) => {}
                () = wait_stopped(&mut stopped) => return Ok(StartOutcome::Stopped),
            }

            let elapsed = entered.elapsed();
            if elapsed >= budget {
                return self
                    .abandon(SessionError::RetryBudgetExceeded { elapsed })
                    .await;
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        remaining: Duration,
        stopped: &mut watch::Receiver<bool>,
    ) -> Attempt {
        self.container.clear();
        let (handle, mut events) =
            match self.display.connect(&self.container, url, DisplayOptions::FIT) {
                Ok(pair) => pair,
                Err(e) => return Attempt::Failed(e.to_string()),
            };

        {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Ended {
                handle.disconnect();
                return Attempt::Stopped;
            }
            inner.handle = Some(handle.clone());
        }

        let result = tokio::select! {
            res = timeout(remaining, self.wait_connected(&mut events)) => {
                res.unwrap_or_else(|_| Err("timed out waiting for display".to_string()))
            }
            () = wait_stopped(stopped) => Err(String::new()),
        };

        let mut inner = self.shared.lock();
        if inner.state == SessionState::Ended {
            // Late success or failure after termination: never surface it.
            handle.disconnect();
            return Attempt::Stopped;
        }
        match result {
            Ok(()) => Attempt::Connected(handle, events),
            Err(reason) => {
                handle.disconnect();
                if inner.handle.as_ref().is_some_and(|h| h.id() == handle.id()) {
                    inner.handle = None;
                }
                Attempt::Failed(reason)
            }
        }
    }

    async fn wait_connected(&self, events: &mut DisplayEvents) -> Result<(), String> {
        loop {
            match events.recv().await {
                Some(DisplayEvent::Connected) => {
                    self.shared
                        .events
                        .push(SessionEvent::Display(DisplayEvent::Connected));
                    return Ok(());
                }
                Some(DisplayEvent::Disconnected { reason }) => return Err(reason),
                Some(event) => self.shared.events.push(SessionEvent::Display(event)),
                None => return Err("display adapter closed".to_string()),
            }
        }
    }

    fn promote(
        &self,
        id: &SessionId,
        candidate: EndpointCandidate,
        handle: ConnectionHandle,
        events: DisplayEvents,
    ) -> StartOutcome {
        {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Ended {
                handle.disconnect();
                return StartOutcome::Stopped;
            }
            if let Some(session) = inner.session.as_mut() {
                session.endpoint = Some(candidate.url.clone());
            }
            tracing::info!(session_id = %id, kind = %candidate.kind, endpoint = %candidate.url, "Display connected");
            self.shared.set_state(&mut inner, SessionState::Connected);
        }

        tokio::spawn(Arc::clone(&self.shared).watch_stream(handle.id(), events));

        StartOutcome::Connected {
            session_id: id.clone(),
            endpoint: candidate,
        }
    }

    /// Give up on the current session: back to `Idle`, VM stopped.
    async fn abandon(&self, err: SessionError) -> Result<StartOutcome, SessionError> {
        let owed = {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Ended {
                return Ok(StartOutcome::Stopped);
            }
            if let Some(handle) = inner.handle.take() {
                handle.disconnect();
            }
            let owed = inner
                .session
                .take()
                .filter(|s| !s.stop_issued)
                .map(|s| s.id);
            if let Some(id) = &owed {
                self.shared.events.push(SessionEvent::StopIssued {
                    session_id: id.clone(),
                    trigger: StopTrigger::Abandoned,
                });
            }
            self.shared.set_state(&mut inner, SessionState::Idle);
            owed
        };

        if let SessionError::RetryBudgetExceeded { elapsed } = &err {
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(elapsed_ms, "Session attempt abandoned: {err}");
        } else {
            tracing::warn!("Session attempt abandoned: {err}");
        }
        self.shared.events.push(SessionEvent::Failed {
            message: match &err {
                SessionError::NoCredential => err.to_string(),
                other => format!("Error: {other}"),
            },
        });

        if let Some(id) = owed {
            self.shared.dispatch_stop(&id, StopTrigger::Abandoned).await;
        }
        Err(err)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(id) = self.shared.begin_stop(StopTrigger::Teardown) {
            tracing::info!(session_id = %id, "Stopping VM on teardown");
            self.shared.backend.stop_detached(&id);
        }
    }
}

async fn wait_stopped(stopped: &mut watch::Receiver<bool>) {
    // An error means the controller is gone, which also ends the attempt.
    let _ = stopped.wait_for(|stopped| *stopped).await;
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
