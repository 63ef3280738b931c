//! Scripted backend and display collaborators.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use vm_session_core::{
    BackendClient, ConnectionHandle, DisplayConnector, DisplayContainer, DisplayEvent,
    DisplayEvents, DisplayOptions, SessionId, StartedVm,
    traits::{ConnectError, InfoError, StartError, StopError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Awaited,
    Detached,
}

/// Backend that hands out a fixed id and records stop requests.
pub struct MockBackend {
    session_id: String,
    start_delay: Duration,
    fail_start: bool,
    pub starts: Mutex<u32>,
    pub stops: Mutex<Vec<(SessionId, Delivery)>>,
}

impl MockBackend {
    pub fn new(session_id: &str) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.to_string(),
            start_delay: Duration::ZERO,
            fail_start: false,
            starts: Mutex::new(0),
            stops: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(session_id: &str, start_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.to_string(),
            start_delay,
            fail_start: false,
            starts: Mutex::new(0),
            stops: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            session_id: String::new(),
            start_delay: Duration::ZERO,
            fail_start: true,
            starts: Mutex::new(0),
            stops: Mutex::new(Vec::new()),
        })
    }

    pub fn stops(&self) -> Vec<(SessionId, Delivery)> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn start(&self) -> Result<StartedVm, StartError> {
        *self.starts.lock().unwrap() += 1;
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.fail_start {
            return Err(StartError::Rejected {
                status: 500,
                body: "failed to start vm".to_string(),
            });
        }
        Ok(StartedVm {
            session_id: SessionId::new(self.session_id.clone()),
            container_id: None,
            message: "vm started".to_string(),
        })
    }

    async fn stop(&self, session_id: &SessionId) -> Result<(), StopError> {
        self.stops
            .lock()
            .unwrap()
            .push((session_id.clone(), Delivery::Awaited));
        Ok(())
    }

    fn stop_detached(&self, session_id: &SessionId) {
        self.stops
            .lock()
            .unwrap()
            .push((session_id.clone(), Delivery::Detached));
    }

    async fn info(&self, session_id: &SessionId) -> Result<Value, InfoError> {
        Ok(json!({ "VMID": session_id.as_str() }))
    }
}

/// What a scripted endpoint does when connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// `connect` returns an error.
    FailSync,
    /// Handshake starts, then the stream is refused.
    FailAsync,
    /// Stream connects after the given delay.
    ConnectAfter(Duration),
    /// Handshake never finishes.
    Hang,
}

/// One `connect` call observed by the display.
#[derive(Clone)]
pub struct Connection {
    pub url: String,
    pub handle: ConnectionHandle,
    pub events: mpsc::UnboundedSender<DisplayEvent>,
}

type Script = Box<dyn Fn(&str, usize) -> Behavior + Send + Sync>;

/// Display whose endpoints behave according to a script.
pub struct ScriptedDisplay {
    script: Script,
    pub calls: Mutex<Vec<String>>,
    pub connections: Mutex<Vec<Connection>>,
}

impl ScriptedDisplay {
    /// `script(url, call_index)` decides each call's behavior.
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&str, usize) -> Behavior + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
        })
    }

    /// Every endpoint behaves the same way.
    pub fn always(behavior: Behavior) -> Arc<Self> {
        Self::new(move |_, _| behavior)
    }

    /// Behaviors consumed in call order; `FailSync` once exhausted.
    pub fn sequence(behaviors: Vec<Behavior>) -> Arc<Self> {
        let queue = Mutex::new(VecDeque::from(behaviors));
        Self::new(move |_, _| queue.lock().unwrap().pop_front().unwrap_or(Behavior::FailSync))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn connection(&self, index: usize) -> Connection {
        self.connections.lock().unwrap()[index].clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

impl DisplayConnector for ScriptedDisplay {
    fn connect(
        &self,
        container: &DisplayContainer,
        url: &str,
        options: DisplayOptions,
    ) -> Result<(ConnectionHandle, DisplayEvents), ConnectError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(url.to_string());
            calls.len() - 1
        };

        let behavior = (self.script)(url, index);
        if behavior == Behavior::FailSync {
            return Err(ConnectError::InvalidEndpoint {
                url: url.to_string(),
                reason: "blocked".to_string(),
            });
        }

        let (handle, mut control) = ConnectionHandle::pair(url, options);
        let (tx, rx) = mpsc::unbounded_channel();
        container.claim(handle.id(), options);

        self.connections.lock().unwrap().push(Connection {
            url: url.to_string(),
            handle: handle.clone(),
            events: tx.clone(),
        });

        tokio::spawn(async move {
            let _ = tx.send(DisplayEvent::Connecting);
            match behavior {
                Behavior::FailAsync => {
                    let _ = tx.send(DisplayEvent::Disconnected {
                        reason: "connection refused".to_string(),
                    });
                    return;
                }
                Behavior::ConnectAfter(delay) => {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {
                            let _ = tx.send(DisplayEvent::Connected);
                        }
                        _ = &mut control.shutdown => {
                            let _ = tx.send(DisplayEvent::Disconnected {
                                reason: "disconnect requested".to_string(),
                            });
                            return;
                        }
                    }
                }
                Behavior::Hang | Behavior::FailSync => {}
            }
            let _ = (&mut control.shutdown).await;
            let _ = tx.send(DisplayEvent::Disconnected {
                reason: "disconnect requested".to_string(),
            });
        });

        Ok((handle, rx))
    }
}

/// Let spawned tasks run without advancing the paused clock far.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
