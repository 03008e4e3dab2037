//! In-process fakes for the database backend and the queue engine.
//!
//! A `FakeState` is shared by the connector, every handle it opens and every
//! transaction begun on them, so tests can script engine replies and inspect
//! what happened afterwards.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use ara_mail_dispatch::database::{
    ConnectionManager, Connector, DatabaseHandle, DatabaseTransaction, ManagerConfig,
};
use ara_mail_dispatch::error::DispatchError;
use ara_mail_dispatch::queue::{DequeueRequest, ShimRow, ShimSession, QUEUE_EMPTY_CODE};

/// What the fake engine does on one dequeue call.
#[derive(Debug, Clone)]
pub enum EngineReply {
    Message { id: String, payload: String },
    Empty,
    Error { code: String, message: String },
    /// Success flag set but no message row captured
    MissingRow,
    /// Block for the given time, then report empty
    Stall(Duration),
}

impl EngineReply {
    pub fn message(id: &str, payload: &str) -> Self {
        EngineReply::Message {
            id: id.to_string(),
            payload: payload.to_string(),
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        EngineReply::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

type DequeueHook = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
pub struct FakeState {
    pub opened: AtomicUsize,
    /// Handles opened and not yet closed
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub ping_fails: AtomicBool,
    ping_delay: Mutex<Duration>,

    pub begun: AtomicUsize,
    pub committed: AtomicUsize,
    pub rolled_back: AtomicUsize,

    engine: Mutex<VecDeque<EngineReply>>,
    dequeue_delay: Mutex<Duration>,
    pub dequeue_calls: AtomicUsize,
    pub shim_installs: AtomicUsize,
    waits: Mutex<Vec<Duration>>,
    in_dequeue: AtomicUsize,
    pub max_in_dequeue: AtomicUsize,
    on_dequeue: Mutex<Option<DequeueHook>>,
}

impl FakeState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock().unwrap() = delay;
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.ping_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_dequeue_delay(&self, delay: Duration) {
        *self.dequeue_delay.lock().unwrap() = delay;
    }

    /// Queue up engine replies. Once the script runs out the engine
    /// reports an empty queue.
    pub fn script(&self, replies: impl IntoIterator<Item = EngineReply>) {
        self.engine.lock().unwrap().extend(replies);
    }

    /// Run `hook` with the 1-based call number after each dequeue call.
    pub fn on_dequeue(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_dequeue.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn dequeue_calls(&self) -> usize {
        self.dequeue_calls.load(Ordering::SeqCst)
    }

    pub fn shim_installs(&self) -> usize {
        self.shim_installs.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.rolled_back.load(Ordering::SeqCst)
    }

    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> EngineReply {
        self.engine
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(EngineReply::Empty)
    }
}

pub struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new(state: Arc<FakeState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Handle = FakeHandle;

    async fn open(&self) -> Result<FakeHandle, DispatchError> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(FakeHandle {
            state: self.state.clone(),
            closed: AtomicBool::new(false),
            outstanding: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(Notify::new()),
        })
    }

    fn target(&self) -> String {
        "fake://dispatch".to_string()
    }
}

pub struct FakeHandle {
    state: Arc<FakeState>,
    closed: AtomicBool,
    outstanding: Arc<AtomicUsize>,
    released: Arc<Notify>,
}

#[async_trait]
impl DatabaseHandle for FakeHandle {
    type Tx = FakeTransaction;

    async fn ping(&self) -> Result<(), sqlx::Error> {
        let delay = *self.state.ping_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.is_closed() {
            return Err(sqlx::Error::PoolClosed);
        }
        if self.state.ping_fails.load(Ordering::SeqCst) {
            return Err(sqlx::Error::Protocol("ping refused".to_string()));
        }
        Ok(())
    }

    async fn begin(&self) -> Result<FakeTransaction, sqlx::Error> {
        if self.is_closed() {
            return Err(sqlx::Error::PoolClosed);
        }
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.state.begun.fetch_add(1, Ordering::SeqCst);
        Ok(FakeTransaction {
            state: self.state.clone(),
            outstanding: self.outstanding.clone(),
            released: self.released.clone(),
            finished: false,
            captured: None,
        })
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
        loop {
            let released = self.released.notified();
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            released.await;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeTransaction {
    state: Arc<FakeState>,
    outstanding: Arc<AtomicUsize>,
    released: Arc<Notify>,
    finished: bool,
    captured: Option<EngineReply>,
}

impl FakeTransaction {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            self.released.notify_waiters();
        }
    }
}

impl Drop for FakeTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.state.rolled_back.fetch_add(1, Ordering::SeqCst);
            self.finish();
        }
    }
}

#[async_trait]
impl DatabaseTransaction for FakeTransaction {
    async fn commit(mut self) -> Result<(), sqlx::Error> {
        self.state.committed.fetch_add(1, Ordering::SeqCst);
        self.finish();
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), sqlx::Error> {
        self.state.rolled_back.fetch_add(1, Ordering::SeqCst);
        self.finish();
        Ok(())
    }
}

#[async_trait]
impl ShimSession for FakeTransaction {
    async fn install_shim(&mut self) -> Result<(), sqlx::Error> {
        self.state.shim_installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn invoke_dequeue(&mut self, request: &DequeueRequest) -> Result<(), sqlx::Error> {
        let concurrent = self.state.in_dequeue.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_in_dequeue
            .fetch_max(concurrent, Ordering::SeqCst);
        let call = self.state.dequeue_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.waits.lock().unwrap().push(request.wait);

        let delay = *self.state.dequeue_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = match self.state.next_reply() {
            EngineReply::Stall(stall) => {
                tokio::time::sleep(stall).await;
                EngineReply::Empty
            }
            reply => reply,
        };
        self.captured = Some(reply);
        self.state.in_dequeue.fetch_sub(1, Ordering::SeqCst);

        if let Some(hook) = self.state.on_dequeue.lock().unwrap().as_ref() {
            hook(call);
        }
        Ok(())
    }

    async fn read_success(&mut self) -> Result<bool, sqlx::Error> {
        Ok(matches!(
            self.captured,
            Some(EngineReply::Message { .. }) | Some(EngineReply::MissingRow)
        ))
    }

    async fn read_error_code(&mut self) -> Result<Option<String>, sqlx::Error> {
        Ok(match &self.captured {
            Some(EngineReply::Empty) => Some(QUEUE_EMPTY_CODE.to_string()),
            Some(EngineReply::Error { code, .. }) => Some(code.clone()),
            _ => None,
        })
    }

    async fn read_error_message(&mut self) -> Result<Option<String>, sqlx::Error> {
        Ok(match &self.captured {
            Some(EngineReply::Empty) => Some("no messages available".to_string()),
            Some(EngineReply::Error { message, .. }) => Some(message.clone()),
            _ => None,
        })
    }

    async fn fetch_message(&mut self) -> Result<Option<ShimRow>, sqlx::Error> {
        Ok(match &self.captured {
            Some(EngineReply::Message { id, payload }) => Some(ShimRow {
                message_id: id.clone(),
                payload: payload.clone(),
            }),
            _ => None,
        })
    }
}

/// Millisecond-scale timings so drain and watchdog paths run quickly.
pub fn fast_config() -> ManagerConfig {
    ManagerConfig {
        reconnect_interval: Duration::from_secs(3600),
        reconnect_retry_initial: Duration::from_millis(20),
        reconnect_retry_max: Duration::from_millis(50),
        health_check_timeout: Duration::from_millis(200),
        exec_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_millis(200),
        drain_timeout: Duration::from_millis(300),
        drain_poll_interval: Duration::from_millis(10),
        drain_log_interval: Duration::from_millis(50),
        drain_retry_attempts: 3,
        drain_retry_delay: Duration::from_millis(10),
        close_timeout: Duration::from_millis(500),
    }
}

pub fn manager(
    state: &Arc<FakeState>,
    config: ManagerConfig,
) -> Arc<ConnectionManager<FakeConnector>> {
    Arc::new(ConnectionManager::new(
        FakeConnector::new(state.clone()),
        config,
    ))
}

/// A manager with an installed handle.
pub async fn open_manager(state: &Arc<FakeState>) -> Arc<ConnectionManager<FakeConnector>> {
    let manager = manager(state, fast_config());
    manager.open().await.expect("fake open should succeed");
    manager
}
