//! Index worker: a dedicated OS thread that owns the search indexes.
//!
//! ```text
//! ┌──────────────┐  Envelope{id, request}  ┌───────────────┐
//! │ IndexHandle  │────────────────────────▶│ worker thread │
//! │ (any task)   │                         │ SearchIndexes │
//! └──────▲───────┘                         └───────┬───────┘
//!        │ oneshot by id  ┌──────────────┐         │ (id, result)
//!        └────────────────│ router task  │◀────────┘
//!                         └──────────────┘
//! ```
//!
//! Callers never touch the indexes. Every request and response is plain
//! data tagged with a correlation id, and the router task hands each reply
//! to the caller waiting on that id. Requests are processed one at a time,
//! so mutations are serialized. The worker stops once every handle is
//! dropped.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use starshelf_core::index::{IndexBackend, IndexRequest, IndexResponse, SearchIndexes};

/// A request tagged with its correlation id.
#[derive(Debug)]
pub struct Envelope {
    pub id: u64,
    pub request: IndexRequest,
}

type Reply = (u64, Result<IndexResponse>);
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<IndexResponse>>>>>;

pub struct IndexWorker;

impl IndexWorker {
    /// Move `indexes` onto a new thread and return a handle to it.
    /// Must be called from within a tokio runtime.
    pub fn spawn(indexes: SearchIndexes) -> Result<IndexHandle> {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Envelope>();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Reply>();

        thread::Builder::new()
            .name("starshelf-index".to_string())
            .spawn(move || {
                let mut indexes = indexes;
                debug!("index worker started");
                while let Some(Envelope { id, request }) = request_rx.blocking_recv() {
                    let result = indexes.handle(request);
                    if reply_tx.send((id, result)).is_err() {
                        break;
                    }
                }
                info!("index worker stopped");
            })
            .context("Failed to spawn index worker thread")?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let router_pending = pending.clone();
        tokio::spawn(async move {
            while let Some((id, result)) = reply_rx.recv().await {
                let waiter = router_pending
                    .lock()
                    .ok()
                    .and_then(|mut map| map.remove(&id));
                match waiter {
                    Some(tx) => {
                        // The caller may have given up; nothing to do then.
                        let _ = tx.send(result);
                    }
                    None => warn!(id, "index reply with no waiting caller"),
                }
            }
        });

        Ok(IndexHandle {
            inner: Arc::new(HandleInner {
                tx: request_tx,
                pending,
                next_id: AtomicU64::new(1),
            }),
        })
    }
}

struct HandleInner {
    tx: mpsc::UnboundedSender<Envelope>,
    pending: Pending,
    next_id: AtomicU64,
}

/// Cheap, cloneable handle to the index worker.
#[derive(Clone)]
pub struct IndexHandle {
    inner: Arc<HandleInner>,
}

impl IndexHandle {
    fn forget(&self, id: u64) {
        if let Ok(mut map) = self.inner.pending.lock() {
            map.remove(&id);
        }
    }

    /// Requests sent but not yet answered.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.lock().map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl IndexBackend for IndexHandle {
    async fn call(&self, request: IndexRequest) -> Result<IndexResponse> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .map_err(|_| anyhow!("index router state poisoned"))?
            .insert(id, tx);

        if self.inner.tx.send(Envelope { id, request }).is_err() {
            self.forget(id);
            return Err(anyhow!("index worker has stopped"));
        }

        rx.await
            .map_err(|_| anyhow!("index worker dropped request {}", id))?
    }
}
