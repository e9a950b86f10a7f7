//! Supervising loop
//!
//! [`River`] runs one background worker. Each iteration connects, ensures
//! the index exists, then waits on the work source and processes what it
//! hands over. Connection and provisioning failures are logged and retried
//! after the configured pause. [`River::close`] releases the connection
//! resources and aborts the worker wherever it is parked.

use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::metrics;
use crate::provisioner::{IndexProvisioner, IndexSpec};
use crate::registrar::Registrar;
use crate::transport::ClientHandle;
use crate::work::{Work, WorkSource};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

pub struct River {
    config: Config,
    connection: Arc<ConnectionManager>,
    source: Mutex<Option<Box<dyn WorkSource>>>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    abort: Mutex<Option<AbortHandle>>,
}

impl River {
    pub fn new(config: Config, source: impl WorkSource + 'static) -> Self {
        let connection = ConnectionManager::new(config.connection.clone());
        Self::with_connection(config, connection, source)
    }

    /// Run over a client owned by the host; it is left open on close
    pub fn with_client(config: Config, client: ClientHandle, source: impl WorkSource + 'static) -> Self {
        let connection = ConnectionManager::with_external_client(config.connection.clone(), client);
        Self::with_connection(config, connection, source)
    }

    fn with_connection(
        config: Config,
        connection: ConnectionManager,
        source: impl WorkSource + 'static,
    ) -> Self {
        Self {
            config,
            connection: Arc::new(connection),
            source: Mutex::new(Some(Box::new(source))),
            closed: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            abort: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether the worker task is still running
    pub fn is_running(&self) -> bool {
        self.abort
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the worker. A second call while running is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut abort = self.abort.lock();
        if abort.is_some() {
            debug!("River already started");
            return Ok(());
        }
        let Some(source) = self.source.lock().take() else {
            return Err(Error::Closed);
        };

        let settings = self.config.river_settings(&self.config.index.name);
        info!(
            index = %self.config.index.name,
            mode = ?self.config.connection.mode,
            http = self.config.connection.use_http_protocol,
            provider_url = %settings.source.provider_url,
            source_type = %settings.source.source_type,
            source_name = %settings.source.source_name,
            consumer = %settings.source.consumer_name,
            bulk_size = settings.bulk_size,
            "Starting river"
        );

        let context = WorkerContext {
            config: self.config.clone(),
            connection: self.connection.clone(),
            closed: self.closed.clone(),
        };
        let handle = tokio::spawn(context.run(source));
        *abort = Some(handle.abort_handle());
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Release connection resources and abort the worker. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("River already closed");
            return;
        }
        info!(index = %self.config.index.name, "Closing river");

        self.connection.close();
        if let Some(handle) = self.abort.lock().as_ref() {
            handle.abort();
        }
    }

    /// Wait for the worker to finish, either by exhausting its source or
    /// by being closed
    pub async fn join(&self) {
        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return;
        };
        match handle.await {
            Ok(()) => debug!("River worker finished"),
            Err(e) if e.is_cancelled() => debug!("River worker aborted"),
            Err(e) => error!(error = %e, "River worker panicked"),
        }
    }
}

impl Drop for River {
    fn drop(&mut self) {
        self.close();
    }
}

struct WorkerContext {
    config: Config,
    connection: Arc<ConnectionManager>,
    closed: Arc<AtomicBool>,
}

impl WorkerContext {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn run(self, mut source: Box<dyn WorkSource>) {
        let index = self.config.index.name.clone();
        let retry = self.config.connection.retry_interval();
        let mut recreate = self.config.index.recreate;

        while !self.is_closed() {
            let client = match self.connection.connect().await {
                Ok(client) => client,
                Err(Error::Closed) => break,
                Err(e) => {
                    warn!(error = %e, retry_ms = retry.as_millis() as u64, "Connection failed, retrying");
                    metrics::record_iteration("connect_failed");
                    tokio::time::sleep(retry).await;
                    continue;
                }
            };

            let spec = IndexSpec::from_config(&self.config.index).recreate(recreate);
            if !IndexProvisioner::new(client).ensure_index_with(&spec).await {
                metrics::record_iteration("provision_failed");
                tokio::time::sleep(retry).await;
                continue;
            }
            recreate = false;

            let registrar = match self.connection.registrar() {
                Ok(registrar) => registrar,
                Err(e) => {
                    warn!(error = %e, "No registrar available, retrying");
                    metrics::record_iteration("connect_failed");
                    tokio::time::sleep(retry).await;
                    continue;
                }
            };

            let Some(work) = source.next_work().await else {
                info!(index = %index, "Work source exhausted, worker stopping");
                break;
            };
            process(&registrar, &index, work).await;
            metrics::record_iteration("ok");
        }

        debug!(index = %index, "River worker loop ended");
    }
}

async fn process(registrar: &Registrar, index: &str, work: Work) {
    match work {
        Work::RegisterTerm { field, value, id } => {
            match registrar
                .register_term_query(index, &field, &value, id.as_deref())
                .await
            {
                Ok(id) => info!(index, field = %field, value = %value, id = %id, "Registered term query"),
                Err(e) => warn!(index, field = %field, value = %value, error = %e, "Term query not registered"),
            }
        }
        Work::RegisterTerms { field, values, bulk } => {
            match registrar.register_many(index, &field, &values, bulk).await {
                Ok(ids) => {
                    let registered = ids.iter().filter(|id| id.is_some()).count();
                    info!(
                        index,
                        field = %field,
                        registered,
                        failed = ids.len() - registered,
                        "Registered term queries"
                    );
                }
                Err(e) => error!(index, field = %field, error = %e, "Batch rejected"),
            }
        }
        Work::RegisterQuery { query, id } => {
            match registrar.register_query(index, &query, id.as_deref()).await {
                Ok(id) => info!(index, id = %id, "Registered query"),
                Err(e) => warn!(index, error = %e, "Query not registered"),
            }
        }
    }
}
