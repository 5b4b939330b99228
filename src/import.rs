use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{error, info};

use crate::{
    error::AppError,
    jobs::JobRegistry,
    models::{jobs::JobStatus, pg::PostgresRequest},
    pg,
    s3::ObjectStore,
    storage::Storage,
};

pub struct ImportTask {
    pub job_id: String,
    pub source: ImportSource,
}

pub enum ImportSource {
    /// Download each key and store it under its key path.
    ObjectStore {
        store: Arc<dyn ObjectStore>,
        bucket: String,
        keys: Vec<String>,
    },
    /// Export each `schema.table` item to a local CSV file over a single
    /// connection opened for the duration of the job.
    Database {
        request: PostgresRequest,
        tables: Vec<String>,
    },
}

/// Fixed-size import worker pool draining a FIFO queue. Submissions are
/// never rejected; a queued job stays Pending until a worker picks it up.
pub struct Importer {
    tx: mpsc::UnboundedSender<ImportTask>,
}

impl Importer {
    pub fn start(workers: usize, registry: Arc<JobRegistry>, storage: Storage) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<ImportTask>();
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers {
            let rx = Arc::clone(&rx);
            let registry = Arc::clone(&registry);
            let storage = storage.clone();
            tokio::spawn(async move {
                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else { break };
                    let job_id = task.job_id.clone();
                    info!(worker, job = %job_id, "import job picked up");

                    // Joined so a panicking job lands in the registry as an
                    // Error instead of vanishing with the task.
                    let outcome =
                        tokio::spawn(run_import(Arc::clone(&registry), storage.clone(), task))
                            .await;
                    if let Err(err) = outcome {
                        error!(worker, job = %job_id, "import job aborted: {err}");
                        registry.finish(
                            &job_id,
                            JobStatus::Error,
                            format!("Import aborted unexpectedly: {err}"),
                        );
                    }
                }
            });
        }

        Self { tx }
    }

    pub fn submit(&self, task: ImportTask) -> Result<(), AppError> {
        self.tx
            .send(task)
            .map_err(|_| AppError::Internal("import queue is closed".into()))
    }
}

/// Runs one import job to a terminal state. Items are processed in input
/// order; a failed item is recorded and counted as processed, and never
/// stops the remaining items.
pub async fn run_import(registry: Arc<JobRegistry>, storage: Storage, task: ImportTask) {
    let job_id = task.job_id;
    registry.begin(&job_id);

    let (total, failures) = match task.source {
        ImportSource::ObjectStore {
            store,
            bucket,
            keys,
        } => {
            let total = keys.len();
            let mut failures = Vec::new();
            for key in keys {
                if registry.is_cancelled(&job_id) {
                    finish_cancelled(&registry, &job_id);
                    return;
                }
                registry.set_message(&job_id, format!("Importing {key}..."));
                if let Err(err) = import_object(store.as_ref(), &storage, &bucket, &key).await {
                    failures.push(format!("{key} ({err})"));
                }
                registry.advance(&job_id);
            }
            (total, failures)
        }
        ImportSource::Database { request, tables } => {
            let total = tables.len();
            let mut failures = Vec::new();
            match pg::connect(&request).await {
                Ok(mut conn) => {
                    for item in tables {
                        if registry.is_cancelled(&job_id) {
                            finish_cancelled(&registry, &job_id);
                            return;
                        }
                        registry.set_message(&job_id, format!("Importing table {item}..."));
                        if let Err(err) = import_table(&mut conn, &storage, &item).await {
                            failures.push(format!("{item} ({err})"));
                        }
                        registry.advance(&job_id);
                    }
                }
                Err(err) => {
                    // The connection never came up; every item is recorded
                    // as failed so `processed` still reaches `total`.
                    for item in tables {
                        failures.push(format!("{item} ({err})"));
                        registry.advance(&job_id);
                    }
                }
            }
            (total, failures)
        }
    };

    if failures.is_empty() {
        registry.finish(
            &job_id,
            JobStatus::Done,
            format!("Imported {total} item(s)"),
        );
    } else {
        registry.finish(
            &job_id,
            JobStatus::Error,
            format!(
                "Processed {total} item(s), {} failed: {}",
                failures.len(),
                failures.join("; ")
            ),
        );
    }
}

fn finish_cancelled(registry: &JobRegistry, job_id: &str) {
    let processed = registry
        .get(job_id)
        .map(|progress| format!("{}/{}", progress.processed, progress.total))
        .unwrap_or_default();
    registry.finish(
        job_id,
        JobStatus::Cancelled,
        format!("Import cancelled after {processed} item(s)"),
    );
}

async fn import_object(
    store: &dyn ObjectStore,
    storage: &Storage,
    bucket: &str,
    key: &str,
) -> Result<(), AppError> {
    let bytes = store.download(bucket, key).await?;
    storage.store(key, &bytes).await
}

async fn import_table(
    conn: &mut sqlx::PgConnection,
    storage: &Storage,
    item: &str,
) -> Result<(), AppError> {
    let (schema, table) = pg::parse_table_item(item);
    if table.trim().is_empty() {
        return Err(AppError::BadRequest("empty table name".into()));
    }
    let csv = pg::export_table_csv(conn, schema, table).await?;
    storage
        .store(&format!("{schema}.{table}.csv"), csv.as_bytes())
        .await
}
