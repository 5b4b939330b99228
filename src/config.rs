use std::{env, path::PathBuf};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_root: PathBuf,
    pub log_dir: PathBuf,
    pub import_workers: usize,
    /// Seconds a finished job stays visible to pollers. `None` keeps
    /// finished jobs for the lifetime of the process.
    pub job_retention_secs: Option<u64>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid SERVER_PORT: {err}")))?;

        let storage_root =
            PathBuf::from(env::var("HARBOR_STORAGE_ROOT").unwrap_or_else(|_| "./uploads".into()));

        let log_dir = PathBuf::from(env::var("HARBOR_LOG_DIR").unwrap_or_else(|_| "./log".into()));

        let import_workers: usize = env::var("HARBOR_IMPORT_WORKERS")
            .unwrap_or_else(|_| "4".into())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid HARBOR_IMPORT_WORKERS: {err}")))?;
        if import_workers == 0 {
            return Err(AppError::Config(
                "HARBOR_IMPORT_WORKERS must be at least 1".into(),
            ));
        }

        let job_retention_secs = match env::var("HARBOR_JOB_RETENTION_SECS") {
            Ok(value) => Some(value.parse::<u64>().map_err(|err| {
                AppError::Config(format!("invalid HARBOR_JOB_RETENTION_SECS: {err}"))
            })?),
            Err(_) => None,
        };

        Ok(Self {
            host,
            port,
            storage_root,
            log_dir,
            import_workers,
            job_retention_secs,
        })
    }
}
