use std::{collections::HashMap, sync::Arc};

use actix_multipart::{Field, Multipart};
use actix_web::{HttpResponse, delete, get, post, web};
use futures_util::TryStreamExt;
use serde_json::json;

use crate::{
    AppState,
    error::AppError,
    import::{ImportSource, ImportTask},
    models::{
        jobs::SubmitResponse,
        pg::PostgresRequest,
        s3::{AllFilesResponse, ListResponse, S3Request},
    },
    pg,
    s3::{self, AwsStore},
};

pub fn register(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(
        web::scope("/rest")
            .service(list_s3)
            .service(list_s3_all_files)
            .service(s3_metadata)
            .service(load_s3)
            .service(list_postgres)
            .service(postgres_table_preview)
            .service(load_postgres)
            .service(import_progress)
            .service(import_cancel)
            .service(upload_file)
            .service(download_file)
            .service(list_files)
            .service(delete_file),
    );
}

#[get("/healthz")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": "harbor-backend",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[post("/list-s3")]
async fn list_s3(request: web::Json<S3Request>) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    validate_bucket(&request)?;

    let store = AwsStore::connect(&request).await;
    let listing = s3::list_level(&store, &request.bucket, request.prefix()).await?;

    let file_sizes: HashMap<String, i64> = listing
        .files
        .iter()
        .map(|entry| (entry.key.clone(), entry.size))
        .collect();
    let folder_file_counts: HashMap<String, usize> = listing
        .folders
        .iter()
        .map(|folder| (folder.prefix.clone(), folder.file_count))
        .collect();
    let folder_count_capped: HashMap<String, bool> = listing
        .folders
        .iter()
        .map(|folder| (folder.prefix.clone(), folder.capped))
        .collect();

    Ok(HttpResponse::Ok().json(ListResponse {
        files: listing.files.into_iter().map(|entry| entry.key).collect(),
        folders: listing
            .folders
            .into_iter()
            .map(|folder| folder.prefix)
            .collect(),
        file_sizes,
        folder_file_counts,
        folder_count_capped,
        recursive_file_count: listing.recursive_file_count,
    }))
}

#[post("/list-s3-all-files")]
async fn list_s3_all_files(request: web::Json<S3Request>) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    validate_bucket(&request)?;

    let store = AwsStore::connect(&request).await;
    let entries = s3::list_all(&store, &request.bucket, request.prefix()).await?;

    Ok(HttpResponse::Ok().json(AllFilesResponse {
        files: entries.into_iter().map(|entry| entry.key).collect(),
    }))
}

#[post("/s3-metadata")]
async fn s3_metadata(request: web::Json<S3Request>) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    validate_bucket(&request)?;
    let keys = required_items(request.files.as_deref(), "no files specified")?;

    let store = AwsStore::connect(&request).await;
    let metadata = s3::fetch_metadata(&store, &request.bucket, &keys).await;
    Ok(HttpResponse::Ok().json(metadata))
}

#[post("/load-s3-progress")]
async fn load_s3(
    request: web::Json<S3Request>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    validate_bucket(&request)?;
    let keys = required_items(request.files.as_deref(), "no files specified for loading")?;

    let job_id = state
        .jobs
        .create(keys.len() as u64, request.job_id.as_deref())?;
    let store = Arc::new(AwsStore::connect(&request).await);
    state.importer.submit(ImportTask {
        job_id: job_id.clone(),
        source: ImportSource::ObjectStore {
            store,
            bucket: request.bucket,
            keys,
        },
    })?;

    Ok(HttpResponse::Accepted().json(SubmitResponse { job_id }))
}

#[post("/list-postgres")]
async fn list_postgres(request: web::Json<PostgresRequest>) -> Result<HttpResponse, AppError> {
    let response = pg::list_contents(&request).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/postgres-table-preview")]
async fn postgres_table_preview(
    request: web::Json<PostgresRequest>,
) -> Result<HttpResponse, AppError> {
    let response = pg::table_preview(&request).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/load-postgres-progress")]
async fn load_postgres(
    request: web::Json<PostgresRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    let tables = required_items(request.tables.as_deref(), "no tables specified for loading")?;
    if tables.iter().any(|table| table.trim().is_empty()) {
        return Err(AppError::BadRequest("empty table name".into()));
    }

    let job_id = state
        .jobs
        .create(tables.len() as u64, request.job_id.as_deref())?;
    state.importer.submit(ImportTask {
        job_id: job_id.clone(),
        source: ImportSource::Database { request, tables },
    })?;

    Ok(HttpResponse::Accepted().json(SubmitResponse { job_id }))
}

#[get("/import-progress/{job_id}")]
async fn import_progress(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let job_id = path.into_inner();
    let progress = state
        .jobs
        .get(&job_id)
        .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
    Ok(HttpResponse::Ok().json(progress))
}

#[post("/import-cancel/{job_id}")]
async fn import_cancel(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let job_id = path.into_inner();
    if !state.jobs.cancel(&job_id) {
        return Err(AppError::NotFound(format!("job {job_id}")));
    }
    Ok(HttpResponse::Ok().json(json!({ "cancelled": true })))
}

#[post("/upload")]
async fn upload_file(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let mut stored: Option<String> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|err| AppError::BadRequest(format!("multipart error: {err}")))?
    {
        let Some(content_disposition) = field.content_disposition().cloned() else {
            continue;
        };
        if content_disposition.get_name() != Some("file") {
            // Drain unknown fields.
            collect_binary_field(&mut field).await?;
            continue;
        }

        let filename = content_disposition
            .get_filename()
            .map(|name| name.to_string())
            .ok_or_else(|| AppError::BadRequest("file field has no filename".into()))?;
        let bytes = collect_binary_field(&mut field).await?;
        state.storage.store(&filename, &bytes).await?;
        stored = Some(filename);
    }

    match stored {
        Some(name) => Ok(HttpResponse::Ok().body(format!("File uploaded successfully: {name}"))),
        None => Err(AppError::BadRequest("no file provided".into())),
    }
}

#[get("/download/{filename:.*}")]
async fn download_file(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let name = path.into_inner();
    let bytes = state.storage.retrieve(&name).await?;
    let attachment = name.rsplit('/').next().unwrap_or(&name).to_string();
    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{attachment}\""),
        ))
        .body(bytes))
}

#[get("/list")]
async fn list_files(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let names = state.storage.list()?;
    Ok(HttpResponse::Ok().json(names))
}

#[delete("/delete/{filename:.*}")]
async fn delete_file(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let name = path.into_inner();
    if state.storage.delete(&name).await? {
        Ok(HttpResponse::Ok().body(format!("File deleted: {name}")))
    } else {
        Err(AppError::NotFound(format!("file {name}")))
    }
}

fn validate_bucket(request: &S3Request) -> Result<(), AppError> {
    if request.bucket.trim().is_empty() {
        return Err(AppError::BadRequest("bucket is required".into()));
    }
    Ok(())
}

fn required_items(items: Option<&[String]>, message: &str) -> Result<Vec<String>, AppError> {
    match items {
        Some(items) if !items.is_empty() => Ok(items.to_vec()),
        _ => Err(AppError::BadRequest(message.into())),
    }
}

async fn collect_binary_field(field: &mut Field) -> Result<Vec<u8>, AppError> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .try_next()
        .await
        .map_err(|err| AppError::BadRequest(format!("failed to read field: {err}")))?
    {
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}
