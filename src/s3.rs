use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{
    Client,
    config::Credentials,
    error::DisplayErrorContext,
    primitives::DateTimeFormat,
};

use crate::{
    error::AppError,
    models::s3::{MetadataEntry, ObjectMetadata, S3Request},
};

/// Counting a folder stops once this many objects have been seen; an
/// approximate-but-bounded count is preferred over an exact-but-unbounded
/// walk of very large folders.
pub const FOLDER_COUNT_CAP: usize = 1000;

const DEFAULT_REGION: &str = "eu-central-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: i64,
}

/// One page of a listing call: direct entries, collapsed child folders
/// (only populated for delimiter listings) and the continuation token for
/// the next page, if any.
#[derive(Debug, Clone)]
pub struct ObjectPage {
    pub entries: Vec<ObjectEntry>,
    pub folders: Vec<String>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FolderSummary {
    pub prefix: String,
    pub file_count: usize,
    pub capped: bool,
}

#[derive(Debug, Clone)]
pub struct Listing {
    pub files: Vec<ObjectEntry>,
    pub folders: Vec<FolderSummary>,
    pub recursive_file_count: usize,
}

/// The slice of an object store the browser and importer need. Kept
/// narrow so the listing and import logic can be exercised against an
/// in-memory store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        token: Option<String>,
    ) -> Result<ObjectPage, AppError>;

    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, AppError>;

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, AppError>;
}

/// Lists the immediate children of `prefix`: files at this level plus one
/// summary per child folder, each folder counted with its own paginated,
/// capped walk. The recursive count is derived arithmetically from those
/// counts rather than re-walking the subtree.
pub async fn list_level(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> Result<Listing, AppError> {
    let mut files = Vec::new();
    let mut folder_prefixes = Vec::new();
    let mut seen_folders = HashSet::new();
    let mut token = None;

    loop {
        let page = store.list_page(bucket, prefix, Some("/"), token).await?;
        files.extend(page.entries.into_iter().filter(|entry| entry.key != prefix));
        for folder in page.folders {
            if seen_folders.insert(folder.clone()) {
                folder_prefixes.push(folder);
            }
        }
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    let mut folders = Vec::with_capacity(folder_prefixes.len());
    for folder_prefix in folder_prefixes {
        folders.push(count_folder(store, bucket, folder_prefix).await?);
    }

    let recursive_file_count = files.len()
        + folders
            .iter()
            .map(|folder| folder.file_count)
            .sum::<usize>();

    Ok(Listing {
        files,
        folders,
        recursive_file_count,
    })
}

/// Every object under `prefix`, following continuation tokens to
/// exhaustion. No cap: this is the explicit "give me everything" variant.
pub async fn list_all(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<ObjectEntry>, AppError> {
    let mut entries = Vec::new();
    let mut token = None;

    loop {
        let page = store.list_page(bucket, prefix, None, token).await?;
        entries.extend(page.entries.into_iter().filter(|entry| entry.key != prefix));
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    Ok(entries)
}

/// Per-key metadata lookup; a failure for one key never aborts the rest.
pub async fn fetch_metadata(
    store: &dyn ObjectStore,
    bucket: &str,
    keys: &[String],
) -> HashMap<String, MetadataEntry> {
    let mut results = HashMap::with_capacity(keys.len());
    for key in keys {
        let entry = match store.head(bucket, key).await {
            Ok(metadata) => MetadataEntry::Found(metadata),
            Err(err) => MetadataEntry::Failed(format!("Error: {err}")),
        };
        results.insert(key.clone(), entry);
    }
    results
}

async fn count_folder(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: String,
) -> Result<FolderSummary, AppError> {
    let mut count = 0;
    let mut token = None;

    loop {
        let page = store.list_page(bucket, &prefix, None, token).await?;
        count += page
            .entries
            .iter()
            .filter(|entry| entry.key != prefix)
            .count();

        if count >= FOLDER_COUNT_CAP {
            return Ok(FolderSummary {
                prefix,
                file_count: FOLDER_COUNT_CAP,
                capped: true,
            });
        }

        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    Ok(FolderSummary {
        prefix,
        file_count: count,
        capped: false,
    })
}

/// `ObjectStore` backed by the AWS SDK. One client is built per request
/// from the caller-supplied credentials and released when the call ends.
pub struct AwsStore {
    client: Client,
}

impl AwsStore {
    pub async fn connect(request: &S3Request) -> Self {
        let region = match request.region.as_deref() {
            Some(region) if !region.trim().is_empty() => region.trim().to_string(),
            _ => DEFAULT_REGION.to_string(),
        };
        let credentials = Credentials::new(
            request.access_key.clone(),
            request.secret_key.clone(),
            None,
            None,
            "harbor-backend",
        );
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .load()
            .await;
        Self {
            client: Client::new(&config),
        }
    }
}

#[async_trait]
impl ObjectStore for AwsStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        token: Option<String>,
    ) -> Result<ObjectPage, AppError> {
        let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
        if let Some(delimiter) = delimiter {
            request = request.delimiter(delimiter);
        }
        if let Some(token) = token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AppError::Store(DisplayErrorContext(&err).to_string()))?;

        let entries = response
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| ObjectEntry {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0),
                })
            })
            .collect();
        let folders = response
            .common_prefixes()
            .iter()
            .filter_map(|common| common.prefix().map(str::to_string))
            .collect();

        Ok(ObjectPage {
            entries,
            folders,
            next_token: response.next_continuation_token().map(str::to_string),
        })
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, AppError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| AppError::Store(DisplayErrorContext(&err).to_string()))?;
        let bytes = response
            .body
            .collect()
            .await
            .map_err(|err| AppError::Store(err.to_string()))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, AppError> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| AppError::Store(DisplayErrorContext(&err).to_string()))?;

        Ok(ObjectMetadata {
            size: response.content_length().unwrap_or(0),
            last_modified: response
                .last_modified()
                .and_then(|modified| modified.fmt(DateTimeFormat::DateTime).ok()),
            content_type: response.content_type().map(str::to_string),
            etag: response.e_tag().map(str::to_string),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    /// In-memory `ObjectStore` with configurable page size, per-key
    /// download failures and a request counter.
    pub struct MemoryStore {
        objects: Vec<(String, i64)>,
        page_size: usize,
        pub fail_downloads: HashSet<String>,
        pub requests: AtomicUsize,
    }

    impl MemoryStore {
        pub fn new(keys: &[(&str, i64)], page_size: usize) -> Self {
            Self {
                objects: keys
                    .iter()
                    .map(|(key, size)| (key.to_string(), *size))
                    .collect(),
                page_size,
                fail_downloads: HashSet::new(),
                requests: AtomicUsize::new(0),
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn list_page(
            &self,
            _bucket: &str,
            prefix: &str,
            delimiter: Option<&str>,
            token: Option<String>,
        ) -> Result<ObjectPage, AppError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let matching: Vec<&(String, i64)> = self
                .objects
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .collect();

            match delimiter {
                Some(delimiter) => {
                    let mut entries = Vec::new();
                    let mut folders = Vec::new();
                    let mut seen = HashSet::new();
                    for (key, size) in matching {
                        let rest = &key[prefix.len()..];
                        if let Some(split) = rest.find(delimiter) {
                            let folder =
                                format!("{prefix}{}{delimiter}", &rest[..split]);
                            if seen.insert(folder.clone()) {
                                folders.push(folder);
                            }
                        } else {
                            entries.push(ObjectEntry {
                                key: key.clone(),
                                size: *size,
                            });
                        }
                    }
                    Ok(ObjectPage {
                        entries,
                        folders,
                        next_token: None,
                    })
                }
                None => {
                    let start: usize = token
                        .map(|token| token.parse().expect("memory store token"))
                        .unwrap_or(0);
                    let end = (start + self.page_size).min(matching.len());
                    let entries = matching[start..end]
                        .iter()
                        .map(|(key, size)| ObjectEntry {
                            key: key.clone(),
                            size: *size,
                        })
                        .collect();
                    Ok(ObjectPage {
                        entries,
                        folders: Vec::new(),
                        next_token: (end < matching.len()).then(|| end.to_string()),
                    })
                }
            }
        }

        async fn download(&self, _bucket: &str, key: &str) -> Result<Vec<u8>, AppError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.fail_downloads.contains(key) {
                return Err(AppError::Store(format!("access denied for {key}")));
            }
            if self.objects.iter().any(|(object, _)| object == key) {
                Ok(format!("contents of {key}").into_bytes())
            } else {
                Err(AppError::Store(format!("no such key: {key}")))
            }
        }

        async fn head(&self, _bucket: &str, key: &str) -> Result<ObjectMetadata, AppError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            match self.objects.iter().find(|(object, _)| object == key) {
                Some((_, size)) => Ok(ObjectMetadata {
                    size: *size,
                    last_modified: Some("2024-01-01T00:00:00Z".to_string()),
                    content_type: Some("application/octet-stream".to_string()),
                    etag: Some(format!("\"etag-{key}\"")),
                }),
                None => Err(AppError::Store(format!("no such key: {key}"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::MemoryStore, *};

    #[tokio::test]
    async fn empty_bucket_yields_empty_listing() {
        let store = MemoryStore::new(&[], 100);
        let listing = list_level(&store, "bucket", "").await.unwrap();
        assert!(listing.files.is_empty());
        assert!(listing.folders.is_empty());
        assert_eq!(listing.recursive_file_count, 0);
    }

    #[tokio::test]
    async fn missing_prefix_behaves_like_empty_bucket() {
        let store = MemoryStore::new(&[("a.txt", 1)], 100);
        let listing = list_level(&store, "bucket", "no-such-dir/").await.unwrap();
        assert!(listing.files.is_empty());
        assert!(listing.folders.is_empty());
        assert_eq!(listing.recursive_file_count, 0);
    }

    #[tokio::test]
    async fn one_level_with_folder_counts() {
        let store = MemoryStore::new(&[("a.txt", 10), ("dir/b.txt", 20), ("dir/c.txt", 30)], 100);
        let listing = list_level(&store, "bucket", "").await.unwrap();

        assert_eq!(
            listing.files,
            vec![ObjectEntry {
                key: "a.txt".into(),
                size: 10
            }]
        );
        assert_eq!(listing.folders.len(), 1);
        assert_eq!(listing.folders[0].prefix, "dir/");
        assert_eq!(listing.folders[0].file_count, 2);
        assert!(!listing.folders[0].capped);
        assert_eq!(listing.recursive_file_count, 3);
    }

    #[tokio::test]
    async fn prefix_marker_object_is_excluded() {
        let store = MemoryStore::new(&[("dir/", 0), ("dir/a.txt", 5)], 100);
        let listing = list_level(&store, "bucket", "dir/").await.unwrap();
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].key, "dir/a.txt");
        assert_eq!(listing.recursive_file_count, 1);

        let all = list_all(&store, "bucket", "dir/").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "dir/a.txt");
    }

    #[tokio::test]
    async fn folder_over_cap_reports_capped_count_and_stops_early() {
        let keys: Vec<String> = (0..1500).map(|n| format!("big/{n:04}.dat")).collect();
        let objects: Vec<(&str, i64)> = keys.iter().map(|key| (key.as_str(), 1)).collect();
        let store = MemoryStore::new(&objects, 100);

        let listing = list_level(&store, "bucket", "").await.unwrap();
        assert_eq!(listing.folders.len(), 1);
        assert_eq!(listing.folders[0].file_count, FOLDER_COUNT_CAP);
        assert!(listing.folders[0].capped);
        assert_eq!(listing.recursive_file_count, FOLDER_COUNT_CAP);

        // 1 delimiter page plus at most cap/page_size count pages: the walk
        // stopped at the cap instead of paging through all 1500 objects.
        assert!(store.request_count() <= 11, "made {} requests", store.request_count());
    }

    #[tokio::test]
    async fn folder_under_cap_reports_exact_count() {
        let keys: Vec<String> = (0..42).map(|n| format!("small/{n:02}.dat")).collect();
        let objects: Vec<(&str, i64)> = keys.iter().map(|key| (key.as_str(), 1)).collect();
        let store = MemoryStore::new(&objects, 10);

        let listing = list_level(&store, "bucket", "").await.unwrap();
        assert_eq!(listing.folders[0].file_count, 42);
        assert!(!listing.folders[0].capped);
    }

    #[tokio::test]
    async fn list_all_is_invariant_under_repagination() {
        let keys: Vec<String> = (0..23).map(|n| format!("data/{n:02}.bin")).collect();
        let objects: Vec<(&str, i64)> = keys.iter().map(|key| (key.as_str(), 1)).collect();

        let mut reference: Option<Vec<String>> = None;
        for page_size in [1, 7, 23, 1000] {
            let store = MemoryStore::new(&objects, page_size);
            let mut listed: Vec<String> = list_all(&store, "bucket", "data/")
                .await
                .unwrap()
                .into_iter()
                .map(|entry| entry.key)
                .collect();
            listed.sort();
            let deduped: HashSet<&String> = listed.iter().collect();
            assert_eq!(deduped.len(), listed.len(), "duplicate keys at page size {page_size}");
            match &reference {
                Some(expected) => assert_eq!(&listed, expected),
                None => reference = Some(listed),
            }
        }
    }

    #[tokio::test]
    async fn metadata_failures_are_isolated_per_key() {
        let store = MemoryStore::new(&[("ok.txt", 7)], 100);
        let keys = vec!["ok.txt".to_string(), "missing.txt".to_string()];
        let results = fetch_metadata(&store, "bucket", &keys).await;

        assert!(matches!(
            results.get("ok.txt"),
            Some(MetadataEntry::Found(meta)) if meta.size == 7
        ));
        assert!(matches!(
            results.get("missing.txt"),
            Some(MetadataEntry::Failed(text)) if text.starts_with("Error: ")
        ));
    }
}
