//! Archive Objects and Their Enumeration
//!
//! A `StoreArchive` is one listed archive object with its decoded key; an
//! `ArchiveRepository` lists and writes the archives of one stream/client
//! pair. The repository is the shared substrate of the replay paths: the
//! store reader enumerates date ranges through it and the tail reader walks
//! it to find where archived history ends.
//!
//! ## Listing Semantics
//!
//! Object listings are prefix scans per UTC day. The object store evaluates
//! prefixes per path segment, so the repository lists the day directory and
//! narrows to the `{stream}[-{client}]-` filename prefix itself. Keys that
//! end in `.metadata` are manifest siblings, not archives; keys that fail to
//! decode are logged and skipped because unrelated writers may share the
//! bucket. Listing is fully paginated by the object store client.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::{debug, warn};
use triton_core::{ArchiveKey, StreamMetadata};

use crate::archive_reader::ArchiveReader;
use crate::error::Result;

/// One archive object in the bucket, with its parsed key.
pub struct StoreArchive {
    store: Arc<dyn ObjectStore>,
    pub key: String,
    pub archive_key: ArchiveKey,
    /// Embedded unix time; archives sort by `(day, sort_value)`.
    pub sort_value: i64,
}

impl StoreArchive {
    /// Wrap a listed key, failing if it does not match the archive grammar.
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let archive_key = ArchiveKey::decode(&key)?;
        let sort_value = archive_key.time.timestamp();
        Ok(Self {
            store,
            key,
            archive_key,
            sort_value,
        })
    }

    /// Fetch the body and open a record reader over it.
    pub async fn open(&self) -> Result<ArchiveReader<std::io::Cursor<Bytes>>> {
        debug!(key = %self.key, "opening store archive");
        let body = self
            .store
            .get(&Path::from(self.key.as_str()))
            .await?
            .bytes()
            .await?;
        Ok(ArchiveReader::from_bytes(body))
    }

    /// Fetch the sibling manifest; `Ok(None)` when it was never written.
    pub async fn stream_metadata(&self) -> Result<Option<StreamMetadata>> {
        read_stream_metadata(self.store.as_ref(), &self.key).await
    }
}

/// Load the manifest stored next to `archive_key`.
///
/// A missing manifest is not an error: archives written before a crash may
/// have no sibling, and tail readers fall back to TRIM_HORIZON.
pub async fn read_stream_metadata(
    store: &dyn ObjectStore,
    archive_key: &str,
) -> Result<Option<StreamMetadata>> {
    let path = Path::from(format!("{archive_key}.metadata"));
    match store.get(&path).await {
        Ok(result) => {
            let body = result.bytes().await?;
            Ok(Some(serde_json::from_slice(&body)?))
        }
        Err(object_store::Error::NotFound { .. }) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Reads and writes the archives of one stream/client pair.
pub struct ArchiveRepository {
    store: Arc<dyn ObjectStore>,
    stream: String,
    client: String,
}

impl ArchiveRepository {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        stream: impl Into<String>,
        client: impl Into<String>,
    ) -> Self {
        Self {
            store,
            stream: stream.into(),
            client: client.into(),
        }
    }

    /// Every archive for this stream/client on one UTC day, sorted by
    /// embedded time. Manifest siblings and foreign keys are skipped.
    pub async fn archives_at_date(&self, date: NaiveDate) -> Result<Vec<StoreArchive>> {
        let key_prefix =
            ArchiveKey::new(self.stream.as_str(), self.client.as_str(), day_start(date)).path_prefix();
        let day_prefix = Path::from(date.format("%Y%m%d").to_string());

        let objects: Vec<_> = self
            .store
            .list(Some(&day_prefix))
            .try_collect()
            .await?;

        let mut archives = Vec::new();
        for meta in objects {
            let key = meta.location.as_ref();
            if !key.starts_with(key_prefix.as_str()) || ArchiveKey::is_metadata_key(key) {
                continue;
            }
            match StoreArchive::new(self.store.clone(), key) {
                Ok(archive) => archives.push(archive),
                Err(err) => {
                    warn!(key, error = %err, "skipping unparseable key");
                }
            }
        }

        archives.sort_by(|a, b| {
            a.sort_value
                .cmp(&b.sort_value)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(archives)
    }

    /// Write one archive and its manifest for the window starting at `time`.
    /// The object goes first; the manifest only after it succeeds.
    pub async fn upload(
        &self,
        time: DateTime<Utc>,
        body: Bytes,
        metadata: &StreamMetadata,
    ) -> Result<()> {
        let archive_key = ArchiveKey::new(self.stream.as_str(), self.client.as_str(), time);
        self.store
            .put(&Path::from(archive_key.path()), body)
            .await?;

        let manifest = Bytes::from(serde_json::to_vec(metadata)?);
        self.store
            .put(&Path::from(archive_key.metadata_path()), manifest)
            .await?;
        Ok(())
    }
}

/// Midnight UTC of a calendar day.
pub(crate) fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use object_store::memory::InMemory;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn put(store: &dyn ObjectStore, key: &str) {
        store
            .put(&Path::from(key), Bytes::from_static(b"x"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_listing_filters_and_sorts() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        put(store.as_ref(), "20200101/s-c-1577840400.tri").await;
        put(store.as_ref(), "20200101/s-c-1577836800.tri").await;
        put(store.as_ref(), "20200101/s-c-1577836800.tri.metadata").await;
        put(store.as_ref(), "20200101/other-c-1577836800.tri").await;
        put(store.as_ref(), "20200101/s-c-garbage").await;
        put(store.as_ref(), "20200102/s-c-1577923200.tri").await;

        let repo = ArchiveRepository::new(store, "s", "c");
        let archives = repo.archives_at_date(date(2020, 1, 1)).await.unwrap();

        let keys: Vec<_> = archives.iter().map(|a| a.key.clone()).collect();
        assert_eq!(
            keys,
            vec![
                "20200101/s-c-1577836800.tri".to_string(),
                "20200101/s-c-1577840400.tri".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_day_lists_nothing() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let repo = ArchiveRepository::new(store, "s", "c");
        assert!(repo.archives_at_date(date(2020, 1, 1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_writes_object_then_manifest() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let repo = ArchiveRepository::new(store.clone(), "s", "c");
        let time = Utc.timestamp_opt(1_577_836_800, 0).unwrap();

        let mut metadata = StreamMetadata::new();
        metadata.note_sequence_number(&"0".into(), &"7".into());
        repo.upload(time, Bytes::from_static(b"body"), &metadata)
            .await
            .unwrap();

        let body = store
            .get(&Path::from("20200101/s-c-1577836800.tri"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"body"));

        let manifest = read_stream_metadata(store.as_ref(), "20200101/s-c-1577836800.tri")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manifest, metadata);
    }

    #[tokio::test]
    async fn test_missing_manifest_is_none() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let manifest = read_stream_metadata(store.as_ref(), "20200101/s-c-1.tri")
            .await
            .unwrap();
        assert!(manifest.is_none());
    }
}
