//! Store Reader: Replaying a Date Range from the Archive
//!
//! Given a bucket, stream, optional client and an inclusive date range, the
//! store reader enumerates every archive object for those days and streams
//! their records back as one serial sequence, opening archives lazily as
//! the previous one drains.
//!
//! ## Enumeration Rules
//!
//! - One listing per UTC day in the range, via `ArchiveRepository`
//! - `.metadata` siblings and unparseable keys are skipped (with a warning;
//!   buckets can contain foreign objects under the same prefix)
//! - When no client was specified, the reader locks onto the first client
//!   it observes and errors on any later mismatch: interleaving two
//!   clients' archives would interleave their duplicate windows
//! - Archives are ordered by `(time, sort value)` across the whole range

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDate;
use object_store::ObjectStore;
use tracing::debug;
use triton_core::Record;

use crate::archive::{ArchiveRepository, StoreArchive};
use crate::archive_reader::ArchiveReader;
use crate::error::{Error, Result};

/// Expand an inclusive date range into its days.
pub fn list_dates_from_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
    if start > end {
        return Err(Error::InvalidDateRange { start, end });
    }

    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        current = current.succ_opt().ok_or(Error::InvalidDateRange { start, end })?;
    }
    Ok(dates)
}

/// Serial reader over every archive of a stream in a date range.
pub struct StoreReader {
    archives: VecDeque<StoreArchive>,
    current: Option<ArchiveReader<Cursor<Bytes>>>,
}

impl std::fmt::Debug for StoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreReader")
            .field("archives_remaining", &self.archives.len())
            .field("has_current", &self.current.is_some())
            .finish()
    }
}

impl StoreReader {
    /// Enumerate the archives for `[start_date, end_date]`.
    ///
    /// Pass an empty `client` to accept whichever single client the bucket
    /// holds for this stream.
    pub async fn new(
        store: Arc<dyn ObjectStore>,
        stream: &str,
        client: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Self> {
        let repository = ArchiveRepository::new(store, stream, client);

        let mut archives = Vec::new();
        for date in list_dates_from_range(start_date, end_date)? {
            archives.extend(repository.archives_at_date(date).await?);
        }

        // Lock onto a single client
        let mut found_client = client.to_string();
        for archive in &archives {
            if found_client.is_empty() {
                found_client = archive.archive_key.client.clone();
            } else if found_client != archive.archive_key.client {
                return Err(Error::MultipleClients {
                    first: found_client,
                    second: archive.archive_key.client.clone(),
                });
            }
        }

        archives.sort_by(|a, b| {
            a.sort_value
                .cmp(&b.sort_value)
                .then_with(|| a.key.cmp(&b.key))
        });

        debug!(stream, archives = archives.len(), "store reader ready");
        Ok(Self {
            archives: archives.into(),
            current: None,
        })
    }

    /// Next archived record, or `Ok(None)` once every archive is drained.
    pub async fn read_record(&mut self) -> Result<Option<Record>> {
        loop {
            if self.current.is_none() {
                match self.archives.pop_front() {
                    Some(archive) => {
                        self.current = Some(archive.open().await?);
                    }
                    None => return Ok(None),
                }
            }

            if let Some(reader) = &mut self.current {
                match reader.read_record()? {
                    Some(record) => return Ok(Some(record)),
                    None => {
                        debug!("archive complete, moving to the next");
                        self.current = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use object_store::memory::InMemory;
    use snap::write::FrameEncoder;
    use triton_core::codec::RecordEncoder;
    use triton_core::{StreamMetadata, Value};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(v: &str) -> Record {
        let mut rec = Record::new();
        rec.insert("key".into(), Value::from(v));
        rec
    }

    fn archive_bytes(records: &[Record]) -> Bytes {
        let mut encoder = RecordEncoder::new(FrameEncoder::new(Vec::new()));
        for rec in records {
            encoder.encode(rec).unwrap();
        }
        Bytes::from(encoder.into_inner().into_inner().unwrap())
    }

    async fn upload(
        store: &Arc<dyn ObjectStore>,
        client: &str,
        unix: i64,
        records: &[Record],
    ) {
        let repo = ArchiveRepository::new(store.clone(), "s", client);
        repo.upload(
            Utc.timestamp_opt(unix, 0).unwrap(),
            archive_bytes(records),
            &StreamMetadata::new(),
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_date_range_expansion() {
        let dates = list_dates_from_range(date(2020, 1, 30), date(2020, 2, 2)).unwrap();
        assert_eq!(
            dates,
            vec![
                date(2020, 1, 30),
                date(2020, 1, 31),
                date(2020, 2, 1),
                date(2020, 2, 2),
            ]
        );
    }

    #[test]
    fn test_single_day_range() {
        let dates = list_dates_from_range(date(2020, 1, 1), date(2020, 1, 1)).unwrap();
        assert_eq!(dates.len(), 1);
    }

    #[test]
    fn test_inverted_range_is_an_error() {
        let err = list_dates_from_range(date(2020, 1, 2), date(2020, 1, 1)).unwrap_err();
        assert!(matches!(err, Error::InvalidDateRange { .. }));
    }

    #[tokio::test]
    async fn test_serial_read_across_days() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        // Two archives on day one, one on day two
        upload(&store, "c", 1_577_836_800, &[record("1"), record("2")]).await;
        upload(&store, "c", 1_577_840_400, &[record("3")]).await;
        upload(&store, "c", 1_577_923_200, &[record("4")]).await;

        let mut reader = StoreReader::new(store, "s", "c", date(2020, 1, 1), date(2020, 1, 2))
            .await
            .unwrap();

        let mut values = Vec::new();
        while let Some(rec) = reader.read_record().await.unwrap() {
            values.push(rec.get("key").unwrap().to_string());
        }
        assert_eq!(values, vec!["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_empty_range_reads_nothing() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let mut reader = StoreReader::new(store, "s", "c", date(2020, 1, 1), date(2020, 1, 1))
            .await
            .unwrap();
        assert!(reader.read_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unspecified_client_locks_onto_first() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        upload(&store, "prod", 1_577_836_800, &[record("1")]).await;

        let mut reader = StoreReader::new(store, "s", "", date(2020, 1, 1), date(2020, 1, 1))
            .await
            .unwrap();
        assert!(reader.read_record().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_multiple_clients_error() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        upload(&store, "prod", 1_577_836_800, &[record("1")]).await;
        upload(&store, "staging", 1_577_840_400, &[record("2")]).await;

        let err = StoreReader::new(store, "s", "", date(2020, 1, 1), date(2020, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MultipleClients { .. }));
    }

    #[tokio::test]
    async fn test_specified_client_ignores_others() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        upload(&store, "prod", 1_577_836_800, &[record("wanted")]).await;
        upload(&store, "staging", 1_577_840_400, &[record("other")]).await;

        let mut reader = StoreReader::new(store, "s", "prod", date(2020, 1, 1), date(2020, 1, 1))
            .await
            .unwrap();
        let rec = reader.read_record().await.unwrap().unwrap();
        assert_eq!(rec.get("key"), Some(&Value::from("wanted")));
        assert!(reader.read_record().await.unwrap().is_none());
    }
}
