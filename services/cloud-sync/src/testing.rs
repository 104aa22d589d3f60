//! In-memory object store used by the unit tests.

use crate::metadata::ObjectMetadata;
use crate::store::{ObjectStore, UploadedPart};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub metadata: ObjectMetadata,
}

#[derive(Default)]
struct MultipartSession {
    key: String,
    metadata: ObjectMetadata,
    parts: BTreeMap<i32, Bytes>,
}

/// Keeps committed objects and open multipart sessions in memory.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    sessions: Mutex<HashMap<String, MultipartSession>>,
    next_upload_id: AtomicUsize,
    unavailable: AtomicBool,
    panic_next_probe: AtomicBool,
    put_delay: Mutex<Option<Duration>>,
    pub put_calls: AtomicUsize,
    pub part_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Panic inside the next `object_exists` call
    pub fn panic_on_next_probe(&self) {
        self.panic_next_probe.store(true, Ordering::SeqCst);
    }

    /// Hold every `put_object` for `delay` after it is counted
    pub fn set_put_delay(&self, delay: Duration) {
        *self.put_delay.lock() = Some(delay);
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("service unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn object_exists(&self, key: &str) -> Result<bool> {
        if self.panic_next_probe.swap(false, Ordering::SeqCst) {
            panic!("object store probe panicked for {key}");
        }
        self.check_available()?;
        Ok(self.objects.lock().contains_key(key))
    }

    async fn put_object(&self, key: &str, body: Bytes, metadata: &ObjectMetadata) -> Result<()> {
        self.check_available()?;
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.put_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                body,
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String> {
        self.check_available()?;
        let upload_id = format!("upload-{}", self.next_upload_id.fetch_add(1, Ordering::SeqCst));
        self.sessions.lock().insert(
            upload_id.clone(),
            MultipartSession {
                key: key.to_string(),
                metadata: metadata.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        self.check_available()?;
        self.part_calls.fetch_add(1, Ordering::SeqCst);
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| anyhow!("unknown upload {upload_id}"))?;
        session.parts.insert(part_number, body);
        Ok(format!("etag-{part_number}"))
    }

    async fn complete_multipart_upload(
        &self,
        _key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<()> {
        self.check_available()?;
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let session = self
            .sessions
            .lock()
            .remove(upload_id)
            .ok_or_else(|| anyhow!("unknown upload {upload_id}"))?;

        let mut body = BytesMut::new();
        for part in &parts {
            let data = session
                .parts
                .get(&part.part_number)
                .ok_or_else(|| anyhow!("part {} was never uploaded", part.part_number))?;
            body.extend_from_slice(data);
        }

        self.objects.lock().insert(
            session.key,
            StoredObject {
                body: body.freeze(),
                metadata: session.metadata,
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().remove(upload_id);
        Ok(())
    }
}
