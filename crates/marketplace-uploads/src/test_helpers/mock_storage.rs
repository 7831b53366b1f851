use async_trait::async_trait;
use marketplace_storage::{ByteReader, Storage, StorageBackend, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// In-memory object store that counts calls and can inject failures or latency
#[derive(Clone, Default)]
pub struct MockStorage {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    store_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
    fail_next_store: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every store, to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_next_store(&self) {
        self.fail_next_store.store(true, Ordering::SeqCst);
    }

    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn object(&self, url: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(url).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn store(
        &self,
        folder: &str,
        filename: &str,
        _content_type: &str,
        data: Vec<u8>,
    ) -> StorageResult<String> {
        let call = self.store_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next_store.swap(false, Ordering::SeqCst) {
            return Err(StorageError::UploadFailed("injected store failure".to_string()));
        }

        let url = format!("mock://{}/{}-{}", folder, call, filename);
        self.objects.lock().unwrap().insert(url.clone(), data);
        Ok(url)
    }

    async fn store_stream(
        &self,
        folder: &str,
        filename: &str,
        content_type: &str,
        _content_length: Option<u64>,
        mut reader: ByteReader,
    ) -> StorageResult<String> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        self.store(folder, filename, content_type, data).await
    }

    async fn download(&self, url: &str) -> StorageResult<Vec<u8>> {
        self.object(url)
            .ok_or_else(|| StorageError::NotFound(url.to_string()))
    }

    async fn delete(&self, url: &str) -> StorageResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().remove(url);
        Ok(())
    }

    async fn exists(&self, url: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(url))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
