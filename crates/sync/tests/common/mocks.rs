use async_trait::async_trait;
use bucketgames_storage::{
    ObjectEntry, ObjectMeta, ObjectStore, PutBody, PutCondition, PutOptions, StorageError,
    StorageResult, StoreCapabilities,
};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    List,
    Head,
    Get,
    Put,
    Delete,
}

/// One request seen by the store, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub key: String,
}

#[derive(Clone, Copy, Debug)]
pub enum FaultKind {
    Transient,
    Unauthorized,
    InvalidKey,
}

struct Fault {
    op: Op,
    /// `*` matches every key.
    key: String,
    kind: FaultKind,
    remaining: u32,
}

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub etag: String,
}

type PutHook = Box<dyn Fn(&MemoryStore, &str) + Send + Sync>;

/// In-memory object store that records every call and fails on demand.
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    calls: Mutex<Vec<Call>>,
    faults: Mutex<Vec<Fault>>,
    put_hook: Mutex<Option<PutHook>>,
    next_etag: AtomicU64,
    capabilities: StoreCapabilities,
    latency: Option<Duration>,
    active_puts: AtomicUsize,
    peak_puts: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capabilities(StoreCapabilities {
            custom_metadata: true,
            conditional_put: true,
        })
    }

    pub fn with_capabilities(capabilities: StoreCapabilities) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            put_hook: Mutex::new(None),
            next_etag: AtomicU64::new(1),
            capabilities,
            latency: None,
            active_puts: AtomicUsize::new(0),
            peak_puts: AtomicUsize::new(0),
        }
    }

    /// Every put sleeps this long, so concurrent puts overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn etag(&self) -> String {
        format!("\"etag-{}\"", self.next_etag.fetch_add(1, Ordering::SeqCst))
    }

    /// Store an object directly, bypassing the call log and faults.
    pub fn insert(&self, key: &str, data: impl Into<Bytes>, metadata: BTreeMap<String, String>) {
        let object = StoredObject {
            data: data.into(),
            content_type: None,
            metadata,
            etag: self.etag(),
        };
        self.objects.lock().unwrap().insert(key.to_string(), object);
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, op: Op) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == op)
            .map(|c| c.key)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Fail the next `times` calls of `op` on `key`.
    pub fn fail(&self, op: Op, key: &str, kind: FaultKind, times: u32) {
        self.faults.lock().unwrap().push(Fault {
            op,
            key: key.to_string(),
            kind,
            remaining: times,
        });
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap().clear();
    }

    /// Run `hook` at the start of every put, before the object is written.
    pub fn on_put(&self, hook: impl Fn(&MemoryStore, &str) + Send + Sync + 'static) {
        *self.put_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn peak_concurrent_puts(&self) -> usize {
        self.peak_puts.load(Ordering::SeqCst)
    }

    fn record(&self, op: Op, key: &str) -> StorageResult<()> {
        self.calls.lock().unwrap().push(Call {
            op,
            key: key.to_string(),
        });
        let mut faults = self.faults.lock().unwrap();
        let fault = faults
            .iter_mut()
            .find(|f| f.op == op && (f.key == "*" || f.key == key) && f.remaining > 0);
        match fault {
            Some(fault) => {
                fault.remaining -= 1;
                Err(match fault.kind {
                    FaultKind::Transient => StorageError::Transient(format!("injected: {key}")),
                    FaultKind::Unauthorized => StorageError::Unauthorized(format!("injected: {key}")),
                    FaultKind::InvalidKey => StorageError::InvalidKey(format!("injected: {key}")),
                })
            }
            None => Ok(()),
        }
    }

    async fn write(
        &self,
        key: &str,
        body: PutBody,
        options: &PutOptions,
    ) -> StorageResult<Option<String>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(hook) = self.put_hook.lock().unwrap().as_ref() {
            hook(self, key);
        }
        let data = match body {
            PutBody::Bytes(bytes) => bytes,
            PutBody::File(path) => Bytes::from(tokio::fs::read(&path).await?),
        };

        let mut objects = self.objects.lock().unwrap();
        match &options.condition {
            Some(PutCondition::IfAbsent) if objects.contains_key(key) => {
                return Err(StorageError::PreconditionFailed(key.to_string()));
            }
            Some(PutCondition::IfMatch(etag))
                if objects.get(key).map(|o| &o.etag) != Some(etag) =>
            {
                return Err(StorageError::PreconditionFailed(key.to_string()));
            }
            _ => {}
        }
        let metadata = if self.capabilities.custom_metadata {
            options.metadata.clone()
        } else {
            BTreeMap::new()
        };
        let etag = self.etag();
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: options.content_type.clone(),
                metadata,
                etag: etag.clone(),
            },
        );
        Ok(Some(etag))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        self.record(Op::List, prefix)?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectEntry {
                key: key.clone(),
                size: object.data.len() as u64,
                etag: Some(object.etag.clone()),
            })
            .collect())
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.record(Op::Head, key)?;
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: object.data.len() as u64,
            etag: Some(object.etag.clone()),
            content_type: object.content_type.clone(),
            metadata: object.metadata.clone(),
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.record(Op::Get, key)?;
        self.object(key)
            .map(|o| o.data)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        body: PutBody,
        options: &PutOptions,
    ) -> StorageResult<Option<String>> {
        self.record(Op::Put, key)?;
        let now = self.active_puts.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_puts.fetch_max(now, Ordering::SeqCst);
        let result = self.write(key, body, options).await;
        self.active_puts.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.record(Op::Delete, key)?;
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }
}
