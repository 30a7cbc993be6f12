//! Off-ledger content storage.
//!
//! Listing metadata is too large to put on the ledger; actions reference
//! it by content id instead. A record is the raw content plus the fields
//! describing it, and its id is the base58 SHA-256 of the whole record,
//! so a reference either resolves to exactly what was published or to
//! nothing.

use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId(String);

impl ContentId {
    /// Id for a record: base58 of the SHA-256 over the content bytes and
    /// the serialized fields. The length prefix keeps the two parts from
    /// sliding into each other.
    pub fn for_record(bytes: &[u8], fields: &serde_json::Value) -> Result<Self, StoreError> {
        let raw_fields =
            serde_json::to_vec(fields).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
        hasher.update(&raw_fields);
        Ok(Self(bs58::encode(hasher.finalize()).into_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|_| StoreError::InvalidId(s.to_string()))?;
        if decoded.len() != 32 {
            return Err(StoreError::InvalidId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not a content id: {0:?}")]
    InvalidId(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// What `put` persists: the hosted content plus its descriptive fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRecord {
    pub content: Bytes,
    pub fields: serde_json::Value,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes` with the fields describing them and return the record
    /// id. Idempotent by construction.
    async fn put(&self, bytes: Bytes, fields: serde_json::Value)
        -> Result<ContentId, StoreError>;

    /// Fetch the descriptive fields behind `id`, if this store has them.
    async fn get(&self, id: &ContentId) -> Result<Option<serde_json::Value>, StoreError>;
}

/// Store a metadata-only record, no raw content, and return its id.
pub async fn put_json(
    store: &dyn ContentStore,
    fields: &serde_json::Value,
) -> Result<ContentId, StoreError> {
    store.put(Bytes::new(), fields.clone()).await
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryContentStore {
    entries: DashMap<ContentId, ContentRecord>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(
        &self,
        bytes: Bytes,
        fields: serde_json::Value,
    ) -> Result<ContentId, StoreError> {
        let id = ContentId::for_record(&bytes, &fields)?;
        self.entries.insert(
            id.clone(),
            ContentRecord {
                content: bytes,
                fields,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.entries.get(id).map(|entry| entry.value().fields.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = MemoryContentStore::new();
        let fields = json!({ "title": "Vintage synth", "images": ["bafy1"] });
        let id = store
            .put(Bytes::from_static(b"image body"), fields.clone())
            .await
            .unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(fields));
    }

    #[tokio::test]
    async fn test_id_covers_content_and_fields() {
        let store = MemoryContentStore::new();
        let fields = json!({ "title": "same" });
        let a = store
            .put(Bytes::from_static(b"same"), fields.clone())
            .await
            .unwrap();
        let b = store
            .put(Bytes::from_static(b"same"), fields.clone())
            .await
            .unwrap();
        let c = store
            .put(Bytes::from_static(b"different"), fields.clone())
            .await
            .unwrap();
        let d = store
            .put(Bytes::from_static(b"same"), json!({ "title": "other" }))
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_content_is_none() {
        let store = MemoryContentStore::new();
        let id = ContentId::for_record(b"never stored", &json!({})).unwrap();
        assert_eq!(store.get(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_metadata_only_records_address_stably() {
        let store = MemoryContentStore::new();
        let doc = json!({ "title": "Vintage synth", "images": ["bafy1"] });
        let a = put_json(&store, &doc).await.unwrap();
        let b = put_json(&store, &doc).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.get(&a).await.unwrap(), Some(doc));
    }

    #[test]
    fn test_id_parsing_round_trip() {
        let id = ContentId::for_record(b"x", &json!({})).unwrap();
        let parsed: ContentId = id.as_str().parse().unwrap();
        assert_eq!(parsed, id);

        assert!("not-base58-0OIl".parse::<ContentId>().is_err());
        assert!("3mJr7A".parse::<ContentId>().is_err());
    }
}
