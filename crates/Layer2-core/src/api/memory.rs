//! Memory API - 플러그인용 메모리 저장소 접근

use super::guard::ApiGuard;
use super::store::{MemoryRecord, MemoryStore, ScoredMemory};
use super::{
    DEFAULT_SEARCH_LIMIT, MAX_BATCH_SIZE, MAX_CONTENT_BYTES, MAX_EMBEDDING_DIMS, MAX_SEARCH_LIMIT,
};
use crate::plugin::events::{BusEvent, EventBus, EventType};
use chrono::Utc;
use mnemos_foundation::{Error, PermissionToken, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// 새 메모리 입력
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInput {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MemoryInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// 부분 수정 (None 필드는 유지)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUpdate {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(Error::Validation("memory content must not be empty".into()));
    }
    if content.len() > MAX_CONTENT_BYTES {
        return Err(Error::Validation(format!(
            "memory content is {} bytes (max {})",
            content.len(),
            MAX_CONTENT_BYTES
        )));
    }
    Ok(())
}

fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(Error::Validation("embedding must not be empty".into()));
    }
    if embedding.len() > MAX_EMBEDDING_DIMS {
        return Err(Error::Validation(format!(
            "embedding has {} dimensions (max {})",
            embedding.len(),
            MAX_EMBEDDING_DIMS
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation("embedding contains non-finite values".into()));
    }
    Ok(())
}

fn validate_input(input: &MemoryInput) -> Result<()> {
    validate_content(&input.content)?;
    if let Some(embedding) = &input.embedding {
        validate_embedding(embedding)?;
    }
    Ok(())
}

/// 검색 개수 확인 (기본 10, 최대 100)
pub(crate) fn search_limit(limit: Option<usize>) -> Result<usize> {
    match limit {
        None => Ok(DEFAULT_SEARCH_LIMIT),
        Some(0) => Err(Error::Validation("search limit must be at least 1".into())),
        Some(n) if n > MAX_SEARCH_LIMIT => Err(Error::Validation(format!(
            "search limit {} exceeds maximum {}",
            n, MAX_SEARCH_LIMIT
        ))),
        Some(n) => Ok(n),
    }
}

// ============================================================================
// MemoryApi
// ============================================================================

/// 플러그인 하나에 바인딩된 Memory API
pub struct MemoryApi {
    guard: ApiGuard,
    store: Arc<dyn MemoryStore>,
    events: Option<Arc<EventBus>>,
}

impl MemoryApi {
    pub fn new(guard: ApiGuard, store: Arc<dyn MemoryStore>) -> Self {
        Self {
            guard,
            store,
            events: None,
        }
    }

    /// memory:* 이벤트 발행 활성화
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn plugin_id(&self) -> &str {
        self.guard.plugin_id()
    }

    async fn notify(&self, event_type: EventType, id: &str) {
        if let Some(bus) = &self.events {
            let event = BusEvent::new(event_type, json!({ "memoryId": id, "pluginId": self.plugin_id() }))
                .with_source(self.plugin_id());
            bus.emit_event(event).await;
        }
    }

    fn new_record(&self, input: MemoryInput) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            content: input.content,
            embedding: input.embedding,
            metadata: input.metadata,
            owner: self.plugin_id().to_string(),
            workspace: self.guard.workspace(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 읽기 가능한 항목 조회 (워크스페이스 밖이면 None)
    async fn visible(&self, id: &str) -> Result<Option<MemoryRecord>> {
        Ok(self
            .store
            .get(id)
            .await?
            .filter(|r| self.guard.can_see(r.workspace.as_deref())))
    }

    /// 메모리 저장
    pub async fn store(&self, input: MemoryInput) -> Result<MemoryRecord> {
        const OP: &str = "memory.store";
        self.guard.authorize(OP, PermissionToken::WriteMemory)?;
        self.guard.validate(OP, validate_input(&input))?;

        let record = self.new_record(input);
        if let Err(e) = self.store.insert(record.clone()).await {
            self.guard.failure(OP, Some(&record.id), &e);
            return Err(e);
        }
        self.guard.success(OP, Some(&record.id));
        self.notify(EventType::MemoryCreated, &record.id).await;
        Ok(record)
    }

    /// 일괄 저장 (최대 100개, 전부 검증 후 저장)
    pub async fn store_batch(&self, inputs: Vec<MemoryInput>) -> Result<Vec<MemoryRecord>> {
        const OP: &str = "memory.store_batch";
        self.guard.authorize(OP, PermissionToken::WriteMemory)?;

        let check = if inputs.is_empty() {
            Err(Error::Validation("batch must not be empty".into()))
        } else if inputs.len() > MAX_BATCH_SIZE {
            Err(Error::Validation(format!(
                "batch of {} items exceeds maximum {}",
                inputs.len(),
                MAX_BATCH_SIZE
            )))
        } else {
            inputs.iter().enumerate().try_for_each(|(i, input)| {
                validate_input(input).map_err(|e| Error::Validation(format!("item {}: {}", i, e)))
            })
        };
        self.guard.validate(OP, check)?;

        let mut stored = Vec::with_capacity(inputs.len());
        for input in inputs {
            let record = self.new_record(input);
            if let Err(e) = self.store.insert(record.clone()).await {
                self.guard.failure(OP, Some(&record.id), &e);
                return Err(e);
            }
            stored.push(record);
        }

        self.guard
            .success_with(OP, None, format!("{} items", stored.len()));
        for record in &stored {
            self.notify(EventType::MemoryCreated, &record.id).await;
        }
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        const OP: &str = "memory.get";
        self.guard.authorize(OP, PermissionToken::ReadMemory)?;
        self.guard.validate(OP, non_empty_id(id))?;

        let record = self.visible(id).await?;
        self.guard.success(OP, Some(id));
        Ok(record)
    }

    /// 텍스트 검색
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<MemoryRecord>> {
        const OP: &str = "memory.search";
        self.guard.authorize(OP, PermissionToken::ReadMemory)?;
        let check = if query.trim().is_empty() {
            Err(Error::Validation("search query must not be empty".into()))
        } else if query.len() > MAX_CONTENT_BYTES {
            Err(Error::Validation("search query is too large".into()))
        } else {
            search_limit(limit)
        };
        let limit = self.guard.validate(OP, check)?;

        let workspace = self.guard.workspace();
        let results = self
            .store
            .search_text(query, workspace.as_deref(), limit)
            .await?;
        self.guard
            .success_with(OP, None, format!("{} results", results.len()));
        Ok(results)
    }

    /// 임베딩 유사도 검색 (access-embeddings 필요)
    pub async fn similarity_search(
        &self,
        embedding: &[f32],
        limit: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredMemory>> {
        const OP: &str = "memory.similarity_search";
        self.guard.authorize(OP, PermissionToken::ReadMemory)?;
        self.guard.authorize(OP, PermissionToken::AccessEmbeddings)?;

        let threshold = threshold.unwrap_or(0.0);
        let check = validate_embedding(embedding).and_then(|_| {
            if !(-1.0..=1.0).contains(&threshold) {
                return Err(Error::Validation(format!(
                    "similarity threshold {} is outside [-1, 1]",
                    threshold
                )));
            }
            search_limit(limit)
        });
        let limit = self.guard.validate(OP, check)?;

        let workspace = self.guard.workspace();
        let results = self
            .store
            .search_similar(embedding, workspace.as_deref(), limit, threshold)
            .await?;
        self.guard
            .success_with(OP, None, format!("{} results", results.len()));
        Ok(results)
    }

    /// 수정 (소유자 또는 system)
    pub async fn update(&self, id: &str, update: MemoryUpdate) -> Result<MemoryRecord> {
        const OP: &str = "memory.update";
        self.guard.authorize(OP, PermissionToken::WriteMemory)?;
        let check = non_empty_id(id)
            .and_then(|_| update.content.as_deref().map_or(Ok(()), validate_content))
            .and_then(|_| update.embedding.as_deref().map_or(Ok(()), validate_embedding));
        self.guard.validate(OP, check)?;

        let Some(mut record) = self.visible(id).await? else {
            let err = Error::NotFound(format!("Memory '{}'", id));
            self.guard.failure(OP, Some(id), &err);
            return Err(err);
        };
        self.guard.check_owner(OP, &record.owner, id)?;

        if let Some(content) = update.content {
            record.content = content;
        }
        if let Some(embedding) = update.embedding {
            record.embedding = Some(embedding);
        }
        if let Some(metadata) = update.metadata {
            record.metadata = metadata;
        }
        record.updated_at = Utc::now();

        self.store.update(record.clone()).await?;
        self.guard.success(OP, Some(id));
        self.notify(EventType::MemoryUpdated, id).await;
        Ok(record)
    }

    /// 삭제 (소유자 또는 system)
    pub async fn delete(&self, id: &str) -> Result<bool> {
        const OP: &str = "memory.delete";
        self.guard.authorize(OP, PermissionToken::DeleteMemory)?;
        self.guard.validate(OP, non_empty_id(id))?;

        let Some(record) = self.visible(id).await? else {
            debug!(plugin_id = %self.plugin_id(), memory_id = %id, "delete of unknown memory");
            return Ok(false);
        };
        self.guard.check_owner(OP, &record.owner, id)?;

        let removed = self.store.delete(id).await?;
        self.guard.success(OP, Some(id));
        if removed {
            self.notify(EventType::MemoryDeleted, id).await;
        }
        Ok(removed)
    }
}

fn non_empty_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        Err(Error::Validation("id must not be empty".into()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::InMemoryMemoryStore;
    use super::*;
    use mnemos_foundation::{AuditLog, AuditQuery, AuditResult, PermissionSet};

    fn api(plugin: &str, perms: PermissionSet, store: Arc<InMemoryMemoryStore>) -> MemoryApi {
        MemoryApi::new(ApiGuard::new(plugin, perms, Arc::new(AuditLog::new())), store)
    }

    fn rw() -> PermissionSet {
        PermissionSet::new()
            .with(PermissionToken::ReadMemory)
            .with(PermissionToken::WriteMemory)
            .with(PermissionToken::DeleteMemory)
    }

    #[tokio::test]
    async fn test_permission_checked_before_validation() {
        let store = Arc::new(InMemoryMemoryStore::new());
        let audit = Arc::new(AuditLog::new());
        let api = MemoryApi::new(ApiGuard::new("p", PermissionSet::new(), audit.clone()), store.clone());

        let err = api.store(MemoryInput::new("")).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert!(store.is_empty());
        assert_eq!(audit.query(&AuditQuery::new().with_result(AuditResult::Denied)).len(), 1);
    }

    #[tokio::test]
    async fn test_content_and_embedding_limits() {
        let store = Arc::new(InMemoryMemoryStore::new());
        let api = api("p", rw(), store);

        assert!(matches!(
            api.store(MemoryInput::new("   ")).await,
            Err(Error::Validation(_))
        ));
        let huge = "x".repeat(MAX_CONTENT_BYTES + 1);
        assert!(api.store(MemoryInput::new(huge)).await.is_err());
        assert!(api
            .store(MemoryInput::new("ok").with_embedding(vec![0.0; MAX_EMBEDDING_DIMS + 1]))
            .await
            .is_err());
        assert!(api
            .store(MemoryInput::new("ok").with_embedding(vec![f32::NAN]))
            .await
            .is_err());
        assert!(api.search("ok", Some(101)).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = Arc::new(InMemoryMemoryStore::new());
        let api = api("p", rw(), store.clone());

        let batch = vec![MemoryInput::new("a"), MemoryInput::new("")];
        assert!(api.store_batch(batch).await.is_err());
        assert!(store.is_empty());

        let too_many = (0..=MAX_BATCH_SIZE).map(|i| MemoryInput::new(format!("m{}", i))).collect();
        assert!(api.store_batch(too_many).await.is_err());

        let ok = api
            .store_batch(vec![MemoryInput::new("a"), MemoryInput::new("b")])
            .await
            .unwrap();
        assert_eq!(ok.len(), 2);
    }

    #[tokio::test]
    async fn test_workspace_and_ownership() {
        let store = Arc::new(InMemoryMemoryStore::new());
        let alice = api("alice", rw(), store.clone());
        let bob = api("bob", rw(), store.clone());
        let admin = api("admin", PermissionSet::system(), store.clone());

        let record = alice.store(MemoryInput::new("alice's note")).await.unwrap();
        assert_eq!(record.workspace.as_deref(), Some("plugin:alice"));

        assert!(bob.get(&record.id).await.unwrap().is_none());
        assert!(bob.search("note", None).await.unwrap().is_empty());
        assert!(matches!(
            bob.update(&record.id, MemoryUpdate::default()).await,
            Err(Error::NotFound(_))
        ));

        let found = admin.search("note", None).await.unwrap();
        assert_eq!(found.len(), 1);
        let updated = admin
            .update(
                &record.id,
                MemoryUpdate {
                    content: Some("edited".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.content, "edited");

        assert!(alice.delete(&record.id).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_similarity_needs_embeddings_permission() {
        let store = Arc::new(InMemoryMemoryStore::new());
        let plain = api("p", rw(), store.clone());
        assert!(matches!(
            plain.similarity_search(&[1.0], None, None).await,
            Err(Error::PermissionDenied { .. })
        ));

        let embed = api("p", rw().with(PermissionToken::AccessEmbeddings), store);
        embed
            .store(MemoryInput::new("vec").with_embedding(vec![1.0, 0.0]))
            .await
            .unwrap();
        let hits = embed.similarity_search(&[1.0, 0.0], None, Some(0.9)).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_emits_memory_events() {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(InMemoryMemoryStore::new());
        let api = api("p", rw(), store).with_events(bus.clone());

        let record = api.store(MemoryInput::new("hello")).await.unwrap();
        api.delete(&record.id).await.unwrap();

        assert_eq!(bus.get_event_history(&EventType::MemoryCreated, None).len(), 1);
        let deleted = bus.get_event_history(&EventType::MemoryDeleted, None);
        assert_eq!(deleted[0].payload["memoryId"], json!(record.id));
    }
}
