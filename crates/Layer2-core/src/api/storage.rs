//! Storage API - 플러그인 전용 키/값 저장소
//!
//! - 모든 키는 플러그인 ID 아래로 namespace 처리
//! - 플러그인별 할당량 (기본 10 MiB)
//! - 항목별 TTL (다음 접근 시 만료 처리)
//! - `*` / `?` glob 패턴으로 키 조회
//! - 선택적으로 `<dir>/<plugin>.json`에 영속화

use super::guard::ApiGuard;
use chrono::{DateTime, Utc};
use mnemos_foundation::{Error, Result, DEFAULT_STORAGE_QUOTA};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// 키 최대 길이
pub const MAX_KEY_LEN: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageEntry {
    value: Value,
    #[serde(skip)]
    size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl StorageEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// 사용량
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub used_bytes: usize,
    pub quota_bytes: usize,
    pub keys: usize,
}

fn entry_size(key: &str, value: &Value) -> Result<usize> {
    Ok(key.len() + serde_json::to_vec(value)?.len())
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation("storage key must not be empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::Validation(format!(
            "storage key exceeds {} characters",
            MAX_KEY_LEN
        )));
    }
    if key.chars().any(|c| c.is_control()) {
        return Err(Error::Validation("storage key contains control characters".into()));
    }
    Ok(())
}

/// 플러그인 하나에 바인딩된 Storage API
pub struct StorageApi {
    guard: ApiGuard,
    quota: usize,
    persist_path: Option<PathBuf>,
    entries: Mutex<HashMap<String, StorageEntry>>,
}

impl StorageApi {
    /// 메모리 전용 저장소
    pub fn new(guard: ApiGuard) -> Self {
        Self::with_quota(guard, DEFAULT_STORAGE_QUOTA)
    }

    pub fn with_quota(guard: ApiGuard, quota: usize) -> Self {
        Self {
            guard,
            quota,
            persist_path: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `<dir>/<plugin>.json` 영속화 저장소 열기 (만료된 항목은 버림)
    pub async fn open(guard: ApiGuard, quota: usize, dir: &Path) -> Result<Self> {
        let path = dir.join(format!("{}.json", guard.plugin_id()));
        let mut storage = Self::with_quota(guard, quota);

        if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            let persisted: HashMap<String, StorageEntry> = serde_json::from_str(&content)?;
            let now = Utc::now();
            let mut entries = HashMap::with_capacity(persisted.len());
            for (key, mut entry) in persisted {
                if entry.is_expired(now) {
                    continue;
                }
                entry.size = entry_size(&key, &entry.value)?;
                entries.insert(storage.scoped(&key), entry);
            }
            debug!(plugin_id = %storage.plugin_id(), keys = entries.len(), "loaded plugin storage");
            storage.entries = Mutex::new(entries);
        }

        storage.persist_path = Some(path);
        Ok(storage)
    }

    pub fn plugin_id(&self) -> &str {
        self.guard.plugin_id()
    }

    fn prefix(&self) -> String {
        format!("{}:", self.plugin_id())
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix(), key)
    }

    fn used(entries: &HashMap<String, StorageEntry>) -> usize {
        entries.values().map(|e| e.size).sum()
    }

    fn purge_expired(entries: &mut HashMap<String, StorageEntry>) -> usize {
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// 현재 상태를 파일로 기록
    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let snapshot: BTreeMap<String, StorageEntry> = {
            let prefix = self.prefix();
            self.entries
                .lock()
                .iter()
                .map(|(k, e)| (k.strip_prefix(&prefix).unwrap_or(k).to_string(), e.clone()))
                .collect()
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(&snapshot)?).await?;
        Ok(())
    }

    async fn persist_logged(&self, op: &str) -> Result<()> {
        self.persist().await.map_err(|e| {
            warn!(plugin_id = %self.plugin_id(), error = %e, "Failed to persist plugin storage");
            self.guard.failure(op, None, &e);
            e
        })
    }

    /// 값 저장 (TTL 선택)
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        const OP: &str = "storage.set";
        let check = validate_key(key).and_then(|_| {
            let expires_at = match ttl {
                None => None,
                Some(ttl) if ttl.is_zero() => {
                    return Err(Error::Validation("ttl must be greater than zero".into()))
                }
                Some(ttl) => {
                    let delta = chrono::Duration::from_std(ttl)
                        .map_err(|_| Error::Validation("ttl is out of range".into()))?;
                    let expires_at = Utc::now()
                        .checked_add_signed(delta)
                        .ok_or_else(|| Error::Validation("ttl is out of range".into()))?;
                    Some(expires_at)
                }
            };
            Ok((entry_size(key, &value)?, expires_at))
        });
        let (size, expires_at) = self.guard.validate(OP, check)?;

        let scoped = self.scoped(key);
        let previous = {
            let mut entries = self.entries.lock();
            Self::purge_expired(&mut entries);
            let current = Self::used(&entries);
            let replaced = entries.get(&scoped).map_or(0, |e| e.size);
            let projected = current - replaced + size;
            if projected > self.quota {
                let err = Error::QuotaExceeded {
                    plugin: self.plugin_id().to_string(),
                    used: current,
                    requested: size,
                    quota: self.quota,
                };
                drop(entries);
                self.guard.failure(OP, Some(key), &err);
                return Err(err);
            }
            entries.insert(
                scoped.clone(),
                StorageEntry {
                    value,
                    size,
                    expires_at,
                },
            )
        };

        if let Err(e) = self.persist_logged(OP).await {
            // 기록 실패 시 메모리 상태도 이전 값으로 되돌림
            let mut entries = self.entries.lock();
            match previous {
                Some(entry) => entries.insert(scoped, entry),
                None => entries.remove(&scoped),
            };
            return Err(e);
        }
        self.guard.success(OP, Some(key));
        Ok(())
    }

    /// 값 조회 (만료 시 삭제 후 None)
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        const OP: &str = "storage.get";
        self.guard.validate(OP, validate_key(key))?;

        let (value, expired) = {
            let scoped = self.scoped(key);
            let mut entries = self.entries.lock();
            match entries.get(&scoped) {
                Some(e) if e.is_expired(Utc::now()) => {
                    entries.remove(&scoped);
                    (None, true)
                }
                Some(e) => (Some(e.value.clone()), false),
                None => (None, false),
            }
        };
        if expired {
            debug!(plugin_id = %self.plugin_id(), key = %key, "storage entry expired");
            self.persist_logged(OP).await?;
        }
        self.guard.success(OP, Some(key));
        Ok(value)
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        const OP: &str = "storage.delete";
        self.guard.validate(OP, validate_key(key))?;

        let scoped = self.scoped(key);
        let removed = self.entries.lock().remove(&scoped);
        let Some(entry) = removed else {
            self.guard.success(OP, Some(key));
            return Ok(false);
        };
        if let Err(e) = self.persist_logged(OP).await {
            self.entries.lock().insert(scoped, entry);
            return Err(e);
        }
        self.guard.success(OP, Some(key));
        Ok(true)
    }

    /// 키 목록 (정렬, 만료 항목 제외)
    pub async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        const OP: &str = "storage.keys";
        let matcher = match pattern {
            Some(p) => Some(self.guard.validate(
                OP,
                glob::Pattern::new(p)
                    .map_err(|e| Error::Validation(format!("invalid key pattern '{}': {}", p, e))),
            )?),
            None => None,
        };

        let (keys, purged) = {
            let prefix = self.prefix();
            let mut entries = self.entries.lock();
            let purged = Self::purge_expired(&mut entries);
            let mut keys: Vec<String> = entries
                .keys()
                .filter_map(|k| k.strip_prefix(&prefix))
                .filter(|k| matcher.as_ref().map_or(true, |m| m.matches(k)))
                .map(String::from)
                .collect();
            keys.sort();
            (keys, purged)
        };
        if purged > 0 {
            self.persist_logged(OP).await?;
        }
        self.guard
            .success_with(OP, None, format!("{} keys", keys.len()));
        Ok(keys)
    }

    /// 전체 삭제 (삭제 개수 반환)
    pub async fn clear(&self) -> Result<usize> {
        const OP: &str = "storage.clear";
        let removed = {
            let mut entries = self.entries.lock();
            let n = entries.len();
            entries.clear();
            n
        };
        self.persist_logged(OP).await?;
        self.guard.success_with(OP, None, format!("{} keys", removed));
        Ok(removed)
    }

    pub fn usage(&self) -> StorageUsage {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries);
        StorageUsage {
            used_bytes: Self::used(&entries),
            quota_bytes: self.quota,
            keys: entries.len(),
        }
    }
}
