//! Shared Memory Spaces - 플러그인 간 공유 데이터 공간
//!
//! 소유자 또는 read/write 권한을 부여받은 플러그인만 접근할 수 있습니다.
//! 조회 결과는 항상 복사본이며, TTL이 지난 공간은 다음 접근 시 삭제됩니다.
//! 동시 쓰기는 직렬화하지 않습니다 (마지막 쓰기가 이김).

use chrono::{DateTime, Utc};
use mnemos_foundation::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// 공간 접근 수준
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceAccess {
    Read,
    Write,
}

/// 공간 접근 권한 부여
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceGrant {
    pub plugin_id: String,
    pub access: SpaceAccess,
}

/// 공유 메모리 공간 정의
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedMemorySpace {
    pub namespace: String,
    pub owner: String,
    pub permissions: Vec<SpaceGrant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl SharedMemorySpace {
    pub fn new(namespace: impl Into<String>, owner: impl Into<String>, data: Value) -> Self {
        Self {
            namespace: namespace.into(),
            owner: owner.into(),
            permissions: Vec::new(),
            ttl: None,
            data,
            created_at: Utc::now(),
        }
    }

    pub fn with_grant(mut self, plugin_id: impl Into<String>, access: SpaceAccess) -> Self {
        self.permissions.push(SpaceGrant {
            plugin_id: plugin_id.into(),
            access,
        });
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn can_read(&self, plugin_id: &str) -> bool {
        self.owner == plugin_id || self.permissions.iter().any(|g| g.plugin_id == plugin_id)
    }

    fn can_write(&self, plugin_id: &str) -> bool {
        self.owner == plugin_id
            || self
                .permissions
                .iter()
                .any(|g| g.plugin_id == plugin_id && g.access == SpaceAccess::Write)
    }
}

struct StoredSpace {
    space: SharedMemorySpace,
    created: Instant,
}

impl StoredSpace {
    fn is_expired(&self) -> bool {
        self.space
            .ttl
            .map_or(false, |ttl| self.created.elapsed() >= ttl)
    }
}

/// 공유 공간 저장소
#[derive(Default)]
pub struct SharedMemoryRegistry {
    spaces: Mutex<HashMap<String, StoredSpace>>,
}

impl SharedMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 공간 생성 (namespace 반환)
    pub fn create(&self, space: SharedMemorySpace) -> Result<String> {
        if space.namespace.trim().is_empty() {
            return Err(Error::Validation("shared space namespace is required".into()));
        }
        if space.owner.trim().is_empty() {
            return Err(Error::Validation("shared space owner is required".into()));
        }

        let mut spaces = self.spaces.lock();
        if let Some(existing) = spaces.get(&space.namespace) {
            if !existing.is_expired() {
                return Err(Error::AlreadyExists(format!(
                    "Shared space '{}' already exists",
                    space.namespace
                )));
            }
        }

        let namespace = space.namespace.clone();
        debug!(namespace = %namespace, owner = %space.owner, "created shared space");
        spaces.insert(
            namespace.clone(),
            StoredSpace {
                space,
                created: Instant::now(),
            },
        );
        Ok(namespace)
    }

    /// 만료 확인 후 공간에 대해 작업 수행
    fn with_live<T>(
        &self,
        namespace: &str,
        f: impl FnOnce(&mut SharedMemorySpace) -> Result<T>,
    ) -> Result<T> {
        let mut spaces = self.spaces.lock();
        let expired = match spaces.get(namespace) {
            None => return Err(Error::NotFound(format!("Shared space '{}'", namespace))),
            Some(stored) => stored.is_expired(),
        };
        if expired {
            spaces.remove(namespace);
            debug!(namespace = %namespace, "shared space expired");
            return Err(Error::NotFound(format!("Shared space '{}' has expired", namespace)));
        }
        match spaces.get_mut(namespace) {
            Some(stored) => f(&mut stored.space),
            None => Err(Error::NotFound(format!("Shared space '{}'", namespace))),
        }
    }

    /// 데이터 조회 (복사본)
    pub fn access(&self, namespace: &str, plugin_id: &str) -> Result<Value> {
        self.with_live(namespace, |space| {
            if !space.can_read(plugin_id) {
                return Err(Error::AccessDenied(format!(
                    "Plugin '{}' cannot read shared space '{}'",
                    plugin_id, namespace
                )));
            }
            Ok(space.data.clone())
        })
    }

    /// 데이터 교체 (소유자 또는 write 권한)
    pub fn update(&self, namespace: &str, plugin_id: &str, data: Value) -> Result<()> {
        self.with_live(namespace, |space| {
            if !space.can_write(plugin_id) {
                return Err(Error::AccessDenied(format!(
                    "Plugin '{}' cannot write shared space '{}'",
                    plugin_id, namespace
                )));
            }
            space.data = data;
            Ok(())
        })
    }

    /// 권한 부여 (소유자만)
    pub fn grant(&self, namespace: &str, owner: &str, grant: SpaceGrant) -> Result<()> {
        self.with_live(namespace, |space| {
            if space.owner != owner {
                return Err(Error::AccessDenied(format!(
                    "Only the owner can grant access to '{}'",
                    namespace
                )));
            }
            space.permissions.retain(|g| g.plugin_id != grant.plugin_id);
            space.permissions.push(grant);
            Ok(())
        })
    }

    /// 공간 삭제 (소유자만)
    pub fn delete(&self, namespace: &str, plugin_id: &str) -> Result<()> {
        self.with_live(namespace, |space| {
            if space.owner != plugin_id {
                return Err(Error::AccessDenied(format!(
                    "Only the owner can delete '{}'",
                    namespace
                )));
            }
            Ok(())
        })?;
        self.spaces.lock().remove(namespace);
        Ok(())
    }

    /// 플러그인 소유 공간 삭제 및 부여된 권한 회수
    pub fn cleanup_plugin(&self, plugin_id: &str) -> usize {
        let mut spaces = self.spaces.lock();
        let before = spaces.len();
        spaces.retain(|_, stored| stored.space.owner != plugin_id);
        for stored in spaces.values_mut() {
            stored.space.permissions.retain(|g| g.plugin_id != plugin_id);
        }
        before - spaces.len()
    }

    pub fn len(&self) -> usize {
        self.spaces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.lock().is_empty()
    }
}
