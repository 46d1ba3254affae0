//! Plugin Registry - 로드된 플러그인 저장소

use super::manifest::PluginManifest;
use super::sandbox::Sandbox;
use super::traits::{Plugin, PluginContext, PluginFactory, PluginState};
use chrono::{DateTime, Utc};
use mnemos_foundation::{Error, PermissionSet, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

// ============================================================================
// PluginMetrics
// ============================================================================

/// 플러그인 실행 통계
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetrics {
    pub execution_count: u64,
    pub total_execution_ms: f64,
    pub average_execution_ms: f64,
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl PluginMetrics {
    /// 실행 한 번 기록 (실패 시 에러 메시지 포함)
    pub fn record(&mut self, elapsed: Duration, error: Option<String>) {
        self.execution_count += 1;
        self.total_execution_ms += elapsed.as_secs_f64() * 1000.0;
        self.average_execution_ms = self.total_execution_ms / self.execution_count as f64;
        self.last_executed_at = Some(Utc::now());
        if let Some(error) = error {
            self.error_count += 1;
            self.last_error = Some(error);
        }
    }
}

// ============================================================================
// PluginRegistryEntry
// ============================================================================

/// 레지스트리 엔트리
pub struct PluginRegistryEntry {
    pub manifest: PluginManifest,
    pub factory: Arc<dyn PluginFactory>,
    /// 초기화 전에는 None
    pub instance: Option<Arc<dyn Plugin>>,
    pub context: Option<Arc<PluginContext>>,
    pub state: PluginState,
    pub permissions: PermissionSet,
    pub sandbox: Sandbox,
    pub metrics: PluginMetrics,
    /// 로드 시점에 존재한 의존성
    pub dependencies: Vec<String>,
    pub load_seq: u64,
    pub loaded_at: DateTime<Utc>,
}

impl PluginRegistryEntry {
    pub fn new(
        manifest: PluginManifest,
        factory: Arc<dyn PluginFactory>,
        sandbox: Sandbox,
        dependencies: Vec<String>,
    ) -> Self {
        let permissions = manifest.required_permissions.clone();
        Self {
            manifest,
            factory,
            instance: None,
            context: None,
            state: PluginState::Loaded,
            permissions,
            sandbox,
            metrics: PluginMetrics::default(),
            dependencies,
            load_seq: 0,
            loaded_at: Utc::now(),
        }
    }
}

/// 외부에 노출하는 플러그인 정보
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    pub id: String,
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub state: PluginState,
    pub permissions: PermissionSet,
    pub hooks: Vec<String>,
    pub capabilities: Vec<String>,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub loaded_at: DateTime<Utc>,
}

/// 훅/capability 호출에 필요한 스냅샷
#[derive(Clone)]
pub(crate) struct ActivePlugin {
    pub id: String,
    pub manifest: PluginManifest,
    pub instance: Arc<dyn Plugin>,
    pub sandbox: Sandbox,
}

// ============================================================================
// PluginRegistry
// ============================================================================

/// 플러그인 레지스트리 - 로드된 플러그인 관리
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, PluginRegistryEntry>>,
    load_counter: RwLock<u64>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            load_counter: RwLock::new(0),
        }
    }

    /// 엔트리 등록 (이미 있으면 AlreadyExists)
    pub async fn register(&self, mut entry: PluginRegistryEntry) -> Result<()> {
        let id = entry.manifest.id().to_string();
        let mut plugins = self.plugins.write().await;

        if plugins.contains_key(&id) {
            return Err(Error::AlreadyExists(format!("Plugin '{}' is already loaded", id)));
        }

        let mut counter = self.load_counter.write().await;
        *counter += 1;
        entry.load_seq = *counter;

        info!(plugin_id = %id, version = %entry.manifest.version, "Registered plugin");
        plugins.insert(id, entry);
        Ok(())
    }

    pub async fn unregister(&self, id: &str) -> Option<PluginRegistryEntry> {
        let removed = self.plugins.write().await.remove(id);
        if removed.is_some() {
            info!(plugin_id = %id, "Unregistered plugin");
        }
        removed
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.plugins.read().await.contains_key(id)
    }

    pub async fn get_state(&self, id: &str) -> Option<PluginState> {
        self.plugins.read().await.get(id).map(|e| e.state)
    }

    pub async fn set_state(&self, id: &str, state: PluginState) -> bool {
        let mut plugins = self.plugins.write().await;
        match plugins.get_mut(id) {
            Some(entry) => {
                debug!(plugin_id = %id, from = %entry.state, to = %state, "plugin state change");
                entry.state = state;
                true
            }
            None => false,
        }
    }

    /// 엔트리 수정 (잠금 안에서 await 하지 않음)
    pub async fn update<T>(&self, id: &str, f: impl FnOnce(&mut PluginRegistryEntry) -> T) -> Option<T> {
        self.plugins.write().await.get_mut(id).map(f)
    }

    /// 엔트리 읽기
    pub async fn inspect<T>(&self, id: &str, f: impl FnOnce(&PluginRegistryEntry) -> T) -> Option<T> {
        self.plugins.read().await.get(id).map(f)
    }

    pub async fn record_execution(&self, id: &str, elapsed: Duration, error: Option<String>) {
        if let Some(entry) = self.plugins.write().await.get_mut(id) {
            entry.metrics.record(elapsed, error);
        }
    }

    pub async fn metrics(&self, id: &str) -> Option<PluginMetrics> {
        self.inspect(id, |e| e.metrics.clone()).await
    }

    /// 로드 순서대로 정렬된 ID
    pub async fn load_order(&self) -> Vec<String> {
        let plugins = self.plugins.read().await;
        let mut ordered: Vec<_> = plugins.iter().collect();
        ordered.sort_by_key(|(_, entry)| entry.load_seq);
        ordered.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// ACTIVE 플러그인 스냅샷 (로드 순서)
    pub(crate) async fn active(&self) -> Vec<ActivePlugin> {
        let plugins = self.plugins.read().await;
        let mut active: Vec<_> = plugins
            .values()
            .filter(|e| e.state == PluginState::Active)
            .filter_map(|e| {
                e.instance.as_ref().map(|instance| {
                    (
                        e.load_seq,
                        ActivePlugin {
                            id: e.manifest.id().to_string(),
                            manifest: e.manifest.clone(),
                            instance: Arc::clone(instance),
                            sandbox: e.sandbox.clone(),
                        },
                    )
                })
            })
            .collect();
        active.sort_by_key(|(seq, _)| *seq);
        active.into_iter().map(|(_, p)| p).collect()
    }

    pub(crate) async fn active_plugin(&self, id: &str) -> Option<ActivePlugin> {
        let plugins = self.plugins.read().await;
        let entry = plugins.get(id).filter(|e| e.state == PluginState::Active)?;
        Some(ActivePlugin {
            id: id.to_string(),
            manifest: entry.manifest.clone(),
            instance: Arc::clone(entry.instance.as_ref()?),
            sandbox: entry.sandbox.clone(),
        })
    }

    /// 메타데이터 (dependents는 호출자가 채움)
    pub async fn metadata(&self, id: &str, dependents: Vec<String>) -> Option<PluginMetadata> {
        self.inspect(id, |e| PluginMetadata {
            id: e.manifest.id().to_string(),
            version: e.manifest.version.to_string(),
            description: e.manifest.description.clone(),
            state: e.state,
            permissions: e.permissions.clone(),
            hooks: e.manifest.hooks.clone(),
            capabilities: e.manifest.capabilities.iter().map(|c| c.name.clone()).collect(),
            dependencies: e.dependencies.clone(),
            dependents,
            loaded_at: e.loaded_at,
        })
        .await
    }

    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
