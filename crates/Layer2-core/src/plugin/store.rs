//! Installation Store - 플러그인 설치 기록 관리
//!
//! 플러그인 디렉토리의 `installations.json` (레코드 JSON 배열)을 관리합니다.
//! 상태가 바뀔 때마다 파일 전체를 다시 씁니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use mnemos_foundation::Result;

/// 설치 기록 파일 이름
pub const INSTALLATIONS_FILE: &str = "installations.json";

// ============================================================================
// PluginInstallationRecord - 설치 기록
// ============================================================================

/// 설치 기록상의 상태 (런타임 상태와 별개)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallState {
    Active,
    Disabled,
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// 설치된 플러그인 정보
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInstallationRecord {
    pub id: String,

    pub version: String,

    /// 설치 소스 (예: "github:mnemos/plugins/summarizer")
    pub source: String,

    pub state: InstallState,

    pub installed_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// 설치 경로
    pub install_path: PathBuf,

    /// 선언된 의존성 이름
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PluginInstallationRecord {
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        source: impl Into<String>,
        install_path: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            version: version.into(),
            source: source.into(),
            state: InstallState::Active,
            installed_at: now,
            enabled_at: Some(now),
            disabled_at: None,
            updated_at: None,
            install_path: install_path.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn is_active(&self) -> bool {
        self.state == InstallState::Active
    }
}

// ============================================================================
// InstallationStore
// ============================================================================

/// 설치 기록 저장소
pub struct InstallationStore {
    /// 플러그인 디렉토리
    base_dir: PathBuf,

    /// installations.json 캐시
    cache: tokio::sync::RwLock<Vec<PluginInstallationRecord>>,
}

impl InstallationStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            cache: tokio::sync::RwLock::new(Vec::new()),
        }
    }

    /// 사용자 데이터 디렉토리 기반 (<data_dir>/mnemos/plugins)
    pub fn user_store() -> Option<Self> {
        dirs::data_dir().map(|data| Self::new(data.join("mnemos").join("plugins")))
    }

    /// 생성 후 기존 기록 로드
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(base_dir);
        store.load().await?;
        Ok(store)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn installations_file(&self) -> PathBuf {
        self.base_dir.join(INSTALLATIONS_FILE)
    }

    /// 플러그인 설치 디렉토리
    pub fn plugin_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    // ========================================================================
    // 로드 / 저장
    // ========================================================================

    pub async fn load(&self) -> Result<()> {
        let path = self.installations_file();

        if !path.exists() {
            debug!("{} not found at {:?}, using empty", INSTALLATIONS_FILE, path);
            return Ok(());
        }

        let content = fs::read_to_string(&path).await?;
        let records: Vec<PluginInstallationRecord> = serde_json::from_str(&content)?;
        let count = records.len();
        *self.cache.write().await = records;

        info!("Loaded {} installation records", count);
        Ok(())
    }

    pub async fn save(&self) -> Result<()> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir).await?;
        }

        let cache = self.cache.read().await;
        let content = serde_json::to_string_pretty(&*cache)?;
        fs::write(self.installations_file(), content).await?;

        debug!("Saved {} with {} records", INSTALLATIONS_FILE, cache.len());
        Ok(())
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub async fn list(&self) -> Vec<PluginInstallationRecord> {
        self.cache.read().await.clone()
    }

    pub async fn list_active(&self) -> Vec<PluginInstallationRecord> {
        self.cache
            .read()
            .await
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<PluginInstallationRecord> {
        self.cache.read().await.iter().find(|r| r.id == id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.cache.read().await.iter().any(|r| r.id == id)
    }

    /// `id`를 의존성으로 선언한 다른 설치 플러그인
    pub async fn dependents_of(&self, id: &str) -> Vec<String> {
        self.cache
            .read()
            .await
            .iter()
            .filter(|r| r.id != id && r.dependencies.iter().any(|d| d == id))
            .map(|r| r.id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    // ========================================================================
    // 변경
    // ========================================================================

    /// 기록 추가 (같은 ID가 있으면 교체)
    pub async fn upsert(&self, record: PluginInstallationRecord) -> Result<()> {
        {
            let mut cache = self.cache.write().await;

            if let Some(existing) = cache.iter_mut().find(|r| r.id == record.id) {
                info!(plugin_id = %record.id, version = %record.version, "Updating installation record");
                *existing = record;
            } else {
                info!(plugin_id = %record.id, version = %record.version, "Recording installation");
                cache.push(record);
            }
        }

        self.save().await
    }

    /// 기록 삭제
    pub async fn remove(&self, id: &str) -> Result<Option<PluginInstallationRecord>> {
        let removed = {
            let mut cache = self.cache.write().await;
            match cache.iter().position(|r| r.id == id) {
                Some(idx) => Some(cache.remove(idx)),
                None => {
                    warn!(plugin_id = %id, "Installation record not found");
                    None
                }
            }
        };

        if removed.is_some() {
            self.save().await?;
        }

        Ok(removed)
    }

    /// 상태 변경 (타임스탬프 갱신). 기록이 없으면 None
    pub async fn set_state(&self, id: &str, state: InstallState) -> Result<Option<PluginInstallationRecord>> {
        let updated = {
            let mut cache = self.cache.write().await;
            cache.iter_mut().find(|r| r.id == id).map(|record| {
                let now = Utc::now();
                record.state = state;
                match state {
                    InstallState::Active => record.enabled_at = Some(now),
                    InstallState::Disabled => record.disabled_at = Some(now),
                }
                info!(plugin_id = %id, state = %state, "Installation state changed");
                record.clone()
            })
        };

        if updated.is_some() {
            self.save().await?;
        }

        Ok(updated)
    }

    // ========================================================================
    // 디렉토리
    // ========================================================================

    pub async fn remove_plugin_dir(&self, id: &str) -> Result<()> {
        let dir = self.plugin_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}

// ============================================================================
// 테스트
// ============================================================================
