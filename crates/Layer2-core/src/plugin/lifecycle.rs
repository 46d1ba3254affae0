//! Plugin Lifecycle Manager - 설치/제거/활성화/업데이트
//!
//! 실행 중인 `PluginManager`와 독립적으로 설치 기록만 다룹니다.
//! 설치 기록의 ACTIVE/DISABLED는 런타임 상태와 동기화하지 않으며,
//! 호출자가 필요하면 두 상태를 맞춥니다.
//!
//! ```text
//! install:  stage → lock(id) → set aside old → copy → deps → post-install → record
//!                                └──── 실패 시 복사한 파일 제거 + 기존 파일 원위치 ────┘
//! update:   lock(id) → stage → backup → disable → install(force) → enable
//!                                                  └ 실패 시 기록 복구 (파일 유실 시 backup 복원)
//! ```

use super::events::{EventBus, EventType};
use super::installer::{copy_dir_recursive, PluginInstaller, PluginSource, StagedPlugin};
use super::manifest::PluginManifest;
use super::store::{InstallState, InstallationStore, PluginInstallationRecord};
use async_trait::async_trait;
use chrono::Utc;
use mnemos_foundation::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// 백업 디렉토리 이름 (플러그인 디렉토리 아래)
pub const BACKUP_DIR: &str = ".backups";

/// 재설치 중 기존 설치 파일을 잠시 옮겨두는 곳 (백업 디렉토리 아래)
const REPLACING_DIR: &str = ".replacing";

// ============================================================================
// 옵션
// ============================================================================

/// 설치 옵션
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// 이미 설치되어 있어도 다시 설치
    pub force: bool,

    /// 설치되지 않은 의존성을 `dependency_sources`에서 설치
    pub install_dependencies: bool,

    /// 의존성 ID → 설치 소스
    pub dependency_sources: HashMap<String, PluginSource>,

    /// false면 DISABLED 상태로 기록
    pub enable: bool,

    /// 등록된 post-install 훅 실행
    pub run_post_install: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            force: false,
            install_dependencies: true,
            dependency_sources: HashMap::new(),
            enable: true,
            run_post_install: true,
        }
    }
}

impl InstallOptions {
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enable = false;
        self
    }

    pub fn with_dependency_source(mut self, id: impl Into<String>, source: PluginSource) -> Self {
        self.dependency_sources.insert(id.into(), source);
        self
    }
}

/// 제거 옵션
#[derive(Debug, Clone)]
pub struct UninstallOptions {
    /// 다른 플러그인이 의존해도 제거
    pub force: bool,

    /// 설치 디렉토리 삭제
    pub remove_files: bool,
}

impl Default for UninstallOptions {
    fn default() -> Self {
        Self {
            force: false,
            remove_files: true,
        }
    }
}

/// 업데이트 옵션
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// 설치 전 현재 파일 백업 (실패 시 복원)
    pub backup: bool,

    pub install_dependencies: bool,
    pub dependency_sources: HashMap<String, PluginSource>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            backup: true,
            install_dependencies: true,
            dependency_sources: HashMap::new(),
        }
    }
}

/// 라이프사이클 작업 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleResult {
    pub plugin_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<PluginInstallationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LifecycleResult {
    fn ok(plugin_id: &str, record: Option<PluginInstallationRecord>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            success: true,
            record,
            error: None,
        }
    }

    fn failed(plugin_id: &str, error: &Error) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            success: false,
            record: None,
            error: Some(error.to_string()),
        }
    }
}

// ============================================================================
// PostInstallHook
// ============================================================================

/// 설치 직후, 기록 저장 전에 실행되는 훅 (실패하면 설치 취소)
#[async_trait]
pub trait PostInstallHook: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, record: &PluginInstallationRecord, manifest: &PluginManifest) -> Result<()>;
}

// ============================================================================
// 설치 잠금
// ============================================================================

/// 플러그인 ID별 설치 잠금 (drop 시 해제)
struct InstallLock<'a> {
    held: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InstallLock<'_> {
    fn drop(&mut self) {
        self.held.lock().remove(&self.id);
    }
}

// ============================================================================
// LifecycleManager
// ============================================================================

/// 플러그인 라이프사이클 관리자
pub struct LifecycleManager {
    store: Arc<InstallationStore>,
    installer: PluginInstaller,
    installing: Mutex<HashSet<String>>,
    post_install: RwLock<Vec<Arc<dyn PostInstallHook>>>,
    events: Option<Arc<EventBus>>,
}

impl LifecycleManager {
    pub fn new(store: Arc<InstallationStore>) -> Self {
        Self {
            store,
            installer: PluginInstaller::new(),
            installing: Mutex::new(HashSet::new()),
            post_install: RwLock::new(Vec::new()),
            events: None,
        }
    }

    /// 설치/제거/업데이트 이벤트 발행
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn store(&self) -> &Arc<InstallationStore> {
        &self.store
    }

    pub fn installer(&self) -> &PluginInstaller {
        &self.installer
    }

    pub fn add_post_install_hook(&self, hook: Arc<dyn PostInstallHook>) {
        debug!(hook = %hook.name(), "register post-install hook");
        self.post_install.write().push(hook);
    }

    fn backup_dir(&self) -> PathBuf {
        self.store.base_dir().join(BACKUP_DIR)
    }

    fn try_lock(&self, id: &str) -> Result<InstallLock<'_>> {
        if !self.installing.lock().insert(id.to_string()) {
            return Err(Error::Lifecycle(format!(
                "Another operation on plugin '{}' is already in progress",
                id
            )));
        }
        Ok(InstallLock {
            held: &self.installing,
            id: id.to_string(),
        })
    }

    async fn emit(&self, event_type: EventType, payload: serde_json::Value) {
        if let Some(bus) = &self.events {
            bus.emit(event_type, payload).await;
        }
    }

    // ========================================================================
    // 설치
    // ========================================================================

    /// 플러그인 설치
    pub async fn install_plugin(&self, source: &PluginSource, options: &InstallOptions) -> LifecycleResult {
        match self.install(source, options).await {
            Ok(record) => LifecycleResult::ok(&record.id.clone(), Some(record)),
            Err(e) => {
                warn!(source = %source, error = %e, "Plugin installation failed");
                LifecycleResult::failed(&source.to_string(), &e)
            }
        }
    }

    async fn install(&self, source: &PluginSource, options: &InstallOptions) -> Result<PluginInstallationRecord> {
        let staged = self.installer.stage(source).await?;
        let result = match self.try_lock(staged.manifest.id()) {
            Ok(_lock) => self.install_staged(&staged, source, options).await,
            Err(e) => Err(e),
        };
        staged.cleanup().await;
        result
    }

    /// 스테이징된 플러그인 설치 (호출자가 해당 ID 잠금을 보유)
    async fn install_staged(
        &self,
        staged: &StagedPlugin,
        source: &PluginSource,
        options: &InstallOptions,
    ) -> Result<PluginInstallationRecord> {
        let manifest = &staged.manifest;
        let id = manifest.id().to_string();

        let previous = self.store.get(&id).await;
        if previous.is_some() && !options.force {
            return Err(Error::AlreadyExists(format!(
                "Plugin '{}' is already installed (use force to reinstall)",
                id
            )));
        }

        info!(plugin_id = %id, version = %manifest.version, source = %source, "Installing plugin");

        let target = self.store.plugin_dir(&id);
        let in_place = same_dir(&staged.dir, &target);
        let mut replaced = None;
        if !in_place {
            if target.exists() {
                replaced = Some(self.set_aside(&id, &target).await?);
            }
            if let Err(e) = self.installer.copy_into(staged, &target).await {
                put_back(&target, replaced.as_deref()).await;
                return Err(e);
            }
        }

        let finished = async {
            if options.install_dependencies {
                self.install_dependencies(manifest, options).await?;
            }

            let now = Utc::now();
            let mut record = PluginInstallationRecord::new(
                &id,
                manifest.version.to_string(),
                source.to_string(),
                &target,
            )
            .with_dependencies(manifest.dependencies.iter().map(|d| d.name.clone()).collect());
            if let Some(previous) = &previous {
                record.installed_at = previous.installed_at;
                record.updated_at = Some(now);
            }
            if !options.enable {
                record.state = InstallState::Disabled;
                record.enabled_at = None;
                record.disabled_at = Some(now);
            }

            if options.run_post_install {
                let hooks = self.post_install.read().clone();
                for hook in hooks {
                    debug!(plugin_id = %id, hook = %hook.name(), "run post-install hook");
                    hook.run(&record, manifest).await.map_err(|e| {
                        Error::Lifecycle(format!("Post-install hook '{}' failed: {}", hook.name(), e))
                    })?;
                }
            }

            self.store.upsert(record.clone()).await?;
            Ok::<_, Error>(record)
        }
        .await;

        match finished {
            Ok(record) => {
                if let Some(aside) = &replaced {
                    remove_partial(aside).await;
                }
                info!(plugin_id = %id, version = %record.version, "Plugin installed");
                self.emit(
                    EventType::PluginInstalled,
                    json!({ "pluginId": id, "version": record.version, "source": record.source }),
                )
                .await;
                Ok(record)
            }
            Err(e) => {
                if !in_place {
                    put_back(&target, replaced.as_deref()).await;
                }
                Err(e)
            }
        }
    }

    /// 기존 설치 디렉토리를 `.backups/.replacing/<id>`로 옮김
    async fn set_aside(&self, id: &str, target: &Path) -> Result<PathBuf> {
        let aside = self.backup_dir().join(REPLACING_DIR).join(id);
        remove_partial(&aside).await;
        if let Some(parent) = aside.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(target, &aside).await?;
        debug!(plugin_id = %id, path = %aside.display(), "moved previous installation aside");
        Ok(aside)
    }

    /// 설치되지 않은 의존성 설치 (필수 의존성 실패는 설치 실패)
    async fn install_dependencies(&self, manifest: &PluginManifest, options: &InstallOptions) -> Result<()> {
        for dep in &manifest.dependencies {
            if self.store.contains(&dep.name).await {
                continue;
            }

            let Some(dep_source) = options.dependency_sources.get(&dep.name) else {
                if dep.optional {
                    warn!(plugin_id = %manifest.id(), dependency = %dep.name, "Optional dependency not installed");
                    continue;
                }
                return Err(Error::missing_dependency(manifest.id(), &dep.name));
            };

            let dep_options = InstallOptions {
                force: false,
                ..options.clone()
            };
            info!(plugin_id = %manifest.id(), dependency = %dep.name, "Installing dependency");
            if let Err(e) = Box::pin(self.install(dep_source, &dep_options)).await {
                if dep.optional {
                    warn!(dependency = %dep.name, error = %e, "Optional dependency failed to install");
                    continue;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    // ========================================================================
    // 제거
    // ========================================================================

    /// 플러그인 제거
    pub async fn uninstall_plugin(&self, id: &str, options: &UninstallOptions) -> LifecycleResult {
        match self.uninstall(id, options).await {
            Ok(record) => LifecycleResult::ok(id, Some(record)),
            Err(e) => {
                warn!(plugin_id = %id, error = %e, "Plugin uninstall failed");
                LifecycleResult::failed(id, &e)
            }
        }
    }

    async fn uninstall(&self, id: &str, options: &UninstallOptions) -> Result<PluginInstallationRecord> {
        let _lock = self.try_lock(id)?;

        if !self.store.contains(id).await {
            return Err(Error::NotFound(format!("Plugin '{}' is not installed", id)));
        }

        let dependents = self.store.dependents_of(id).await;
        if !dependents.is_empty() {
            if !options.force {
                return Err(Error::Lifecycle(format!(
                    "Cannot uninstall '{}': required by {}",
                    id,
                    dependents.join(", ")
                )));
            }
            warn!(plugin_id = %id, dependents = ?dependents, "Force-uninstalling plugin with dependents");
        }

        if options.remove_files {
            self.store.remove_plugin_dir(id).await?;
        }

        let record = self
            .store
            .remove(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Plugin '{}' is not installed", id)))?;

        info!(plugin_id = %id, "Plugin uninstalled");
        self.emit(EventType::PluginUninstalled, json!({ "pluginId": id })).await;
        Ok(record)
    }

    // ========================================================================
    // 활성화 / 비활성화
    // ========================================================================

    pub async fn enable_plugin(&self, id: &str) -> LifecycleResult {
        self.transition(id, InstallState::Active).await
    }

    pub async fn disable_plugin(&self, id: &str) -> LifecycleResult {
        self.transition(id, InstallState::Disabled).await
    }

    async fn transition(&self, id: &str, state: InstallState) -> LifecycleResult {
        let result = async {
            let current = self
                .store
                .get(id)
                .await
                .ok_or_else(|| Error::NotFound(format!("Plugin '{}' is not installed", id)))?;
            if current.state == state {
                return Ok(current);
            }
            self.store
                .set_state(id, state)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Plugin '{}' is not installed", id)))
        }
        .await;

        match result {
            Ok(record) => LifecycleResult::ok(id, Some(record)),
            Err(e) => LifecycleResult::failed(id, &e),
        }
    }

    // ========================================================================
    // 업데이트
    // ========================================================================

    /// 새 소스로 업데이트 (실패 시 백업 복원)
    pub async fn update_plugin(&self, id: &str, source: &PluginSource, options: &UpdateOptions) -> LifecycleResult {
        match self.update(id, source, options).await {
            Ok(record) => LifecycleResult::ok(id, Some(record)),
            Err(e) => {
                warn!(plugin_id = %id, error = %e, "Plugin update failed");
                LifecycleResult::failed(id, &e)
            }
        }
    }

    async fn update(&self, id: &str, source: &PluginSource, options: &UpdateOptions) -> Result<PluginInstallationRecord> {
        // 업데이트 전체 구간 동안 같은 ID의 설치/업데이트를 막음
        let _lock = self.try_lock(id)?;
        let previous = self
            .store
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Plugin '{}' is not installed", id)))?;

        let staged = self.installer.stage(source).await?;
        let result = self.update_staged(&previous, &staged, source, options).await;
        staged.cleanup().await;
        result
    }

    async fn update_staged(
        &self,
        previous: &PluginInstallationRecord,
        staged: &StagedPlugin,
        source: &PluginSource,
        options: &UpdateOptions,
    ) -> Result<PluginInstallationRecord> {
        let id = previous.id.as_str();
        if staged.manifest.id() != id {
            return Err(Error::Lifecycle(format!(
                "Update source for '{}' provides plugin '{}'",
                id,
                staged.manifest.id()
            )));
        }
        let was_active = previous.is_active();

        let backup = if options.backup {
            Some(self.backup(previous).await?)
        } else {
            None
        };

        if was_active {
            self.store.set_state(id, InstallState::Disabled).await?;
        }

        let install_options = InstallOptions {
            force: true,
            install_dependencies: options.install_dependencies,
            dependency_sources: options.dependency_sources.clone(),
            enable: false,
            run_post_install: true,
        };

        let installed = match self.install_staged(staged, source, &install_options).await {
            Ok(record) => record,
            Err(e) => {
                self.restore(previous, backup.as_deref()).await;
                return Err(e);
            }
        };

        let record = if was_active {
            self.store
                .set_state(id, InstallState::Active)
                .await?
                .unwrap_or(installed)
        } else {
            installed
        };

        info!(plugin_id = %id, from = %previous.version, to = %record.version, "Plugin updated");
        self.emit(
            EventType::PluginUpdated,
            json!({ "pluginId": id, "from": previous.version, "to": record.version }),
        )
        .await;
        Ok(record)
    }

    /// 설치 디렉토리 백업 (<plugin_dir>/.backups/<id>_<timestamp>)
    async fn backup(&self, record: &PluginInstallationRecord) -> Result<PathBuf> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let backup_path = self.backup_dir().join(format!("{}_{}", record.id, timestamp));

        if record.install_path.exists() {
            copy_dir_recursive(&record.install_path, &backup_path).await?;
        } else {
            fs::create_dir_all(&backup_path).await?;
        }

        info!(plugin_id = %record.id, backup = %backup_path.display(), "Backed up plugin");
        Ok(backup_path)
    }

    /// 이전 기록 복원, 설치 파일이 사라졌으면 백업에서 복사 (best-effort)
    async fn restore(&self, previous: &PluginInstallationRecord, backup: Option<&Path>) {
        let missing = !previous.install_path.exists();
        if let Some(backup) = backup.filter(|_| missing) {
            match copy_dir_recursive(backup, &previous.install_path).await {
                Ok(()) => info!(plugin_id = %previous.id, "Restored plugin files from backup"),
                Err(e) => warn!(plugin_id = %previous.id, error = %e, "Failed to restore plugin backup"),
            }
        }
        if let Err(e) = self.store.upsert(previous.clone()).await {
            warn!(plugin_id = %previous.id, error = %e, "Failed to restore installation record");
        }
    }

    /// 백업 목록 (최신순)
    pub async fn list_backups(&self, id: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}_", id);
        let mut backups = Vec::new();
        let dir = self.backup_dir();

        if dir.exists() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().starts_with(&prefix) {
                    backups.push(entry.path());
                }
            }
        }

        backups.sort();
        backups.reverse();
        Ok(backups)
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub async fn list(&self) -> Vec<PluginInstallationRecord> {
        self.store.list().await
    }

    pub async fn get(&self, id: &str) -> Option<PluginInstallationRecord> {
        self.store.get(id).await
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn remove_partial(dir: &Path) {
    if dir.exists() {
        if let Err(e) = fs::remove_dir_all(dir).await {
            warn!(path = %dir.display(), error = %e, "Failed to clean up plugin files");
        }
    }
}

/// 실패한 설치 파일을 지우고 옮겨둔 기존 설치를 되돌림
async fn put_back(target: &Path, aside: Option<&Path>) {
    remove_partial(target).await;
    let Some(aside) = aside else {
        return;
    };
    match fs::rename(aside, target).await {
        Ok(()) => info!(path = %target.display(), "Restored previous plugin files"),
        Err(e) => warn!(path = %target.display(), error = %e, "Failed to restore previous plugin files"),
    }
}

// ============================================================================
// 테스트
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        sources: PathBuf,
        lifecycle: LifecycleManager,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let sources = temp.path().join("sources");
        let store = Arc::new(InstallationStore::new(temp.path().join("plugins")));
        Fixture {
            sources,
            lifecycle: LifecycleManager::new(store),
            _temp: temp,
        }
    }

    /// 소스 디렉토리에 플러그인 작성
    fn write_plugin(fixture: &Fixture, dir_name: &str, manifest: &str) -> PluginSource {
        let dir = fixture.sources.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("plugin.json"), manifest).unwrap();
        std::fs::write(dir.join("index.js"), dir_name).unwrap();
        PluginSource::Local(dir)
    }

    struct RejectMajor(u64, AtomicUsize);

    #[async_trait]
    impl PostInstallHook for RejectMajor {
        fn name(&self) -> &str {
            "reject-major"
        }

        async fn run(&self, _record: &PluginInstallationRecord, manifest: &PluginManifest) -> Result<()> {
            self.1.fetch_add(1, Ordering::SeqCst);
            if manifest.version.major == self.0 {
                return Err(Error::Validation("unsupported major version".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_install_and_reinstall() {
        let f = fixture();
        let source = write_plugin(&f, "v1", r#"{"name": "indexer", "version": "1.0.0"}"#);

        let result = f.lifecycle.install_plugin(&source, &InstallOptions::default()).await;
        assert!(result.success, "{:?}", result.error);
        let record = result.record.unwrap();
        assert!(record.is_active());
        assert!(record.install_path.join("index.js").exists());

        let again = f.lifecycle.install_plugin(&source, &InstallOptions::default()).await;
        assert!(!again.success);
        assert!(again.error.unwrap().contains("already installed"));

        let forced = f
            .lifecycle
            .install_plugin(&source, &InstallOptions::default().forced())
            .await;
        assert!(forced.success);
        let forced = forced.record.unwrap();
        assert_eq!(forced.installed_at, record.installed_at);
        assert!(forced.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_install_with_dependencies() {
        let f = fixture();
        let lib = write_plugin(&f, "lib", r#"{"name": "lib", "version": "1.0.0"}"#);
        let app = write_plugin(
            &f,
            "app",
            r#"{"name": "app", "version": "1.0.0", "dependencies": ["lib"]}"#,
        );

        let missing = f.lifecycle.install_plugin(&app, &InstallOptions::default()).await;
        assert!(!missing.success);
        assert!(!f.lifecycle.store().plugin_dir("app").exists());
        assert!(f.lifecycle.get("app").await.is_none());

        let options = InstallOptions::default().with_dependency_source("lib", lib);
        let result = f.lifecycle.install_plugin(&app, &options).await;
        assert!(result.success, "{:?}", result.error);
        assert!(f.lifecycle.get("lib").await.is_some());
        assert_eq!(result.record.unwrap().dependencies, vec!["lib".to_string()]);
    }

    #[tokio::test]
    async fn test_post_install_failure_cleans_up() {
        let f = fixture();
        let hook = Arc::new(RejectMajor(1, AtomicUsize::new(0)));
        f.lifecycle.add_post_install_hook(hook.clone());
        let source = write_plugin(&f, "bad", r#"{"name": "bad", "version": "1.2.0"}"#);

        let result = f.lifecycle.install_plugin(&source, &InstallOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("reject-major"));
        assert_eq!(hook.1.load(Ordering::SeqCst), 1);
        assert!(!f.lifecycle.store().plugin_dir("bad").exists());
        assert!(f.lifecycle.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_install_lock_rejects_concurrent() {
        let f = fixture();
        let _held = f.lifecycle.try_lock("busy").unwrap();
        let source = write_plugin(&f, "busy", r#"{"name": "busy", "version": "1.0.0"}"#);

        let result = f.lifecycle.install_plugin(&source, &InstallOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("in progress"));
        drop(_held);

        assert!(f.lifecycle.install_plugin(&source, &InstallOptions::default()).await.success);
    }

    #[tokio::test]
    async fn test_uninstall_respects_dependents() {
        let f = fixture();
        let lib = write_plugin(&f, "lib", r#"{"name": "lib", "version": "1.0.0"}"#);
        let app = write_plugin(
            &f,
            "app",
            r#"{"name": "app", "version": "1.0.0", "dependencies": ["lib"]}"#,
        );
        let options = InstallOptions::default().with_dependency_source("lib", lib);
        assert!(f.lifecycle.install_plugin(&app, &options).await.success);

        let refused = f.lifecycle.uninstall_plugin("lib", &UninstallOptions::default()).await;
        assert!(!refused.success);
        assert!(refused.error.unwrap().contains("app"));

        assert!(f.lifecycle.uninstall_plugin("app", &UninstallOptions::default()).await.success);
        assert!(!f.lifecycle.store().plugin_dir("app").exists());
        assert!(f.lifecycle.uninstall_plugin("lib", &UninstallOptions::default()).await.success);
        assert!(f.lifecycle.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_enable_disable_record() {
        let f = fixture();
        let source = write_plugin(&f, "p", r#"{"name": "p", "version": "1.0.0"}"#);
        f.lifecycle
            .install_plugin(&source, &InstallOptions::default().disabled())
            .await;
        assert_eq!(f.lifecycle.get("p").await.unwrap().state, InstallState::Disabled);

        let enabled = f.lifecycle.enable_plugin("p").await;
        assert!(enabled.success);
        assert_eq!(enabled.record.unwrap().state, InstallState::Active);

        assert!(f.lifecycle.disable_plugin("p").await.success);
        assert!(!f.lifecycle.enable_plugin("ghost").await.success);
    }

    #[tokio::test]
    async fn test_update_success_keeps_enabled() {
        let f = fixture();
        let v1 = write_plugin(&f, "v1", r#"{"name": "indexer", "version": "1.0.0"}"#);
        let v2 = write_plugin(&f, "v2", r#"{"name": "indexer", "version": "2.0.0"}"#);
        f.lifecycle.install_plugin(&v1, &InstallOptions::default()).await;

        let result = f
            .lifecycle
            .update_plugin("indexer", &v2, &UpdateOptions::default())
            .await;
        assert!(result.success, "{:?}", result.error);
        let record = result.record.unwrap();
        assert_eq!(record.version, "2.0.0");
        assert!(record.is_active());
        assert_eq!(f.lifecycle.list_backups("indexer").await.unwrap().len(), 1);

        let content = std::fs::read_to_string(record.install_path.join("index.js")).unwrap();
        assert_eq!(content, "v2");
    }

    #[tokio::test]
    async fn test_update_failure_restores_backup() {
        let f = fixture();
        let v1 = write_plugin(&f, "v1", r#"{"name": "indexer", "version": "1.0.0"}"#);
        let v2 = write_plugin(&f, "v2", r#"{"name": "indexer", "version": "2.0.0"}"#);
        f.lifecycle.install_plugin(&v1, &InstallOptions::default()).await;
        f.lifecycle
            .add_post_install_hook(Arc::new(RejectMajor(2, AtomicUsize::new(0))));

        let result = f
            .lifecycle
            .update_plugin("indexer", &v2, &UpdateOptions::default())
            .await;
        assert!(!result.success);

        let record = f.lifecycle.get("indexer").await.unwrap();
        assert_eq!(record.version, "1.0.0");
        assert!(record.is_active());
        let content = std::fs::read_to_string(record.install_path.join("index.js")).unwrap();
        assert_eq!(content, "v1");
    }

    #[tokio::test]
    async fn test_failed_force_reinstall_keeps_previous_install() {
        let f = fixture();
        let v1 = write_plugin(&f, "v1", r#"{"name": "indexer", "version": "1.0.0"}"#);
        let v2 = write_plugin(&f, "v2", r#"{"name": "indexer", "version": "2.0.0"}"#);
        assert!(f.lifecycle.install_plugin(&v1, &InstallOptions::default()).await.success);
        f.lifecycle
            .add_post_install_hook(Arc::new(RejectMajor(2, AtomicUsize::new(0))));

        let result = f
            .lifecycle
            .install_plugin(&v2, &InstallOptions::default().forced())
            .await;
        assert!(!result.success);

        let record = f.lifecycle.get("indexer").await.unwrap();
        assert_eq!(record.version, "1.0.0");
        let content = std::fs::read_to_string(record.install_path.join("index.js")).unwrap();
        assert_eq!(content, "v1");
        assert!(!f.lifecycle.backup_dir().join(REPLACING_DIR).join("indexer").exists());

        // 성공한 재설치는 옮겨둔 파일을 남기지 않음
        let v3 = write_plugin(&f, "v3", r#"{"name": "indexer", "version": "3.0.0"}"#);
        assert!(f
            .lifecycle
            .install_plugin(&v3, &InstallOptions::default().forced())
            .await
            .success);
        assert!(!f.lifecycle.backup_dir().join(REPLACING_DIR).join("indexer").exists());
        assert!(f.lifecycle.list_backups("indexer").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_rejected_while_plugin_busy() {
        let f = fixture();
        let v1 = write_plugin(&f, "v1", r#"{"name": "indexer", "version": "1.0.0"}"#);
        let v2 = write_plugin(&f, "v2", r#"{"name": "indexer", "version": "2.0.0"}"#);
        assert!(f.lifecycle.install_plugin(&v1, &InstallOptions::default()).await.success);

        let held = f.lifecycle.try_lock("indexer").unwrap();
        let result = f
            .lifecycle
            .update_plugin("indexer", &v2, &UpdateOptions::default())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("in progress"));

        let record = f.lifecycle.get("indexer").await.unwrap();
        assert_eq!(record.version, "1.0.0");
        assert!(record.is_active());
        assert!(f.lifecycle.list_backups("indexer").await.unwrap().is_empty());
        drop(held);

        assert!(f
            .lifecycle
            .update_plugin("indexer", &v2, &UpdateOptions::default())
            .await
            .success);
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_interleave() {
        let f = fixture();
        let v1 = write_plugin(&f, "v1", r#"{"name": "indexer", "version": "1.0.0"}"#);
        let v2 = write_plugin(&f, "v2", r#"{"name": "indexer", "version": "2.0.0"}"#);
        let v3 = write_plugin(&f, "v3", r#"{"name": "indexer", "version": "3.0.0"}"#);
        assert!(f.lifecycle.install_plugin(&v1, &InstallOptions::default()).await.success);

        let options = UpdateOptions::default();
        let (first, second) = tokio::join!(
            f.lifecycle.update_plugin("indexer", &v2, &options),
            f.lifecycle.update_plugin("indexer", &v3, &options),
        );

        // 첫 업데이트가 먼저 잠금을 잡으므로 항상 성공
        assert!(first.success, "{:?}", first.error);
        let expected = if second.success {
            "v3"
        } else {
            assert!(second.error.unwrap().contains("in progress"));
            "v2"
        };

        let record = f.lifecycle.get("indexer").await.unwrap();
        assert!(record.is_active());
        assert_eq!(record.version, format!("{}.0.0", &expected[1..]));
        let content = std::fs::read_to_string(record.install_path.join("index.js")).unwrap();
        assert_eq!(content, expected);
    }

    #[tokio::test]
    async fn test_update_with_other_plugin_leaves_install_untouched() {
        let f = fixture();
        let v1 = write_plugin(&f, "v1", r#"{"name": "indexer", "version": "1.0.0"}"#);
        let other = write_plugin(&f, "other", r#"{"name": "tagger", "version": "2.0.0"}"#);
        assert!(f.lifecycle.install_plugin(&v1, &InstallOptions::default()).await.success);

        let result = f
            .lifecycle
            .update_plugin("indexer", &other, &UpdateOptions::default())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("tagger"));

        assert!(f.lifecycle.get("tagger").await.is_none());
        assert!(!f.lifecycle.store().plugin_dir("tagger").exists());
        let record = f.lifecycle.get("indexer").await.unwrap();
        assert_eq!(record.version, "1.0.0");
        assert!(record.is_active());
    }
}
