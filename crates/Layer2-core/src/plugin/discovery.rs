//! Plugin Discovery - 플러그인 발견
//!
//! 검색 경로의 하위 디렉토리에서 `plugin.json` 또는 `mnemosPlugin` 섹션이
//! 있는 `package.json`을 찾습니다. 잘못된 매니페스트는 경고 후 건너뜁니다.

use super::manifest::{PluginManifest, MANIFEST_FILE, PACKAGE_FILE};
use mnemos_foundation::{PluginSettings, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

// ============================================================================
// DiscoveredPlugin - 발견된 플러그인
// ============================================================================

/// 발견된 플러그인 정보
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,

    /// 플러그인 디렉토리
    pub path: PathBuf,

    /// 실제로 읽은 매니페스트 파일
    pub manifest_path: PathBuf,

    pub scope: PluginScope,
}

/// 플러그인 발견 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginScope {
    /// 사용자 레벨 (<data_dir>/mnemos/plugins)
    User,
    /// 프로젝트 레벨 (.mnemos/plugins)
    Project,
    /// 설정/CLI로 지정한 디렉토리
    Configured,
}

impl PluginScope {
    /// 우선순위 (높을수록 우선)
    pub fn priority(&self) -> u8 {
        match self {
            PluginScope::Configured => 3,
            PluginScope::Project => 2,
            PluginScope::User => 1,
        }
    }
}

// ============================================================================
// PluginDiscovery
// ============================================================================

/// 플러그인 발견 시스템
#[derive(Debug, Clone, Default)]
pub struct PluginDiscovery {
    search_paths: Vec<(PathBuf, PluginScope)>,
}

impl PluginDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// 설정된 디렉토리만 검색
    pub fn from_settings(settings: &PluginSettings) -> Self {
        let mut discovery = Self::new();
        for dir in &settings.directories {
            discovery.add_search_path(dir, PluginScope::Configured);
        }
        discovery
    }

    /// 프로젝트/사용자 기본 경로 추가
    pub fn with_default_paths(mut self, working_dir: &Path) -> Self {
        self.add_search_path(working_dir.join(".mnemos").join("plugins"), PluginScope::Project);
        if let Some(data) = dirs::data_dir() {
            self.add_search_path(data.join("mnemos").join("plugins"), PluginScope::User);
        }
        self
    }

    pub fn add_search_path(&mut self, path: impl Into<PathBuf>, scope: PluginScope) {
        self.search_paths.push((path.into(), scope));
    }

    pub fn search_paths(&self) -> impl Iterator<Item = &Path> {
        self.search_paths.iter().map(|(p, _)| p.as_path())
    }

    // ========================================================================
    // 플러그인 발견
    // ========================================================================

    /// 모든 플러그인 발견 (같은 ID는 우선순위가 높은 쪽만)
    pub async fn discover_plugins(&self) -> Vec<DiscoveredPlugin> {
        let mut plugins = Vec::new();

        for (path, scope) in &self.search_paths {
            if !path.is_dir() {
                continue;
            }

            match self.scan_plugin_directory(path, *scope).await {
                Ok(found) => plugins.extend(found),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to scan plugin directory");
                }
            }
        }

        // 안정 정렬: 같은 우선순위는 검색 경로 순서 유지
        plugins.sort_by(|a, b| b.scope.priority().cmp(&a.scope.priority()));

        let mut seen = HashSet::new();
        plugins.retain(|p| {
            let first = seen.insert(p.manifest.id().to_string());
            if !first {
                debug!(plugin_id = %p.manifest.id(), path = %p.path.display(), "shadowed by higher-priority plugin");
            }
            first
        });

        info!("Discovered {} plugins", plugins.len());
        plugins
    }

    /// 디렉토리 하나 스캔 (이름순)
    async fn scan_plugin_directory(&self, dir: &Path, scope: PluginScope) -> Result<Vec<DiscoveredPlugin>> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let mut plugins = Vec::new();
        for path in dirs {
            match load_manifest(&path).await {
                Ok(Some((manifest, manifest_path))) => {
                    debug!(plugin_id = %manifest.id(), path = %path.display(), "Found plugin");
                    plugins.push(DiscoveredPlugin {
                        manifest,
                        path,
                        manifest_path,
                        scope,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping invalid plugin manifest");
                }
            }
        }

        Ok(plugins)
    }

    /// 특정 ID의 플러그인 찾기
    pub async fn find_plugin(&self, id: &str) -> Option<DiscoveredPlugin> {
        self.discover_plugins()
            .await
            .into_iter()
            .find(|p| p.manifest.id() == id)
    }
}

/// 디렉토리의 매니페스트 읽기 (plugin.json → package.json 순)
pub async fn load_manifest(dir: &Path) -> Result<Option<(PluginManifest, PathBuf)>> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if fs::try_exists(&manifest_path).await? {
        let content = fs::read_to_string(&manifest_path).await?;
        return PluginManifest::from_json(&content).map(|m| Some((m, manifest_path)));
    }

    let package_path = dir.join(PACKAGE_FILE);
    if fs::try_exists(&package_path).await? {
        let content = fs::read_to_string(&package_path).await?;
        return Ok(PluginManifest::from_package_json(&content)?.map(|m| (m, package_path)));
    }

    Ok(None)
}

// ============================================================================
// 테스트
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_plugin(root: &Path, id: &str, version: &str) {
        let plugin_dir = root.join(id);
        fs::create_dir_all(&plugin_dir).await.unwrap();
        let manifest = format!(
            r#"{{"name": "{}", "version": "{}", "hooks": ["before-save"]}}"#,
            id, version
        );
        fs::write(plugin_dir.join(MANIFEST_FILE), manifest).await.unwrap();
    }

    #[tokio::test]
    async fn test_discover_plugins() {
        let temp = TempDir::new().unwrap();
        create_test_plugin(temp.path(), "alpha", "1.0.0").await;
        create_test_plugin(temp.path(), "beta", "0.2.0").await;

        let mut discovery = PluginDiscovery::new();
        discovery.add_search_path(temp.path(), PluginScope::Configured);
        let plugins = discovery.discover_plugins().await;

        let ids: Vec<_> = plugins.iter().map(|p| p.manifest.id()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
        assert!(plugins[0].manifest.declares_hook("before-save"));
    }

    #[tokio::test]
    async fn test_package_json_fallback_and_invalid_skipped() {
        let temp = TempDir::new().unwrap();
        let pkg_dir = temp.path().join("from-package");
        fs::create_dir_all(&pkg_dir).await.unwrap();
        fs::write(
            pkg_dir.join(PACKAGE_FILE),
            r#"{"name": "from-package", "version": "2.0.0", "mnemosPlugin": {"hooks": ["index"]}}"#,
        )
        .await
        .unwrap();

        let bad_dir = temp.path().join("broken");
        fs::create_dir_all(&bad_dir).await.unwrap();
        fs::write(bad_dir.join(MANIFEST_FILE), r#"{"name": "broken", "version": "nope"}"#)
            .await
            .unwrap();

        let mut discovery = PluginDiscovery::new();
        discovery.add_search_path(temp.path(), PluginScope::Configured);
        let plugins = discovery.discover_plugins().await;

        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].manifest.id(), "from-package");
        assert!(plugins[0].manifest_path.ends_with(PACKAGE_FILE));
    }

    #[tokio::test]
    async fn test_scope_priority() {
        let project = TempDir::new().unwrap();
        let configured = TempDir::new().unwrap();
        create_test_plugin(project.path(), "dup", "1.0.0").await;
        create_test_plugin(configured.path(), "dup", "2.0.0").await;

        let mut discovery = PluginDiscovery::new();
        discovery.add_search_path(project.path(), PluginScope::Project);
        discovery.add_search_path(configured.path(), PluginScope::Configured);

        let found = discovery.find_plugin("dup").await.unwrap();
        assert_eq!(found.scope, PluginScope::Configured);
        assert_eq!(found.manifest.version.to_string(), "2.0.0");
        assert_eq!(discovery.discover_plugins().await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_manifest_prefers_plugin_json() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(MANIFEST_FILE),
            r#"{"name": "from-plugin-json", "version": "1.0.0"}"#,
        )
        .await
        .unwrap();
        fs::write(
            temp.path().join(PACKAGE_FILE),
            r#"{"name": "from-package", "version": "1.0.0", "mnemosPlugin": {}}"#,
        )
        .await
        .unwrap();

        let (manifest, path) = load_manifest(temp.path()).await.unwrap().unwrap();
        assert_eq!(manifest.name, "from-plugin-json");
        assert!(path.ends_with(MANIFEST_FILE));

        let empty = TempDir::new().unwrap();
        assert!(load_manifest(empty.path()).await.unwrap().is_none());
    }
}
