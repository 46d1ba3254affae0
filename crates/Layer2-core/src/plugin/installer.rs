//! Plugin Installer - 플러그인 파일 가져오기
//!
//! 로컬 디렉토리, HTTP tarball, GitHub 저장소에서 플러그인 파일을
//! 스테이징하고 매니페스트를 읽습니다. 설치 기록과 잠금은
//! `LifecycleManager`가 담당합니다.

use super::discovery::load_manifest;
use super::manifest::PluginManifest;
use mnemos_foundation::{Error, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "mnemos";
const ARCHIVE_NAME: &str = "archive.tar.gz";

// ============================================================================
// PluginSource - 플러그인 소스
// ============================================================================

/// 플러그인 설치 소스
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSource {
    /// GitHub 저장소 (owner/repo[/path][@tag])
    GitHub {
        owner: String,
        repo: String,
        tag: Option<String>,
        path: Option<String>,
    },
    /// 로컬 디렉토리
    Local(PathBuf),
    /// HTTP(S) tarball
    Url(String),
}

impl PluginSource {
    /// GitHub 소스 파싱 (예: "github:owner/repo@tag", "github:owner/repo/plugins/x")
    pub fn parse_github(source: &str) -> Option<Self> {
        let source = source.strip_prefix("github:")?;

        let (repo_path, tag) = match source.split_once('@') {
            Some((path, tag)) if !tag.is_empty() => (path, Some(tag.to_string())),
            Some((path, _)) => (path, None),
            None => (source, None),
        };

        let parts: Vec<&str> = repo_path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            return None;
        }

        Some(PluginSource::GitHub {
            owner: parts[0].to_string(),
            repo: parts[1].to_string(),
            tag,
            path: (parts.len() > 2).then(|| parts[2..].join("/")),
        })
    }

    /// 소스 문자열 파싱
    pub fn parse(source: &str) -> Result<Self> {
        if source.starts_with("github:") {
            Self::parse_github(source)
                .ok_or_else(|| Error::InvalidInput(format!("Invalid GitHub source: {}", source)))
        } else if source.starts_with("http://") || source.starts_with("https://") {
            Ok(PluginSource::Url(source.to_string()))
        } else {
            let path = PathBuf::from(source);
            if path.is_dir() {
                Ok(PluginSource::Local(path))
            } else {
                Err(Error::NotFound(format!("Plugin source directory not found: {}", source)))
            }
        }
    }

    /// GitHub tarball URL
    fn archive_url(owner: &str, repo: &str, tag: Option<&str>) -> String {
        let tag = tag.unwrap_or("main");
        let reference = if tag == "main" || tag == "master" {
            format!("heads/{}", tag)
        } else {
            format!("tags/{}", tag)
        };
        format!(
            "https://github.com/{}/{}/archive/refs/{}.tar.gz",
            owner, repo, reference
        )
    }
}

impl std::fmt::Display for PluginSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginSource::GitHub {
                owner,
                repo,
                tag,
                path,
            } => {
                write!(f, "github:{}/{}", owner, repo)?;
                if let Some(p) = path {
                    write!(f, "/{}", p)?;
                }
                if let Some(t) = tag {
                    write!(f, "@{}", t)?;
                }
                Ok(())
            }
            PluginSource::Local(path) => write!(f, "{}", path.display()),
            PluginSource::Url(url) => write!(f, "{}", url),
        }
    }
}

// ============================================================================
// StagedPlugin - 스테이징된 플러그인
// ============================================================================

/// 매니페스트까지 읽은 플러그인 파일
#[derive(Debug)]
pub struct StagedPlugin {
    pub manifest: PluginManifest,

    /// 매니페스트가 있는 디렉토리
    pub dir: PathBuf,

    /// 다운로드용 임시 디렉토리 (로컬 소스면 None)
    temp_dir: Option<PathBuf>,
}

impl StagedPlugin {
    /// 임시 디렉토리 정리
    pub async fn cleanup(self) {
        if let Some(temp) = self.temp_dir {
            if let Err(e) = fs::remove_dir_all(&temp).await {
                debug!(path = %temp.display(), error = %e, "failed to remove staging dir");
            }
        }
    }
}

// ============================================================================
// PluginInstaller
// ============================================================================

/// 플러그인 파일 설치기
pub struct PluginInstaller {
    client: Client,
}

impl PluginInstaller {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// 소스에서 파일을 가져오고 매니페스트 검증
    pub async fn stage(&self, source: &PluginSource) -> Result<StagedPlugin> {
        info!(source = %source, "Staging plugin");

        match source {
            PluginSource::Local(path) => {
                let manifest = read_manifest(path).await?;
                Ok(StagedPlugin {
                    manifest,
                    dir: path.clone(),
                    temp_dir: None,
                })
            }
            PluginSource::Url(url) => self.stage_archive(url, None).await,
            PluginSource::GitHub {
                owner,
                repo,
                tag,
                path,
            } => {
                let url = PluginSource::archive_url(owner, repo, tag.as_deref());
                self.stage_archive(&url, path.as_deref()).await
            }
        }
    }

    async fn stage_archive(&self, url: &str, subpath: Option<&str>) -> Result<StagedPlugin> {
        let temp_dir = std::env::temp_dir().join(format!("mnemos_plugin_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&temp_dir).await?;

        let staged = async {
            let archive_path = temp_dir.join(ARCHIVE_NAME);
            self.download_file(url, &archive_path).await?;
            extract_tarball(&archive_path, &temp_dir).await?;

            let extracted = find_extracted_dir(&temp_dir).await?;
            let dir = match subpath {
                Some(sub) => extracted.join(sub),
                None => extracted,
            };
            let manifest = read_manifest(&dir).await?;
            Ok::<_, Error>((manifest, dir))
        }
        .await;

        match staged {
            Ok((manifest, dir)) => Ok(StagedPlugin {
                manifest,
                dir,
                temp_dir: Some(temp_dir),
            }),
            Err(e) => {
                let _ = fs::remove_dir_all(&temp_dir).await;
                Err(e)
            }
        }
    }

    /// 스테이징된 파일을 설치 디렉토리로 복사
    pub async fn copy_into(&self, staged: &StagedPlugin, target: &Path) -> Result<()> {
        debug!(from = %staged.dir.display(), to = %target.display(), "copy plugin files");
        copy_dir_recursive(&staged.dir, target).await
    }

    /// GitHub 소스의 최신 태그 (현재 버전과 다를 때만)
    pub async fn check_update(&self, source: &PluginSource, current: &str) -> Result<Option<String>> {
        let PluginSource::GitHub { owner, repo, .. } = source else {
            return Ok(None);
        };

        let url = format!("https://api.github.com/repos/{}/{}/tags", owner, repo);
        let response = self
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let tags: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(tags
            .first()
            .and_then(|latest| latest["name"].as_str())
            .filter(|name| name.trim_start_matches('v') != current.trim_start_matches('v'))
            .map(String::from))
    }

    async fn download_file(&self, url: &str, dest: &Path) -> Result<()> {
        debug!("Downloading {} to {:?}", url, dest);

        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "Failed to download {}: HTTP {}",
                url,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        fs::write(dest, bytes).await?;
        Ok(())
    }
}

impl Default for PluginInstaller {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// 유틸리티
// ============================================================================

async fn read_manifest(dir: &Path) -> Result<PluginManifest> {
    let (manifest, path) = load_manifest(dir).await?.ok_or_else(|| {
        Error::NotFound(format!("No plugin manifest found in {}", dir.display()))
    })?;
    manifest.validate()?;
    debug!(plugin_id = %manifest.id(), manifest = %path.display(), "read manifest");
    Ok(manifest)
}

/// tarball 압축 해제 (시스템 tar 사용)
async fn extract_tarball(archive: &Path, dest: &Path) -> Result<()> {
    debug!("Extracting {:?} to {:?}", archive, dest);

    let output = tokio::process::Command::new("tar")
        .args([
            "-xzf",
            &archive.to_string_lossy(),
            "-C",
            &dest.to_string_lossy(),
        ])
        .output()
        .await?;

    if !output.status.success() {
        return Err(Error::Internal(format!(
            "Failed to extract archive: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(())
}

/// 압축 해제 후 최상위 디렉토리 찾기
async fn find_extracted_dir(temp_dir: &Path) -> Result<PathBuf> {
    let mut entries = fs::read_dir(temp_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_dir() {
            return Ok(path);
        }
    }

    Err(Error::NotFound("No directory found after extraction".into()))
}

/// 디렉토리 재귀 복사
pub(crate) async fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    if !dest.exists() {
        fs::create_dir_all(dest).await?;
    }

    let mut entries = fs::read_dir(src).await?;

    while let Some(entry) = entries.next_entry().await? {
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if src_path.is_dir() {
            Box::pin(copy_dir_recursive(&src_path, &dest_path)).await?;
        } else if let Err(e) = fs::copy(&src_path, &dest_path).await {
            warn!(path = %src_path.display(), error = %e, "Failed to copy plugin file");
            return Err(e.into());
        }
    }

    Ok(())
}

// ============================================================================
// 테스트
// ============================================================================
