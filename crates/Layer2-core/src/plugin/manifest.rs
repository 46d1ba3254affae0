//! Plugin Manifest - 플러그인 메타데이터 정의
//!
//! 플러그인 디렉토리의 `plugin.json` 또는 `package.json`의 `mnemosPlugin`
//! 섹션에서 로드됩니다. 로드 이후에는 변경되지 않습니다.

use mnemos_foundation::{Error, PermissionSet, PermissionToken, ResourceLimits, Result};
use semver::{Version, VersionReq};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// 기본 매니페스트 파일명
pub const MANIFEST_FILE: &str = "plugin.json";

/// package.json 대체 파일명
pub const PACKAGE_FILE: &str = "package.json";

/// package.json 안의 플러그인 섹션 키
pub const PACKAGE_SECTION: &str = "mnemosPlugin";

/// 플러그인 이름 최대 길이
pub const MAX_NAME_LEN: usize = 128;

/// `[a-z0-9][a-z0-9._-]*`
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

// ============================================================================
// PluginDependency - 의존성 선언
// ============================================================================

/// 플러그인 의존성
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDependency {
    /// 의존하는 플러그인 이름
    pub name: String,

    /// 요구 버전 범위 (None이면 모든 버전)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionReq>,

    /// 선택적 의존성 여부
    #[serde(default)]
    pub optional: bool,
}

impl PluginDependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            optional: false,
        }
    }

    pub fn with_version(mut self, req: VersionReq) -> Self {
        self.version = Some(req);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// 주어진 버전이 요구 범위를 만족하는지
    pub fn accepts(&self, version: &Version) -> bool {
        self.version.as_ref().map_or(true, |req| req.matches(version))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyEntry {
    Name(String),
    Full(PluginDependency),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyList {
    List(Vec<DependencyEntry>),
    Map(BTreeMap<String, String>),
}

/// `["a", {"name": "b", "optional": true}]` 또는 `{"a": "^1.0"}` 형식 모두 허용
fn deserialize_dependencies<'de, D>(deserializer: D) -> std::result::Result<Vec<PluginDependency>, D::Error>
where
    D: Deserializer<'de>,
{
    let list = Option::<DependencyList>::deserialize(deserializer)?;
    let deps = match list {
        None => Vec::new(),
        Some(DependencyList::List(entries)) => entries
            .into_iter()
            .map(|entry| match entry {
                DependencyEntry::Name(name) => PluginDependency::new(name),
                DependencyEntry::Full(dep) => dep,
            })
            .collect(),
        Some(DependencyList::Map(map)) => map
            .into_iter()
            .map(|(name, range)| {
                let range = range.trim();
                let version = if range.is_empty() || range == "*" {
                    None
                } else {
                    Some(VersionReq::parse(range).map_err(serde::de::Error::custom)?)
                };
                Ok(PluginDependency {
                    name,
                    version,
                    optional: false,
                })
            })
            .collect::<std::result::Result<_, D::Error>>()?,
    };
    Ok(deps)
}

// ============================================================================
// CapabilityDeclaration - 다른 플러그인에 제공하는 기능
// ============================================================================

/// 플러그인이 제공하는 capability 선언
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDeclaration {
    /// capability 이름 (메서드 이름과 동일)
    pub name: String,

    /// 제공자 선택 시 사용하는 신뢰도 (0.0 ~ 1.0)
    #[serde(default = "default_confidence")]
    pub confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_confidence() -> f64 {
    1.0
}

impl CapabilityDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            confidence: default_confidence(),
            description: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CapabilityEntry {
    Name(String),
    Full(CapabilityDeclaration),
}

fn deserialize_capabilities<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<CapabilityDeclaration>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<CapabilityEntry>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            CapabilityEntry::Name(name) => CapabilityDeclaration::new(name),
            CapabilityEntry::Full(decl) => decl,
        })
        .collect())
}

// ============================================================================
// ManifestIssue - 검증 실패 분류
// ============================================================================

/// 매니페스트 검증 문제
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestIssue {
    EmptyName,
    InvalidName(String),
    NameTooLong(usize),
    SelfDependency,
    DuplicateDependency(String),
    EmptyDependencyName,
    DuplicateHook(String),
    EmptyHook,
    DuplicateCapability(String),
    EmptyCapability,
    InvalidConfidence { capability: String, confidence: f64 },
}

impl std::fmt::Display for ManifestIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "name is required"),
            Self::InvalidName(name) => write!(f, "invalid plugin name '{}'", name),
            Self::NameTooLong(len) => {
                write!(f, "name is {} characters (max {})", len, MAX_NAME_LEN)
            }
            Self::SelfDependency => write!(f, "plugin cannot depend on itself"),
            Self::DuplicateDependency(name) => write!(f, "duplicate dependency '{}'", name),
            Self::EmptyDependencyName => write!(f, "dependency name is empty"),
            Self::DuplicateHook(name) => write!(f, "duplicate hook '{}'", name),
            Self::EmptyHook => write!(f, "hook name is empty"),
            Self::DuplicateCapability(name) => write!(f, "duplicate capability '{}'", name),
            Self::EmptyCapability => write!(f, "capability name is empty"),
            Self::InvalidConfidence {
                capability,
                confidence,
            } => write!(
                f,
                "capability '{}' confidence {} is outside [0, 1]",
                capability, confidence
            ),
        }
    }
}

// ============================================================================
// PluginManifest
// ============================================================================

/// 플러그인 매니페스트 - 플러그인의 모든 메타데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// 고유 플러그인 이름 (= 플러그인 ID)
    pub name: String,

    /// 버전 (semver)
    pub version: Version,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// 홈페이지/리포지토리 URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    /// 엔트리 모듈 (팩토리 조회 키로는 사용하지 않음)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    /// 의존성 목록
    #[serde(default, deserialize_with = "deserialize_dependencies")]
    pub dependencies: Vec<PluginDependency>,

    /// 요구 권한
    #[serde(default)]
    pub required_permissions: PermissionSet,

    /// 구현하는 훅 이름
    #[serde(default)]
    pub hooks: Vec<String>,

    /// 제공하는 capability
    #[serde(default, deserialize_with = "deserialize_capabilities")]
    pub capabilities: Vec<CapabilityDeclaration>,

    /// 기본 플러그인 설정
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,

    /// 리소스 제한 (None이면 런타임 기본값)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimits>,

    /// 작성자 정의 메타데이터
    #[serde(flatten)]
    pub metadata: HashMap<String, Value>,
}

impl PluginManifest {
    /// 새 매니페스트 생성
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            description: String::new(),
            author: None,
            license: None,
            homepage: None,
            main: None,
            dependencies: Vec::new(),
            required_permissions: PermissionSet::new(),
            hooks: Vec::new(),
            capabilities: Vec::new(),
            config: Map::new(),
            resource_limits: None,
            metadata: HashMap::new(),
        }
    }

    /// 플러그인 ID
    pub fn id(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // 빌더
    // ========================================================================

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_dependency(mut self, dep: PluginDependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn depends_on(self, name: impl Into<String>) -> Self {
        self.with_dependency(PluginDependency::new(name))
    }

    pub fn with_permission(mut self, token: PermissionToken) -> Self {
        self.required_permissions.insert(token);
        self
    }

    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.hooks.push(hook.into());
        self
    }

    pub fn with_capability(mut self, capability: CapabilityDeclaration) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = Some(limits);
        self
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub fn declares_hook(&self, hook: &str) -> bool {
        self.hooks.iter().any(|h| h == hook)
    }

    pub fn capability(&self, name: &str) -> Option<&CapabilityDeclaration> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    /// 필수 의존성 이름
    pub fn required_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| !d.optional)
            .map(|d| d.name.as_str())
    }

    // ========================================================================
    // 검증
    // ========================================================================

    /// 모든 검증 문제 수집
    pub fn issues(&self) -> Vec<ManifestIssue> {
        let mut issues = Vec::new();

        let name = self.name.trim();
        if name.is_empty() {
            issues.push(ManifestIssue::EmptyName);
        } else {
            if self.name.len() > MAX_NAME_LEN {
                issues.push(ManifestIssue::NameTooLong(self.name.len()));
            }
            if !is_valid_name(&self.name) {
                issues.push(ManifestIssue::InvalidName(self.name.clone()));
            }
        }

        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if dep.name.trim().is_empty() {
                issues.push(ManifestIssue::EmptyDependencyName);
            } else if dep.name == self.name {
                issues.push(ManifestIssue::SelfDependency);
            } else if !seen.insert(dep.name.as_str()) {
                issues.push(ManifestIssue::DuplicateDependency(dep.name.clone()));
            }
        }

        let mut seen = HashSet::new();
        for hook in &self.hooks {
            if hook.trim().is_empty() {
                issues.push(ManifestIssue::EmptyHook);
            } else if !seen.insert(hook.as_str()) {
                issues.push(ManifestIssue::DuplicateHook(hook.clone()));
            }
        }

        let mut seen = HashSet::new();
        for cap in &self.capabilities {
            if cap.name.trim().is_empty() {
                issues.push(ManifestIssue::EmptyCapability);
                continue;
            }
            if !seen.insert(cap.name.as_str()) {
                issues.push(ManifestIssue::DuplicateCapability(cap.name.clone()));
            }
            if !(0.0..=1.0).contains(&cap.confidence) {
                issues.push(ManifestIssue::InvalidConfidence {
                    capability: cap.name.clone(),
                    confidence: cap.confidence,
                });
            }
        }

        issues
    }

    /// 검증 (문제가 있으면 Validation 에러)
    pub fn validate(&self) -> Result<()> {
        let issues = self.issues();
        if issues.is_empty() {
            return Ok(());
        }
        let joined = issues
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::Validation(format!(
            "Invalid manifest for '{}': {}",
            self.name, joined
        )))
    }

    // ========================================================================
    // 로드
    // ========================================================================

    /// JSON 문자열에서 파싱 + 검증
    pub fn from_json(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| Error::Validation(format!("Malformed manifest: {}", e)))?;
        Self::from_value(value)
    }

    /// JSON 값에서 파싱 + 검증
    pub fn from_value(value: Value) -> Result<Self> {
        let manifest: PluginManifest = serde_json::from_value(value)
            .map_err(|e| Error::Validation(format!("Invalid manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// package.json 내용에서 `mnemosPlugin` 섹션을 꺼내 매니페스트 구성
    ///
    /// 최상위의 name/version/description 등은 기본값으로 쓰이고,
    /// 섹션에 같은 키가 있으면 섹션 값이 우선합니다. 최상위
    /// `dependencies`는 패키지 의존성이므로 무시합니다.
    pub fn from_package_json(content: &str) -> Result<Option<Self>> {
        let package: Value = serde_json::from_str(content)
            .map_err(|e| Error::Validation(format!("Malformed package.json: {}", e)))?;

        let Some(section) = package.get(PACKAGE_SECTION).and_then(Value::as_object) else {
            return Ok(None);
        };

        let mut merged = Map::new();
        for key in ["name", "version", "description", "license", "homepage", "main"] {
            if let Some(v) = package.get(key) {
                merged.insert(key.to_string(), v.clone());
            }
        }
        // "author": {"name": "..."} 형식 지원
        match package.get("author") {
            Some(Value::String(s)) => {
                merged.insert("author".into(), Value::String(s.clone()));
            }
            Some(Value::Object(obj)) => {
                if let Some(name) = obj.get("name") {
                    merged.insert("author".into(), name.clone());
                }
            }
            _ => {}
        }
        for (k, v) in section {
            merged.insert(k.clone(), v.clone());
        }

        Self::from_value(Value::Object(merged)).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_full_manifest() {
        let manifest = PluginManifest::from_json(
            r#"{
                "name": "auto-tagger",
                "version": "1.2.0",
                "author": "Jane",
                "dependencies": ["text-utils", {"name": "embedder", "version": "^2", "optional": true}],
                "requiredPermissions": ["read-memory", "write-memory"],
                "hooks": ["memoryCreated"],
                "capabilities": ["tag", {"name": "summarize", "confidence": 0.8}],
                "config": {"maxTags": 5},
                "category": "organization"
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.id(), "auto-tagger");
        assert_eq!(manifest.version, v("1.2.0"));
        assert_eq!(manifest.dependencies.len(), 2);
        assert!(!manifest.dependencies[0].optional);
        assert!(manifest.dependencies[1].optional);
        assert!(manifest.dependencies[1].accepts(&v("2.3.0")));
        assert!(!manifest.dependencies[1].accepts(&v("3.0.0")));
        assert!(manifest
            .required_permissions
            .contains(PermissionToken::WriteMemory));
        assert_eq!(manifest.capability("tag").unwrap().confidence, 1.0);
        assert_eq!(manifest.capability("summarize").unwrap().confidence, 0.8);
        assert_eq!(manifest.config["maxTags"], 5);
        assert_eq!(manifest.metadata["category"], "organization");
        assert_eq!(
            manifest.required_dependencies().collect::<Vec<_>>(),
            vec!["text-utils"]
        );
    }

    #[test]
    fn test_dependency_map_form() {
        let manifest = PluginManifest::from_value(json!({
            "name": "a",
            "version": "0.1.0",
            "dependencies": {"b": "^1.0", "c": "*"}
        }))
        .unwrap();

        assert_eq!(manifest.dependencies.len(), 2);
        let b = &manifest.dependencies[0];
        assert_eq!(b.name, "b");
        assert!(b.version.is_some());
        assert!(manifest.dependencies[1].version.is_none());
    }

    #[test]
    fn test_unknown_permission_rejected() {
        let err = PluginManifest::from_value(json!({
            "name": "a",
            "version": "0.1.0",
            "requiredPermissions": ["read-everything"]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_missing_version_rejected() {
        let err = PluginManifest::from_value(json!({"name": "a"})).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_validation_issues() {
        let manifest = PluginManifest::new("Bad Name", v("1.0.0"))
            .depends_on("Bad Name")
            .with_hook("x")
            .with_hook("x")
            .with_capability(CapabilityDeclaration::new("c").with_confidence(1.5));

        let issues = manifest.issues();
        assert!(issues.contains(&ManifestIssue::InvalidName("Bad Name".into())));
        assert!(issues.contains(&ManifestIssue::SelfDependency));
        assert!(issues.contains(&ManifestIssue::DuplicateHook("x".into())));
        assert!(issues
            .iter()
            .any(|i| matches!(i, ManifestIssue::InvalidConfidence { .. })));
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_package_json_section() {
        let manifest = PluginManifest::from_package_json(
            r#"{
                "name": "linker",
                "version": "0.3.0",
                "author": {"name": "Kim"},
                "dependencies": {"left-pad": "^1.0.0"},
                "mnemosPlugin": {
                    "dependencies": ["graph-core"],
                    "hooks": ["nodeCreated"]
                }
            }"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(manifest.name, "linker");
        assert_eq!(manifest.author.as_deref(), Some("Kim"));
        assert_eq!(manifest.dependencies, vec![PluginDependency::new("graph-core")]);

        let none = PluginManifest::from_package_json(r#"{"name": "x", "version": "1.0.0"}"#)
            .unwrap();
        assert!(none.is_none());
    }
}
