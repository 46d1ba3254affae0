//! Dependency Resolver - 플러그인 의존성 그래프
//!
//! 플러그인 간 의존성을 추적하고 로드/언로드 순서를 계산합니다.
//!
//! ## 불변식
//!
//! 그래프는 항상 비순환입니다. 순환을 만드는 `add_plugin`은 적용 전에
//! 거부됩니다 (`Error::CircularDependency`).
//!
//! ```text
//!   add_plugin("a", deps=["b"])      add_plugin("b", deps=["a"])
//!   ┌───┐    ┌───┐                   ┌───┐    ┌───┐
//!   │ a │───►│ b │        ──►        │ a │◄──►│ b │   ✗ rejected
//!   └───┘    └───┘                   └───┘    └───┘
//! ```

use super::manifest::PluginDependency;
use mnemos_foundation::{Error, Result};
use semver::Version;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

// ============================================================================
// 결과 타입
// ============================================================================

/// 버전 불일치 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMismatch {
    pub dependency: String,
    pub required: String,
    pub found: String,
}

/// `check_dependencies` 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCheck {
    /// 모든 필수 의존성이 존재하고 순환/버전 충돌이 없는지
    pub satisfied: bool,
    /// 그래프에 없는 필수 의존성
    pub missing: Vec<String>,
    /// 그래프에 없는 선택 의존성 (경고)
    pub optional_missing: Vec<String>,
    /// 추가 시 순환을 만드는 의존성
    pub circular: Vec<String>,
    pub version_conflicts: Vec<VersionMismatch>,
}

impl DependencyCheck {
    /// 첫 번째 문제를 에러로 변환
    pub fn into_error(self, plugin_id: &str) -> Option<Error> {
        if let Some(dep) = self.circular.into_iter().next() {
            debug!(plugin_id = %plugin_id, dependency = %dep, "dependency would close a cycle");
            return Some(Error::CircularDependency(plugin_id.to_string()));
        }
        if let Some(dep) = self.missing.into_iter().next() {
            return Some(Error::missing_dependency(plugin_id, dep));
        }
        self.version_conflicts
            .into_iter()
            .next()
            .map(|c| Error::VersionConflict {
                plugin: plugin_id.to_string(),
                dependency: c.dependency,
                required: c.required,
                found: c.found,
            })
    }
}

/// 영향 분석 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAnalysis {
    pub direct_dependents: Vec<String>,
    pub indirect_dependents: Vec<String>,
    pub total_impact: usize,
}

/// 그래프 검증 문제
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GraphIssue {
    MissingDependency { plugin: String, dependency: String },
    MissingOptionalDependency { plugin: String, dependency: String },
    CircularDependency { plugin: String },
    VersionConflict { plugin: String, mismatch: VersionMismatch },
    Orphan { plugin: String },
}

impl std::fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingDependency { plugin, dependency } => {
                write!(f, "'{}' requires missing plugin '{}'", plugin, dependency)
            }
            Self::MissingOptionalDependency { plugin, dependency } => write!(
                f,
                "'{}' has missing optional dependency '{}'",
                plugin, dependency
            ),
            Self::CircularDependency { plugin } => {
                write!(f, "circular dependency involving '{}'", plugin)
            }
            Self::VersionConflict { plugin, mismatch } => write!(
                f,
                "'{}' requires '{}' {}, found {}",
                plugin, mismatch.dependency, mismatch.required, mismatch.found
            ),
            Self::Orphan { plugin } => {
                write!(f, "'{}' has no dependencies and no dependents", plugin)
            }
        }
    }
}

/// `validate_graph` 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphValidation {
    pub valid: bool,
    pub errors: Vec<GraphIssue>,
    pub warnings: Vec<GraphIssue>,
}

// ============================================================================
// DependencyResolver
// ============================================================================

#[derive(Debug, Clone)]
struct DependencyNode {
    version: Option<Version>,
    dependencies: Vec<PluginDependency>,
    dependents: BTreeSet<String>,
}

/// 플러그인 의존성 그래프
#[derive(Debug, Default)]
pub struct DependencyResolver {
    nodes: HashMap<String, DependencyNode>,
    /// 추가 순서 (결정적 순회용)
    order: Vec<String>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 등록된 플러그인 ID (추가 순서)
    pub fn plugin_ids(&self) -> &[String] {
        &self.order
    }

    /// 선언된 의존성 이름 (그래프에 없는 것 포함)
    pub fn get_dependencies(&self, id: &str) -> Vec<String> {
        self.nodes
            .get(id)
            .map(|n| n.dependencies.iter().map(|d| d.name.clone()).collect())
            .unwrap_or_default()
    }

    // ========================================================================
    // 변경
    // ========================================================================

    /// 플러그인 추가 (같은 ID가 있으면 교체)
    ///
    /// 순환을 만들면 아무것도 적용하지 않고 `CircularDependency`.
    pub fn add_plugin(
        &mut self,
        id: &str,
        version: Option<&Version>,
        dependencies: &[PluginDependency],
    ) -> Result<()> {
        if let Some(dep) = dependencies
            .iter()
            .find(|d| self.closes_cycle(id, &d.name))
        {
            debug!(plugin_id = %id, dependency = %dep.name, "rejecting cyclic dependency");
            return Err(Error::CircularDependency(id.to_string()));
        }

        if self.nodes.contains_key(id) {
            self.detach_edges(id);
        } else {
            self.order.push(id.to_string());
        }

        for dep in dependencies {
            if let Some(node) = self.nodes.get_mut(&dep.name) {
                node.dependents.insert(id.to_string());
            }
        }

        // 먼저 추가된 플러그인이 이 플러그인을 선언했을 수 있음
        let dependents: BTreeSet<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.dependencies.iter().any(|d| d.name == id))
            .map(|(other, _)| other.clone())
            .collect();

        self.nodes.insert(
            id.to_string(),
            DependencyNode {
                version: version.cloned(),
                dependencies: dependencies.to_vec(),
                dependents,
            },
        );

        debug!(plugin_id = %id, deps = dependencies.len(), "added plugin to dependency graph");
        Ok(())
    }

    /// 플러그인 제거
    pub fn remove_plugin(&mut self, id: &str) -> bool {
        if !self.nodes.contains_key(id) {
            return false;
        }
        self.detach_edges(id);
        self.nodes.remove(id);
        self.order.retain(|o| o != id);
        for node in self.nodes.values_mut() {
            node.dependents.remove(id);
        }
        debug!(plugin_id = %id, "removed plugin from dependency graph");
        true
    }

    fn detach_edges(&mut self, id: &str) {
        let deps = self
            .nodes
            .get(id)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default();
        for dep in deps {
            if let Some(node) = self.nodes.get_mut(&dep.name) {
                node.dependents.remove(id);
            }
        }
    }

    /// `id → dependency` 간선이 순환을 만드는지 (dependency에서 id에 도달 가능)
    fn closes_cycle(&self, id: &str, dependency: &str) -> bool {
        if dependency == id {
            return true;
        }
        let mut stack = vec![dependency.to_string()];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == id {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.dependencies.iter().map(|d| d.name.clone()));
            }
        }
        false
    }

    // ========================================================================
    // 검사
    // ========================================================================

    /// 의존성 충족 여부 확인 (그래프는 변경하지 않음)
    pub fn check_dependencies(&self, id: &str, dependencies: &[PluginDependency]) -> DependencyCheck {
        let mut check = DependencyCheck::default();

        for dep in dependencies {
            if self.closes_cycle(id, &dep.name) {
                check.circular.push(dep.name.clone());
                continue;
            }

            match self.nodes.get(&dep.name) {
                None if dep.optional => check.optional_missing.push(dep.name.clone()),
                None => check.missing.push(dep.name.clone()),
                Some(node) => {
                    if let (Some(req), Some(found)) = (&dep.version, &node.version) {
                        if !req.matches(found) {
                            check.version_conflicts.push(VersionMismatch {
                                dependency: dep.name.clone(),
                                required: req.to_string(),
                                found: found.to_string(),
                            });
                        }
                    }
                }
            }
        }

        check.satisfied = check.missing.is_empty()
            && check.circular.is_empty()
            && check.version_conflicts.is_empty();
        check
    }

    // ========================================================================
    // 순서
    // ========================================================================

    /// 로드 순서 (의존성이 먼저)
    ///
    /// `ids`가 주어지면 해당 플러그인만 반환합니다 (순서 계산에는 전이
    /// 의존성도 사용).
    pub fn get_load_order(&self, ids: Option<&[String]>) -> Result<Vec<String>> {
        let roots: Vec<&String> = match ids {
            Some(ids) => {
                for id in ids {
                    if !self.nodes.contains_key(id) {
                        return Err(Error::NotFound(format!("Plugin '{}' is not in the dependency graph", id)));
                    }
                }
                ids.iter().collect()
            }
            None => self.order.iter().collect(),
        };

        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();
        let mut sorted = Vec::with_capacity(self.nodes.len());
        for root in roots {
            self.visit(root, &mut visited, &mut visiting, &mut sorted)?;
        }

        if let Some(ids) = ids {
            let wanted: HashSet<&String> = ids.iter().collect();
            sorted.retain(|id| wanted.contains(id));
        }
        Ok(sorted)
    }

    fn visit(
        &self,
        id: &str,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        sorted: &mut Vec<String>,
    ) -> Result<()> {
        if visited.contains(id) {
            return Ok(());
        }
        if !visiting.insert(id.to_string()) {
            return Err(Error::CircularDependency(id.to_string()));
        }

        if let Some(node) = self.nodes.get(id) {
            for dep in &node.dependencies {
                if self.nodes.contains_key(&dep.name) {
                    self.visit(&dep.name, visited, visiting, sorted)?;
                }
            }
        }

        visiting.remove(id);
        visited.insert(id.to_string());
        sorted.push(id.to_string());
        Ok(())
    }

    /// 언로드 순서 (로드 순서의 역순)
    pub fn get_unload_order(&self, ids: Option<&[String]>) -> Result<Vec<String>> {
        let mut order = self.get_load_order(ids)?;
        order.reverse();
        Ok(order)
    }

    // ========================================================================
    // 역의존성
    // ========================================================================

    /// 직접 의존하는 플러그인
    pub fn get_dependents(&self, id: &str) -> Vec<String> {
        self.nodes
            .get(id)
            .map(|n| n.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 제거 시 영향 분석
    pub fn get_impact_analysis(&self, id: &str) -> ImpactAnalysis {
        let direct = self.get_dependents(id);

        let mut seen: HashSet<String> = direct.iter().cloned().collect();
        seen.insert(id.to_string());
        let mut indirect = Vec::new();
        let mut queue: VecDeque<String> = direct.iter().cloned().collect();

        while let Some(current) = queue.pop_front() {
            for dependent in self.get_dependents(&current) {
                if seen.insert(dependent.clone()) {
                    indirect.push(dependent.clone());
                    queue.push_back(dependent);
                }
            }
        }

        ImpactAnalysis {
            total_impact: direct.len() + indirect.len(),
            direct_dependents: direct,
            indirect_dependents: indirect,
        }
    }

    // ========================================================================
    // 전체 검증
    // ========================================================================

    /// 그래프 전체 검증
    pub fn validate_graph(&self) -> GraphValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for id in &self.order {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };

            for dep in &node.dependencies {
                match self.nodes.get(&dep.name) {
                    None if dep.optional => warnings.push(GraphIssue::MissingOptionalDependency {
                        plugin: id.clone(),
                        dependency: dep.name.clone(),
                    }),
                    None => errors.push(GraphIssue::MissingDependency {
                        plugin: id.clone(),
                        dependency: dep.name.clone(),
                    }),
                    Some(target) => {
                        if let (Some(req), Some(found)) = (&dep.version, &target.version) {
                            if !req.matches(found) {
                                errors.push(GraphIssue::VersionConflict {
                                    plugin: id.clone(),
                                    mismatch: VersionMismatch {
                                        dependency: dep.name.clone(),
                                        required: req.to_string(),
                                        found: found.to_string(),
                                    },
                                });
                            }
                        }
                    }
                }
            }

            if node.dependencies.is_empty() && node.dependents.is_empty() {
                warnings.push(GraphIssue::Orphan { plugin: id.clone() });
            }
        }

        if let Err(Error::CircularDependency(plugin)) = self.get_load_order(None) {
            errors.push(GraphIssue::CircularDependency { plugin });
        }

        GraphValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(names: &[&str]) -> Vec<PluginDependency> {
        names.iter().map(|n| PluginDependency::new(*n)).collect()
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|o| o == id).unwrap()
    }

    #[test]
    fn test_load_order_respects_dependencies() {
        let mut resolver = DependencyResolver::new();
        resolver.add_plugin("app", None, &deps(&["ui", "core"])).unwrap();
        resolver.add_plugin("ui", None, &deps(&["core"])).unwrap();
        resolver.add_plugin("core", None, &[]).unwrap();
        resolver.add_plugin("extra", None, &deps(&["ui"])).unwrap();

        let order = resolver.get_load_order(None).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "core") < position(&order, "ui"));
        assert!(position(&order, "ui") < position(&order, "app"));
        assert!(position(&order, "ui") < position(&order, "extra"));

        let mut unload = resolver.get_unload_order(None).unwrap();
        unload.reverse();
        assert_eq!(unload, order);
    }

    #[test]
    fn test_load_order_subset() {
        let mut resolver = DependencyResolver::new();
        resolver.add_plugin("c", None, &deps(&["b"])).unwrap();
        resolver.add_plugin("b", None, &deps(&["a"])).unwrap();
        resolver.add_plugin("a", None, &[]).unwrap();

        let order = resolver
            .get_load_order(Some(&["c".to_string(), "a".to_string()]))
            .unwrap();
        assert_eq!(order, vec!["a".to_string(), "c".to_string()]);

        assert!(matches!(
            resolver.get_load_order(Some(&["zzz".to_string()])),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_cycle_rejected_without_applying() {
        let mut resolver = DependencyResolver::new();
        resolver.add_plugin("a", None, &deps(&["b"])).unwrap();
        resolver.add_plugin("b", None, &deps(&["c"])).unwrap();

        let check = resolver.check_dependencies("c", &deps(&["a"]));
        assert!(!check.satisfied);
        assert_eq!(check.circular, vec!["a".to_string()]);

        let err = resolver.add_plugin("c", None, &deps(&["a"])).unwrap_err();
        assert!(matches!(err, Error::CircularDependency(ref id) if id == "c"));
        assert!(!resolver.contains("c"));
        assert!(resolver.get_load_order(None).is_ok());
        assert!(resolver.validate_graph().errors.iter().all(|e| !matches!(e, GraphIssue::CircularDependency { .. })));

        assert!(resolver.add_plugin("self", None, &deps(&["self"])).is_err());
    }

    #[test]
    fn test_check_dependencies_missing_and_optional() {
        let mut resolver = DependencyResolver::new();
        resolver
            .add_plugin("base", Some(&Version::new(1, 4, 0)), &[])
            .unwrap();

        let wanted = vec![
            PluginDependency::new("base").with_version("^2".parse().unwrap()),
            PluginDependency::new("gone"),
            PluginDependency::new("nice-to-have").optional(),
        ];
        let check = resolver.check_dependencies("x", &wanted);

        assert!(!check.satisfied);
        assert_eq!(check.missing, vec!["gone".to_string()]);
        assert_eq!(check.optional_missing, vec!["nice-to-have".to_string()]);
        assert_eq!(check.version_conflicts.len(), 1);
        assert_eq!(check.version_conflicts[0].found, "1.4.0");

        let ok = resolver.check_dependencies("x", &deps(&["base"]));
        assert!(ok.satisfied);
    }

    #[test]
    fn test_dependents_and_impact() {
        let mut resolver = DependencyResolver::new();
        resolver.add_plugin("core", None, &[]).unwrap();
        resolver.add_plugin("search", None, &deps(&["core"])).unwrap();
        resolver.add_plugin("ranker", None, &deps(&["search"])).unwrap();
        resolver.add_plugin("ui", None, &deps(&["ranker", "core"])).unwrap();

        assert_eq!(
            resolver.get_dependents("core"),
            vec!["search".to_string(), "ui".to_string()]
        );

        let impact = resolver.get_impact_analysis("core");
        assert_eq!(impact.direct_dependents.len(), 2);
        assert_eq!(impact.indirect_dependents, vec!["ranker".to_string()]);
        assert_eq!(impact.total_impact, 3);

        assert!(resolver.remove_plugin("ui"));
        assert_eq!(resolver.get_dependents("core"), vec!["search".to_string()]);
        assert!(!resolver.remove_plugin("ui"));
    }

    #[test]
    fn test_dependents_tracked_when_dependency_added_later() {
        let mut resolver = DependencyResolver::new();
        resolver.add_plugin("a", None, &deps(&["b"])).unwrap();
        resolver.add_plugin("b", None, &[]).unwrap();

        assert_eq!(resolver.get_dependents("b"), vec!["a".to_string()]);
        assert_eq!(
            resolver.get_load_order(None).unwrap(),
            vec!["b".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn test_validate_graph() {
        let mut resolver = DependencyResolver::new();
        resolver
            .add_plugin(
                "a",
                None,
                &[
                    PluginDependency::new("missing"),
                    PluginDependency::new("maybe").optional(),
                ],
            )
            .unwrap();
        resolver.add_plugin("lonely", None, &[]).unwrap();

        let report = resolver.validate_graph();
        assert!(!report.valid);
        assert_eq!(
            report.errors,
            vec![GraphIssue::MissingDependency {
                plugin: "a".into(),
                dependency: "missing".into()
            }]
        );
        assert!(report.warnings.contains(&GraphIssue::MissingOptionalDependency {
            plugin: "a".into(),
            dependency: "maybe".into()
        }));
        assert!(report
            .warnings
            .contains(&GraphIssue::Orphan { plugin: "lonely".into() }));

        resolver.add_plugin("missing", None, &[]).unwrap();
        assert!(resolver.validate_graph().valid);
    }
}
