//! Graph API - 플러그인용 지식 그래프 접근

use super::guard::ApiGuard;
use super::memory::search_limit;
use super::store::{Direction, GraphNode, GraphRelationship, GraphStore, NodeType, RelationshipType};
use super::{MAX_PATTERN_COMPLEXITY, MAX_TRAVERSAL_DEPTH};
use crate::plugin::events::{BusEvent, EventBus, EventType};
use chrono::Utc;
use mnemos_foundation::{Error, PermissionToken, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// 노드 검색 패턴
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphPattern {
    #[serde(default)]
    pub node_type: Option<NodeType>,
    /// 정확히 일치해야 하는 속성
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl GraphPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// 조건 개수
    pub fn complexity(&self) -> usize {
        usize::from(self.node_type.is_some()) + self.properties.len()
    }
}

/// 탐색 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct Traversal {
    /// 방문 순서 (시작 노드 포함)
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
}

pub struct GraphApi {
    guard: ApiGuard,
    store: Arc<dyn GraphStore>,
    events: Option<Arc<EventBus>>,
}

impl GraphApi {
    pub fn new(guard: ApiGuard, store: Arc<dyn GraphStore>) -> Self {
        Self {
            guard,
            store,
            events: None,
        }
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn plugin_id(&self) -> &str {
        self.guard.plugin_id()
    }

    async fn notify(&self, event_type: EventType, payload: Value) {
        if let Some(bus) = &self.events {
            bus.emit_event(BusEvent::new(event_type, payload).with_source(self.plugin_id()))
                .await;
        }
    }

    async fn visible_node(&self, id: &str) -> Result<Option<GraphNode>> {
        Ok(self
            .store
            .get_node(id)
            .await?
            .filter(|n| self.guard.can_see(n.workspace.as_deref())))
    }

    async fn require_node(&self, op: &str, id: &str) -> Result<GraphNode> {
        match self.visible_node(id).await? {
            Some(node) => Ok(node),
            None => {
                let err = Error::NotFound(format!("Node '{}'", id));
                self.guard.failure(op, Some(id), &err);
                Err(err)
            }
        }
    }

    /// 노드 생성
    pub async fn create_node(&self, node_type: &str, properties: Map<String, Value>) -> Result<GraphNode> {
        const OP: &str = "graph.create_node";
        self.guard.authorize(OP, PermissionToken::ModifyGraph)?;
        let node_type = self.guard.validate(OP, node_type.parse::<NodeType>())?;

        let node = GraphNode {
            id: uuid::Uuid::new_v4().to_string(),
            node_type,
            properties,
            owner: self.plugin_id().to_string(),
            workspace: self.guard.workspace(),
            created_at: Utc::now(),
        };
        self.store.insert_node(node.clone()).await?;
        self.guard.success(OP, Some(&node.id));
        self.notify(
            EventType::GraphNodeCreated,
            json!({ "nodeId": node.id, "nodeType": node_type.as_str() }),
        )
        .await;
        Ok(node)
    }

    pub async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        const OP: &str = "graph.get_node";
        self.guard.authorize(OP, PermissionToken::ReadGraph)?;
        let node = self.visible_node(id).await?;
        self.guard.success(OP, Some(id));
        Ok(node)
    }

    /// 속성 병합 수정 (소유자 또는 system)
    pub async fn update_node(&self, id: &str, properties: Map<String, Value>) -> Result<GraphNode> {
        const OP: &str = "graph.update_node";
        self.guard.authorize(OP, PermissionToken::ModifyGraph)?;
        let mut node = self.require_node(OP, id).await?;
        self.guard.check_owner(OP, &node.owner, id)?;

        node.properties.extend(properties);
        self.store.update_node(node.clone()).await?;
        self.guard.success(OP, Some(id));
        Ok(node)
    }

    pub async fn delete_node(&self, id: &str) -> Result<bool> {
        const OP: &str = "graph.delete_node";
        self.guard.authorize(OP, PermissionToken::ModifyGraph)?;
        let Some(node) = self.visible_node(id).await? else {
            return Ok(false);
        };
        self.guard.check_owner(OP, &node.owner, id)?;

        let removed = self.store.delete_node(id).await?;
        self.guard.success(OP, Some(id));
        Ok(removed)
    }

    /// 관계 생성 (양 끝 노드가 보여야 함)
    pub async fn create_relationship(
        &self,
        from: &str,
        to: &str,
        relationship_type: &str,
        properties: Map<String, Value>,
    ) -> Result<GraphRelationship> {
        const OP: &str = "graph.create_relationship";
        self.guard.authorize(OP, PermissionToken::CreateRelationships)?;
        let check = relationship_type.parse::<RelationshipType>().and_then(|t| {
            if from == to {
                Err(Error::Validation("self-referencing relationship".into()))
            } else {
                Ok(t)
            }
        });
        let relationship_type = self.guard.validate(OP, check)?;

        self.require_node(OP, from).await?;
        self.require_node(OP, to).await?;

        let relationship = GraphRelationship {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            relationship_type,
            properties,
            owner: self.plugin_id().to_string(),
            workspace: self.guard.workspace(),
            created_at: Utc::now(),
        };
        self.store.insert_relationship(relationship.clone()).await?;
        self.guard.success(OP, Some(&relationship.id));
        self.notify(
            EventType::GraphRelationshipCreated,
            json!({
                "relationshipId": relationship.id,
                "from": from,
                "to": to,
                "type": relationship_type.as_str(),
            }),
        )
        .await;
        Ok(relationship)
    }

    pub async fn get_relationships(&self, node_id: &str, direction: Direction) -> Result<Vec<GraphRelationship>> {
        const OP: &str = "graph.get_relationships";
        self.guard.authorize(OP, PermissionToken::ReadGraph)?;
        self.require_node(OP, node_id).await?;

        let relationships: Vec<_> = self
            .store
            .relationships(node_id, direction)
            .await?
            .into_iter()
            .filter(|r| self.guard.can_see(r.workspace.as_deref()))
            .collect();
        self.guard.success(OP, Some(node_id));
        Ok(relationships)
    }

    /// 패턴 검색 (조건 최대 10개)
    pub async fn find_nodes(&self, pattern: &GraphPattern) -> Result<Vec<GraphNode>> {
        const OP: &str = "graph.find_nodes";
        self.guard.authorize(OP, PermissionToken::ReadGraph)?;
        let check = if pattern.complexity() > MAX_PATTERN_COMPLEXITY {
            Err(Error::Validation(format!(
                "pattern has {} conditions (max {})",
                pattern.complexity(),
                MAX_PATTERN_COMPLEXITY
            )))
        } else {
            search_limit(pattern.limit)
        };
        let limit = self.guard.validate(OP, check)?;

        let workspace = self.guard.workspace();
        let nodes = self
            .store
            .find_nodes(pattern.node_type, &pattern.properties, workspace.as_deref(), limit)
            .await?;
        self.guard
            .success_with(OP, None, format!("{} results", nodes.len()));
        Ok(nodes)
    }

    /// 너비 우선 탐색 (깊이 1~5, 타입이 비어 있으면 전체)
    pub async fn traverse(
        &self,
        start: &str,
        depth: usize,
        relationship_types: &[RelationshipType],
    ) -> Result<Traversal> {
        const OP: &str = "graph.traverse";
        self.guard.authorize(OP, PermissionToken::ReadGraph)?;
        let check = if depth == 0 || depth > MAX_TRAVERSAL_DEPTH {
            Err(Error::Validation(format!(
                "traversal depth {} is outside 1..={}",
                depth, MAX_TRAVERSAL_DEPTH
            )))
        } else {
            Ok(())
        };
        self.guard.validate(OP, check)?;

        let root = self.require_node(OP, start).await?;
        let mut result = Traversal::default();
        let mut seen_nodes = HashSet::from([root.id.clone()]);
        let mut seen_rels = HashSet::new();
        let mut queue = VecDeque::from([(root.id.clone(), 0usize)]);
        result.nodes.push(root);

        while let Some((node_id, level)) = queue.pop_front() {
            if level >= depth {
                continue;
            }
            for rel in self.store.relationships(&node_id, Direction::Both).await? {
                if !relationship_types.is_empty() && !relationship_types.contains(&rel.relationship_type) {
                    continue;
                }
                if !self.guard.can_see(rel.workspace.as_deref()) {
                    continue;
                }
                let next = if rel.from == node_id { &rel.to } else { &rel.from };
                if seen_nodes.insert(next.clone()) {
                    if let Some(node) = self.visible_node(next).await? {
                        queue.push_back((node.id.clone(), level + 1));
                        result.nodes.push(node);
                    }
                }
                if seen_rels.insert(rel.id.clone()) {
                    result.relationships.push(rel);
                }
            }
        }

        self.guard.success_with(
            OP,
            Some(start),
            format!("{} nodes", result.nodes.len()),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::InMemoryGraphStore;
    use super::*;
    use mnemos_foundation::{AuditLog, PermissionSet};

    fn full() -> PermissionSet {
        PermissionSet::new()
            .with(PermissionToken::ReadGraph)
            .with(PermissionToken::ModifyGraph)
            .with(PermissionToken::CreateRelationships)
    }

    fn api(plugin: &str, perms: PermissionSet, store: Arc<InMemoryGraphStore>) -> GraphApi {
        GraphApi::new(ApiGuard::new(plugin, perms, Arc::new(AuditLog::new())), store)
    }

    fn props(name: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("name".into(), json!(name));
        map
    }

    #[tokio::test]
    async fn test_unknown_types_are_rejected() {
        let api = api("p", full(), Arc::new(InMemoryGraphStore::new()));
        assert!(matches!(
            api.create_node("galaxy", Map::new()).await,
            Err(Error::Validation(_))
        ));

        let a = api.create_node("concept", props("a")).await.unwrap();
        let b = api.create_node("concept", props("b")).await.unwrap();
        assert!(matches!(
            api.create_relationship(&a.id, &b.id, "LIKES", Map::new()).await,
            Err(Error::Validation(_))
        ));
        assert!(api
            .create_relationship(&a.id, &b.id, "RELATED_TO", Map::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_relationships_need_their_own_permission() {
        let store = Arc::new(InMemoryGraphStore::new());
        let writer = api("p", PermissionSet::new().with(PermissionToken::ModifyGraph), store);
        let a = writer.create_node("concept", Map::new()).await.unwrap();
        let b = writer.create_node("concept", Map::new()).await.unwrap();
        assert!(matches!(
            writer.create_relationship(&a.id, &b.id, "CONTAINS", Map::new()).await,
            Err(Error::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_pattern_and_depth_limits() {
        let api = api("p", full(), Arc::new(InMemoryGraphStore::new()));
        let mut pattern = GraphPattern::new().of_type(NodeType::Concept);
        for i in 0..10 {
            pattern = pattern.with_property(format!("k{}", i), json!(i));
        }
        assert!(api.find_nodes(&pattern).await.is_err());

        let node = api.create_node("concept", Map::new()).await.unwrap();
        assert!(api.traverse(&node.id, 6, &[]).await.is_err());
        assert!(api.traverse(&node.id, 0, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_traverse_respects_depth_and_types() {
        let api = api("p", full(), Arc::new(InMemoryGraphStore::new()));
        let a = api.create_node("concept", props("a")).await.unwrap();
        let b = api.create_node("concept", props("b")).await.unwrap();
        let c = api.create_node("concept", props("c")).await.unwrap();
        let d = api.create_node("tag", props("d")).await.unwrap();
        api.create_relationship(&a.id, &b.id, "RELATED_TO", Map::new()).await.unwrap();
        api.create_relationship(&b.id, &c.id, "RELATED_TO", Map::new()).await.unwrap();
        api.create_relationship(&a.id, &d.id, "TAGGED_WITH", Map::new()).await.unwrap();

        let one = api.traverse(&a.id, 1, &[]).await.unwrap();
        assert_eq!(one.nodes.len(), 3);

        let related = api
            .traverse(&a.id, 5, &[RelationshipType::RelatedTo])
            .await
            .unwrap();
        let names: Vec<_> = related
            .nodes
            .iter()
            .map(|n| n.properties["name"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(related.relationships.len(), 2);
    }

    #[tokio::test]
    async fn test_workspace_isolation_and_ownership() {
        let store = Arc::new(InMemoryGraphStore::new());
        let alice = api("alice", full(), store.clone());
        let bob = api("bob", full(), store.clone());
        let admin = api("admin", PermissionSet::system(), store.clone());

        let node = alice.create_node("person", props("alice")).await.unwrap();
        assert!(bob.get_node(&node.id).await.unwrap().is_none());
        assert!(bob
            .find_nodes(&GraphPattern::new().of_type(NodeType::Person))
            .await
            .unwrap()
            .is_empty());

        let found = admin
            .find_nodes(&GraphPattern::new().with_property("name", json!("alice")))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        admin.update_node(&node.id, props("renamed")).await.unwrap();
        assert!(alice.delete_node(&node.id).await.unwrap());
    }
}
