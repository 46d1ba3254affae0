//! Store Backends - 외부 메모리/그래프 저장소 추상화
//!
//! 실제 저장 엔진은 런타임 밖에 있고, 리소스 API는 이 trait들만 통해 접근합니다.
//! `InMemory*` 구현은 단독 실행과 테스트용 참조 구현입니다 (인덱스/영속화 없음).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemos_foundation::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

// ============================================================================
// Memory
// ============================================================================

/// 저장된 메모리 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// 생성한 플러그인
    pub owner: String,
    /// 워크스페이스 namespace (None = 전역)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 유사도 검색 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub score: f32,
}

/// 메모리 저장소
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert(&self, record: MemoryRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>>;

    /// 기존 항목 교체 (없으면 NotFound)
    async fn update(&self, record: MemoryRecord) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<bool>;

    /// 텍스트 검색 (workspace가 Some이면 해당 워크스페이스만)
    async fn search_text(
        &self,
        query: &str,
        workspace: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>>;

    /// 임베딩 유사도 검색 (점수 내림차순)
    async fn search_similar(
        &self,
        embedding: &[f32],
        workspace: Option<&str>,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredMemory>>;
}

fn in_workspace(item: Option<&str>, scope: Option<&str>) -> bool {
    match scope {
        None => true,
        Some(scope) => item == Some(scope),
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// 메모리 기반 MemoryStore
#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: RwLock<HashMap<String, MemoryRecord>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn sorted<'a>(records: impl Iterator<Item = &'a MemoryRecord>) -> Vec<MemoryRecord> {
        let mut items: Vec<MemoryRecord> = records.cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        items
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn insert(&self, record: MemoryRecord) -> Result<()> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(Error::AlreadyExists(format!("Memory '{}'", record.id)));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn update(&self, record: MemoryRecord) -> Result<()> {
        let mut records = self.records.write();
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(Error::NotFound(format!("Memory '{}'", record.id))),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().remove(id).is_some())
    }

    async fn search_text(
        &self,
        query: &str,
        workspace: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let needle = query.to_lowercase();
        let records = self.records.read();
        let matches = records.values().filter(|r| {
            in_workspace(r.workspace.as_deref(), workspace)
                && r.content.to_lowercase().contains(&needle)
        });
        Ok(Self::sorted(matches).into_iter().take(limit).collect())
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        workspace: Option<&str>,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredMemory>> {
        let records = self.records.read();
        let mut scored: Vec<ScoredMemory> = records
            .values()
            .filter(|r| in_workspace(r.workspace.as_deref(), workspace))
            .filter_map(|r| {
                let score = cosine_similarity(embedding, r.embedding.as_deref()?);
                (score >= threshold).then(|| ScoredMemory {
                    record: r.clone(),
                    score,
                })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

// ============================================================================
// Graph
// ============================================================================

/// 노드 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Memory,
    Concept,
    Entity,
    Person,
    Document,
    Topic,
    Tag,
}

impl NodeType {
    pub const ALL: [NodeType; 7] = [
        NodeType::Memory,
        NodeType::Concept,
        NodeType::Entity,
        NodeType::Person,
        NodeType::Document,
        NodeType::Topic,
        NodeType::Tag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Concept => "concept",
            Self::Entity => "entity",
            Self::Person => "person",
            Self::Document => "document",
            Self::Topic => "topic",
            Self::Tag => "tag",
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("Unknown node type: {}", s)))
    }
}

/// 관계 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    RelatedTo,
    References,
    Contains,
    PartOf,
    DerivedFrom,
    TaggedWith,
    DependsOn,
    SimilarTo,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 8] = [
        RelationshipType::RelatedTo,
        RelationshipType::References,
        RelationshipType::Contains,
        RelationshipType::PartOf,
        RelationshipType::DerivedFrom,
        RelationshipType::TaggedWith,
        RelationshipType::DependsOn,
        RelationshipType::SimilarTo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelatedTo => "RELATED_TO",
            Self::References => "REFERENCES",
            Self::Contains => "CONTAINS",
            Self::PartOf => "PART_OF",
            Self::DerivedFrom => "DERIVED_FROM",
            Self::TaggedWith => "TAGGED_WITH",
            Self::DependsOn => "DEPENDS_ON",
            Self::SimilarTo => "SIMILAR_TO",
        }
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("Unknown relationship type: {}", s)))
    }
}

/// 그래프 노드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 그래프 관계
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRelationship {
    pub id: String,
    pub from: String,
    pub to: String,
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 관계 조회 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

/// 그래프 저장소
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn insert_node(&self, node: GraphNode) -> Result<()>;

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>>;

    async fn update_node(&self, node: GraphNode) -> Result<()>;

    /// 노드와 연결된 관계까지 삭제
    async fn delete_node(&self, id: &str) -> Result<bool>;

    async fn insert_relationship(&self, relationship: GraphRelationship) -> Result<()>;

    async fn relationships(&self, node_id: &str, direction: Direction) -> Result<Vec<GraphRelationship>>;

    /// 타입/속성 일치 노드 검색
    async fn find_nodes(
        &self,
        node_type: Option<NodeType>,
        properties: &Map<String, Value>,
        workspace: Option<&str>,
        limit: usize,
    ) -> Result<Vec<GraphNode>>;
}

#[derive(Default)]
struct GraphData {
    nodes: HashMap<String, GraphNode>,
    relationships: Vec<GraphRelationship>,
}

/// 메모리 기반 GraphStore
#[derive(Default)]
pub struct InMemoryGraphStore {
    data: RwLock<GraphData>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.data.read().nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.data.read().relationships.len()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn insert_node(&self, node: GraphNode) -> Result<()> {
        let mut data = self.data.write();
        if data.nodes.contains_key(&node.id) {
            return Err(Error::AlreadyExists(format!("Node '{}'", node.id)));
        }
        data.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        Ok(self.data.read().nodes.get(id).cloned())
    }

    async fn update_node(&self, node: GraphNode) -> Result<()> {
        let mut data = self.data.write();
        match data.nodes.get_mut(&node.id) {
            Some(existing) => {
                *existing = node;
                Ok(())
            }
            None => Err(Error::NotFound(format!("Node '{}'", node.id))),
        }
    }

    async fn delete_node(&self, id: &str) -> Result<bool> {
        let mut data = self.data.write();
        let removed = data.nodes.remove(id).is_some();
        if removed {
            data.relationships.retain(|r| r.from != id && r.to != id);
        }
        Ok(removed)
    }

    async fn insert_relationship(&self, relationship: GraphRelationship) -> Result<()> {
        let mut data = self.data.write();
        for endpoint in [&relationship.from, &relationship.to] {
            if !data.nodes.contains_key(endpoint) {
                return Err(Error::NotFound(format!("Node '{}'", endpoint)));
            }
        }
        data.relationships.push(relationship);
        Ok(())
    }

    async fn relationships(&self, node_id: &str, direction: Direction) -> Result<Vec<GraphRelationship>> {
        let data = self.data.read();
        Ok(data
            .relationships
            .iter()
            .filter(|r| match direction {
                Direction::Outgoing => r.from == node_id,
                Direction::Incoming => r.to == node_id,
                Direction::Both => r.from == node_id || r.to == node_id,
            })
            .cloned()
            .collect())
    }

    async fn find_nodes(
        &self,
        node_type: Option<NodeType>,
        properties: &Map<String, Value>,
        workspace: Option<&str>,
        limit: usize,
    ) -> Result<Vec<GraphNode>> {
        let data = self.data.read();
        let mut nodes: Vec<GraphNode> = data
            .nodes
            .values()
            .filter(|n| in_workspace(n.workspace.as_deref(), workspace))
            .filter(|n| node_type.map_or(true, |t| n.node_type == t))
            .filter(|n| {
                properties
                    .iter()
                    .all(|(k, v)| n.properties.get(k) == Some(v))
            })
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        nodes.truncate(limit);
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, content: &str, embedding: Option<Vec<f32>>, ws: Option<&str>) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: id.into(),
            content: content.into(),
            embedding,
            metadata: Map::new(),
            owner: "p".into(),
            workspace: ws.map(String::from),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_text_search_respects_workspace() {
        let store = InMemoryMemoryStore::new();
        store.insert(record("1", "Rust ownership", None, Some("plugin:a"))).await.unwrap();
        store.insert(record("2", "rust traits", None, Some("plugin:b"))).await.unwrap();

        let scoped = store.search_text("rust", Some("plugin:a"), 10).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "1");

        let all = store.search_text("rust", None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_similarity_ranking() {
        let store = InMemoryMemoryStore::new();
        store.insert(record("near", "a", Some(vec![1.0, 0.0]), None)).await.unwrap();
        store.insert(record("far", "b", Some(vec![0.0, 1.0]), None)).await.unwrap();
        store.insert(record("mid", "c", Some(vec![1.0, 1.0]), None)).await.unwrap();

        let hits = store.search_similar(&[1.0, 0.0], None, 10, 0.5).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
    }

    #[tokio::test]
    async fn test_deleting_node_drops_relationships() {
        let store = InMemoryGraphStore::new();
        for id in ["a", "b"] {
            store
                .insert_node(GraphNode {
                    id: id.into(),
                    node_type: NodeType::Concept,
                    properties: Map::new(),
                    owner: "p".into(),
                    workspace: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        store
            .insert_relationship(GraphRelationship {
                id: "r".into(),
                from: "a".into(),
                to: "b".into(),
                relationship_type: RelationshipType::RelatedTo,
                properties: Map::new(),
                owner: "p".into(),
                workspace: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(store.relationships("b", Direction::Incoming).await.unwrap().len(), 1);
        assert!(store.delete_node("a").await.unwrap());
        assert_eq!(store.relationship_count(), 0);
    }

    #[test]
    fn test_type_names() {
        assert_eq!("concept".parse::<NodeType>().unwrap(), NodeType::Concept);
        assert!("galaxy".parse::<NodeType>().is_err());
        assert_eq!(
            serde_json::to_value(RelationshipType::PartOf).unwrap(),
            json!("PART_OF")
        );
        assert!("LIKES".parse::<RelationshipType>().is_err());
    }
}
