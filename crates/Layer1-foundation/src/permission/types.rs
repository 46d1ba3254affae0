//! 권한 토큰 정의
//!
//! 플러그인이 매니페스트의 `requiredPermissions`로 선언하고, 리소스 API가
//! 호출마다 검사하는 권한 토큰입니다.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// 권한 토큰
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionToken {
    /// 메모리 조회/검색
    ReadMemory,
    /// 메모리 생성/수정
    WriteMemory,
    /// 메모리 삭제
    DeleteMemory,
    /// 그래프 조회/탐색
    ReadGraph,
    /// 그래프 노드 생성/수정/삭제
    ModifyGraph,
    /// 관계(엣지) 생성
    CreateRelationships,
    /// 임베딩 벡터 접근
    AccessEmbeddings,
    /// 시스템 이벤트 발행
    SystemEvents,
    /// 시스템 플러그인 (소유권 검사/워크스페이스 격리 우회)
    System,
}

impl PermissionToken {
    /// 모든 토큰
    pub const ALL: [PermissionToken; 9] = [
        PermissionToken::ReadMemory,
        PermissionToken::WriteMemory,
        PermissionToken::DeleteMemory,
        PermissionToken::ReadGraph,
        PermissionToken::ModifyGraph,
        PermissionToken::CreateRelationships,
        PermissionToken::AccessEmbeddings,
        PermissionToken::SystemEvents,
        PermissionToken::System,
    ];

    /// 토큰 문자열 반환
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadMemory => "read-memory",
            Self::WriteMemory => "write-memory",
            Self::DeleteMemory => "delete-memory",
            Self::ReadGraph => "read-graph",
            Self::ModifyGraph => "modify-graph",
            Self::CreateRelationships => "create-relationships",
            Self::AccessEmbeddings => "access-embeddings",
            Self::SystemEvents => "system-events",
            Self::System => "system",
        }
    }

    /// 위험도 (0-10)
    pub fn risk_level(&self) -> u8 {
        match self {
            Self::ReadMemory | Self::ReadGraph => 2,
            Self::WriteMemory | Self::CreateRelationships => 4,
            Self::AccessEmbeddings => 4,
            Self::ModifyGraph => 5,
            Self::SystemEvents => 6,
            Self::DeleteMemory => 7,
            Self::System => 10,
        }
    }
}

impl fmt::Display for PermissionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|token| token.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("invalid permission '{}'", s)))
    }
}

// ============================================================================
// PermissionSet
// ============================================================================

/// 플러그인에 부여된 권한 집합
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<PermissionToken>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 모든 권한을 가진 시스템 권한 집합
    pub fn system() -> Self {
        Self(PermissionToken::ALL.iter().copied().collect())
    }

    pub fn with(mut self, token: PermissionToken) -> Self {
        self.0.insert(token);
        self
    }

    pub fn insert(&mut self, token: PermissionToken) -> bool {
        self.0.insert(token)
    }

    pub fn contains(&self, token: PermissionToken) -> bool {
        self.0.contains(&token)
    }

    /// 시스템 플러그인 여부
    pub fn is_system(&self) -> bool {
        self.contains(PermissionToken::System)
    }

    /// 정확히 일치하는 토큰이 없으면 권한 에러
    pub fn require(&self, plugin_id: &str, token: PermissionToken, operation: &str) -> Result<()> {
        if self.contains(token) {
            Ok(())
        } else {
            Err(Error::permission_denied(plugin_id, token.as_str(), operation))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionToken> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 문자열 목록에서 파싱 (알 수 없는 토큰은 검증 에러)
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self> {
        tokens
            .iter()
            .map(|t| t.as_ref().parse::<PermissionToken>())
            .collect::<Result<BTreeSet<_>>>()
            .map(Self)
    }
}

impl FromIterator<PermissionToken> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = PermissionToken>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PermissionSet {
    type Item = &'a PermissionToken;
    type IntoIter = std::collections::btree_set::Iter<'a, PermissionToken>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_names() {
        for token in PermissionToken::ALL {
            assert_eq!(token.as_str().parse::<PermissionToken>().unwrap(), token);
        }
        assert!("launch-missiles".parse::<PermissionToken>().is_err());
    }

    #[test]
    fn test_serde_kebab_case() {
        let json = serde_json::to_string(&PermissionToken::CreateRelationships).unwrap();
        assert_eq!(json, "\"create-relationships\"");

        let set: PermissionSet =
            serde_json::from_str(r#"["read-memory", "write-memory"]"#).unwrap();
        assert!(set.contains(PermissionToken::ReadMemory));
        assert!(!set.contains(PermissionToken::DeleteMemory));
    }

    #[test]
    fn test_require() {
        let set = PermissionSet::new().with(PermissionToken::ReadMemory);
        assert!(set.require("p", PermissionToken::ReadMemory, "memory.get").is_ok());

        let err = set
            .require("p", PermissionToken::WriteMemory, "memory.store")
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert!(!set.is_system());
        assert!(PermissionSet::system().is_system());
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(PermissionSet::parse(&["read-memory", "bogus"]).is_err());
        assert_eq!(PermissionSet::parse(&["read-memory"]).unwrap().len(), 1);
    }
}
