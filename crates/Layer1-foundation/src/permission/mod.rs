//! Permission - 플러그인 권한 토큰
//!
//! 리소스 API는 호출마다 정확히 일치하는 토큰을 요구합니다.
//! `system` 토큰은 소유권 검사와 워크스페이스 격리를 우회합니다.

mod types;

pub use types::{PermissionSet, PermissionToken};
