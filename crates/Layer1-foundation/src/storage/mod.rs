//! Storage module for Mnemos
//!
//! - `json`: JSON - 설정 파일 저장/로드

mod json;

pub use json::{JsonStore, APP_DIR_NAME};
