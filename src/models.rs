use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    presentation::{icon_glyph, Key, ResultView},
    style::{Icon, StyleCategory, StyleOption, StyleSelection},
};

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct RoleSnapshot {
    pub preview_url: Option<String>,
    pub media_type: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub groom: RoleSnapshot,
    pub bride: RoleSnapshot,
    pub style: StyleSelection,
    pub state: &'static str,
    pub result: ResultView,
    pub validation_message: Option<String>,
    pub can_generate: bool,
    pub show_result_actions: bool,
    pub zoom_open: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StyleUpdate {
    pub category: StyleCategory,
    #[serde(default)]
    pub custom_text: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct KeyEvent {
    pub key: Key,
}

#[derive(Debug, Serialize, Clone, Copy)]
pub struct CatalogEntry {
    pub category: StyleCategory,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: Icon,
    pub glyph: &'static str,
}

impl From<&StyleOption> for CatalogEntry {
    fn from(option: &StyleOption) -> Self {
        Self {
            category: option.category,
            name: option.name,
            description: option.description,
            icon: option.icon,
            glyph: icon_glyph(option.icon),
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy)]
pub struct ZoomState {
    pub open: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Clone)]
pub struct ApiErrorDetail {
    pub message: String,
    pub r#type: &'static str,
}
