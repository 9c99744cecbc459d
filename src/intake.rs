//! Image intake: turns uploaded bytes into an [`EncodedImage`] backed by a
//! revocable display handle.
//!
//! Display handles live in a shared [`HandleRegistry`] so the page can fetch
//! previews by id. A [`DisplayHandle`] is not `Clone` and releases its entry
//! when dropped, so each handle is released exactly once whether it was
//! replaced, cleared or torn down with its session.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use base64::Engine;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const ACCEPTED_MEDIA_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("the uploaded file is empty")]
    EmptyFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Groom,
    Bride,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Groom => "Groom",
            Role::Bride => "Bride",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Binary content plus its media type, as handed to the generation client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub content: Bytes,
    pub media_type: String,
}

impl ImagePayload {
    pub fn new(content: impl Into<Bytes>, media_type: impl Into<String>) -> Self {
        Self { content: content.into(), media_type: media_type.into() }
    }

    /// Standard-alphabet base64 of the content.
    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.content)
    }
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub content: Bytes,
    pub media_type: String,
}

#[derive(Default)]
struct RegistryInner {
    entries: RwLock<HashMap<Uuid, StoredImage>>,
    issued: AtomicU64,
    released: AtomicU64,
}

/// Process-wide table of live display handles.
#[derive(Clone, Default)]
pub struct HandleRegistry {
    inner: Arc<RegistryInner>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, payload: &ImagePayload) -> DisplayHandle {
        let id = Uuid::new_v4();
        self.inner.entries.write().insert(
            id,
            StoredImage {
                content: payload.content.clone(),
                media_type: payload.media_type.clone(),
            },
        );
        self.inner.issued.fetch_add(1, Ordering::Relaxed);
        debug!(
            %id,
            media_type = %payload.media_type,
            bytes = payload.content.len(),
            "display handle created"
        );
        DisplayHandle { id, registry: self.clone() }
    }

    pub fn get(&self, id: &Uuid) -> Option<StoredImage> {
        self.inner.entries.read().get(id).cloned()
    }

    pub fn live(&self) -> usize {
        self.inner.entries.read().len()
    }

    #[cfg(test)]
    pub fn issued(&self) -> u64 {
        self.inner.issued.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn released(&self) -> u64 {
        self.inner.released.load(Ordering::Relaxed)
    }

    fn release(&self, id: &Uuid) {
        if self.inner.entries.write().remove(id).is_some() {
            self.inner.released.fetch_add(1, Ordering::Relaxed);
            debug!(%id, "display handle released");
        }
    }
}

/// Owned reference to a registry entry. Dropping it revokes the entry.
pub struct DisplayHandle {
    id: Uuid,
    registry: HandleRegistry,
}

impl DisplayHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> String {
        format!("/api/handles/{}", self.id)
    }
}

impl fmt::Debug for DisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DisplayHandle").field(&self.id).finish()
    }
}

impl Drop for DisplayHandle {
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}

#[derive(Debug)]
pub struct EncodedImage {
    pub payload: ImagePayload,
    pub handle: DisplayHandle,
}

/// Strips parameters and lowercases, then checks the allow-list.
pub fn normalize_media_type(declared: &str) -> Result<String, IntakeError> {
    let essence = declared.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    if essence.starts_with("image/") && ACCEPTED_MEDIA_TYPES.contains(&essence.as_str()) {
        Ok(essence)
    } else {
        Err(IntakeError::UnsupportedMediaType(declared.to_string()))
    }
}

/// One slot per role; a slot holds at most one [`EncodedImage`].
pub struct ImageIntake {
    registry: HandleRegistry,
    groom: Option<EncodedImage>,
    bride: Option<EncodedImage>,
}

impl ImageIntake {
    pub fn new(registry: HandleRegistry) -> Self {
        Self { registry, groom: None, bride: None }
    }

    pub fn submit(
        &mut self,
        role: Role,
        content: impl Into<Bytes>,
        declared_media_type: &str,
    ) -> Result<&EncodedImage, IntakeError> {
        let media_type = normalize_media_type(declared_media_type)?;
        let content = content.into();
        if content.is_empty() {
            return Err(IntakeError::EmptyFile);
        }

        let payload = ImagePayload { content, media_type };
        let handle = self.registry.create(&payload);
        info!(
            "📷 {} photo accepted ({}, {} bytes)",
            role,
            payload.media_type,
            payload.content.len()
        );

        // Inserting drops the previous image, which releases its handle.
        Ok(&*self.slot_mut(role).insert(EncodedImage { payload, handle }))
    }

    pub fn clear(&mut self, role: Role) {
        if self.slot_mut(role).take().is_some() {
            info!("🧹 {} photo cleared", role);
        }
    }

    pub fn get(&self, role: Role) -> Option<&EncodedImage> {
        match role {
            Role::Groom => self.groom.as_ref(),
            Role::Bride => self.bride.as_ref(),
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<EncodedImage> {
        match role {
            Role::Groom => &mut self.groom,
            Role::Bride => &mut self.bride,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";

    #[test]
    fn repeated_uploads_keep_latest_and_release_each_superseded_handle_once() {
        let registry = HandleRegistry::new();
        let mut intake = ImageIntake::new(registry.clone());

        let mut previous = Vec::new();
        for i in 0..5u8 {
            let image = intake.submit(Role::Groom, vec![i + 1; 4], "image/png").unwrap();
            previous.push(image.handle.id());
        }

        assert_eq!(registry.issued(), 5);
        assert_eq!(registry.released(), 4);
        assert_eq!(registry.live(), 1);
        let current = intake.get(Role::Groom).unwrap();
        assert_eq!(current.payload.content.as_ref(), &[5u8; 4]);
        for id in &previous[..4] {
            assert!(registry.get(id).is_none());
        }
        assert!(registry.get(&previous[4]).is_some());
    }

    #[test]
    fn rejected_file_leaves_slot_untouched() {
        let registry = HandleRegistry::new();
        let mut intake = ImageIntake::new(registry.clone());
        let id = intake.submit(Role::Bride, PNG_BYTES, "image/png").unwrap().handle.id();

        let err = intake
            .submit(Role::Bride, b"%PDF-1.7".as_slice(), "application/pdf")
            .unwrap_err();
        assert_eq!(err, IntakeError::UnsupportedMediaType("application/pdf".into()));
        assert_eq!(intake.get(Role::Bride).unwrap().handle.id(), id);
        assert_eq!(registry.released(), 0);
    }

    #[test]
    fn allow_list_is_stricter_than_prefix() {
        assert!(normalize_media_type("image/gif").is_err());
        assert!(normalize_media_type("text/plain").is_err());
        assert_eq!(normalize_media_type("IMAGE/JPEG; q=1").unwrap(), "image/jpeg");
        assert_eq!(normalize_media_type("image/webp").unwrap(), "image/webp");
    }

    #[test]
    fn empty_files_are_refused() {
        let mut intake = ImageIntake::new(HandleRegistry::new());
        let err = intake.submit(Role::Groom, Bytes::new(), "image/png").unwrap_err();
        assert_eq!(err, IntakeError::EmptyFile);
        assert!(intake.get(Role::Groom).is_none());
    }

    #[test]
    fn clear_releases_once_and_is_idempotent() {
        let registry = HandleRegistry::new();
        let mut intake = ImageIntake::new(registry.clone());
        intake.submit(Role::Groom, PNG_BYTES, "image/png").unwrap();

        intake.clear(Role::Groom);
        intake.clear(Role::Groom);

        assert!(intake.get(Role::Groom).is_none());
        assert_eq!(registry.released(), 1);
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn dropping_intake_releases_everything() {
        let registry = HandleRegistry::new();
        {
            let mut intake = ImageIntake::new(registry.clone());
            intake.submit(Role::Groom, PNG_BYTES, "image/png").unwrap();
            intake.submit(Role::Bride, PNG_BYTES, "image/jpeg").unwrap();
            assert!(intake.get(Role::Groom).is_some() && intake.get(Role::Bride).is_some());
            assert_eq!(registry.live(), 2);
        }
        assert_eq!(registry.live(), 0);
        assert_eq!(registry.released(), 2);
    }

    #[test]
    fn payload_base64_decodes_to_uploaded_bytes() {
        let payload = ImagePayload::new(PNG_BYTES, "image/png");
        let decoded = base64::engine::general_purpose::STANDARD.decode(payload.base64()).unwrap();
        assert_eq!(decoded, PNG_BYTES);
    }
}
