use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{
    lifecycle::{GenerationLifecycle, LifecycleState},
    style::Icon,
};

pub const DOWNLOAD_FILE_NAME: &str = "ai-wedding-photo.png";

/// What the result area shows. Exactly one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultView {
    Placeholder { title: &'static str, hint: &'static str },
    Spinner { title: &'static str, hint: &'static str },
    ErrorPanel { title: &'static str, message: String },
    Image { handle: Uuid, url: String },
}

pub fn project(state: &LifecycleState) -> ResultView {
    match state {
        LifecycleState::Idle => ResultView::Placeholder {
            title: "Your wedding picture will appear here",
            hint: "Click to zoom or preview before downloading.",
        },
        LifecycleState::InFlight => ResultView::Spinner {
            title: "Creating your magical moment...",
            hint: "This can take a minute. Please wait.",
        },
        LifecycleState::Failed(message) => {
            ResultView::ErrorPanel { title: "Generation Failed", message: message.clone() }
        }
        LifecycleState::Succeeded(image) => {
            ResultView::Image { handle: image.handle.id(), url: image.handle.url() }
        }
    }
}

/// Glyph used to draw a catalog icon.
pub fn icon_glyph(icon: Icon) -> &'static str {
    match icon {
        Icon::Castle => "🏰",
        Icon::Sun => "☀️",
        Icon::Flower => "🌸",
        Icon::Building => "🏨",
        Icon::Leaf => "🍃",
        Icon::Pencil => "✏️",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Escape,
    Enter,
    #[serde(other)]
    Other,
}

/// Key listeners attached to one view.
#[derive(Clone, Default)]
pub struct KeyListeners {
    inner: Arc<Mutex<HashMap<u64, Key>>>,
    next_id: Arc<AtomicU64>,
}

impl KeyListeners {
    pub fn attach(&self, key: Key) -> ListenerGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().insert(id, key);
        debug!(id, ?key, "key listener attached");
        ListenerGuard { id, listeners: self.clone() }
    }

    pub fn is_listening(&self, key: Key) -> bool {
        self.inner.lock().values().any(|k| *k == key)
    }

    #[cfg(test)]
    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Detaches its listener when dropped.
pub struct ListenerGuard {
    id: u64,
    listeners: KeyListeners,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.listeners.inner.lock().remove(&self.id);
        debug!(id = self.id, "key listener detached");
    }
}

/// Full-size preview of the result. The Escape listener is held only while open.
#[derive(Default)]
pub struct ZoomModal {
    escape: Option<ListenerGuard>,
}

impl ZoomModal {
    pub fn is_open(&self) -> bool {
        self.escape.is_some()
    }

    /// Opens only when there is an image to show.
    pub fn open(&mut self, lifecycle: &GenerationLifecycle, listeners: &KeyListeners) -> bool {
        if lifecycle.result().is_none() {
            return false;
        }
        if self.escape.is_none() {
            self.escape = Some(listeners.attach(Key::Escape));
        }
        true
    }

    pub fn dismiss(&mut self) {
        self.escape = None;
    }

    /// Returns `true` when the key closed the modal.
    pub fn on_key(&mut self, key: Key, listeners: &KeyListeners) -> bool {
        if key == Key::Escape && self.is_open() && listeners.is_listening(Key::Escape) {
            self.dismiss();
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: &'static str,
    pub media_type: String,
    pub content: Bytes,
}

pub fn download(lifecycle: &GenerationLifecycle) -> Option<Download> {
    lifecycle.result().map(|image| Download {
        file_name: DOWNLOAD_FILE_NAME,
        media_type: image.media_type.clone(),
        content: image.content.clone(),
    })
}
