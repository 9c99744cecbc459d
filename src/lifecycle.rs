//! Generation request lifecycle.
//!
//! `Idle | Succeeded | Failed --start--> InFlight --resolve--> Succeeded | Failed`.
//! A failed guard never leaves the current state; it only records a
//! validation message next to it. While `InFlight`, `start` is refused.

use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    gemini::{GeneratedPayload, GenerationError},
    intake::{DisplayHandle, HandleRegistry, ImageIntake, ImagePayload, Role},
    style::StyleSelection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please upload photos for the groom and bride.")]
    MissingImage,
    #[error("Please describe your custom venue.")]
    EmptyCustomStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("A generation is already in progress.")]
    AlreadyInFlight,
}

/// Immutable snapshot of the inputs for one request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub groom: ImagePayload,
    pub bride: ImagePayload,
    pub directive: String,
}

/// Identifies the request a resolution belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug)]
pub struct GeneratedImage {
    pub content: Bytes,
    pub media_type: String,
    pub handle: DisplayHandle,
}

impl GeneratedImage {
    pub fn register(registry: &HandleRegistry, payload: GeneratedPayload) -> Self {
        let payload = ImagePayload::new(payload.content, payload.media_type);
        let handle = registry.create(&payload);
        Self { content: payload.content, media_type: payload.media_type, handle }
    }
}

#[derive(Debug, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    InFlight,
    Succeeded(GeneratedImage),
    Failed(String),
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::InFlight => "in_flight",
            LifecycleState::Succeeded(_) => "succeeded",
            LifecycleState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Default)]
pub struct GenerationLifecycle {
    state: LifecycleState,
    validation: Option<ValidationError>,
    next_ticket: u64,
    in_flight: Option<Ticket>,
}

/// Checks the cross-field guard and snapshots the inputs.
pub fn prepare_request(
    intake: &ImageIntake,
    style: &StyleSelection,
) -> Result<GenerationRequest, ValidationError> {
    let (Some(groom), Some(bride)) = (intake.get(Role::Groom), intake.get(Role::Bride)) else {
        return Err(ValidationError::MissingImage);
    };
    let directive = style.directive().ok_or(ValidationError::EmptyCustomStyle)?;
    Ok(GenerationRequest { groom: groom.payload.clone(), bride: bride.payload.clone(), directive })
}

impl GenerationLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn validation(&self) -> Option<ValidationError> {
        self.validation
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, LifecycleState::InFlight)
    }

    pub fn result(&self) -> Option<&GeneratedImage> {
        match &self.state {
            LifecycleState::Succeeded(image) => Some(image),
            _ => None,
        }
    }

    pub fn start(
        &mut self,
        intake: &ImageIntake,
        style: &StyleSelection,
    ) -> Result<(Ticket, GenerationRequest), StartError> {
        if self.is_in_flight() {
            warn!("⏳ start refused: a generation is already in flight");
            return Err(StartError::AlreadyInFlight);
        }

        let request = match prepare_request(intake, style) {
            Ok(request) => request,
            Err(e) => {
                info!("🚫 start refused: {}", e);
                self.validation = Some(e);
                return Err(e.into());
            }
        };

        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight = Some(ticket);
        self.validation = None;
        // Drops any previous result (and its display handle) before loading.
        self.state = LifecycleState::InFlight;
        info!("🚀 Generation {} started with setting: {}", ticket.0, request.directive);
        Ok((ticket, request))
    }

    /// Applies the outcome of the in-flight request. Returns `false` when the
    /// ticket is stale and the outcome was discarded.
    pub fn resolve(
        &mut self,
        ticket: Ticket,
        outcome: Result<GeneratedImage, GenerationError>,
    ) -> bool {
        if self.in_flight != Some(ticket) {
            warn!("🗑️ discarding stale result for generation {}", ticket.0);
            return false;
        }
        self.in_flight = None;
        self.state = match outcome {
            Ok(image) => {
                info!("✅ Generation {} succeeded ({} bytes)", ticket.0, image.content.len());
                LifecycleState::Succeeded(image)
            }
            Err(e) => {
                let message = e.user_message();
                info!("❌ Generation {} failed: {}", ticket.0, message);
                LifecycleState::Failed(message)
            }
        };
        true
    }

    /// Clears the validation annotation, e.g. after the inputs changed.
    pub fn dismiss_validation(&mut self) {
        self.validation = None;
    }
}
