//! A view session: the page-side owner of intake slots, style choice,
//! lifecycle and zoom modal.
//!
//! Generation runs in a spawned task holding only a weak reference to the
//! session and a child of the session's cancellation token. Tearing the
//! session down cancels the token, so a late result is dropped instead of
//! being applied to a view that no longer exists.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::{
    task::{JoinError, JoinHandle},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    gemini::{GeneratedPayload, GenerationClient, GenerationError},
    intake::{HandleRegistry, ImageIntake, IntakeError, Role},
    lifecycle::{GeneratedImage, GenerationLifecycle, GenerationRequest, StartError},
    models::{RoleSnapshot, SessionSnapshot},
    presentation::{self, Download, Key, KeyListeners, ZoomModal},
    style::{StyleCategory, StyleSelection},
};

struct ViewState {
    intake: ImageIntake,
    style: StyleSelection,
    lifecycle: GenerationLifecycle,
    zoom: ZoomModal,
    updated_at: DateTime<Utc>,
    last_active: Instant,
}

impl ViewState {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.last_active = Instant::now();
    }
}

pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    registry: HandleRegistry,
    listeners: KeyListeners,
    cancel: CancellationToken,
    view: Mutex<ViewState>,
}

impl Session {
    pub fn new(registry: HandleRegistry) -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            id: Uuid::new_v4(),
            created_at: now,
            listeners: KeyListeners::default(),
            cancel: CancellationToken::new(),
            view: Mutex::new(ViewState {
                intake: ImageIntake::new(registry.clone()),
                style: StyleSelection::default(),
                lifecycle: GenerationLifecycle::new(),
                zoom: ZoomModal::default(),
                updated_at: now,
                last_active: Instant::now(),
            }),
            registry,
        })
    }

    pub fn upload(&self, role: Role, content: Bytes, media_type: &str) -> Result<(), IntakeError> {
        let mut view = self.view.lock();
        view.intake.submit(role, content, media_type)?;
        view.lifecycle.dismiss_validation();
        view.touch();
        Ok(())
    }

    pub fn clear(&self, role: Role) {
        let mut view = self.view.lock();
        view.intake.clear(role);
        view.touch();
    }

    pub fn set_style(&self, category: StyleCategory, custom_text: Option<String>) {
        let mut view = self.view.lock();
        view.style.set_category(category);
        if let Some(text) = custom_text {
            view.style.set_custom_text(text);
        }
        view.lifecycle.dismiss_validation();
        view.touch();
    }

    /// Marks the session as in use without changing anything.
    pub fn touch(&self) {
        self.view.lock().touch();
    }

    /// Time since the last request touched the session. A session with a
    /// request in flight is never idle.
    pub fn idle_for(&self) -> Duration {
        let view = self.view.lock();
        if view.lifecycle.is_in_flight() {
            Duration::ZERO
        } else {
            view.last_active.elapsed()
        }
    }

    /// Validates, enters `InFlight` and spawns the generation call.
    ///
    /// The call itself runs in its own task so that a panic inside the
    /// client still resolves the request as a failure.
    pub fn start_generation(
        self: &Arc<Self>,
        client: Arc<dyn GenerationClient>,
        timeout: Option<Duration>,
    ) -> Result<JoinHandle<()>, StartError> {
        let (ticket, request) = {
            let mut view = self.view.lock();
            let view = &mut *view;
            let started = view.lifecycle.start(&view.intake, &view.style)?;
            view.zoom.dismiss();
            view.touch();
            started
        };

        let session: Weak<Session> = Arc::downgrade(self);
        let cancel = self.cancel.child_token();
        let registry = self.registry.clone();
        let session_id = self.id;

        Ok(tokio::spawn(async move {
            let mut call = tokio::spawn(async move {
                call_client(client.as_ref(), &request, timeout).await
            });
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    call.abort();
                    debug!(%session_id, "generation abandoned: session torn down");
                    return;
                }
                joined = &mut call => joined.unwrap_or_else(|e| Err(call_failed(session_id, e))),
            };

            let Some(session) = session.upgrade() else {
                debug!(%session_id, "generation finished after session was dropped");
                return;
            };
            if cancel.is_cancelled() {
                debug!(%session_id, "generation finished after teardown");
                return;
            }

            let outcome = outcome.map(|payload| GeneratedImage::register(&registry, payload));
            let mut view = session.view.lock();
            view.lifecycle.resolve(ticket, outcome);
            view.touch();
        }))
    }

    pub fn open_zoom(&self) -> bool {
        let mut view = self.view.lock();
        let view = &mut *view;
        view.zoom.open(&view.lifecycle, &self.listeners)
    }

    pub fn dismiss_zoom(&self) {
        self.view.lock().zoom.dismiss();
    }

    pub fn key(&self, key: Key) -> bool {
        self.view.lock().zoom.on_key(key, &self.listeners)
    }

    pub fn download(&self) -> Option<Download> {
        presentation::download(&self.view.lock().lifecycle)
    }

    #[cfg(test)]
    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels pending work and releases every resource the view holds.
    pub fn teardown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let mut view = self.view.lock();
        view.zoom.dismiss();
        view.intake.clear(Role::Groom);
        view.intake.clear(Role::Bride);
        view.lifecycle = GenerationLifecycle::new();
        drop(view);
        info!("👋 Session {} torn down ({} display handles live)", self.id, self.registry.live());
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let view = self.view.lock();
        let role = |role: Role| RoleSnapshot {
            preview_url: view.intake.get(role).map(|image| image.handle.url()),
            media_type: view.intake.get(role).map(|image| image.payload.media_type.clone()),
        };
        let in_flight = view.lifecycle.is_in_flight();
        let ready = crate::lifecycle::prepare_request(&view.intake, &view.style).is_ok();
        let succeeded = view.lifecycle.result().is_some();
        SessionSnapshot {
            id: self.id,
            groom: role(Role::Groom),
            bride: role(Role::Bride),
            style: view.style.clone(),
            state: view.lifecycle.state().name(),
            result: presentation::project(view.lifecycle.state()),
            validation_message: view.lifecycle.validation().map(|v| v.to_string()),
            can_generate: ready && !in_flight,
            show_result_actions: succeeded && view.lifecycle.validation().is_none(),
            zoom_open: view.zoom.is_open(),
            created_at: self.created_at,
            updated_at: view.updated_at,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn call_client(
    client: &dyn GenerationClient,
    request: &GenerationRequest,
    timeout: Option<Duration>,
) -> Result<GeneratedPayload, GenerationError> {
    let call = client.generate(&request.groom, &request.bride, &request.directive);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(GenerationError::TimedOut(limit))),
        None => call.await,
    }
}

fn call_failed(session_id: Uuid, e: JoinError) -> GenerationError {
    error!(%session_id, "💥 generation task failed: {}", e);
    GenerationError::Other("The generation request failed unexpectedly.".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::MockGenerationClient;
    use crate::intake::ImagePayload;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn png(bytes: &'static [u8]) -> GeneratedPayload {
        GeneratedPayload { content: Bytes::from_static(bytes), media_type: "image/png".into() }
    }

    fn ready_session(registry: &HandleRegistry) -> Arc<Session> {
        let session = Session::new(registry.clone());
        session.upload(Role::Groom, Bytes::from_static(b"groom.jpg"), "image/jpeg").unwrap();
        session.upload(Role::Bride, Bytes::from_static(b"bride.jpg"), "image/jpeg").unwrap();
        session
    }

    /// Holds every call until released.
    struct GatedClient {
        gate: Notify,
        calls: AtomicUsize,
        reply: Mutex<Option<Result<GeneratedPayload, GenerationError>>>,
    }

    impl GatedClient {
        fn new(reply: Result<GeneratedPayload, GenerationError>) -> Arc<Self> {
            Arc::new(Self {
                gate: Notify::new(),
                calls: AtomicUsize::new(0),
                reply: Mutex::new(Some(reply)),
            })
        }
    }

    #[async_trait]
    impl GenerationClient for GatedClient {
        async fn generate(
            &self,
            _: &ImagePayload,
            _: &ImagePayload,
            _: &str,
        ) -> Result<GeneratedPayload, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.reply
                .lock()
                .take()
                .unwrap_or_else(|| Err(GenerationError::Other("no reply".into())))
        }
    }

    /// Panics on the first call, then succeeds.
    #[derive(Default)]
    struct PanicsOnceClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationClient for PanicsOnceClient {
        async fn generate(
            &self,
            _: &ImagePayload,
            _: &ImagePayload,
            _: &str,
        ) -> Result<GeneratedPayload, GenerationError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("malformed response");
            }
            Ok(png(b"recovered"))
        }
    }

    #[tokio::test]
    async fn beach_scenario_calls_client_once_and_succeeds() {
        let registry = HandleRegistry::new();
        let session = ready_session(&registry);
        session.set_style(StyleCategory::Beach, None);

        let mut client = MockGenerationClient::new();
        client
            .expect_generate()
            .withf(|groom, bride, directive| {
                groom.content.as_ref() == b"groom.jpg"
                    && groom.media_type == "image/jpeg"
                    && bride.content.as_ref() == b"bride.jpg"
                    && directive.contains("Sandy shore at golden hour.")
            })
            .times(1)
            .returning(|_, _, _| Ok(png(b"wedding")));

        session.start_generation(Arc::new(client), None).unwrap().await.unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, "succeeded");
        assert!(snapshot.show_result_actions);
        assert_eq!(session.download().unwrap().content.as_ref(), b"wedding");
    }

    #[tokio::test]
    async fn whitespace_custom_style_never_reaches_client() {
        let registry = HandleRegistry::new();
        let session = ready_session(&registry);
        session.set_style(StyleCategory::Custom, Some("   ".into()));

        let mut client = MockGenerationClient::new();
        client.expect_generate().times(0);

        let err = session.start_generation(Arc::new(client), None).unwrap_err();
        assert_eq!(err, StartError::Invalid(crate::lifecycle::ValidationError::EmptyCustomStyle));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, "idle");
        assert!(!snapshot.can_generate);
        assert_eq!(
            snapshot.validation_message.as_deref(),
            Some("Please describe your custom venue.")
        );
    }

    #[tokio::test]
    async fn rate_limit_failure_then_retry() {
        let registry = HandleRegistry::new();
        let session = ready_session(&registry);

        let mut client = MockGenerationClient::new();
        let mut calls = 0;
        client.expect_generate().times(2).returning(move |_, _, _| {
            calls += 1;
            if calls == 1 {
                Err(GenerationError::Api { status: 429, message: "Rate limit exceeded".into() })
            } else {
                Ok(png(b"second try"))
            }
        });
        let client: Arc<dyn GenerationClient> = Arc::new(client);

        session.start_generation(client.clone(), None).unwrap().await.unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, "failed");
        assert_eq!(
            snapshot.result,
            presentation::ResultView::ErrorPanel {
                title: "Generation Failed",
                message: "Rate limit exceeded".into(),
            }
        );
        assert!(snapshot.can_generate);

        session.start_generation(client, None).unwrap().await.unwrap();
        assert_eq!(session.snapshot().state, "succeeded");
    }

    #[tokio::test]
    async fn only_one_request_in_flight() {
        let registry = HandleRegistry::new();
        let session = ready_session(&registry);
        let client = GatedClient::new(Ok(png(b"done")));

        let task = session.start_generation(client.clone(), None).unwrap();
        let second = session.start_generation(client.clone(), None).unwrap_err();
        assert_eq!(second, StartError::AlreadyInFlight);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, "in_flight");
        assert!(!snapshot.can_generate);

        client.gate.notify_one();
        task.await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.snapshot().state, "succeeded");
    }

    #[tokio::test]
    async fn teardown_discards_late_result_and_releases_handles() {
        let registry = HandleRegistry::new();
        let session = ready_session(&registry);
        let client = GatedClient::new(Ok(png(b"late")));

        let task = session.start_generation(client.clone(), None).unwrap();
        session.teardown();
        client.gate.notify_one();
        task.await.unwrap();

        assert!(session.is_torn_down());
        assert_eq!(session.snapshot().state, "idle");
        assert_eq!(registry.live(), 0);
        assert_eq!(registry.released(), registry.issued());
    }

    #[tokio::test]
    async fn dropping_session_abandons_generation() {
        let registry = HandleRegistry::new();
        let session = ready_session(&registry);
        let client = GatedClient::new(Ok(png(b"late")));

        let task = session.start_generation(client.clone(), None).unwrap();
        drop(session);
        client.gate.notify_one();
        task.await.unwrap();

        assert_eq!(registry.live(), 0);
    }

    #[tokio::test]
    async fn panicking_client_fails_the_request_and_allows_retry() {
        let registry = HandleRegistry::new();
        let session = ready_session(&registry);
        let client = Arc::new(PanicsOnceClient::default());

        session.start_generation(client.clone(), None).unwrap().await.unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, "failed");
        assert_eq!(
            snapshot.result,
            presentation::ResultView::ErrorPanel {
                title: "Generation Failed",
                message: "The generation request failed unexpectedly.".into(),
            }
        );
        assert!(snapshot.can_generate);

        session.start_generation(client, None).unwrap().await.unwrap();
        assert_eq!(session.snapshot().state, "succeeded");
        assert_eq!(session.download().unwrap().content.as_ref(), b"recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_resets_on_touch_and_pauses_while_in_flight() {
        let registry = HandleRegistry::new();
        let session = ready_session(&registry);

        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(session.idle_for(), Duration::from_secs(40));
        session.touch();
        assert_eq!(session.idle_for(), Duration::ZERO);

        let client = GatedClient::new(Ok(png(b"slow")));
        let task = session.start_generation(client.clone(), None).unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(session.idle_for(), Duration::ZERO);
        client.gate.notify_one();
        task.await.unwrap();
        assert!(session.idle_for() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn configured_timeout_fails_the_request() {
        let registry = HandleRegistry::new();
        let session = ready_session(&registry);
        let client = GatedClient::new(Ok(png(b"never")));

        session.start_generation(client, Some(Duration::from_secs(30))).unwrap().await.unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, "failed");
        assert_eq!(
            snapshot.result,
            presentation::ResultView::ErrorPanel {
                title: "Generation Failed",
                message: "Generation timed out after 30 seconds.".into(),
            }
        );
    }

    #[tokio::test]
    async fn zoom_closes_on_escape_and_when_regenerating() {
        let registry = HandleRegistry::new();
        let session = ready_session(&registry);
        let client = GatedClient::new(Ok(png(b"first")));

        assert!(!session.open_zoom());
        let task = session.start_generation(client.clone(), None).unwrap();
        client.gate.notify_one();
        task.await.unwrap();

        assert!(session.open_zoom());
        assert!(session.key(Key::Escape));
        assert!(!session.snapshot().zoom_open);
        assert!(!session.key(Key::Escape));

        assert!(session.open_zoom());
        let task = session.start_generation(client.clone(), None).unwrap();
        assert!(!session.snapshot().zoom_open);
        client.gate.notify_one();
        task.await.unwrap();
    }
}
