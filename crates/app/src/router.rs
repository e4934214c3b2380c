use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use badger_core::{imaging::ImageScaler, tags::TagSupport};
use badger_storage::Database;
use badger_util::AppConfig;

use crate::auth::SessionValidator;
use crate::awards::{self, AwardService, PrerequisiteCascade};
use crate::badges;
use crate::telemetry;
use crate::uploads::UploadStore;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    sessions: SessionValidator,
    uploads: UploadStore,
    award_service: AwardService,
    tags: TagSupport,
    upload_max_bytes: usize,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database, config: &AppConfig) -> Self {
        let scaler = ImageScaler::new(config.image_max_size.width, config.image_max_size.height);
        let mut award_service = AwardService::new(storage.clone(), &config.creator_badge_slug);
        if config.prerequisite_cascade {
            award_service =
                award_service.with_hook(Arc::new(PrerequisiteCascade::new(storage.clone())));
        }

        Self {
            metrics,
            storage,
            clock: Arc::new(Utc::now),
            sessions: SessionValidator::new(&config.session_secret),
            uploads: UploadStore::new(config.media_root.clone(), &config.media_url, scaler),
            award_service,
            tags: TagSupport::from_flag(config.tags_enabled),
            upload_max_bytes: config.upload_max_bytes,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn sessions(&self) -> &SessionValidator {
        &self.sessions
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    pub fn award_service(&self) -> &AwardService {
        &self.award_service
    }

    pub fn tags(&self) -> TagSupport {
        self.tags
    }
}

pub fn app_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.upload_max_bytes);
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/", get(badges::index))
        .route("/new-badge", get(badges::new_form).post(badges::create))
        .route("/badge/:slug", get(badges::detail))
        .route("/badge/:slug/", get(badges::detail))
        .route("/badge/:slug/edit", get(badges::edit_form).post(badges::update))
        .route("/badge/:slug/delete", post(badges::delete))
        .route("/badge/:slug/award", post(awards::award))
        .route("/badge/:slug/awards", get(awards::badge_awards))
        .route("/badge/:slug/awards/:id", get(awards::award_detail))
        .route("/badge/:slug/awards/:id/", get(awards::award_detail))
        .route("/user/:username", get(awards::user_awards))
        .route("/user/:username/", get(awards::user_awards))
        .layer(body_limit)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> Response {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}
