//! # API REST
//!
//! REST API implementation for LifeTag.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, actor headers)
//!
//! Uses `api-shared` for wire types and authentication, and `lifetag-core` for every
//! consent decision.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod extract;
pub mod handlers;

use api_shared::{
    ApproveAccessReq, AuditEntryRes, AuditTrailRes, DoctorRes, ErrorRes, GrantRes, HealthRes,
    ListDoctorsRes, ListGrantsRes, ListRecordsRes, PatientRes, RecordRes, RequestAccessReq,
    RevokeAccessReq, SweepRes,
};
use axum::routing::{get, post};
use axum::Router;
use lifetag_core::constants::DEFAULT_DATA_DIR;
use lifetag_core::{
    resolve_policy, ConsentService, CoreConfig, IdentityRegistry, InMemoryIdentityRegistry,
    ShardedRecordIndex, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state for the REST API server.
///
/// Shared by every handler: the resolved configuration, the consent service, and the API key
/// callers must present.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<CoreConfig>,
    pub service: Arc<ConsentService>,
    api_key: Arc<str>,
}

impl AppState {
    pub fn new(
        cfg: Arc<CoreConfig>,
        service: Arc<ConsentService>,
        api_key: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            cfg,
            service,
            api_key: api_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::request_access,
        handlers::approve_access,
        handlers::deny_access,
        handlers::revoke_access,
        handlers::withdraw_request,
        handlers::get_grant,
        handlers::grant_audit_trail,
        handlers::list_patient_grants,
        handlers::list_doctor_grants,
        handlers::read_records,
        handlers::patient_audit_trail,
        handlers::find_patient_by_tag,
        handlers::list_doctors,
        handlers::run_sweep,
    ),
    components(schemas(
        HealthRes,
        ErrorRes,
        RequestAccessReq,
        ApproveAccessReq,
        RevokeAccessReq,
        GrantRes,
        ListGrantsRes,
        AuditEntryRes,
        AuditTrailRes,
        RecordRes,
        ListRecordsRes,
        PatientRes,
        DoctorRes,
        ListDoctorsRes,
        SweepRes,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/grants", post(handlers::request_access))
        .route("/grants/:id", get(handlers::get_grant))
        .route("/grants/:id/approve", post(handlers::approve_access))
        .route("/grants/:id/deny", post(handlers::deny_access))
        .route("/grants/:id/revoke", post(handlers::revoke_access))
        .route("/grants/:id/withdraw", post(handlers::withdraw_request))
        .route("/grants/:id/audit", get(handlers::grant_audit_trail))
        .route("/patients/:id/grants", get(handlers::list_patient_grants))
        .route("/patients/:id/records", get(handlers::read_records))
        .route("/patients/:id/audit", get(handlers::patient_audit_trail))
        .route("/doctors", get(handlers::list_doctors))
        .route("/doctors/:id/grants", get(handlers::list_doctor_grants))
        .route("/tags/:tag", get(handlers::find_patient_by_tag))
        .route("/admin/sweep", post(handlers::run_sweep))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Resolves configuration from the environment and builds the application state.
///
/// # Environment Variables
/// - `LIFETAG_DATA_DIR`: engine state directory (default: `lifetag_data`); must exist
/// - `LIFETAG_POLICY_FILE`: optional YAML consent policy
/// - `LIFETAG_IDENTITIES_FILE`: identity seed file (default: `<data_dir>/identities.yaml`)
/// - `API_KEY`: key callers must send in `x-api-key`
///
/// # Errors
/// Returns an error if the data directory is missing, the policy or identities file is
/// invalid, the journal cannot be replayed, or `API_KEY` is not set.
pub fn state_from_env() -> anyhow::Result<AppState> {
    let data_dir = PathBuf::from(
        std::env::var("LIFETAG_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.into()),
    );
    if !data_dir.is_dir() {
        anyhow::bail!("LifeTag data directory does not exist: {}", data_dir.display());
    }

    let policy = resolve_policy(std::env::var("LIFETAG_POLICY_FILE").ok().map(PathBuf::from))?;
    let cfg = Arc::new(CoreConfig::new(data_dir, policy)?);

    let registry: Arc<dyn IdentityRegistry> = match std::env::var("LIFETAG_IDENTITIES_FILE") {
        Ok(path) => Arc::new(InMemoryIdentityRegistry::load_yaml(&PathBuf::from(path))?),
        Err(_) if cfg.identities_path().is_file() => {
            Arc::new(InMemoryIdentityRegistry::load_yaml(&cfg.identities_path())?)
        }
        Err(_) => {
            tracing::warn!("no identities file found, starting with an empty registry");
            Arc::new(InMemoryIdentityRegistry::new())
        }
    };

    let storage = Arc::new(ShardedRecordIndex::new(cfg.records_dir()));
    let service = Arc::new(ConsentService::new(
        &cfg,
        registry,
        storage,
        Arc::new(SystemClock),
    )?);

    let api_key =
        std::env::var("API_KEY").map_err(|_| anyhow::anyhow!("API_KEY not set in environment"))?;

    Ok(AppState::new(cfg, service, api_key))
}

/// Runs the expiry sweep every `every` on the blocking pool until the runtime shuts down.
pub fn spawn_expiry_sweep(
    service: Arc<ConsentService>,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let svc = Arc::clone(&service);
            match tokio::task::spawn_blocking(move || svc.run_expiry_sweep()).await {
                Ok(report) if !report.expired.is_empty() || report.failed > 0 => {
                    tracing::info!(
                        expired = report.expired.len(),
                        failed = report.failed,
                        "expiry sweep"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "expiry sweep task failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_shared::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER, API_KEY_HEADER};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use lifetag_core::identity::NewPatient;
    use lifetag_core::{
        ConsentPolicy, Doctor, InMemoryRecordStorage, ManualClock, MedicalRecord, NonEmptyText,
        Patient, PatientId, RecordStorage, StorageError,
    };
    use serde::de::DeserializeOwned;
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};
    use tower::ServiceExt;

    const KEY: &str = "test-key";

    struct Harness {
        app: Router,
        doctor: Doctor,
        patient: Patient,
        admin: lifetag_core::AdminId,
    }

    fn harness() -> Harness {
        harness_with(Arc::new(InMemoryRecordStorage::new()))
    }

    fn harness_with(storage: Arc<dyn RecordStorage>) -> Harness {
        let registry = Arc::new(InMemoryIdentityRegistry::new());
        let doctor = Doctor {
            id: lifetag_core::DoctorId::new(),
            full_name: NonEmptyText::new("Dr Kulkarni").unwrap(),
            specialization: Some("Cardiology".into()),
            hospital: None,
            department: None,
            verified: true,
            blocked: false,
        };
        registry.register_doctor(doctor.clone());
        let patient = registry.register_patient(NewPatient {
            full_name: NonEmptyText::new("Sunita Joshi").unwrap(),
            age: Some(52),
            gender: None,
            national_id_last4: Some("4321".into()),
        });
        let admin = lifetag_core::AdminId::new();
        registry.register_admin(admin);

        let policy = ConsentPolicy {
            journal: false,
            ..ConsentPolicy::default()
        };
        let cfg = Arc::new(CoreConfig::new(PathBuf::from("unused"), policy).unwrap());
        let service = Arc::new(ConsentService::in_memory(
            registry,
            storage,
            Arc::new(ManualClock::new(chrono::Utc::now())),
            None,
        ));
        Harness {
            app: router(AppState::new(cfg, service, KEY)),
            doctor,
            patient,
            admin,
        }
    }

    fn request(method: &str, uri: &str, role: &str, id: &str, body: Option<&str>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(API_KEY_HEADER, KEY)
            .header(ACTOR_ROLE_HEADER, role)
            .header(ACTOR_ID_HEADER, id);
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_owned()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send<T: DeserializeOwned>(app: &Router, req: Request<Body>) -> (StatusCode, T) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_needs_no_credentials() {
        let h = harness();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body): (_, HealthRes) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.ok);
    }

    #[tokio::test]
    async fn wrong_api_key_is_unauthorised() {
        let h = harness();
        let req = Request::builder()
            .uri(format!("/patients/{}/grants", h.patient.id))
            .header(API_KEY_HEADER, "nope")
            .header(ACTOR_ROLE_HEADER, "patient")
            .header(ACTOR_ID_HEADER, h.patient.id.to_string())
            .body(Body::empty())
            .unwrap();
        let (status, body): (_, ErrorRes) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.kind, "unauthenticated");
    }

    #[tokio::test]
    async fn consent_lifecycle_over_http() {
        let h = harness();
        let doctor = h.doctor.id.to_string();
        let patient = h.patient.id.to_string();

        let body = format!(r#"{{"patient_id":"{patient}"}}"#);
        let (status, grant): (_, GrantRes) = send(
            &h.app,
            request("POST", "/grants", "doctor", &doctor, Some(&body)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(grant.state, "requested");

        let (status, approved): (_, GrantRes) = send(
            &h.app,
            request(
                "POST",
                &format!("/grants/{}/approve", grant.id),
                "patient",
                &patient,
                Some(r#"{"valid_for_hours":24}"#),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approved.state, "active");
        assert!(approved.expires_at.is_some());

        let records_uri = format!("/patients/{patient}/records");
        let (status, records): (_, ListRecordsRes) =
            send(&h.app, request("GET", &records_uri, "doctor", &doctor, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(records.records.is_empty());

        let (status, revoked): (_, GrantRes) = send(
            &h.app,
            request(
                "POST",
                &format!("/grants/{}/revoke", grant.id),
                "patient",
                &patient,
                Some(r#"{"reason":"no longer needed"}"#),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(revoked.revocation_reason.as_deref(), Some("no longer needed"));

        let (status, err): (_, ErrorRes) =
            send(&h.app, request("GET", &records_uri, "doctor", &doctor, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err.kind, "access_denied");

        let (status, trail): (_, AuditTrailRes) = send(
            &h.app,
            request("GET", &format!("/patients/{patient}/audit"), "patient", &patient, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let actions: Vec<_> = trail.entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["request", "approve", "read-allowed", "revoke", "read-denied"]
        );
    }

    #[tokio::test]
    async fn doctors_see_redacted_errors_and_patients_see_detail() {
        let h = harness();
        let doctor = h.doctor.id.to_string();
        let patient = h.patient.id.to_string();
        let body = format!(r#"{{"patient_id":"{patient}"}}"#);
        let (_, grant): (_, GrantRes) = send(
            &h.app,
            request("POST", "/grants", "doctor", &doctor, Some(&body)),
        )
        .await;

        let (status, err): (_, ErrorRes) = send(
            &h.app,
            request(
                "POST",
                &format!("/grants/{}/approve", grant.id),
                "doctor",
                &doctor,
                Some("{}"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err.kind, "access_denied");

        let (status, err): (_, ErrorRes) = send(
            &h.app,
            request("POST", "/grants", "doctor", &doctor, Some(&body)),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err.kind, "duplicate_request");

        let (status, err): (_, ErrorRes) = send(
            &h.app,
            request(
                "POST",
                &format!("/grants/{}/revoke", grant.id),
                "patient",
                &patient,
                Some("{}"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err.kind, "invalid_transition");
    }

    #[tokio::test]
    async fn tag_lookup_and_doctor_directory() {
        let h = harness();
        let doctor = h.doctor.id.to_string();

        let (status, found): (_, PatientRes) = send(
            &h.app,
            request("GET", &format!("/tags/{}", h.patient.tag_id), "doctor", &doctor, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found.id, h.patient.id.to_string());
        assert_eq!(found.masked_national_id.as_deref(), Some("XXXX-4321"));

        let (status, list): (_, ListDoctorsRes) = send(
            &h.app,
            request("GET", "/doctors?search=cardio", "doctor", &doctor, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.doctors.len(), 1);
    }

    #[tokio::test]
    async fn only_admins_trigger_a_sweep() {
        let h = harness();
        let patient = h.patient.id.to_string();

        let (status, err): (_, ErrorRes) = send(
            &h.app,
            request("POST", "/admin/sweep", "patient", &patient, None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err.kind, "forbidden");

        let (status, report): (_, SweepRes) = send(
            &h.app,
            request("POST", "/admin/sweep", "admin", &h.admin.to_string(), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(report.expired.is_empty());
        assert_eq!(report.failed, 0);
    }

    /// Remembers which thread each fetch ran on.
    #[derive(Default)]
    struct ThreadRecorder {
        threads: Mutex<Vec<ThreadId>>,
    }

    impl RecordStorage for ThreadRecorder {
        fn fetch_records(&self, _patient: &PatientId) -> Result<Vec<MedicalRecord>, StorageError> {
            self.threads.lock().unwrap().push(thread::current().id());
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn service_calls_run_off_the_async_worker() {
        let storage = Arc::new(ThreadRecorder::default());
        let h = harness_with(storage.clone());
        let doctor = h.doctor.id.to_string();
        let patient = h.patient.id.to_string();

        let body = format!(r#"{{"patient_id":"{patient}"}}"#);
        let (_, grant): (_, GrantRes) = send(
            &h.app,
            request("POST", "/grants", "doctor", &doctor, Some(&body)),
        )
        .await;
        let approve_uri = format!("/grants/{}/approve", grant.id);
        let (status, _): (_, GrantRes) = send(
            &h.app,
            request("POST", &approve_uri, "patient", &patient, Some("{}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let records_uri = format!("/patients/{patient}/records");
        let (status, _): (_, ListRecordsRes) =
            send(&h.app, request("GET", &records_uri, "doctor", &doctor, None)).await;
        assert_eq!(status, StatusCode::OK);

        let threads = storage.threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], thread::current().id());
    }
}
