//! REST handlers.
//!
//! Each handler parses path and body input, calls one [`ConsentService`] operation as the
//! authenticated actor, and converts the result into an `api-shared` response type.

use crate::error::ApiError;
use crate::extract::AuthenticatedActor;
use crate::AppState;
use api_shared::{
    ApproveAccessReq, AuditTrailRes, ErrorRes, GrantRes, HealthRes, HealthService,
    ListDoctorsRes, ListGrantsRes, ListRecordsRes, PatientRes, RequestAccessReq,
    RevokeAccessReq, SweepRes,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use lifetag_core::{Actor, ConsentResult, ConsentService, DoctorId, GrantId, PatientId, TagId};
use serde::Deserialize;
use utoipa::IntoParams;

/// Runs one service call on the blocking pool as `actor`.
///
/// Transitions fsync the journal while holding the grant lock, so no service call runs on an
/// async worker.
async fn blocking<T, F>(state: &AppState, actor: Actor, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ConsentService, &Actor) -> ConsentResult<T> + Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || call(&service, &actor))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, actor = %actor, "service task failed");
            ApiError::internal()
        })?
        .map_err(|e| ApiError::consent(e, &actor))
}

fn grant_id(raw: &str) -> Result<GrantId, ApiError> {
    GrantId::parse(raw).map_err(|_| ApiError::bad_request("invalid grant id"))
}

fn patient_id(raw: &str) -> Result<PatientId, ApiError> {
    PatientId::parse(raw).map_err(|_| ApiError::bad_request("invalid patient id"))
}

fn doctor_id(raw: &str) -> Result<DoctorId, ApiError> {
    DoctorId::parse(raw).map_err(|_| ApiError::bad_request("invalid doctor id"))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers. Needs no credentials.
pub async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/grants",
    request_body = RequestAccessReq,
    responses(
        (status = 201, description = "Access requested", body = GrantRes),
        (status = 403, description = "Not permitted", body = ErrorRes),
        (status = 409, description = "A pending or active grant already exists", body = ErrorRes)
    )
)]
/// A doctor asks a patient for access to their records.
pub async fn request_access(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<RequestAccessReq>,
) -> Result<(StatusCode, Json<GrantRes>), ApiError> {
    let patient = patient_id(&req.patient_id)?;
    let grant = blocking(&state, actor, move |service, actor| {
        service.request_access(actor, &patient)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(grant.into())))
}

#[utoipa::path(
    post,
    path = "/grants/{id}/approve",
    params(("id" = String, Path, description = "Grant id")),
    request_body = ApproveAccessReq,
    responses(
        (status = 200, description = "Grant approved", body = GrantRes),
        (status = 403, description = "Not the owning patient", body = ErrorRes),
        (status = 409, description = "Not pending, or another grant is active", body = ErrorRes)
    )
)]
/// The owning patient approves a pending request.
pub async fn approve_access(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    Json(req): Json<ApproveAccessReq>,
) -> Result<Json<GrantRes>, ApiError> {
    let grant = grant_id(&id)?;
    let valid_for = req
        .valid_for_hours
        .map(|hours| {
            chrono::Duration::try_hours(hours)
                .ok_or_else(|| ApiError::bad_request("valid_for_hours out of range"))
        })
        .transpose()?;
    let approved = blocking(&state, actor, move |service, actor| {
        service.approve_access(actor, &grant, valid_for)
    })
    .await?;
    Ok(Json(approved.into()))
}

#[utoipa::path(
    post,
    path = "/grants/{id}/deny",
    params(("id" = String, Path, description = "Grant id")),
    responses(
        (status = 200, description = "Grant denied", body = GrantRes),
        (status = 403, description = "Not the owning patient", body = ErrorRes),
        (status = 409, description = "Grant is not pending", body = ErrorRes)
    )
)]
pub async fn deny_access(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<GrantRes>, ApiError> {
    let grant = grant_id(&id)?;
    let denied = blocking(&state, actor, move |service, actor| {
        service.deny_access(actor, &grant)
    })
    .await?;
    Ok(Json(denied.into()))
}

#[utoipa::path(
    post,
    path = "/grants/{id}/revoke",
    params(("id" = String, Path, description = "Grant id")),
    request_body = RevokeAccessReq,
    responses(
        (status = 200, description = "Grant revoked", body = GrantRes),
        (status = 403, description = "Not the owning patient or an admin", body = ErrorRes),
        (status = 409, description = "Grant is not active", body = ErrorRes)
    )
)]
/// The owning patient, or an admin, ends an active grant.
pub async fn revoke_access(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    Json(req): Json<RevokeAccessReq>,
) -> Result<Json<GrantRes>, ApiError> {
    let grant = grant_id(&id)?;
    let reason = req.reason;
    let revoked = blocking(&state, actor, move |service, actor| {
        service.revoke_access(actor, &grant, reason.as_deref())
    })
    .await?;
    Ok(Json(revoked.into()))
}

#[utoipa::path(
    post,
    path = "/grants/{id}/withdraw",
    params(("id" = String, Path, description = "Grant id")),
    responses(
        (status = 200, description = "Request withdrawn", body = GrantRes),
        (status = 403, description = "Not the requesting doctor", body = ErrorRes),
        (status = 409, description = "Grant is not pending", body = ErrorRes)
    )
)]
pub async fn withdraw_request(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<GrantRes>, ApiError> {
    let grant = grant_id(&id)?;
    let withdrawn = blocking(&state, actor, move |service, actor| {
        service.withdraw_request(actor, &grant)
    })
    .await?;
    Ok(Json(withdrawn.into()))
}

#[utoipa::path(
    get,
    path = "/grants/{id}",
    params(("id" = String, Path, description = "Grant id")),
    responses(
        (status = 200, description = "Grant", body = GrantRes),
        (status = 403, description = "Not a party to the grant", body = ErrorRes),
        (status = 404, description = "Unknown grant", body = ErrorRes)
    )
)]
pub async fn get_grant(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<GrantRes>, ApiError> {
    let grant = grant_id(&id)?;
    let found = blocking(&state, actor, move |service, actor| {
        service.get_grant(actor, &grant)
    })
    .await?;
    Ok(Json(found.into()))
}

#[utoipa::path(
    get,
    path = "/grants/{id}/audit",
    params(("id" = String, Path, description = "Grant id")),
    responses(
        (status = 200, description = "Audit entries for the grant", body = AuditTrailRes),
        (status = 403, description = "Not the owning patient or an admin", body = ErrorRes)
    )
)]
pub async fn grant_audit_trail(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<AuditTrailRes>, ApiError> {
    let grant = grant_id(&id)?;
    let entries = blocking(&state, actor, move |service, actor| {
        service.get_grant_audit_trail(actor, &grant)
    })
    .await?;
    Ok(Json(AuditTrailRes {
        entries: entries.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/grants",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Grants, newest first", body = ListGrantsRes),
        (status = 403, description = "Not the patient or an admin", body = ErrorRes)
    )
)]
pub async fn list_patient_grants(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<ListGrantsRes>, ApiError> {
    let patient = patient_id(&id)?;
    let grants = blocking(&state, actor, move |service, actor| {
        service.list_grants_for_patient(actor, &patient)
    })
    .await?;
    Ok(Json(ListGrantsRes {
        grants: grants.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/doctors/{id}/grants",
    params(("id" = String, Path, description = "Doctor id")),
    responses(
        (status = 200, description = "Grants, newest first", body = ListGrantsRes),
        (status = 403, description = "Not the doctor or an admin", body = ErrorRes)
    )
)]
pub async fn list_doctor_grants(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<ListGrantsRes>, ApiError> {
    let doctor = doctor_id(&id)?;
    let grants = blocking(&state, actor, move |service, actor| {
        service.list_grants_for_doctor(actor, &doctor)
    })
    .await?;
    Ok(Json(ListGrantsRes {
        grants: grants.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/records",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "The patient's records", body = ListRecordsRes),
        (status = 403, description = "Access denied", body = ErrorRes),
        (status = 502, description = "Record storage failed", body = ErrorRes)
    )
)]
/// A doctor reads a patient's records. Every call is audited, allowed or not.
pub async fn read_records(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<ListRecordsRes>, ApiError> {
    let patient = patient_id(&id)?;
    let records = blocking(&state, actor, move |service, actor| {
        service.read_records(actor, &patient)
    })
    .await?;
    Ok(Json(ListRecordsRes {
        patient_id: patient.to_string(),
        records: records.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/audit",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Audit entries in append order", body = AuditTrailRes),
        (status = 403, description = "Not the patient or an admin", body = ErrorRes)
    )
)]
pub async fn patient_audit_trail(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<AuditTrailRes>, ApiError> {
    let patient = patient_id(&id)?;
    let entries = blocking(&state, actor, move |service, actor| {
        service.get_audit_trail(actor, &patient)
    })
    .await?;
    Ok(Json(AuditTrailRes {
        entries: entries.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/tags/{tag}",
    params(("tag" = String, Path, description = "Patient tag, e.g. LT-7K3M-Q9XZ-2B4D")),
    responses(
        (status = 200, description = "Patient holding the tag", body = PatientRes),
        (status = 403, description = "Not permitted", body = ErrorRes),
        (status = 404, description = "Unknown tag", body = ErrorRes)
    )
)]
pub async fn find_patient_by_tag(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(tag): Path<String>,
) -> Result<Json<PatientRes>, ApiError> {
    let tag = TagId::parse(&tag).map_err(|_| ApiError::bad_request("invalid tag"))?;
    let patient = blocking(&state, actor, move |service, actor| {
        service.find_patient_by_tag(actor, &tag)
    })
    .await?;
    Ok(Json(patient.into()))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DoctorSearch {
    /// Case-insensitive match on name, specialization, hospital, or department.
    pub search: Option<String>,
}

#[utoipa::path(
    get,
    path = "/doctors",
    params(DoctorSearch),
    responses(
        (status = 200, description = "Eligible doctors by name", body = ListDoctorsRes)
    )
)]
pub async fn list_doctors(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<DoctorSearch>,
) -> Result<Json<ListDoctorsRes>, ApiError> {
    let doctors = blocking(&state, actor, move |service, _| {
        Ok(service.list_eligible_doctors(query.search.as_deref()))
    })
    .await?;
    Ok(Json(ListDoctorsRes {
        doctors: doctors.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/admin/sweep",
    responses(
        (status = 200, description = "Overdue grants expired", body = SweepRes),
        (status = 403, description = "Not an admin", body = ErrorRes)
    )
)]
/// Runs one expiry sweep immediately.
pub async fn run_sweep(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<SweepRes>, ApiError> {
    let report = blocking(&state, actor, |service, actor| service.sweep_as(actor)).await?;
    Ok(Json(report.into()))
}
