use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::{
    auth::AuthUser,
    database::{
        tickets::{CompletionOutcome, CreateTicketRequest, Priority, Ticket},
        users::{Role, User},
    },
    error::{AppError, Result},
    events::Event,
    server::AppState,
};

/// Client-supplied ticket fields. Anything else in the body, including
/// enrichment fields, is ignored.
#[derive(Debug, Deserialize)]
pub struct CreateTicketBody {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<Priority>,
    pub deadline: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBody {
    pub ticket_id: Option<String>,
    pub junior_id: Option<String>,
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC).
fn parse_deadline(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Some(midnight.and_utc()))
        .ok_or_else(|| AppError::BadRequest(format!("Invalid deadline '{}'", raw)))
}

/// POST /api/tickets
pub async fn create_ticket(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: std::result::Result<Json<CreateTicketBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    auth.require_role(&[Role::Senior])?;
    let Json(body) = payload?;

    let title = body.title.trim();
    let description = body.description.trim();
    if title.is_empty() || description.is_empty() {
        return Err(AppError::BadRequest(
            "Title and description are required".to_string(),
        ));
    }

    let ticket = Ticket::create(
        &state.db,
        CreateTicketRequest {
            title: title.to_string(),
            description: description.to_string(),
            priority: body.priority.unwrap_or_default(),
            deadline: parse_deadline(body.deadline.as_deref())?,
            created_by: auth.id.clone(),
        },
    )
    .await?;
    info!(ticket_id = %ticket.id, created_by = %auth.id, "Ticket created");

    state
        .dispatcher
        .publish_detached(Event::ticket_created(&ticket.id), |event, e| {
            error!(event_id = %event.id, event = %event.name, error = %e, "Failed to emit event");
        });

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "ticket": ticket })),
    ))
}

/// GET /api/tickets/me
pub async fn my_tickets(State(state): State<AppState>, auth: AuthUser) -> Result<impl IntoResponse> {
    let tickets = match auth.role {
        Role::Senior => Ticket::list_by_creator(&state.db, &auth.id).await?,
        Role::Junior => Ticket::list_by_assignee(&state.db, &auth.id).await?,
        Role::User => Ticket::list_all(&state.db).await?,
    };
    Ok(Json(json!({ "success": true, "tickets": tickets })))
}

/// GET /api/tickets/all
pub async fn all_tickets(State(state): State<AppState>, auth: AuthUser) -> Result<impl IntoResponse> {
    auth.require_role(&[Role::Senior])?;
    let tickets = Ticket::list_all(&state.db).await?;
    Ok(Json(json!({ "success": true, "tickets": tickets })))
}

/// GET /api/tickets/unassigned
pub async fn unassigned_tickets(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse> {
    auth.require_role(&[Role::Senior])?;
    let tickets = Ticket::list_unassigned(&state.db).await?;
    Ok(Json(json!({ "success": true, "tickets": tickets })))
}

/// GET /api/tickets/juniors
pub async fn available_juniors(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse> {
    auth.require_role(&[Role::Senior])?;
    let juniors = User::list_juniors(&state.db).await?;
    Ok(Json(json!({ "success": true, "juniors": juniors })))
}

/// POST /api/tickets/assign
pub async fn assign_ticket(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: std::result::Result<Json<AssignBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    auth.require_role(&[Role::Senior])?;
    let Json(body) = payload?;

    let (Some(ticket_id), Some(junior_id)) = (
        body.ticket_id.filter(|id| !id.is_empty()),
        body.junior_id.filter(|id| !id.is_empty()),
    ) else {
        return Err(AppError::BadRequest(
            "Ticket ID and Junior ID are required".to_string(),
        ));
    };

    let ticket = Ticket::get_by_id(&state.db, &ticket_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))?;
    if ticket.assigned_to.is_some() {
        return Err(AppError::BadRequest("Ticket is already assigned".to_string()));
    }

    let is_junior = User::get_by_id(&state.db, &junior_id)
        .await?
        .is_some_and(|user| user.role == Role::Junior);
    if !is_junior {
        return Err(AppError::NotFound("Junior not found".to_string()));
    }

    let ticket = Ticket::assign(&state.db, &ticket_id, &junior_id)
        .await?
        .ok_or_else(|| AppError::BadRequest("Ticket is already assigned".to_string()))?;
    info!(ticket_id = %ticket.id, junior_id = %junior_id, "Ticket assigned");

    Ok(Json(json!({
        "success": true,
        "message": "Ticket assigned successfully",
        "ticket": ticket,
    })))
}

/// PATCH /api/tickets/:id/unassign
pub async fn unassign_ticket(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ticket_id): Path<String>,
) -> Result<impl IntoResponse> {
    auth.require_role(&[Role::Senior])?;

    let ticket = Ticket::get_by_id(&state.db, &ticket_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))?;
    if ticket.assigned_to.is_none() {
        return Err(AppError::BadRequest("Ticket is not assigned".to_string()));
    }

    let ticket = Ticket::unassign(&state.db, &ticket_id)
        .await?
        .ok_or_else(|| AppError::BadRequest("Ticket is not assigned".to_string()))?;
    info!(ticket_id = %ticket.id, "Ticket unassigned");

    Ok(Json(json!({
        "success": true,
        "message": "Ticket unassigned successfully",
        "ticket": ticket,
    })))
}

/// PATCH /api/tickets/:id/complete
pub async fn complete_ticket(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ticket_id): Path<String>,
) -> Result<impl IntoResponse> {
    auth.require_role(&[Role::Junior])?;

    match Ticket::complete(&state.db, &ticket_id, &auth.id).await? {
        CompletionOutcome::Completed(ticket) => {
            info!(ticket_id = %ticket.id, junior_id = %auth.id, "Ticket completed");
            Ok(Json(json!({
                "success": true,
                "message": "Ticket marked as completed",
                "ticket": ticket,
            })))
        }
        CompletionOutcome::AlreadyCompleted(ticket) => Ok(Json(json!({
            "success": true,
            "message": "Ticket already completed",
            "ticket": ticket,
        }))),
        CompletionOutcome::NotAssigned => Err(AppError::NotFound(
            "Ticket not found or not assigned to you".to_string(),
        )),
    }
}

/// DELETE /api/tickets/:id
pub async fn delete_ticket(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ticket_id): Path<String>,
) -> Result<impl IntoResponse> {
    auth.require_role(&[Role::Senior])?;

    if !Ticket::delete_by_creator(&state.db, &ticket_id, &auth.id).await? {
        return Err(AppError::NotFound("Ticket not found".to_string()));
    }
    info!(ticket_id = %ticket_id, "Ticket deleted");

    Ok(Json(json!({ "success": true, "message": "Ticket deleted" })))
}
