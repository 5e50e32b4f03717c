use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::OirsError;
use crate::models::{Request, RequestStatus, RequestType, StatusEvent};
use crate::sla::{self, Calendar, SlaFlag};

/// Statuses reachable from `from` in one step.
pub fn allowed_targets(from: RequestStatus) -> &'static [RequestStatus] {
    use RequestStatus::*;
    match from {
        Ingresada => &[EnProceso, EnProcesoUrgente, Cancelada],
        EnProceso => &[EnProcesoUrgente, Respondida, Cancelada],
        EnProcesoUrgente => &[Respondida, Cancelada],
        Respondida => &[Cerrada, EnProceso],
        Cerrada | Cancelada => &[],
    }
}

pub fn can_transition(from: RequestStatus, to: RequestStatus) -> bool {
    !from.is_terminal() && allowed_targets(from).contains(&to)
}

/// Moves `request` to `to`, returning the event to record.
///
/// Answering goes through [`respond`] so the response text is never lost;
/// reopening a `Respondida` request clears the previous answer.
pub fn transition(
    request: &mut Request,
    to: RequestStatus,
    note: Option<String>,
    at: DateTime<Utc>,
) -> Result<StatusEvent, OirsError> {
    if to == RequestStatus::Respondida {
        let response = note.unwrap_or_default();
        return respond(request, response, at);
    }
    apply(request, to, note, at)
}

pub fn respond(
    request: &mut Request,
    response: String,
    at: DateTime<Utc>,
) -> Result<StatusEvent, OirsError> {
    if response.trim().is_empty() {
        return Err(OirsError::EmptyResponse(request.folio.clone()));
    }
    let event = apply(request, RequestStatus::Respondida, None, at)?;
    request.responded_at = Some(at);
    request.response = Some(response);
    Ok(event)
}

fn apply(
    request: &mut Request,
    to: RequestStatus,
    note: Option<String>,
    at: DateTime<Utc>,
) -> Result<StatusEvent, OirsError> {
    let from = request.status;
    if !can_transition(from, to) {
        return Err(OirsError::InvalidTransition {
            folio: request.folio.clone(),
            from,
            to,
        });
    }

    if from == RequestStatus::Respondida && to == RequestStatus::EnProceso {
        request.responded_at = None;
        request.response = None;
    }
    request.status = to;

    log::debug!(
        "request {} staged {} -> {}",
        request.folio,
        from.as_str(),
        to.as_str()
    );

    Ok(StatusEvent {
        request_id: request.id,
        from: Some(from),
        to,
        note,
        at,
    })
}

/// Moves every overdue `Ingresada` / `EnProceso` request to
/// `EnProcesoUrgente`. Requests whose type is missing from `types` are left
/// alone. Running it twice produces no further events.
pub fn escalate(
    requests: &mut [Request],
    types: &HashMap<String, RequestType>,
    at: DateTime<Utc>,
    calendar: &Calendar,
) -> Vec<StatusEvent> {
    let today = at.date_naive();
    let mut events = Vec::new();

    for request in requests.iter_mut() {
        if !matches!(
            request.status,
            RequestStatus::Ingresada | RequestStatus::EnProceso
        ) {
            continue;
        }
        let Some(request_type) = types.get(&request.request_type) else {
            log::warn!(
                "request {} has unknown type {}, skipping escalation",
                request.folio,
                request.request_type
            );
            continue;
        };

        let status = sla::evaluate(request, request_type, today, calendar);
        if status.flag != SlaFlag::Overdue {
            continue;
        }

        let note = format!("SLA vencido: {}", status.remaining_label());
        match apply(request, RequestStatus::EnProcesoUrgente, Some(note), at) {
            Ok(event) => events.push(event),
            Err(err) => log::warn!("escalation skipped: {err}"),
        }
    }

    events
}
