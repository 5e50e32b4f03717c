use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OirsError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum RequestStatus {
    Ingresada,
    EnProceso,
    EnProcesoUrgente,
    Respondida,
    Cerrada,
    Cancelada,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Ingresada,
        RequestStatus::EnProceso,
        RequestStatus::EnProcesoUrgente,
        RequestStatus::Respondida,
        RequestStatus::Cerrada,
        RequestStatus::Cancelada,
    ];

    /// Storage form, as kept in the `status` columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Ingresada => "ingresada",
            RequestStatus::EnProceso => "en_proceso",
            RequestStatus::EnProcesoUrgente => "en_proceso_urgente",
            RequestStatus::Respondida => "respondida",
            RequestStatus::Cerrada => "cerrada",
            RequestStatus::Cancelada => "cancelada",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RequestStatus::Ingresada => "Ingresada",
            RequestStatus::EnProceso => "En proceso",
            RequestStatus::EnProcesoUrgente => "En proceso (urgente)",
            RequestStatus::Respondida => "Respondida",
            RequestStatus::Cerrada => "Cerrada",
            RequestStatus::Cancelada => "Cancelada",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Cerrada | RequestStatus::Cancelada)
    }

    /// Still waiting on a response from staff.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            RequestStatus::Ingresada | RequestStatus::EnProceso | RequestStatus::EnProcesoUrgente
        )
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, RequestStatus::Respondida | RequestStatus::Cerrada)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RequestStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| anyhow::anyhow!("unknown request status: {value}"))
    }
}

/// A kind of citizen request and its SLA thresholds, in business days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestType {
    pub name: String,
    pub max_days: i32,
    pub critical_days: i32,
    pub attention_days: i32,
}

impl RequestType {
    pub fn new(
        name: impl Into<String>,
        max_days: i32,
        critical_days: i32,
        attention_days: i32,
    ) -> Result<Self, OirsError> {
        let request_type = RequestType {
            name: name.into(),
            max_days,
            critical_days,
            attention_days,
        };
        request_type.validate()?;
        Ok(request_type)
    }

    pub fn validate(&self) -> Result<(), OirsError> {
        let ordered = 0 <= self.critical_days
            && self.critical_days <= self.attention_days
            && self.attention_days <= self.max_days;
        if ordered && self.max_days > 0 && !self.name.trim().is_empty() {
            return Ok(());
        }
        Err(OirsError::InvalidThresholds {
            name: self.name.clone(),
            max: self.max_days,
            critical: self.critical_days,
            attention: self.attention_days,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citizen {
    pub name: String,
    pub email: String,
    pub rut: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub folio: String,
    pub submitted_at: DateTime<Utc>,
    pub request_type: String,
    pub topic: String,
    pub region: String,
    pub citizen: Citizen,
    pub subject: String,
    pub description: String,
    pub status: RequestStatus,
    pub responded_at: Option<DateTime<Utc>>,
    pub response: Option<String>,
}

/// Fields a citizen provides when submitting a request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub submitted_at: DateTime<Utc>,
    pub request_type: String,
    pub topic: String,
    pub region: String,
    pub citizen: Citizen,
    pub subject: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub request_id: Uuid,
    pub from: Option<RequestStatus>,
    pub to: RequestStatus,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MaintainerTable {
    Region,
    Gender,
    Topic,
    Channel,
}

impl MaintainerTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintainerTable::Region => "region",
            MaintainerTable::Gender => "gender",
            MaintainerTable::Topic => "topic",
            MaintainerTable::Channel => "channel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintainerItem {
    pub id: i64,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: String,
}

pub fn format_folio(submitted_at: DateTime<Utc>, sequence: i64) -> String {
    format!("OIRS-{}-{:06}", submitted_at.year(), sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in RequestStatus::ALL {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("pendiente".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn only_closed_and_cancelled_are_terminal() {
        let terminal: Vec<_> = RequestStatus::ALL
            .into_iter()
            .filter(RequestStatus::is_terminal)
            .collect();
        assert_eq!(terminal, vec![RequestStatus::Cerrada, RequestStatus::Cancelada]);
    }

    #[test]
    fn thresholds_must_be_ordered() {
        assert!(RequestType::new("Reclamo", 20, 3, 10).is_ok());
        assert!(RequestType::new("Consulta", 10, 10, 10).is_ok());
        assert!(RequestType::new("Reclamo", 20, 11, 10).is_err());
        assert!(RequestType::new("Reclamo", 8, 3, 10).is_err());
        assert!(RequestType::new("Reclamo", 0, 0, 0).is_err());
        assert!(RequestType::new("Reclamo", 10, -1, 5).is_err());
        assert!(RequestType::new("  ", 10, 1, 5).is_err());
    }

    #[test]
    fn folio_is_year_and_padded_sequence() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        assert_eq!(format_folio(at, 42), "OIRS-2026-000042");
    }
}
