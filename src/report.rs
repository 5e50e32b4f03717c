use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::listing::RequestRow;
use crate::models::RequestStatus;
use crate::sla::SlaFlag;

#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceSummary {
    pub met: usize,
    pub missed: usize,
    pub avg_response_days: Option<f64>,
}

impl ComplianceSummary {
    pub fn rate(&self) -> Option<f64> {
        let answered = self.met + self.missed;
        if answered == 0 {
            None
        } else {
            Some(self.met as f64 / answered as f64)
        }
    }
}

pub fn count_by_status(rows: &[RequestRow]) -> Vec<(RequestStatus, usize)> {
    RequestStatus::ALL
        .into_iter()
        .map(|status| {
            let count = rows.iter().filter(|row| row.request.status == status).count();
            (status, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect()
}

pub fn count_by_type(rows: &[RequestRow]) -> Vec<(String, usize)> {
    let mut map: BTreeMap<String, usize> = BTreeMap::new();
    for row in rows {
        *map.entry(row.request.request_type.clone()).or_insert(0) += 1;
    }

    let mut counts: Vec<(String, usize)> = map.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}

pub fn open_flag_mix(rows: &[RequestRow]) -> Vec<(SlaFlag, usize)> {
    let mut map: BTreeMap<SlaFlag, usize> = BTreeMap::new();
    for row in rows.iter().filter(|row| row.request.status.is_open()) {
        if let Some(sla) = &row.sla {
            *map.entry(sla.flag).or_insert(0) += 1;
        }
    }
    // Most severe first.
    map.into_iter().rev().collect()
}

pub fn compliance(rows: &[RequestRow]) -> ComplianceSummary {
    let mut met = 0usize;
    let mut missed = 0usize;
    let mut total_days = 0i64;

    for sla in rows.iter().filter_map(|row| row.sla.as_ref()) {
        match sla.flag {
            SlaFlag::Met => met += 1,
            SlaFlag::Missed => missed += 1,
            _ => continue,
        }
        total_days += i64::from(sla.elapsed_days);
    }

    let answered = met + missed;
    ComplianceSummary {
        met,
        missed,
        avg_response_days: if answered == 0 {
            None
        } else {
            Some(total_days as f64 / answered as f64)
        },
    }
}

pub fn build_report(scope: Option<&str>, today: NaiveDate, rows: &[RequestRow]) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all requests");

    let _ = writeln!(output, "# OIRS Request Report");
    let _ = writeln!(output, "Generated for {} on {}", scope_label, today);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");

    let statuses = count_by_status(rows);
    if statuses.is_empty() {
        let _ = writeln!(output, "No requests recorded.");
    } else {
        for (status, count) in statuses {
            let _ = writeln!(output, "- {}: {}", status, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Request Types");
    let types = count_by_type(rows);
    if types.is_empty() {
        let _ = writeln!(output, "No requests recorded.");
    } else {
        for (name, count) in types {
            let _ = writeln!(output, "- {}: {}", name, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Open Requests by SLA");
    let flags = open_flag_mix(rows);
    if flags.is_empty() {
        let _ = writeln!(output, "No open requests.");
    } else {
        for (flag, count) in flags {
            let _ = writeln!(output, "- {}: {}", flag.label(), count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Response Compliance");
    let summary = compliance(rows);
    match (summary.rate(), summary.avg_response_days) {
        (Some(rate), Some(avg_days)) => {
            let _ = writeln!(
                output,
                "- {} of {} answered within SLA ({:.1}%)",
                summary.met,
                summary.met + summary.missed,
                rate * 100.0
            );
            let _ = writeln!(output, "- Average response time: {:.1} business days", avg_days);
        }
        _ => {
            let _ = writeln!(output, "No answered requests yet.");
        }
    }

    let mut at_risk: Vec<&RequestRow> = rows
        .iter()
        .filter(|row| {
            row.sla
                .as_ref()
                .is_some_and(|sla| matches!(sla.flag, SlaFlag::Overdue | SlaFlag::Critical))
        })
        .collect();
    at_risk.sort_by_key(|row| row.sla.as_ref().map(|sla| sla.remaining_days));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Overdue and Critical");
    if at_risk.is_empty() {
        let _ = writeln!(output, "No requests at risk.");
    } else {
        for row in at_risk.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} [{}] {} ({}): {}",
                row.request.folio,
                row.request.request_type,
                row.request.subject,
                row.request.status,
                row.remaining_label.as_deref().unwrap_or("-")
            );
        }
    }

    let mut responded: Vec<&RequestRow> = rows
        .iter()
        .filter(|row| row.request.responded_at.is_some())
        .collect();
    responded.sort_by(|a, b| b.request.responded_at.cmp(&a.request.responded_at));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Responses");
    if responded.is_empty() {
        let _ = writeln!(output, "No responses recorded.");
    } else {
        for row in responded.iter().take(5) {
            if let Some(responded_at) = row.request.responded_at {
                let _ = writeln!(
                    output,
                    "- {} ({}) on {}: {}",
                    row.request.folio,
                    row.request.citizen.name,
                    responded_at.date_naive(),
                    row.request.response.as_deref().unwrap_or("")
                );
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::build_rows;
    use crate::models::{Citizen, Request, RequestType};
    use crate::sla::Calendar;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn request(seq: i64, kind: &str, status: RequestStatus, responded_day: Option<u32>) -> Request {
        Request {
            id: Uuid::new_v4(),
            folio: format!("OIRS-2026-{seq:06}"),
            submitted_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            request_type: kind.to_string(),
            topic: "Vivienda".to_string(),
            region: "Maule".to_string(),
            citizen: Citizen {
                name: format!("Vecina {seq}"),
                email: format!("vecina{seq}@example.cl"),
                rut: None,
            },
            subject: format!("Solicitud {seq}"),
            description: String::new(),
            status,
            responded_at: responded_day
                .map(|day| Utc.with_ymd_and_hms(2026, 3, day, 15, 0, 0).unwrap()),
            response: responded_day.map(|_| "Gestionado".to_string()),
        }
    }

    fn rows() -> Vec<RequestRow> {
        let types: HashMap<String, RequestType> = [
            RequestType::new("Reclamo", 20, 3, 10).unwrap(),
            RequestType::new("Consulta", 10, 2, 5).unwrap(),
        ]
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect();
        let requests = vec![
            request(1, "Consulta", RequestStatus::EnProceso, None),
            request(2, "Reclamo", RequestStatus::Ingresada, None),
            request(3, "Consulta", RequestStatus::Respondida, Some(6)),
            request(4, "Reclamo", RequestStatus::Cerrada, Some(31)),
        ];
        let today = NaiveDate::from_ymd_opt(2026, 3, 16).unwrap();
        build_rows(requests, &types, today, &Calendar::default())
    }

    #[test]
    fn counts_types_by_volume_then_name() {
        let counts = count_by_type(&rows());
        assert_eq!(
            counts,
            vec![("Consulta".to_string(), 2), ("Reclamo".to_string(), 2)]
        );
    }

    #[test]
    fn compliance_counts_answered_only() {
        let summary = compliance(&rows());
        assert_eq!(summary.met, 1);
        assert_eq!(summary.missed, 1);
        assert_eq!(summary.rate(), Some(0.5));
        // 4 and 21 business days.
        assert_eq!(summary.avg_response_days, Some(12.5));
    }

    #[test]
    fn flag_mix_lists_severe_first() {
        let mix = open_flag_mix(&rows());
        assert_eq!(mix, vec![(SlaFlag::Overdue, 1), (SlaFlag::Attention, 1)]);
    }

    #[test]
    fn report_contains_sections() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 16).unwrap();
        let report = build_report(Some("Maule"), today, &rows());
        assert!(report.starts_with("# OIRS Request Report"));
        assert!(report.contains("Generated for Maule on 2026-03-16"));
        assert!(report.contains("- En proceso: 1"));
        assert!(report.contains("- overdue: 1"));
        assert!(report.contains("1 of 2 answered within SLA (50.0%)"));
        assert!(report.contains(
            "- OIRS-2026-000001 [Consulta] Solicitud 1 (En proceso): Vence hoy"
        ));
        assert!(report.contains("- OIRS-2026-000004 (Vecina 4) on 2026-03-31: Gestionado"));
    }

    #[test]
    fn empty_report_is_explicit() {
        let report = build_report(None, NaiveDate::from_ymd_opt(2026, 3, 16).unwrap(), &[]);
        assert!(report.contains("Generated for all requests"));
        assert!(report.contains("No open requests."));
        assert!(report.contains("No answered requests yet."));
        assert!(report.contains("No requests at risk."));
    }
}
