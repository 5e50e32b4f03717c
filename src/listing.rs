use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::Serialize;

use crate::models::{Request, RequestStatus, RequestType};
use crate::sla::{self, Calendar, SlaFlag, SlaStatus};

pub const MAX_PAGE_SIZE: usize = 100;

/// A request together with its SLA position on the evaluation day.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRow {
    #[serde(flatten)]
    pub request: Request,
    pub sla: Option<SlaStatus>,
    pub remaining_label: Option<String>,
}

pub fn build_rows(
    requests: Vec<Request>,
    types: &HashMap<String, RequestType>,
    today: NaiveDate,
    calendar: &Calendar,
) -> Vec<RequestRow> {
    requests
        .into_iter()
        .map(|request| {
            let sla = types
                .get(&request.request_type)
                .map(|request_type| sla::evaluate(&request, request_type, today, calendar));
            let remaining_label = sla.as_ref().map(SlaStatus::remaining_label);
            RequestRow {
                request,
                sla,
                remaining_label,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SortKey {
    #[default]
    Submitted,
    Folio,
    Remaining,
    Status,
}

#[derive(Debug, Clone)]
pub struct RequestQuery {
    pub status: Option<RequestStatus>,
    pub request_type: Option<String>,
    pub region: Option<String>,
    pub topic: Option<String>,
    pub search: Option<String>,
    pub flag: Option<SlaFlag>,
    pub sort: SortKey,
    pub descending: bool,
    pub page: usize,
    pub page_size: usize,
}

impl Default for RequestQuery {
    fn default() -> Self {
        Self {
            status: None,
            request_type: None,
            region: None,
            topic: None,
            search: None,
            flag: None,
            sort: SortKey::Submitted,
            descending: false,
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

impl RequestQuery {
    pub fn matches(&self, row: &RequestRow) -> bool {
        let request = &row.request;
        if self.status.is_some_and(|status| status != request.status) {
            return false;
        }
        if !eq_filter(&self.request_type, &request.request_type)
            || !eq_filter(&self.region, &request.region)
            || !eq_filter(&self.topic, &request.topic)
        {
            return false;
        }
        if let Some(flag) = self.flag {
            if row.sla.as_ref().map(|sla| sla.flag) != Some(flag) {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                [
                    request.folio.as_str(),
                    request.subject.as_str(),
                    request.citizen.name.as_str(),
                    request.citizen.email.as_str(),
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }

    /// Filters, sorts and cuts out one page of `rows`.
    pub fn apply(&self, rows: Vec<RequestRow>) -> Page<RequestRow> {
        let mut matched: Vec<RequestRow> = rows
            .into_iter()
            .filter(|row| self.matches(row))
            .collect();

        matched.sort_by(|a, b| {
            let ordering = compare(self.sort, a, b);
            if self.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        let page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        let page = self.page.max(1);
        let total = matched.len();
        let total_pages = total.div_ceil(page_size);
        let items = matched
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Page {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}

fn eq_filter(filter: &Option<String>, value: &str) -> bool {
    filter
        .as_deref()
        .map_or(true, |wanted| wanted.eq_ignore_ascii_case(value))
}

fn compare(key: SortKey, a: &RequestRow, b: &RequestRow) -> Ordering {
    let primary = match key {
        SortKey::Submitted => a.request.submitted_at.cmp(&b.request.submitted_at),
        SortKey::Folio => a.request.folio.cmp(&b.request.folio),
        SortKey::Status => a.request.status.cmp(&b.request.status),
        // Rows without SLA data sort after everything else.
        SortKey::Remaining => match (&a.sla, &b.sla) {
            (Some(x), Some(y)) => x.remaining_days.cmp(&y.remaining_days),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    };
    primary.then_with(|| a.request.folio.cmp(&b.request.folio))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Citizen;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn sample(seq: i64, day: u32, kind: &str, region: &str, status: RequestStatus) -> Request {
        Request {
            id: Uuid::new_v4(),
            folio: format!("OIRS-2026-{seq:06}"),
            submitted_at: Utc.with_ymd_and_hms(2026, 3, day, 10, 0, 0).unwrap(),
            request_type: kind.to_string(),
            topic: "Salud".to_string(),
            region: region.to_string(),
            citizen: Citizen {
                name: format!("Ciudadano {seq}"),
                email: format!("persona{seq}@example.cl"),
                rut: None,
            },
            subject: if seq == 3 {
                "Reclamo por cobro indebido".to_string()
            } else {
                "Consulta general".to_string()
            },
            description: String::new(),
            status,
            responded_at: None,
            response: None,
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
            sample(1, 2, "Consulta", "Metropolitana", RequestStatus::EnProceso),
            sample(2, 9, "Reclamo", "Biobío", RequestStatus::Ingresada),
            sample(3, 3, "Reclamo", "Metropolitana", RequestStatus::EnProceso),
            sample(4, 12, "Consulta", "Metropolitana", RequestStatus::Cancelada),
            sample(5, 5, "Sugerencia", "Metropolitana", RequestStatus::Ingresada),
        ];
        let today = NaiveDate::from_ymd_opt(2026, 3, 16).unwrap();
        build_rows(requests, &types, today, &Calendar::default())
    }

    fn folios(page: &Page<RequestRow>) -> Vec<&str> {
        page.items.iter().map(|row| row.request.folio.as_str()).collect()
    }

    #[test]
    fn rows_without_known_type_have_no_sla() {
        let rows = rows();
        assert!(rows[4].sla.is_none());
        assert_eq!(rows[0].remaining_label.as_deref(), Some("Vence hoy"));
    }

    #[test]
    fn filters_combine() {
        let query = RequestQuery {
            region: Some("metropolitana".to_string()),
            status: Some(RequestStatus::EnProceso),
            ..RequestQuery::default()
        };
        let page = query.apply(rows());
        assert_eq!(folios(&page), vec!["OIRS-2026-000001", "OIRS-2026-000003"]);
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let by_subject = RequestQuery {
            search: Some("COBRO".to_string()),
            ..RequestQuery::default()
        };
        assert_eq!(folios(&by_subject.apply(rows())), vec!["OIRS-2026-000003"]);

        let by_email = RequestQuery {
            search: Some("persona4@".to_string()),
            ..RequestQuery::default()
        };
        assert_eq!(folios(&by_email.apply(rows())), vec!["OIRS-2026-000004"]);
    }

    #[test]
    fn flag_filter_uses_sla() {
        let query = RequestQuery {
            flag: Some(SlaFlag::Overdue),
            ..RequestQuery::default()
        };
        assert_eq!(folios(&query.apply(rows())), vec!["OIRS-2026-000001"]);
    }

    #[test]
    fn sorts_by_remaining_with_unknown_last() {
        let query = RequestQuery {
            sort: SortKey::Remaining,
            ..RequestQuery::default()
        };
        let page = query.apply(rows());
        assert_eq!(page.items.first().unwrap().request.folio, "OIRS-2026-000001");
        assert_eq!(page.items.last().unwrap().request.folio, "OIRS-2026-000005");
    }

    #[test]
    fn sorts_by_submitted_descending() {
        let query = RequestQuery {
            descending: true,
            ..RequestQuery::default()
        };
        let page = query.apply(rows());
        assert_eq!(
            folios(&page),
            vec![
                "OIRS-2026-000004",
                "OIRS-2026-000002",
                "OIRS-2026-000005",
                "OIRS-2026-000003",
                "OIRS-2026-000001",
            ]
        );
    }

    #[test]
    fn paginates_and_reports_totals() {
        let query = RequestQuery {
            sort: SortKey::Folio,
            page: 2,
            page_size: 2,
            ..RequestQuery::default()
        };
        let page = query.apply(rows());
        assert_eq!(folios(&page), vec!["OIRS-2026-000003", "OIRS-2026-000004"]);
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);

        let past_end = RequestQuery { page: 9, ..query };
        let page = past_end.apply(rows());
        assert!(page.items.is_empty());
        assert_eq!(page.total, 5);
    }

    #[test]
    fn huge_page_number_yields_empty_page() {
        for page in [usize::MAX / 10, usize::MAX] {
            let query = RequestQuery {
                page,
                page_size: 20,
                ..RequestQuery::default()
            };
            let result = query.apply(rows());
            assert!(result.items.is_empty());
            assert_eq!(result.total, 5);
            assert_eq!(result.total_pages, 1);
            assert_eq!(result.page, page);
        }
    }

    #[test]
    fn page_size_is_clamped() {
        let query = RequestQuery {
            page: 0,
            page_size: 0,
            ..RequestQuery::default()
        };
        let page = query.apply(rows());
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, 1);
        assert_eq!(page.items.len(), 1);

        let huge = RequestQuery {
            page_size: 10_000,
            ..RequestQuery::default()
        };
        assert_eq!(huge.apply(rows()).page_size, MAX_PAGE_SIZE);
    }
}
