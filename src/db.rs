use std::collections::HashMap;
use std::io::Read;

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::OirsError;
use crate::lifecycle;
use crate::models::{
    format_folio, Citizen, Holiday, MaintainerItem, MaintainerTable, NewRequest, Request,
    RequestStatus, RequestType, StatusEvent,
};

const REQUEST_COLUMNS: &str = "id, folio, submitted_at, request_type, topic, region, \
     citizen_name, citizen_email, citizen_rut, subject, description, status, \
     responded_at, response";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let types = [
        ("Reclamo", 20, 3, 10),
        ("Consulta", 10, 2, 5),
        ("Sugerencia", 15, 3, 7),
        ("Felicitación", 15, 3, 7),
    ];
    for (name, max_days, critical_days, attention_days) in types {
        let request_type = RequestType::new(name, max_days, critical_days, attention_days)?;
        sqlx::query(
            r#"
            INSERT INTO oirs.request_types (name, max_days, critical_days, attention_days)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&request_type.name)
        .bind(request_type.max_days)
        .bind(request_type.critical_days)
        .bind(request_type.attention_days)
        .execute(pool)
        .await?;
    }

    let lookups = [
        (
            MaintainerTable::Region,
            vec!["Metropolitana", "Valparaíso", "Biobío", "Maule", "Araucanía"],
        ),
        (
            MaintainerTable::Gender,
            vec!["Femenino", "Masculino", "No binario", "Prefiere no decir"],
        ),
        (
            MaintainerTable::Topic,
            vec!["Atención", "Trámites", "Pagos", "Infraestructura"],
        ),
        (
            MaintainerTable::Channel,
            vec!["Web", "Presencial", "Teléfono", "Correo"],
        ),
    ];
    for (table, values) in lookups {
        for value in values {
            sqlx::query(
                r#"
                INSERT INTO oirs.maintainer_items (table_name, value)
                VALUES ($1, $2)
                ON CONFLICT (table_name, value) DO NOTHING
                "#,
            )
            .bind(table.as_str())
            .bind(value)
            .execute(pool)
            .await?;
        }
    }

    let holidays = [
        (NaiveDate::from_ymd_opt(2026, 1, 1), "Año Nuevo"),
        (NaiveDate::from_ymd_opt(2026, 4, 3), "Viernes Santo"),
        (NaiveDate::from_ymd_opt(2026, 5, 1), "Día del Trabajo"),
        (NaiveDate::from_ymd_opt(2026, 5, 21), "Glorias Navales"),
        (NaiveDate::from_ymd_opt(2026, 9, 18), "Independencia Nacional"),
        (NaiveDate::from_ymd_opt(2026, 9, 19), "Glorias del Ejército"),
        (NaiveDate::from_ymd_opt(2026, 12, 25), "Navidad"),
    ];
    for (date, name) in holidays {
        let date = date.context("invalid date")?;
        sqlx::query(
            "INSERT INTO oirs.holidays (date, name) VALUES ($1, $2) ON CONFLICT (date) DO NOTHING",
        )
        .bind(date)
        .bind(name)
        .execute(pool)
        .await?;
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for sample in SAMPLE_REQUESTS {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM oirs.requests WHERE citizen_email = $1 AND subject = $2)",
        )
        .bind(sample.email)
        .bind(sample.subject)
        .fetch_one(&mut *tx)
        .await?;
        if exists {
            log::debug!("sample request {:?} already present", sample.subject);
            continue;
        }

        let sequence: i64 = sqlx::query_scalar("SELECT nextval('oirs.folio_seq')")
            .fetch_one(&mut *tx)
            .await?;
        let (request, events) = build_sample_request(&sample, sequence, now)?;
        if insert_request_record(&mut tx, &request, &events).await? {
            inserted += 1;
        }
    }
    tx.commit().await?;

    Ok(inserted)
}

struct SampleRequest {
    kind: &'static str,
    topic: &'static str,
    region: &'static str,
    subject: &'static str,
    name: &'static str,
    email: &'static str,
    rut: Option<&'static str>,
    days_ago: i64,
    target: RequestStatus,
}

const SAMPLE_REQUESTS: [SampleRequest; 4] = [
    SampleRequest {
        kind: "Reclamo",
        topic: "Atención",
        region: "Metropolitana",
        subject: "Demora en atención presencial",
        name: "Camila Rojas",
        email: "camila.rojas@example.cl",
        rut: Some("15.234.876-2"),
        days_ago: 25,
        target: RequestStatus::EnProceso,
    },
    SampleRequest {
        kind: "Consulta",
        topic: "Trámites",
        region: "Valparaíso",
        subject: "Plazo de emisión de certificado",
        name: "Diego Fuentes",
        email: "diego.fuentes@example.cl",
        rut: None,
        days_ago: 6,
        target: RequestStatus::Ingresada,
    },
    SampleRequest {
        kind: "Sugerencia",
        topic: "Infraestructura",
        region: "Biobío",
        subject: "Más estacionamientos en la oficina",
        name: "Valentina Soto",
        email: "valentina.soto@example.cl",
        rut: Some("18.765.432-1"),
        days_ago: 12,
        target: RequestStatus::Respondida,
    },
    SampleRequest {
        kind: "Felicitación",
        topic: "Atención",
        region: "Maule",
        subject: "Excelente atención telefónica",
        name: "Matías Herrera",
        email: "matias.herrera@example.cl",
        rut: None,
        days_ago: 3,
        target: RequestStatus::Cerrada,
    },
];

/// Builds a sample request walked through the lifecycle up to its target
/// status, with the events that got it there.
fn build_sample_request(
    sample: &SampleRequest,
    sequence: i64,
    now: DateTime<Utc>,
) -> Result<(Request, Vec<StatusEvent>), OirsError> {
    let submitted_at = now - Duration::days(sample.days_ago);
    let mut request = Request {
        id: Uuid::new_v4(),
        folio: format_folio(submitted_at, sequence),
        submitted_at,
        request_type: sample.kind.to_string(),
        topic: sample.topic.to_string(),
        region: sample.region.to_string(),
        citizen: Citizen {
            name: sample.name.to_string(),
            email: sample.email.to_string(),
            rut: sample.rut.map(str::to_string),
        },
        subject: sample.subject.to_string(),
        description: format!("{}. Ingresado desde el portal ciudadano.", sample.subject),
        status: RequestStatus::Ingresada,
        responded_at: None,
        response: None,
    };

    let mut events = vec![submission_event(&request)];
    let step = submitted_at + Duration::days(1);
    if sample.target != RequestStatus::Ingresada {
        events.push(lifecycle::transition(
            &mut request,
            RequestStatus::EnProceso,
            None,
            step,
        )?);
    }
    if matches!(
        sample.target,
        RequestStatus::Respondida | RequestStatus::Cerrada
    ) {
        let answer = "Gracias por su mensaje, fue derivado al área correspondiente.".to_string();
        events.push(lifecycle::respond(
            &mut request,
            answer,
            step + Duration::hours(4),
        )?);
    }
    if sample.target == RequestStatus::Cerrada {
        events.push(lifecycle::transition(
            &mut request,
            RequestStatus::Cerrada,
            None,
            step + Duration::days(1),
        )?);
    }

    Ok((request, events))
}

fn submission_event(request: &Request) -> StatusEvent {
    StatusEvent {
        request_id: request.id,
        from: None,
        to: RequestStatus::Ingresada,
        note: Some("Ingreso de solicitud".to_string()),
        at: request.submitted_at,
    }
}

/// Inserts a fully built request and its history. Returns `false` when the
/// folio already exists.
async fn insert_request_record(
    conn: &mut PgConnection,
    request: &Request,
    events: &[StatusEvent],
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO oirs.requests
        (id, folio, submitted_at, request_type, topic, region, citizen_name,
         citizen_email, citizen_rut, subject, description, status, responded_at, response)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (folio) DO NOTHING
        "#,
    )
    .bind(request.id)
    .bind(&request.folio)
    .bind(request.submitted_at)
    .bind(&request.request_type)
    .bind(&request.topic)
    .bind(&request.region)
    .bind(&request.citizen.name)
    .bind(&request.citizen.email)
    .bind(&request.citizen.rut)
    .bind(&request.subject)
    .bind(&request.description)
    .bind(request.status.as_str())
    .bind(request.responded_at)
    .bind(&request.response)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    for event in events {
        insert_event(&mut *conn, event).await?;
    }
    if let Some(sequence) = parse_folio_sequence(&request.folio) {
        sqlx::query(
            "SELECT setval('oirs.folio_seq', $1) WHERE $1 >= (SELECT last_value FROM oirs.folio_seq)",
        )
        .bind(sequence)
        .execute(&mut *conn)
        .await?;
    }

    Ok(true)
}

async fn insert_event(conn: &mut PgConnection, event: &StatusEvent) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO oirs.status_events (request_id, from_status, to_status, note, at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(event.request_id)
    .bind(event.from.map(|status| status.as_str()))
    .bind(event.to.as_str())
    .bind(&event.note)
    .bind(event.at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Numeric tail of a folio such as `OIRS-2026-000042`.
pub fn parse_folio_sequence(folio: &str) -> Option<i64> {
    folio.rsplit('-').next()?.parse().ok().filter(|seq| *seq > 0)
}

async fn ensure_type_exists(conn: &mut PgConnection, name: &str) -> anyhow::Result<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM oirs.request_types WHERE name = $1)")
            .bind(name)
            .fetch_one(conn)
            .await?;
    if !exists {
        return Err(OirsError::UnknownRequestType(name.to_string()).into());
    }
    Ok(())
}

pub async fn submit_request(pool: &PgPool, new: NewRequest) -> anyhow::Result<Request> {
    let mut tx = pool.begin().await?;
    ensure_type_exists(&mut tx, &new.request_type).await?;

    let sequence: i64 = sqlx::query_scalar("SELECT nextval('oirs.folio_seq')")
        .fetch_one(&mut *tx)
        .await?;
    let request = Request {
        id: Uuid::new_v4(),
        folio: format_folio(new.submitted_at, sequence),
        submitted_at: new.submitted_at,
        request_type: new.request_type,
        topic: new.topic,
        region: new.region,
        citizen: new.citizen,
        subject: new.subject,
        description: new.description,
        status: RequestStatus::Ingresada,
        responded_at: None,
        response: None,
    };

    let event = submission_event(&request);
    if !insert_request_record(&mut tx, &request, &[event]).await? {
        return Err(OirsError::Duplicate {
            resource: "request",
            key: request.folio,
        }
        .into());
    }
    tx.commit().await?;

    log::info!("request {} submitted ({})", request.folio, request.request_type);
    Ok(request)
}

fn request_from_row(row: &PgRow) -> anyhow::Result<Request> {
    let status: String = row.try_get("status")?;
    Ok(Request {
        id: row.try_get("id")?,
        folio: row.try_get("folio")?,
        submitted_at: row.try_get("submitted_at")?,
        request_type: row.try_get("request_type")?,
        topic: row.try_get("topic")?,
        region: row.try_get("region")?,
        citizen: Citizen {
            name: row.try_get("citizen_name")?,
            email: row.try_get("citizen_email")?,
            rut: row.try_get("citizen_rut")?,
        },
        subject: row.try_get("subject")?,
        description: row.try_get("description")?,
        status: status.parse()?,
        responded_at: row.try_get("responded_at")?,
        response: row.try_get("response")?,
    })
}

pub async fn fetch_requests(pool: &PgPool) -> anyhow::Result<Vec<Request>> {
    let query = format!("SELECT {REQUEST_COLUMNS} FROM oirs.requests ORDER BY submitted_at");
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    rows.iter().map(request_from_row).collect()
}

pub async fn fetch_request(pool: &PgPool, folio: &str) -> anyhow::Result<Request> {
    let query = format!("SELECT {REQUEST_COLUMNS} FROM oirs.requests WHERE folio = $1");
    let row = sqlx::query(&query)
        .bind(folio)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| OirsError::NotFound {
            resource: "request",
            key: folio.to_string(),
        })?;
    request_from_row(&row)
}

pub async fn fetch_events(pool: &PgPool, request_id: Uuid) -> anyhow::Result<Vec<StatusEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT request_id, from_status, to_status, note, at
        FROM oirs.status_events
        WHERE request_id = $1
        ORDER BY at, id
        "#,
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;

    let mut events = Vec::new();
    for row in rows {
        let from: Option<String> = row.try_get("from_status")?;
        let to: String = row.try_get("to_status")?;
        events.push(StatusEvent {
            request_id: row.try_get("request_id")?,
            from: from.map(|status| status.parse::<RequestStatus>()).transpose()?,
            to: to.parse()?,
            note: row.try_get("note")?,
            at: row.try_get("at")?,
        });
    }
    Ok(events)
}

/// Locks the request row, applies `change` and stores the outcome with its
/// event in the same transaction.
pub async fn change_status<F>(pool: &PgPool, folio: &str, change: F) -> anyhow::Result<Request>
where
    F: FnOnce(&mut Request) -> Result<StatusEvent, OirsError>,
{
    let mut tx = pool.begin().await?;
    let query = format!("SELECT {REQUEST_COLUMNS} FROM oirs.requests WHERE folio = $1 FOR UPDATE");
    let row = sqlx::query(&query)
        .bind(folio)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| OirsError::NotFound {
            resource: "request",
            key: folio.to_string(),
        })?;
    let mut request = request_from_row(&row)?;

    let event = change(&mut request)?;
    store_status(&mut tx, &request).await?;
    insert_event(&mut tx, &event).await?;
    tx.commit().await?;

    log_saved_event(&request.folio, &event);

    Ok(request)
}

async fn store_status(conn: &mut PgConnection, request: &Request) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE oirs.requests
        SET status = $2, responded_at = $3, response = $4, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(request.id)
    .bind(request.status.as_str())
    .bind(request.responded_at)
    .bind(&request.response)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Persists escalation events computed outside a lock. A request whose
/// status moved in the meantime is skipped.
pub async fn save_escalations(pool: &PgPool, events: &[StatusEvent]) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;
    let mut saved = Vec::new();

    for event in events {
        let Some(from) = event.from else { continue };
        let result = sqlx::query(
            "UPDATE oirs.requests SET status = $3, updated_at = now() WHERE id = $1 AND status = $2",
        )
        .bind(event.request_id)
        .bind(from.as_str())
        .bind(event.to.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            log::warn!("request {} changed during escalation, skipped", event.request_id);
            continue;
        }
        insert_event(&mut tx, event).await?;
        saved.push(event);
    }

    tx.commit().await?;
    for event in &saved {
        log_saved_event(&event.request_id.to_string(), event);
    }
    Ok(saved.len())
}

fn log_saved_event(key: &str, event: &StatusEvent) {
    log::info!(
        "request {} moved {} -> {}",
        key,
        event.from.map_or("-", |status| status.as_str()),
        event.to.as_str()
    );
}

pub async fn fetch_types(pool: &PgPool) -> anyhow::Result<Vec<RequestType>> {
    let rows = sqlx::query(
        "SELECT name, max_days, critical_days, attention_days FROM oirs.request_types ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    let mut types = Vec::new();
    for row in rows {
        types.push(RequestType {
            name: row.try_get("name")?,
            max_days: row.try_get("max_days")?,
            critical_days: row.try_get("critical_days")?,
            attention_days: row.try_get("attention_days")?,
        });
    }
    Ok(types)
}

pub async fn fetch_type_map(pool: &PgPool) -> anyhow::Result<HashMap<String, RequestType>> {
    Ok(fetch_types(pool)
        .await?
        .into_iter()
        .map(|request_type| (request_type.name.clone(), request_type))
        .collect())
}

pub async fn insert_type(pool: &PgPool, request_type: &RequestType) -> anyhow::Result<()> {
    request_type.validate()?;
    let result = sqlx::query(
        r#"
        INSERT INTO oirs.request_types (name, max_days, critical_days, attention_days)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO NOTHING
        "#,
    )
    .bind(&request_type.name)
    .bind(request_type.max_days)
    .bind(request_type.critical_days)
    .bind(request_type.attention_days)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(OirsError::Duplicate {
            resource: "request type",
            key: request_type.name.clone(),
        }
        .into());
    }
    log::info!("request type {} added", request_type.name);
    Ok(())
}

pub async fn update_type(pool: &PgPool, request_type: &RequestType) -> anyhow::Result<()> {
    request_type.validate()?;
    let result = sqlx::query(
        r#"
        UPDATE oirs.request_types
        SET max_days = $2, critical_days = $3, attention_days = $4
        WHERE name = $1
        "#,
    )
    .bind(&request_type.name)
    .bind(request_type.max_days)
    .bind(request_type.critical_days)
    .bind(request_type.attention_days)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(OirsError::NotFound {
            resource: "request type",
            key: request_type.name.clone(),
        }
        .into());
    }
    log::info!("request type {} updated", request_type.name);
    Ok(())
}

pub async fn delete_type(pool: &PgPool, name: &str) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM oirs.requests WHERE request_type = $1")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
    if count > 0 {
        return Err(OirsError::InUse {
            resource: "request type",
            key: name.to_string(),
            count,
        }
        .into());
    }

    let result = sqlx::query("DELETE FROM oirs.request_types WHERE name = $1")
        .bind(name)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(OirsError::NotFound {
            resource: "request type",
            key: name.to_string(),
        }
        .into());
    }
    tx.commit().await?;

    log::info!("request type {name} removed");
    Ok(())
}

pub async fn fetch_items(
    pool: &PgPool,
    table: MaintainerTable,
) -> anyhow::Result<Vec<MaintainerItem>> {
    let rows = sqlx::query(
        "SELECT id, value FROM oirs.maintainer_items WHERE table_name = $1 ORDER BY value",
    )
    .bind(table.as_str())
    .fetch_all(pool)
    .await?;

    let mut items = Vec::new();
    for row in rows {
        items.push(MaintainerItem {
            id: row.try_get("id")?,
            value: row.try_get("value")?,
        });
    }
    Ok(items)
}

pub async fn insert_item(
    pool: &PgPool,
    table: MaintainerTable,
    value: &str,
) -> anyhow::Result<MaintainerItem> {
    let value = value.trim();
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO oirs.maintainer_items (table_name, value)
        VALUES ($1, $2)
        ON CONFLICT (table_name, value) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(table.as_str())
    .bind(value)
    .fetch_optional(pool)
    .await?;

    let id = id.ok_or_else(|| OirsError::Duplicate {
        resource: table.as_str(),
        key: value.to_string(),
    })?;
    log::info!("{} {value} added", table.as_str());
    Ok(MaintainerItem {
        id,
        value: value.to_string(),
    })
}

pub async fn rename_item(
    pool: &PgPool,
    table: MaintainerTable,
    old_value: &str,
    new_value: &str,
) -> anyhow::Result<()> {
    let new_value = new_value.trim();
    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM oirs.maintainer_items WHERE table_name = $1 AND value = $2)",
    )
    .bind(table.as_str())
    .bind(new_value)
    .fetch_one(pool)
    .await?;
    if taken {
        return Err(OirsError::Duplicate {
            resource: table.as_str(),
            key: new_value.to_string(),
        }
        .into());
    }

    let result = sqlx::query(
        "UPDATE oirs.maintainer_items SET value = $3 WHERE table_name = $1 AND value = $2",
    )
    .bind(table.as_str())
    .bind(old_value)
    .bind(new_value)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(OirsError::NotFound {
            resource: table.as_str(),
            key: old_value.to_string(),
        }
        .into());
    }

    log::info!("{} {old_value} renamed to {new_value}", table.as_str());
    Ok(())
}

pub async fn delete_item(
    pool: &PgPool,
    table: MaintainerTable,
    value: &str,
) -> anyhow::Result<()> {
    let result =
        sqlx::query("DELETE FROM oirs.maintainer_items WHERE table_name = $1 AND value = $2")
            .bind(table.as_str())
            .bind(value)
            .execute(pool)
            .await?;
    if result.rows_affected() == 0 {
        return Err(OirsError::NotFound {
            resource: table.as_str(),
            key: value.to_string(),
        }
        .into());
    }
    log::info!("{} {value} removed", table.as_str());
    Ok(())
}

pub async fn fetch_holidays(pool: &PgPool) -> anyhow::Result<Vec<Holiday>> {
    let rows = sqlx::query("SELECT date, name FROM oirs.holidays ORDER BY date")
        .fetch_all(pool)
        .await?;

    let mut holidays = Vec::new();
    for row in rows {
        holidays.push(Holiday {
            date: row.try_get("date")?,
            name: row.try_get("name")?,
        });
    }
    Ok(holidays)
}

pub async fn insert_holiday(pool: &PgPool, holiday: &Holiday) -> anyhow::Result<()> {
    let result = sqlx::query(
        "INSERT INTO oirs.holidays (date, name) VALUES ($1, $2) ON CONFLICT (date) DO NOTHING",
    )
    .bind(holiday.date)
    .bind(&holiday.name)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(OirsError::Duplicate {
            resource: "holiday",
            key: holiday.date.to_string(),
        }
        .into());
    }
    log::info!("holiday {} ({}) added", holiday.date, holiday.name);
    Ok(())
}

pub async fn delete_holiday(pool: &PgPool, date: NaiveDate) -> anyhow::Result<()> {
    let result = sqlx::query("DELETE FROM oirs.holidays WHERE date = $1")
        .bind(date)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(OirsError::NotFound {
            resource: "holiday",
            key: date.to_string(),
        }
        .into());
    }
    log::info!("holiday {date} removed");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ImportRow {
    pub folio: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub request_type: String,
    pub topic: String,
    pub region: String,
    pub citizen_name: String,
    pub citizen_email: String,
    pub citizen_rut: Option<String>,
    pub subject: String,
    pub description: String,
}

impl ImportRow {
    fn into_new_request(self) -> NewRequest {
        NewRequest {
            submitted_at: self.submitted_at,
            request_type: self.request_type,
            topic: self.topic,
            region: self.region,
            citizen: Citizen {
                name: self.citizen_name,
                email: self.citizen_email,
                rut: self.citizen_rut,
            },
            subject: self.subject,
            description: self.description,
        }
    }
}

pub fn parse_import_rows<R: Read>(reader: R) -> anyhow::Result<Vec<ImportRow>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<ImportRow>().enumerate() {
        // Line 1 is the header.
        let row = result.with_context(|| format!("invalid CSV row on line {}", index + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = parse_import_rows(file)?;
    let types = fetch_type_map(pool).await?;

    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for (index, row) in rows.into_iter().enumerate() {
        if !types.contains_key(&row.request_type) {
            return Err(OirsError::UnknownRequestType(row.request_type.clone()))
                .with_context(|| format!("CSV line {}", index + 2));
        }

        let folio = row.folio.clone().filter(|folio| !folio.trim().is_empty());
        let new = row.into_new_request();
        let folio = match folio {
            Some(folio) => folio,
            None => {
                let sequence: i64 = sqlx::query_scalar("SELECT nextval('oirs.folio_seq')")
                    .fetch_one(&mut *tx)
                    .await?;
                format_folio(new.submitted_at, sequence)
            }
        };

        let request = Request {
            id: Uuid::new_v4(),
            folio,
            submitted_at: new.submitted_at,
            request_type: new.request_type,
            topic: new.topic,
            region: new.region,
            citizen: new.citizen,
            subject: new.subject,
            description: new.description,
            status: RequestStatus::Ingresada,
            responded_at: None,
            response: None,
        };
        let event = submission_event(&request);

        if insert_request_record(&mut tx, &request, &[event]).await? {
            inserted += 1;
        } else {
            log::warn!("folio {} already exists, skipped", request.folio);
        }
    }

    tx.commit().await?;
    log::info!("imported {inserted} requests from {}", csv_path.display());
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_requests_take_the_given_sequence() {
        let now = Utc::now();
        for (offset, sample) in SAMPLE_REQUESTS.iter().enumerate() {
            let sequence = 57 + offset as i64;
            let (request, events) = build_sample_request(sample, sequence, now).unwrap();
            assert_eq!(parse_folio_sequence(&request.folio), Some(sequence));
            assert_eq!(request.status, sample.target);
            assert_eq!(events.first().map(|e| e.from), Some(None));
            assert_eq!(events.last().map(|e| e.to), Some(sample.target));
        }
    }

    #[test]
    fn closed_sample_keeps_its_answer() {
        let (request, events) = build_sample_request(&SAMPLE_REQUESTS[3], 9, Utc::now()).unwrap();
        assert_eq!(request.status, RequestStatus::Cerrada);
        assert!(request.responded_at.is_some());
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn folio_sequence_is_the_numeric_tail() {
        assert_eq!(parse_folio_sequence("OIRS-2026-000042"), Some(42));
        assert_eq!(parse_folio_sequence("LEGACY-77"), Some(77));
        assert_eq!(parse_folio_sequence("OIRS-2026-ABC"), None);
        assert_eq!(parse_folio_sequence("OIRS-2026-000000"), None);
    }

    #[test]
    fn parses_import_rows_with_optional_columns() {
        let data = "\
folio,submitted_at,request_type,topic,region,citizen_name,citizen_email,citizen_rut,subject,description
OIRS-2025-000310,2025-11-03T14:00:00Z,Reclamo,Pagos,Maule,Ana Pérez,ana@example.cl,11.111.111-1,Cobro duplicado,Me cobraron dos veces
,2025-11-04T09:15:00Z,Consulta,Trámites,Biobío,Luis Vera,luis@example.cl,,Horario,¿Atienden el sábado?
";
        let rows = parse_import_rows(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].folio.as_deref(), Some("OIRS-2025-000310"));
        assert_eq!(rows[0].citizen_rut.as_deref(), Some("11.111.111-1"));
        assert_eq!(rows[1].folio, None);
        assert_eq!(rows[1].citizen_rut, None);

        let request = rows[1].clone().into_new_request();
        assert_eq!(request.citizen.name, "Luis Vera");
        assert_eq!(request.request_type, "Consulta");
    }

    #[test]
    fn bad_import_row_names_its_line() {
        let data = "\
folio,submitted_at,request_type,topic,region,citizen_name,citizen_email,citizen_rut,subject,description
,not-a-date,Reclamo,Pagos,Maule,Ana,ana@example.cl,,Asunto,Detalle
";
        let err = parse_import_rows(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
