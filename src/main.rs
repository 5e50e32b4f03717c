use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

mod config;
mod db;
mod error;
mod lifecycle;
mod listing;
mod models;
mod report;
mod sla;

use crate::listing::{RequestQuery, SortKey};
use crate::models::{Citizen, Holiday, MaintainerTable, NewRequest, RequestStatus, RequestType};
use crate::sla::{Calendar, SlaFlag};

#[derive(Parser)]
#[command(name = "oirs")]
#[command(about = "Citizen request tracking and SLA monitoring for an OIRS office", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load default request types, lookup tables and sample requests
    Seed,
    /// Import requests from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Register a new citizen request
    Submit {
        #[arg(long = "type")]
        request_type: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        region: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        rut: Option<String>,
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Show one request with its SLA position and history
    Show {
        folio: String,
        #[arg(long)]
        json: bool,
    },
    /// List requests with filters, sorting and pagination
    List {
        #[arg(long, value_enum)]
        status: Option<RequestStatus>,
        #[arg(long = "type")]
        request_type: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum)]
        flag: Option<SlaFlag>,
        #[arg(long, value_enum, default_value_t = SortKey::Submitted)]
        sort: SortKey,
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Move a request to another status
    Transition {
        folio: String,
        #[arg(long, value_enum)]
        to: RequestStatus,
        #[arg(long)]
        note: Option<String>,
    },
    /// Record the response to a request
    Respond {
        folio: String,
        #[arg(long)]
        text: String,
    },
    /// Mark overdue open requests as urgent
    Escalate {
        #[arg(long)]
        dry_run: bool,
    },
    /// Maintain request types and their SLA thresholds
    Types {
        #[command(subcommand)]
        command: TypeCommands,
    },
    /// Maintain lookup tables (regions, genders, topics, channels)
    Lookup {
        #[command(subcommand)]
        command: LookupCommands,
    },
    /// Maintain the holiday calendar used for business days
    Holidays {
        #[command(subcommand)]
        command: HolidayCommands,
    },
    /// Generate a markdown report
    #[command(group(
        ArgGroup::new("scope")
            .args(["request_type", "region"])
            .multiple(false)
    ))]
    Report {
        #[arg(long = "type")]
        request_type: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum TypeCommands {
    List,
    Add {
        name: String,
        #[arg(long)]
        max_days: i32,
        #[arg(long)]
        critical_days: i32,
        #[arg(long)]
        attention_days: i32,
    },
    Update {
        name: String,
        #[arg(long)]
        max_days: i32,
        #[arg(long)]
        critical_days: i32,
        #[arg(long)]
        attention_days: i32,
    },
    Remove {
        name: String,
    },
}

#[derive(Subcommand)]
enum LookupCommands {
    List {
        #[arg(value_enum)]
        table: MaintainerTable,
    },
    Add {
        #[arg(value_enum)]
        table: MaintainerTable,
        value: String,
    },
    Rename {
        #[arg(value_enum)]
        table: MaintainerTable,
        old_value: String,
        new_value: String,
    },
    Remove {
        #[arg(value_enum)]
        table: MaintainerTable,
        value: String,
    },
}

#[derive(Subcommand)]
enum HolidayCommands {
    List,
    Add {
        date: NaiveDate,
        name: String,
    },
    Remove {
        date: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = config::Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} new sample requests).");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} requests from {}.", csv.display());
        }
        Commands::Submit {
            request_type,
            topic,
            region,
            name,
            email,
            rut,
            subject,
            description,
        } => {
            let request = db::submit_request(
                &pool,
                NewRequest {
                    submitted_at: Utc::now(),
                    request_type,
                    topic,
                    region,
                    citizen: Citizen { name, email, rut },
                    subject,
                    description,
                },
            )
            .await?;
            println!("Request registered with folio {}.", request.folio);
        }
        Commands::Show { folio, json } => {
            let request = db::fetch_request(&pool, &folio).await?;
            let events = db::fetch_events(&pool, request.id).await?;
            let types = db::fetch_type_map(&pool).await?;
            let calendar = Calendar::from_holidays(&db::fetch_holidays(&pool).await?);
            let today = Utc::now().date_naive();
            let row = listing::build_rows(vec![request], &types, today, &calendar)
                .pop()
                .context("request row missing")?;

            if json {
                let value = serde_json::json!({ "request": row, "history": events });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(());
            }

            let request = &row.request;
            println!("{} [{}] {}", request.folio, request.request_type, request.subject);
            println!(
                "Citizen: {} <{}>{}",
                request.citizen.name,
                request.citizen.email,
                request
                    .citizen
                    .rut
                    .as_deref()
                    .map(|rut| format!(" RUT {rut}"))
                    .unwrap_or_default()
            );
            println!("Region: {} / Topic: {}", request.region, request.topic);
            println!("Submitted: {}", request.submitted_at.format("%Y-%m-%d %H:%M"));
            println!("Status: {}", request.status);
            if let Some(sla) = &row.sla {
                println!(
                    "SLA: {} ({}), due {}",
                    sla.remaining_label(),
                    sla.flag.label(),
                    sla.due_date
                );
            }
            if let Some(response) = &request.response {
                println!("Response: {response}");
            }
            println!("History:");
            for event in events {
                let from = event.from.map(|status| status.label()).unwrap_or("-");
                println!(
                    "- {} {} -> {}{}",
                    event.at.format("%Y-%m-%d %H:%M"),
                    from,
                    event.to,
                    event.note.map(|note| format!(": {note}")).unwrap_or_default()
                );
            }
        }
        Commands::List {
            status,
            request_type,
            region,
            topic,
            search,
            flag,
            sort,
            desc,
            page,
            page_size,
            json,
        } => {
            let types = db::fetch_type_map(&pool).await?;
            let calendar = Calendar::from_holidays(&db::fetch_holidays(&pool).await?);
            let requests = db::fetch_requests(&pool).await?;
            let rows = listing::build_rows(requests, &types, Utc::now().date_naive(), &calendar);

            let query = RequestQuery {
                status,
                request_type,
                region,
                topic,
                search,
                flag,
                sort,
                descending: desc,
                page,
                page_size: page_size.unwrap_or(config.page_size),
            };
            let result = query.apply(rows);

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }
            if result.items.is_empty() {
                println!("No requests match these filters.");
                return Ok(());
            }

            for row in &result.items {
                println!(
                    "- {} {} [{}] {} ({}, {}): {}",
                    row.request.folio,
                    row.request.submitted_at.date_naive(),
                    row.request.request_type,
                    row.request.subject,
                    row.request.region,
                    row.request.status,
                    row.remaining_label.as_deref().unwrap_or("sin plazo")
                );
            }
            println!(
                "Page {} of {} ({} requests).",
                result.page, result.total_pages, result.total
            );
        }
        Commands::Transition { folio, to, note } => {
            let request = db::change_status(&pool, &folio, |request| {
                lifecycle::transition(request, to, note, Utc::now())
            })
            .await?;
            println!("Request {} is now {}.", request.folio, request.status);
        }
        Commands::Respond { folio, text } => {
            let request = db::change_status(&pool, &folio, |request| {
                lifecycle::respond(request, text, Utc::now())
            })
            .await?;
            println!("Response recorded for {}.", request.folio);
        }
        Commands::Escalate { dry_run } => {
            let types = db::fetch_type_map(&pool).await?;
            let calendar = Calendar::from_holidays(&db::fetch_holidays(&pool).await?);
            let mut requests = db::fetch_requests(&pool).await?;
            let events = lifecycle::escalate(&mut requests, &types, Utc::now(), &calendar);

            if events.is_empty() {
                println!("No overdue requests to escalate.");
                return Ok(());
            }
            if dry_run {
                for request in requests
                    .iter()
                    .filter(|request| events.iter().any(|event| event.request_id == request.id))
                {
                    println!("- {} would become {}", request.folio, request.status);
                }
                return Ok(());
            }

            let saved = db::save_escalations(&pool, &events).await?;
            println!("Escalated {saved} requests to urgent.");
        }
        Commands::Types { command } => match command {
            TypeCommands::List => {
                for request_type in db::fetch_types(&pool).await? {
                    println!(
                        "- {}: max {} days, attention at {}, critical at {}",
                        request_type.name,
                        request_type.max_days,
                        request_type.attention_days,
                        request_type.critical_days
                    );
                }
            }
            TypeCommands::Add {
                name,
                max_days,
                critical_days,
                attention_days,
            } => {
                let request_type = RequestType::new(name, max_days, critical_days, attention_days)?;
                db::insert_type(&pool, &request_type).await?;
                println!("Request type {} added.", request_type.name);
            }
            TypeCommands::Update {
                name,
                max_days,
                critical_days,
                attention_days,
            } => {
                let request_type = RequestType::new(name, max_days, critical_days, attention_days)?;
                db::update_type(&pool, &request_type).await?;
                println!("Request type {} updated.", request_type.name);
            }
            TypeCommands::Remove { name } => {
                db::delete_type(&pool, &name).await?;
                println!("Request type {name} removed.");
            }
        },
        Commands::Lookup { command } => match command {
            LookupCommands::List { table } => {
                for item in db::fetch_items(&pool, table).await? {
                    println!("- {} {}", item.id, item.value);
                }
            }
            LookupCommands::Add { table, value } => {
                let item = db::insert_item(&pool, table, &value).await?;
                println!("Added {} {} (id {}).", table.as_str(), item.value, item.id);
            }
            LookupCommands::Rename {
                table,
                old_value,
                new_value,
            } => {
                db::rename_item(&pool, table, &old_value, &new_value).await?;
                println!("Renamed {} {old_value} to {new_value}.", table.as_str());
            }
            LookupCommands::Remove { table, value } => {
                db::delete_item(&pool, table, &value).await?;
                println!("Removed {} {value}.", table.as_str());
            }
        },
        Commands::Holidays { command } => match command {
            HolidayCommands::List => {
                for holiday in db::fetch_holidays(&pool).await? {
                    println!("- {} {}", holiday.date, holiday.name);
                }
            }
            HolidayCommands::Add { date, name } => {
                db::insert_holiday(&pool, &Holiday { date, name }).await?;
                println!("Holiday {date} added.");
            }
            HolidayCommands::Remove { date } => {
                db::delete_holiday(&pool, date).await?;
                println!("Holiday {date} removed.");
            }
        },
        Commands::Report {
            request_type,
            region,
            out,
        } => {
            let types = db::fetch_type_map(&pool).await?;
            let calendar = Calendar::from_holidays(&db::fetch_holidays(&pool).await?);
            let today = Utc::now().date_naive();
            let requests = db::fetch_requests(&pool).await?;
            let scope = request_type.clone().or_else(|| region.clone());

            let query = RequestQuery {
                request_type,
                region,
                ..RequestQuery::default()
            };
            let rows: Vec<_> = listing::build_rows(requests, &types, today, &calendar)
                .into_iter()
                .filter(|row| query.matches(row))
                .collect();

            let report = report::build_report(scope.as_deref(), today, &rows);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
