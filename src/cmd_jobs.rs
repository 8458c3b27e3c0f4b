//! Job management subcommands: add, list, remove, next.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use doccron_scheduler::{FieldPaths, Interval};
use doccron_store::{timestamp_value, Document, DocumentId, DocumentStore, SqliteStore};

use crate::cli::{AddArgs, OutputFormat};

fn parse_instant(raw: &str, what: &str) -> anyhow::Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("{} must be an RFC 3339 timestamp, got '{}'", what, raw))?;
    Ok(parsed.with_timezone(&Utc))
}

/// Build a job document body from CLI arguments.
pub(crate) fn build_job_body(args: &AddArgs, fields: &FieldPaths) -> anyhow::Result<Value> {
    let mut body: Value = serde_json::from_str(&args.payload).context("--payload is not valid JSON")?;
    if !body.is_object() {
        bail!("--payload must be a JSON object");
    }

    let wake_at = match &args.at {
        Some(at) => timestamp_value(parse_instant(at, "--at")?),
        None => Value::Null,
    };
    fields.wake_at.set(&mut body, wake_at)?;

    if let Some(expression) = &args.interval {
        Interval::parse(expression)?;
        fields.interval.set(&mut body, json!(expression))?;
    }

    if let Some(until) = &args.repeat_until {
        if args.interval.is_none() {
            bail!("--repeat-until only applies to jobs with an --interval");
        }
        let until = parse_instant(until, "--repeat-until")?;
        fields.repeat_until.set(&mut body, timestamp_value(until))?;
    }

    if args.auto_remove {
        fields.auto_remove.set(&mut body, json!(true))?;
    }

    Ok(body)
}

pub(crate) async fn add(store: &SqliteStore, fields: &FieldPaths, args: AddArgs) -> anyhow::Result<()> {
    let body = build_job_body(&args, fields)?;
    let id = store.insert_one(body).await?;
    println!("{}", id);
    Ok(())
}

pub(crate) async fn list(
    store: &SqliteStore,
    fields: &FieldPaths,
    all: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let documents: Vec<Document> = store
        .all()
        .await?
        .into_iter()
        .filter(|d| all || fields.wake_at.exists(&d.body))
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&documents)?);
        }
        OutputFormat::Table => {
            if documents.is_empty() {
                println!("No jobs.");
                return Ok(());
            }
            println!("{:<38} {:<26} {:<20} {}", "ID", "WAKE AT", "INTERVAL", "AUTO REMOVE");
            for document in &documents {
                let wake_at = match document.get(&fields.wake_at) {
                    Some(Value::Null) => "now".to_string(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => "-".to_string(),
                };
                let interval = document
                    .get(&fields.interval)
                    .and_then(Value::as_str)
                    .unwrap_or("-");
                let auto_remove = document.get(&fields.auto_remove) == Some(&Value::Bool(true));
                println!("{:<38} {:<26} {:<20} {}", document.id, wake_at, interval, auto_remove);
            }
        }
    }
    Ok(())
}

pub(crate) async fn remove(store: &SqliteStore, id: &str) -> anyhow::Result<()> {
    if !store.delete_one(&DocumentId::from(id)).await? {
        bail!("No document with id '{}'", id);
    }
    println!("Removed {}", id);
    Ok(())
}

pub(crate) fn next(expression: &str, count: usize, after: Option<&str>) -> anyhow::Result<()> {
    let interval = Interval::parse(expression)?;
    let after = match after {
        Some(raw) => parse_instant(raw, "--after")?,
        None => Utc::now(),
    };

    let mut printed = 0;
    for at in interval.upcoming(after, None).take(count) {
        println!("{}", at.to_rfc3339());
        printed += 1;
    }
    if printed < count {
        println!("(no further occurrences within the search horizon)");
    }
    Ok(())
}
