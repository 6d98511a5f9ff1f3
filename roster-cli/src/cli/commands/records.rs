//! `lists`, `list`, `show`, `update` and `delete`

use anyhow::{Context, Result};
use colored::*;
use dialoguer::Confirm;
use serde_json::Value;

use crate::cli::ReadArgs;
use crate::cli::context::{AppContext, employee_cache};
use crate::cli::output;
use roster_cli::api::models::Record;

pub async fn handle_lists() -> Result<()> {
    let ctx = AppContext::load()?;
    let service = ctx.service().await?;

    let mut lists = service.lists().await?;
    lists.sort_by(|a, b| a.title().to_lowercase().cmp(&b.title().to_lowercase()));

    let names = service.list_names();
    let known = [&names.employees, &names.assets, &names.access_cards];
    for list in &lists {
        let marker = if known.iter().any(|name| list.matches(name)) {
            "*".bright_green().to_string()
        } else {
            " ".to_string()
        };
        println!("{} {}  {}", marker, list.title().bold(), list.id.dimmed());
    }
    Ok(())
}

pub async fn handle_list(list: &str, args: &ReadArgs) -> Result<()> {
    let ctx = AppContext::load()?;
    let service = ctx.service().await?;

    let employees = employee_cache(&service, args.with_directory).await;
    let set = service.get_records(list, &employees).await?;

    if args.json {
        return output::print_json(&set.records);
    }
    output::print_record_list(&set);
    Ok(())
}

pub async fn handle_show(list: &str, id: &str, args: &ReadArgs) -> Result<()> {
    let ctx = AppContext::load()?;
    let service = ctx.service().await?;

    let employees = employee_cache(&service, args.with_directory).await;
    let set = service.get_record(list, id, &employees).await?;

    if args.json {
        return output::print_json(&set.records);
    }
    output::print_record_detail(&set);
    Ok(())
}

pub async fn handle_update(list: &str, id: &str, assignments: &[String]) -> Result<()> {
    let fields = parse_field_assignments(assignments)?;

    let ctx = AppContext::load()?;
    let service = ctx.service().await?;
    let record = service.update_record(list, id, fields).await?;

    output::print_record_fields(&format!("Updated {} #{}", list, id), &record);
    Ok(())
}

pub async fn handle_delete(list: &str, id: &str, yes: bool) -> Result<()> {
    let ctx = AppContext::load()?;
    let service = ctx.service().await?;

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete item {} from '{}'?", id, list))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            println!("{}", "Cancelled.".dimmed());
            return Ok(());
        }
    }

    service.delete_record(list, id).await?;
    println!("{} {} #{}", "Deleted".bright_green(), list, id);
    Ok(())
}

/// `Field=text` becomes a string, `Field:=json` a parsed JSON value
pub fn parse_field_assignments(assignments: &[String]) -> Result<Record> {
    let mut fields = Record::new();

    for assignment in assignments {
        let Some((key, raw)) = assignment.split_once('=') else {
            anyhow::bail!("Expected FIELD=VALUE or FIELD:=JSON, got '{}'", assignment);
        };
        let (key, value) = match key.strip_suffix(':') {
            Some(key) => {
                let value: Value = serde_json::from_str(raw)
                    .with_context(|| format!("Invalid JSON value for '{}': {}", key, raw))?;
                (key, value)
            }
            None => (key, Value::String(raw.to_string())),
        };

        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Missing field name in '{}'", assignment);
        }
        fields.insert(key.to_string(), value);
    }

    Ok(fields)
}
