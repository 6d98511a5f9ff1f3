//! `assign`, `unassign` and `resolve-user`

use anyhow::{Context, Result};
use colored::*;
use dialoguer::Confirm;

use crate::cli::context::AppContext;
use crate::cli::output;
use roster_cli::records::AssignmentState;

pub async fn handle_assign(list: &str, id: &str, employee: &str, yes: bool) -> Result<()> {
    let ctx = AppContext::load()?;
    let service = ctx.service().await?;

    if let AssignmentState::Assigned { lookup_id } = service.assignment_state(list, id).await? {
        if !yes {
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Item {} in '{}' is assigned to user item {}. Reassign?",
                    id, list, lookup_id
                ))
                .default(false)
                .interact()
                .context("Failed to read confirmation")?;
            if !confirmed {
                println!("{}", "Cancelled.".dimmed());
                return Ok(());
            }
        }
    }

    let record = service.assign(list, id, employee).await?;
    output::print_record_fields(
        &format!("Assigned {} #{} to {}", list, id, employee),
        &record,
    );
    Ok(())
}

pub async fn handle_unassign(list: &str, id: &str) -> Result<()> {
    let ctx = AppContext::load()?;
    let service = ctx.service().await?;

    if service.assignment_state(list, id).await? == AssignmentState::Available {
        println!("{}", format!("{} #{} is not assigned.", list, id).dimmed());
        return Ok(());
    }

    let record = service.unassign(list, id).await?;
    output::print_record_fields(&format!("Unassigned {} #{}", list, id), &record);
    Ok(())
}

pub async fn handle_resolve_user(user: &str) -> Result<()> {
    let ctx = AppContext::load()?;
    let service = ctx.service().await?;

    match service.resolve_sharepoint_user_id(user).await? {
        Some(item_id) => println!("{} -> {}", user, item_id.bright_green().bold()),
        None => anyhow::bail!(
            "'{}' was not found in '{}'",
            user,
            service.list_names().user_information
        ),
    }
    Ok(())
}
