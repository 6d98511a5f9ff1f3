//! Sign-in, sign-out and token status

use anyhow::{Context, Result};
use colored::*;
use dialoguer::Input;
use tokio::net::TcpListener;

use crate::cli::AuthCommands;
use crate::cli::context::AppContext;
use roster_cli::api::auth::{parse_redirect, wait_for_localhost_redirect};

pub async fn handle_auth_command(command: AuthCommands) -> Result<()> {
    let ctx = AppContext::load()?;
    match command {
        AuthCommands::Login => login(&ctx).await,
        AuthCommands::Logout => logout(&ctx),
        AuthCommands::Status => status(&ctx),
    }
}

async fn login(ctx: &AppContext) -> Result<()> {
    let manager = ctx.auth_manager()?;
    let request = manager.authorization_request();
    let use_localhost = ctx.config.auth.use_localhost_redirect;

    // Bind before showing the URL so the redirect cannot arrive first
    let listener = if use_localhost {
        let addr = format!("127.0.0.1:{}", ctx.config.auth.localhost_port);
        Some(
            TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to listen on {}", addr))?,
        )
    } else {
        None
    };

    println!("{}", "Open this URL in a browser and sign in:".bold());
    println!();
    println!("  {}", request.url.cyan());
    println!();

    let redirect = match listener {
        Some(listener) => {
            println!(
                "{}",
                format!("Waiting for the redirect to {} ...", manager.config().redirect_uri)
                    .dimmed()
            );
            wait_for_localhost_redirect(listener).await?
        }
        None => Input::<String>::new()
            .with_prompt(format!(
                "Paste the {} URL the browser was sent to",
                manager.config().redirect_uri
            ))
            .interact_text()
            .context("Failed to read the redirect URL")?,
    };

    let code = parse_redirect(redirect.trim(), &request.state)?;
    let token = manager
        .exchange_code(&code, &request.pkce)
        .await
        .context("Failed to exchange the authorization code")?;
    ctx.token_store.save(&token)?;

    println!(
        "{} Token stored in {}",
        "Signed in.".bright_green().bold(),
        ctx.token_store.path().display()
    );
    Ok(())
}

fn logout(ctx: &AppContext) -> Result<()> {
    ctx.token_store.clear()?;
    println!("{}", "Signed out.".bright_green());
    Ok(())
}

fn status(ctx: &AppContext) -> Result<()> {
    match ctx.token_store.load()? {
        None => println!("{}", "Not signed in.".yellow()),
        Some(token) if token.is_expired() => {
            let refresh = if token.refresh_token.is_some() {
                "will refresh on next use"
            } else {
                "sign in again"
            };
            println!(
                "{} expired at {} ({})",
                "Token".yellow(),
                token.expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
                refresh
            );
        }
        Some(token) => println!(
            "{} valid until {}",
            "Signed in,".bright_green(),
            token.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    }
    Ok(())
}

pub async fn handle_whoami() -> Result<()> {
    let ctx = AppContext::load()?;
    let client = ctx.client().await?;

    let me = client.me().await?;
    println!(
        "{} {}",
        me.display_name.as_deref().unwrap_or(&me.id).bright_cyan().bold(),
        me.email().unwrap_or_default().dimmed()
    );
    if let Some(title) = &me.job_title {
        println!("  {}", title);
    }

    match client.my_directory_roles().await {
        Ok(roles) if roles.is_empty() => println!("  {}", "No directory roles".dimmed()),
        Ok(roles) => {
            for role in roles {
                println!(
                    "  {} {}",
                    "role:".dimmed(),
                    role.display_name.as_deref().unwrap_or(&role.id)
                );
            }
        }
        Err(e) if e.is_session_expired() => return Err(e.into()),
        Err(e) => log::warn!("Could not read directory roles: {}", e),
    }
    Ok(())
}
