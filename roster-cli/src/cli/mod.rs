//! Command-line surface

pub mod commands;
pub mod context;
pub mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "roster-cli")]
#[command(about = "Manage SharePoint employee, asset and access card lists")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in, sign out, show the stored token
    #[command(subcommand)]
    Auth(AuthCommands),
    /// Create or print the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Show the signed-in user and their directory roles
    Whoami,
    /// List the lists of the configured site
    Lists,
    /// Show all records of a list
    List {
        /// List name, e.g. "Assets"
        list: String,
        #[command(flatten)]
        read: ReadArgs,
    },
    /// Show one record
    Show {
        list: String,
        id: String,
        #[command(flatten)]
        read: ReadArgs,
    },
    /// Assign an item to an employee
    Assign {
        list: String,
        id: String,
        /// Directory user id, email, or User Information List item id
        employee: String,
        /// Reassign without asking when the item is already assigned
        #[arg(short, long)]
        yes: bool,
    },
    /// Clear the assignment of an item
    Unassign { list: String, id: String },
    /// Update fields: `Field=text` sends a string, `Field:=json` a JSON value
    Update {
        list: String,
        id: String,
        #[arg(required = true, value_name = "FIELD=VALUE")]
        fields: Vec<String>,
    },
    /// Delete an item
    Delete {
        list: String,
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Map a directory user id or email to its User Information List item id
    ResolveUser {
        #[arg(value_name = "ID_OR_EMAIL")]
        user: String,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in through the browser
    Login,
    /// Forget the stored token
    Logout,
    /// Show whether a usable token is stored
    Status,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a configuration file with the defaults
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct ReadArgs {
    /// Print records as JSON
    #[arg(long)]
    pub json: bool,
    /// Also match lookups against all directory users
    #[arg(long)]
    pub with_directory: bool,
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Auth(command) => commands::auth::handle_auth_command(command).await,
        Commands::Config(command) => commands::config::handle_config_command(command),
        Commands::Whoami => commands::auth::handle_whoami().await,
        Commands::Lists => commands::records::handle_lists().await,
        Commands::List { list, read } => commands::records::handle_list(&list, &read).await,
        Commands::Show { list, id, read } => {
            commands::records::handle_show(&list, &id, &read).await
        }
        Commands::Assign {
            list,
            id,
            employee,
            yes,
        } => commands::assign::handle_assign(&list, &id, &employee, yes).await,
        Commands::Unassign { list, id } => commands::assign::handle_unassign(&list, &id).await,
        Commands::Update { list, id, fields } => {
            commands::records::handle_update(&list, &id, &fields).await
        }
        Commands::Delete { list, id, yes } => {
            commands::records::handle_delete(&list, &id, yes).await
        }
        Commands::ResolveUser { user } => commands::assign::handle_resolve_user(&user).await,
    }
}
