//! Gatewarden CLI
//!
//! A command-line front-end for the authorization engine: validates policy
//! configuration and answers one-shot access queries.

use clap::{Parser, Subcommand};
use gatewarden::config::load_config;
use gatewarden::policy::templates::{Traits, map_traits};
use gatewarden::policy::{RoleSet, Server};
use std::collections::BTreeMap;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Gatewarden - authorization decisions for remote-access gateways
#[derive(Parser, Debug)]
#[command(name = "gatewarden")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "GATEWARDEN_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GATEWARDEN_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the policy configuration and report what it defines
    Validate,

    /// Check whether a principal may open a session on a server
    CheckServer {
        /// Principal name
        #[arg(long)]
        user: String,

        /// Assigned role names (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,

        /// Principal traits as key=value1,value2 (repeatable)
        #[arg(long = "trait")]
        traits: Vec<String>,

        /// OS login to check
        #[arg(long)]
        login: String,

        /// Server name
        #[arg(long)]
        server: String,

        /// Server namespace
        #[arg(long, default_value = "default")]
        namespace: String,

        /// Server labels as key=value (repeatable)
        #[arg(long = "label")]
        labels: Vec<String>,
    },
}

fn parse_traits(raw: &[String]) -> anyhow::Result<Traits> {
    let mut traits = Traits::new();
    for entry in raw {
        let (key, values) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("trait {entry:?} is not in key=value form"))?;
        traits.insert(
            key.to_string(),
            values.split(',').map(|v| v.to_string()).collect(),
        );
    }
    Ok(traits)
}

fn parse_labels(raw: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("label {entry:?} is not in key=value form"))?;
        labels.insert(key.to_string(), value.to_string());
    }
    Ok(labels)
}

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let config = load_config(args.config.as_deref())
        .inspect_err(|e| error!(error = %e, "Failed to load configuration"))?;

    let catalog = config
        .build_catalog()
        .inspect_err(|e| error!(error = %e, "Invalid policy configuration"))?;

    match args.command {
        Command::Validate => {
            info!(
                roles = catalog.len(),
                trait_mappings = config.trait_mappings.len(),
                "configuration valid"
            );
            println!("ok: {} roles defined", catalog.len());
        }
        Command::CheckServer {
            user,
            roles,
            traits,
            login,
            server,
            namespace,
            labels,
        } => {
            let traits = parse_traits(&traits)?;

            // Assigned roles plus whatever the trait mappings derive.
            let mut role_names = roles;
            for mapped in map_traits(&config.trait_mappings, &traits) {
                if !role_names.contains(&mapped) {
                    role_names.push(mapped);
                }
            }

            let set = RoleSet::for_principal(&catalog, &role_names, &traits)
                .inspect_err(|e| error!(error = %e, "Failed to resolve role set"))?;

            let mut target = Server::new(server, namespace);
            target.labels = parse_labels(&labels)?;

            match set.check_access_to_server(&login, &target) {
                Ok(()) => {
                    println!("allowed: {user} may log in to {} as {login}", target.name);
                }
                Err(e) => {
                    println!("denied: {e}");
                    std::process::exit(2);
                }
            }
        }
    }

    Ok(())
}
