//! `vc-authz` - Permission Inspection CLI
//!
//! Operator tool for resolving and invalidating permissions against live storage.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use vc_authz::config::Config;
use vc_authz::permissions::{hierarchy, Invalidation, PgPermissionStore, Permissions};
use vc_authz::{db, Authz};

/// Kaiku permission inspection tool
#[derive(Parser)]
#[command(name = "vc-authz")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Print a user's effective permissions in a channel
    Resolve {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        channel: Uuid,
    },

    /// Check a single named permission (e.g. `SEND_MESSAGES`)
    Check {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        channel: Uuid,
        #[arg(long)]
        permission: String,
    },

    /// Print a member's status, roles and rank
    Member {
        #[arg(long)]
        user: Uuid,
    },

    /// List the overrides attached to a channel
    Overrides {
        #[arg(long)]
        channel: Uuid,
    },

    /// Drop cached permissions
    Invalidate {
        #[command(subcommand)]
        scope: InvalidateScope,
    },
}

#[derive(Subcommand)]
enum InvalidateScope {
    /// Every cached entry
    All,
    /// Every entry for one user
    User { id: Uuid },
    /// Every entry for one channel
    Channel { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vc_authz=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting vc-authz");

    let pool = db::create_pool(&config.database_url).await?;
    let cache = Authz::connect_cache(&config).await?;
    let (authz, invalidation_worker) = Authz::with_pool(pool.clone(), cache)
        .with_invalidation_queue(config.invalidation_queue_capacity);

    let output = match cli.command {
        Commands::Migrate => {
            db::run_migrations(&pool).await?;
            json!({ "migrated": true })
        }
        Commands::Resolve { user, channel } => {
            let perms = authz.resolver().resolve(user, channel).await?;
            json!({
                "user_id": user,
                "channel_id": channel,
                "bits": perms.bits(),
                "permissions": perms.iter_names().map(|(name, _)| name).collect::<Vec<_>>(),
            })
        }
        Commands::Check {
            user,
            channel,
            permission,
        } => {
            let Some(flag) = Permissions::from_flag_name(&permission) else {
                bail!("Unknown permission: {permission}");
            };
            let granted = authz
                .resolver()
                .has_permission(user, channel, flag)
                .await?;
            json!({ "user_id": user, "channel_id": channel, "permission": permission, "granted": granted })
        }
        Commands::Member { user } => {
            let store = PgPermissionStore::new(pool);
            let member = store
                .member(user)
                .await?
                .with_context(|| format!("User {user} is not a member"))?;
            let roles = store.member_roles(user).await?;
            json!({
                "user_id": user,
                "status": member.status.as_str(),
                "eligible": member.is_eligible(),
                "is_owner": authz.store().is_owner(user).await?,
                "highest_position": hierarchy::highest_position(&roles),
                "roles": roles,
            })
        }
        Commands::Overrides { channel } => {
            json!(authz.list_overrides(channel).await?)
        }
        Commands::Invalidate { scope } => {
            let invalidation = match scope {
                InvalidateScope::All => Invalidation::All,
                InvalidateScope::User { id } => Invalidation::User(id),
                InvalidateScope::Channel { id } => Invalidation::Channel(id),
            };
            authz.invalidate(invalidation).await;
            json!({ "invalidated": true })
        }
    };

    // Flush queued invalidations before exiting
    drop(authz);
    invalidation_worker.await?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
