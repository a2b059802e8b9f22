use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use rank_entitlement::{
    next_trigger, run_recharge_sweep, run_schedule, BulkGrantReport, EngineConfig,
    EntitlementService, PlayerRepository, RechargeMode, SqliteRepository,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Rank entitlement engine: reconcile skills, grant rewards, recharge charges
#[derive(Parser)]
#[command(name = "rank-entitlement")]
#[command(about = "Rank entitlement & buff/skill reconciliation", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON config file (environment variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the SQLite schema
    Init,

    /// Create an empty player and print its id
    CreatePlayer { name: String },

    /// Reconcile a player and print tier, progress, buffs and skills
    Show { player_id: String },

    /// Reconcile a player and print diagnostics
    Reconcile { player_id: String },

    /// Grant a reward (bonus-aware)
    Grant {
        player_id: String,
        #[arg(allow_hyphen_values = true)]
        amount: i64,
        #[arg(long, default_value = "manual grant")]
        reason: String,
        /// Only show what would be awarded
        #[arg(long)]
        preview: bool,
    },

    /// Grant the same reward to several players
    BulkGrant {
        #[arg(allow_hyphen_values = true)]
        amount: i64,
        #[arg(required = true)]
        player_ids: Vec<String>,
        #[arg(long, default_value = "bulk grant")]
        reason: String,
        #[arg(long)]
        preview: bool,
    },

    /// Run one recharge sweep now
    Recharge {
        /// Calendar month to evaluate (default: current month)
        #[arg(long)]
        month: Option<u32>,
        /// Refill every rank skill regardless of reset period
        #[arg(long)]
        force: bool,
    },

    /// Run the sweep on the first of every month until interrupted
    Schedule,

    /// List operator overrides that match no built-in skill
    CheckCatalog,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    let repo: Arc<dyn PlayerRepository> = Arc::new(
        SqliteRepository::open(&config.database_path)
            .with_context(|| format!("Failed to open database {:?}", config.database_path))?,
    );

    match cli.command {
        Command::Init => {
            println!("✓ Database ready at {}", config.database_path.display());
            Ok(())
        }
        Command::Schedule => {
            println!("⏰ Next recharge sweep at {}", next_trigger(Utc::now()));
            run_schedule(repo, config).await?;
            Ok(())
        }
        Command::Recharge { month, force } => run_recharge(repo, &config, month, force).await,
        command => {
            let service = EntitlementService::from_config(repo, config)?;
            run_command(&service, command)
        }
    }
}

fn run_command(service: &EntitlementService, command: Command) -> Result<()> {
    match command {
        Command::CreatePlayer { name } => {
            let player = service.create_player(&name)?;
            println!("✓ Created player {} ({})", player.display_name, player.id);
        }
        Command::Show { player_id } => show_player(service, &player_id)?,
        Command::Reconcile { player_id } => {
            let report = service.refresh_player(&player_id)?;
            println!("✓ {}", report.summary());
            for diagnostic in &report.diagnostics {
                println!("  ⚠️  {}", diagnostic);
            }
        }
        Command::Grant {
            player_id,
            amount,
            reason,
            preview,
        } => {
            if preview {
                let breakdown = service.preview_reward(&player_id, amount)?;
                println!(
                    "🔍 Would award {} (base {}){}",
                    breakdown.awarded,
                    breakdown.base,
                    breakdown.tag()
                );
            } else {
                let outcome = service.grant_reward(&player_id, amount, &reason)?;
                println!(
                    "✅ Awarded {} (base {}){} → balance {}, lifetime {}",
                    outcome.breakdown.awarded,
                    outcome.breakdown.base,
                    outcome.breakdown.tag(),
                    outcome.player.current_balance,
                    outcome.player.lifetime_high_score
                );
                if outcome.added_buffs + outcome.added_slots > 0 {
                    println!(
                        "🎉 Unlocked {} passive(s) and {} skill(s)",
                        outcome.added_buffs, outcome.added_slots
                    );
                }
            }
        }
        Command::BulkGrant {
            amount,
            player_ids,
            reason,
            preview,
        } => {
            let report = if preview {
                service.bulk_preview(&player_ids, amount)
            } else {
                service.bulk_grant(&player_ids, amount, &reason)
            };
            print_bulk(&report, preview);
        }
        Command::CheckCatalog => {
            let diagnostics = service.check_catalog()?;
            if diagnostics.is_empty() {
                println!("✅ Every override matches a built-in skill");
            } else {
                for diagnostic in &diagnostics {
                    println!("⚠️  {}", diagnostic);
                }
                println!("❌ {} orphan override(s)", diagnostics.len());
            }
        }
        Command::Init | Command::Recharge { .. } | Command::Schedule => {}
    }
    Ok(())
}

fn show_player(service: &EntitlementService, player_id: &str) -> Result<()> {
    let report = service.refresh_player(player_id)?;
    let player = &report.player;

    println!("🎒 {} ({})", player.display_name, player.id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "Balance: {}   Lifetime: {}   Version: {}",
        player.current_balance, player.lifetime_high_score, player.version
    );

    if let Some(progress) = service.progress(player) {
        match &progress.next {
            Some(next) => println!(
                "Rank: {} → {} ({:.1}%, {} to go)",
                progress.current, next, progress.percentage, progress.points_to_next
            ),
            None => println!("Rank: {} (max tier)", progress.current),
        }
    }

    println!("\nBuffs:");
    for buff in &player.active_buffs {
        let until = buff
            .expires_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "permanent".to_string());
        println!("  ✨ {} [{}] {}", buff.name, buff.effect_code, until);
    }

    println!("\nSkills:");
    for slot in &player.inventory {
        println!(
            "  🗡️  {} {}/{} ({}, {})",
            slot.name,
            slot.uses_left,
            slot.max_uses,
            slot.reset_period.as_str(),
            slot.rarity_label
        );
    }

    for diagnostic in &report.diagnostics {
        println!("⚠️  {}", diagnostic);
    }
    Ok(())
}

fn print_bulk(report: &BulkGrantReport, preview: bool) {
    let verb = if preview { "would receive" } else { "received" };
    for (player_id, breakdown) in &report.granted {
        println!("✓ {} {} {}{}", player_id, verb, breakdown.awarded, breakdown.tag());
    }
    for (player_id, error) in &report.failures {
        println!("❌ {}: {}", player_id, error);
    }
    println!(
        "✅ {} player(s), {} total, {} failure(s)",
        report.granted.len(),
        report.total_awarded(),
        report.failures.len()
    );
}

async fn run_recharge(
    repo: Arc<dyn PlayerRepository>,
    config: &EngineConfig,
    month: Option<u32>,
    force: bool,
) -> Result<()> {
    let month = month.unwrap_or_else(|| Utc::now().month());
    anyhow::ensure!((1..=12).contains(&month), "month must be within 1..=12");
    let mode = if force {
        RechargeMode::Force
    } else {
        RechargeMode::Calendar
    };

    let report = run_recharge_sweep(
        repo,
        config.recharge_calendar(),
        month,
        mode,
        config.sweep_workers,
        config.max_write_retries,
    )
    .await?;

    println!("✅ {}", report.summary());
    for (player_id, error) in &report.failures {
        println!("  ❌ {}: {}", player_id, error);
    }
    Ok(())
}
