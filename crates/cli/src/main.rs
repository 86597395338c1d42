mod inspect;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use inspect::GrantFilter;
use lifetag_core::journal::{self, JournalError, JournalRecord};
use lifetag_core::{
    constants::DEFAULT_DATA_DIR, resolve_policy, AccessAuditEntry, AccessGrant, ConsentError,
    ConsentService, CoreConfig, DoctorId, GrantId, InMemoryIdentityRegistry, PatientId,
    ShardedRecordIndex, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lifetag")]
#[command(about = "LifeTag consent engine operator CLI")]
struct Cli {
    /// Directory holding the consent journal and record indexes
    #[arg(long, env = "LIFETAG_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
    /// Consent policy YAML file
    #[arg(long, env = "LIFETAG_POLICY_FILE")]
    policy: Option<PathBuf>,
    /// Print JSON instead of one line per item
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List grants, newest first
    Grants {
        /// Only grants for this patient
        #[arg(long, conflicts_with = "doctor")]
        patient: Option<PatientId>,
        /// Only grants held by this doctor
        #[arg(long)]
        doctor: Option<DoctorId>,
    },
    /// Show a grant's current snapshot
    Grant {
        grant_id: GrantId,
    },
    /// Show a patient's audit trail, oldest first
    Audit {
        patient_id: PatientId,
    },
    /// Show the audit entries of one grant
    AuditGrant {
        grant_id: GrantId,
    },
    /// Check the journal for sequence gaps, conflicting grants, and bad snapshots
    Verify,
    /// Expire every active grant that is past its expiry (only while no server holds the journal)
    Sweep,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("Use 'lifetag --help' for commands");
        return Ok(());
    };

    let cfg = CoreConfig::new(cli.data_dir.clone(), resolve_policy(cli.policy.clone())?)?;

    match command {
        Commands::Grants { patient, doctor } => {
            let filter = match (patient, doctor) {
                (Some(p), _) => GrantFilter::Patient(p),
                (None, Some(d)) => GrantFilter::Doctor(d),
                (None, None) => GrantFilter::All,
            };
            let grants = inspect::grants_matching(&load(&cfg)?, filter);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&grants)?);
            } else if grants.is_empty() {
                println!("No grants found.");
            } else {
                for grant in &grants {
                    print_grant(grant);
                }
            }
        }
        Commands::Grant { grant_id } => {
            let grants = inspect::latest_grants(&load(&cfg)?);
            let Some(grant) = grants.get(&grant_id) else {
                bail!("grant {grant_id} not found");
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(grant)?);
            } else {
                print_grant(grant);
            }
        }
        Commands::Audit { patient_id } => {
            let trail = inspect::patient_trail(&load(&cfg)?, &patient_id);
            print_trail(&trail, cli.json)?;
        }
        Commands::AuditGrant { grant_id } => {
            let trail = inspect::grant_trail(&load(&cfg)?, &grant_id);
            print_trail(&trail, cli.json)?;
        }
        Commands::Verify => {
            let records = load(&cfg)?;
            let problems = inspect::verify(&records, chrono::Utc::now());
            if problems.is_empty() {
                println!("Journal OK: {} entries.", records.len());
            } else {
                for problem in &problems {
                    eprintln!("{problem}");
                }
                bail!("journal has {} problem(s)", problems.len());
            }
        }
        Commands::Sweep => {
            if !cfg.journal_enabled() {
                bail!("the consent policy disables the journal; there is nothing to sweep");
            }
            if !cfg.data_dir().is_dir() {
                bail!("data directory does not exist: {}", cfg.data_dir().display());
            }
            // The sweep only needs the grants; identities play no part in expiry.
            let service = match ConsentService::new(
                &cfg,
                Arc::new(InMemoryIdentityRegistry::new()),
                Arc::new(ShardedRecordIndex::new(cfg.records_dir())),
                Arc::new(SystemClock),
            ) {
                Err(ConsentError::Journal(JournalError::Locked { path })) => bail!(
                    "{} is locked by a running server; use its POST /admin/sweep instead",
                    path.display()
                ),
                opened => opened?,
            };
            let report = service.run_expiry_sweep();
            println!(
                "Expired {} grant(s), skipped {}, failed {}.",
                report.expired.len(),
                report.skipped,
                report.failed
            );
            for id in &report.expired {
                println!("  {id}");
            }
        }
    }

    Ok(())
}

fn load(cfg: &CoreConfig) -> anyhow::Result<Vec<JournalRecord>> {
    let path = cfg.journal_path();
    journal::replay(&path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_grant(grant: &AccessGrant) {
    let expires = grant
        .expires_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".into());
    println!(
        "ID: {}, Doctor: {}, Patient: {}, State: {}, Created: {}, Expires: {}",
        grant.id,
        grant.doctor_id,
        grant.patient_id,
        grant.state,
        grant.created_at.to_rfc3339(),
        expires
    );
    if let Some(reason) = &grant.revocation_reason {
        println!("  Revocation reason: {}", reason.as_str());
    }
}

fn print_trail(trail: &[AccessAuditEntry], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(trail)?);
        return Ok(());
    }
    if trail.is_empty() {
        println!("No audit entries found.");
    }
    for entry in trail {
        let grant = entry
            .grant_id
            .map(|g| g.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "#{} {} {} by {} (grant {}){}",
            entry.sequence,
            entry.timestamp.to_rfc3339(),
            entry.action,
            entry.actor,
            grant,
            entry
                .detail
                .as_deref()
                .map(|d| format!(": {d}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
