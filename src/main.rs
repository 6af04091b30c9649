use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use loan_workflow::config::{config, init_config, LoanWorkflowConfig};
use loan_workflow::database::DatabaseManager;
use loan_workflow::store::{LoanApplicationRecord, RecordStore};
use loan_workflow::telemetry::{init_telemetry, shutdown_telemetry};
use loan_workflow::workflow::{
    generate_application_number, EngineSettings, TransitionOutcome, WorkflowEngine, WorkflowStage,
};
use loan_workflow::ApprovalGate;

#[derive(Parser)]
#[command(name = "loan-workflow")]
#[command(about = "Stage-ordered loan application workflow")]
#[command(long_about = "Inspect and advance loan applications through submission, assessment, \
                       contract generation, contract upload, verification and disbursement.")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default loan-workflow.toml in the current directory
    Init {
        #[arg(long, help = "Overwrite an existing configuration file")]
        force: bool,
    },
    /// Register a new loan application and open its approval assignment
    Create {
        #[arg(long)]
        amount: f64,
        #[arg(long, default_value = "individual")]
        client_type: String,
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        user: String,
    },
    /// Show the derived workflow state of a loan application
    Status {
        loan_id: String,
        #[arg(long, help = "Include approval state and suggested next steps")]
        comprehensive: bool,
    },
    /// List recorded workflow steps, most recent first
    History { loan_id: String },
    /// Dry-run the transition guard for a target stage
    Check {
        loan_id: String,
        #[arg(long)]
        to: WorkflowStage,
        #[arg(long)]
        user: String,
    },
    /// Advance a loan application to a later stage
    Submit {
        loan_id: String,
        #[arg(long, help = "Target stage, e.g. assessment or contract_generation")]
        to: WorkflowStage,
        #[arg(long)]
        user: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Roll a loan application back to an earlier stage
    Recall {
        loan_id: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        reason: String,
        #[arg(long, help = "Stage to return to; defaults to the previous stage")]
        to: Option<WorkflowStage>,
    },
    /// Return a recalled loan application to its recall target stage
    Resubmit {
        loan_id: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Return a rejected loan application to assessment
    Reopen {
        loan_id: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        return init_command(force);
    }

    let settings = config()?;
    init_telemetry(&settings.observability)?;
    init_config()?;

    let result = tokio::runtime::Runtime::new()?.block_on(run(cli, settings));
    shutdown_telemetry();
    result
}

fn init_command(force: bool) -> Result<()> {
    let path = Path::new("loan-workflow.toml");
    if path.exists() && !force {
        bail!("loan-workflow.toml already exists (use --force to overwrite)");
    }
    LoanWorkflowConfig::default().save_to_file(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn run(cli: Cli, settings: &LoanWorkflowConfig) -> Result<()> {
    let Some(db_config) = &settings.database else {
        bail!("No [database] section configured");
    };
    let db = Arc::new(DatabaseManager::from_config(db_config).await?);
    execute(cli, settings, db).await
}

async fn execute(cli: Cli, settings: &LoanWorkflowConfig, db: Arc<DatabaseManager>) -> Result<()> {
    let engine = WorkflowEngine::new(db.clone(), db.clone(), EngineSettings::from(settings));

    // Close the pool whether or not the command succeeded
    let result = dispatch(cli, settings, &db, &engine).await;
    db.shutdown().await;
    result
}

async fn dispatch(
    cli: Cli,
    settings: &LoanWorkflowConfig,
    db: &DatabaseManager,
    engine: &WorkflowEngine,
) -> Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Create {
            amount,
            client_type,
            client_id,
            user,
        } => create_command(db, settings, amount, &client_type, client_id, &user, json).await,
        Commands::Status {
            loan_id,
            comprehensive,
        } => {
            if comprehensive {
                let status = engine.get_comprehensive_workflow_status(&loan_id).await?;
                print_output(json, &status, || {
                    let mut lines = vec![describe_state(&status.workflow_state)];
                    if let Some(approval) = &status.approval_state {
                        lines.push(format!("Approval: {}", approval.approval_status));
                    }
                    lines.push(format!("Can proceed: {}", status.can_proceed));
                    lines.extend(status.next_steps.iter().map(|s| format!("  - {s}")));
                    lines.join("\n")
                })
            } else {
                let state = engine.get_workflow_state(&loan_id).await?;
                print_output(json, &state, || describe_state(&state))
            }
        }
        Commands::History { loan_id } => {
            let steps = engine.get_workflow_history(&loan_id).await?;
            print_output(json, &steps, || {
                if steps.is_empty() {
                    return "No workflow steps recorded".to_string();
                }
                steps
                    .iter()
                    .map(|s| {
                        let notes = s.notes.as_deref().map(|n| format!(" ({n})")).unwrap_or_default();
                        format!("{}  {:<32} {}{}", s.completed_at.to_rfc3339(), s.step_name, s.user_id, notes)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Commands::Check { loan_id, to, user } => {
            let decision = engine.can_submit_to_next_stage(&loan_id, to, &user).await?;
            print_output(json, &decision, || decision.message())
        }
        Commands::Submit {
            loan_id,
            to,
            user,
            notes,
        } => {
            let outcome = engine
                .submit_to_next_stage(&loan_id, to, &user, notes.as_deref())
                .await?;
            print_outcome(json, &outcome)
        }
        Commands::Recall {
            loan_id,
            user,
            reason,
            to,
        } => {
            let outcome = engine.recall_loan(&loan_id, &user, &reason, to).await?;
            print_outcome(json, &outcome)
        }
        Commands::Resubmit {
            loan_id,
            user,
            notes,
        } => {
            let outcome = engine
                .resubmit_recalled_loan(&loan_id, &user, notes.as_deref())
                .await?;
            print_outcome(json, &outcome)
        }
        Commands::Reopen {
            loan_id,
            user,
            notes,
        } => {
            let outcome = engine
                .reopen_rejected_loan(&loan_id, &user, notes.as_deref())
                .await?;
            print_outcome(json, &outcome)
        }
    }
}

async fn create_command(
    db: &DatabaseManager,
    settings: &LoanWorkflowConfig,
    amount: f64,
    client_type: &str,
    client_id: Option<String>,
    user: &str,
    json: bool,
) -> Result<()> {
    let id = uuid::Uuid::new_v4().to_string();
    let application_number = generate_application_number(&settings.persistence.application_number_prefix);
    let mut record = LoanApplicationRecord::submitted(&id, application_number).with_amount(amount, client_type);
    record.client_id = client_id;
    record.created_by = Some(user.to_string());
    db.insert_loan(&record).await?;

    match db.determine_approval_level(amount, client_type).await? {
        Some(level) => {
            db.create_approval_assignment(&id, &level.id, None, user).await?;
        }
        None => tracing::warn!(loan_id = %id, amount, "No approval level covers this application"),
    }

    print_output(json, &record, || {
        format!("Created {} ({}) at stage submitted", record.application_number, record.id)
    })
}

fn describe_state(state: &loan_workflow::workflow::WorkflowState) -> String {
    format!(
        "{}: stage {} ({:?}), next {}{}{}",
        state.loan_application_id,
        state.current_stage,
        state.status,
        state.next_stage,
        if state.is_locked { ", locked" } else { "" },
        if state.can_be_recalled { ", recallable" } else { "" },
    )
}

fn print_outcome(json: bool, outcome: &TransitionOutcome) -> Result<()> {
    print_output(json, outcome, || {
        let mut text = outcome.message.clone();
        for failure in &outcome.advisory_failures {
            text.push_str(&format!("\n  warning: {failure}"));
        }
        text
    })?;
    if !outcome.success {
        bail!("transition rejected");
    }
    Ok(())
}

fn print_output<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn database(dir: &TempDir) -> Arc<DatabaseManager> {
        let url = format!("sqlite://{}", dir.path().join("cli.db").display());
        Arc::new(DatabaseManager::new(&url, 1, true).await.unwrap())
    }

    #[tokio::test]
    async fn test_pool_closed_after_failed_command() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir).await;
        let cli = Cli::try_parse_from(["loan-workflow", "status", "loan-missing"]).unwrap();

        let result = execute(cli, &LoanWorkflowConfig::default(), db.clone()).await;

        assert!(result.is_err());
        assert!(db.is_closed());
    }

    #[tokio::test]
    async fn test_pool_closed_after_rejected_transition() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir).await;
        db.insert_loan(&LoanApplicationRecord::submitted("loan-cli-1", "LA-20240301-000007"))
            .await
            .unwrap();
        let cli = Cli::try_parse_from([
            "loan-workflow",
            "submit",
            "loan-cli-1",
            "--to",
            "submitted",
            "--user",
            "officer-1",
        ])
        .unwrap();

        let result = execute(cli, &LoanWorkflowConfig::default(), db.clone()).await;

        assert!(result.is_err());
        assert!(db.is_closed());
    }
}
