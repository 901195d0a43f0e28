//! Command implementations. Each returns the process exit code; errors
//! bubble up to `main`, which maps them with `exit_code_for`.

use crate::cli::{Cli, Commands};
use crate::daemon::{cancel_on_ctrl_c, DaemonConfig, InspectionDaemon};
use crate::errors::{config_error, EXIT_SUCCESS};
use crate::output::{self, Style};
use anyhow::{Context, Result};
use netpilot_core::{Config, HealthState, Orchestrator, SessionStore};
use netpilot_shared::error::EXIT_RUNTIME_ERROR;
use netpilot_shared::{ApprovalDecision, ApprovalRequest, BatchReport, InspectionConfig, NetpilotError, Outcome};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Render options shared by all commands
#[derive(Debug, Clone, Copy)]
pub struct Render {
    pub json: bool,
    pub style: Style,
}

impl Render {
    fn outcome(&self, outcome: &Outcome) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(outcome)?);
        } else {
            print!("{}", output::render_outcome(self.style, outcome));
        }
        Ok(())
    }
}

pub async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref()).map_err(config_error)?;
    let orchestrator = Orchestrator::from_config(config).await.map_err(config_error)?;
    let render = Render { json: cli.json, style: Style::auto() };

    match cli.command {
        Commands::Query { text, targets } => query(&orchestrator, render, &Cli::joined(&text), targets).await,
        Commands::Chat { session } => chat(&orchestrator, render, session).await,
        Commands::Inspect { name, markdown, daemon: false, .. } => inspect(&orchestrator, render, &name, markdown).await,
        Commands::Inspect { name, markdown, daemon: true, every, max_runs } => {
            inspect_daemon(&orchestrator, render, &name, markdown, every, max_runs).await
        }
        Commands::Approve { session: None, .. } => list_pending(&orchestrator, render).await,
        Commands::Approve { session: Some(session), request, reject, edit } => {
            let decision = decision_from_flags(reject, edit)?;
            approve(&orchestrator, render, &session, request.as_deref(), decision).await
        }
        Commands::Status => status(&orchestrator, render).await,
    }
}

pub async fn query(orchestrator: &Orchestrator, render: Render, text: &str, targets: Vec<String>) -> Result<i32> {
    debug!("query: {}", text);
    let outcome = orchestrator.query(text, targets).await?;
    render.outcome(&outcome)?;
    Ok(outcome.exit_code())
}

/// Line-oriented session. Ctrl-C during a turn cancels it; `exit` or EOF
/// ends the session, which stays resumable with `--session`.
pub async fn chat(orchestrator: &Orchestrator, render: Render, session: Option<String>) -> Result<i32> {
    let session = session.unwrap_or_else(SessionStore::new_id);
    if !render.json {
        println!("session {}  (type 'exit' to leave)", session);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut code = EXIT_SUCCESS;
    loop {
        if !render.json {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(b"netpilot> ").await?;
            stdout.flush().await?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let turn = orchestrator.chat_turn(&session, line);
        tokio::pin!(turn);
        let result = tokio::select! {
            result = &mut turn => result,
            _ = tokio::signal::ctrl_c() => {
                // The turn holds the session until it returns; drive both
                let (cancelled, result) = tokio::join!(orchestrator.cancel_session(&session), &mut turn);
                let rejected = cancelled?;
                info!("Turn cancelled ({} pending request(s) rejected)", rejected);
                result
            }
        };

        match result {
            Ok(outcome) => {
                code = outcome.exit_code();
                render.outcome(&outcome)?;
            }
            Err(e) => {
                code = e.exit_code();
                eprintln!("error: {}", e);
            }
        }
    }
    Ok(code)
}

pub async fn inspect(orchestrator: &Orchestrator, render: Render, name: &str, markdown: bool) -> Result<i32> {
    let inspection = orchestrator.load_inspection(name)?;
    info!("Running inspection '{}' ({} checks)", inspection.name, inspection.checks.len());
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let report = orchestrator
        .run_inspection(&inspection, &cancel)
        .await
        .with_context(|| format!("inspection '{}' failed", inspection.name))?;
    print_report(render, markdown, &report, true)?;
    Ok(EXIT_SUCCESS)
}

fn print_report(render: Render, markdown: bool, report: &BatchReport, pretty: bool) -> Result<()> {
    if render.json {
        let text = if pretty { serde_json::to_string_pretty(report)? } else { serde_json::to_string(report)? };
        println!("{}", text);
    } else if markdown {
        print!("{}", report.to_markdown());
    } else {
        print!("{}", output::render_report(render.style, report));
    }
    Ok(())
}

/// `--every` wins over the document's schedule
pub fn daemon_interval(inspection: &InspectionConfig, every: Option<u64>) -> Result<Duration> {
    match every.map(Duration::from_secs).or_else(|| inspection.interval()) {
        Some(interval) => Ok(interval),
        None => Err(NetpilotError::Validation(format!(
            "inspection '{}' has no enabled schedule; pass --every <SECS>",
            inspection.name
        ))
        .into()),
    }
}

/// Run an inspection on its schedule until Ctrl-C. With `--json` every run
/// prints one report per line.
pub async fn inspect_daemon(
    orchestrator: &Orchestrator,
    render: Render,
    name: &str,
    markdown: bool,
    every: Option<u64>,
    max_runs: Option<u64>,
) -> Result<i32> {
    let inspection = orchestrator.load_inspection(name)?;
    let interval = daemon_interval(&inspection, every)?;
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let mut daemon = InspectionDaemon::new(DaemonConfig { every: interval, max_runs });
    let inspection = &inspection;
    daemon
        .run(&shutdown, |run, cancel| async move {
            debug!("Scheduled run {} of '{}'", run + 1, inspection.name);
            let report = orchestrator.run_inspection(inspection, &cancel).await?;
            print_report(render, markdown, &report, false)
        })
        .await?;
    Ok(EXIT_SUCCESS)
}

/// `--reject` and `--edit` are exclusive; neither means approve
pub fn decision_from_flags(reject: Option<String>, edit: Option<String>) -> Result<ApprovalDecision> {
    match (reject, edit) {
        (Some(reason), None) => Ok(ApprovalDecision::reject(if reason.trim().is_empty() {
            "rejected by operator".to_string()
        } else {
            reason
        })),
        (None, Some(json)) => match serde_json::from_str::<Value>(&json) {
            Ok(Value::Object(params)) => Ok(ApprovalDecision::Edit { params }),
            Ok(_) => Err(NetpilotError::Validation("--edit expects a JSON object".to_string()).into()),
            Err(e) => Err(NetpilotError::Validation(format!("--edit is not valid JSON: {}", e)).into()),
        },
        (None, None) => Ok(ApprovalDecision::Approve),
        (Some(_), Some(_)) => Err(NetpilotError::Validation("--reject and --edit are exclusive".to_string()).into()),
    }
}

pub async fn approve(
    orchestrator: &Orchestrator,
    render: Render,
    session: &str,
    request: Option<&str>,
    decision: ApprovalDecision,
) -> Result<i32> {
    info!("{} for session {}", decision.label(), session);
    let outcome = orchestrator.resume(session, request, decision).await?;
    render.outcome(&outcome)?;
    Ok(outcome.exit_code())
}

/// Requests suspended by earlier processes live in their sessions
async fn pending_requests(orchestrator: &Orchestrator) -> Result<Vec<ApprovalRequest>> {
    let mut pending = Vec::new();
    for summary in orchestrator.sessions().await? {
        if summary.pending.is_none() {
            continue;
        }
        if let Some(request) = orchestrator.session(&summary.id).await?.and_then(|s| s.pending) {
            pending.push(request);
        }
    }
    Ok(pending)
}

async fn list_pending(orchestrator: &Orchestrator, render: Render) -> Result<i32> {
    let pending = pending_requests(orchestrator).await?;
    if render.json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
    } else {
        print!("{}", output::render_pending(render.style, &pending));
    }
    Ok(EXIT_SUCCESS)
}

pub async fn status(orchestrator: &Orchestrator, render: Render) -> Result<i32> {
    let report = orchestrator.health().await;
    if render.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", output::render_health(render.style, &report));
    }
    Ok(match report.state {
        HealthState::Broken => EXIT_RUNTIME_ERROR,
        _ => EXIT_SUCCESS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decision_flags() {
        assert_eq!(decision_from_flags(None, None).unwrap(), ApprovalDecision::Approve);
        assert_eq!(
            decision_from_flags(Some("maintenance window".into()), None).unwrap(),
            ApprovalDecision::reject("maintenance window")
        );
        match decision_from_flags(None, Some(r#"{"hostname":"R1"}"#.into())).unwrap() {
            ApprovalDecision::Edit { params } => assert_eq!(params.get("hostname"), Some(&json!("R1"))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_daemon_interval() {
        let doc = "name: core\ndevices: [R1]\nchecks:\n  - name: c\n    tool: t\n";
        let plain = InspectionConfig::from_yaml(doc).unwrap();
        let err = daemon_interval(&plain, None).unwrap_err();
        assert_eq!(crate::errors::exit_code_for(&err), 3);
        assert_eq!(daemon_interval(&plain, Some(5)).unwrap(), Duration::from_secs(5));

        let scheduled = InspectionConfig::from_yaml(&format!("{}schedule:\n  interval_secs: 60\n", doc)).unwrap();
        assert_eq!(daemon_interval(&scheduled, None).unwrap(), Duration::from_secs(60));
        assert_eq!(daemon_interval(&scheduled, Some(2)).unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_bad_edit_is_validation_error() {
        let err = decision_from_flags(None, Some("[1]".into())).unwrap_err();
        assert_eq!(crate::errors::exit_code_for(&err), 3);
        let err = decision_from_flags(None, Some("{".into())).unwrap_err();
        assert_eq!(crate::errors::exit_code_for(&err), 3);
    }
}
