use serde::Serialize;

use ipcpipe_transport::{create_pipe, TransferStrategy};

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        pipe_checks(),
        transfer_strategy_check(),
        fork_handoff_check(),
        compiled_features_check(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };
    print_doctor(&output, format);

    Ok(if has_fail { HEALTH_CHECK_FAILED } else { SUCCESS })
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("ipcpipe doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => println!("{}", output.overall),
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

/// Create a pipe and inspect its ends.
fn pipe_checks() -> Vec<CheckResult> {
    let (read, write) = match create_pipe() {
        Ok(pair) => pair,
        Err(err) => {
            return vec![CheckResult::new(
                "pipe_create",
                CheckStatus::Fail,
                format!("pipe creation failed: {err}"),
            )]
        }
    };

    let mut checks = vec![CheckResult::new(
        "pipe_create",
        CheckStatus::Pass,
        format!("created {read} / {write}"),
    )];

    let nonblocking = [&read, &write]
        .iter()
        .map(|endpoint| endpoint.is_nonblocking())
        .collect::<Result<Vec<_>, _>>();
    checks.push(match nonblocking {
        Ok(flags) if flags.iter().all(|f| *f) => {
            CheckResult::new("nonblocking", CheckStatus::Pass, "both ends non-blocking")
        }
        Ok(_) => CheckResult::new(
            "nonblocking",
            CheckStatus::Fail,
            "an end is in blocking mode",
        ),
        Err(err) => CheckResult::new("nonblocking", CheckStatus::Fail, err.to_string()),
    });

    checks.push(match write.pipe_capacity() {
        Ok(Some(bytes)) => {
            CheckResult::new("pipe_capacity", CheckStatus::Info, format!("{bytes} bytes"))
        }
        Ok(None) => CheckResult::new("pipe_capacity", CheckStatus::Skip, "not reported"),
        Err(err) => CheckResult::new("pipe_capacity", CheckStatus::Fail, err.to_string()),
    });

    let _ = read.close();
    let _ = write.close();
    checks
}

fn transfer_strategy_check() -> Vec<CheckResult> {
    let default = TransferStrategy::platform_default();
    let effective = TransferStrategy::from_env();
    vec![CheckResult::new(
        "transfer_strategy",
        CheckStatus::Info,
        format!("{effective} (platform default {default})"),
    )]
}

#[cfg(unix)]
fn fork_handoff_check() -> Vec<CheckResult> {
    use ipcpipe_frame::EndpointExt;
    use ipcpipe_process::{spawn, SpawnConfig};
    use std::time::Duration;

    let probe = async {
        let (reader, writer) = ipcpipe_frame::pipe()?;
        let mut child = spawn(
            [writer.into_endpoint()],
            |endpoints, ()| async move {
                let writer = endpoints
                    .into_iter()
                    .next()
                    .ok_or(ipcpipe_transport::TransportError::Closed)?
                    .into_writer()?;
                writer.put(b"ok").await
            },
            (),
            SpawnConfig::default().named("ipcpipe-doctor"),
        )?;
        let reply = reader.get().await?;
        let status = child.join(Some(Duration::from_secs(5))).await?;
        Ok::<_, ipcpipe_process::ProcessError>((reply, status))
    };

    let check = match crate::cmd::block_on(probe) {
        Ok(Ok((reply, Some(0)))) if &reply[..] == b"ok" => CheckResult::new(
            "fork_handoff",
            CheckStatus::Pass,
            "child received endpoint and replied",
        ),
        Ok(Ok((_, status))) => CheckResult::new(
            "fork_handoff",
            CheckStatus::Fail,
            format!("unexpected child outcome: {status:?}"),
        ),
        Ok(Err(err)) => CheckResult::new("fork_handoff", CheckStatus::Fail, err.to_string()),
        Err(err) => CheckResult::new("fork_handoff", CheckStatus::Fail, err.to_string()),
    };
    vec![check]
}

#[cfg(not(unix))]
fn fork_handoff_check() -> Vec<CheckResult> {
    vec![CheckResult::new(
        "fork_handoff",
        CheckStatus::Skip,
        "process hand-off requires fork",
    )]
}

fn compiled_features_check() -> Vec<CheckResult> {
    vec![CheckResult::new(
        "compiled_features",
        CheckStatus::Info,
        crate::cmd::envinfo::active_features().join(", "),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            checks: vec![CheckResult::new("x", CheckStatus::Pass, "ok")],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[cfg(unix)]
    #[test]
    fn pipe_checks_pass_locally() {
        let checks = pipe_checks();
        assert!(checks
            .iter()
            .all(|c| !matches!(c.status, CheckStatus::Fail)));
    }
}
