use std::collections::BTreeMap;

use ipcpipe_transport::{TransferStrategy, STRATEGY_ENV};
use serde::Serialize;

use crate::cmd::EnvinfoArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_key_values, OutputFormat};

const ENV_VARS: &[&str] = &[STRATEGY_ENV, "IPCPIPE_LOG_LEVEL", "RUST_LOG"];

#[derive(Serialize)]
struct EnvInfoOutput {
    version: &'static str,
    target: String,
    os: &'static str,
    arch: &'static str,
    default_strategy: &'static str,
    effective_strategy: &'static str,
    features: Vec<&'static str>,
    environment: BTreeMap<&'static str, Option<String>>,
}

pub fn run(_args: EnvinfoArgs, format: OutputFormat) -> CliResult<i32> {
    let environment = ENV_VARS
        .iter()
        .map(|name| (*name, std::env::var(name).ok()))
        .collect();

    let output = EnvInfoOutput {
        version: env!("CARGO_PKG_VERSION"),
        target: target_triple(),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        default_strategy: TransferStrategy::platform_default().name(),
        effective_strategy: TransferStrategy::from_env().name(),
        features: active_features(),
        environment,
    };

    print_envinfo(&output, format);
    Ok(SUCCESS)
}

pub(crate) fn target_triple() -> String {
    if let Some(target) = option_env!("IPCPIPE_BUILD_TARGET") {
        return target.to_string();
    }
    format!(
        "{}-unknown-{}",
        std::env::consts::ARCH,
        std::env::consts::OS
    )
}

pub(crate) fn active_features() -> Vec<&'static str> {
    let mut features = vec!["cli"];
    if cfg!(feature = "process") {
        features.push("process");
    }
    if cfg!(unix) {
        features.push("fork-handoff");
    }
    features
}

fn print_envinfo(output: &EnvInfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut rows = vec![
                ("version", output.version.to_string()),
                ("target", output.target.clone()),
                ("platform", format!("{} ({})", output.os, output.arch)),
                ("default strategy", output.default_strategy.to_string()),
                ("effective strategy", output.effective_strategy.to_string()),
                ("features", output.features.join(", ")),
            ];
            for (name, value) in &output.environment {
                rows.push((*name, value.clone().unwrap_or_else(|| "(not set)".into())));
            }
            print_key_values("ipcpipe environment", &rows);
        }
        OutputFormat::Raw => println!("{}", output.version),
    }
}
