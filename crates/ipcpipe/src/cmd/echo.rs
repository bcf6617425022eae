use std::time::{Duration, Instant};

use ipcpipe_frame::{EndpointExt, FrameError, PipeReader, PipeWriter};
use ipcpipe_process::{spawn, SpawnConfig};
use ipcpipe_transport::{Endpoint, TransferStrategy};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cmd::{block_on, parse_duration, EchoArgs};
use crate::exit::{frame_error, process_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_key_values, OutputFormat};

#[derive(Debug, Serialize)]
struct EchoReport {
    messages: usize,
    payload_size: usize,
    strategy: &'static str,
    child_pid: u32,
    child_exit_code: i32,
    total_ms: f64,
    min_us: u128,
    median_us: u128,
    max_us: u128,
    messages_per_sec: f64,
}

type WorkerError = Box<dyn std::error::Error>;

/// Child side: echo every message back until the parent closes its writer.
async fn echo_worker(endpoints: Vec<Endpoint>, _args: ()) -> Result<(), WorkerError> {
    let [input, output]: [Endpoint; 2] = endpoints
        .try_into()
        .map_err(|got: Vec<Endpoint>| format!("expected 2 endpoints, got {}", got.len()))?;
    let reader = input.into_reader()?;
    let writer = output.into_writer()?;

    let mut echoed = 0usize;
    loop {
        match reader.get().await {
            Ok(message) => {
                writer.put(&message).await?;
                echoed += 1;
            }
            Err(FrameError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    debug!(echoed, "echo worker finished");
    Ok(())
}

pub fn run(args: EchoArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let strategy = args.strategy.unwrap_or_else(TransferStrategy::from_env);

    let report = block_on(round_trip(args.count, args.size, strategy, timeout))??;
    print_report(&report, format);
    Ok(SUCCESS)
}

async fn round_trip(
    count: usize,
    size: usize,
    strategy: TransferStrategy,
    timeout: Duration,
) -> CliResult<EchoReport> {
    let (to_child_read, to_child) = ipcpipe_frame::pipe().map_err(|e| frame_error("pipe", e))?;
    let (from_child, from_child_write) =
        ipcpipe_frame::pipe().map_err(|e| frame_error("pipe", e))?;

    let config = SpawnConfig::default()
        .named("ipcpipe-echo")
        .strategy(strategy);
    let mut child = spawn(
        [to_child_read.into_endpoint(), from_child_write.into_endpoint()],
        echo_worker,
        (),
        config,
    )
    .map_err(|err| process_error("spawn failed", err))?;

    let latencies = exchange(&to_child, &from_child, count, size).await;
    if let Err(err) = to_child.close() {
        warn!(%err, "failed to close request pipe");
    }
    let latencies = match latencies {
        Ok(latencies) => latencies,
        Err(err) => {
            let _ = child.terminate();
            return Err(err);
        }
    };

    let code = match child
        .join(Some(timeout))
        .await
        .map_err(|err| process_error("join failed", err))?
    {
        Some(code) => code,
        None => {
            let _ = child.terminate();
            return Err(CliError::new(
                TIMEOUT,
                format!("child {} did not exit within {timeout:?}", child.pid()),
            ));
        }
    };
    if code != 0 {
        return Err(CliError::new(
            FAILURE,
            format!("child {} exited with status {code}", child.pid()),
        ));
    }

    let report = summarize(latencies, size, strategy, child.pid(), code);
    info!(
        messages = report.messages,
        median_us = report.median_us as u64,
        "echo round trips complete"
    );
    Ok(report)
}

async fn exchange(
    writer: &PipeWriter,
    reader: &PipeReader,
    count: usize,
    size: usize,
) -> CliResult<Vec<Duration>> {
    let mut latencies = Vec::with_capacity(count);
    for index in 0..count {
        let payload: Vec<u8> = (0..size).map(|i| (i + index) as u8).collect();
        let started = Instant::now();
        writer
            .put(&payload)
            .await
            .map_err(|err| frame_error("send failed", err))?;
        let echoed = reader
            .get()
            .await
            .map_err(|err| frame_error("receive failed", err))?;
        latencies.push(started.elapsed());

        if echoed[..] != payload[..] {
            return Err(CliError::new(
                FAILURE,
                format!("message {index} came back altered"),
            ));
        }
    }
    Ok(latencies)
}

fn summarize(
    mut latencies: Vec<Duration>,
    payload_size: usize,
    strategy: TransferStrategy,
    child_pid: u32,
    child_exit_code: i32,
) -> EchoReport {
    latencies.sort_unstable();
    let total: Duration = latencies.iter().sum();
    let micros = |d: Option<&Duration>| d.map_or(0, Duration::as_micros);
    let messages_per_sec = if total.is_zero() {
        0.0
    } else {
        latencies.len() as f64 / total.as_secs_f64()
    };

    EchoReport {
        messages: latencies.len(),
        payload_size,
        strategy: strategy.name(),
        child_pid,
        child_exit_code,
        total_ms: total.as_secs_f64() * 1000.0,
        min_us: micros(latencies.first()),
        median_us: micros(latencies.get(latencies.len() / 2)),
        max_us: micros(latencies.last()),
        messages_per_sec,
    }
}

fn print_report(report: &EchoReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table | OutputFormat::Pretty => print_key_values(
            "echo",
            &[
                ("messages", report.messages.to_string()),
                ("payload size", report.payload_size.to_string()),
                ("strategy", report.strategy.to_string()),
                ("child pid", report.child_pid.to_string()),
                ("total", format!("{:.3} ms", report.total_ms)),
                ("min", format!("{} us", report.min_us)),
                ("median", format!("{} us", report.median_us)),
                ("max", format!("{} us", report.max_us)),
                ("rate", format!("{:.0} msg/s", report.messages_per_sec)),
            ],
        ),
        OutputFormat::Raw => println!("{}", report.messages),
    }
}
