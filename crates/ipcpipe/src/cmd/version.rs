use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("ipcpipe {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!("target: {}", crate::cmd::envinfo::target_triple());
    println!("os: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    println!(
        "default_strategy: {}",
        ipcpipe_transport::TransferStrategy::platform_default()
    );
    println!("fork_handoff: {}", cfg!(unix));
    Ok(SUCCESS)
}
