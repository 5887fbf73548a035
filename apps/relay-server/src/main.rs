use std::path::PathBuf;

use clap::Parser;
use relay_core::Config;

/// Multi-tenant chat relay daemon.
#[derive(Debug, Parser)]
#[command(version, about = "Chat relay daemon", long_about = None, bin_name = "relay-server")]
struct Cli {
  /// TCP port to listen on
  port: u16,
  /// Directory the audit log sink writes its timestamped log file into
  #[arg(long, default_value = "logs")]
  log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();
  relay_core::logging::init(&cli.log_dir);

  let config = Config::new(cli.port, cli.log_dir);
  relay_core::supervisor::run(config).await?;
  Ok(())
}
