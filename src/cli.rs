use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "devlab")]
#[command(about = "Private lab orchestrator for VMs, Kubernetes clusters and software")]
#[command(version)]
pub struct Args {
    /// Path to the config file (default: ~/.devlab/config.yaml)
    #[arg(short, long, value_name = "FILE", env = "DEVLAB_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Validate the config, print the effective settings and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Override the introspection server bind address
    #[arg(long, value_name = "ADDR")]
    pub bind_addr: Option<String>,

    /// Override the introspection server port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Path to a .env file with provisioner overrides
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Override the state file path
    #[arg(long, value_name = "FILE")]
    pub state: Option<String>,
}

impl Args {
    /// Fold command line overrides into a loaded config
    pub fn apply(&self, config: &mut Config) {
        if let Some(addr) = &self.bind_addr {
            config.server.bind_addr = addr.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(state) = &self.state {
            config.persistence.path = state.clone();
        }
    }
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

use crate::config::Config;

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

/// Format the effective settings for `--dry-run`
pub fn format_dry_run(config: &Config, provisioner_url: &str) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "devlab v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));

    output.push_str("Scheduler:\n");
    output.push_str(&format!(
        "  algorithm: {}, allocation ratio: {}\n\n",
        config.scheduler.algorithm, config.scheduler.allocation_ratio
    ));

    output.push_str("Nodes:\n");
    output.push_str(&format!("  subnet range: {}\n", config.node.subnet_range));
    output.push_str(&format!(
        "  NAT ports: {}-{}\n\n",
        config.node.port_range_min, config.node.port_range_max
    ));

    output.push_str("Controllers:\n");
    output.push_str(&format!(
        "  lifecycle reaper: {} (every {}s, warn below {}s)\n",
        on_off(config.lifecycle.enabled),
        config.lifecycle.check_interval_secs,
        config.lifecycle.warning_threshold_secs
    ));
    output.push_str(&format!(
        "  health supervisor: {} (every {}s)\n",
        on_off(config.supervisor.enabled),
        config.supervisor.check_interval_secs
    ));
    output.push_str(&format!(
        "  route controller: {} (every {}s)\n\n",
        config.network.network_type, config.network.check_interval_secs
    ));

    output.push_str(&format!("Provisioner: {}\n", provisioner_url));
    output.push_str(&format!("State file: {}\n", config.state_path().display()));
    output.push_str(&format!(
        "Server: {}:{}\n",
        config.server.bind_addr, config.server.port
    ));

    output
}
