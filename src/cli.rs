//! # Command Line
//!
//! ```bash
//! # Run according to the `daemon` setting in the config file
//! vault-reflector /etc/vault-reflector/config.yaml
//!
//! # Force a single pass, e.g. from a Job or init container
//! vault-reflector --once config.yaml
//!
//! # Force daemon mode
//! vault-reflector --daemon config.yaml
//! ```

use clap::Parser;
use std::path::PathBuf;

/// Reflects secrets from HashiCorp Vault into Kubernetes Secrets
#[derive(Debug, Parser)]
#[command(name = "vault-reflector", version)]
#[command(
    about = "Reflects secrets from HashiCorp Vault into Kubernetes Secrets",
    long_about = None,
    after_help = "\
Exit codes:
  10  invalid arguments
  20  configuration file unreadable
  21  configuration file unparseable
  22  configuration invalid
  30  vault client construction failed
  31  kubernetes client construction failed
  32  authentication failed (single pass)
  40  reflection failed (single pass)
"
)]
pub struct Cli {
    /// Path to the YAML configuration file
    pub config: PathBuf,

    /// Keep running and refresh on the configured interval
    #[arg(long, conflicts_with = "once")]
    pub daemon: bool,

    /// Reflect once and exit, regardless of the config file
    #[arg(long)]
    pub once: bool,
}

impl Cli {
    /// Daemon mode after applying command-line overrides
    #[must_use]
    pub fn daemon_mode(&self, configured: bool) -> bool {
        if self.daemon {
            true
        } else if self.once {
            false
        } else {
            configured
        }
    }
}
