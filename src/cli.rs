// src/cli.rs
use clap::Parser;

/// ct-sentinel: Certificate Transparency brand-protection monitor
///
/// Continuously ingests a single CT log and records certificates whose
/// CN or SANs match a configured set of keywords.
#[derive(Parser, Debug, Clone)]
#[command(name = "ct-sentinel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to TOML config file
    #[arg(short = 'c', long = "config", default_value = "config.toml")]
    pub config: String,

    /// Verbose logging (set log level to debug)
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Quiet logging (set log level to warn)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Run a single ingestion tick and exit, instead of starting the
    /// background worker loop.
    #[arg(long = "once")]
    pub once: bool,
}

impl Cli {
    /// Validate flag combinations and return errors for invalid usage.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.verbose && self.quiet {
            anyhow::bail!("Cannot specify both --verbose and --quiet");
        }

        Ok(())
    }

    /// The effective log level, honoring the CLI override precedence over
    /// the config file's `logging.level`.
    pub fn log_level<'a>(&self, config_level: &'a str) -> &'a str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            config_level
        }
    }
}
