// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `stackdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stackdag",
    version,
    about = "Converge a stack of dependent network resources, in dependency order.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the stack file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Stackdag.toml")]
    pub config: String,

    /// Validate the stack file and print the plan without touching any
    /// resource.
    #[arg(long)]
    pub dry_run: bool,

    /// After converging, tear the whole stack down again (dependents
    /// first).
    #[arg(long)]
    pub destroy: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STACKDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Role of the caller, checked by policy rules. Repeatable.
    #[arg(long = "role", value_name = "ROLE")]
    pub roles: Vec<String>,

    /// User id of the caller.
    #[arg(long, value_name = "ID")]
    pub user: Option<String>,

    /// Tenant (project) id of the caller.
    #[arg(long, value_name = "ID")]
    pub tenant: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_repeated_roles() {
        let args = CliArgs::parse_from(["stackdag"]);
        assert_eq!(args.config, "Stackdag.toml");
        assert!(!args.dry_run && !args.destroy);
        assert!(args.roles.is_empty());

        let args = CliArgs::parse_from([
            "stackdag", "--config", "x.toml", "--role", "admin", "--role", "member", "--destroy",
            "--log-level", "debug",
        ]);
        assert_eq!(args.config, "x.toml");
        assert_eq!(args.roles, vec!["admin", "member"]);
        assert!(args.destroy);
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }
}
