//! Command-line interface for the backup daemon and its operator commands.

use clap::{Parser, Subcommand};

/// Scheduled database backups with copy retention
#[derive(Parser, Debug)]
#[command(name = "backup-keeper")]
#[command(about = "Scheduled database backups with TTL and count-based retention", long_about = None)]
pub struct KeeperCli {
    #[command(subcommand)]
    pub command: KeeperCommand,

    /// Output format (json, text)
    #[arg(long, default_value = "text", global = true)]
    pub format: String,
}

#[derive(Subcommand, Debug)]
pub enum KeeperCommand {
    /// Recover and start every backup config, then run until Ctrl-C
    Serve,

    /// Show every backup config with its status and counters
    Status,

    /// Execute one backup run for a config
    RunNow {
        /// Backup config id
        id: String,
    },

    /// List the copies of a config, newest first
    Copies {
        /// Backup config id
        id: String,
    },

    /// Delete one copy of a config
    DeleteCopy {
        /// Backup config id
        id: String,
        /// Copy name
        name: String,
    },

    /// Show the audit log of a config
    Logs {
        /// Backup config id
        id: String,
    },
}

/// Print output in the requested format
pub fn output(format: &str, message: &str, json_value: Option<serde_json::Value>) {
    match format {
        "json" => {
            if let Some(value) = json_value {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&value).unwrap_or_default()
                );
            } else {
                println!("{}", serde_json::json!({ "message": message }));
            }
        }
        _ => {
            println!("{}", message);
        }
    }
}

/// Print table row
pub fn table_row(cells: &[&str]) {
    println!("{}", cells.join("\t"));
}
