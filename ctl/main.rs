#![forbid(unsafe_code)]

//! `session-broker-ctl`: local CLI companion for `session-broker`.
//!
//! Connects to the control socket and sends one JSON command per run.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand, ValueEnum};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "session-broker-ctl",
    about = "Local CLI for the session-broker daemon",
    version,
    long_about = None
)]
struct Cli {
    /// Control socket name (must match the daemon's `control_ipc_name`).
    #[arg(long, default_value = "session-broker-ctl")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

/// Power-related capability to probe.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum Capability {
    Shutdown,
    Restart,
    Suspend,
    Hibernate,
}

/// Action chosen when confirming a logout prompt.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogoutAction {
    Logout,
    Shutdown,
    Restart,
    Suspend,
    Hibernate,
}

impl LogoutAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::Shutdown => "shutdown",
            Self::Restart => "restart",
            Self::Suspend => "suspend",
            Self::Hibernate => "hibernate",
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the session summary.
    Info,

    /// List registered clients.
    List,

    /// Show the manager state.
    State,

    /// Save the session, optionally under another name.
    Checkpoint {
        /// Session name to store this checkpoint under.
        name: Option<String>,
    },

    /// End the session.
    Logout {
        /// Ask for confirmation first.
        #[arg(long)]
        dialog: bool,
        /// Do not save the session.
        #[arg(long)]
        no_save: bool,
    },

    /// End the session and power off.
    Shutdown {
        /// Do not save the session.
        #[arg(long)]
        no_save: bool,
    },

    /// End the session and reboot.
    Restart {
        /// Do not save the session.
        #[arg(long)]
        no_save: bool,
    },

    /// Suspend to RAM.
    Suspend,

    /// Suspend to disk.
    Hibernate,

    /// Check whether a power action is possible.
    Can {
        /// Action to probe.
        #[arg(value_enum)]
        action: Capability,
    },

    /// Ask an idle client to exit.
    Terminate {
        /// Client id.
        client_id: String,
    },

    /// Confirm a pending logout prompt.
    Confirm {
        /// What to do after the session ends.
        #[arg(long, value_enum, default_value_t = LogoutAction::Logout)]
        action: LogoutAction,
        /// Do not save the session.
        #[arg(long)]
        no_save: bool,
    },

    /// Cancel a pending logout prompt.
    Cancel,
}

fn build_request(command: &Command) -> serde_json::Value {
    match command {
        Command::Info => serde_json::json!({ "command": "get_info" }),
        Command::List => serde_json::json!({ "command": "list_clients" }),
        Command::State => serde_json::json!({ "command": "get_state" }),
        Command::Checkpoint { name } => {
            let mut req = serde_json::json!({ "command": "checkpoint" });
            if let Some(n) = name {
                req["name"] = serde_json::Value::String(n.clone());
            }
            req
        }
        Command::Logout { dialog, no_save } => serde_json::json!({
            "command": "logout",
            "show_dialog": dialog,
            "allow_save": !no_save,
        }),
        Command::Shutdown { no_save } => {
            serde_json::json!({ "command": "shutdown", "allow_save": !no_save })
        }
        Command::Restart { no_save } => {
            serde_json::json!({ "command": "restart", "allow_save": !no_save })
        }
        Command::Suspend => serde_json::json!({ "command": "suspend" }),
        Command::Hibernate => serde_json::json!({ "command": "hibernate" }),
        Command::Can { action } => {
            let command = match action {
                Capability::Shutdown => "can_shutdown",
                Capability::Restart => "can_restart",
                Capability::Suspend => "can_suspend",
                Capability::Hibernate => "can_hibernate",
            };
            serde_json::json!({ "command": command })
        }
        Command::Terminate { client_id } => {
            serde_json::json!({ "command": "terminate_client", "client_id": client_id })
        }
        Command::Confirm { action, no_save } => serde_json::json!({
            "command": "answer_logout",
            "choice": { "shutdown_type": action.as_str(), "allow_save": !no_save },
        }),
        Command::Cancel => serde_json::json!({ "command": "answer_logout", "choice": null }),
    }
}

fn main() {
    let args = Cli::parse();
    let request_json = build_request(&args.command);

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to session-broker: {err}");
            eprintln!("Is session-broker running with control_ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Connect to the control socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
