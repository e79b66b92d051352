//! Command execution for the console.

use colored::Colorize;
use herald_client::{Client, Notice, SessionConfig};
use herald_protocol::{EventFile, DEFAULT_PORT};
use std::net::SocketAddr;
use tokio::task::JoinHandle;

const NOT_LOGGED_IN: &str = "Not logged in";

/// Console state: the active login, if any.
pub struct Context {
    virtual_host: String,
    active: Option<Active>,
}

struct Active {
    client: Client,
    read_task: JoinHandle<()>,
    notice_task: JoinHandle<()>,
}

impl Context {
    pub fn new(virtual_host: String) -> Self {
        Self {
            virtual_host,
            active: None,
        }
    }

    /// Tears down the active session, if any.
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            if active.client.is_connected() {
                let _ = active.client.logout().await;
            }
            active.read_task.abort();
            active.notice_task.abort();
        }
    }
}

/// Executes one console command line.
///
/// Returns `Ok(Some(output))` to print, `Ok(None)` for silent success.
pub async fn execute(
    ctx: &mut Context,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let cmd = parts[0];
    let args = &parts[1..];

    match cmd {
        "login" => {
            if ctx.active.is_some() {
                return Ok(Some(
                    "The client is already logged in, log out before trying again"
                        .yellow()
                        .to_string(),
                ));
            }
            if args.len() < 3 {
                return Ok(Some(
                    "Usage: login {host:port} {username} {password}".to_string(),
                ));
            }

            let addr = resolve_addr(args[0]).await?;
            let config = SessionConfig::new(addr).with_virtual_host(ctx.virtual_host.clone());
            let client = Client::new(config);
            client.login(args[1], args[2]).await?;

            let mut notices = client.subscribe_notices();
            let session = client.session();
            let read_task = tokio::spawn(async move {
                if let Err(e) = session.read_loop().await {
                    tracing::debug!("read loop ended: {e}");
                }
            });
            let notice_task = tokio::spawn(async move {
                while let Ok(notice) = notices.recv().await {
                    print_notice(&notice);
                }
            });

            ctx.active = Some(Active {
                client,
                read_task,
                notice_task,
            });
            Ok(Some(format!("Logging in to {}...", args[0].cyan())))
        }

        "join" => {
            let Some(active) = ctx.active.as_ref() else {
                return Ok(Some(NOT_LOGGED_IN.yellow().to_string()));
            };
            if args.is_empty() {
                return Ok(Some("Usage: join {channel}".to_string()));
            }
            active.client.join(args[0]).await?;
            Ok(Some(format!("Joining {}...", args[0].cyan())))
        }

        "exit" => {
            let Some(active) = ctx.active.as_ref() else {
                return Ok(Some(NOT_LOGGED_IN.yellow().to_string()));
            };
            if args.is_empty() {
                return Ok(Some("Usage: exit {channel}".to_string()));
            }
            active.client.leave(args[0]).await?;
            Ok(Some(format!("Leaving {}...", args[0].cyan())))
        }

        "report" => {
            let Some(active) = ctx.active.as_ref() else {
                return Ok(Some(NOT_LOGGED_IN.yellow().to_string()));
            };
            if args.is_empty() {
                return Ok(Some("Usage: report {file}".to_string()));
            }
            let file = EventFile::from_path(args[0])?;
            let published = active.client.report(&file).await?;
            Ok(Some(format!(
                "{} event(s) reported to {}",
                published,
                file.channel_name.cyan()
            )))
        }

        "summary" => {
            let Some(active) = ctx.active.as_ref() else {
                return Ok(Some(NOT_LOGGED_IN.yellow().to_string()));
            };
            if args.len() < 3 {
                return Ok(Some(
                    "Usage: summary {channel} {user} {file}".to_string(),
                ));
            }
            active.client.summary(args[0], args[1], args[2])?;
            Ok(Some(format!("Summary written to {}", args[2].cyan())))
        }

        "logout" => {
            let Some(active) = ctx.active.take() else {
                return Ok(Some(NOT_LOGGED_IN.yellow().to_string()));
            };
            match active.client.logout().await {
                Ok(()) => {
                    let _ = active.read_task.await;
                    active.notice_task.abort();
                    Ok(Some("Logged out.".green().to_string()))
                }
                Err(e) => {
                    active.read_task.abort();
                    active.notice_task.abort();
                    Err(e.into())
                }
            }
        }

        _ => Ok(Some(format!(
            "Unknown command: {cmd}. Type 'help' for help."
        ))),
    }
}

async fn resolve_addr(input: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let target = if input.contains(':') {
        input.to_string()
    } else {
        format!("{input}:{DEFAULT_PORT}")
    };
    let resolved = tokio::net::lookup_host(target.as_str()).await?.next();
    match resolved {
        Some(addr) => Ok(addr),
        None => Err(format!("could not resolve '{input}'").into()),
    }
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::Connected => println!("{}", "Connected to broker.".green()),
        Notice::ReceiptProcessed(label) => {
            println!("{}", format!("Server acknowledged: {label}").dimmed())
        }
        Notice::LoggedOut => println!("{}", "Logout acknowledged by broker.".dimmed()),
        Notice::ServerError { message, detail } => {
            if detail.is_empty() {
                println!("{}: {message}", "Server error".red());
            } else {
                println!("{}: {message}\n{detail}", "Server error".red());
            }
        }
    }
}
