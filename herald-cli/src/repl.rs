//! Interactive console.

use crate::commands::{self, Context};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

const HELP_TEXT: &str = r#"
Available commands:
  login {host:port} {username} {password}   Connect to a broker
  join {channel}                            Subscribe to a channel
  exit {channel}                            Unsubscribe from a channel
  report {file}                             Publish the events in a JSON file
  summary {channel} {user} {file}           Write a channel summary report
  logout                                    Disconnect from the broker

  help                                      Show this help
  quit                                      Leave the console
"#;

pub async fn run(virtual_host: String) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "herald console".bold().cyan());

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".herald_history"))
        .unwrap_or_else(|_| ".herald_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    let mut ctx = Context::new(virtual_host);

    loop {
        let prompt = format!("{} ", "herald>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "help" || line == "?" {
                    println!("{HELP_TEXT}");
                    continue;
                }
                if line == "quit" || line == "q" {
                    break;
                }

                match commands::execute(&mut ctx, line).await {
                    Ok(Some(output)) => println!("{output}"),
                    Ok(None) => {}
                    Err(e) => println!("{}: {e}", "Error".red()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {err:?}", "Error".red());
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    ctx.shutdown().await;
    println!("{}", "Bye.".dimmed());

    Ok(())
}
