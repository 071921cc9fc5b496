//! Interactive console binary.
//!
//! Reads lines from stdin, routes dot-commands host-side, submits everything
//! else for evaluation and prints the event stream until the submission's
//! terminal event arrives.

use std::io::{self, BufRead, Write};
use std::path::Path;

use script_console_rs::host::command::{Command, HELP_TEXT};
use script_console_rs::host::history::History;
use script_console_rs::prelude::*;
use script_console_rs::DiagnosticMethod;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SandboxConfig::default();
    let history_path = History::storage_path(Path::new("."));
    let mut host = ConsoleHost::start(config).await?;
    if let Ok(stored) = History::load(&history_path, 300) {
        *host.history_mut() = stored;
    }

    println!(
        "script-console {} - type .help for commands",
        env!("CARGO_PKG_VERSION")
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("error reading input: {}", e);
                break;
            }
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('.') {
            match Command::parse(line) {
                Some(Command::Help) => println!("{}", HELP_TEXT),
                Some(Command::Clear) => print!("\x1b[2J\x1b[H"),
                Some(Command::Reset) => {
                    host.reset().await?;
                    println!("context reset; ready");
                }
                Some(Command::History) => {
                    for (i, entry) in host.history().entries().enumerate() {
                        println!("{:>4}  {}", i + 1, entry);
                    }
                }
                Some(Command::Load(spec)) => {
                    if host.load_module(&spec).is_err() {
                        println!("context is dead; use .reset");
                        continue;
                    }
                    drain_load(&mut host).await;
                }
                None => println!("unknown command; try .help"),
            }
            continue;
        }

        let id = match host.submit(line) {
            Ok(id) => id,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        // Drain events until this submission's terminal event.
        while let Some(event) = host.recv().await {
            let done = matches!(
                &event,
                ConsoleEvent::Result { id: got, .. } if *got == id
            ) || matches!(
                &event,
                ConsoleEvent::Fault { id: Some(got), .. } if *got == id
            ) || matches!(&event, ConsoleEvent::Fault { id: None, value, .. }
                    if value.starts_with("ChannelFault"));
            render(&event);
            if done {
                break;
            }
        }
    }

    if let Err(e) = host.history().save(&history_path) {
        eprintln!("could not save history: {}", e);
    }
    Ok(())
}

/// After a load request: print events until the loader reports success or
/// failure.
async fn drain_load(host: &mut ConsoleHost) {
    while let Some(event) = host.recv().await {
        let done = match &event {
            ConsoleEvent::Diagnostic { method, text, .. } => {
                *method == DiagnosticMethod::Info && text.starts_with("Loaded ")
            }
            ConsoleEvent::Fault { id: None, .. } => true,
            _ => false,
        };
        render(&event);
        if done {
            break;
        }
    }
}

fn render(event: &ConsoleEvent) {
    match event {
        ConsoleEvent::Diagnostic { method, text, .. } => {
            println!("[{}] {}", method.as_str(), text)
        }
        ConsoleEvent::Table { headers, rows, .. } => {
            println!("| {} |", headers.join(" | "));
            for row in rows {
                println!("| {} |", row.join(" | "));
            }
        }
        ConsoleEvent::Result { value, elapsed, .. } => match elapsed {
            Some(elapsed) => println!("=> {}  ({} ms)", value, elapsed.as_millis()),
            None => println!("=> {}", value),
        },
        ConsoleEvent::Fault { value, .. } => println!("!! {}", value),
        ConsoleEvent::Status { text, .. } => println!(".. {}", text),
    }
}
