//! Interfaz de línea de comandos: parseo de argumentos y los modos
//! interactivo, batch, demo e `init-vector-store`.

use std::fmt;
use std::io::Write;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crate::models::{Domain, QueryResult};
use crate::system::SupportSystem;

pub const USAGE: &str = "\
Usage:
  helpdesk_router [--verbose|-v]                          interactive mode
  helpdesk_router --demo|-d                               run the demo queries
  helpdesk_router --batch|-b \"<query>\" [\"<query>\" ...]    answer several queries
  helpdesk_router init-vector-store [--domain|-d it|finance|both]
  helpdesk_router serve                                   start the HTTP API
  helpdesk_router --help|-h";

pub const DEMO_QUERIES: [&str; 6] = [
    "How do I reset my password?",
    "My computer won't connect to the network",
    "How do I submit an expense report?",
    "What's the budget approval process?",
    "I'm having trouble with my email",
    "How do I request a new software license?",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Interactive,
    Demo,
    Batch(Vec<String>),
    InitVectorStore(Vec<Domain>),
    Serve,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub verbose: bool,
    pub command: Command,
}

/// Parsea los argumentos (sin el nombre del programa).
pub fn parse_args<I>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut verbose = false;
    let mut command = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => {
                return Ok(Cli {
                    verbose,
                    command: Command::Help,
                })
            }
            "-d" | "--demo" if command.is_none() => command = Some(Command::Demo),
            "-b" | "--batch" if command.is_none() => {
                let queries: Vec<String> = args.by_ref().collect();
                if queries.is_empty() {
                    bail!("--batch necesita al menos una consulta");
                }
                command = Some(Command::Batch(queries));
            }
            "init-vector-store" if command.is_none() => {
                let mut selection = "both".to_string();
                while let Some(flag) = args.next() {
                    match flag.as_str() {
                        "-d" | "--domain" => {
                            selection = args
                                .next()
                                .context("--domain necesita un valor (it, finance o both)")?;
                        }
                        "-v" | "--verbose" => verbose = true,
                        other => bail!("Argumento desconocido: {other}"),
                    }
                }
                command = Some(Command::InitVectorStore(Domain::parse_selection(&selection)?));
            }
            "serve" if command.is_none() => command = Some(Command::Serve),
            other => bail!("Argumento desconocido: {other}"),
        }
    }

    Ok(Cli {
        verbose,
        command: command.unwrap_or(Command::Interactive),
    })
}

/// Totales de una ejecución batch o demo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[QueryResult]) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Batch summary: {} total, {} successful, {} failed",
            self.total, self.successful, self.failed
        )
    }
}

/// Formato de consola para el modo interactivo.
pub fn render_result(result: &QueryResult) -> String {
    let route = result
        .routing_decision
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut out = format!("\n{}\n\n", result.response_text);
    out.push_str(&format!(
        "[route: {route} | path: {} | tools: {} | success: {}]",
        if result.processing_path.is_empty() {
            "-".to_string()
        } else {
            result.processing_path.join(" -> ")
        },
        result.tools_used,
        result.success
    ));
    if let Some(err) = &result.error {
        out.push_str(&format!("\n[error: {err}]"));
    }
    out
}

/// Ejecuta un comando que no sea `serve`.
pub async fn run(command: Command, system: &SupportSystem) -> Result<ExitCode> {
    match command {
        Command::Help => {
            println!("{USAGE}");
            Ok(ExitCode::SUCCESS)
        }
        Command::InitVectorStore(domains) => Ok(init_vector_store(system, &domains).await),
        Command::Batch(queries) => {
            system.warm_up().await;
            run_batch(system, &queries).await
        }
        Command::Demo => {
            system.warm_up().await;
            let queries: Vec<String> = DEMO_QUERIES.iter().map(|q| q.to_string()).collect();
            run_batch(system, &queries).await
        }
        Command::Interactive => {
            system.warm_up().await;
            run_interactive(system).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve => bail!("serve se gestiona desde main"),
    }
}

async fn init_vector_store(system: &SupportSystem, domains: &[Domain]) -> ExitCode {
    info!("Reconstruyendo índices: {domains:?}");
    match system.init_vector_store(domains).await {
        Ok(reports) => {
            for report in reports {
                if report.no_documents() {
                    println!("WARNING {}: no documents found, index is empty", report.domain);
                } else {
                    println!("OK {report}");
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fallo al reconstruir el índice: {e}");
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run_batch(system: &SupportSystem, queries: &[String]) -> Result<ExitCode> {
    let mut results = Vec::with_capacity(queries.len());
    for query in queries {
        let result = system.process_query(query).await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        results.push(result);
    }
    let summary = BatchSummary::from_results(&results);
    println!("{summary}");
    Ok(ExitCode::SUCCESS)
}

async fn run_interactive(system: &SupportSystem) -> Result<()> {
    println!("IT / Finance support assistant. Type 'help' for commands, 'quit' to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" | "bye" => break,
            "help" => println!("{}", interactive_help()),
            "info" => println!("{}", system.info()),
            _ => {
                let result = system.process_query(input).await;
                println!("{}", render_result(&result));
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn interactive_help() -> String {
    let examples = DEMO_QUERIES
        .iter()
        .map(|q| format!("  - {q}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Commands:\n  help   show this message\n  info   show models, tools and index status\n  quit   leave (also exit, bye)\n\nExample questions:\n{examples}"
    )
}
