use anyhow::{Context, Result};
use clap::Parser;
use sqlcompat::{open, open_config, BackendMode, CompatConfig, CompatRow, Connection};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const MAX_ROWS: usize = 10;
const MAX_WIDTH: usize = 30;

/// Runs SQLite-dialect statements against SQLite or PostgreSQL.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Backend to use when no configuration file is given (defaults to `DB_BACKEND`, then sqlite).
    #[clap(long)]
    backend: Option<BackendMode>,

    /// Database file (SQLite) or DSN (PostgreSQL); overrides the configuration.
    #[clap(long)]
    target: Option<String>,

    /// Statement to run; may be repeated. Without it statements are read from stdin.
    #[clap(short = 'c', long = "command")]
    commands: Vec<String>,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(false).compact().init();

    let cli = Cli::parse();
    let mut conn = connect(&cli)?;
    info!(mode = %conn.mode(), "connected");

    if cli.commands.is_empty() {
        let stdin = io::stdin();
        prompt()?;
        for line in stdin.lock().lines() {
            let line = line.context("Failed to read statement from stdin")?;
            let statement = line.trim();
            if statement.eq_ignore_ascii_case("exit") || statement.eq_ignore_ascii_case("quit") {
                break;
            }
            if !statement.is_empty() {
                run(&mut conn, statement);
            }
            prompt()?;
        }
    } else {
        for statement in &cli.commands {
            run(&mut conn, statement);
        }
    }

    conn.close().context("Failed to close connection")?;
    Ok(())
}

fn connect(cli: &Cli) -> Result<Connection> {
    if let Some(path) = &cli.config {
        let mut config = CompatConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?;
        if let Some(target) = &cli.target {
            match config.backend {
                BackendMode::Sqlite => config.sqlite.path = PathBuf::from(target),
                BackendMode::Postgres => config.postgres.dsn = Some(target.clone()),
            }
        }
        return open_config(&config).context("Failed to open configured connection");
    }

    let config = CompatConfig::default().with_env_overrides()?;
    let mode = cli.backend.unwrap_or(config.backend);
    let target = match (&cli.target, mode) {
        (Some(target), _) => target.clone(),
        (None, BackendMode::Sqlite) => config.sqlite.path.display().to_string(),
        (None, BackendMode::Postgres) => config
            .postgres
            .dsn
            .clone()
            .context("--target or POSTGRES_DSN is required for the postgres backend")?,
    };
    open(mode, &target).with_context(|| format!("Failed to open {mode} connection"))
}

fn prompt() -> Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "sql> ")?;
    stdout.flush()?;
    Ok(())
}

/// Runs one statement, prints its rows, and ends the transaction.
fn run(conn: &mut Connection, statement: &str) {
    let result = {
        let mut cursor = conn.cursor();
        let outcome = cursor.execute(statement, &[]).and_then(|cursor| {
            let columns = cursor.columns().to_vec();
            let rowcount = cursor.rowcount();
            cursor.fetch_all().map(|rows| (columns, rows, rowcount))
        });
        outcome
    };

    match result {
        Ok((columns, rows, rowcount)) => {
            if !columns.is_empty() {
                print_rows(&columns, &rows);
            }
            // Row-returning statements end their transaction as well.
            if let Err(e) = conn.commit() {
                error!(error = %e, "commit failed");
                println!("error: {e}");
                return;
            }
            if columns.is_empty() {
                match rowcount {
                    Some(n) => println!("ok ({n} row(s) affected)"),
                    None => println!("ok"),
                }
            }
        }
        Err(e) => {
            println!("error: {e}");
            if let Err(rollback) = conn.rollback() {
                error!(error = %rollback, "rollback failed");
            }
        }
    }
}

fn print_rows(columns: &[String], rows: &[CompatRow]) {
    println!("{}", columns.join(" | "));
    for row in rows.iter().take(MAX_ROWS) {
        let cells: Vec<String> = row.values().iter().map(|v| truncate(&v.to_string())).collect();
        println!("{}", cells.join(" | "));
    }
    if rows.len() > MAX_ROWS {
        println!("... {} more row(s)", rows.len() - MAX_ROWS);
    }
    println!("({} row(s))", rows.len());
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_WIDTH {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX_WIDTH - 3).collect();
        format!("{head}...")
    }
}
