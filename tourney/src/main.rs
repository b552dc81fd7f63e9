//! Tourney: runs engine-vs-engine tournaments from a JSON definition.
//!
//! The tournament's pairings are registered with a [`GameManagerPool`] sized
//! to the requested concurrency. The runner reports progress periodically,
//! stops cleanly on Ctrl-C and prints the standings at the end. Finished games
//! can be written out as JSON lines.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arena::{GameManagerPool, GameRecord, ManagerSettings, Standing, Tournament, TournamentConfig};
use clap::Parser;
use engine::ProcessEngineFactory;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

#[derive(Parser)]
#[command(name = "tourney", about = "Engine-vs-engine tournament runner")]
struct Cli {
    /// Tournament definition (JSON).
    tournament: PathBuf,

    /// Games played in parallel. Overrides the tournament file.
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Write finished games to this file, one JSON object per line.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for rolling log files. Logs go to stderr when omitted.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "tourney");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .with(filter)
        .init();
    Ok(Some(guard))
}

fn format_standings(standings: &[Standing]) -> String {
    let width = standings
        .iter()
        .map(|s| s.engine.len())
        .max()
        .unwrap_or(0)
        .max("Engine".len());

    let mut out = format!(
        "{:>4}  {:<width$}  {:>5}  {:>4}  {:>4}  {:>4}  {:>6}  {:>6}\n",
        "Rank", "Engine", "Games", "W", "D", "L", "Points", "Score"
    );
    for (rank, s) in standings.iter().enumerate() {
        out.push_str(&format!(
            "{:>4}  {:<width$}  {:>5}  {:>4}  {:>4}  {:>4}  {:>6.1}  {:>5.1}%\n",
            rank + 1,
            s.engine,
            s.games,
            s.wins,
            s.draws,
            s.losses,
            s.points,
            s.score_percent()
        ));
    }
    out
}

fn write_records(path: &Path, records: &[GameRecord]) -> anyhow::Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_dir = cli.log_dir.clone().or_else(config::get_log_dir);
    let _guard = init_logging(log_dir.as_deref())?;

    let tournament_config = TournamentConfig::load(&cli.tournament)
        .with_context(|| format!("failed to load {}", cli.tournament.display()))?;
    let concurrency = cli
        .concurrency
        .or(tournament_config.concurrency)
        .unwrap_or_else(config::get_default_concurrency);
    let tournament = Tournament::new(tournament_config)?;

    tracing::info!(
        "Starting tournament '{}': {} engines, {} games, concurrency {}",
        tournament.config().name,
        tournament.config().engines.len(),
        tournament.total_games(),
        concurrency
    );

    let factory = ProcessEngineFactory::new(Duration::from_millis(config::get_handshake_timeout_ms()));
    let pool = GameManagerPool::new(
        tokio::runtime::Handle::current(),
        Arc::new(factory),
        ManagerSettings::from_env(),
    );
    tournament.register(&pool)?;
    pool.set_concurrency(concurrency, true, true)?;

    let interval = Duration::from_secs(config::get_progress_interval_secs());
    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, aborting running games");
                break;
            }
            done = pool.wait_for_completion(interval) => {
                if done {
                    break;
                }
                tracing::info!(
                    "{}/{} games finished, {} running",
                    tournament.records().len(),
                    tournament.total_games(),
                    pool.active_count()
                );
            }
        }
    }
    pool.shutdown().await;

    let records = tournament.records();
    if let Some(output) = &cli.output {
        write_records(output, &records)?;
        tracing::info!("Wrote {} games to {}", records.len(), output.display());
    }

    println!("{}", tournament.config().name);
    print!("{}", format_standings(&tournament.standings()));
    if !tournament.is_complete() {
        println!(
            "Tournament incomplete: {}/{} games played",
            records.len(),
            tournament.total_games()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standing(engine: &str, wins: u32, draws: u32, losses: u32) -> Standing {
        Standing {
            engine: engine.to_string(),
            games: wins + draws + losses,
            wins,
            draws,
            losses,
            points: f64::from(wins) + 0.5 * f64::from(draws),
        }
    }

    #[test]
    fn test_format_standings() {
        let table = format_standings(&[standing("stockfish", 3, 1, 0), standing("crafty", 0, 1, 3)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("Engine"));
        assert!(lines[1].trim_start().starts_with("1  stockfish"));
        assert!(lines[1].contains("3.5"));
        assert!(lines[1].ends_with("87.5%"));
        assert!(lines[2].contains("crafty"));
    }

    #[test]
    fn test_write_records_as_json_lines() {
        let tempdir = tempfile::tempdir().expect("failed to create temp dir");
        let path = tempdir.path().join("games.jsonl");

        let mut record = GameRecord::default();
        record.white_name = "a".to_string();
        write_records(&path, &[record.clone(), GameRecord::default()]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: GameRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from(["tourney", "event.json", "-c", "4", "--output", "games.jsonl"]);
        assert_eq!(cli.tournament, PathBuf::from("event.json"));
        assert_eq!(cli.concurrency, Some(4));
        assert_eq!(cli.output, Some(PathBuf::from("games.jsonl")));
        assert!(cli.log_dir.is_none());
    }
}
