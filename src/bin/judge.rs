use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use snake_judge::{
    agent::bot_config::CONFIG_FILE_NAME, configuration::DEFAULT_REPLAY_OUTPUT, logger,
    prelude::*,
};

#[derive(Parser, Debug)]
#[command(
    name = "judge",
    version,
    about = "Snake Game Engine - A competitive Snake game for bot battles",
    after_help = "Example:\n  judge --bot1 python_bot --bot2 go_bot --width 25 --height 25 --max-turns 1000"
)]
struct Cli {
    /// Bot 1 folder name in the bots directory (must contain config.json).
    #[arg(long)]
    bot1: String,
    /// Bot 2 folder name in the bots directory (must contain config.json).
    #[arg(long)]
    bot2: String,
    /// Directory holding the bot folders.
    #[arg(long, default_value = "bots")]
    bots_dir: PathBuf,
    #[arg(long, default_value_t = 20)]
    width: i32,
    #[arg(long, default_value_t = 20)]
    height: i32,
    #[arg(long, default_value_t = 500)]
    max_turns: u32,
    /// Turn timeout in milliseconds, before scaling.
    #[arg(long, default_value_t = 500)]
    timeout: u64,
    /// Replay output file.
    #[arg(long, default_value = DEFAULT_REPLAY_OUTPUT)]
    output: PathBuf,
    /// Print the board every turn.
    #[arg(long)]
    verbose: bool,
    /// Optional map JSON file with obstacles.
    #[arg(long)]
    map: Option<PathBuf>,
    /// Seed for apple spawning, for reproducible matches.
    #[arg(long, env = "JUDGE_SEED")]
    seed: Option<u64>,
    /// Fixed turn timeout multiplier; skips calibration.
    #[arg(long, env = "TURN_TIMEOUT_SCALE")]
    timeout_scale: Option<f64>,
    /// Write full trace logs to a timestamped file in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn bot_directory(bots_dir: &Path, name: &str, slot: u8) -> Result<PathBuf> {
    let path = bots_dir.join(name);
    let path = std::path::absolute(&path)
        .with_context(|| format!("invalid bot{slot} path {}", path.display()))?;
    if !path.is_dir() {
        bail!("Bot {slot} directory does not exist: {}", path.display());
    }
    if !path.join(CONFIG_FILE_NAME).is_file() {
        bail!(
            "{CONFIG_FILE_NAME} not found in bot {slot} directory: {}",
            path.display()
        );
    }
    Ok(path)
}

fn run(cli: Cli) -> Result<()> {
    match &cli.log_dir {
        Some(dir) => logger::init_logger(dir)?,
        None => logger::init_console_logger(cli.verbose)?,
    }

    let bot1 = bot_directory(&cli.bots_dir, &cli.bot1, 1)?;
    let bot2 = bot_directory(&cli.bots_dir, &cli.bot2, 2)?;

    let mut config = MatchConfig::from_env()
        .with_grid_size(cli.width, cli.height)
        .with_max_turns(cli.max_turns)
        .with_turn_timeout(Duration::from_millis(cli.timeout))
        .with_bots(&bot1, &bot2)
        .with_replay_output(&cli.output)
        .with_map(cli.map.clone())
        .with_verbose(cli.verbose)
        .with_seed(cli.seed);
    if let Some(scale) = cli.timeout_scale {
        config = config.with_timeout_scale(scale);
    }

    println!("Configuration:");
    println!("  Grid Size:     {}x{}", cli.width, cli.height);
    println!("  Max Turns:     {}", cli.max_turns);
    println!("  Turn Timeout:  {}ms", cli.timeout);
    println!("  Replay Output: {}", cli.output.display());
    println!();
    println!("Bot 1: {}", bot1.display());
    println!("Bot 2: {}", bot2.display());
    println!();

    let game = Match::new(config).context("Error creating match")?;
    let outcome = game.play().context("Error running match")?;
    if !cli.verbose {
        print!("{outcome}");
    }
    outcome.save_replay()?;
    println!("Replay saved to: {}", cli.output.display());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<JudgeError>() {
                Some(JudgeError::Replay { .. }) => {
                    eprintln!("Match finished but the replay was not saved: {e:#}")
                }
                _ => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
