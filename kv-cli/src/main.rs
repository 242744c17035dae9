use std::io::{stdin, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{env, panic};

use anyhow::Result;
use clap::{CommandFactory, Parser};
use log::info;
use rustyline::error::ReadlineError;
use rustyline::Editor;

use kvcli::command::Command;
use kvcli::config::ConfigLoad;
use kvcli::rusty::CliHelper;
use kvcli::session::Session;
use kvcli::trace;

#[derive(Debug, Parser, PartialEq)]
#[command(version)]
#[command(author, about, disable_help_flag = true)]
pub struct Args {
    #[clap(short, long, help = "Print the parsed arguments and exit")]
    debug: bool,

    #[clap(long, help = "Print help information")]
    help: bool,

    /// Configuration file path, default 'config/kvcli.toml'.
    #[clap(short = 'c', long = "config", default_value = "config/kvcli.toml")]
    config: String,

    #[clap(subcommand)]
    cmd: Option<Command>,

    #[clap(long = "quiet", short = 'q', default_value = "false")]
    quiet: bool,

    #[clap(short = 'l', long, default_value = "info")]
    log_level: String,

    #[clap(short = 'n', long, help = "Force non-interactive mode", default_value = "false")]
    non_interactive: bool,

    #[clap(long, require_equals = true, help = "A single line to execute, then exit")]
    query: Option<String>,
}

/// CMD like:
///     kvcli             ==>  Cli { quiet: false }
///     kvcli --quiet      ==>  Cli { quiet: true }
///     kvcli get foo      ==>  one-shot GET
pub fn main() -> Result<()> {
    setup_panic_hooks();

    let args = Args::parse();
    if args.debug {
        println!("{:?}", args);
    }

    let log_dir = format!("{}/.kvcli", env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let _guards = trace::init_logging(&log_dir, &args.log_level)?;
    info!("kvcli start args: {:?}", &args);

    let mut cmd = Args::command();
    if args.help {
        cmd.print_help()?;
        return Ok(());
    }

    let mut cfg = ConfigLoad::load(&args.config);
    info!("kvcli start config: {:?}", &cfg);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("received Ctrl+C!");
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let is_terminal = stdin().is_terminal();
    let is_repl = is_terminal && !args.non_interactive && args.query.is_none() && args.cmd.is_none();
    if is_repl {
        cfg.terminal_update();
        print_banner();
    }

    let mut session = Session::try_new(&cfg)?;

    if let Some(cmd) = args.cmd {
        run_one_shot(&mut session, cmd)?;
        return session.teardown().map_err(Into::into);
    }

    if is_repl {
        run_repl(&mut session, &running)?;
    } else {
        match args.query {
            Some(query) => {
                for line in query.split(';') {
                    if !line.trim().is_empty() {
                        println!("{}", session.handle_line(line)?);
                    }
                }
            }
            None => session.handle_reader(stdin().lock())?,
        }
    }

    session.teardown()?;
    Ok(())
}

fn print_banner() {
    eprintln!();
    eprintln!("██  ██  █        █");
    eprintln!("██ ██   ██      ██");
    eprintln!("███      ██    ██");
    eprintln!("██ ██     ██  ██");
    eprintln!("██  ██     ████  KV Storage CLI");
    eprintln!();
    eprintln!("Welcome to kvcli. Type BEGIN/COMMIT/ABORT or GET/SET/DEL directly.");
}

fn run_one_shot(session: &mut Session, cmd: Command) -> Result<()> {
    let line = match cmd {
        Command::Get { key } => format!("GET {key}"),
        Command::Set { key, value } => format!("SET {key} {value}"),
        Command::Delete { key } => format!("DEL {key}"),
    };
    println!("{}", session.handle_line(&line)?);
    Ok(())
}

fn run_repl(session: &mut Session, running: &Arc<AtomicBool>) -> Result<()> {
    let keywords = Arc::new(
        ["BEGIN", "COMMIT", "ABORT", "GET", "SET", "DEL", "DELETE"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    let mut editor: Editor<CliHelper> = Editor::new()?;
    editor.set_helper(Some(CliHelper::with_keywords(keywords)));

    while running.load(Ordering::SeqCst) {
        match editor.readline("kvcli > ") {
            Ok(line) => {
                editor.add_history_entry(line.as_str());
                match session.handle_line(&line) {
                    Ok(out) => {
                        if !out.is_empty() {
                            println!("{out}");
                        }
                    }
                    Err(err) => eprintln!("ERR {err}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("readline error: {err}");
                break;
            }
        }
    }
    Ok(())
}

fn setup_panic_hooks() {
    let meta = human_panic::Metadata {
        version: env!("CARGO_PKG_VERSION").into(),
        name: env!("CARGO_PKG_NAME").into(),
        authors: env!("CARGO_PKG_AUTHORS").replace(':', ", ").into(),
        homepage: env!("CARGO_PKG_HOMEPAGE").into(),
    };

    let default_hook = panic::take_hook();

    if env::var("RUST_BACKTRACE").is_err() {
        panic::set_hook(Box::new(move |info: &panic::PanicInfo| {
            default_hook(info);
            let file_path = human_panic::handle_dump(&meta, info);
            human_panic::print_msg(file_path, &meta)
                .expect("human-panic: printing error message to console failed");
        }));
    }
}
