//! Interactive glint shell.
//!
//! Usage: `glint [options.json]`
//!
//! Each line of input is a command:
//! + `:root <json>` sets the root value.
//! + `:set <name> <json>` sets an external variable.
//! + `:template <text>` renders a template.
//! + Anything else is evaluated as an expression.
use glint_cli::worker::{self, Command, Worker};
use glint_core::expr::Options;
use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

fn main() {
    #[cfg(feature = "tracing")]
    {
        logging::enable();
        let default_panic_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            logging::panic_hook(panic_info);
            default_panic_hook(panic_info);
        }));
    }

    let options = match std::env::args().nth(1).map(PathBuf::from) {
        None => Options::default(),
        Some(path) => match load_options(&path) {
            Ok(options) => options,
            Err(err) => {
                eprintln!("could not load options from {path:?}: {err}");
                std::process::exit(1);
            }
        },
    };

    let (command_tx, command_rx) = worker::command_channel();
    let (reply_tx, reply_rx) = worker::reply_channel();
    let mut worker = Worker::new(options, command_rx, reply_tx);
    let worker_handle = std::thread::Builder::new()
        .name("worker".to_string())
        .spawn(move || worker.run())
        .expect("could not launch worker");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                eprintln!("could not read input: {err}");
                break;
            }
        };
        let Some(cmd) = Command::parse(&line) else {
            if !line.trim().is_empty() {
                writeln!(stdout, "invalid command").unwrap();
            }
            continue;
        };

        command_tx.send(cmd).unwrap();
        match reply_rx.recv().unwrap() {
            Ok(output) => writeln!(stdout, "{output}").unwrap(),
            Err(err) => writeln!(stdout, "error: {err}").unwrap(),
        }
    }

    drop(command_tx);
    worker_handle.join().unwrap();
}

fn load_options(path: &Path) -> Result<Options, Box<dyn std::error::Error>> {
    let file = fs::File::open(path)?;
    Ok(serde_json::from_reader(io::BufReader::new(file))?)
}

#[cfg(feature = "tracing")]
mod logging {
    use std::io;
    use tracing_subscriber::{
        EnvFilter, Registry,
        fmt::{self, time::UtcTime},
        prelude::*,
    };

    /// Enable logging.
    pub fn enable() {
        let console_logger = fmt::layer()
            .with_writer(io::stderr)
            .with_timer(UtcTime::rfc_3339())
            .pretty();

        let subscriber = Registry::default()
            .with(EnvFilter::from_default_env())
            .with(console_logger);

        tracing::subscriber::set_global_default(subscriber).unwrap();
    }

    /// Log a panic before the default hook prints it.
    pub fn panic_hook(panic_info: &std::panic::PanicHookInfo) {
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.payload().downcast_ref::<String>().map(String::as_str));
        let location = panic_info.location().map(|location| location.to_string());
        tracing::error!(?location, ?payload, "glint panicked");
    }
}
