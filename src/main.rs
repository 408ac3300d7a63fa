use anyhow::Context as _;
use clap::Parser as _;
use tracing_subscriber::EnvFilter;

use nst::config::{Cli, Config};
use nst::event_loop::{EventLoop, NullRenderer};
use nst::ipc::IpcHandler;
use nst::term::Term;
use nst::tty::Tty;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("NST_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli);

    let mut term = Term::new(&config).context("failed to set up terminal")?;
    if let Some(io_file) = &config.io_file {
        let file = if io_file == "-" {
            // stderr carries diagnostics; media-copy output goes to stdout
            std::fs::File::options()
                .write(true)
                .open("/dev/stdout")
                .context("failed to open stdout for media copy")?
        } else {
            std::fs::File::options()
                .create(true)
                .append(true)
                .open(io_file)
                .with_context(|| format!("failed to open io file {io_file}"))?
        };
        term.set_print_file(file);
    }

    let tty = Tty::spawn(&config).context("failed to spawn child process")?;
    let ipc = IpcHandler::new().context("failed to create IPC endpoint")?;
    tracing::info!("ipc endpoint listening on abstract address {}", IpcHandler::address());

    let mut event_loop = EventLoop::new(term, tty, ipc, NullRenderer)
        .context("failed to set up event loop")?;

    let status = event_loop.run().context("event loop failed")?;
    std::process::exit(status);
}
