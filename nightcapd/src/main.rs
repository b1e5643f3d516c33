//! nightcap daemon
//!
//! Waits for the system to announce sleep, runs the configured command and
//! holds a sleep inhibit lock until the command is done or time runs out.

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use nightcap_utils::logging::init_logging;
use nightcap_utils::Config;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info};

use nightcapd::backend::{dbus, Backend, ScriptBackend};
use nightcapd::cli::Args;
use nightcapd::runner::{Launcher, ProcessLauncher};
use nightcapd::Reactor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load_or_default(args.config.as_deref())
        .context("failed to load configuration")?;
    args.apply_to(&mut config);
    config.validate().context("invalid configuration")?;

    let guard = init_logging(args.log_options(&config));

    let Some(settings) = args.settings(&config) else {
        Args::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "a COMMAND is required, on the command line or as reactor.command",
            )
            .exit();
    };

    info!("nightcapd starting up");
    debug!(
        program = %settings.program,
        args = ?settings.args,
        delay = ?settings.reactor.delay,
        mode = ?settings.reactor.mode,
        "settings resolved"
    );

    let (backend, signals, launcher): (Box<dyn Backend>, _, Box<dyn Launcher>) =
        if settings.script {
            let (backend, signals, launcher) = ScriptBackend::spawn(tokio::io::stdin());
            (Box::new(backend), signals, Box::new(launcher))
        } else {
            let (backend, signals) = dbus::open()
                .await
                .context("failed to initialise a sleep backend")?;
            let launcher = ProcessLauncher::new(settings.program.clone(), settings.args.clone())?;
            (backend, signals, Box::new(launcher))
        };
    debug!(backend = backend.name(), filter = %backend.filter(), "backend ready");

    let mut reactor = Reactor::new(settings.reactor, backend, signals, launcher);

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let result = tokio::select! {
        res = reactor.run() => res,
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
            Ok(())
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
            Ok(())
        }
    };

    reactor.shutdown().await;

    if let Err(e) = result {
        error!("{}", e);
        drop(guard);
        std::process::exit(1);
    }

    info!("nightcapd stopped");
    Ok(())
}
