// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotroot::{
    config::ElevationMode,
    context::load_settings,
    helper::{self, Request},
    sync::{AutoConfirm, InquirePrompter, Prompter},
    Context, Elevate, Escalator, InProcess, Interrupt, Invocation, Outcome, Overrides, RootSync,
    SyncError, Trigger,
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::{
    io::{self, Write},
    path::PathBuf,
    process::exit,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  dotroot [options] push [push-options]\n  dotroot [options] pull [pull-options]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to settings file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Push(opts) => run_push(self.config, opts),
            Command::Pull(opts) => run_pull(self.config, opts),
            Command::Helper(request) => run_helper(request),
        }
    }

    fn args(&self) -> Option<&str> {
        match &self.command {
            Command::Push(opts) => opts.sync.args.as_deref(),
            Command::Pull(opts) => opts.sync.args.as_deref(),
            Command::Helper(_) => None,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Copy mirror root onto privileged file system, and prune what is no longer managed.
    #[command(override_usage = "dotroot push [options]")]
    Push(PushOptions),

    /// Bring privileged changes back into mirror root.
    #[command(override_usage = "dotroot pull [options]")]
    Pull(PullOptions),

    /// Perform privileged helper operation.
    #[command(subcommand, hide = true)]
    Helper(Request),
}

#[derive(Args, Clone, Debug)]
struct SyncOptions {
    /// Mirror root standing in for the privileged root.
    #[arg(long, value_name = "path")]
    pub mirror: Option<PathBuf>,

    /// Privileged root the mirror root stands in for.
    #[arg(long, value_name = "path")]
    pub privileged: Option<PathBuf>,

    /// File to persist deferred removals into.
    #[arg(long, value_name = "path")]
    pub rootlist: Option<PathBuf>,

    /// Chezmoi invocation to act on instead of CHEZMOI_ARGS.
    #[arg(long, value_name = "args")]
    pub args: Option<String>,

    /// How to perform privileged operations.
    #[arg(long, value_enum, value_name = "mode")]
    pub elevation: Option<ElevationMode>,

    /// Fail instead of prompting for credentials.
    #[arg(long)]
    pub non_interactive: bool,
}

impl SyncOptions {
    fn into_overrides(self, trigger: Trigger) -> Overrides {
        Overrides {
            mirror: self.mirror,
            privileged: self.privileged,
            rootlist: self.rootlist,
            args: self.args,
            trigger,
            elevation: self.elevation,
            non_interactive: self.non_interactive,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PushOptions {
    #[command(flatten)]
    pub sync: SyncOptions,

    /// Way chezmoi triggered this run.
    #[arg(long, value_enum, default_value = "hook", value_name = "kind")]
    pub trigger: Trigger,

    /// Remove every removable privileged path without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PullOptions {
    #[command(flatten)]
    pub sync: SyncOptions,
}

fn main() {
    let cli = Cli::parse();

    // INVARIANT: Log to stderr, the helper speaks through stdout.
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(io::stderr);
    let level = cli
        .args()
        .map(String::from)
        .or_else(|| std::env::var("CHEZMOI_ARGS").ok())
        .and_then(|args| Invocation::parse(args).ok())
        .map_or("info", |invocation| invocation.log_level());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run() {
        error!("{error:?}");
        exit(exit_code(&error));
    }

    exit(0)
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<SyncError>()
        .map_or(1, SyncError::exit_code)
}

/// Turn the first Ctrl-C into a graceful stop, and the second into a hard exit.
fn interrupt() -> Interrupt {
    let interrupt = Interrupt::new();
    let handler = interrupt.clone();
    let installed = ctrlc::set_handler(move || {
        if handler.is_raised() {
            exit(130);
        }
        warn!("interrupt received, stopping after current item");
        handler.raise();
    });
    if let Err(err) = installed {
        warn!("cannot catch interrupts: {err}");
    }

    interrupt
}

fn elevator(context: &Context) -> Result<Box<dyn Elevate>> {
    let elevation = context.elevation();
    match elevation.mode {
        ElevationMode::Never => Ok(Box::new(InProcess)),
        ElevationMode::Auto => Ok(Box::new(Escalator::detect(elevation.non_interactive)?)),
    }
}

fn run_push(config: Option<PathBuf>, opts: PushOptions) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let context = Context::from_process(settings, opts.sync.into_overrides(opts.trigger))?;
    let elevator = elevator(&context)?;
    let mut prompter: Box<dyn Prompter> = if opts.yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(InquirePrompter)
    };

    let outcome = RootSync::new(&context, elevator.as_ref(), context.chezmoi())
        .with_interrupt(interrupt())
        .push(prompter.as_mut())?;
    match outcome {
        Outcome::Pushed(report) => info!(
            "push done: {} copied, {} removed, {} deferred",
            report.copied,
            report.removed.len(),
            report.deferred.len()
        ),
        Outcome::Interrupted => info!("push interrupted"),
        _ => {}
    }

    Ok(())
}

fn run_pull(config: Option<PathBuf>, opts: PullOptions) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let context = Context::from_process(settings, opts.sync.into_overrides(Trigger::Hook))?;
    let elevator = elevator(&context)?;

    let outcome = RootSync::new(&context, elevator.as_ref(), context.chezmoi())
        .with_interrupt(interrupt())
        .pull()?;
    if outcome == Outcome::Interrupted {
        info!("pull interrupted");
    }

    Ok(())
}

fn run_helper(request: Request) -> Result<()> {
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    helper::execute(&request, &mut stdin, &mut stdout)?;
    stdout.flush()?;

    Ok(())
}
