pub mod cli;
pub mod commands;
pub mod config;
pub mod item;
pub mod render;
pub mod storage;
pub mod store;
pub mod view_model;

use std::ffi::OsString;
use std::io;

use anyhow::{Context, anyhow};
use clap::Parser;
use tracing::{debug, info};

use crate::commands::{Command, ReaderConfirm};
use crate::storage::{FileStorage, Persistence};
use crate::view_model::{AssumeYes, SyncState, ViewModel};

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let pre = cli::preprocess_args(&raw_args)?;
    let cli = cli::GlobalCli::parse_from(pre.cleaned_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(verbose = cli.verbose, quiet = cli.quiet, "starting tabdo");
    debug!(?pre.rc_overrides, "preprocessed rc overrides");

    let mut cfg = config::Config::load(cli.config.as_deref())?;
    cfg.apply_overrides(
        pre.rc_overrides
            .into_iter()
            .chain(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value))),
    );

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref())
        .context("failed to resolve data directory")?;
    let storage = FileStorage::open(&data_dir)
        .with_context(|| format!("failed to open storage at {}", data_dir.display()))?;
    let mut vm = ViewModel::open(Persistence::new(storage, cfg.storage_key()));

    let renderer = render::Renderer::new(&cfg)?;
    let inv = cli::Invocation::parse(&cfg, cli.rest)?;
    let command = Command::from_invocation(&inv)?;
    let assume_yes = cli.yes || !cfg.get_bool("confirm")?.unwrap_or(true);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let stdin = io::stdin();

    match command {
        Command::Shell => {
            let mut input = stdin.lock();
            commands::run_shell(&mut vm, &cfg, &renderer, &mut input, &mut out, assume_yes)?;
        }
        command if assume_yes => {
            commands::dispatch(&mut vm, &renderer, &mut AssumeYes, command, &mut out)?;
        }
        command => {
            let mut input = stdin.lock();
            let mut confirm = ReaderConfirm::new(&mut input);
            commands::dispatch(&mut vm, &renderer, &mut confirm, command, &mut out)?;
        }
    }

    if let SyncState::Diverged { reason } = vm.sync_state() {
        return Err(anyhow!("changes were not saved: {reason}"));
    }

    info!("done");
    Ok(())
}
