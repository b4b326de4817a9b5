use std::io::{BufRead, Write};

use anyhow::anyhow;
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::item::{Category, ItemKey};
use crate::render::Renderer;
use crate::storage::KeyValueStorage;
use crate::view_model::{Confirm, ViewModel};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "check", "edit", "cancel", "delete", "work", "travel", "list", "export", "shell",
        "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Check(String),
    /// Without text this enters edit mode; with text it commits the edit.
    Edit {
        target: String,
        text: Option<String>,
    },
    Cancel(String),
    Delete(String),
    SetCategory(Category),
    List,
    Export,
    Shell,
    Help,
    Version,
}

impl Command {
    pub fn from_invocation(inv: &Invocation) -> anyhow::Result<Self> {
        let args = &inv.command_args;
        let target = |name: &str| -> anyhow::Result<String> {
            match args.as_slice() {
                [key] => Ok(key.clone()),
                [] => Err(anyhow!("{name} requires a key or position")),
                [_, extra, ..] => Err(anyhow!(
                    "{name} takes one key or position, unexpected argument: {extra} \
                     (options such as --yes go before the command)"
                )),
            }
        };
        let no_args = |command: Command| -> anyhow::Result<Command> {
            match args.first() {
                None => Ok(command),
                Some(extra) => Err(anyhow!(
                    "{} takes no arguments, unexpected argument: {extra}",
                    inv.command
                )),
            }
        };

        let command = match inv.command.as_str() {
            "add" => {
                if args.is_empty() {
                    return Err(anyhow!("add requires text argument"));
                }
                Command::Add(args.join(" "))
            }
            "check" => Command::Check(target("check")?),
            "edit" => {
                let target = target("edit")?;
                let text = (args.len() > 1).then(|| args[1..].join(" "));
                Command::Edit { target, text }
            }
            "cancel" => Command::Cancel(target("cancel")?),
            "delete" => Command::Delete(target("delete")?),
            "work" => no_args(Command::SetCategory(Category::Work))?,
            "travel" => no_args(Command::SetCategory(Category::Travel))?,
            "list" => no_args(Command::List)?,
            "export" => no_args(Command::Export)?,
            "shell" => no_args(Command::Shell)?,
            "help" => no_args(Command::Help)?,
            "version" => no_args(Command::Version)?,
            other => return Err(anyhow!("unknown command: {other}")),
        };
        Ok(command)
    }
}

/// Reads a yes/no answer from a line-oriented input.
pub struct ReaderConfirm<'a, R> {
    input: &'a mut R,
}

impl<'a, R: BufRead> ReaderConfirm<'a, R> {
    pub fn new(input: &'a mut R) -> Self {
        Self { input }
    }
}

impl<R: BufRead> Confirm for ReaderConfirm<'_, R> {
    fn confirm(&mut self, prompt: &str) -> bool {
        eprint!("{prompt} [y/N] ");
        let mut answer = String::new();
        match self.input.read_line(&mut answer) {
            Ok(_) => matches!(
                answer.trim().to_ascii_lowercase().as_str(),
                "y" | "yes"
            ),
            Err(err) => {
                warn!(error = %err, "failed to read confirmation, treating as no");
                false
            }
        }
    }
}

#[instrument(skip(vm, renderer, confirm, out))]
pub fn dispatch<S: KeyValueStorage, W: Write>(
    vm: &mut ViewModel<S>,
    renderer: &Renderer,
    confirm: &mut dyn Confirm,
    command: Command,
    out: &mut W,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Add(text) => cmd_add(vm, &text, out),
        Command::Check(target) => cmd_check(vm, &target, out),
        Command::Edit { target, text } => cmd_edit(vm, &target, text.as_deref(), out),
        Command::Cancel(target) => {
            let key = vm.resolve_key(&target)?;
            vm.cancel_edit(key)?;
            writeln!(out, "Stopped editing to-do {key}.")?;
            Ok(())
        }
        Command::Delete(target) => cmd_delete(vm, &target, confirm, out),
        Command::SetCategory(category) => {
            vm.set_category(category);
            writeln!(
                out,
                "Switched to {} ({} to-do(s)).",
                category.label(),
                vm.count_in(category)
            )?;
            Ok(())
        }
        Command::List => renderer.print_view(out, vm),
        Command::Export => {
            let json = serde_json::to_string_pretty(vm.store())?;
            writeln!(out, "{json}")?;
            Ok(())
        }
        Command::Shell => Err(anyhow!("shell cannot be started from inside a shell")),
        Command::Help => cmd_help(out),
        Command::Version => {
            writeln!(out, "{}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
    }
}

fn cmd_add<S: KeyValueStorage, W: Write>(
    vm: &mut ViewModel<S>,
    text: &str,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command add");
    match vm.add(text) {
        Some(key) => {
            let pos = position_of(vm, key);
            writeln!(out, "Added to-do {pos} ({key}) to {}.", vm.active_category().label())?;
        }
        None => writeln!(out, "Nothing to add.")?,
    }
    Ok(())
}

fn cmd_check<S: KeyValueStorage, W: Write>(
    vm: &mut ViewModel<S>,
    target: &str,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command check");
    let key = vm.resolve_key(target)?;
    let checked = vm.toggle_check(key)?;
    let verb = if checked { "Checked" } else { "Unchecked" };
    writeln!(out, "{verb} to-do {key}.")?;
    Ok(())
}

fn cmd_edit<S: KeyValueStorage, W: Write>(
    vm: &mut ViewModel<S>,
    target: &str,
    text: Option<&str>,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command edit");
    let key = vm.resolve_key(target)?;
    match text {
        None => {
            vm.begin_edit(key)?;
            writeln!(out, "Editing to-do {key}.")?;
        }
        Some(text) => {
            if vm.commit_edit(key, text)? {
                writeln!(out, "Updated to-do {key}.")?;
            } else {
                writeln!(out, "Nothing to change.")?;
            }
        }
    }
    Ok(())
}

fn cmd_delete<S: KeyValueStorage, W: Write>(
    vm: &mut ViewModel<S>,
    target: &str,
    confirm: &mut dyn Confirm,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command delete");
    let key = vm.resolve_key(target)?;
    if vm.delete(key, confirm)? {
        writeln!(out, "Deleted to-do {key}.")?;
    } else {
        writeln!(out, "Kept to-do {key}.")?;
    }
    Ok(())
}

fn cmd_help<W: Write>(out: &mut W) -> anyhow::Result<()> {
    writeln!(
        out,
        "Commands: add <text>, check <key|#>, edit <key|#> [text], cancel <key|#>, \
         delete <key|#>, work, travel, list, export, shell, help, version"
    )?;
    writeln!(
        out,
        "Options (-y/--yes, --data, --config, --rc, -v, -q) go before the command."
    )?;
    writeln!(
        out,
        "In the shell, plain lines add a to-do and ':<command>' runs a command (':quit' leaves)."
    )?;
    Ok(())
}

fn position_of<S: KeyValueStorage>(vm: &ViewModel<S>, key: ItemKey) -> usize {
    vm.visible_items()
        .iter()
        .position(|(candidate, _)| *candidate == key)
        .map(|idx| idx + 1)
        .unwrap_or(0)
}

/// Interactive session: plain lines fill and submit the input field, lines
/// starting with `:` run commands. The view is redrawn after every line.
#[instrument(skip_all)]
pub fn run_shell<S: KeyValueStorage, R: BufRead, W: Write>(
    vm: &mut ViewModel<S>,
    cfg: &Config,
    renderer: &Renderer,
    input: &mut R,
    out: &mut W,
    assume_yes: bool,
) -> anyhow::Result<()> {
    info!("starting shell");
    renderer.print_view(out, vm)?;

    loop {
        write!(out, "tabdo> ")?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            break;
        }
        let line = line.trim();

        let result = if let Some(rest) = line.strip_prefix(':') {
            let tokens: Vec<String> = rest.split_whitespace().map(ToString::to_string).collect();
            if matches!(tokens.first().map(String::as_str), Some("q" | "quit" | "exit")) {
                break;
            }
            run_shell_command(vm, cfg, renderer, input, out, assume_yes, &tokens)
        } else if line.is_empty() {
            Ok(())
        } else {
            vm.set_input(line);
            match vm.submit_input() {
                Some(key) => {
                    let pos = position_of(vm, key);
                    writeln!(out, "Added to-do {pos} ({key}).").map_err(anyhow::Error::from)
                }
                None => Ok(()),
            }
        };

        if let Err(err) = result {
            writeln!(out, "error: {err:#}")?;
        }
        renderer.print_view(out, vm)?;
    }

    info!("shell closed");
    Ok(())
}

fn run_shell_command<S: KeyValueStorage, R: BufRead, W: Write>(
    vm: &mut ViewModel<S>,
    cfg: &Config,
    renderer: &Renderer,
    input: &mut R,
    out: &mut W,
    assume_yes: bool,
    tokens: &[String],
) -> anyhow::Result<()> {
    let inv = Invocation::from_tokens(cfg, tokens)?;
    let command = Command::from_invocation(&inv)?;
    if command == Command::List {
        // the view is redrawn after every line anyway
        return Ok(());
    }

    if assume_yes {
        dispatch(vm, renderer, &mut crate::view_model::AssumeYes, command, out)
    } else {
        let mut confirm = ReaderConfirm::new(input);
        dispatch(vm, renderer, &mut confirm, command, out)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{Command, dispatch, expand_command_abbrev, known_command_names, run_shell};
    use crate::cli::Invocation;
    use crate::config::Config;
    use crate::item::Category;
    use crate::render::Renderer;
    use crate::storage::{MemoryStorage, Persistence};
    use crate::view_model::{AssumeYes, ViewModel};

    fn vm() -> ViewModel<MemoryStorage> {
        ViewModel::open(Persistence::new(MemoryStorage::new(), "@toDos1"))
    }

    fn parse(tokens: &[&str]) -> anyhow::Result<Command> {
        let tokens: Vec<String> = tokens.iter().map(|s| s.to_string()).collect();
        let inv = Invocation::from_tokens(&Config::default(), &tokens)?;
        Command::from_invocation(&inv)
    }

    #[test]
    fn abbreviation_must_be_unique() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("tr", &known), Some("travel"));
        assert_eq!(expand_command_abbrev("de", &known), Some("delete"));
        assert_eq!(expand_command_abbrev("e", &known), None);
    }

    #[test]
    fn commands_parse_their_arguments() {
        assert_eq!(
            parse(&["add", "buy", "milk"]).unwrap(),
            Command::Add("buy milk".to_string())
        );
        assert_eq!(
            parse(&["edit", "2"]).unwrap(),
            Command::Edit {
                target: "2".to_string(),
                text: None
            }
        );
        assert_eq!(
            parse(&["edit", "2", "oat", "milk"]).unwrap(),
            Command::Edit {
                target: "2".to_string(),
                text: Some("oat milk".to_string())
            }
        );
        assert_eq!(parse(&["wo"]).unwrap(), Command::SetCategory(Category::Work));
        assert!(parse(&["add"]).is_err());
        assert!(parse(&["check"]).is_err());
    }

    #[test]
    fn trailing_arguments_are_not_silently_dropped() {
        let err = parse(&["delete", "1", "-y"]).unwrap_err();
        assert!(err.to_string().contains("unexpected argument: -y"));
        assert!(parse(&["check", "1", "2"]).is_err());
        assert!(parse(&["cancel", "1", "now"]).is_err());
        assert!(parse(&["work", "x"]).is_err());
        assert!(parse(&["list", "--all"]).is_err());
        assert_eq!(parse(&["delete", "1"]).unwrap(), Command::Delete("1".to_string()));
    }

    #[test]
    fn dispatch_runs_view_model_operations() {
        let mut vm = vm();
        let renderer = Renderer::with_color(false);
        let mut out = Vec::new();

        dispatch(&mut vm, &renderer, &mut AssumeYes, Command::Add("buy milk".into()), &mut out)
            .unwrap();
        dispatch(&mut vm, &renderer, &mut AssumeYes, Command::Check("1".into()), &mut out)
            .unwrap();
        dispatch(
            &mut vm,
            &renderer,
            &mut AssumeYes,
            Command::SetCategory(Category::Travel),
            &mut out,
        )
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Added to-do 1 ("));
        assert!(text.contains("Checked to-do"));
        assert!(text.contains("Switched to Travel (0 to-do(s))."));
        assert_eq!(vm.active_category(), Category::Travel);
        assert!(vm.store().items.values().all(|item| item.check));
    }

    #[test]
    fn shell_session_adds_edits_and_deletes() {
        let mut vm = vm();
        let renderer = Renderer::with_color(false);
        let script = "buy milk\n\
                      call bank\n\
                      :edit 1\n\
                      :edit 1 buy oat milk\n\
                      :check 2\n\
                      :delete 2\n\
                      n\n\
                      :travel\n\
                      lisbon\n\
                      :bogus\n\
                      :quit\n\
                      ignored after quit\n";
        let mut input = Cursor::new(script.as_bytes());
        let mut out = Vec::new();

        run_shell(&mut vm, &Config::default(), &renderer, &mut input, &mut out, false).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Updated to-do"));
        assert!(text.contains("Kept to-do"));
        assert!(text.contains("error: unknown or ambiguous command: bogus"));

        assert_eq!(vm.count_in(Category::Work), 2);
        assert_eq!(vm.count_in(Category::Travel), 1);
        let work: Vec<_> = vm
            .store()
            .items_in(Category::Work)
            .map(|(_, item)| (item.text.clone(), item.check))
            .collect();
        assert_eq!(
            work,
            vec![
                ("buy oat milk".to_string(), false),
                ("call bank".to_string(), true)
            ]
        );
        assert!(!text.contains("ignored after quit"));
    }

    #[test]
    fn shell_stops_at_end_of_input() {
        let mut vm = vm();
        let mut input = Cursor::new("gym\n".as_bytes());
        let mut out = Vec::new();

        run_shell(
            &mut vm,
            &Config::default(),
            &Renderer::with_color(false),
            &mut input,
            &mut out,
            true,
        )
        .unwrap();
        assert_eq!(vm.visible_items().len(), 1);
    }
}
