use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::item::Category;
use crate::storage::KeyValueStorage;
use crate::view_model::{SyncState, ViewModel};

const ACTIVE_TAB: &str = "1;37";
const INACTIVE_TAB: &str = "90";
const STRIKE: &str = "9";
const WARN: &str = "33";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);
        Ok(Self::with_color(color && io::stdout().is_terminal()))
    }

    pub fn with_color(color: bool) -> Self {
        Self { color }
    }

    /// Writes the tab header, input placeholder and the active tab's items.
    #[tracing::instrument(skip(self, out, vm))]
    pub fn print_view<W: Write, S: KeyValueStorage>(
        &self,
        out: &mut W,
        vm: &ViewModel<S>,
    ) -> anyhow::Result<()> {
        let active = vm.active_category();

        let tabs = [Category::Work, Category::Travel]
            .into_iter()
            .map(|category| self.tab_label(category, category == active))
            .collect::<Vec<_>>()
            .join("   ");
        writeln!(out, "{tabs}")?;
        writeln!(out, "> {}", active.placeholder())?;
        writeln!(out)?;

        let visible = vm.visible_items();
        if visible.is_empty() {
            writeln!(out, "No to-dos on the {} tab.", active.label())?;
        } else {
            let headers = vec![
                "#".to_string(),
                "Done".to_string(),
                "To do".to_string(),
                "Key".to_string(),
            ];

            let rows = visible
                .iter()
                .enumerate()
                .map(|(idx, (key, item))| {
                    let checkbox = if item.check { "[x]" } else { "[ ]" };
                    let mut text = if item.check {
                        self.paint(&item.text, STRIKE)
                    } else {
                        item.text.clone()
                    };
                    if item.edit_mode {
                        text.push_str(" (editing)");
                    }
                    vec![
                        (idx + 1).to_string(),
                        checkbox.to_string(),
                        text,
                        key.to_string(),
                    ]
                })
                .collect();

            write_table(&mut *out, headers, rows)?;
        }

        if let SyncState::Diverged { reason } = vm.sync_state() {
            writeln!(
                out,
                "{}",
                self.paint(&format!("warning: changes not saved: {reason}"), WARN)
            )?;
        }

        Ok(())
    }

    fn tab_label(&self, category: Category, active: bool) -> String {
        if self.color {
            let code = if active { ACTIVE_TAB } else { INACTIVE_TAB };
            self.paint(category.label(), code)
        } else if active {
            format!("[{}]", category.label())
        } else {
            format!(" {} ", category.label())
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
