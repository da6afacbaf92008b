//! Presenter that prints lists and notices to a terminal.

use hub_sync::{ListKind, ListView, Notice, Presenter};
use std::io::{self, Write};
use std::sync::Mutex;
use tracing::warn;

pub struct TerminalPresenter<W: Write + Send> {
    out: Mutex<W>,
}

impl TerminalPresenter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> TerminalPresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            warn!("Failed to write to terminal: {}", e);
        }
    }
}

/// Text for one list, e.g. `watching (2)` followed by numbered entries.
pub fn format_view(view: &ListView) -> String {
    let mut text = format!("{} ({})\n", view.list, view.items.len());
    if view.items.is_empty() {
        text.push_str("  (empty)\n");
    }
    for (n, item) in view.items.iter().enumerate() {
        text.push_str(&format!("  {:>2}. {}", n + 1, item.name));
        if let Some(url) = &item.url {
            text.push_str(&format!(" <{}>", url));
        }
        if !item.is_confirmed() && view.last_updated == hub_sync::LastUpdated::CloudSync {
            text.push_str(" (pending)");
        }
        text.push('\n');
    }
    text.push_str(&format!("  {}\n", view.last_updated));
    text
}

impl<W: Write + Send> Presenter for TerminalPresenter<W> {
    fn render(&self, view: &ListView) {
        self.write(&format_view(view));
    }

    fn notify(&self, notice: &Notice) {
        // There is no login from the terminal.
        if *notice == Notice::LoginRequired {
            return;
        }
        self.write(&format!("[{}] {}\n", notice.title(), notice.message()));
    }

    fn loading(&self, list: ListKind) {
        self.write(&format!("{}: loading...\n", list));
    }
}
