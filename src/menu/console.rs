//! Terminal rendition of the tray menu
//!
//! Keeps the menu as an in-memory tree, prints the visible part whenever a
//! refresh changes it, and turns operator commands read from stdin into
//! clicks:
//! - `open N`, `copy N`, `stop N` for the numbered rows
//! - `quit`
//! - `list` to print the menu again

use std::io::{self, BufRead};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Clicks, MenuItem, MenuSurface};

const USAGE: &str = "commands: open N | copy N | stop N | list | quit";

#[derive(Debug)]
struct Node {
    title: String,
    enabled: bool,
    visible: bool,
    separator: bool,
    parent: Option<usize>,
    clicks: Option<mpsc::UnboundedSender<()>>,
}

#[derive(Debug, Default)]
struct Model {
    tooltip: String,
    nodes: Vec<Node>,
    last_render: String,
}

impl Model {
    fn children(&self, id: usize) -> impl Iterator<Item = (usize, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, node)| node.parent == Some(id))
    }

    /// Top-level rows an operator can act on, in display order
    fn actionable(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(id, node)| {
                node.parent.is_none()
                    && node.visible
                    && node.enabled
                    && self.children(*id).any(|(_, child)| child.visible)
            })
            .map(|(id, _)| id)
            .collect()
    }

    fn click(&self, id: usize) -> bool {
        self.nodes
            .get(id)
            .and_then(|node| node.clicks.as_ref())
            .is_some_and(|clicks| clicks.send(()).is_ok())
    }

    fn render(&self) -> String {
        let numbered = self.actionable();
        let mut out = format!("== {} ==\n", self.tooltip);

        for (id, node) in self.nodes.iter().enumerate() {
            if node.parent.is_some() || !node.visible {
                continue;
            }
            if node.separator {
                out.push_str("   ────\n");
            } else if let Some(pos) = numbered.iter().position(|n| *n == id) {
                out.push_str(&format!("{:>2}) {}\n", pos + 1, node.title));
            } else {
                out.push_str(&format!("    {}\n", node.title));
            }
        }
        out
    }
}

/// Outcome of one operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Clicked,
    Render,
    Unknown,
}

#[derive(Clone, Default)]
pub struct ConsoleMenu {
    model: Arc<Mutex<Model>>,
    echo: bool,
}

impl ConsoleMenu {
    /// A menu that prints itself after every change
    pub fn new() -> Self {
        Self {
            model: Arc::default(),
            echo: true,
        }
    }

    /// A menu that never prints
    #[cfg(test)]
    pub(crate) fn quiet() -> Self {
        Self::default()
    }

    fn model(&self) -> MutexGuard<'_, Model> {
        lock(&self.model)
    }

    pub fn render(&self) -> String {
        self.model().render()
    }

    /// Turn one line of operator input into a click
    pub fn dispatch(&self, line: &str) -> Dispatch {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next().map(str::to_lowercase) else {
            return Dispatch::Unknown;
        };

        let model = self.model();
        match (verb.as_str(), words.next()) {
            ("list", None) => Dispatch::Render,
            (verb, None) => {
                // Plain top-level items such as "Quit"
                let target = model.nodes.iter().enumerate().find(|(id, node)| {
                    node.parent.is_none()
                        && node.visible
                        && node.enabled
                        && model.children(*id).next().is_none()
                        && node.title.to_lowercase() == verb
                });
                match target {
                    Some((id, _)) if model.click(id) => Dispatch::Clicked,
                    _ => Dispatch::Unknown,
                }
            }
            (verb, Some(row)) => {
                let Some(parent) = row
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| model.actionable().get(n).copied())
                else {
                    return Dispatch::Unknown;
                };

                // "Open in Browser" answers to "open", "Copy URL" to "copy"...
                let action = model.children(parent).find(|(_, child)| {
                    child.visible
                        && child.enabled
                        && child
                            .title
                            .split_whitespace()
                            .next()
                            .is_some_and(|word| word.to_lowercase() == verb)
                });
                match action {
                    Some((id, _)) if model.click(id) => Dispatch::Clicked,
                    _ => Dispatch::Unknown,
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tooltip(&self) -> String {
        self.model().tooltip.clone()
    }

    /// Top-level items that carry actions, visible or not
    #[cfg(test)]
    pub(crate) fn rows(&self) -> Vec<RowView> {
        let model = self.model();
        model
            .nodes
            .iter()
            .enumerate()
            .filter(|(id, node)| node.parent.is_none() && model.children(*id).next().is_some())
            .map(|(id, node)| RowView {
                title: node.title.clone(),
                enabled: node.enabled,
                visible: node.visible,
                actions: model
                    .children(id)
                    .map(|(_, child)| ActionView {
                        title: child.title.clone(),
                        visible: child.visible,
                    })
                    .collect(),
            })
            .collect()
    }

    /// Click action `action` of row `row` whatever its state, like a click
    /// that raced a refresh
    #[cfg(test)]
    pub(crate) fn click_action(&self, row: usize, action: usize) -> bool {
        let model = self.model();
        let parents: Vec<usize> = model
            .nodes
            .iter()
            .enumerate()
            .filter(|(id, node)| node.parent.is_none() && model.children(*id).next().is_some())
            .map(|(id, _)| id)
            .collect();

        parents
            .get(row)
            .and_then(|parent| model.children(*parent).nth(action))
            .is_some_and(|(id, _)| model.click(id))
    }
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct RowView {
    pub title: String,
    pub enabled: bool,
    pub visible: bool,
    pub actions: Vec<ActionView>,
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct ActionView {
    pub title: String,
    pub visible: bool,
}

fn lock(model: &Mutex<Model>) -> MutexGuard<'_, Model> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ConsoleItem {
    id: usize,
    model: Arc<Mutex<Model>>,
}

impl ConsoleItem {
    fn update(&self, change: impl FnOnce(&mut Node)) {
        if let Some(node) = lock(&self.model).nodes.get_mut(self.id) {
            change(node);
        }
    }
}

impl MenuItem for ConsoleItem {
    fn set_title(&self, title: &str) {
        self.update(|node| node.title = title.to_string());
    }

    fn enable(&self) {
        self.update(|node| node.enabled = true);
    }

    fn disable(&self) {
        self.update(|node| node.enabled = false);
    }

    fn show(&self) {
        self.update(|node| node.visible = true);
    }

    fn hide(&self) {
        self.update(|node| node.visible = false);
    }
}

impl ConsoleMenu {
    fn push(&self, title: &str, parent: Option<usize>) -> (ConsoleItem, Clicks) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut model = self.model();
        model.nodes.push(Node {
            title: title.to_string(),
            enabled: true,
            visible: true,
            separator: false,
            parent,
            clicks: Some(tx),
        });
        let item = ConsoleItem {
            id: model.nodes.len() - 1,
            model: self.model.clone(),
        };
        (item, rx)
    }
}

impl MenuSurface for ConsoleMenu {
    type Item = ConsoleItem;

    fn set_tooltip(&self, tooltip: &str) {
        self.model().tooltip = tooltip.to_string();
    }

    // Tooltips have nowhere to go on a terminal
    fn add_item(&self, title: &str, _tooltip: &str) -> (ConsoleItem, Clicks) {
        self.push(title, None)
    }

    fn add_sub_item(&self, parent: &ConsoleItem, title: &str, _tooltip: &str) -> (ConsoleItem, Clicks) {
        self.push(title, Some(parent.id))
    }

    fn add_separator(&self) {
        self.model().nodes.push(Node {
            title: String::new(),
            enabled: false,
            visible: true,
            separator: true,
            parent: None,
            clicks: None,
        });
    }

    fn flush(&self) {
        if !self.echo {
            return;
        }
        let mut model = self.model();
        let rendered = model.render();
        if rendered != model.last_render {
            println!("{}", rendered);
            model.last_render = rendered;
        }
    }
}

/// Feed stdin lines to the menu from a dedicated thread until input ends.
///
/// A plain thread, not a runtime task, so a pending read never holds up
/// shutdown.
pub fn spawn_command_reader(menu: ConsoleMenu) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("console-input".to_string()).spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match menu.dispatch(&line) {
                Dispatch::Clicked => debug!("Menu command: {}", line.trim()),
                Dispatch::Render => println!("{}", menu.render()),
                Dispatch::Unknown => println!("{}", USAGE),
            }
        }
        info!("Console input closed; use Ctrl-C to quit");
    })
}
