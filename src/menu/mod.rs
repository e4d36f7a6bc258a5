//! Menu surface abstraction and the slot reconciler

pub mod actions;
pub mod console;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::listener::{ListenerRecord, MenuEntry};
use actions::SystemActions;

pub const TOOLTIP: &str = "Open HTTP Ports";
pub const SEPARATOR_TITLE: &str = "───────────────";

/// Click notifications for one menu item
pub type Clicks = mpsc::UnboundedReceiver<()>;

/// A handle to one item of the menu
pub trait MenuItem: Send + Sync + 'static {
    fn set_title(&self, title: &str);
    fn enable(&self);
    fn disable(&self);
    fn show(&self);
    fn hide(&self);
}

/// The tray menu. Items can be added but never removed.
pub trait MenuSurface: Send + 'static {
    type Item: MenuItem;

    fn set_tooltip(&self, tooltip: &str);
    fn add_item(&self, title: &str, tooltip: &str) -> (Self::Item, Clicks);
    fn add_sub_item(&self, parent: &Self::Item, title: &str, tooltip: &str) -> (Self::Item, Clicks);
    fn add_separator(&self);

    /// Called once a batch of changes is complete
    fn flush(&self) {}
}

/// Set the tooltip and add the static "Quit" entry above the slots.
pub fn install_header<S: MenuSurface>(surface: &S) -> Clicks {
    surface.set_tooltip(TOOLTIP);
    let (_, quit) = surface.add_item("Quit", "Quit the whole app");
    surface.add_separator();
    quit
}

/// What a slot currently shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SlotBinding {
    #[default]
    Unused,
    Separator,
    Listener(ListenerRecord),
}

#[derive(Debug, Clone, Copy)]
enum SlotAction {
    Open,
    Copy,
    Stop,
}

/// A reusable menu row with its three actions
struct Slot<I> {
    parent: I,
    open: I,
    copy: I,
    stop: I,
    binding: watch::Sender<SlotBinding>,
}

impl<I: MenuItem> Slot<I> {
    fn bind_separator(&self) {
        self.parent.set_title(SEPARATOR_TITLE);
        self.parent.disable();
        self.open.hide();
        self.copy.hide();
        self.stop.hide();
        self.parent.show();
        self.binding.send_replace(SlotBinding::Separator);
    }

    fn bind_listener(&self, listener: &ListenerRecord) {
        self.parent.set_title(&listener_title(listener));
        self.parent.enable();
        self.open.show();
        self.copy.show();
        self.stop.show();
        self.parent.show();
        self.binding.send_replace(SlotBinding::Listener(listener.clone()));
    }

    fn unbind(&self) {
        self.parent.hide();
        self.binding.send_replace(SlotBinding::Unused);
    }
}

/// `[port] command {in cwd}`, flagged with the status when it is an error
pub fn listener_title(listener: &ListenerRecord) -> String {
    let mut title = format!("[{}] {}", listener.port, listener.command);
    if !listener.cwd.is_empty() {
        title.push_str(&format!(" {{in {}}}", listener.cwd));
    }
    if listener.is_failing() {
        title = format!("⚠️ {} (HTTP {})", title, listener.http_status);
    }
    title
}

/// Maps each cycle's entries onto a growth-only pool of menu slots.
///
/// Slot `i` always shows entry `i`. Slots past the end of the list are hidden,
/// never removed, and are the first to be reused when the list grows again.
pub struct MenuReconciler<S: MenuSurface> {
    surface: S,
    actions: Arc<dyn SystemActions>,
    slots: Vec<Slot<S::Item>>,
}

impl<S: MenuSurface> MenuReconciler<S> {
    pub fn new(surface: S, actions: Arc<dyn SystemActions>) -> Self {
        Self {
            surface,
            actions,
            slots: Vec::new(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Must run inside a Tokio runtime: new slots spawn their click handlers.
    pub fn apply(&mut self, entries: &[MenuEntry]) {
        while self.slots.len() < entries.len() {
            let slot = self.create_slot();
            self.slots.push(slot);
        }

        for (index, slot) in self.slots.iter().enumerate() {
            match entries.get(index) {
                Some(MenuEntry::Listener(listener)) => slot.bind_listener(listener),
                Some(MenuEntry::Separator) => slot.bind_separator(),
                None => slot.unbind(),
            }
        }

        self.surface.flush();
    }

    fn create_slot(&self) -> Slot<S::Item> {
        let (parent, _) = self.surface.add_item("", "");
        let (open, open_clicks) =
            self.surface
                .add_sub_item(&parent, "Open in Browser", "Open this port in your default browser");
        let (copy, copy_clicks) =
            self.surface
                .add_sub_item(&parent, "Copy URL", "Copy the localhost URL to clipboard");
        let (stop, stop_clicks) = self.surface.add_sub_item(&parent, "Stop Process", "Force quit this process");

        let (binding, bound) = watch::channel(SlotBinding::Unused);
        tokio::spawn(handle_clicks(
            bound,
            self.actions.clone(),
            open_clicks,
            copy_clicks,
            stop_clicks,
        ));

        debug!("Created menu slot {}", self.slots.len());
        Slot {
            parent,
            open,
            copy,
            stop,
            binding,
        }
    }
}

/// Runs for the life of a slot. The binding is read when the click arrives,
/// so a click always acts on what the slot shows now.
async fn handle_clicks(
    bound: watch::Receiver<SlotBinding>,
    actions: Arc<dyn SystemActions>,
    mut open: Clicks,
    mut copy: Clicks,
    mut stop: Clicks,
) {
    loop {
        let action = tokio::select! {
            Some(()) = open.recv() => SlotAction::Open,
            Some(()) = copy.recv() => SlotAction::Copy,
            Some(()) = stop.recv() => SlotAction::Stop,
            else => break,
        };

        let listener = match &*bound.borrow() {
            SlotBinding::Listener(listener) => listener.clone(),
            SlotBinding::Separator | SlotBinding::Unused => continue,
        };

        let actions = actions.clone();
        let done = tokio::task::spawn_blocking(move || match action {
            SlotAction::Open => actions.open_url(&listener.url()),
            SlotAction::Copy => actions.copy_text(&listener.url()),
            SlotAction::Stop => actions.terminate(&listener.pid),
        })
        .await;
        if let Err(e) = done {
            debug!("{:?} action failed: {}", action, e);
        }
    }
}
