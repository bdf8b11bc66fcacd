use std::time::Duration;

use anyhow::Result;
use crossterm::event::KeyEvent;
use ratatui::DefaultTerminal;
use ratatui::layout::Rect;

use termtabs::orchestrator::{Geometry, Modifier, Orchestrator};
use termtabs::store::Store;
use termtabs::transport::HostTransport;

use super::event::{self, AppEvent};
use super::keymap::{Action, KeyMap};
use super::keys::{self, KeyInput};
use super::ui;
use super::viewport::ScreenViewport;

pub type TerminalOrchestrator = Orchestrator<Store, HostTransport, ScreenViewport>;

pub struct App {
    pub orchestrator: TerminalOrchestrator,
    pub keymap: KeyMap,
    pub show_help: bool,
    pub should_quit: bool,
}

impl App {
    pub fn new(orchestrator: TerminalOrchestrator) -> Self {
        Self {
            orchestrator,
            keymap: KeyMap::default_keymap(),
            show_help: false,
            should_quit: false,
        }
    }

    pub fn run(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        let tick_rate = Duration::from_millis(16);

        let size = terminal.size()?;
        self.layout(Rect::new(0, 0, size.width, size.height));
        self.orchestrator.set_visible(true);

        loop {
            self.orchestrator.pump();
            terminal.draw(|frame| ui::draw(frame, self))?;

            match event::poll(tick_rate)? {
                AppEvent::Key(key) => self.handle_key(key),
                AppEvent::Paste(text) => self.orchestrator.on_input(text.as_bytes()),
                AppEvent::Resize(cols, rows) => {
                    if let Some(geometry) = self.layout(Rect::new(0, 0, cols, rows)) {
                        self.orchestrator.resize(geometry.cols, geometry.rows);
                    }
                }
                AppEvent::Tick => {}
            }

            if self.should_quit {
                return Ok(());
            }
        }
    }

    pub fn shutdown(&mut self) {
        self.orchestrator.shutdown();
    }

    /// Size the viewport to the terminal pane of a screen of `area`.
    fn layout(&mut self, area: Rect) -> Option<Geometry> {
        let pane = ui::terminal_area(area);
        let geometry = Geometry {
            cols: pane.width,
            rows: pane.height,
        };
        if geometry.cols == 0 || geometry.rows == 0 {
            return None;
        }
        self.orchestrator.viewport_mut().set_area(geometry);
        Some(geometry)
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if self.show_help {
            self.show_help = false;
            self.orchestrator.set_visible(true);
            return;
        }

        if let Some(action) = self.keymap.lookup(key.code, key.modifiers) {
            self.execute(action);
            return;
        }

        match keys::translate(&key) {
            Some(KeyInput::Text(bytes)) => self.orchestrator.on_input(&bytes),
            Some(KeyInput::Named(named)) => self.orchestrator.send_key(named),
            None => tracing::trace!("unhandled key {:?}", key.code),
        }
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::NewTab => {
                self.orchestrator.create_tab();
            }
            Action::CloseTab => {
                if let Some(tab_id) = self.orchestrator.current_tab().map(|t| t.id.clone()) {
                    self.orchestrator.close_tab(&tab_id);
                }
            }
            Action::NextTab => self.orchestrator.select_adjacent(1),
            Action::PrevTab => self.orchestrator.select_adjacent(-1),
            Action::Restart => self.orchestrator.restart(),
            Action::HardRestart => self.orchestrator.hard_restart(),
            Action::ArmCtrl => self.orchestrator.arm_modifier(Modifier::Ctrl),
            Action::ArmCmd => self.orchestrator.arm_modifier(Modifier::Cmd),
            Action::ToggleHelp => {
                self.show_help = true;
                self.orchestrator.set_visible(false);
            }
            Action::Detach => self.should_quit = true,
        }
    }
}
