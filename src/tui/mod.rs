mod app;
mod event;
mod keymap;
mod keys;
mod ui;
mod viewport;
mod widget;

use std::collections::HashSet;
use std::io::stdout;

use anyhow::Result;
use crossterm::event::{DisableBracketedPaste, EnableBracketedPaste};
use crossterm::execute;

use termtabs::orchestrator::{Geometry, Location, Orchestrator};
use termtabs::store::{SessionId, Store};
use termtabs::transport::HostTransport;

use viewport::ScreenViewport;

pub fn run(
    store: Store,
    transport: HostTransport,
    hydrated: HashSet<SessionId>,
    location: Location,
    tabs_enabled: bool,
    geometry: Geometry,
) -> Result<()> {
    let mut orchestrator = Orchestrator::new(
        store,
        transport,
        ScreenViewport::new(geometry),
        hydrated,
    )
    .with_geometry(geometry);
    orchestrator.set_tabs_enabled(tabs_enabled);
    orchestrator.set_location(location);

    let mut terminal = ratatui::init();
    execute!(stdout(), EnableBracketedPaste)?;
    let mut app = app::App::new(orchestrator);
    let result = app.run(&mut terminal);
    app.shutdown();
    let _ = execute!(stdout(), DisableBracketedPaste);
    ratatui::restore();
    result
}
