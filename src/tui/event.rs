use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyEvent, KeyEventKind};

pub enum AppEvent {
    Key(KeyEvent),
    Paste(String),
    Resize(u16, u16),
    Tick,
}

pub fn poll(tick_rate: Duration) -> Result<AppEvent> {
    if event::poll(tick_rate)? {
        match event::read()? {
            Event::Key(key) if key.kind != KeyEventKind::Release => return Ok(AppEvent::Key(key)),
            Event::Paste(text) => return Ok(AppEvent::Paste(text)),
            Event::Resize(cols, rows) => return Ok(AppEvent::Resize(cols, rows)),
            _ => {}
        }
    }
    Ok(AppEvent::Tick)
}
