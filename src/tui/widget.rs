use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::Widget;

/// Renders a vt100 screen into a ratatui buffer.
pub struct TerminalWidget<'a> {
    screen: &'a vt100::Screen,
    show_cursor: bool,
    /// Drawn faded while no live stream is attached.
    dimmed: bool,
}

impl<'a> TerminalWidget<'a> {
    pub fn new(screen: &'a vt100::Screen) -> Self {
        Self {
            screen,
            show_cursor: true,
            dimmed: false,
        }
    }

    pub fn show_cursor(mut self, show: bool) -> Self {
        self.show_cursor = show;
        self
    }

    pub fn dimmed(mut self, dimmed: bool) -> Self {
        self.dimmed = dimmed;
        self
    }
}

impl Widget for TerminalWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let (screen_rows, screen_cols) = self.screen.size();
        let rows = area.height.min(screen_rows);
        let cols = area.width.min(screen_cols);

        for row in 0..rows {
            for col in 0..cols {
                let (Some(cell), Some(target)) = (
                    self.screen.cell(row, col),
                    buf.cell_mut((area.x + col, area.y + row)),
                ) else {
                    continue;
                };
                let contents = cell.contents();
                if contents.is_empty() {
                    target.set_char(' ');
                } else {
                    target.set_symbol(&contents);
                }
                let mut style = cell_style(cell);
                if self.dimmed {
                    style = style.add_modifier(Modifier::DIM);
                }
                target.set_style(style);
            }
        }

        if self.show_cursor && !self.dimmed && !self.screen.hide_cursor() {
            let (row, col) = self.screen.cursor_position();
            if row < rows
                && col < cols
                && let Some(target) = buf.cell_mut((area.x + col, area.y + row))
            {
                target.set_style(Style::default().add_modifier(Modifier::REVERSED));
            }
        }
    }
}

fn cell_style(cell: &vt100::Cell) -> Style {
    let mut modifiers = Modifier::empty();
    if cell.bold() {
        modifiers |= Modifier::BOLD;
    }
    if cell.italic() {
        modifiers |= Modifier::ITALIC;
    }
    if cell.underline() {
        modifiers |= Modifier::UNDERLINED;
    }
    if cell.inverse() {
        modifiers |= Modifier::REVERSED;
    }
    Style::default()
        .fg(to_color(cell.fgcolor()))
        .bg(to_color(cell.bgcolor()))
        .add_modifier(modifiers)
}

fn to_color(color: vt100::Color) -> Color {
    match color {
        vt100::Color::Default => Color::Reset,
        vt100::Color::Idx(i) => Color::Indexed(i),
        vt100::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}
