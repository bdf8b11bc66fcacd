use termtabs::orchestrator::{Geometry, Viewport};

/// Lines of scrollback kept by the emulator.
const SCROLLBACK: usize = 1000;

/// The on-screen terminal: a vt100 emulator sized to the pane it is drawn into.
pub struct ScreenViewport {
    parser: vt100::Parser,
    /// Pane size as last laid out. `None` until the first layout.
    area: Option<Geometry>,
    focused: bool,
}

impl ScreenViewport {
    pub fn new(initial: Geometry) -> Self {
        Self {
            parser: vt100::Parser::new(initial.rows, initial.cols, SCROLLBACK),
            area: None,
            focused: false,
        }
    }

    /// Record the pane size and resize the emulator to match.
    pub fn set_area(&mut self, geometry: Geometry) {
        if geometry.cols == 0 || geometry.rows == 0 {
            return;
        }
        self.area = Some(geometry);
        let (rows, cols) = self.parser.screen().size();
        if (rows, cols) != (geometry.rows, geometry.cols) {
            self.parser.set_size(geometry.rows, geometry.cols);
        }
    }

    pub fn screen(&self) -> &vt100::Screen {
        self.parser.screen()
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }
}

impl Viewport for ScreenViewport {
    fn write(&mut self, bytes: &[u8]) {
        self.parser.process(bytes);
    }

    fn clear(&mut self) {
        let (rows, cols) = self.parser.screen().size();
        self.parser = vt100::Parser::new(rows, cols, SCROLLBACK);
    }

    fn focus(&mut self) {
        self.focused = true;
    }

    fn fit(&mut self) -> Option<Geometry> {
        self.area
    }
}
