use std::io::{self, Stdout, Write};

use crossterm::{
    cursor::{Hide, MoveTo, SetCursorStyle, Show},
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::config::CursorStyle;

pub struct Tui {
    pub terminal: Terminal<CrosstermBackend<Stdout>>,
    entered: bool,
}

impl Tui {
    pub fn new() -> anyhow::Result<Self> {
        let backend = CrosstermBackend::new(io::stdout());
        let terminal = Terminal::new(backend)?;
        Ok(Self {
            terminal,
            entered: false,
        })
    }

    pub fn enter(&mut self, cursor: CursorStyle) -> anyhow::Result<()> {
        terminal::enable_raw_mode()?;
        execute!(
            io::stdout(),
            EnterAlternateScreen,
            Clear(ClearType::All),
            Clear(ClearType::Purge),
            MoveTo(0, 0),
            Hide,
            EnableMouseCapture,
        )?;
        // Reset SGR and select G0 ASCII / G1 DEC special graphics, which
        // crossterm has no commands for.
        let mut stdout = io::stdout();
        stdout.write_all(b"\x1b[0m\x1b(B\x1b)0")?;
        stdout.flush()?;
        execute!(io::stdout(), cursor_style_cmd(cursor))?;
        self.terminal.clear()?;
        self.entered = true;
        Ok(())
    }

    pub fn exit(&mut self) {
        if self.entered {
            self.entered = false;
            let _ = execute!(
                io::stdout(),
                DisableMouseCapture,
                SetCursorStyle::DefaultUserShape,
                Show,
                LeaveAlternateScreen,
            );
            let _ = terminal::disable_raw_mode();
        }
    }

    pub fn size(&self) -> anyhow::Result<(u16, u16)> {
        let size = self.terminal.size()?;
        Ok((size.width, size.height))
    }

    /// Write bytes straight to the terminal, outside ratatui's buffer.
    /// Used for OSC sequences (clipboard, title).
    pub fn write_raw(&mut self, bytes: &[u8]) {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(bytes);
        let _ = stdout.flush();
    }
}

fn cursor_style_cmd(style: CursorStyle) -> SetCursorStyle {
    match style {
        CursorStyle::Block => SetCursorStyle::SteadyBlock,
        CursorStyle::Bar => SetCursorStyle::SteadyBar,
        CursorStyle::Underline => SetCursorStyle::SteadyUnderScore,
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        self.exit();
    }
}

/// Restore the terminal before a panic message hits the screen.
pub fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = execute!(
            io::stdout(),
            DisableMouseCapture,
            SetCursorStyle::DefaultUserShape,
            Show,
            LeaveAlternateScreen,
        );
        let _ = terminal::disable_raw_mode();
        original_hook(panic_info);
    }));
}
