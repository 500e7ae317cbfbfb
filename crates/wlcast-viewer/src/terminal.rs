/// Terminal presenter: each frame is drawn full-screen with ratatui-image,
/// using the best graphics protocol the terminal answers to and half blocks
/// otherwise. Logs go to stderr; redirect it to keep the picture clean.

use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use image::{DynamicImage, RgbImage};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::crossterm::execute;
use ratatui::crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui_image::StatefulImage;
use ratatui_image::picker::Picker;
use tracing::warn;

use wlcast_media::DecodedImage;

use crate::viewer::FramePresenter;

pub struct TerminalPresenter {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    picker: Picker,
}

impl TerminalPresenter {
    /// Take over the terminal. It is restored when the presenter drops.
    pub fn new() -> io::Result<Self> {
        // The capability query has to run before raw mode.
        let picker = Picker::from_query_stdio().unwrap_or_else(|_| Picker::halfblocks());

        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        let mut terminal = match Terminal::new(CrosstermBackend::new(stdout)) {
            Ok(terminal) => terminal,
            Err(e) => {
                let _ = execute!(io::stdout(), LeaveAlternateScreen);
                let _ = disable_raw_mode();
                return Err(e);
            }
        };
        terminal.clear()?;
        Ok(TerminalPresenter { terminal, picker })
    }
}

const INPUT_POLL: Duration = Duration::from_millis(100);

/// Block until q, Esc or Ctrl+C is pressed, or `running` clears. Raw mode
/// delivers Ctrl+C as a key press rather than SIGINT.
pub fn wait_for_quit(running: &AtomicBool) -> io::Result<()> {
    while running.load(Ordering::Relaxed) {
        if event::poll(INPUT_POLL)?
            && let Event::Key(key) = event::read()?
            && is_quit(&key)
        {
            return Ok(());
        }
    }
    Ok(())
}

fn is_quit(key: &KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Wrap decoded pixels without copying. None when the buffer does not match
/// the dimensions.
fn to_dynamic(image: DecodedImage) -> Option<DynamicImage> {
    RgbImage::from_raw(image.width, image.height, image.rgb).map(DynamicImage::ImageRgb8)
}

impl FramePresenter for TerminalPresenter {
    fn present(&mut self, image: DecodedImage) {
        let (width, height) = (image.width, image.height);
        let Some(image) = to_dynamic(image) else {
            warn!("decoded frame does not match {}x{}, not drawn", width, height);
            return;
        };
        let mut protocol = self.picker.new_resize_protocol(image);
        if let Err(e) = self
            .terminal
            .draw(|f| f.render_stateful_widget(StatefulImage::default(), f.area(), &mut protocol))
        {
            warn!("terminal draw failed: {}", e);
        }
    }
}

impl Drop for TerminalPresenter {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}
