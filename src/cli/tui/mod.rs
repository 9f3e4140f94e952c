//! Interactive dashboard for barctl.
//!
//! Shows the job table, the selected job's progress and the server state,
//! and dispatches job actions.

mod app;
mod input;
mod ui;

use std::io::{self, stdout};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event, execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use crate::core::SyncEngine;
use app::TuiApp;

/// Run the dashboard until the user quits.
pub async fn run(mut engine: SyncEngine, server: String) -> Result<()> {
    engine.start().context("Failed to start polling")?;

    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen).context("Failed to enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("Failed to create terminal")?;

    let mut app = TuiApp::new(engine, server);
    let result = run_app(&mut terminal, &mut app).await;

    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;

    app.engine.stop().await;
    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut TuiApp,
) -> Result<()> {
    // Input is checked this often; poll results are applied in between.
    let input_timeout = Duration::from_millis(200);

    loop {
        app.sync().await;
        terminal.draw(|frame| ui::render(frame, app))?;

        if event::poll(input_timeout)? {
            let event = event::read()?;
            if let Some(action) = input::handle_event(event, app.mode.accepts_text()) {
                app.handle_action(action).await;
            }
        }

        if !app.running {
            break;
        }
    }

    Ok(())
}
