use std::io::Stdout;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use crate::config::AppConfig;
use crate::ui;

mod actions;
pub mod editor;
pub mod state;

pub use actions::{action_for, Action, EditOp};
pub use editor::EditorBuffer;
pub use state::{ShutdownReport, TabBadge, Workspace, WorkspaceDeps};

/// Upper bound on how long quitting waits for in-flight saves.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct App {
    workspace: Workspace,
    should_quit: bool,
    tick_rate: Duration,
    compact_threshold: usize,
}

impl App {
    pub fn new(config: &AppConfig, deps: WorkspaceDeps) -> Self {
        let mut workspace = Workspace::new(config, deps);
        workspace.start();
        Self {
            workspace,
            should_quit: false,
            tick_rate: Duration::from_millis(250),
            compact_threshold: config.session.compact_tab_threshold,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Runs the terminal UI until the user quits, then flushes pending saves.
    pub fn run(mut self) -> Result<ShutdownReport> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        result?;
        Ok(self.workspace.shutdown(SHUTDOWN_TIMEOUT))
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| ui::draw_app(frame, &self.workspace, self.compact_threshold))
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let mut timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or(Duration::ZERO);
            if let Some(deadline) = self.workspace.time_until_next_deadline() {
                timeout = timeout.min(deadline);
            }

            if event::poll(timeout).context("polling for terminal events")? {
                // resizes need no handling, the next draw adapts
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }

            if last_tick.elapsed() >= self.tick_rate
                || self.workspace.time_until_next_deadline() == Some(Duration::ZERO)
            {
                self.workspace.tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        let recovery_open = self.workspace.recovery_offer().is_some();
        if let Some(action) = action_for(key, recovery_open) {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        if !matches!(action, Action::Edit(_)) {
            self.workspace.clear_status_message();
        }
        match action {
            Action::Quit => self.should_quit = true,
            Action::SelectShortcut(digit) => self.workspace.select_shortcut(digit),
            Action::NextTab => self.workspace.select_next(),
            Action::PreviousTab => self.workspace.select_previous(),
            Action::MoveTab(delta) => self.workspace.move_active_tab(delta),
            Action::CloseTab => self.workspace.close_active_tab(),
            Action::OpenNextChapter => self.workspace.open_next_unopened(),
            Action::ManualSave => self.workspace.save_now(),
            Action::RestoreBackup => self.workspace.restore_backup(),
            Action::DiscardBackup => self.workspace.discard_backup(),
            Action::DismissRecovery => self.workspace.dismiss_recovery(),
            Action::Edit(op) => {
                self.workspace.edit(|editor| op.apply(editor));
            }
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen).context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("creating terminal backend")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("restoring screen state")?;
    Ok(())
}
