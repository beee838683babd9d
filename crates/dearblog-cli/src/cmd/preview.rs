use anyhow::{anyhow, Result};
use dearblog_core::preview::{
    PreviewConfig, PreviewEvent, PreviewManager, PreviewObserver, UnexpectedExit, PREVIEW_URL,
    STOP_GRACE,
};
use dearblog_core::BlogError;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const INTERACTIVE_HELP: &str =
    "commands: <enter>/t = start/stop preview, o = open browser, s = status, q = quit";

// ---------------------------------------------------------------------------
// Terminal observer
// ---------------------------------------------------------------------------

struct TerminalObserver {
    open_browser: bool,
    unexpected: Option<UnexpectedExit>,
}

impl PreviewObserver for TerminalObserver {
    fn on_output(&mut self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn on_ready(&mut self, url: &str) {
        println!("Preview server started → {url}");
        if self.open_browser {
            open_browser(url);
        }
    }

    fn on_stopped_unexpectedly(&mut self, exit: &UnexpectedExit) {
        eprintln!("{}", BlogError::from(*exit));
        self.unexpected = Some(*exit);
    }

    fn on_stopped_by_user(&mut self) {
        println!("Preview server stopped.");
    }
}

fn open_browser(url: &str) {
    if let Err(e) = open::that(url) {
        tracing::warn!(url, error = %e, "failed to open browser");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, hugo: Option<&str>, open: bool, interactive: bool) -> Result<()> {
    let config = super::load_config(root, hugo)?;
    let observer = TerminalObserver {
        open_browser: open || config.preview.open_browser,
        unexpected: None,
    };
    let manager = PreviewManager::new(PreviewConfig::from(&config), observer);

    // Output, exit and timer events are applied on this one thread.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    if interactive {
        rt.block_on(run_interactive(root, manager))
    } else {
        rt.block_on(run_foreground(root, manager))
    }
}

// ---------------------------------------------------------------------------
// foreground: run until Ctrl-C or the server dies
// ---------------------------------------------------------------------------

async fn run_foreground(root: &Path, mut manager: PreviewManager<TerminalObserver>) -> Result<()> {
    manager.start(root)?;
    println!(
        "Starting Hugo preview server in {} (Ctrl-C to stop)",
        root.display()
    );

    loop {
        // `None` means Ctrl-C.
        let event = tokio::select! {
            event = manager.dispatch_next() => Some(event),
            _ = tokio::signal::ctrl_c() => None,
        };

        match event {
            None => {
                shutdown(&mut manager).await;
                return Ok(());
            }
            Some(None) => return Err(anyhow!("preview event channel closed")),
            Some(Some(_)) => {
                if let Some(exit) = manager.observer_mut().unexpected.take() {
                    return Err(BlogError::from(exit).into());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// interactive: stdin commands drive toggle
// ---------------------------------------------------------------------------

enum Step {
    Event(Option<PreviewEvent>),
    Input(Option<String>),
    Interrupt,
}

async fn run_interactive(
    root: &Path,
    mut manager: PreviewManager<TerminalObserver>,
) -> Result<()> {
    println!("{INTERACTIVE_HELP}");
    toggle(&mut manager, root);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let step = tokio::select! {
            event = manager.dispatch_next() => Step::Event(event),
            line = lines.next_line() => Step::Input(line?),
            _ = tokio::signal::ctrl_c() => Step::Interrupt,
        };

        match step {
            Step::Event(None) => return Err(anyhow!("preview event channel closed")),
            Step::Event(Some(_)) => {
                // Already reported by the observer; the next toggle starts afresh.
                manager.observer_mut().unexpected = None;
            }
            Step::Input(None) | Step::Interrupt => break,
            Step::Input(Some(line)) => match line.trim() {
                "" | "t" => toggle(&mut manager, root),
                "o" => {
                    if manager.is_running() {
                        open_browser(PREVIEW_URL);
                    } else {
                        println!("Preview server is not running.");
                    }
                }
                "s" => match manager.session() {
                    Some(s) => println!(
                        "{} since {} (pid {}) → {PREVIEW_URL}",
                        manager.state(),
                        s.started_at.format("%H:%M:%S"),
                        s.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into()),
                    ),
                    None => println!("{}", manager.state()),
                },
                "q" => break,
                other => println!("unknown command '{other}'; {INTERACTIVE_HELP}"),
            },
        }
    }

    shutdown(&mut manager).await;
    Ok(())
}

/// Stop the server and wait for it to exit before the runtime, and with it
/// the kill-on-drop child, goes away.
async fn shutdown(manager: &mut PreviewManager<TerminalObserver>) {
    let Some(id) = manager.session().map(|s| s.id) else {
        return;
    };
    manager.stop();
    let waited = tokio::time::timeout(STOP_GRACE + Duration::from_secs(1), async {
        while let Some(event) = manager.dispatch_next().await {
            if matches!(event, PreviewEvent::Exited { session, .. } if session == id) {
                break;
            }
        }
    })
    .await;
    if waited.is_err() {
        tracing::warn!(session = id, "preview server did not exit in time");
    }
}

fn toggle(manager: &mut PreviewManager<TerminalObserver>, root: &Path) {
    match manager.toggle(root) {
        Ok(true) => println!("Starting Hugo preview server in {}", root.display()),
        Ok(false) => {}
        Err(e) => eprintln!("error: {e}"),
    }
}
