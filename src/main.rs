mod app;
mod cli;
mod config;
mod error;
mod httpd;
mod patch;
mod store;
mod ui;
mod view;
mod watch;

use anyhow::{Context, Result};
use app::App;
use clap::{Parser, Subcommand};
use cli::Workspace;
use config::RpvConfig;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use httpd::types::RepoInfo;
use httpd::{HttpdClient, HttpdSettings};
use patch::{AugmentedPatch, PatchStatus};
use ratatui::prelude::*;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use store::{PatchStore, StoreEvent};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use view::{Action, PatchesView, RootChildren, Snapshots, TreeNode};
use watch::{RepoWatcher, WatchEvent};

/// Terminal UI for browsing and reviewing Radicle patches
#[derive(Parser)]
#[command(name = "rpv", version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    /// Repository to open (defaults to current directory)
    path: Option<PathBuf>,

    /// Repository for subcommands
    #[arg(short = 'C', long = "repo", global = true, value_name = "DIR")]
    repo: Option<PathBuf>,

    /// Override the httpd API url from the config
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the patch list as shown in the tree
    List,
    /// Print a patch's details and changed files
    Show {
        /// Patch id, unique part of it, or part of the title
        id: String,
        /// Read the patch from local storage through `rad` instead of httpd
        #[arg(long)]
        local: bool,
    },
    /// Check out a patch into a local branch
    Checkout { id: String },
    /// Ask httpd to move a patch to another state
    Status {
        id: String,
        #[arg(value_parser = parse_settable_status)]
        status: PatchStatus,
    },
    /// Print the local node identity
    Whoami,
    /// Clone a repository from the network into the given directory
    Clone {
        /// Repository id, `rad:z…`
        rid: String,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the global config file
        #[arg(long)]
        save: bool,
    },
}

/// Only draft, open and archived can be requested; merging happens by push
fn parse_settable_status(raw: &str) -> std::result::Result<PatchStatus, String> {
    match raw.parse::<PatchStatus>()? {
        PatchStatus::Merged => Err("a patch is merged by pushing its commits, not by a status change".into()),
        status => Ok(status),
    }
}

/// Everything one open repository needs
struct Session {
    root: PathBuf,
    config: RpvConfig,
    /// `--api-url`, kept across config reloads
    api_url_override: Option<String>,
    workspace: Arc<Workspace>,
    client: Arc<HttpdClient>,
    store: PatchStore,
    view: Arc<PatchesView>,
}

impl Session {
    async fn open(dir: &Path, api_url: Option<String>) -> Result<Self> {
        let probe = RpvConfig::default();
        let root = match cli::repo_root_of(&probe.cli.git, dir, Duration::from_secs(probe.cli.timeout_secs)).await {
            Ok(root) => root,
            Err(e) => {
                debug!("using {} as is: {:#}", dir.display(), e);
                dir.to_path_buf()
            }
        };
        let mut config = config::load_config(&root);
        if let Some(url) = &api_url {
            config.httpd.api_url = url.clone();
        }

        let workspace = Arc::new(Workspace::new(root.clone(), &config.cli));
        let client = Arc::new(HttpdClient::new(HttpdSettings::from(&config.httpd)));
        let store = PatchStore::new(client.clone(), workspace.clone());
        let snapshots = Snapshots::new(config.diff.snapshot_root());
        let view = Arc::new(PatchesView::new(store.clone(), snapshots));
        info!(root = %root.display(), api_url = %config.httpd.api_url, "session opened");

        Ok(Self {
            root,
            config,
            api_url_override: api_url,
            workspace,
            client,
            store,
            view,
        })
    }

    /// Full id for a user-supplied id fragment or, failing that, title fragment
    async fn resolve_id(&self, fragment: &str) -> Result<String> {
        self.store.init_store_if_needed().await?;
        let entry = self
            .store
            .find_patch_by_id(fragment)
            .or_else(|| self.store.find_patch_by_title(fragment))
            .with_context(|| format!("No single patch matches '{fragment}'"))?;
        let id = entry.read().id.clone();
        Ok(id)
    }
}

/// Log to a file under the data dir; stdout belongs to the TUI.
/// The returned guard flushes on drop.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,radicle_patches=debug"));
    let dir = dirs::data_dir()?.join("radicle-patches");
    std::fs::create_dir_all(&dir).ok()?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, "rpv.log"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .ok()?;
    Some(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let dir = match cli.path.or(cli.repo) {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read the current directory")?,
    };
    let session = Session::open(&dir, cli.api_url).await?;

    match cli.command {
        None => run_tui(session).await,
        Some(Command::List) => print_list(&session).await,
        Some(Command::Show { id, local }) => print_patch(&session, &id, local).await,
        Some(Command::Checkout { id }) => {
            let id = session.resolve_id(&id).await?;
            let out = session.workspace.checkout_patch(&id).await?;
            println!("{}", out);
            Ok(())
        }
        Some(Command::Status { id, status }) => {
            let id = session.resolve_id(&id).await?;
            let entry = session.store.update_patch_status(&id, status).await?;
            let now = entry.read().status();
            if now == status {
                println!("{} is now {}", patch::shorten_hash(&id), now);
            } else {
                println!("{} is still {} (requested {})", patch::shorten_hash(&id), now, status);
            }
            Ok(())
        }
        Some(Command::Whoami) => {
            let me = session.workspace.local_identity().await?;
            match me.alias {
                Some(alias) => println!("{alias} ({})", me.id),
                None => println!("{}", me.id),
            }
            Ok(())
        }
        Some(Command::Clone { rid }) => {
            let out = session.workspace.clone_repo(&rid, &dir).await?;
            println!("{}", out);
            Ok(())
        }
        Some(Command::Config { save }) => {
            print!("{}", toml::to_string_pretty(&session.config).context("Failed to render config")?);
            if save {
                config::save_config(&session.config)?;
                if let Some(path) = config::global_config_path() {
                    eprintln!("Saved to {}", path.display());
                }
            }
            Ok(())
        }
    }
}

// ── One-shot commands ──

fn print_node(node: &TreeNode, indent: &str) {
    let glyph = node.icon.map(|i| i.glyph).unwrap_or(" ");
    match &node.description {
        Some(desc) => println!("{indent}{glyph} {}  {}", node.label, desc),
        None => println!("{indent}{glyph} {}", node.label),
    }
}

async fn print_list(session: &Session) -> Result<()> {
    let root = session.view.root_children().await;
    for node in &root.nodes {
        print_node(node, "");
    }
    if root.retry_after.is_some() {
        let reason = root.nodes.first().and_then(|n| n.tooltip.clone()).unwrap_or_default();
        anyhow::bail!("Could not fetch patches from {}: {}", session.config.httpd.api_url, reason);
    }
    Ok(())
}

async fn print_patch(session: &Session, fragment: &str, local: bool) -> Result<()> {
    let now = store::now_secs();
    if local {
        let patch = session.workspace.show_patch(fragment).await?;
        let patch = AugmentedPatch::new(patch, None);
        println!("{}", view::tooltip::patch_tooltip(&patch, false, now));
        return Ok(());
    }

    let id = session.resolve_id(fragment).await?;
    session.store.refresh_upstream_branch().await;
    let node = session
        .view
        .refresh_patch_node(&id)
        .with_context(|| format!("Patch {id} disappeared from the store"))?;
    if let Some(tooltip) = &node.tooltip {
        println!("{}\n", tooltip);
    }
    println!("Changed files:");
    for child in session.view.patch_children(&id).await {
        print_node(&child, "  ");
    }
    Ok(())
}

// ── TUI ──

/// Results of background work, applied on the UI loop
enum Outcome {
    Root(RootChildren),
    Children { id: String, nodes: Vec<TreeNode> },
    Repo(RepoInfo),
    Notice(String),
    Done,
}

type Task = BoxFuture<'static, Outcome>;

struct Tasks(FuturesUnordered<Task>);

impl Tasks {
    fn push(&mut self, task: impl std::future::Future<Output = Outcome> + Send + 'static) {
        self.0.push(task.boxed());
    }
}

fn load_root(app: &mut App, session: &Session, tasks: &mut Tasks) {
    if app.root_loading {
        return;
    }
    app.root_loading = true;
    let view = session.view.clone();
    tasks.push(async move { Outcome::Root(view.root_children().await) });
}

fn load_children(id: String, session: &Session, tasks: &mut Tasks) {
    let view = session.view.clone();
    tasks.push(async move {
        let nodes = view.patch_children(&id).await;
        Outcome::Children { id, nodes }
    });
}

fn refresh_upstream(session: &Session, tasks: &mut Tasks) {
    let store = session.store.clone();
    tasks.push(async move {
        store.refresh_upstream_branch().await;
        Outcome::Done
    });
}

async fn run_tui(session: Session) -> Result<()> {
    let mut app = App::new(session.root.clone(), session.config.clone());

    // Terminal input is blocking; read it on its own thread
    let (key_tx, key_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(event) = event::read() {
            if key_tx.send(event).is_err() {
                break;
            }
        }
    });

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app, &session, key_rx).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = result {
        eprintln!("Error: {:?}", err);
    }
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    session: &Session,
    mut keys: mpsc::UnboundedReceiver<Event>,
) -> Result<()> {
    let mut tasks = Tasks(FuturesUnordered::new());
    let mut store_events = session.store.subscribe();

    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel::<WatchEvent>();
    let _watcher = match session.workspace.git_dir().await {
        Ok(git_dir) => {
            let mut files = vec![config::local_config_path(&session.root)];
            files.extend(config::global_config_path());
            match RepoWatcher::new(&git_dir, files, 300, watch_tx) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!("not watching {}: {:#}", git_dir.display(), e);
                    None
                }
            }
        }
        Err(_) => None,
    };

    load_root(app, session, &mut tasks);
    refresh_upstream(session, &mut tasks);
    {
        let store = session.store.clone();
        tasks.push(async move {
            match store.repository().await {
                Ok(repo) => Outcome::Repo(repo),
                Err(e) => {
                    debug!("no repository info: {}", e);
                    Outcome::Done
                }
            }
        });
    }

    let mut tick = tokio::time::interval(Duration::from_millis(100));

    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        let retry_deadline = tokio::time::Instant::from_std(
            app.retry_at.unwrap_or_else(std::time::Instant::now),
        );

        tokio::select! {
            Some(event) = keys.recv() => {
                if let Event::Key(key) = event {
                    if key.kind == KeyEventKind::Press {
                        handle_key(app, key, session, &mut tasks)?;
                    }
                }
            }
            Some(outcome) = tasks.0.next(), if !tasks.0.is_empty() => {
                apply_outcome(app, outcome, session, &mut tasks);
            }
            event = store_events.recv() => match event {
                Ok(event) => on_store_event(app, event, session, &mut tasks),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "store events lagged; reloading tree");
                    load_root(app, session, &mut tasks);
                }
                Err(broadcast::error::RecvError::Closed) => {}
            },
            Some(event) = watch_rx.recv() => {
                on_watch_event(app, event, session, &mut tasks);
            }
            _ = tokio::time::sleep_until(retry_deadline), if app.retry_at.is_some() => {
                app.retry_at = None;
                load_root(app, session, &mut tasks);
            }
            _ = tick.tick() => {
                app.tick();
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn apply_outcome(app: &mut App, outcome: Outcome, session: &Session, tasks: &mut Tasks) {
    match outcome {
        Outcome::Root(root) => {
            app.set_roots(root);
            // The checkout may have moved while the tree was being projected
            sync_checked_out(app, session, tasks);
        }
        Outcome::Children { id, nodes } => app.set_children(&id, nodes),
        Outcome::Repo(repo) => app.repo = Some(repo),
        Outcome::Notice(msg) => app.notify(&msg),
        Outcome::Done => {}
    }
}

/// Re-project one patch node; unknown patches need the whole top level
fn refresh_node(app: &mut App, id: &str, session: &Session, tasks: &mut Tasks) {
    let Some(node) = session.view.refresh_patch_node(id) else {
        return;
    };
    match app.replace_patch_node(node) {
        Some(true) => load_children(id.to_string(), session, tasks),
        Some(false) => {}
        None => load_root(app, session, tasks),
    }
}

/// Move the ✓ marker to the patch the store reports as checked out,
/// re-rendering the node that lost it and the one that gained it
fn sync_checked_out(app: &mut App, session: &Session, tasks: &mut Tasks) {
    let current = session.store.checked_out_id();
    if current == app.checked_out {
        return;
    }
    let previous = std::mem::replace(&mut app.checked_out, current.clone());
    for id in [previous, current].into_iter().flatten() {
        refresh_node(app, &id, session, tasks);
    }
}

fn on_store_event(app: &mut App, event: StoreEvent, session: &Session, tasks: &mut Tasks) {
    debug!(?event, "store event");
    match event {
        StoreEvent::PatchesReplaced => load_root(app, session, tasks),
        StoreEvent::PatchUpdated { id } => refresh_node(app, &id, session, tasks),
        StoreEvent::PatchesReset => {
            app.clear_children();
            load_root(app, session, tasks);
        }
        StoreEvent::CheckedOutChanged { id } => {
            debug!(patch = ?id, "checkout moved");
            sync_checked_out(app, session, tasks);
        }
    }
}

fn on_watch_event(app: &mut App, event: WatchEvent, session: &Session, tasks: &mut Tasks) {
    match event {
        WatchEvent::HeadChanged => refresh_upstream(session, tasks),
        WatchEvent::ConfigChanged => {
            let mut config = config::load_config(&session.root);
            if let Some(url) = &session.api_url_override {
                config.httpd.api_url = url.clone();
            }
            let settings = HttpdSettings::from(&config.httpd);
            if session.client.settings() != settings {
                info!(api_url = %settings.base_url, "httpd settings changed");
                session.client.reset(settings);
                session.store.reset_all_patches();
            }
            app.config = config;
            app.notify("Configuration reloaded");
        }
    }
}

fn handle_key(app: &mut App, key: KeyEvent, session: &Session, tasks: &mut Tasks) -> Result<()> {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.should_quit = true;
        }

        // Navigation
        KeyCode::Char('j') | KeyCode::Down => app.next(),
        KeyCode::Char('k') | KeyCode::Up => app.prev(),
        KeyCode::Char('h') | KeyCode::Left => app.collapse_selected(),
        KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => activate(app, session, tasks)?,

        KeyCode::Char('d') => {
            if app.selected_file().is_some() {
                activate(app, session, tasks)?;
            } else {
                app.notify("Select a changed file to diff");
            }
        }

        KeyCode::Char('?') => app.show_detail = !app.show_detail,

        KeyCode::Char('y') => match app.selected_patch_id().map(str::to_string) {
            Some(id) => app.notify(&id),
            None => app.notify("No patch selected"),
        },

        // Drop everything and fetch again
        KeyCode::Char('r') => {
            session.store.reset_all_patches();
            app.notify("Refreshing patches…");
        }

        KeyCode::Char('R') => {
            let Some(id) = app.selected_patch_id().map(str::to_string) else {
                return Ok(());
            };
            let store = session.store.clone();
            tasks.push(async move {
                match store.refetch_patch(&id).await {
                    Ok(_) => Outcome::Notice(format!("Refetched {}", patch::shorten_hash(&id))),
                    Err(e) => Outcome::Notice(format!("Refetch failed: {e}")),
                }
            });
        }

        KeyCode::Char('c') => {
            let Some(id) = app.selected_patch_id().map(str::to_string) else {
                return Ok(());
            };
            app.notify(&format!("Checking out {}…", patch::shorten_hash(&id)));
            let workspace = session.workspace.clone();
            let store = session.store.clone();
            tasks.push(async move {
                match workspace.checkout_patch(&id).await {
                    Ok(_) => {
                        store.refresh_upstream_branch().await;
                        Outcome::Notice(format!("Checked out {}", patch::shorten_hash(&id)))
                    }
                    Err(e) => Outcome::Notice(format!("Checkout failed: {e:#}")),
                }
            });
        }

        KeyCode::Char('S') => {
            app.notify("Syncing with the network…");
            let workspace = session.workspace.clone();
            let store = session.store.clone();
            tasks.push(async move {
                match workspace.sync().await {
                    Ok(_) => {
                        store.reset_all_patches();
                        Outcome::Notice("Synced".to_string())
                    }
                    Err(e) => Outcome::Notice(format!("Sync failed: {e:#}")),
                }
            });
        }

        _ => {}
    }
    Ok(())
}

/// Enter on a node: expand a patch, open a file diff, or retry a failed load
fn activate(app: &mut App, session: &Session, tasks: &mut Tasks) -> Result<()> {
    let Some(row) = app.selected_row() else {
        return Ok(());
    };
    match row.node.action.clone() {
        Action::Patch { .. } => {
            if let Some(id) = app.toggle_selected() {
                load_children(id, session, tasks);
            }
        }
        Action::OpenDiff(change) => match change.snapshot_pair() {
            Some((old, new)) => match cli::open_diff_tool(&app.config.diff, old, new) {
                Ok(mut child) => {
                    let path = change.path.clone();
                    tasks.push(async move {
                        match child.wait().await {
                            Ok(status) if status.success() => Outcome::Done,
                            Ok(status) => Outcome::Notice(format!("Diff tool exited with {status} for {path}")),
                            Err(e) => Outcome::Notice(format!("Diff tool failed: {e}")),
                        }
                    });
                }
                Err(e) => app.notify(&format!("{e:#}")),
            },
            None => app.notify("Renamed files have no content to compare"),
        },
        Action::Refresh => {
            app.retry_at = None;
            load_root(app, session, tasks);
        }
        Action::None => {}
    }
    Ok(())
}
