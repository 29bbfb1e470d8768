use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, info, warn};

use taskdesk_notifier::api::{NotificationApi, RestClient};
use taskdesk_notifier::auth::{self, CredentialStore, Credentials};
use taskdesk_notifier::config::Config;
use taskdesk_notifier::connection::{ConnectionState, WsConnector};
use taskdesk_notifier::console::{self, describe_preferences};
use taskdesk_notifier::desktop::{self, CommandSoundPlayer, SystemNotifier};
use taskdesk_notifier::fanout::{Fanout, Toggle};
use taskdesk_notifier::hub::HubHandle;
use taskdesk_notifier::models::{NewNotification, NotificationKind};
use taskdesk_notifier::preferences::{JsonFileStorage, PreferenceStore};
use taskdesk_notifier::session::RealtimeSession;
use taskdesk_notifier::{logging, metrics};

/// Realtime notification agent for the TaskDesk dashboard
#[derive(Debug, Parser)]
#[command(name = "taskdesk-notifier", version, about, long_about = None)]
struct Cli {
    /// Command to run; defaults to `run`
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stay connected and deliver notifications until ctrl-c
    Run,
    /// Show the sound and desktop notification settings
    Prefs,
    /// Turn the audio cue on or off
    ToggleSound,
    /// Turn desktop notifications on or off
    ToggleNotifications,
    /// List notifications from the server
    List,
    /// Send a message notification to another user
    Send {
        /// Recipient user id
        recipient: String,
        /// Message text
        message: String,
    },
    /// Forget the stored login
    Logout,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let result = runtime.block_on(async {
        // Load environment variables from .env file if present
        dotenv::dotenv().ok();
        logging::setup_logging();

        let config = Config::from_env()?;
        match cli.command.unwrap_or(Command::Run) {
            Command::Run => run(&config).await,
            Command::Prefs => {
                print_lines(describe_preferences(preference_store(&config).get()));
                Ok(())
            }
            Command::ToggleSound => toggle(&config, Toggle::Sound).await,
            Command::ToggleNotifications => toggle(&config, Toggle::Notifications).await,
            Command::List => list(&config).await,
            Command::Send { recipient, message } => send(&config, &recipient, &message).await,
            Command::Logout => logout(&config).await,
        }
    });

    // A pending stdin read would otherwise hold shutdown until the next line
    runtime.shutdown_background();
    result
}

fn preference_store(config: &Config) -> PreferenceStore {
    PreferenceStore::load(JsonFileStorage::in_dir(&config.data_dir))
}

fn fanout(config: &Config) -> Fanout<SystemNotifier, CommandSoundPlayer> {
    Fanout::new(
        SystemNotifier::new(),
        CommandSoundPlayer::new(&config.sound_path),
        config.app_url.clone(),
    )
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

/// Flips one flag on disk. A running agent picks the change up on its next delivery.
async fn toggle(config: &Config, which: Toggle) -> Result<()> {
    let mut store = preference_store(config);
    let prefs = match which {
        Toggle::Sound => store.toggle_sound(),
        Toggle::Notifications => store.toggle_notifications(),
    };
    print_lines(describe_preferences(prefs));

    if let Some(cue) = fanout(config).on_toggled(which, prefs).await {
        // The process would exit before the cue finished otherwise
        let _ = cue.await;
    }
    Ok(())
}

fn rest_client(config: &Config) -> Result<RestClient> {
    RestClient::new(&config.api_url, config.connect_timeout).context("failed to build HTTP client")
}

/// Stored credentials, or a fresh login with the configured email and password.
async fn credentials(config: &Config, store: &CredentialStore) -> Result<Credentials> {
    match store.load() {
        Ok(Some(credentials)) => return Ok(credentials),
        Ok(None) => {}
        Err(e) => warn!("Ignoring unreadable credentials: {}", e),
    }

    let (Some(email), Some(password)) = (&config.email, &config.password) else {
        bail!("not logged in: set TASKDESK_EMAIL and TASKDESK_PASSWORD");
    };
    let client = rest_client(config)?;
    auth::login(&client, store, email, password)
        .await
        .context("login failed")
}

async fn authorized_client(config: &Config) -> Result<(RestClient, Credentials)> {
    let store = CredentialStore::in_dir(&config.data_dir);
    let credentials = credentials(config, &store).await?;
    let client = rest_client(config)?.with_token(credentials.token.clone());
    Ok((client, credentials))
}

async fn run(config: &Config) -> Result<()> {
    info!("Starting TaskDesk notifier");
    let (client, credentials) = authorized_client(config).await?;

    let session = RealtimeSession::init(
        credentials.user,
        WsConnector,
        config.connection_settings(),
        client,
        fanout(config),
        preference_store(config),
    );

    // Pull read flags changed elsewhere whenever the connection comes back
    let hub = session.hub();
    let mut state = session.connection_state();
    let reconcile_task = tokio::spawn(async move {
        let mut was_connected = false;
        while state.changed().await.is_ok() {
            let connected = *state.borrow_and_update() == ConnectionState::Connected;
            if connected && !was_connected {
                match hub.reconcile().await {
                    Ok(Ok(changed)) => debug!(changed, "Reconciled after connect"),
                    Ok(Err(e)) => warn!("Reconciliation failed: {}", e),
                    Err(_) => break,
                }
            }
            was_connected = connected;
        }
    });

    // Console stand-in for the toast stack and badge
    let mut snapshots = session.hub().subscribe();
    let display_task = tokio::spawn(async move {
        let mut shown: Vec<String> = Vec::new();
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            for toast in snapshot.toasts.iter().filter(|t| !shown.contains(&t.id)) {
                println!(
                    "[{} unread] {}: {}  (open {})",
                    snapshot.unread, toast.title, toast.body, toast.id
                );
            }
            shown = snapshot.toasts.iter().map(|t| t.id.clone()).collect();
        }
    });

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("Received shutdown signal, shutting down gracefully");
        }
        result = console_loop(session.hub(), &config.app_url) => {
            result?;
            info!("Console closed, shutting down");
        }
    }

    session.teardown().await;
    let _ = tokio::join!(reconcile_task, display_task);

    debug!("Final metrics:\n{}", metrics::render());
    info!("Shutdown complete");
    Ok(())
}

/// Reads console commands from stdin until `quit` or a closed hub. Without console
/// input the agent keeps running until ctrl-c.
async fn console_loop(hub: HubHandle, app_url: &str) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            debug!("Console input closed");
            return std::future::pending().await;
        };
        let command = match console::parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(usage) => {
                print!("{}", usage);
                continue;
            }
        };

        let Ok(reply) = console::execute(&hub, command).await else {
            break;
        };
        print_lines(reply.lines);
        if let Some(route) = reply.navigate {
            let url = format!("{}{}", app_url, route.path());
            if let Err(e) = desktop::open_url(&url) {
                warn!(url = %url, "Failed to open dashboard: {}", e);
            }
        }
        if reply.quit {
            break;
        }
    }
    Ok(())
}

async fn list(config: &Config) -> Result<()> {
    let (client, _) = authorized_client(config).await?;
    let notifications = client
        .list_notifications()
        .await
        .context("failed to fetch notifications")?;

    for notification in &notifications {
        let marker = if notification.read { " " } else { "*" };
        println!(
            "{} {}  {}  {}",
            marker,
            notification.id,
            notification.title(),
            notification.message
        );
    }
    let unread = notifications.iter().filter(|n| !n.read).count();
    println!("{} notifications, {} unread", notifications.len(), unread);
    Ok(())
}

async fn send(config: &Config, recipient: &str, message: &str) -> Result<()> {
    let (client, _) = authorized_client(config).await?;
    let request = NewNotification {
        recipient: recipient.to_string(),
        kind: NotificationKind::Message,
        message: message.to_string(),
        task: None,
    };
    match client
        .send_notification(&request)
        .await
        .context("failed to send notification")?
    {
        Some(created) => println!("sent {}", created.id),
        None => println!("sent"),
    }
    Ok(())
}

async fn logout(config: &Config) -> Result<()> {
    let store = CredentialStore::in_dir(&config.data_dir);
    let Some(credentials) = store.load().context("failed to read credentials")? else {
        println!("not logged in");
        return Ok(());
    };

    let client = rest_client(config)?.with_token(credentials.token);
    if let Err(e) = auth::logout(&client, &store).await {
        // Local credentials are already gone
        warn!("Server logout failed: {}", e);
    }
    println!("logged out {}", credentials.user.email);
    Ok(())
}
