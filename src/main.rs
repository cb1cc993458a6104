use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use crate::core::{
    format::{detailed_roster_entry, simple_roster_list, statistics_lines},
    manager::{run_roster_manager, Roster, RosterActor},
    settings::{Settings, StorageKind},
    store::ConfiguredStore,
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinSet,
};

mod core;
mod error;
mod integrations;
mod util;

/// Handle to an actor task.
pub struct ActorRef<T> {
    tx: UnboundedSender<T>,
}

impl<T> Clone for ActorRef<T> {
    fn clone(&self) -> Self {
        ActorRef {
            tx: self.tx.clone(),
        }
    }
}

impl<T> ActorRef<T> {
    pub fn new() -> (Self, UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ActorRef { tx }, rx)
    }

    pub fn send(&self, msg: T) {
        if self.tx.send(msg).is_err() {
            log::error!("Actor is no longer running, message dropped");
        }
    }
}

/// Reply-to object, used to return the result of an actor request.
pub struct Rto<T> {
    tx: oneshot::Sender<anyhow::Result<T>>,
}

pub struct RtoReceiver<T> {
    rx: oneshot::Receiver<anyhow::Result<T>>,
}

impl<T> Rto<T> {
    pub fn new() -> (Rto<T>, RtoReceiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Rto { tx }, RtoReceiver { rx })
    }

    pub fn reply(self, value: anyhow::Result<T>) {
        if self.tx.send(value).is_err() {
            log::debug!("Reply dropped, requester went away");
        }
    }
}

impl<T> RtoReceiver<T> {
    pub async fn recv(self) -> anyhow::Result<T> {
        self.rx
            .await
            .map_err(|_| anyhow::anyhow!("Actor stopped before replying"))?
    }
}

/// Send a request to an actor and wait for its reply.
///
/// ```ignore
/// let snapshot = send_message!(roster, RosterRequest, Snapshot)?;
/// ```
#[macro_export]
macro_rules! send_message {
    ($actor:expr, $enum:ident, $variant:ident $(, $arg:expr)* $(,)?) => {{
        let (rto, rx) = $crate::Rto::new();
        $actor.send($enum::$variant($($arg,)* rto));
        rx.recv().await
    }};
}

/// Actors shared by the integrations.
#[derive(Clone)]
pub struct Directory {
    pub roster_actor: RosterActor,
}

#[derive(Parser, Debug)]
#[command(name = "rafflebot")]
#[command(version = "0.1")]
#[command(about = "A Discord bot for raffle registrations.", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: RunType,
}

#[derive(Subcommand, Debug)]
enum RunType {
    /// Run the Discord bot.
    Run {
        /// Location of the settings file.
        /// The token can also be provided through the DISCORD_TOKEN environment variable.
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },

    /// Print roster statistics from a database.
    Stats {
        /// Location of the database.
        #[arg(short, long, default_value = "database.json")]
        database: PathBuf,

        #[arg(long, value_enum, default_value_t = StorageKind::Json)]
        storage: StorageKind,

        /// Print statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the participant list from a database.
    Export {
        /// Location of the database.
        #[arg(short, long, default_value = "database.json")]
        database: PathBuf,

        #[arg(long, value_enum, default_value_t = StorageKind::Json)]
        storage: StorageKind,

        /// One line per ticket instead of one line per participant.
        #[arg(long)]
        detailed: bool,
    },

    /// Check that a Discord token is valid.
    CheckToken {
        #[arg(short, long)]
        token: String,
    },
}

async fn open_roster(kind: StorageKind, database: PathBuf) -> anyhow::Result<Roster<ConfiguredStore>> {
    let store = ConfiguredStore::open(kind, database).await?;
    Ok(Roster::open(store).await?)
}

async fn run(settings_file: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = Arc::new(Settings::load(settings_file.as_deref())?);
    let token = settings.token()?.to_owned();

    let database = settings.database_file();
    log::info!(
        "Using {:?} storage at {}",
        settings.storage(),
        database.display()
    );
    let roster = open_roster(settings.storage(), database).await?;

    let mut tasks = JoinSet::<Result<(), anyhow::Error>>::new();

    let (roster_actor, rx) = RosterActor::new();
    tasks.spawn(run_roster_manager(roster, rx));

    let directory = Directory { roster_actor };
    integrations::init_integrations(&mut tasks, token, settings, directory);

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Err(e)) => {
                log::error!("Task failed: {:?}", e);
                return Err(e);
            }
            Err(e) => {
                log::error!("Task panicked: {}", e);
                anyhow::bail!(e);
            }
            Ok(Ok(())) => {}
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        RunType::Run { settings } => run(settings).await,
        RunType::Stats {
            database,
            storage,
            json,
        } => {
            let roster = open_roster(storage, database).await?;
            let stats = roster.document().statistics();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                for line in statistics_lines(&stats, |_| None) {
                    println!("{}", line);
                }
            }
            Ok(())
        }
        RunType::Export {
            database,
            storage,
            detailed,
        } => {
            let roster = open_roster(storage, database).await?;
            let document = roster.document();
            let lines: Vec<String> = if detailed {
                document
                    .participants()
                    .flat_map(|(_, p)| detailed_roster_entry(&p.full_name(), &p.tickets, |_| None))
                    .collect()
            } else {
                let names: Vec<String> = document.participants().map(|(_, p)| p.full_name()).collect();
                simple_roster_list(&names)
            };
            for line in lines {
                println!("{}", line);
            }
            Ok(())
        }
        RunType::CheckToken { token } => integrations::discord::check_token(&token).await,
    }
}
