use std::sync::Arc;

use tokio::task::JoinSet;

use crate::{core::settings::Settings, Directory};

pub mod discord;

pub fn init_integrations(
    tasks: &mut JoinSet<Result<(), anyhow::Error>>,
    token: String,
    settings: Arc<Settings>,
    directory: Directory,
) {
    // Add discord integration to tasks
    tasks.spawn(discord::init_discord(token, settings, directory));
}
