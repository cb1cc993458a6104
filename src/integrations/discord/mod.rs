use commands::define_command_options;
use poise::serenity_prelude as serenity;
use std::{collections::HashMap, sync::Arc};

use crate::{
    core::{
        manager::RosterRequest,
        settings::Settings,
        tickets::{MemberProfile, RoleRef},
    },
    send_message, Directory,
};

mod commands;

struct Data {
    directory: Directory,
}

/// Role names of a guild, read from the cache.
fn guild_role_names(cache: &serenity::Cache, guild_id: serenity::GuildId) -> HashMap<u64, String> {
    cache
        .guild(guild_id)
        .map(|guild| {
            guild
                .roles
                .iter()
                .map(|(id, role)| (id.get(), role.name.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Convert a guild member into the profile tickets are computed from.
fn member_profile(member: &serenity::Member, role_names: &HashMap<u64, String>) -> MemberProfile {
    MemberProfile {
        roles: member
            .roles
            .iter()
            .map(|id| RoleRef {
                id: id.get(),
                name: role_names.get(&id.get()).cloned().unwrap_or_default(),
            })
            .collect(),
        nickname: member.nick.clone(),
        display_name: Some(member.display_name().to_owned()),
        global_name: member.user.global_name.clone(),
        username: member.user.name.clone(),
    }
}

/// Whether a member holds the Administrator permission in the guild.
#[allow(deprecated)]
fn is_administrator(
    cache: &serenity::Cache,
    guild_id: serenity::GuildId,
    member: &serenity::Member,
) -> bool {
    cache
        .guild(guild_id)
        .is_some_and(|guild| guild.member_permissions(member).administrator())
}

/// Delete messages posted in a locked channel by anyone but admins and moderators.
async fn enforce_chat_lock(
    context: &serenity::Context,
    message: &serenity::Message,
    data: &Data,
) -> anyhow::Result<()> {
    if message.author.bot {
        return Ok(());
    }
    let Some(guild_id) = message.guild_id else {
        return Ok(());
    };

    let document = send_message!(data.directory.roster_actor, RosterRequest, Snapshot)?;
    if document.chat_lock.locked_channel() != Some(message.channel_id.get())
        || document.is_moderator(message.author.id.get())
    {
        return Ok(());
    }

    let member = guild_id.member(context, message.author.id).await?;
    if is_administrator(&context.cache, guild_id, &member) {
        return Ok(());
    }

    if let Err(why) = message.delete(context).await {
        log::error!("Failed to delete message in locked channel: {}", why);
    }
    Ok(())
}

/// Initialize the discord bot and register its commands.
pub async fn init_discord(
    token: String,
    settings: Arc<Settings>,
    directory: Directory,
) -> anyhow::Result<()> {
    log::info!("Initializing Discord bot");

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let mut options = poise::FrameworkOptions::<Data, anyhow::Error> {
        event_handler: |ctx, event, _framework, data| {
            Box::pin(async move {
                if let serenity::FullEvent::Message { new_message } = event {
                    if let Err(why) = enforce_chat_lock(ctx, new_message, data).await {
                        log::warn!("Chat lock check failed: {}", why);
                    }
                }

                Ok(())
            })
        },
        ..Default::default()
    };
    define_command_options(&mut options);

    let framework = poise::Framework::<Data, anyhow::Error>::builder()
        .options(options)
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                log::info!("Logged in as {}", ready.user.name);
                let commands = &framework.options().commands;
                match settings.guild_id {
                    Some(guild_id) => {
                        poise::builtins::register_in_guild(
                            ctx,
                            commands,
                            serenity::GuildId::new(guild_id),
                        )
                        .await?;
                        log::info!("Registered {} commands in guild {}", commands.len(), guild_id);
                    }
                    None => {
                        poise::builtins::register_globally(ctx, commands).await?;
                        log::info!("Registered {} commands globally", commands.len());
                    }
                }
                Ok(Data { directory })
            })
        })
        .build();

    let mut client = serenity::Client::builder(token, intents)
        .framework(framework)
        .await?;

    client.start().await?;

    Ok(())
}

/// Check that a token belongs to a bot account.
pub async fn check_token(token: &str) -> anyhow::Result<()> {
    let http = serenity::Http::new(token.trim());

    let bot_user = http
        .get_current_user()
        .await
        .map_err(|why| anyhow::anyhow!("Could not access user info: {:?}", why))?;

    log::info!("Found user {}", bot_user.name);
    println!("Token is valid for {}", bot_user.name);

    Ok(())
}
