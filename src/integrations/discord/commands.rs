use std::collections::HashMap;

use anyhow::anyhow;
use chrono::Local;
use futures::{Stream, StreamExt};
use poise::serenity_prelude as serenity;

use crate::{
    core::{
        document::{Document, TagConfig},
        format::{
            chunk_lines, detailed_roster_entry, simple_roster_list, statistics_lines,
            ticket_summary_lines, MESSAGE_LIMIT,
        },
        manager::{ConfigChange, NewRegistration, RosterRequest},
        registry::{validate_full_name, ClearMode},
        tickets::{
            calculate_tickets, fold_case, has_tag, normalize_tag_text, tag_field_report,
            MemberProfile,
        },
    },
    error::RaffleError,
    send_message,
};

use super::{guild_role_names, member_profile, Data};

type Context<'a> = poise::Context<'a, Data, anyhow::Error>;

const CLOSED_SIGNUP_TEXT: &str = "❌ REGISTRATIONS CLOSED";
const DEFAULT_SIGNUP_TEXT: &str =
    "**REGISTRATIONS OPEN!**\nUse `/register` with your first name, last name and the hashtag to join the raffle.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
enum ListKind {
    #[name = "simple"]
    Simple,
    #[name = "with_tickets"]
    WithTickets,
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
enum ToggleAction {
    #[name = "on"]
    On,
    #[name = "off"]
    Off,
    #[name = "status"]
    Status,
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
enum ClearAction {
    #[name = "participants"]
    Participants,
    #[name = "everything"]
    Everything,
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
enum RegistrationsAction {
    #[name = "open"]
    Open,
    #[name = "close"]
    Close,
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
enum BlacklistAction {
    #[name = "ban"]
    Ban,
    #[name = "unban"]
    Unban,
    #[name = "list"]
    List,
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
enum ModeratorAction {
    #[name = "add"]
    Add,
    #[name = "remove"]
    Remove,
    #[name = "list"]
    List,
}

/// Echo a failed command to the invoking user.
///
/// Internal failures are logged and replaced with a generic message.
async fn wrap_fallible<T>(context: &Context<'_>, result: anyhow::Result<T>) -> anyhow::Result<T> {
    if let Err(err) = &result {
        let message = match err.downcast_ref::<RaffleError>() {
            Some(e) if e.is_user_error() => e.to_string(),
            _ => {
                log::error!("Command '{}' failed: {:?}", context.command().name, err);
                "Something went wrong, please try again later.".to_owned()
            }
        };
        if let Err(why) = send_private(context, format!("❌ {}", message)).await {
            log::warn!("Failed to reply: {}", why);
        }
    }

    result
}

/// Reply only visible to the invoking user.
async fn send_private(context: &Context<'_>, content: impl Into<String>) -> anyhow::Result<()> {
    context
        .send(
            poise::CreateReply::default()
                .content(content)
                .ephemeral(true),
        )
        .await?;
    Ok(())
}

/// Send long text as several private replies.
async fn send_private_lines<S: AsRef<str>>(context: &Context<'_>, lines: &[S]) -> anyhow::Result<()> {
    for chunk in chunk_lines(lines, MESSAGE_LIMIT) {
        send_private(context, chunk).await?;
    }
    Ok(())
}

async fn snapshot(context: &Context<'_>) -> anyhow::Result<Document> {
    send_message!(context.data().directory.roster_actor, RosterRequest, Snapshot)
}

async fn configure(context: &Context<'_>, change: ConfigChange) -> anyhow::Result<bool> {
    log::info!("{} requested {:?}", context.author().name, change);
    send_message!(context.data().directory.roster_actor, RosterRequest, Configure, change)
}

fn role_names(context: &Context<'_>) -> HashMap<u64, String> {
    context
        .guild_id()
        .map(|guild_id| guild_role_names(context.cache(), guild_id))
        .unwrap_or_default()
}

/// Delete a message, logging instead of failing.
async fn delete_message_quietly(context: &Context<'_>, channel_id: u64, message_id: u64) -> bool {
    if channel_id == 0 || message_id == 0 {
        return false;
    }
    match serenity::ChannelId::new(channel_id)
        .delete_message(context.http(), serenity::MessageId::new(message_id))
        .await
    {
        Ok(()) => true,
        Err(why) => {
            log::warn!("Failed to delete message {}: {}", message_id, why);
            false
        }
    }
}

async fn has_admin_access(context: &Context<'_>) -> anyhow::Result<bool> {
    let is_admin = context
        .author_member()
        .await
        .and_then(|member| member.permissions)
        .is_some_and(|permissions| permissions.administrator());
    if is_admin {
        return Ok(true);
    }
    Ok(snapshot(context).await?.is_moderator(context.author().id.get()))
}

/// Commands other than `help`, `register` and `status` need Administrator or a moderator entry.
async fn is_admin_or_moderator(context: Context<'_>) -> anyhow::Result<bool> {
    if has_admin_access(&context).await? {
        return Ok(true);
    }

    log::debug!(
        "Command '{}' denied for {}",
        context.command().name,
        context.author().name
    );
    send_private(&context, "❌ You do not have permission to use this command.").await?;
    Ok(false)
}

/// The public message announcing a registration.
fn registration_message(user_id: u64, first_name: &str, last_name: &str, hashtag: &str) -> String {
    format!(
        "<@{}>\n{} {}\n{}",
        user_id,
        first_name.trim(),
        last_name.trim(),
        hashtag
    )
}

const PUBLIC_COMMANDS: &[(&str, &str)] = &[
    ("help", "Show this message"),
    ("register", "Register for the raffle"),
    ("status", "Check your registration and tickets"),
];

const ADMIN_COMMANDS: &[(&str, &str)] = &[
    ("setup", "Configure the signup and registration channels"),
    ("hashtag", "Set the required hashtag"),
    ("hashtag_lock", "Lock or unlock the hashtag"),
    ("tag", "Configure the server tag"),
    ("manual_tag", "Grant tag tickets to a participant"),
    ("bonus_role", "Add a bonus role"),
    ("remove_bonus_role", "Remove a bonus role"),
    ("list", "List participants"),
    ("export", "Export the participant list"),
    ("recalculate", "Recalculate everyone's tickets"),
    ("stats", "Show statistics"),
    ("clear", "Clear participants or all data"),
    ("registrations", "Open or close registrations"),
    ("blacklist", "Manage the blacklist"),
    ("chat", "Lock or unlock a channel"),
    ("moderator", "Manage bot moderators"),
    ("unregister", "Remove a participant"),
    ("announce", "Post an announcement"),
];

const HELP_COLOUR: u32 = 0x3498db;
const ANNOUNCEMENT_COLOUR: u32 = 0x3498db;

fn command_list(commands: &[(&str, &str)]) -> String {
    commands
        .iter()
        .map(|(name, description)| format!("/{} - {}", name, description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sections of the help message. Admin commands are only listed for admins and moderators.
fn help_sections(show_admin: bool) -> Vec<(&'static str, String)> {
    let mut sections = vec![("🔓 Public commands", command_list(PUBLIC_COMMANDS))];
    if show_admin {
        sections.push(("🔐 Admin commands", command_list(ADMIN_COMMANDS)));
    }
    sections
}

/// Parse an embed colour given as a name or a hex code such as `#ff8800`.
fn parse_colour(text: &str) -> Result<u32, RaffleError> {
    let text = text.trim().to_lowercase();
    let named = match text.as_str() {
        "blue" => Some(0x3498db),
        "red" => Some(0xe74c3c),
        "green" => Some(0x2ecc71),
        "yellow" => Some(0xfee75c),
        "gold" => Some(0xf1c40f),
        "orange" => Some(0xe67e22),
        "purple" => Some(0x9b59b6),
        "teal" => Some(0x1abc9c),
        "blurple" => Some(0x5865f2),
        "white" => Some(0xffffff),
        "black" => Some(0x000000),
        _ => None,
    };
    if let Some(colour) = named {
        return Ok(colour);
    }

    let hex = text
        .strip_prefix('#')
        .or_else(|| text.strip_prefix("0x"))
        .unwrap_or(&text);
    let unknown = || RaffleError::Validation(format!("Unknown colour '{}'", text));
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(unknown());
    }
    u32::from_str_radix(hex, 16).map_err(|_| unknown())
}

fn is_image(attachment: &serenity::Attachment) -> bool {
    attachment
        .content_type
        .as_deref()
        .is_some_and(|t| t.starts_with("image"))
}

fn find_participant_by_name(document: &Document, name: &str) -> Option<u64> {
    let name = name.trim().to_lowercase();
    document
        .participants()
        .find(|(_, p)| p.full_name().to_lowercase() == name)
        .map(|(id, _)| id)
}

/// Roster text for `/list` and `/export`.
fn roster_lines(
    document: &Document,
    kind: ListKind,
    role_name: impl Fn(u64) -> Option<String>,
) -> Vec<String> {
    match kind {
        ListKind::Simple => {
            let names: Vec<String> = document.participants().map(|(_, p)| p.full_name()).collect();
            let mut lines = vec!["📋 **Participants (simple)**".to_owned()];
            lines.extend(simple_roster_list(&names));
            lines
        }
        ListKind::WithTickets => {
            let mut lines = vec!["📋 **Participants (with tickets)**".to_owned()];
            for (_, participant) in document.participants() {
                lines.extend(detailed_roster_entry(
                    &participant.full_name(),
                    &participant.tickets,
                    &role_name,
                ));
            }
            lines
        }
    }
}

/// Tag configuration, plus a detection test against `member` when tag detection is on.
fn tag_status_lines(tag: &TagConfig, member: Option<&MemberProfile>) -> Vec<String> {
    let mut lines = vec![format!(
        "**Status**: {}",
        if tag.enabled { "✅ Enabled" } else { "❌ Disabled" }
    )];

    match tag.text.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(text) => {
            lines.push(format!("**Tag text**: `{}`", text));
            let clean = normalize_tag_text(text);
            if !clean.is_empty() && clean != fold_case(text.trim()) {
                lines.push(format!("**Also accepts**: `{}`", clean));
            }
        }
        None => lines.push("**Tag text**: not configured".to_owned()),
    }
    lines.push(format!("**Bonus tickets**: {}", tag.quantity));

    if let (Some(text), Some(member)) = (tag.active_text(), member) {
        lines.push("**Detection test (you)**:".to_owned());
        for (label, value, matched) in tag_field_report(member, text) {
            lines.push(match (value, matched) {
                (Some(value), true) => format!("✅ {}: `{}`", label, value),
                (Some(value), false) => format!("❌ {}: `{}`", label, value),
                (None, _) => format!("⚪ {}: not set", label),
            });
        }
        lines.push(if has_tag(member, text) {
            format!("✅ You would receive +{} ticket(s) from the tag", tag.quantity)
        } else {
            format!("❌ You would NOT receive +{} ticket(s) from the tag", tag.quantity)
        });
    }

    lines
}

/// Create an autocomplete stream that matches participant names
async fn autocomplete_participant_name<'a>(
    ctx: Context<'_>,
    partial: &'a str,
) -> impl Stream<Item = String> + 'a {
    let names: Vec<String> = snapshot(&ctx)
        .await
        .map(|document| document.participants().map(|(_, p)| p.full_name()).collect())
        .unwrap_or_default();

    futures::stream::iter(names)
        .filter(move |name| {
            futures::future::ready(name.to_lowercase().contains(&partial.to_lowercase()))
        })
        .take(25)
}

/// Register for the raffle.
#[poise::command(slash_command, guild_only)]
async fn register(
    context: Context<'_>,
    #[description = "Your first name"]
    #[max_length = 50]
    first_name: String,
    #[description = "Your last name"]
    #[max_length = 50]
    last_name: String,
    #[description = "The hashtag announced by the organizers"]
    #[max_length = 100]
    hashtag: String,
) -> Result<(), anyhow::Error> {
    let _ = context.defer_ephemeral().await;
    wrap_fallible(
        &context,
        register_participant(&context, first_name, last_name, hashtag).await,
    )
    .await
}

async fn register_participant(
    context: &Context<'_>,
    first_name: String,
    last_name: String,
    hashtag: String,
) -> anyhow::Result<()> {
    let user_id = context.author().id.get();
    let document = snapshot(context).await?;

    document.check_can_register(user_id, &hashtag)?;
    validate_full_name(&first_name, &last_name)?;
    if document.is_name_taken(&first_name, &last_name, None) {
        return Err(RaffleError::DuplicateName(format!(
            "{} {}",
            first_name.trim(),
            last_name.trim()
        ))
        .into());
    }
    let channel_id = document
        .registration_channel
        .ok_or(RaffleError::ChannelNotConfigured)?;

    let roles = role_names(context);
    let member = context
        .author_member()
        .await
        .ok_or_else(|| anyhow!("Could not resolve guild member {}", user_id))?;
    let profile = member_profile(&member, &roles);
    let tickets = calculate_tickets(&profile, &document.bonus_roles, &document.tag, None);

    let required_hashtag = document.hashtag.value.clone().unwrap_or_default();
    let message = serenity::ChannelId::new(channel_id)
        .say(
            context,
            registration_message(user_id, &first_name, &last_name, &required_hashtag),
        )
        .await?;
    if let Err(why) = message.react(context, '✅').await {
        log::warn!("Failed to react to registration message: {}", why);
    }

    let registration = NewRegistration {
        user_id,
        first_name,
        last_name,
        tickets,
        message_id: Some(message.id.get()),
    };
    let participant = match send_message!(
        context.data().directory.roster_actor,
        RosterRequest,
        Register,
        registration
    ) {
        Ok(participant) => participant,
        Err(e) => {
            delete_message_quietly(context, channel_id, message.id.get()).await;
            return Err(e);
        }
    };

    let mut lines = vec![
        "✅ Registration confirmed!".to_owned(),
        format!("**Total tickets**: 🎫 {}", participant.tickets.total()),
    ];
    lines.extend(ticket_summary_lines(&participant.tickets, |id| {
        roles.get(&id).cloned()
    }));
    send_private(context, lines.join("\n")).await
}

/// Check your registration status.
#[poise::command(slash_command, guild_only)]
async fn status(context: Context<'_>) -> Result<(), anyhow::Error> {
    wrap_fallible(&context, show_status(&context).await).await
}

async fn show_status(context: &Context<'_>) -> anyhow::Result<()> {
    let document = snapshot(context).await?;
    let Some(participant) = document.lookup(context.author().id.get()) else {
        return send_private(context, "❌ You are not registered in the raffle.").await;
    };

    let roles = role_names(context);
    let mut lines = vec![
        "✅ You are registered!".to_owned(),
        format!("**Name**: {}", participant.full_name()),
        format!("**Total tickets**: 🎫 {}", participant.tickets.total()),
        "**Breakdown**:".to_owned(),
    ];
    lines.extend(ticket_summary_lines(&participant.tickets, |id| {
        roles.get(&id).cloned()
    }));
    send_private(context, lines.join("\n")).await
}

/// Post the signup announcement and choose where registrations are posted.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn setup(
    context: Context<'_>,
    #[description = "Channel for the signup announcement"]
    #[channel_types("Text")]
    signup_channel: serenity::GuildChannel,
    #[description = "Channel where registrations are posted"]
    #[channel_types("Text")]
    registration_channel: serenity::GuildChannel,
    #[description = "Announcement text"] message: Option<String>,
) -> Result<(), anyhow::Error> {
    let _ = context.defer_ephemeral().await;
    wrap_fallible(
        &context,
        setup_registrations(&context, signup_channel, registration_channel, message).await,
    )
    .await
}

async fn setup_registrations(
    context: &Context<'_>,
    signup_channel: serenity::GuildChannel,
    registration_channel: serenity::GuildChannel,
    message: Option<String>,
) -> anyhow::Result<()> {
    configure(
        context,
        ConfigChange::SetRegistrationChannel(Some(registration_channel.id.get())),
    )
    .await?;
    configure(context, ConfigChange::SetRegistrationsClosed(false)).await?;

    let content = message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SIGNUP_TEXT.to_owned());
    let posted = signup_channel.id.say(context, content).await?;
    configure(context, ConfigChange::AddSignupMessage(posted.id.get())).await?;

    send_private(
        context,
        format!(
            "✅ Registrations configured!\n**Signup channel**: <#{}>\n**Registration channel**: <#{}>",
            signup_channel.id, registration_channel.id
        ),
    )
    .await
}

/// Set the hashtag required to register.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn hashtag(
    context: Context<'_>,
    #[description = "Required hashtag"] hashtag: String,
) -> Result<(), anyhow::Error> {
    wrap_fallible(
        &context,
        configure(&context, ConfigChange::SetHashtag(hashtag.clone())).await,
    )
    .await?;
    send_private(&context, format!("✅ Hashtag set to `{}`", hashtag.trim())).await
}

/// Lock or unlock the hashtag against changes.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn hashtag_lock(
    context: Context<'_>,
    #[description = "Whether the hashtag is locked"] locked: bool,
) -> Result<(), anyhow::Error> {
    wrap_fallible(
        &context,
        configure(&context, ConfigChange::LockHashtag(locked)).await,
    )
    .await?;
    send_private(
        &context,
        if locked {
            "🔒 Hashtag locked."
        } else {
            "🔓 Hashtag unlocked."
        },
    )
    .await
}

/// Configure the server tag that grants bonus tickets.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn tag(
    context: Context<'_>,
    #[description = "Action"] action: ToggleAction,
    #[description = "Tag text"] text: Option<String>,
    #[description = "Bonus tickets for the tag"]
    #[min = 1]
    #[max = 1000]
    quantity: Option<u32>,
) -> Result<(), anyhow::Error> {
    wrap_fallible(&context, configure_tag(&context, action, text, quantity).await).await
}

async fn configure_tag(
    context: &Context<'_>,
    action: ToggleAction,
    text: Option<String>,
    quantity: Option<u32>,
) -> anyhow::Result<()> {
    let quantity = quantity.unwrap_or(1);
    match action {
        ToggleAction::Status => {
            let document = snapshot(context).await?;
            let member = context.author_member().await;
            let profile = member.map(|m| member_profile(&m, &role_names(context)));
            send_private(context, tag_status_lines(&document.tag, profile.as_ref()).join("\n")).await
        }
        ToggleAction::On => {
            configure(context, ConfigChange::ConfigureTag(true, text, quantity)).await?;
            let document = snapshot(context).await?;
            send_private(
                context,
                format!(
                    "✅ Tag enabled!\n**Text**: {}\n**Bonus tickets**: {}",
                    document.tag.text.unwrap_or_default(),
                    quantity
                ),
            )
            .await
        }
        ToggleAction::Off => {
            configure(context, ConfigChange::ConfigureTag(false, text, quantity)).await?;
            send_private(context, "❌ Tag disabled.").await
        }
    }
}

/// Grant bonus tickets to holders of a role.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn bonus_role(
    context: Context<'_>,
    #[description = "Bonus role"] role: serenity::Role,
    #[description = "Bonus tickets"]
    #[min = 1]
    #[max = 1000]
    quantity: u32,
    #[description = "Abbreviation shown in the detailed list"] abbreviation: String,
) -> Result<(), anyhow::Error> {
    wrap_fallible(
        &context,
        configure(
            &context,
            ConfigChange::AddBonusRole(role.id.get(), quantity, abbreviation.clone()),
        )
        .await,
    )
    .await?;
    send_private(
        &context,
        format!(
            "✅ Bonus role configured!\n**Role**: {}\n**Tickets**: {}\n**Abbreviation**: {}",
            role.name,
            quantity,
            abbreviation.trim()
        ),
    )
    .await
}

/// Stop granting bonus tickets to a role.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn remove_bonus_role(
    context: Context<'_>,
    #[description = "Role to remove"] role: serenity::Role,
) -> Result<(), anyhow::Error> {
    let removed = wrap_fallible(
        &context,
        configure(&context, ConfigChange::RemoveBonusRole(role.id.get())).await,
    )
    .await?;
    let reply = if removed {
        format!("✅ Role {} removed from the bonus roles.", role.name)
    } else {
        format!("❌ Role {} was not a bonus role.", role.name)
    };
    send_private(&context, reply).await
}

/// List the participants.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn list(
    context: Context<'_>,
    #[description = "List type"] kind: ListKind,
) -> Result<(), anyhow::Error> {
    let _ = context.defer_ephemeral().await;
    let document = wrap_fallible(&context, snapshot(&context).await).await?;
    if document.participants.is_empty() {
        return send_private(&context, "📋 No participants registered yet.").await;
    }

    let roles = role_names(&context);
    let lines = roster_lines(&document, kind, |id| roles.get(&id).cloned());
    send_private_lines(&context, &lines).await
}

/// Export the participants as a text file.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn export(
    context: Context<'_>,
    #[description = "Export type"] kind: ListKind,
) -> Result<(), anyhow::Error> {
    let _ = context.defer_ephemeral().await;
    let document = wrap_fallible(&context, snapshot(&context).await).await?;
    if document.participants.is_empty() {
        return send_private(&context, "📋 No participants to export.").await;
    }

    let roles = role_names(&context);
    let content = roster_lines(&document, kind, |id| roles.get(&id).cloned()).join("\n");
    let filename = format!(
        "participants_{}_{}.txt",
        if kind == ListKind::Simple { "simple" } else { "with_tickets" },
        Local::now().format("%Y%m%d_%H%M%S")
    );

    context
        .send(
            poise::CreateReply::default()
                .content(format!(
                    "✅ List exported! Total: {} participant(s)",
                    document.participants.len()
                ))
                .attachment(serenity::CreateAttachment::bytes(
                    content.into_bytes(),
                    filename,
                ))
                .ephemeral(true),
        )
        .await?;
    log::info!("Participant list exported by {}", context.author().name);
    Ok(())
}

/// Recalculate the tickets of every participant.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn recalculate(context: Context<'_>) -> Result<(), anyhow::Error> {
    let _ = context.defer_ephemeral().await;
    wrap_fallible(&context, recalculate_tickets(&context).await).await
}

async fn recalculate_tickets(context: &Context<'_>) -> anyhow::Result<()> {
    let guild_id = context
        .guild_id()
        .ok_or_else(|| anyhow!("Command must be used in a server"))?;
    let document = snapshot(context).await?;
    let roles = role_names(context);

    let mut profiles = HashMap::new();
    for (user_id, _) in document.participants() {
        match guild_id.member(context, serenity::UserId::new(user_id)).await {
            Ok(member) => {
                profiles.insert(user_id, member_profile(&member, &roles));
            }
            Err(why) => log::debug!("Could not fetch member {}: {}", user_id, why),
        }
    }

    let report = send_message!(
        context.data().directory.roster_actor,
        RosterRequest,
        Recalculate,
        profiles
    )?;
    send_private(
        context,
        format!(
            "✅ Tickets recalculated!\n**Updated**: {}\n**Failed**: {}",
            report.updated, report.failed
        ),
    )
    .await
}

/// Show raffle statistics.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn stats(context: Context<'_>) -> Result<(), anyhow::Error> {
    let document = wrap_fallible(&context, snapshot(&context).await).await?;
    let roles = role_names(&context);
    let mut lines = vec!["📊 **Raffle statistics**".to_owned()];
    lines.extend(statistics_lines(&document.statistics(), |id| {
        roles.get(&id).cloned()
    }));
    send_private_lines(&context, &lines).await
}

/// Remove all participants, or reset everything.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn clear(
    context: Context<'_>,
    #[description = "What to clear"] action: ClearAction,
) -> Result<(), anyhow::Error> {
    let _ = context.defer_ephemeral().await;
    wrap_fallible(&context, clear_roster(&context, action).await).await
}

async fn clear_roster(context: &Context<'_>, action: ClearAction) -> anyhow::Result<()> {
    let mode = match action {
        ClearAction::Participants => ClearMode::ParticipantsOnly,
        ClearAction::Everything => ClearMode::Full,
    };
    let channel_id = snapshot(context).await?.registration_channel;

    let removed = send_message!(
        context.data().directory.roster_actor,
        RosterRequest,
        BulkClear,
        mode
    )?;
    log::info!(
        "Roster cleared ({:?}) by {}, {} participant(s) removed",
        mode,
        context.author().name,
        removed.len()
    );

    let mut deleted = 0;
    if let Some(channel_id) = channel_id {
        for message_id in removed.values().filter_map(|p| p.message_id) {
            if delete_message_quietly(context, channel_id, message_id).await {
                deleted += 1;
            }
        }
    }

    send_private(
        context,
        format!(
            "✅ Removed {} participant(s) and deleted {} registration message(s).",
            removed.len(),
            deleted
        ),
    )
    .await
}

/// Open or close registrations.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn registrations(
    context: Context<'_>,
    #[description = "Action"] action: RegistrationsAction,
) -> Result<(), anyhow::Error> {
    let _ = context.defer_ephemeral().await;
    wrap_fallible(&context, set_registrations(&context, action).await).await
}

async fn set_registrations(context: &Context<'_>, action: RegistrationsAction) -> anyhow::Result<()> {
    let closed = matches!(action, RegistrationsAction::Close);
    configure(context, ConfigChange::SetRegistrationsClosed(closed)).await?;
    if !closed {
        return send_private(context, "✅ Registrations opened.").await;
    }

    let document = snapshot(context).await?;
    let edited = close_signup_messages(context, &document.signup_message_ids).await;
    send_private(
        context,
        format!(
            "✅ Registrations closed!\n{} of {} signup message(s) updated.",
            edited,
            document.signup_message_ids.len()
        ),
    )
    .await
}

/// Mark signup messages as closed, searching every text channel of the guild.
async fn close_signup_messages(context: &Context<'_>, message_ids: &[u64]) -> usize {
    let Some(guild_id) = context.guild_id() else {
        return 0;
    };
    let channels = match guild_id.channels(context.http()).await {
        Ok(channels) => channels,
        Err(why) => {
            log::warn!("Failed to list guild channels: {}", why);
            return 0;
        }
    };

    let mut edited = 0;
    for message_id in message_ids.iter().filter(|id| **id != 0) {
        for channel in channels
            .values()
            .filter(|c| c.kind == serenity::ChannelType::Text)
        {
            let result = channel
                .id
                .edit_message(
                    context,
                    serenity::MessageId::new(*message_id),
                    serenity::EditMessage::new()
                        .content(CLOSED_SIGNUP_TEXT)
                        .components(vec![]),
                )
                .await;
            if result.is_ok() {
                edited += 1;
                break;
            }
        }
    }
    edited
}

/// Manage the blacklist.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn blacklist(
    context: Context<'_>,
    #[description = "Action"] action: BlacklistAction,
    #[description = "User to ban or unban"] user: Option<serenity::User>,
    #[description = "Reason for the ban"] reason: Option<String>,
) -> Result<(), anyhow::Error> {
    wrap_fallible(&context, manage_blacklist(&context, action, user, reason).await).await
}

async fn manage_blacklist(
    context: &Context<'_>,
    action: BlacklistAction,
    user: Option<serenity::User>,
    reason: Option<String>,
) -> anyhow::Result<()> {
    if let BlacklistAction::List = action {
        let document = snapshot(context).await?;
        if document.blacklist.is_empty() {
            return send_private(context, "📋 The blacklist is empty.").await;
        }
        let mut lines = vec!["🚫 **Blacklist**".to_owned()];
        lines.extend(document.blacklist.iter().map(|(id, entry)| {
            format!(
                "• <@{}>: {} (banned by <@{}>)",
                id, entry.reason, entry.banned_by
            )
        }));
        return send_private_lines(context, &lines).await;
    }

    let user = user.ok_or_else(|| RaffleError::Validation("A user is required".to_owned()))?;
    let user_id = user.id.get();

    match action {
        BlacklistAction::Ban => {
            let removed = send_message!(
                context.data().directory.roster_actor,
                RosterRequest,
                Ban,
                user_id,
                reason.unwrap_or_default(),
                context.author().id.get()
            )?;
            let document = snapshot(context).await?;
            if let (Some(participant), Some(channel_id)) = (removed, document.registration_channel) {
                if let Some(message_id) = participant.message_id {
                    delete_message_quietly(context, channel_id, message_id).await;
                }
            }
            let reason = document
                .blacklist
                .get(&user_id)
                .map(|entry| entry.reason.clone())
                .unwrap_or_default();
            log::info!("{} banned by {}: {}", user.name, context.author().name, reason);
            send_private(
                context,
                format!("✅ <@{}> was blacklisted.\n**Reason**: {}", user_id, reason),
            )
            .await
        }
        _ => {
            let removed = send_message!(
                context.data().directory.roster_actor,
                RosterRequest,
                Unban,
                user_id
            )?;
            if removed {
                log::info!("{} unbanned by {}", user.name, context.author().name);
                send_private(context, format!("✅ <@{}> was removed from the blacklist.", user_id)).await
            } else {
                send_private(context, format!("❌ <@{}> is not blacklisted.", user_id)).await
            }
        }
    }
}

/// Lock a channel so only admins and moderators can talk.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn chat(
    context: Context<'_>,
    #[description = "Action"] action: ToggleAction,
    #[description = "Channel to lock"]
    #[channel_types("Text")]
    channel: Option<serenity::GuildChannel>,
) -> Result<(), anyhow::Error> {
    wrap_fallible(&context, manage_chat_lock(&context, action, channel).await).await
}

async fn manage_chat_lock(
    context: &Context<'_>,
    action: ToggleAction,
    channel: Option<serenity::GuildChannel>,
) -> anyhow::Result<()> {
    match action {
        ToggleAction::Status => {
            let lock = snapshot(context).await?.chat_lock;
            let channel = lock
                .channel_id
                .map(|id| format!("<#{}>", id))
                .unwrap_or_else(|| "None".to_owned());
            send_private(
                context,
                format!(
                    "**Status**: {}\n**Channel**: {}",
                    if lock.enabled { "🔒 Locked" } else { "🔓 Unlocked" },
                    channel
                ),
            )
            .await
        }
        ToggleAction::On => {
            let channel = channel
                .ok_or_else(|| RaffleError::Validation("A channel is required".to_owned()))?;
            configure(context, ConfigChange::SetChatLock(true, Some(channel.id.get()))).await?;
            send_private(
                context,
                format!(
                    "🔒 Chat locked in <#{}>! Only administrators and moderators can send messages.",
                    channel.id
                ),
            )
            .await
        }
        ToggleAction::Off => {
            configure(context, ConfigChange::SetChatLock(false, None)).await?;
            send_private(context, "🔓 Chat unlocked.").await
        }
    }
}

/// Manage who can use the admin commands without the Administrator permission.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn moderator(
    context: Context<'_>,
    #[description = "Action"] action: ModeratorAction,
    #[description = "User to add or remove"] user: Option<serenity::User>,
) -> Result<(), anyhow::Error> {
    wrap_fallible(&context, manage_moderators(&context, action, user).await).await
}

async fn manage_moderators(
    context: &Context<'_>,
    action: ModeratorAction,
    user: Option<serenity::User>,
) -> anyhow::Result<()> {
    if let ModeratorAction::List = action {
        let document = snapshot(context).await?;
        if document.moderators.is_empty() {
            return send_private(context, "📋 No moderators configured.").await;
        }
        let mut lines = vec!["👮 **Moderators**".to_owned()];
        lines.extend(document.moderators.iter().map(|id| format!("• <@{}>", id)));
        return send_private_lines(context, &lines).await;
    }

    let user = user.ok_or_else(|| RaffleError::Validation("A user is required".to_owned()))?;
    let user_id = user.id.get();
    let reply = match action {
        ModeratorAction::Add => {
            if configure(context, ConfigChange::AddModerator(user_id)).await? {
                format!("✅ <@{}> is now a moderator.", user_id)
            } else {
                format!("❌ <@{}> is already a moderator.", user_id)
            }
        }
        _ => {
            if configure(context, ConfigChange::RemoveModerator(user_id)).await? {
                format!("✅ <@{}> is no longer a moderator.", user_id)
            } else {
                format!("❌ <@{}> is not a moderator.", user_id)
            }
        }
    };
    send_private(context, reply).await
}

/// Grant extra tag tickets to a participant. Zero removes them.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn manual_tag(
    context: Context<'_>,
    #[description = "Participant"] user: serenity::User,
    #[description = "Tag tickets (default 1, 0 removes)"]
    #[max = 1000]
    quantity: Option<u32>,
) -> Result<(), anyhow::Error> {
    let quantity = quantity.unwrap_or(1);
    wrap_fallible(
        &context,
        send_message!(
            context.data().directory.roster_actor,
            RosterRequest,
            SetManualTag,
            user.id.get(),
            quantity
        ),
    )
    .await?;

    log::info!(
        "Manual tag of {} set for {} by {}",
        quantity,
        user.name,
        context.author().name
    );
    let reply = if quantity == 0 {
        format!("✅ Manual tag removed from <@{}>.", user.id)
    } else {
        format!(
            "✅ Manual tag granted!\n**User**: <@{}>\n**Tag tickets**: {}",
            user.id, quantity
        )
    };
    send_private(&context, reply).await
}

/// Remove a participant from the raffle.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn unregister(
    context: Context<'_>,
    #[description = "Participant name"]
    #[autocomplete = "autocomplete_participant_name"]
    participant: String,
) -> Result<(), anyhow::Error> {
    wrap_fallible(&context, unregister_participant(&context, participant).await).await
}

async fn unregister_participant(context: &Context<'_>, name: String) -> anyhow::Result<()> {
    let document = snapshot(context).await?;
    let user_id = find_participant_by_name(&document, &name)
        .ok_or_else(|| RaffleError::Validation(format!("No participant named '{}'", name.trim())))?;

    let removed = send_message!(
        context.data().directory.roster_actor,
        RosterRequest,
        Unregister,
        user_id
    )?;
    let Some(participant) = removed else {
        return Err(RaffleError::NotRegistered(user_id).into());
    };

    if let (Some(channel_id), Some(message_id)) =
        (document.registration_channel, participant.message_id)
    {
        delete_message_quietly(context, channel_id, message_id).await;
    }
    log::info!(
        "{} unregistered by {}",
        participant.full_name(),
        context.author().name
    );
    send_private(
        context,
        format!("✅ {} was removed from the raffle.", participant.full_name()),
    )
    .await
}

/// List the available commands.
#[poise::command(slash_command, guild_only)]
async fn help(context: Context<'_>) -> Result<(), anyhow::Error> {
    let show_admin = wrap_fallible(&context, has_admin_access(&context).await).await?;

    let mut embed = serenity::CreateEmbed::new()
        .title("📋 Raffle bot commands")
        .description("Available commands")
        .colour(serenity::Colour::new(HELP_COLOUR));
    for (name, value) in help_sections(show_admin) {
        embed = embed.field(name, value, false);
    }

    context
        .send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Post an announcement in a channel.
#[poise::command(slash_command, guild_only, check = "is_admin_or_moderator")]
async fn announce(
    context: Context<'_>,
    #[description = "Channel to post in"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
    #[description = "Announcement text"]
    #[max_length = 2000]
    message: String,
    #[description = "Send as an embed"] embed: Option<bool>,
    #[description = "Embed title"]
    #[max_length = 256]
    title: Option<String>,
    #[description = "Embed colour, a name or a hex code"] colour: Option<String>,
    #[description = "Image or video to attach"] attachment: Option<serenity::Attachment>,
) -> Result<(), anyhow::Error> {
    let _ = context.defer_ephemeral().await;
    let announcement = Announcement {
        message,
        embed: embed.unwrap_or(false),
        title,
        colour,
    };
    wrap_fallible(
        &context,
        post_announcement(&context, channel, announcement, attachment).await,
    )
    .await
}

struct Announcement {
    message: String,
    embed: bool,
    title: Option<String>,
    colour: Option<String>,
}

async fn post_announcement(
    context: &Context<'_>,
    channel: serenity::GuildChannel,
    announcement: Announcement,
    attachment: Option<serenity::Attachment>,
) -> anyhow::Result<()> {
    let mut builder = serenity::CreateMessage::new();
    if announcement.embed {
        let colour = match announcement.colour.as_deref() {
            Some(colour) => parse_colour(colour)?,
            None => ANNOUNCEMENT_COLOUR,
        };
        let mut embed = serenity::CreateEmbed::new()
            .title(
                announcement
                    .title
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| "Announcement".to_owned()),
            )
            .description(announcement.message)
            .colour(serenity::Colour::new(colour));
        if let Some(attachment) = attachment.as_ref().filter(|a| is_image(a)) {
            embed = embed.image(format!("attachment://{}", attachment.filename));
        }
        builder = builder.embed(embed);
    } else {
        builder = builder.content(announcement.message);
    }

    if let Some(attachment) = attachment {
        let bytes = attachment.download().await?;
        builder = builder.add_file(serenity::CreateAttachment::bytes(bytes, attachment.filename));
    }

    channel.id.send_message(context.http(), builder).await?;
    log::info!(
        "Announcement posted in {} by {}",
        channel.name,
        context.author().name
    );
    send_private(context, format!("✅ Announcement posted in <#{}>!", channel.id)).await
}

async fn on_error(error: poise::FrameworkError<'_, Data, anyhow::Error>) {
    match error {
        // Already reported to the user by wrap_fallible
        poise::FrameworkError::Command { error, ctx, .. } => {
            log::debug!("Command '{}' returned: {}", ctx.command().name, error);
        }
        other => {
            if let Err(why) = poise::builtins::on_error(other).await {
                log::error!("Failed to handle framework error: {}", why);
            }
        }
    }
}

pub(super) fn define_command_options(options: &mut poise::FrameworkOptions<Data, anyhow::Error>) {
    options.commands = vec![
        help(),
        register(),
        status(),
        setup(),
        hashtag(),
        hashtag_lock(),
        tag(),
        bonus_role(),
        remove_bonus_role(),
        list(),
        export(),
        recalculate(),
        stats(),
        clear(),
        registrations(),
        blacklist(),
        chat(),
        moderator(),
        manual_tag(),
        unregister(),
        announce(),
    ];
    options.on_error = |error| Box::pin(on_error(error));
}
