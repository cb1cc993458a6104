use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    core::tickets::TicketBreakdown,
    error::RaffleError,
    util::{deserialize_id_list, serialize_ids_as_strings},
};

/// A registered raffle participant, keyed by platform user id in [`Document::participants`].
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub first_name: String,
    pub last_name: String,

    #[serde(default)]
    pub tickets: TicketBreakdown,

    /// The registration message posted in the registration channel
    #[serde(default)]
    pub message_id: Option<u64>,

    #[serde(rename = "timestamp", default)]
    pub created_at: Option<NaiveDateTime>,
}

impl Participant {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_owned()
    }
}

/// Bonus tickets granted for holding a role, keyed by role id in [`Document::bonus_roles`].
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct BonusRoleRule {
    pub quantity: u32,
    #[serde(default)]
    pub abbreviation: String,
}

/// The server tag that grants automatic bonus tickets.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub enabled: bool,
    pub text: Option<String>,
    pub quantity: u32,
}

impl Default for TagConfig {
    fn default() -> Self {
        TagConfig {
            enabled: false,
            text: None,
            quantity: 1,
        }
    }
}

impl TagConfig {
    /// The trimmed tag text, if tag detection is enabled and the text is usable.
    pub fn active_text(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HashtagConfig {
    pub value: Option<String>,
    pub locked: bool,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChatLock {
    pub enabled: bool,
    pub channel_id: Option<u64>,
}

impl ChatLock {
    /// Returns the locked channel, if the lock is active.
    pub fn locked_channel(&self) -> Option<u64> {
        self.channel_id.filter(|_| self.enabled)
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    #[serde(default)]
    pub reason: String,
    pub banned_by: u64,
    #[serde(default)]
    pub timestamp: Option<NaiveDateTime>,
}

/// The whole persisted bot state.
///
/// Field names follow the document format written by every previous
/// deployment, so existing `database.json` files keep loading.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Document {
    pub participants: BTreeMap<u64, Participant>,
    pub bonus_roles: BTreeMap<u64, BonusRoleRule>,
    pub hashtag: HashtagConfig,
    pub tag: TagConfig,

    #[serde(rename = "inscricao_channel")]
    pub registration_channel: Option<u64>,

    /// Messages carrying the signup prompt
    #[serde(rename = "button_message_id", deserialize_with = "deserialize_id_list")]
    pub signup_message_ids: Vec<u64>,

    #[serde(rename = "inscricoes_closed")]
    pub registrations_closed: bool,

    pub blacklist: BTreeMap<u64, BlacklistEntry>,
    pub chat_lock: ChatLock,

    #[serde(
        deserialize_with = "deserialize_id_list",
        serialize_with = "serialize_ids_as_strings"
    )]
    pub moderators: Vec<u64>,

    /// Manual tags hoisted out of participants by a bulk clear
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub manual_tags: BTreeMap<u64, u32>,
}

impl Document {
    /// Parse a stored document, upgrading older shapes.
    pub fn from_json(text: &str) -> Result<Self, RaffleError> {
        let mut document: Document = serde_json::from_str(text)?;
        document.migrate();
        Ok(document)
    }

    /// Serialize with the 4-space indentation used by the on-disk format.
    pub fn to_json(&self) -> Result<String, RaffleError> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        String::from_utf8(out).map_err(|e| RaffleError::Persistence(e.to_string()))
    }

    /// Normalize values that older deployments stored in more than one form.
    fn migrate(&mut self) {
        for participant in self.participants.values_mut() {
            participant.tickets.normalize();
        }
        self.manual_tags.retain(|_, quantity| *quantity > 0);
        if self.tag.quantity == 0 {
            self.tag.quantity = 1;
        }
    }

    pub fn set_hashtag(&mut self, hashtag: &str) -> Result<(), RaffleError> {
        if self.hashtag.locked {
            return Err(RaffleError::HashtagLocked);
        }
        let hashtag = hashtag.trim();
        if hashtag.is_empty() {
            return Err(RaffleError::Validation("The hashtag cannot be empty".to_owned()));
        }
        self.hashtag.value = Some(hashtag.to_owned());
        Ok(())
    }

    pub fn lock_hashtag(&mut self, locked: bool) {
        self.hashtag.locked = locked;
    }

    /// Enable or disable tag detection. The text is kept when none is provided.
    pub fn configure_tag(
        &mut self,
        enabled: bool,
        text: Option<String>,
        quantity: u32,
    ) -> Result<(), RaffleError> {
        if enabled && quantity == 0 {
            return Err(RaffleError::InvalidQuantity);
        }
        let text = text
            .map(|text| text.trim().to_owned())
            .or_else(|| self.tag.text.clone());
        if enabled && text.as_deref().map_or(true, str::is_empty) {
            return Err(RaffleError::Validation("A tag text is required".to_owned()));
        }
        self.tag.text = text;
        self.tag.enabled = enabled;
        self.tag.quantity = quantity.max(1);
        Ok(())
    }

    pub fn add_bonus_role(
        &mut self,
        role_id: u64,
        quantity: u32,
        abbreviation: &str,
    ) -> Result<(), RaffleError> {
        if quantity == 0 {
            return Err(RaffleError::InvalidQuantity);
        }
        self.bonus_roles.insert(
            role_id,
            BonusRoleRule {
                quantity,
                abbreviation: abbreviation.trim().to_owned(),
            },
        );
        Ok(())
    }

    pub fn remove_bonus_role(&mut self, role_id: u64) -> bool {
        self.bonus_roles.remove(&role_id).is_some()
    }

    pub fn set_registration_channel(&mut self, channel_id: Option<u64>) {
        self.registration_channel = channel_id;
    }

    pub fn add_signup_message(&mut self, message_id: u64) {
        if !self.signup_message_ids.contains(&message_id) {
            self.signup_message_ids.push(message_id);
        }
    }

    pub fn set_registrations_closed(&mut self, closed: bool) {
        self.registrations_closed = closed;
    }

    /// Update the chat lock. The channel is kept when none is provided.
    pub fn set_chat_lock(&mut self, enabled: bool, channel_id: Option<u64>) {
        self.chat_lock.enabled = enabled;
        if channel_id.is_some() {
            self.chat_lock.channel_id = channel_id;
        }
    }

    pub fn add_moderator(&mut self, user_id: u64) -> bool {
        if self.moderators.contains(&user_id) {
            return false;
        }
        self.moderators.push(user_id);
        true
    }

    pub fn remove_moderator(&mut self, user_id: u64) -> bool {
        let before = self.moderators.len();
        self.moderators.retain(|id| *id != user_id);
        before != self.moderators.len()
    }

    pub fn is_moderator(&self, user_id: u64) -> bool {
        self.moderators.contains(&user_id)
    }

    pub fn is_blacklisted(&self, user_id: u64) -> bool {
        self.blacklist.contains_key(&user_id)
    }
}
