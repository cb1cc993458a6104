use std::collections::{BTreeMap, HashMap};

use chrono::Local;
use serde::Serialize;

use crate::{
    core::{
        document::{BlacklistEntry, Document, Participant},
        tickets::{calculate_tickets, MemberProfile, TicketBreakdown},
    },
    error::RaffleError,
};

/// Letters accepted in names besides ASCII ones.
const ACCENTED_LETTERS: &str = "áàâãäéèêëíìîïóòôõöúùûüçÇÁÀÂÃÄÉÈÊËÍÌÎÏÓÒÔÕÖÚÙÛÜ";

/// Check the names submitted on registration.
pub fn validate_full_name(first_name: &str, last_name: &str) -> Result<(), RaffleError> {
    let first = first_name.trim();
    let last = last_name.trim();

    if first.is_empty() || last.is_empty() {
        return Err(RaffleError::Validation(
            "First and last name are required".to_owned(),
        ));
    }
    if first.chars().count() < 2 || last.chars().count() < 2 {
        return Err(RaffleError::Validation(
            "First and last name must have at least 2 characters".to_owned(),
        ));
    }
    if first.chars().count() + last.chars().count() > 100 {
        return Err(RaffleError::Validation("Name is too long".to_owned()));
    }

    let chars = || first.chars().chain(last.chars());
    if chars().any(|c| c.is_numeric()) {
        return Err(RaffleError::Validation(
            "Names cannot contain numbers".to_owned(),
        ));
    }
    if let Some(c) = chars().find(|c| {
        !(c.is_ascii_alphabetic()
            || ACCENTED_LETTERS.contains(*c)
            || c.is_whitespace()
            || matches!(c, '-' | '\'' | '.'))
    }) {
        return Err(RaffleError::Validation(format!(
            "Invalid character '{}' in name",
            c
        )));
    }

    Ok(())
}

/// Which data a bulk clear removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    /// Remove all participants, keep configuration
    ParticipantsOnly,
    /// Reset the whole document, keeping only manual tags
    Full,
}

/// Outcome of a batch ticket recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecalculationReport {
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleStatistics {
    pub count: usize,
    pub total_tickets: u32,
    pub abbreviation: String,
}

/// Aggregate numbers over the current roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct Statistics {
    pub total_participants: usize,
    pub total_tickets: u32,
    pub tickets_by_role: BTreeMap<u64, RoleStatistics>,
    pub participants_with_tag: usize,
    pub blacklist_count: usize,
}

impl Document {
    pub fn lookup(&self, user_id: u64) -> Option<&Participant> {
        self.participants.get(&user_id)
    }

    pub fn is_registered(&self, user_id: u64) -> bool {
        self.participants.contains_key(&user_id)
    }

    /// All participants with their user ids, ordered by id.
    pub fn participants(&self) -> impl Iterator<Item = (u64, &Participant)> {
        self.participants.iter().map(|(id, p)| (*id, p))
    }

    /// Whether a full name is used by anyone other than `exclude`, ignoring case.
    pub fn is_name_taken(&self, first_name: &str, last_name: &str, exclude: Option<u64>) -> bool {
        let first = first_name.trim().to_lowercase();
        let last = last_name.trim().to_lowercase();
        self.participants.iter().any(|(id, p)| {
            Some(*id) != exclude
                && p.first_name.trim().to_lowercase() == first
                && p.last_name.trim().to_lowercase() == last
        })
    }

    /// Checks that run before anything is posted for a new registration.
    pub fn check_can_register(&self, user_id: u64, hashtag: &str) -> Result<(), RaffleError> {
        if self.registrations_closed {
            return Err(RaffleError::RegistrationsClosed);
        }
        if self.is_blacklisted(user_id) {
            return Err(RaffleError::Blacklisted(user_id));
        }
        if self.is_registered(user_id) {
            return Err(RaffleError::AlreadyRegistered(user_id));
        }

        let required = self
            .hashtag
            .value
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or(RaffleError::HashtagNotConfigured)?;
        if hashtag.trim().to_lowercase() != required.to_lowercase() {
            return Err(RaffleError::WrongHashtag(required.to_owned()));
        }

        if self.registration_channel.is_none() {
            return Err(RaffleError::ChannelNotConfigured);
        }
        Ok(())
    }

    /// Add a participant.
    ///
    /// A manual tag hoisted by an earlier bulk clear is reapplied when the
    /// supplied tickets carry none.
    pub fn register(
        &mut self,
        user_id: u64,
        first_name: &str,
        last_name: &str,
        mut tickets: TicketBreakdown,
        message_id: Option<u64>,
    ) -> Result<&Participant, RaffleError> {
        validate_full_name(first_name, last_name)?;
        if self.is_blacklisted(user_id) {
            return Err(RaffleError::Blacklisted(user_id));
        }
        if self.is_registered(user_id) {
            return Err(RaffleError::AlreadyRegistered(user_id));
        }
        if self.is_name_taken(first_name, last_name, None) {
            return Err(RaffleError::DuplicateName(format!(
                "{} {}",
                first_name.trim(),
                last_name.trim()
            )));
        }

        tickets.normalize();
        if tickets.manual_tag.is_none() {
            if let Some(quantity) = self.manual_tags.remove(&user_id) {
                log::info!("Restoring manual tag of {} for user {}", quantity, user_id);
                tickets.set_manual_tag(quantity);
            }
        } else {
            self.manual_tags.remove(&user_id);
        }

        let participant = Participant {
            first_name: first_name.trim().to_owned(),
            last_name: last_name.trim().to_owned(),
            tickets,
            message_id,
            created_at: Some(Local::now().naive_local()),
        };
        Ok(self.participants.entry(user_id).or_insert(participant))
    }

    /// Remove a participant, returning the removed entry if there was one.
    pub fn unregister(&mut self, user_id: u64) -> Option<Participant> {
        self.participants.remove(&user_id)
    }

    /// Recompute every participant's tickets from fresh member profiles.
    ///
    /// Participants without a profile keep their tickets and are counted as failed.
    pub fn recalculate_all(&mut self, profiles: &HashMap<u64, MemberProfile>) -> RecalculationReport {
        let mut report = RecalculationReport::default();
        for (user_id, participant) in self.participants.iter_mut() {
            match profiles.get(user_id) {
                Some(profile) => {
                    participant.tickets = calculate_tickets(
                        profile,
                        &self.bonus_roles,
                        &self.tag,
                        participant.tickets.manual_tag,
                    );
                    report.updated += 1;
                }
                None => {
                    log::warn!(
                        "Could not recalculate tickets for {} ({}), member not found",
                        participant.full_name(),
                        user_id
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Move manual tags held by participants into the side table.
    fn hoist_manual_tags(&mut self) {
        for (user_id, participant) in &self.participants {
            if let Some(quantity) = participant.tickets.manual_tag.filter(|q| *q > 0) {
                self.manual_tags.insert(*user_id, quantity);
            }
        }
    }

    /// Clear participants or the whole document, returning the removed participants.
    ///
    /// Manual tags survive both modes and are reapplied on re-registration.
    pub fn bulk_clear(&mut self, mode: ClearMode) -> BTreeMap<u64, Participant> {
        self.hoist_manual_tags();
        let removed = std::mem::take(&mut self.participants);

        if mode == ClearMode::Full {
            let manual_tags = std::mem::take(&mut self.manual_tags);
            *self = Document {
                manual_tags,
                ..Default::default()
            };
        }
        removed
    }

    /// Grant a manual tag to a registered participant. A quantity of zero removes it.
    pub fn grant_manual_tag(&mut self, user_id: u64, quantity: u32) -> Result<(), RaffleError> {
        let participant = self
            .participants
            .get_mut(&user_id)
            .ok_or(RaffleError::NotRegistered(user_id))?;
        participant.tickets.set_manual_tag(quantity);
        if quantity == 0 {
            self.manual_tags.remove(&user_id);
        }
        Ok(())
    }

    pub fn revoke_manual_tag(&mut self, user_id: u64) -> Result<(), RaffleError> {
        self.grant_manual_tag(user_id, 0)
    }

    /// Blacklist a user, removing any registration they hold.
    pub fn ban(&mut self, user_id: u64, reason: &str, banned_by: u64) -> Option<Participant> {
        let removed = self.unregister(user_id);
        let reason = reason.trim();
        self.blacklist.insert(
            user_id,
            BlacklistEntry {
                reason: if reason.is_empty() {
                    "Not specified".to_owned()
                } else {
                    reason.to_owned()
                },
                banned_by,
                timestamp: Some(Local::now().naive_local()),
            },
        );
        removed
    }

    pub fn unban(&mut self, user_id: u64) -> bool {
        self.blacklist.remove(&user_id).is_some()
    }

    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics {
            total_participants: self.participants.len(),
            blacklist_count: self.blacklist.len(),
            ..Default::default()
        };

        for participant in self.participants.values() {
            let tickets = &participant.tickets;
            stats.total_tickets = stats.total_tickets.saturating_add(tickets.total());

            for (role_id, role) in &tickets.roles {
                let entry = stats
                    .tickets_by_role
                    .entry(*role_id)
                    .or_insert_with(|| RoleStatistics {
                        count: 0,
                        total_tickets: 0,
                        abbreviation: role.abbreviation.clone(),
                    });
                entry.count += 1;
                entry.total_tickets = entry.total_tickets.saturating_add(role.quantity);
            }

            if tickets.has_tag() {
                stats.participants_with_tag += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{document::TagConfig, tickets::RoleRef};

    const ANA: u64 = 1;
    const BRUNO: u64 = 2;
    const CARLA: u64 = 3;
    const VIP_ROLE: u64 = 500;

    fn profile(roles: &[u64]) -> MemberProfile {
        MemberProfile {
            roles: roles
                .iter()
                .map(|id| RoleRef {
                    id: *id,
                    name: format!("role{}", id),
                })
                .collect(),
            username: "someone".to_owned(),
            ..Default::default()
        }
    }

    fn open_document() -> Document {
        let mut document = Document::default();
        document.set_hashtag("#Raffle").unwrap();
        document.set_registration_channel(Some(10));
        document
    }

    #[test]
    fn test_validate_names() {
        assert!(validate_full_name("Ana", "Silva").is_ok());
        assert!(validate_full_name("João", "D'Ávila-Souza").is_ok());
        assert!(validate_full_name("", "Silva").is_err());
        assert!(validate_full_name("A", "Silva").is_err());
        assert!(validate_full_name("Ana2", "Silva").is_err());
        assert!(validate_full_name("Ana", "Silva!").is_err());
        assert!(validate_full_name(&"a".repeat(60), &"b".repeat(41)).is_err());
    }

    #[test]
    fn test_register_and_duplicates() {
        let mut document = open_document();
        document
            .register(ANA, "Ana", "Silva", TicketBreakdown::default(), Some(77))
            .unwrap();

        assert!(matches!(
            document.register(BRUNO, "ana", "SILVA", TicketBreakdown::default(), None),
            Err(RaffleError::DuplicateName(_))
        ));
        assert!(matches!(
            document.register(ANA, "Ana", "Souza", TicketBreakdown::default(), None),
            Err(RaffleError::AlreadyRegistered(ANA))
        ));
        assert!(document.is_name_taken("ANA", "silva", None));
        assert!(!document.is_name_taken("ANA", "silva", Some(ANA)));
        assert_eq!(document.participants().count(), 1);
        assert_eq!(document.lookup(ANA).unwrap().message_id, Some(77));
    }

    #[test]
    fn test_preflight() {
        let mut document = Document::default();
        assert!(matches!(
            document.check_can_register(ANA, "#raffle"),
            Err(RaffleError::HashtagNotConfigured)
        ));

        document.set_hashtag("#Raffle").unwrap();
        assert!(matches!(
            document.check_can_register(ANA, "#raffle"),
            Err(RaffleError::ChannelNotConfigured)
        ));

        document.set_registration_channel(Some(10));
        assert!(document.check_can_register(ANA, " #RAFFLE ").is_ok());
        assert!(matches!(
            document.check_can_register(ANA, "#other"),
            Err(RaffleError::WrongHashtag(_))
        ));

        document.set_registrations_closed(true);
        assert!(matches!(
            document.check_can_register(ANA, "#raffle"),
            Err(RaffleError::RegistrationsClosed)
        ));
    }

    #[test]
    fn test_blacklist() {
        let mut document = open_document();
        document
            .register(ANA, "Ana", "Silva", TicketBreakdown::default(), Some(5))
            .unwrap();

        let removed = document.ban(ANA, "", 99).unwrap();
        assert_eq!(removed.message_id, Some(5));
        assert!(!document.is_registered(ANA));
        assert_eq!(document.blacklist[&ANA].reason, "Not specified");

        assert!(matches!(
            document.register(ANA, "Ana", "Silva", TicketBreakdown::default(), None),
            Err(RaffleError::Blacklisted(ANA))
        ));
        assert!(matches!(
            document.check_can_register(ANA, "#raffle"),
            Err(RaffleError::Blacklisted(ANA))
        ));

        assert!(document.unban(ANA));
        assert!(!document.unban(ANA));
        assert!(document
            .register(ANA, "Ana", "Silva", TicketBreakdown::default(), None)
            .is_ok());
    }

    #[test]
    fn test_recalculate_with_bonus_role() {
        let mut document = open_document();
        document
            .register(ANA, "Ana", "Silva", TicketBreakdown::default(), None)
            .unwrap();
        document
            .register(BRUNO, "Bruno", "Lima", TicketBreakdown::default(), None)
            .unwrap();
        document.add_bonus_role(VIP_ROLE, 3, "VIP").unwrap();
        document.grant_manual_tag(BRUNO, 2).unwrap();

        let profiles = HashMap::from([(ANA, profile(&[VIP_ROLE]))]);
        let report = document.recalculate_all(&profiles);

        assert_eq!(report, RecalculationReport { updated: 1, failed: 1 });
        assert_eq!(document.lookup(ANA).unwrap().tickets.total(), 4);
        assert_eq!(document.lookup(BRUNO).unwrap().tickets.total(), 3);

        let profiles = HashMap::from([(ANA, profile(&[])), (BRUNO, profile(&[VIP_ROLE]))]);
        let report = document.recalculate_all(&profiles);
        assert_eq!(report, RecalculationReport { updated: 2, failed: 0 });
        assert_eq!(document.lookup(ANA).unwrap().tickets.total(), 1);
        assert_eq!(document.lookup(BRUNO).unwrap().tickets.manual_tag, Some(2));
        assert_eq!(document.lookup(BRUNO).unwrap().tickets.total(), 1 + 3 + 2);
    }

    #[test]
    fn test_manual_tag_grant_and_removal() {
        let mut document = open_document();
        assert!(matches!(
            document.grant_manual_tag(CARLA, 5),
            Err(RaffleError::NotRegistered(CARLA))
        ));

        document
            .register(CARLA, "Carla", "Dias", TicketBreakdown::default(), None)
            .unwrap();
        document.grant_manual_tag(CARLA, 5).unwrap();
        assert_eq!(document.lookup(CARLA).unwrap().tickets.total(), 6);

        document.grant_manual_tag(CARLA, 0).unwrap();
        let tickets = &document.lookup(CARLA).unwrap().tickets;
        assert_eq!(tickets.manual_tag, None);
        assert_eq!(tickets.total(), 1);
        assert!(!serde_json::to_string(tickets).unwrap().contains("manual_tag"));

        document.grant_manual_tag(CARLA, 2).unwrap();
        document.revoke_manual_tag(CARLA).unwrap();
        assert_eq!(document.lookup(CARLA).unwrap().tickets.manual_tag, None);
    }

    #[test]
    fn test_clear_participants_keeps_manual_tags() {
        let mut document = open_document();
        document
            .register(CARLA, "Carla", "Dias", TicketBreakdown::default(), Some(9))
            .unwrap();
        document.grant_manual_tag(CARLA, 5).unwrap();
        document.add_bonus_role(VIP_ROLE, 3, "VIP").unwrap();

        let removed = document.bulk_clear(ClearMode::ParticipantsOnly);
        assert_eq!(removed[&CARLA].message_id, Some(9));
        assert!(document.participants.is_empty());
        assert_eq!(document.manual_tags[&CARLA], 5);
        assert!(document.bonus_roles.contains_key(&VIP_ROLE));

        document
            .register(CARLA, "Carla", "Dias", TicketBreakdown::default(), None)
            .unwrap();
        assert_eq!(document.lookup(CARLA).unwrap().tickets.manual_tag, Some(5));
        assert!(document.manual_tags.is_empty());
    }

    #[test]
    fn test_full_clear_keeps_manual_tags() {
        let mut document = open_document();
        document
            .register(CARLA, "Carla", "Dias", TicketBreakdown::default(), None)
            .unwrap();
        document.grant_manual_tag(CARLA, 5).unwrap();
        document.add_moderator(42);
        document.ban(BRUNO, "spam", 42);

        document.bulk_clear(ClearMode::Full);
        assert_eq!(
            document,
            Document {
                manual_tags: BTreeMap::from([(CARLA, 5)]),
                ..Default::default()
            }
        );

        let mut document = Document {
            hashtag: open_document().hashtag,
            registration_channel: Some(10),
            ..document
        };
        document
            .register(CARLA, "Carla", "Dias", TicketBreakdown::default(), None)
            .unwrap();
        assert_eq!(document.lookup(CARLA).unwrap().tickets.total(), 6);
    }

    #[test]
    fn test_statistics() {
        let mut document = open_document();
        document.add_bonus_role(VIP_ROLE, 3, "VIP").unwrap();
        let tag = TagConfig {
            enabled: true,
            text: Some("team".to_owned()),
            quantity: 1,
        };

        let mut tagged = profile(&[VIP_ROLE]);
        tagged.display_name = Some("TEAM Ana".to_owned());
        let tickets = calculate_tickets(&tagged, &document.bonus_roles, &tag, None);
        document.register(ANA, "Ana", "Silva", tickets, None).unwrap();

        let tickets = calculate_tickets(&profile(&[VIP_ROLE]), &document.bonus_roles, &tag, None);
        document.register(BRUNO, "Bruno", "Lima", tickets, None).unwrap();
        document.grant_manual_tag(BRUNO, 2).unwrap();

        document
            .register(CARLA, "Carla", "Dias", TicketBreakdown::default(), None)
            .unwrap();
        document.ban(99, "bot", 1);

        let stats = document.statistics();
        assert_eq!(stats.total_participants, 3);
        assert_eq!(stats.total_tickets, (1 + 3 + 1) + (1 + 3 + 2) + 1);
        assert_eq!(stats.participants_with_tag, 2);
        assert_eq!(stats.blacklist_count, 1);
        assert_eq!(
            stats.tickets_by_role[&VIP_ROLE],
            RoleStatistics {
                count: 2,
                total_tickets: 6,
                abbreviation: "VIP".to_owned()
            }
        );
    }

    #[test]
    fn test_statistics_saturate() {
        let mut document = open_document();
        document.add_bonus_role(VIP_ROLE, u32::MAX, "VIP").unwrap();
        for (id, first) in [(ANA, "Ana"), (BRUNO, "Bruno")] {
            let tickets = calculate_tickets(
                &profile(&[VIP_ROLE]),
                &document.bonus_roles,
                &TagConfig::default(),
                None,
            );
            document.register(id, first, "Silva", tickets, None).unwrap();
            document.grant_manual_tag(id, u32::MAX / 2).unwrap();
        }

        let stats = document.statistics();
        assert_eq!(stats.total_participants, 2);
        assert_eq!(stats.total_tickets, u32::MAX);
        assert_eq!(stats.tickets_by_role[&VIP_ROLE].total_tickets, u32::MAX);
    }
}
