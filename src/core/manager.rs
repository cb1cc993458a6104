use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    core::{
        document::{Document, Participant},
        registry::{ClearMode, RecalculationReport},
        store::DocumentStore,
        tickets::{MemberProfile, TicketBreakdown},
    },
    error::RaffleError,
    ActorRef, Rto,
};

/// A registration submitted by a user.
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub user_id: u64,
    pub first_name: String,
    pub last_name: String,
    pub tickets: TicketBreakdown,
    pub message_id: Option<u64>,
}

/// Administrative changes to the raffle configuration.
#[derive(Debug, Clone)]
pub enum ConfigChange {
    AddBonusRole(u64, u32, String),
    RemoveBonusRole(u64),
    SetHashtag(String),
    LockHashtag(bool),
    ConfigureTag(bool, Option<String>, u32),
    SetRegistrationChannel(Option<u64>),
    AddSignupMessage(u64),
    SetRegistrationsClosed(bool),
    SetChatLock(bool, Option<u64>),
    AddModerator(u64),
    RemoveModerator(u64),
}

impl ConfigChange {
    /// Apply onto a document. Returns false for removals of entries that did not exist.
    fn apply(self, document: &mut Document) -> Result<bool, RaffleError> {
        match self {
            ConfigChange::AddBonusRole(role, quantity, abbreviation) => {
                document.add_bonus_role(role, quantity, &abbreviation)?
            }
            ConfigChange::RemoveBonusRole(role) => return Ok(document.remove_bonus_role(role)),
            ConfigChange::SetHashtag(hashtag) => document.set_hashtag(&hashtag)?,
            ConfigChange::LockHashtag(locked) => document.lock_hashtag(locked),
            ConfigChange::ConfigureTag(enabled, text, quantity) => {
                document.configure_tag(enabled, text, quantity)?
            }
            ConfigChange::SetRegistrationChannel(channel) => {
                document.set_registration_channel(channel)
            }
            ConfigChange::AddSignupMessage(message) => document.add_signup_message(message),
            ConfigChange::SetRegistrationsClosed(closed) => {
                document.set_registrations_closed(closed)
            }
            ConfigChange::SetChatLock(enabled, channel) => document.set_chat_lock(enabled, channel),
            ConfigChange::AddModerator(user) => return Ok(document.add_moderator(user)),
            ConfigChange::RemoveModerator(user) => return Ok(document.remove_moderator(user)),
        }
        Ok(true)
    }
}

/// Requests that can be sent to a RosterActor
pub enum RosterRequest {
    Snapshot(Rto<Document>),
    Register(NewRegistration, Rto<Participant>),
    Unregister(u64, Rto<Option<Participant>>),
    Recalculate(HashMap<u64, MemberProfile>, Rto<RecalculationReport>),
    BulkClear(ClearMode, Rto<BTreeMap<u64, Participant>>),
    SetManualTag(u64, u32, Rto<()>),
    Ban(u64, String, u64, Rto<Option<Participant>>),
    Unban(u64, Rto<bool>),
    Configure(ConfigChange, Rto<bool>),
}

pub type RosterActor = ActorRef<RosterRequest>;

/// The single owner of the raffle document.
///
/// Every change is applied to a copy, saved, and only then made current, so a
/// failed save leaves the roster untouched.
pub struct Roster<S> {
    store: S,
    document: Document,
}

impl<S: DocumentStore> Roster<S> {
    pub async fn open(store: S) -> Result<Self, RaffleError> {
        let document = store.load().await?;
        log::info!(
            "Loaded raffle document with {} participant(s)",
            document.participants.len()
        );
        Ok(Roster { store, document })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    async fn commit<T>(
        &mut self,
        change: impl FnOnce(&mut Document) -> Result<T, RaffleError>,
    ) -> anyhow::Result<T> {
        let mut next = self.document.clone();
        let value = change(&mut next)?;

        if next != self.document {
            if let Err(e) = self.store.save(&next).await {
                log::error!("Failed to save raffle document: {}", e);
                return Err(e.into());
            }
            self.document = next;
        }
        Ok(value)
    }

    async fn handle(&mut self, request: RosterRequest) {
        match request {
            RosterRequest::Snapshot(rto) => rto.reply(Ok(self.document.clone())),
            RosterRequest::Register(registration, rto) => {
                let result = self
                    .commit(|d| {
                        d.register(
                            registration.user_id,
                            &registration.first_name,
                            &registration.last_name,
                            registration.tickets,
                            registration.message_id,
                        )
                        .cloned()
                    })
                    .await;
                if let Ok(participant) = &result {
                    log::info!(
                        "New registration: {} ({}) - {} ticket(s)",
                        participant.full_name(),
                        registration.user_id,
                        participant.tickets.total()
                    );
                }
                rto.reply(result);
            }
            RosterRequest::Unregister(user_id, rto) => {
                rto.reply(self.commit(|d| Ok(d.unregister(user_id))).await)
            }
            RosterRequest::Recalculate(profiles, rto) => {
                let result = self.commit(|d| Ok(d.recalculate_all(&profiles))).await;
                if let Ok(report) = &result {
                    log::info!(
                        "Tickets recalculated: {} updated, {} failed",
                        report.updated,
                        report.failed
                    );
                }
                rto.reply(result);
            }
            RosterRequest::BulkClear(mode, rto) => {
                let result = self.commit(|d| Ok(d.bulk_clear(mode))).await;
                if let Ok(removed) = &result {
                    log::info!("Cleared roster ({:?}), {} participant(s) removed", mode, removed.len());
                }
                rto.reply(result);
            }
            RosterRequest::SetManualTag(user_id, quantity, rto) => {
                rto.reply(self.commit(|d| d.grant_manual_tag(user_id, quantity)).await)
            }
            RosterRequest::Ban(user_id, reason, banned_by, rto) => {
                rto.reply(self.commit(|d| Ok(d.ban(user_id, &reason, banned_by))).await)
            }
            RosterRequest::Unban(user_id, rto) => {
                rto.reply(self.commit(|d| Ok(d.unban(user_id))).await)
            }
            RosterRequest::Configure(change, rto) => {
                log::debug!("Applying configuration change {:?}", change);
                rto.reply(self.commit(|d| change.apply(d)).await)
            }
        }
    }
}

pub async fn run_roster_manager<S: DocumentStore>(
    mut roster: Roster<S>,
    mut rx: UnboundedReceiver<RosterRequest>,
) -> Result<(), anyhow::Error> {
    log::debug!("Started roster manager");
    while let Some(msg) = rx.recv().await {
        roster.handle(msg).await;
    }
    log::debug!("Roster manager stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{core::store::MemoryStore, send_message};

    fn registration(user_id: u64, first_name: &str, last_name: &str) -> NewRegistration {
        NewRegistration {
            user_id,
            first_name: first_name.to_owned(),
            last_name: last_name.to_owned(),
            tickets: TicketBreakdown::default(),
            message_id: None,
        }
    }

    async fn spawn_roster() -> RosterActor {
        let mut roster = Roster::open(MemoryStore::new()).await.unwrap();
        roster.document.set_hashtag("#raffle").unwrap();
        let (actor, rx) = RosterActor::new();
        tokio::spawn(run_roster_manager(roster, rx));
        actor
    }

    #[tokio::test]
    async fn test_commit_persists() {
        let mut roster = Roster::open(MemoryStore::new()).await.unwrap();
        roster
            .handle_register_for_test(registration(1, "Ana", "Silva"))
            .await
            .unwrap();

        let stored = roster.store.stored().unwrap();
        assert!(stored.is_registered(1));
        assert_eq!(&stored, roster.document());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_state() {
        let mut roster = Roster::open(MemoryStore::new()).await.unwrap();
        roster.store.fail_saves.store(true, Ordering::SeqCst);

        let result = roster
            .handle_register_for_test(registration(1, "Ana", "Silva"))
            .await;
        assert!(result.is_err());
        assert!(!roster.document().is_registered(1));
        assert!(roster.store.stored().is_none());
    }

    #[tokio::test]
    async fn test_domain_errors_do_not_save() {
        let mut roster = Roster::open(MemoryStore::new()).await.unwrap();
        let result = roster
            .commit(|d| d.grant_manual_tag(7, 3))
            .await
            .unwrap_err();
        assert!(matches!(
            result.downcast_ref::<RaffleError>(),
            Some(RaffleError::NotRegistered(7))
        ));
        assert!(roster.store.stored().is_none());
    }

    #[tokio::test]
    async fn test_actor_scenario() {
        let actor = spawn_roster().await;

        send_message!(actor, RosterRequest, Register, registration(1, "Ana", "Silva")).unwrap();
        let duplicate = send_message!(actor, RosterRequest, Register, registration(2, "ana", "silva"));
        assert!(matches!(
            duplicate.unwrap_err().downcast_ref::<RaffleError>(),
            Some(RaffleError::DuplicateName(_))
        ));

        assert!(send_message!(
            actor,
            RosterRequest,
            Configure,
            ConfigChange::AddBonusRole(50, 3, "VIP".to_owned())
        )
        .unwrap());

        let profiles = HashMap::from([(
            1,
            MemberProfile {
                roles: vec![crate::core::tickets::RoleRef {
                    id: 50,
                    name: "VIP".to_owned(),
                }],
                username: "ana".to_owned(),
                ..Default::default()
            },
        )]);
        let report = send_message!(actor, RosterRequest, Recalculate, profiles).unwrap();
        assert_eq!(report, RecalculationReport { updated: 1, failed: 0 });

        let snapshot = send_message!(actor, RosterRequest, Snapshot).unwrap();
        assert_eq!(snapshot.lookup(1).unwrap().tickets.total(), 4);
    }

    #[tokio::test]
    async fn test_manual_tag_survives_full_clear() {
        let actor = spawn_roster().await;

        send_message!(actor, RosterRequest, Register, registration(3, "Carla", "Dias")).unwrap();
        send_message!(actor, RosterRequest, SetManualTag, 3, 5).unwrap();

        let removed = send_message!(actor, RosterRequest, BulkClear, ClearMode::Full).unwrap();
        assert_eq!(removed.len(), 1);

        let participant =
            send_message!(actor, RosterRequest, Register, registration(3, "Carla", "Dias")).unwrap();
        assert_eq!(participant.tickets.manual_tag, Some(5));
        assert_eq!(participant.tickets.total(), 6);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_are_serialized() {
        let actor = spawn_roster().await;

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20u64 {
            let actor = actor.clone();
            tasks.spawn(async move {
                send_message!(actor, RosterRequest, Register, registration(i, "Same", "Name")).is_ok()
            });
        }

        let mut successes = 0;
        while let Some(ok) = tasks.join_next().await {
            if ok.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);

        let snapshot = send_message!(actor, RosterRequest, Snapshot).unwrap();
        assert_eq!(snapshot.participants().count(), 1);
    }

    #[tokio::test]
    async fn test_ban_removes_registration() {
        let actor = spawn_roster().await;
        send_message!(actor, RosterRequest, Register, registration(4, "Davi", "Reis")).unwrap();

        let removed = send_message!(actor, RosterRequest, Ban, 4, "spam".to_owned(), 1).unwrap();
        assert!(removed.is_some());
        assert!(send_message!(actor, RosterRequest, Unban, 4).unwrap());

        let snapshot = send_message!(actor, RosterRequest, Snapshot).unwrap();
        assert!(!snapshot.is_registered(4));
        assert!(!snapshot.is_blacklisted(4));
    }

    impl<S: DocumentStore> Roster<S> {
        async fn handle_register_for_test(
            &mut self,
            registration: NewRegistration,
        ) -> anyhow::Result<Participant> {
            let (rto, rx) = Rto::new();
            self.handle(RosterRequest::Register(registration, rto)).await;
            rx.recv().await
        }
    }
}
