use std::{collections::BTreeMap, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::document::{BonusRoleRule, TagConfig};

/// Bonus tickets held through a single role.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct RoleTickets {
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub abbreviation: String,
}

/// The ticket breakdown of a participant.
///
/// `manual_tag` is absent rather than zero when no manual tag was granted.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct TicketBreakdown {
    #[serde(default = "default_base")]
    pub base: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub roles: BTreeMap<u64, RoleTickets>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub tag: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_tag: Option<u32>,
}

fn default_base() -> u32 {
    1
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl Default for TicketBreakdown {
    fn default() -> Self {
        TicketBreakdown {
            base: 1,
            roles: BTreeMap::new(),
            tag: 0,
            manual_tag: None,
        }
    }
}

impl TicketBreakdown {
    /// Total tickets, never less than one. Saturates at `u32::MAX`.
    pub fn total(&self) -> u32 {
        self.roles
            .values()
            .map(|r| r.quantity)
            .chain([self.base, self.tag, self.manual_tag()])
            .fold(0u32, u32::saturating_add)
            .max(1)
    }

    pub fn manual_tag(&self) -> u32 {
        self.manual_tag.unwrap_or(0)
    }

    /// Set or remove the manual tag. Zero removes it.
    pub fn set_manual_tag(&mut self, quantity: u32) {
        self.manual_tag = Some(quantity).filter(|q| *q > 0);
    }

    /// Whether either an automatic or a manual tag contributes tickets.
    pub fn has_tag(&self) -> bool {
        self.tag > 0 || self.manual_tag() > 0
    }

    pub(crate) fn normalize(&mut self) {
        if self.manual_tag == Some(0) {
            self.manual_tag = None;
        }
    }
}

/// A role held by a member.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct RoleRef {
    pub id: u64,
    pub name: String,
}

/// The member metadata tickets are computed from.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct MemberProfile {
    pub roles: Vec<RoleRef>,
    pub nickname: Option<String>,
    pub display_name: Option<String>,
    pub global_name: Option<String>,
    pub username: String,
}

impl MemberProfile {
    /// Name-like fields in detection order, labelled for reporting.
    pub fn name_fields(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("Display name", self.display_name.as_deref()),
            ("Server nickname", self.nickname.as_deref()),
            ("Global name", self.global_name.as_deref()),
            ("Username", Some(self.username.as_str())),
        ]
    }
}

/// Caseless form of `text`: `"Straße"` and `"STRASSE"` both fold to `"strasse"`.
pub fn fold_case(text: &str) -> String {
    // Lowercasing first maps 'ẞ' to 'ß', which only expands to "SS" when uppercased
    text.to_lowercase().to_uppercase().to_lowercase()
}

static TAG_STRIP_REGEX: OnceLock<Regex> = OnceLock::new();

/// Normalize text for tag comparison.
///
/// Removes every character that is not a letter, number, underscore or
/// whitespace (symbols, punctuation, emoji and combining marks), then trims
/// and case folds.
/// `"Ⓐ Team!"` becomes `"team"`.
pub fn normalize_tag_text(text: &str) -> String {
    let regex = TAG_STRIP_REGEX.get_or_init(|| Regex::new(r"[^\p{L}\p{N}_\s]").unwrap());
    fold_case(regex.replace_all(text, "").trim())
}

/// Tag search terms derived once from the configured tag text.
struct TagNeedle {
    raw: String,
    clean: String,
}

impl TagNeedle {
    fn new(text: &str) -> Self {
        TagNeedle {
            raw: fold_case(text.trim()),
            clean: normalize_tag_text(text),
        }
    }

    fn matches_name(&self, field: &str) -> bool {
        if fold_case(field.trim()).contains(&self.raw) {
            return true;
        }
        !self.clean.is_empty() && normalize_tag_text(field).contains(&self.clean)
    }

    fn matches_role(&self, role_name: &str) -> bool {
        let role_name = fold_case(role_name.trim());
        !role_name.is_empty() && role_name.contains(&self.raw)
    }
}

/// Whether the member carries the tag in any name field or, failing that, any role name.
pub fn has_tag(member: &MemberProfile, tag_text: &str) -> bool {
    let needle = TagNeedle::new(tag_text);
    if needle.raw.is_empty() {
        return false;
    }

    let name_match = member
        .name_fields()
        .iter()
        .filter_map(|(_, field)| *field)
        .filter(|field| !field.is_empty())
        .any(|field| needle.matches_name(field));

    name_match || member.roles.iter().any(|r| needle.matches_role(&r.name))
}

/// Per-field tag detection results, used to explain the tag configuration to admins.
pub fn tag_field_report<'a>(
    member: &'a MemberProfile,
    tag_text: &str,
) -> Vec<(&'static str, Option<&'a str>, bool)> {
    let needle = TagNeedle::new(tag_text);
    member
        .name_fields()
        .into_iter()
        .map(|(label, field)| {
            let field = field.filter(|f| !f.is_empty());
            let matched = !needle.raw.is_empty() && field.is_some_and(|f| needle.matches_name(f));
            (label, field, matched)
        })
        .collect()
}

/// Compute the ticket breakdown for a member.
///
/// `manual_tag` carries over a previously granted manual tag on recalculation.
pub fn calculate_tickets(
    member: &MemberProfile,
    bonus_roles: &BTreeMap<u64, BonusRoleRule>,
    tag: &TagConfig,
    manual_tag: Option<u32>,
) -> TicketBreakdown {
    let roles = member
        .roles
        .iter()
        .filter_map(|role| {
            bonus_roles.get(&role.id).map(|rule| {
                (
                    role.id,
                    RoleTickets {
                        quantity: rule.quantity,
                        abbreviation: rule.abbreviation.clone(),
                    },
                )
            })
        })
        .collect();

    let tag = match tag.active_text() {
        Some(text) if has_tag(member, text) => tag.quantity.max(1),
        _ => 0,
    };

    TicketBreakdown {
        base: 1,
        roles,
        tag,
        manual_tag: manual_tag.filter(|q| *q > 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(display: &str, roles: &[(u64, &str)]) -> MemberProfile {
        MemberProfile {
            roles: roles
                .iter()
                .map(|(id, name)| RoleRef {
                    id: *id,
                    name: name.to_string(),
                })
                .collect(),
            nickname: None,
            display_name: Some(display.to_owned()),
            global_name: None,
            username: "user".to_owned(),
        }
    }

    fn tag(text: &str, quantity: u32) -> TagConfig {
        TagConfig {
            enabled: true,
            text: Some(text.to_owned()),
            quantity,
        }
    }

    fn vip_rules() -> BTreeMap<u64, BonusRoleRule> {
        BTreeMap::from([
            (
                10,
                BonusRoleRule {
                    quantity: 3,
                    abbreviation: "VIP".to_owned(),
                },
            ),
            (
                20,
                BonusRoleRule {
                    quantity: 2,
                    abbreviation: "S.B".to_owned(),
                },
            ),
        ])
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_tag_text("Ⓐ Team"), "team");
        assert_eq!(normalize_tag_text("  [TEAM]★ "), "team");
        assert_eq!(normalize_tag_text("João_99"), "joão_99");
        assert_eq!(normalize_tag_text("Jose\u{301}"), "jose");
        assert_eq!(normalize_tag_text("★★"), "");
    }

    #[test]
    fn test_case_folding() {
        assert_eq!(fold_case("Straße"), "strasse");
        assert_eq!(normalize_tag_text("GROẞ!"), "gross");
        assert!(has_tag(&member("Die STRASSE", &[]), "straße"));
        assert!(has_tag(&member("Ana", &[(1, "Weiß Crew")]), "WEISS"));
    }

    #[test]
    fn test_base_only() {
        let tickets = calculate_tickets(
            &member("Ana", &[(99, "Member")]),
            &vip_rules(),
            &TagConfig::default(),
            None,
        );
        assert_eq!(tickets, TicketBreakdown::default());
        assert_eq!(tickets.total(), 1);
    }

    #[test]
    fn test_roles() {
        let tickets = calculate_tickets(
            &member("Ana", &[(10, "Vip"), (20, "Booster"), (30, "Other")]),
            &vip_rules(),
            &TagConfig::default(),
            None,
        );
        assert_eq!(tickets.roles.len(), 2);
        assert_eq!(tickets.roles[&20].abbreviation, "S.B");
        assert_eq!(tickets.total(), 1 + 3 + 2);
    }

    #[test]
    fn test_normalized_tag_match() {
        let profile = member("team", &[]);
        assert!(has_tag(&profile, "Ⓐ Team"));

        let tickets = calculate_tickets(&profile, &BTreeMap::new(), &tag("Ⓐ Team", 2), None);
        assert_eq!(tickets.tag, 2);
        assert_eq!(tickets.total(), 3);
    }

    #[test]
    fn test_tag_in_other_fields() {
        let mut profile = member("Ana", &[]);
        profile.username = "ana_TEAMx".to_owned();
        assert!(has_tag(&profile, "team"));

        let profile = member("Ana", &[(1, "Team Members")]);
        assert!(has_tag(&profile, "team"));

        let profile = member("Ana", &[(1, "Members")]);
        assert!(!has_tag(&profile, "team"));
    }

    #[test]
    fn test_role_names_need_raw_match() {
        let profile = member("Ana", &[(1, "team")]);
        assert!(!has_tag(&profile, "Ⓐ Team"));
    }

    #[test]
    fn test_tag_disabled_or_empty() {
        let profile = member("TEAM Ana", &[]);
        let mut config = tag("team", 1);
        config.enabled = false;
        assert_eq!(calculate_tickets(&profile, &BTreeMap::new(), &config, None).tag, 0);

        let config = tag("   ", 1);
        assert_eq!(calculate_tickets(&profile, &BTreeMap::new(), &config, None).tag, 0);

        let config = tag("team", 0);
        assert_eq!(calculate_tickets(&profile, &BTreeMap::new(), &config, None).tag, 1);
    }

    #[test]
    fn test_manual_tag_is_additive() {
        let profile = member("TEAM Ana", &[(10, "Vip")]);
        let tickets = calculate_tickets(&profile, &vip_rules(), &tag("team", 1), Some(5));
        assert_eq!(tickets.tag, 1);
        assert_eq!(tickets.manual_tag, Some(5));
        assert_eq!(tickets.total(), 1 + 3 + 1 + 5);

        let tickets = calculate_tickets(&profile, &vip_rules(), &tag("team", 1), Some(0));
        assert_eq!(tickets.manual_tag, None);
    }

    #[test]
    fn test_total_floor() {
        let tickets = TicketBreakdown {
            base: 0,
            ..Default::default()
        };
        assert_eq!(tickets.total(), 1);
    }

    #[test]
    fn test_total_saturates() {
        let tickets = TicketBreakdown {
            roles: BTreeMap::from([(
                1,
                RoleTickets {
                    quantity: u32::MAX,
                    abbreviation: "MAX".to_owned(),
                },
            )]),
            tag: 1,
            manual_tag: Some(u32::MAX),
            ..Default::default()
        };
        assert_eq!(tickets.total(), u32::MAX);
    }

    #[test]
    fn test_field_report() {
        let mut profile = member("Ana", &[]);
        profile.nickname = Some("Ana [TEAM]".to_owned());
        let report = tag_field_report(&profile, "team");

        assert_eq!(report[0], ("Display name", Some("Ana"), false));
        assert_eq!(report[1], ("Server nickname", Some("Ana [TEAM]"), true));
        assert_eq!(report[2], ("Global name", None, false));
        assert_eq!(report[3].2, false);
    }

    #[test]
    fn test_breakdown_serialization() {
        let mut tickets = TicketBreakdown::default();
        assert_eq!(serde_json::to_string(&tickets).unwrap(), r#"{"base":1}"#);

        tickets.set_manual_tag(4);
        tickets.tag = 1;
        assert_eq!(
            serde_json::to_string(&tickets).unwrap(),
            r#"{"base":1,"tag":1,"manual_tag":4}"#
        );

        tickets.set_manual_tag(0);
        assert_eq!(tickets.manual_tag, None);
        assert!(tickets.has_tag());
    }
}
