use crate::core::{registry::Statistics, tickets::TicketBreakdown};

/// Maximum length of a single chat message.
pub const MESSAGE_LIMIT: usize = 2000;

/// Describe where a participant's tickets come from, one line per source.
///
/// `role_name` resolves role ids; unresolved roles get a placeholder.
pub fn ticket_summary_lines(
    tickets: &TicketBreakdown,
    role_name: impl Fn(u64) -> Option<String>,
) -> Vec<String> {
    let mut lines = vec![format!("• Base ticket: {}", tickets.base)];

    for (role_id, role) in &tickets.roles {
        let name = role_name(*role_id).unwrap_or_else(|| format!("Role ({})", role_id));
        let line = if role.abbreviation.is_empty() {
            format!("• {} ticket(s) from role: {}", role.quantity, name)
        } else {
            format!(
                "• {} ticket(s) from role: {} ({})",
                role.quantity, name, role.abbreviation
            )
        };
        lines.push(line);
    }

    if tickets.tag > 0 {
        lines.push(format!("• TAG tickets: {}", tickets.tag));
    }
    if tickets.manual_tag() > 0 {
        lines.push(format!("• Manual TAG tickets: {}", tickets.manual_tag()));
    }

    lines
}

/// One line per ticket for the detailed roster.
///
/// The bare name, then the name suffixed with each role, then a `TAG` line
/// for the automatic tag and another for the manual tag.
pub fn detailed_roster_entry(
    name: &str,
    tickets: &TicketBreakdown,
    role_name: impl Fn(u64) -> Option<String>,
) -> Vec<String> {
    let name = name.trim();
    let mut lines = vec![name.to_owned()];

    for (role_id, role) in &tickets.roles {
        let abbreviation = role.abbreviation.trim();
        let suffix = if abbreviation.is_empty() {
            role_name(*role_id).unwrap_or_else(|| format!("Role_{}", role_id))
        } else {
            abbreviation.to_owned()
        };
        lines.push(format!("{} {}", name, suffix));
    }

    // Both tag sources print the same label.
    if tickets.tag > 0 {
        lines.push(format!("{} TAG", name));
    }
    if tickets.manual_tag() > 0 {
        lines.push(format!("{} TAG", name));
    }

    lines
}

/// Numbered list of names, sorted alphabetically ignoring case.
pub fn simple_roster_list<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut names: Vec<&str> = names.iter().map(|n| n.as_ref().trim()).collect();
    names.sort_by_cached_key(|n| n.to_lowercase());
    names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("{}. {}", i + 1, name))
        .collect()
}

pub fn statistics_lines(
    stats: &Statistics,
    role_name: impl Fn(u64) -> Option<String>,
) -> Vec<String> {
    let mut lines = vec![
        format!("Participants: {}", stats.total_participants),
        format!("Tickets: {}", stats.total_tickets),
        format!("With TAG: {}", stats.participants_with_tag),
    ];

    if !stats.tickets_by_role.is_empty() {
        lines.push("Tickets by role:".to_owned());
        for (role_id, role) in &stats.tickets_by_role {
            let name = role_name(*role_id).unwrap_or_else(|| "Unknown role".to_owned());
            lines.push(format!(
                "• {} ({}): {} participant(s), {} ticket(s)",
                name, role.abbreviation, role.count, role.total_tickets
            ));
        }
    }

    lines.push(format!("Blacklisted: {}", stats.blacklist_count));
    lines
}

/// Join lines into messages of at most `limit` characters.
///
/// Messages break between lines; a line longer than `limit` is split.
pub fn chunk_lines<S: AsRef<str>>(lines: &[S], limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = vec![];
    let mut current = String::new();
    let mut current_len = 0;

    for line in lines {
        let line = line.as_ref();
        let line_len = line.chars().count();
        let needed = if current.is_empty() { line_len } else { line_len + 1 };

        if current_len + needed > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
