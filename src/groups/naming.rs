//! Member normalisation and display-name derivation for entity groups.

use std::collections::HashMap;

use crate::error::{SignalError, SignalResult};

/// Trim members, drop empties, and deduplicate case-insensitively
/// (first spelling wins).
pub fn normalize_members(raw: &[String]) -> SignalResult<Vec<String>> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for member in raw {
        let trimmed = member.trim();
        if trimmed.is_empty() {
            continue;
        }
        let folded = trimmed.to_lowercase();
        if seen.contains(&folded) {
            continue;
        }
        seen.push(folded);
        out.push(trimmed.to_string());
    }
    if out.is_empty() {
        return Err(SignalError::BadRequest(
            "group members must contain at least one non-empty name".into(),
        ));
    }
    Ok(out)
}

/// Derive a display name for a group.
///
/// Preference order: longest common token prefix across members, then the
/// member with the highest event count, then the first member alphabetically.
pub fn derive_display_name(members: &[String], event_counts: &HashMap<String, u64>) -> String {
    if members.len() == 1 {
        return members[0].clone();
    }

    if let Some(prefix) = common_token_prefix(members) {
        return prefix;
    }

    let busiest = members
        .iter()
        .filter_map(|m| event_counts.get(m).map(|count| (m, *count)))
        .max_by_key(|(_, count)| *count);
    if let Some((member, count)) = busiest {
        if count > 0 {
            return member.clone();
        }
    }

    let mut sorted: Vec<&String> = members.iter().collect();
    sorted.sort_by_key(|m| m.to_lowercase());
    sorted[0].clone()
}

/// Longest run of leading whitespace-separated tokens shared by every member,
/// compared case-insensitively; the first member's spelling is kept.
fn common_token_prefix(members: &[String]) -> Option<String> {
    let tokenized: Vec<Vec<&str>> = members
        .iter()
        .map(|m| m.split_whitespace().collect())
        .collect();
    let first = tokenized.first()?;

    let mut shared = 0usize;
    'outer: for (idx, token) in first.iter().enumerate() {
        for other in &tokenized[1..] {
            match other.get(idx) {
                Some(candidate) if candidate.eq_ignore_ascii_case(token) => {}
                _ => break 'outer,
            }
        }
        shared = idx + 1;
    }

    if shared == 0 {
        return None;
    }
    Some(first[..shared].join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_are_trimmed_and_deduplicated() {
        let raw = vec![
            "  Abbott ".to_string(),
            "abbott".to_string(),
            "St Jude Medical".to_string(),
            "".to_string(),
        ];
        let members = normalize_members(&raw).unwrap();
        assert_eq!(members, vec!["Abbott", "St Jude Medical"]);
    }

    #[test]
    fn empty_member_list_is_rejected() {
        assert!(normalize_members(&["  ".to_string()]).is_err());
    }

    #[test]
    fn token_prefix_wins() {
        let members = vec![
            "MEDTRONIC MINIMED".to_string(),
            "MEDTRONIC SPINE".to_string(),
        ];
        let name = derive_display_name(&members, &HashMap::new());
        assert_eq!(name, "MEDTRONIC");
    }

    #[test]
    fn highest_event_count_wins_without_prefix() {
        let members = vec!["ABBOTT".to_string(), "ST. JUDE MEDICAL".to_string()];
        let counts = HashMap::from([
            ("ABBOTT".to_string(), 120u64),
            ("ST. JUDE MEDICAL".to_string(), 450u64),
        ]);
        assert_eq!(derive_display_name(&members, &counts), "ST. JUDE MEDICAL");
    }

    #[test]
    fn alphabetical_fallback() {
        let members = vec!["ZIMMER".to_string(), "BIOMET".to_string()];
        assert_eq!(derive_display_name(&members, &HashMap::new()), "BIOMET");
    }
}
