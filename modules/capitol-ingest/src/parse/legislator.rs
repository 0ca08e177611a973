use std::path::Path;

use capitol_common::Legislator;
use serde::Deserialize;
use tracing::debug;

// Roster shape published by the unitedstates/congress-legislators project.
// Only the fields read below are modelled.

#[derive(Debug, Deserialize)]
struct RosterEntry {
    #[serde(default)]
    id: RosterIds,
    #[serde(default)]
    name: RosterName,
    #[serde(default)]
    terms: Vec<RosterTerm>,
}

#[derive(Debug, Default, Deserialize)]
struct RosterIds {
    bioguide: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RosterName {
    first: Option<String>,
    last: Option<String>,
    official_full: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RosterTerm {
    state: Option<String>,
    party: Option<String>,
}

/// Legislators in a roster file. Entries without a bioguide id or any name
/// are skipped; an unreadable file yields an empty list.
pub fn parse_legislators(path: &Path) -> Vec<Legislator> {
    let entries: Vec<RosterEntry> = match std::fs::read(path)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(anyhow::Error::from))
    {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Unreadable legislator roster");
            return Vec::new();
        }
    };

    entries.into_iter().filter_map(legislator_from_entry).collect()
}

fn legislator_from_entry(entry: RosterEntry) -> Option<Legislator> {
    let bioguide_id = entry.id.bioguide.filter(|b| !b.trim().is_empty())?;

    let name = match entry.name.official_full {
        Some(full) if !full.trim().is_empty() => full,
        _ => {
            let parts: Vec<String> = [entry.name.first, entry.name.last].into_iter().flatten().collect();
            if parts.is_empty() {
                return None;
            }
            parts.join(" ")
        }
    };

    // Terms are listed oldest first.
    let latest = entry.terms.last();

    Some(Legislator {
        name,
        bioguide_id,
        party: latest.and_then(|t| t.party.clone()),
        state: latest.and_then(|t| t.state.clone()),
    })
}
