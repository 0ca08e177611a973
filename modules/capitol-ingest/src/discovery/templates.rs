use std::collections::HashSet;
use std::ops::RangeInclusive;

use capitol_common::Collection;

/// Bill type codes used in bulk-data paths, House first.
pub const BILL_TYPES: [&str; 8] = ["hr", "hres", "hjres", "hconres", "s", "sres", "sjres", "sconres"];

/// Both sessions of a congress.
const SESSIONS: [u32; 2] = [1, 2];

fn patterns(collection: Collection) -> &'static [&'static str] {
    match collection {
        Collection::BillStatus => {
            &["https://www.govinfo.gov/bulkdata/BILLSTATUS/{congress}/{bill_type}/BILLSTATUS-{congress}-{bill_type}.zip"]
        }
        Collection::RollCall => {
            &["https://www.senate.gov/legislative/LIS/roll_call_lists/vote_menu_{congress}_{session}.xml"]
        }
        Collection::BillText => &[
            "https://www.govinfo.gov/bulkdata/BILLS/{congress}/{session}/{bill_type}/BILLS-{congress}-{session}-{bill_type}.zip",
        ],
        Collection::PublicLaw => &[
            "https://www.govinfo.gov/bulkdata/PLAW/{congress}/public/PLAW-{congress}-public.zip",
            "https://www.govinfo.gov/bulkdata/PLAW/{congress}/private/PLAW-{congress}-private.zip",
        ],
        Collection::CongressionalRecord => {
            &["https://www.govinfo.gov/bulkdata/CREC/{year}/CREC-{year}.zip"]
        }
    }
}

/// Calendar year in which a session of a congress sits (the 1st Congress met in 1789).
pub fn session_year(congress: u32, session: u32) -> u32 {
    1787 + 2 * congress + (session.max(1) - 1)
}

/// Substitute every congress × session × bill type combination into the
/// templates of each collection. Pure; the result is deduplicated and keeps
/// first-seen order.
pub fn expand_templates(congresses: RangeInclusive<u32>, collections: &[Collection]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for &collection in collections {
        for pattern in patterns(collection) {
            let per_session = pattern.contains("{session}") || pattern.contains("{year}");
            let per_type = pattern.contains("{bill_type}");
            let sessions: &[u32] = if per_session { &SESSIONS } else { &[0] };
            let types: &[&str] = if per_type { &BILL_TYPES } else { &[""] };

            for congress in congresses.clone() {
                for &session in sessions {
                    for bill_type in types {
                        let url = pattern
                            .replace("{congress}", &congress.to_string())
                            .replace("{session}", &session.to_string())
                            .replace("{year}", &session_year(congress, session).to_string())
                            .replace("{bill_type}", bill_type);
                        if seen.insert(url.clone()) {
                            urls.push(url);
                        }
                    }
                }
            }
        }
    }

    urls
}
