//! Senate roll-call vote menus.
//!
//! A menu (`roll_call_lists/vote_menu_{congress}_{session}.xml`) only lists
//! vote numbers. Each vote is published as its own `roll_call_vote` document
//! under `roll_call_votes/vote{congress}{session}/`.

use crate::parse::xml::texts_named;

const MENU_PREFIX: &str = "vote_menu_";

/// `(congress, session)` when `url` names a Senate vote menu.
pub(crate) fn menu_key(url: &str) -> Option<(u32, u32)> {
    let name = url.rsplit('/').next()?;
    let stem = name.strip_prefix(MENU_PREFIX)?.strip_suffix(".xml")?;
    let (congress, session) = stem.split_once('_')?;
    Some((congress.parse().ok()?, session.parse().ok()?))
}

pub(crate) fn is_vote_menu(url: &str) -> bool {
    menu_key(url).is_some()
}

/// Per-vote document URLs for every `vote_number` listed in a menu body.
pub(crate) fn vote_document_urls(menu_url: &str, body: &str) -> Vec<String> {
    let Some((congress, session)) = menu_key(menu_url) else {
        return Vec::new();
    };
    let Ok(base) = url::Url::parse(menu_url) else {
        return Vec::new();
    };

    let mut numbers: Vec<u32> = texts_named(body, "vote_number")
        .iter()
        .filter_map(|n| n.trim().parse().ok())
        .collect();
    numbers.sort_unstable();
    numbers.dedup();

    numbers
        .into_iter()
        .filter_map(|n| {
            let rel = format!("../roll_call_votes/vote{congress}{session}/vote_{congress}_{session}_{n:05}.xml");
            base.join(&rel).ok().map(String::from)
        })
        .collect()
}
