use std::path::Path;

use capitol_common::{Chamber, Vote};
use tracing::debug;

use super::xml::XmlDoc;

/// Vote record from a House or Senate roll-call document.
pub fn parse_roll_call(path: &Path) -> Option<Vote> {
    let doc = match XmlDoc::read(path) {
        Ok(doc) => doc,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Unreadable roll call");
            return None;
        }
    };
    vote_from_doc(&doc, &path.display().to_string())
}

struct Layout {
    chamber: Chamber,
    congress: &'static str,
    session: &'static str,
    number: &'static str,
    result: &'static str,
    date: &'static str,
}

const HOUSE: Layout = Layout {
    chamber: Chamber::House,
    congress: "vote-metadata/congress",
    session: "vote-metadata/session",
    number: "vote-metadata/rollcall-num",
    result: "vote-metadata/vote-result",
    date: "vote-metadata/action-date",
};

const SENATE: Layout = Layout {
    chamber: Chamber::Senate,
    congress: "congress",
    session: "session",
    number: "vote_number",
    result: "vote_result",
    date: "vote_date",
};

fn vote_from_doc(doc: &XmlDoc, source_file: &str) -> Option<Vote> {
    let layout = match doc.root() {
        "rollcall-vote" => &HOUSE,
        "roll_call_vote" => &SENATE,
        _ => return None,
    };

    let session = leading_number(doc.text(layout.session)?)?;
    let number = leading_number(doc.text(layout.number)?)?;

    Some(Vote {
        vote_id: format!("{session}-{number}"),
        result: doc.text(layout.result).map(str::to_string),
        date: doc.text(layout.date).map(str::to_string),
        source_file: source_file.to_string(),
        congress: doc.text(layout.congress).and_then(leading_number).map(|c| c as i32),
        chamber: Some(layout.chamber),
    })
}

/// "1st" → 1, "00042" → 42.
fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn house_layout() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<rollcall-vote>
  <vote-metadata>
    <majority>D</majority>
    <congress>117</congress>
    <session>2nd</session>
    <chamber>U.S. House of Representatives</chamber>
    <rollcall-num>42</rollcall-num>
    <vote-question>On Passage</vote-question>
    <vote-result>Passed</vote-result>
    <action-date>8-Feb-2022</action-date>
  </vote-metadata>
</rollcall-vote>"#;
        let vote = vote_from_doc(&XmlDoc::parse_str(xml).unwrap(), "roll042.xml").unwrap();

        assert_eq!(vote.vote_id, "2-42");
        assert_eq!(vote.result.as_deref(), Some("Passed"));
        assert_eq!(vote.date.as_deref(), Some("8-Feb-2022"));
        assert_eq!(vote.congress, Some(117));
        assert_eq!(vote.chamber, Some(Chamber::House));
    }

    #[test]
    fn senate_layout() {
        let xml = r#"<roll_call_vote>
  <congress>118</congress>
  <session>1</session>
  <congress_year>2023</congress_year>
  <vote_number>00015</vote_number>
  <vote_date>February 9, 2023,  12:07 PM</vote_date>
  <vote_result>Motion to Table Agreed to</vote_result>
</roll_call_vote>"#;
        let vote = vote_from_doc(&XmlDoc::parse_str(xml).unwrap(), "vote_118_1_00015.xml").unwrap();

        assert_eq!(vote.vote_id, "1-15");
        assert_eq!(vote.result.as_deref(), Some("Motion to Table Agreed to"));
        assert_eq!(vote.chamber, Some(Chamber::Senate));
    }

    #[test]
    fn missing_vote_number_is_none() {
        let xml = "<roll_call_vote><session>1</session></roll_call_vote>";
        assert!(vote_from_doc(&XmlDoc::parse_str(xml).unwrap(), "v.xml").is_none());
    }

    #[test]
    fn leading_number_strips_suffix_and_padding() {
        assert_eq!(leading_number("1st"), Some(1));
        assert_eq!(leading_number(" 00042 "), Some(42));
        assert_eq!(leading_number("n/a"), None);
    }
}
