//! Conservative parsing of bulk-data documents.
//!
//! Only fields that are present across every known format generation are
//! extracted. Anything else is left out, and a document that cannot be read
//! is a `None` (or empty list), never an error.

mod bill;
mod legislator;
mod vote;
pub(crate) mod xml;

use std::path::Path;

use capitol_common::{Bill, Legislator, Vote};

pub use bill::parse_bill_status;
pub use legislator::parse_legislators;
pub use vote::parse_roll_call;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    BillStatus,
    RollCall,
    Legislators,
    Unknown,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::BillStatus => "bill_status",
            DocumentKind::RollCall => "roll_call",
            DocumentKind::Legislators => "legislators",
            DocumentKind::Unknown => "unknown",
        }
    }
}

/// Decide which parser a file belongs to: JSON by extension, XML by the local
/// name of its root element.
pub fn sniff(path: &Path) -> DocumentKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("json") => DocumentKind::Legislators,
        Some("xml") => match xml::root_element(path).as_deref() {
            Some("billStatus") => DocumentKind::BillStatus,
            Some("rollcall-vote") | Some("roll_call_vote") => DocumentKind::RollCall,
            _ => DocumentKind::Unknown,
        },
        _ => DocumentKind::Unknown,
    }
}

/// What one file yielded.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Bill(Bill),
    Vote(Vote),
    Legislators(Vec<Legislator>),
    /// Recognized kind, but nothing reliable could be read.
    Empty(DocumentKind),
    /// Not a document this pipeline understands.
    Unrecognized,
}

pub fn parse_file(path: &Path) -> Parsed {
    match sniff(path) {
        DocumentKind::BillStatus => parse_bill_status(path)
            .map(Parsed::Bill)
            .unwrap_or(Parsed::Empty(DocumentKind::BillStatus)),
        DocumentKind::RollCall => parse_roll_call(path)
            .map(Parsed::Vote)
            .unwrap_or(Parsed::Empty(DocumentKind::RollCall)),
        DocumentKind::Legislators => {
            let legislators = parse_legislators(path);
            if legislators.is_empty() {
                Parsed::Empty(DocumentKind::Legislators)
            } else {
                Parsed::Legislators(legislators)
            }
        }
        DocumentKind::Unknown => Parsed::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn sniff_routes_by_root_element() {
        let dir = tempfile::tempdir().unwrap();
        let bill = write(dir.path(), "a.xml", "<?xml version=\"1.0\"?>\n<billStatus><bill/></billStatus>");
        let house = write(dir.path(), "b.xml", "<rollcall-vote><vote-metadata/></rollcall-vote>");
        let senate = write(dir.path(), "c.xml", "<roll_call_vote/>");
        let other = write(dir.path(), "d.xml", "<vote_summary/>");
        let roster = write(dir.path(), "e.json", "[]");
        let text = write(dir.path(), "f.txt", "hello");

        assert_eq!(sniff(&bill), DocumentKind::BillStatus);
        assert_eq!(sniff(&house), DocumentKind::RollCall);
        assert_eq!(sniff(&senate), DocumentKind::RollCall);
        assert_eq!(sniff(&other), DocumentKind::Unknown);
        assert_eq!(sniff(&roster), DocumentKind::Legislators);
        assert_eq!(sniff(&text), DocumentKind::Unknown);
    }

    #[test]
    fn parse_file_dispatches() {
        let dir = tempfile::tempdir().unwrap();
        let bill = write(
            dir.path(),
            "BILLSTATUS-118hr1.xml",
            "<billStatus><bill><number>1</number><type>HR</type><congress>118</congress></bill></billStatus>",
        );
        let empty = write(dir.path(), "BILLSTATUS-118hr2.xml", "<billStatus><bill/></billStatus>");

        match parse_file(&bill) {
            Parsed::Bill(b) => assert_eq!(b.bill_number, "hr1"),
            other => panic!("expected bill, got {other:?}"),
        }
        assert_eq!(parse_file(&empty), Parsed::Empty(DocumentKind::BillStatus));
    }
}
