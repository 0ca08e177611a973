use std::path::Path;

use capitol_common::{Bill, Chamber};
use tracing::debug;

use super::xml::XmlDoc;

/// Bill record from a BILLSTATUS document, or `None` when the file is not one
/// or carries no bill number.
pub fn parse_bill_status(path: &Path) -> Option<Bill> {
    let doc = match XmlDoc::read(path) {
        Ok(doc) => doc,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Unreadable bill status");
            return None;
        }
    };
    bill_from_doc(&doc, &path.display().to_string())
}

fn bill_from_doc(doc: &XmlDoc, source_file: &str) -> Option<Bill> {
    if doc.root() != "billStatus" {
        return None;
    }

    // Older dumps used billNumber/billType; current ones use number/type.
    let number = doc.first_of(&["bill/number", "bill/billNumber"])?;
    let bill_type = doc.first_of(&["bill/type", "bill/billType"]);

    let bill_number = match bill_type {
        Some(t) => format!("{}{}", t.to_ascii_lowercase(), number),
        None => number.to_string(),
    };

    let chamber = bill_type
        .and_then(Chamber::from_bill_type)
        .or_else(|| doc.text("bill/originChamber").and_then(Chamber::parse));

    Some(Bill {
        bill_number,
        title: doc.text("bill/title").map(str::to_string),
        sponsor: doc.text("bill/sponsors/item/fullName").map(str::to_string),
        introduced_date: doc.text("bill/introducedDate").map(str::to_string),
        source_file: source_file.to_string(),
        congress: doc.text("bill/congress").and_then(|c| c.parse().ok()),
        chamber,
    })
}
