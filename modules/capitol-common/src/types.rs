use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// --- Chamber ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chamber {
    House,
    Senate,
    Joint,
}

impl Chamber {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chamber::House => "house",
            Chamber::Senate => "senate",
            Chamber::Joint => "joint",
        }
    }

    /// Originating chamber of a bill type code (`hr`, `s`, `hjres`, `sconres`, ...).
    pub fn from_bill_type(bill_type: &str) -> Option<Self> {
        match bill_type.trim().to_ascii_lowercase().as_str() {
            "hr" | "hres" | "hjres" | "hconres" => Some(Chamber::House),
            "s" | "sres" | "sjres" | "sconres" => Some(Chamber::Senate),
            _ => None,
        }
    }

    /// Lenient parse of chamber names as they appear in roll-call documents.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "house" | "h" | "house of representatives" => Some(Chamber::House),
            "senate" | "s" => Some(Chamber::Senate),
            "joint" => Some(Chamber::Joint),
            _ => None,
        }
    }
}

impl fmt::Display for Chamber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Stage results ---

/// Outcome of one `download_one` call. Lives for a single run.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub url: String,
    pub destination_path: PathBuf,
    pub success: bool,
    pub bytes_transferred: u64,
    pub error: Option<String>,
}

impl DownloadResult {
    pub fn ok(url: &str, destination_path: PathBuf, bytes_transferred: u64) -> Self {
        Self {
            url: url.to_string(),
            destination_path,
            success: true,
            bytes_transferred,
            error: None,
        }
    }

    pub fn failed(url: &str, destination_path: PathBuf, bytes_transferred: u64, error: String) -> Self {
        Self {
            url: url.to_string(),
            destination_path,
            success: false,
            bytes_transferred,
            error: Some(error),
        }
    }
}

/// Outcome of unpacking one archive.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub ok: bool,
    pub destination_dir: PathBuf,
    pub error: Option<String>,
}

// --- Parsed records ---
// Only fields that are reliably present across format generations. Everything
// else is left out rather than guessed.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub bill_number: String,
    pub title: Option<String>,
    pub sponsor: Option<String>,
    pub introduced_date: Option<String>,
    pub source_file: String,
    /// Stated by the document itself, when it does.
    pub congress: Option<i32>,
    pub chamber: Option<Chamber>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub vote_id: String,
    pub result: Option<String>,
    pub date: Option<String>,
    pub source_file: String,
    pub congress: Option<i32>,
    pub chamber: Option<Chamber>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legislator {
    pub name: String,
    pub bioguide_id: String,
    pub party: Option<String>,
    pub state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bill_types_map_to_originating_chamber() {
        assert_eq!(Chamber::from_bill_type("HR"), Some(Chamber::House));
        assert_eq!(Chamber::from_bill_type("hconres"), Some(Chamber::House));
        assert_eq!(Chamber::from_bill_type("S"), Some(Chamber::Senate));
        assert_eq!(Chamber::from_bill_type("sjres"), Some(Chamber::Senate));
        assert_eq!(Chamber::from_bill_type("pl"), None);
    }

    #[test]
    fn chamber_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Chamber::Senate).unwrap(), "\"senate\"");
        assert_eq!(Chamber::parse("House"), Some(Chamber::House));
    }
}
