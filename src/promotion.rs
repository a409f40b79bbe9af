//! Class-name parsing and promotion target detection.
//!
//! Class names are free text entered by admins ("X IPA 1", "XI-RPL-2",
//! "10 TKJ"). Parsing is best-effort: an ordered pattern table first, then
//! looser level-prefix heuristics. Parsed values are recomputed on every
//! detection and never stored.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Track/major vocabulary recognized inside class names. Current codes plus
/// legacy aliases that still appear in imported rosters.
const KNOWN_MAJORS: &[&str] = &[
    // academic tracks
    "IPA", "IPS", "BAHASA", "AGAMA", "UMUM",
    // vocational tracks
    "AK", "AKL", "AP", "APK", "OTKP", "MP", "PM", "BDP", "BR", "TKJ", "TJKT",
    "TKR", "TKRO", "TBSM", "TSM", "RPL", "PPLG", "MM", "DKV", "TAV", "TITL",
    "TP", "TB", "KUL", "PH", "UPW",
    // legacy accounting spellings
    "KA", "KEJURUAN", "KEJURUANAN", "KEJURUAN_AN", "KEJURUAN-AN", "AN",
    // role-like tokens that show up in imported names
    "GURU", "SISWA",
];

/// Legacy major codes and their canonical replacements.
const MAJOR_ALIASES: &[(&str, &str)] = &[
    ("KA", "AK"),
    ("KEJURUAN", "AK"),
    ("KEJURUANAN", "AK"),
    ("KEJURUAN_AN", "AK"),
    ("KEJURUAN-AN", "AK"),
];

/// Alternation over the major vocabulary, longest token first so the regex
/// engine never stops at a prefix ("AKL" before "AK").
static MAJOR_ALT: Lazy<String> = Lazy::new(|| {
    let mut majors: Vec<&str> = KNOWN_MAJORS.to_vec();
    majors.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    majors.join("|")
});

/// Ordered patterns over the normalized (trimmed, uppercased) name.
/// First match wins; later entries only see names the earlier ones rejected.
static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    let m = &*MAJOR_ALT;
    vec![
        // "X IPA 1" / "XI RPL" (roman level, space separated)
        Regex::new(&format!(r"^(XII|XI|X)\s+({m})(?:\s+(\d+))?$")).expect("pattern 1"),
        // "10 IPA 1" (numeric level)
        Regex::new(&format!(r"^(12|11|10)\s+({m})(?:\s+(\d+))?$")).expect("pattern 2"),
        // "X IPA" without a section number; subsumed by the optional group
        // above but kept to preserve the documented precedence list
        Regex::new(&format!(r"^(XII|XI|X)\s+({m})$")).expect("pattern 3"),
        // "X-IPA-1" / "X_IPA_1" (separator-tolerant)
        Regex::new(&format!(r"^(XII|XI|X)[\s_-]+({m})(?:[\s_-]+(\d+))?$")).expect("pattern 4"),
    ]
});

static ROMAN_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(XII|XI|X)\b").expect("roman prefix"));
static NUMERIC_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(12|11|10)\b").expect("numeric prefix"));
static MAJOR_SEARCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"\b({})\b", &*MAJOR_ALT)).expect("major search"));
static NUMBER_SEARCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").expect("number search"));

/// Structured view of a class name. Ephemeral: derived per call, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedClass {
    /// Grade level in canonical roman form: "X", "XI" or "XII".
    pub level: String,
    /// Canonicalized major/track code.
    pub major: String,
    /// Section number, >= 1. Defaults to 1 when the name carries none.
    pub number: u32,
    /// The original source string, kept for reference.
    pub full_name: String,
}

/// Maps numeric grade levels to roman form. Anything else passes through
/// unchanged, so the function is idempotent on already-roman input.
pub fn convert_level_to_roman(level: &str) -> String {
    match level {
        "10" => "X".to_string(),
        "11" => "XI".to_string(),
        "12" => "XII".to_string(),
        other => other.to_string(),
    }
}

/// Canonicalizes legacy major codes. Unmapped input passes through.
pub fn apply_major_mapping(major: &str) -> String {
    for (alias, canonical) in MAJOR_ALIASES {
        if *alias == major {
            return (*canonical).to_string();
        }
    }
    major.to_string()
}

/// Next grade level on promotion. Grade XII is terminal: those students
/// graduate, they do not promote.
pub fn next_level(level: &str) -> Option<&'static str> {
    match level {
        "X" => Some("XI"),
        "XI" => Some("XII"),
        _ => None,
    }
}

/// Best-effort structured extraction from a free-text class name.
///
/// Returns `None` when not even a grade-level prefix can be found; callers
/// treat that as "try a looser detection strategy", not as an error.
pub fn parse_class_name(name: &str) -> Option<ParsedClass> {
    let normalized = name.trim().to_uppercase();
    if normalized.is_empty() {
        return None;
    }

    for pattern in PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&normalized) {
            let number = caps
                .get(3)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .filter(|n| *n >= 1)
                .unwrap_or(1);
            return Some(ParsedClass {
                level: convert_level_to_roman(&caps[1]),
                major: apply_major_mapping(&caps[2]),
                number,
                full_name: name.to_string(),
            });
        }
    }

    // Fallback: anchor on the level prefix alone, then scan what is left
    // for any known major code and any digit run.
    let (level, rest) = if let Some(caps) = ROMAN_PREFIX.captures(&normalized) {
        let end = caps.get(1).map(|m| m.end())?;
        (convert_level_to_roman(&caps[1]), &normalized[end..])
    } else if let Some(caps) = NUMERIC_PREFIX.captures(&normalized) {
        let end = caps.get(1).map(|m| m.end())?;
        (convert_level_to_roman(&caps[1]), &normalized[end..])
    } else {
        return None;
    };

    let major = MAJOR_SEARCH
        .captures(rest)
        .map(|caps| apply_major_mapping(&caps[1]))
        .unwrap_or_else(|| "UMUM".to_string());
    let number = NUMBER_SEARCH
        .captures(rest)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .filter(|n| *n >= 1)
        .unwrap_or(1);

    Some(ParsedClass {
        level,
        major,
        number,
        full_name: name.to_string(),
    })
}

/// A class row as fetched from the workspace, in wire field order.
#[derive(Debug, Clone, Serialize)]
pub struct KelasRow {
    pub id: String,
    pub nama_kelas: String,
    pub status: String,
    pub tingkat: Option<String>,
}

impl KelasRow {
    fn is_aktif(&self) -> bool {
        self.status == "aktif"
    }
}

/// How confident the detection is. Each strategy carries the user-facing
/// label the admin sees next to the suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Exact,
    Partial,
    Simple,
}

impl Strategy {
    pub fn label(self) -> &'static str {
        match self {
            Strategy::Exact => "Kelas Tujuan Terdeteksi",
            Strategy::Partial => "Ditemukan (Parsial)",
            Strategy::Simple => "Ditemukan (Sederhana)",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub kelas: KelasRow,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    /// The source class id is not in the supplied list.
    SourceNotFound,
    /// The source is grade XII; promotion is blocked permanently.
    SudahLulus { nama_kelas: String },
    /// All strategies exhausted. `expected` names the class the admin
    /// should create when the source parsed cleanly.
    TargetNotFound { expected: Option<String> },
}

/// Suggests a promotion target for `source_id` from the supplied class list.
///
/// Pure over in-memory data: strategies are tried in order and the first
/// success wins. Candidate order is the insertion order of `classes`;
/// duplicate (level, major, number) triples are tolerated, first wins.
pub fn detect_target(source_id: &str, classes: &[KelasRow]) -> Result<Detection, DetectError> {
    let source = classes
        .iter()
        .find(|k| k.id == source_id)
        .ok_or(DetectError::SourceNotFound)?;

    let Some(parsed) = parse_class_name(&source.nama_kelas) else {
        return detect_by_level_hint(source, classes);
    };

    let Some(target_level) = next_level(&parsed.level) else {
        return Err(DetectError::SudahLulus {
            nama_kelas: source.nama_kelas.clone(),
        });
    };

    // Strategy 1: exact structural match on (level, major, number).
    for kelas in classes {
        if let Some(candidate) = parse_class_name(&kelas.nama_kelas) {
            if candidate.level == target_level
                && candidate.major == parsed.major
                && candidate.number == parsed.number
            {
                return Ok(Detection {
                    kelas: kelas.clone(),
                    strategy: Strategy::Exact,
                });
            }
        }
    }

    // Strategy 2: same level and major, any section. Loose substring
    // containment over active classes only; surfaced as a partial match the
    // admin is told to double check.
    for kelas in classes {
        if !kelas.is_aktif() {
            continue;
        }
        let name = kelas.nama_kelas.to_uppercase();
        if name.contains(target_level) && name.contains(&parsed.major) {
            return Ok(Detection {
                kelas: kelas.clone(),
                strategy: Strategy::Partial,
            });
        }
    }

    Err(DetectError::TargetNotFound {
        expected: Some(format!("{} {} {}", target_level, parsed.major, parsed.number)),
    })
}

/// Strategy 3: the source name did not parse at all. Infer the target level
/// from raw substrings and take the first active class containing it.
fn detect_by_level_hint(
    source: &KelasRow,
    classes: &[KelasRow],
) -> Result<Detection, DetectError> {
    let raw = source.nama_kelas.trim().to_uppercase();
    let target_level = if raw.contains("X ") && !raw.contains("XI") && !raw.contains("XII") {
        Some("XI")
    } else if raw.contains("XI ") && !raw.contains("XII") {
        Some("XII")
    } else {
        None
    };

    let Some(target_level) = target_level else {
        return Err(DetectError::TargetNotFound { expected: None });
    };

    for kelas in classes {
        if !kelas.is_aktif() {
            continue;
        }
        if kelas.nama_kelas.to_uppercase().contains(target_level) {
            return Ok(Detection {
                kelas: kelas.clone(),
                strategy: Strategy::Simple,
            });
        }
    }

    Err(DetectError::TargetNotFound { expected: None })
}
