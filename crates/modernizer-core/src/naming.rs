//! Filesystem-safe names and identifier normalization.
//!
//! Two concerns live here: making generated folder and file names safe on
//! every platform the target archive may be mounted on, and folding the words
//! of historical names into comparable project identifiers.

use crate::conventions::tokenizer::{self, TokenType};
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length for a generated path component.
const MAX_COMPONENT_LENGTH: usize = 120;

/// Characters reserved on NTFS that must be removed.
const NTFS_RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Reserved names on Windows NTFS.
const NTFS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Words that never identify a project: finality markers and copy markers.
/// Revision-shaped words (`rev`, `R2`, `v1.2`) are noise as well.
pub const NOISE_WORDS: &[&str] = &["final", "actualfinal", "latest", "copy", "draft"];

/// Folder words that mark a dumping ground rather than a project.
pub const ORPHAN_FOLDER_WORDS: &[&str] =
    &["misc", "temp", "tmp", "old", "backup", "archive", "delete"];

/// Generic folder words dropped before a folder name is used as an identifier.
const GENERIC_FOLDER_WORDS: &[&str] = &[
    "project", "projects", "file", "files", "folder", "folders",
];

/// File-type words stripped from descriptions.
pub const TYPE_WORDS: &[&str] = &["dwg", "pdf", "xls", "xlsx", "assembly", "asm", "part", "prt"];

/// Regex for consecutive underscores/hyphens.
static CONSECUTIVE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([-_])[-_]+").expect("separator regex is valid"));

/// Regex for characters outside the portable filename set.
static NON_PORTABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9\-_.]").expect("portable regex is valid"));

/// Make a single path component filesystem-safe, preserving case.
///
/// # Rules Applied
/// 1. Replace whitespace with underscores
/// 2. Remove NTFS-reserved characters
/// 3. Replace remaining non-portable characters with underscore
/// 4. Collapse consecutive separators
/// 5. Trim leading/trailing separators and dots
/// 6. Truncate to `MAX_COMPONENT_LENGTH`
/// 7. Suffix NTFS reserved names
/// 8. Ensure non-empty result
///
/// # Examples
///
/// ```
/// use modernizer_core::naming::sanitize_component;
///
/// assert_eq!(sanitize_component("P001_Alpha_2015"), "P001_Alpha_2015");
/// assert_eq!(sanitize_component("Beta: Rev?2"), "Beta_Rev2");
/// assert_eq!(sanitize_component("con"), "con_file");
/// ```
pub fn sanitize_component(name: &str) -> String {
    let mut result: String = name
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| !NTFS_RESERVED_CHARS.contains(c))
        .collect();

    result = NON_PORTABLE.replace_all(&result, "_").to_string();
    result = CONSECUTIVE_SEPARATORS.replace_all(&result, "$1").to_string();
    result = result
        .trim_matches(|c| c == '-' || c == '_' || c == '.')
        .to_string();

    if result.len() > MAX_COMPONENT_LENGTH {
        result.truncate(MAX_COMPONENT_LENGTH);
        result = result
            .trim_end_matches(|c| c == '-' || c == '_' || c == '.')
            .to_string();
    }

    let stem = result.split('.').next().unwrap_or_default().to_uppercase();
    if NTFS_RESERVED_NAMES.contains(&stem.as_str()) {
        result = match result.find('.') {
            Some(dot) => format!("{}_file{}", &result[..dot], &result[dot..]),
            None => format!("{}_file", result),
        };
    }

    if result.is_empty() {
        result = "unnamed".to_string();
    }

    result
}

/// Capitalize the first letter of each word and lowercase the rest, then
/// concatenate.
///
/// ```
/// use modernizer_core::naming::title_case;
///
/// assert_eq!(title_case(&["main", "FRAME"]), "MainFrame");
/// ```
pub fn title_case<S: AsRef<str>>(words: &[S]) -> String {
    words
        .iter()
        .map(|w| {
            let mut chars = w.as_ref().chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Whether a lowercased word carries no identifying information.
pub fn is_noise_word(folded: &str) -> bool {
    NOISE_WORDS.contains(&folded) || tokenizer::is_revision_word(folded)
}

/// Normalize a single identifier token: case-fold and drop noise.
///
/// Returns `None` when nothing identifying remains.
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let words: Vec<String> = tokenizer::split_words(raw)
        .into_iter()
        .map(|w| w.to_lowercase())
        .filter(|w| !is_noise_word(w))
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join("_"))
    }
}

/// Outcome of reading a folder name as a project identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderIdentity {
    /// Nothing identifying in this component; look at the next one.
    Empty,
    /// A dumping-ground folder such as `MiscFiles` or `Archive_Old`.
    Orphan,
    /// A usable identifier.
    Project(String),
}

/// Read a folder name as a project identifier.
///
/// Year tokens, generic words (`project`, `files`) and noise are dropped.
///
/// ```
/// use modernizer_core::naming::{folder_identity, FolderIdentity};
///
/// assert_eq!(folder_identity("2015_ProjectAlpha_Rev3"), FolderIdentity::Project("alpha".into()));
/// assert_eq!(folder_identity("2018Projects"), FolderIdentity::Empty);
/// assert_eq!(folder_identity("MiscFiles"), FolderIdentity::Orphan);
/// ```
pub fn folder_identity(folder: &str) -> FolderIdentity {
    let words: Vec<String> = tokenizer::tokenize(folder)
        .into_iter()
        .filter(|t| t.token_type != TokenType::DateLike && t.token_type != TokenType::Numeric)
        .map(|t| t.folded())
        .filter(|w| !is_noise_word(w) && !GENERIC_FOLDER_WORDS.contains(&w.as_str()))
        .collect();

    if words.is_empty() {
        FolderIdentity::Empty
    } else if words.iter().all(|w| ORPHAN_FOLDER_WORDS.contains(&w.as_str())) {
        FolderIdentity::Orphan
    } else {
        FolderIdentity::Project(words.join("_"))
    }
}

/// Whether any component of a relative folder path is a dumping ground.
pub fn is_orphan_path<'a>(components: impl IntoIterator<Item = &'a str>) -> bool {
    components
        .into_iter()
        .any(|c| folder_identity(c) == FolderIdentity::Orphan)
}

/// Human label for a normalized identifier: `delta_wing` becomes `DeltaWing`.
pub fn label_for(identifier: &str) -> String {
    let words: Vec<&str> = identifier.split('_').filter(|w| !w.is_empty()).collect();
    title_case(&words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_case_and_separators() {
        assert_eq!(
            sanitize_component("P001-ASM-001_Main_R1.dwg"),
            "P001-ASM-001_Main_R1.dwg"
        );
        assert_eq!(sanitize_component("Delta Wing"), "Delta_Wing");
    }

    #[test]
    fn test_sanitize_special_chars() {
        assert_eq!(sanitize_component("model/test:file"), "modeltestfile");
        assert_eq!(sanitize_component("a<>b"), "ab");
        assert_eq!(sanitize_component("a#b"), "a_b");
    }

    #[test]
    fn test_sanitize_consecutive_separators() {
        assert_eq!(sanitize_component("a___b"), "a_b");
        assert_eq!(sanitize_component("a--b"), "a-b");
        assert_eq!(sanitize_component("--a--"), "a");
    }

    #[test]
    fn test_sanitize_reserved_and_empty() {
        assert_eq!(sanitize_component("CON"), "CON_file");
        assert_eq!(sanitize_component("nul.txt"), "nul_file.txt");
        assert_eq!(sanitize_component(""), "unnamed");
        assert_eq!(sanitize_component("???"), "unnamed");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "a".repeat(300);
        assert!(sanitize_component(&long).len() <= MAX_COMPONENT_LENGTH);
    }

    #[test]
    fn test_noise_list() {
        for word in ["final", "actualfinal", "latest", "copy", "draft", "rev", "rev2", "r1", "v2", "v1.2"] {
            assert!(is_noise_word(word), "{} should be noise", word);
        }
        for word in ["beta", "assembly", "del", "housing"] {
            assert!(!is_noise_word(word), "{} should not be noise", word);
        }
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("DEL"), Some("del".into()));
        assert_eq!(normalize_identifier("BetaFINAL"), Some("beta".into()));
        assert_eq!(normalize_identifier("Final"), None);
        assert_eq!(normalize_identifier("v2"), None);
    }

    #[test]
    fn test_folder_identity() {
        assert_eq!(folder_identity("ProjectBeta_2016"), FolderIdentity::Project("beta".into()));
        assert_eq!(folder_identity("GAMMA-2017-Files"), FolderIdentity::Project("gamma".into()));
        assert_eq!(folder_identity("Delta_Project"), FolderIdentity::Project("delta".into()));
        assert_eq!(folder_identity("2019_ProjectEcho"), FolderIdentity::Project("echo".into()));
        assert_eq!(folder_identity("TempFolder"), FolderIdentity::Orphan);
        assert_eq!(folder_identity("Archive_Old"), FolderIdentity::Orphan);
        assert_eq!(folder_identity("2018Projects"), FolderIdentity::Empty);
    }

    #[test]
    fn test_labels() {
        assert_eq!(label_for("delta"), "Delta");
        assert_eq!(label_for("delta_wing"), "DeltaWing");
        assert_eq!(title_case(&["bill", "of", "materials"]), "BillOfMaterials");
    }
}
