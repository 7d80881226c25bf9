//! Description cleaning for generated file names.

use crate::conventions::tokenizer;
use crate::naming;

/// Minimum length of a cleaned description before the category default
/// takes over.
const MIN_DESCRIPTION_LEN: usize = 3;

/// Generic words that describe the archive, not the file.
const GENERIC_WORDS: &[&str] = &["project", "projects"];

/// Build a TitleCase description from a file stem.
///
/// Revision markers, noise words, file-type words, project identifier words
/// and pure numbers are dropped, as is a leading 2-4 letter uppercase code.
/// Only ASCII alphanumerics survive. A result shorter than three characters
/// is replaced by `fallback`.
pub fn describe(stem: &str, identifier_words: &[&str], fallback: &str, max_len: usize) -> String {
    let words = tokenizer::split_words(stem);

    let kept: Vec<String> = words
        .iter()
        .enumerate()
        .filter(|(i, w)| {
            let leading_code = *i == 0
                && (2..=4).contains(&w.len())
                && w.chars().all(|c| c.is_ascii_uppercase());
            !leading_code
        })
        .map(|(_, w)| w.chars().filter(char::is_ascii_alphanumeric).collect::<String>())
        .filter(|w| !w.is_empty())
        .filter(|w| {
            let folded = w.to_lowercase();
            !naming::is_noise_word(&folded)
                && !naming::TYPE_WORDS.contains(&folded.as_str())
                && !GENERIC_WORDS.contains(&folded.as_str())
                && !identifier_words.contains(&folded.as_str())
                && !folded.chars().all(|c| c.is_ascii_digit())
        })
        .collect();

    let mut description = naming::title_case(&kept);
    if description.len() < MIN_DESCRIPTION_LEN {
        description = fallback.chars().filter(char::is_ascii_alphanumeric).collect();
    }
    description.truncate(max_len);
    description
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(stem: &str, ids: &[&str], fallback: &str) -> String {
        describe(stem, ids, fallback, 30)
    }

    #[test]
    fn test_descriptions_from_legacy_names() {
        assert_eq!(d("GAM_001_MainFrame", &["gam", "gamma"], "Component"), "MainFrame");
        assert_eq!(d("DEL-PRT-002_Shaft", &["del", "delta"], "Component"), "Shaft");
        assert_eq!(d("DWG_MainAssembly_v2_FINAL", &["alpha"], "MainAssembly"), "Main");
        assert_eq!(
            d("ProjectBeta_Specifications_Final", &["beta"], "Specification"),
            "Specifications"
        );
        assert_eq!(d("Beta_SubAssy_A_R1", &["beta"], "MainAssembly"), "SubAssyA");
    }

    #[test]
    fn test_fallback_when_nothing_left() {
        assert_eq!(d("Beta_Assembly_R1", &["beta"], "MainAssembly"), "MainAssembly");
        assert_eq!(d("DEL-ASM-001", &["delta"], "MainAssembly"), "MainAssembly");
        assert_eq!(d("001", &[], "Component"), "Component");
    }

    #[test]
    fn test_truncates() {
        let long = "supplier_contact_list_for_the_whole_northern_region";
        assert_eq!(describe(long, &[], "File", 30).len(), 30);
    }

    #[test]
    fn test_non_ascii_dropped() {
        assert_eq!(d("Gehäuse_Deckel", &[], "Component"), "GehuseDeckel");
    }
}
