//! Transformation rules: taxonomy, classifier and naming templates.
//!
//! Rules are a JSON document. Missing fields take the defaults below, which
//! reproduce the standard engineering layout (P-codes, `Drawings`,
//! `Documentation`, `BOM`, `Misc`).

use super::template::{
    NamingTemplate, FILENAME_REQUIRED, FILENAME_SLOTS, FOLDER_REQUIRED, FOLDER_SLOTS,
};
use crate::catalog::FileRecord;
use crate::{ModernizerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_FILENAME_TEMPLATE: &str =
    "{project_code}-{category_tag}-{sequence}_{description}_{revision}.{ext}";
pub const DEFAULT_FOLDER_TEMPLATE: &str = "{project_code}_{label}_{year}";

/// One classifier category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    /// Lowercased extensions without dots. Ignored for the fallback.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Any of these (lowercase) in the file name selects the category.
    /// Empty means any name.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Taxonomy path relative to the project folder.
    pub folder: String,
    pub tag: String,
    /// Used when cleaning leaves no meaningful description.
    #[serde(default = "default_description")]
    pub default_description: String,
    /// Overrides the rule-wide filename template.
    #[serde(default)]
    pub filename_template: Option<String>,
    /// Catches every file no other category takes.
    #[serde(default)]
    pub fallback: bool,
}

fn default_description() -> String {
    "File".to_string()
}

impl CategoryRule {
    fn new(
        name: &str,
        extensions: &[&str],
        keywords: &[&str],
        folder: &str,
        tag: &str,
        default_description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            folder: folder.to_string(),
            tag: tag.to_string(),
            default_description: default_description.to_string(),
            filename_template: None,
            fallback: false,
        }
    }

    fn accepts(&self, record: &FileRecord) -> bool {
        if self.fallback {
            return true;
        }
        if !self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&record.extension)) {
            return false;
        }
        let name = record.file_name.to_lowercase();
        self.keywords.is_empty() || self.keywords.iter().any(|k| name.contains(&k.to_lowercase()))
    }
}

/// The full rule document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformationRules {
    pub project_prefix: String,
    pub unassigned_prefix: String,
    pub code_digits: usize,
    pub sequence_digits: usize,
    /// Revision rendering; must contain `{number}`.
    pub revision_format: String,
    pub projects_root: String,
    pub unassigned_root: String,
    pub project_folder_template: String,
    pub filename_template: String,
    pub description_max_len: usize,
    /// Ordered; the first accepting category wins.
    pub categories: Vec<CategoryRule>,
}

impl Default for TransformationRules {
    fn default() -> Self {
        let mut misc = CategoryRule::new("misc", &[], &[], "Misc", "MISC", "File");
        misc.fallback = true;
        Self {
            project_prefix: "P".into(),
            unassigned_prefix: "U".into(),
            code_digits: 3,
            sequence_digits: 3,
            revision_format: "R{number}".into(),
            projects_root: "Projects".into(),
            unassigned_root: "Unassigned".into(),
            project_folder_template: DEFAULT_FOLDER_TEMPLATE.into(),
            filename_template: DEFAULT_FILENAME_TEMPLATE.into(),
            description_max_len: 30,
            categories: vec![
                CategoryRule::new(
                    "assembly",
                    &["dwg"],
                    &["assembly", "asm", "main"],
                    "Drawings",
                    "ASM",
                    "MainAssembly",
                ),
                CategoryRule::new("part", &["dwg"], &[], "Drawings", "PRT", "Component"),
                CategoryRule::new(
                    "specification",
                    &["pdf"],
                    &["spec", "requirement", "standard"],
                    "Documentation",
                    "SPEC",
                    "Specification",
                ),
                CategoryRule::new(
                    "document",
                    &["pdf", "doc", "docx", "txt", "md"],
                    &[],
                    "Documentation",
                    "DOC",
                    "Document",
                ),
                CategoryRule::new(
                    "bom",
                    &["xlsx", "xls"],
                    &["bom", "bill", "material"],
                    "BOM",
                    "BOM",
                    "BillOfMaterials",
                ),
                CategoryRule::new(
                    "data",
                    &["xlsx", "xls", "csv"],
                    &[],
                    "BOM",
                    "DATA",
                    "DataSheet",
                ),
                misc,
            ],
        }
    }
}

impl TransformationRules {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ModernizerError::Json {
            message: format!("Invalid rules document: {}", e),
            source: Some(e),
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ModernizerError::io_with_path(e, path))?;
        Self::from_json_str(&contents)
    }

    /// Validate the rules and compile their templates.
    pub fn compile(&self) -> Result<CompiledRules> {
        if self.code_digits == 0 || self.code_digits > 9 {
            return Err(ModernizerError::rule(format!(
                "code_digits must be between 1 and 9, got {}",
                self.code_digits
            )));
        }
        if self.sequence_digits == 0 || self.sequence_digits > 9 {
            return Err(ModernizerError::rule(format!(
                "sequence_digits must be between 1 and 9, got {}",
                self.sequence_digits
            )));
        }
        for (field, prefix) in [
            ("project_prefix", &self.project_prefix),
            ("unassigned_prefix", &self.unassigned_prefix),
        ] {
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ModernizerError::rule(format!(
                    "{} must be non-empty ASCII alphanumerics, got '{}'",
                    field, prefix
                )));
            }
        }
        if self.project_prefix.eq_ignore_ascii_case(&self.unassigned_prefix) {
            return Err(ModernizerError::rule(
                "project_prefix and unassigned_prefix must differ",
            ));
        }
        if !self.revision_format.contains("{number}") {
            return Err(ModernizerError::rule(format!(
                "revision_format '{}' is missing {{number}}",
                self.revision_format
            )));
        }
        if !is_portable(&self.revision_format.replace("{number}", "")) {
            return Err(ModernizerError::rule(format!(
                "revision_format '{}' contains characters unsafe in file names",
                self.revision_format
            )));
        }
        if self.description_max_len == 0 {
            return Err(ModernizerError::rule("description_max_len must be positive"));
        }

        let projects_root = relative_path("projects_root", &self.projects_root)?;
        let unassigned_root = relative_path("unassigned_root", &self.unassigned_root)?;
        if projects_root == unassigned_root {
            return Err(ModernizerError::rule(
                "projects_root and unassigned_root must differ",
            ));
        }
        let folder_template =
            NamingTemplate::parse(&self.project_folder_template, FOLDER_SLOTS, FOLDER_REQUIRED)?;

        let mut names = HashSet::new();
        let mut fallback = None;
        let mut categories = Vec::with_capacity(self.categories.len());
        for (index, category) in self.categories.iter().enumerate() {
            if category.name.trim().is_empty() {
                return Err(ModernizerError::rule("category with an empty name"));
            }
            if !names.insert(category.name.to_lowercase()) {
                return Err(ModernizerError::rule(format!(
                    "duplicate category '{}'",
                    category.name
                )));
            }
            if category.fallback {
                if fallback.is_some() {
                    return Err(ModernizerError::rule("more than one fallback category"));
                }
                fallback = Some(index);
            } else if category.extensions.is_empty() {
                return Err(ModernizerError::rule(format!(
                    "category '{}' lists no extensions and is not the fallback",
                    category.name
                )));
            }
            if !category.tag.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ModernizerError::rule(format!(
                    "category '{}' tag '{}' must be ASCII alphanumerics",
                    category.name, category.tag
                )));
            }
            let folder = relative_path(&format!("category '{}' folder", category.name), &category.folder)?;
            let source = category
                .filename_template
                .as_deref()
                .unwrap_or(&self.filename_template);
            let template = NamingTemplate::parse(source, FILENAME_SLOTS, FILENAME_REQUIRED)?;
            if let Some(bad) = template.literals().find(|l| !is_portable(l)) {
                return Err(ModernizerError::rule(format!(
                    "template '{}' literal '{}' contains characters unsafe in file names",
                    source, bad
                )));
            }
            categories.push(CompiledCategory {
                rule: category.clone(),
                folder,
                template,
            });
        }
        let fallback = fallback.ok_or_else(|| ModernizerError::rule("no fallback category"))?;

        Ok(CompiledRules {
            rules: self.clone(),
            projects_root,
            unassigned_root,
            folder_template,
            categories,
            fallback,
        })
    }
}

/// Whether every character is safe in a file name without sanitizing.
fn is_portable(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Check a taxonomy path: relative, no `..`, not empty.
fn relative_path(what: &str, raw: &str) -> Result<PathBuf> {
    let path = PathBuf::from(raw);
    if raw.trim().is_empty() {
        return Err(ModernizerError::rule(format!("{} is empty", what)));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(ModernizerError::rule(format!(
                    "{} '{}' must be a relative path without '..'",
                    what, raw
                )))
            }
        }
    }
    Ok(path)
}

/// A category with its compiled template and checked folder.
#[derive(Debug, Clone)]
pub struct CompiledCategory {
    pub rule: CategoryRule,
    pub folder: PathBuf,
    pub template: NamingTemplate,
}

/// Validated rules, ready for planning.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    pub rules: TransformationRules,
    pub projects_root: PathBuf,
    pub unassigned_root: PathBuf,
    pub folder_template: NamingTemplate,
    pub categories: Vec<CompiledCategory>,
    fallback: usize,
}

impl CompiledRules {
    /// Index of the category a file belongs to.
    pub fn classify(&self, record: &FileRecord) -> usize {
        self.categories
            .iter()
            .position(|c| !c.rule.fallback && c.rule.accepts(record))
            .unwrap_or(self.fallback)
    }

    pub fn category(&self, index: usize) -> Option<&CompiledCategory> {
        self.categories.get(index)
    }

    pub fn category_by_name(&self, name: &str) -> Option<&CompiledCategory> {
        self.categories
            .iter()
            .find(|c| c.rule.name.eq_ignore_ascii_case(name))
    }

    pub fn format_revision(&self, number: u32) -> String {
        self.rules
            .revision_format
            .replace("{number}", &number.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use chrono::Utc;

    fn classify(rules: &CompiledRules, name: &str) -> String {
        let catalog = Catalog::from_listing("/a", vec![(PathBuf::from(name), 1, Utc::now())]);
        let index = rules.classify(&catalog.records()[0]);
        rules.categories[index].rule.name.clone()
    }

    #[test]
    fn test_default_classifier() {
        let rules = TransformationRules::default().compile().unwrap();
        assert_eq!(classify(&rules, "DWG_MainAssembly_v2.dwg"), "assembly");
        assert_eq!(classify(&rules, "DEL-PRT-002_Shaft.dwg"), "part");
        assert_eq!(classify(&rules, "ECHO_SPECIFICATIONS_FINAL.pdf"), "specification");
        assert_eq!(classify(&rules, "gamma_notes.txt"), "document");
        assert_eq!(classify(&rules, "Beta_BOM_v1.xlsx"), "bom");
        assert_eq!(classify(&rules, "random_calc.xlsx"), "data");
        assert_eq!(classify(&rules, "photo.JPG"), "misc");
        assert_eq!(classify(&rules, "Makefile"), "misc");
    }

    #[test]
    fn test_rules_load_from_partial_json() {
        let rules = TransformationRules::from_json_str(r#"{"project_prefix": "PRJ"}"#).unwrap();
        assert_eq!(rules.project_prefix, "PRJ");
        assert_eq!(rules.categories.len(), 7);
        assert!(rules.compile().is_ok());
    }

    #[test]
    fn test_rules_round_trip_through_json() {
        let rules = TransformationRules::default();
        let json = serde_json::to_string(&rules).unwrap();
        assert_eq!(TransformationRules::from_json_str(&json).unwrap(), rules);
    }

    #[test]
    fn test_malformed_rules_are_rejected() {
        let base = TransformationRules::default();

        let mut r = base.clone();
        r.filename_template = "{project_code}_{description}.{ext}".into();
        assert!(matches!(r.compile(), Err(ModernizerError::UnresolvableRule { .. })));

        let mut r = base.clone();
        r.categories[0].folder = "../outside".into();
        assert!(r.compile().is_err());

        let mut r = base.clone();
        r.categories[0].folder = "/abs".into();
        assert!(r.compile().is_err());

        let mut r = base.clone();
        r.categories[1].name = "Assembly".into();
        assert!(r.compile().is_err());

        let mut r = base.clone();
        r.categories.pop();
        assert!(r.compile().is_err());

        let mut r = base.clone();
        r.code_digits = 0;
        assert!(r.compile().is_err());

        let mut r = base.clone();
        r.code_digits = 10;
        assert!(r.compile().is_err());

        let mut r = base.clone();
        r.revision_format = "Rev".into();
        assert!(r.compile().is_err());

        let mut r = base.clone();
        r.filename_template = "{project_code} {sequence}.{ext}".into();
        assert!(r.compile().is_err());

        let mut r = base;
        r.categories[2].filename_template = Some("{project_code}-{sequence}-{owner}.{ext}".into());
        assert!(r.compile().is_err());
    }

    #[test]
    fn test_category_template_override() {
        let mut rules = TransformationRules::default();
        rules.categories[4].filename_template =
            Some("{project_code}_BOM_{sequence}.{ext}".into());
        let compiled = rules.compile().unwrap();
        let bom = compiled.category_by_name("bom").unwrap();
        assert_eq!(bom.template.source(), "{project_code}_BOM_{sequence}.{ext}");
        assert_eq!(compiled.format_revision(3), "R3");
    }
}
