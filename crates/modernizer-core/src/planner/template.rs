//! Naming templates: `{slot}` placeholders between literal text.

use crate::{ModernizerError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A placeholder a template may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSlot {
    ProjectCode,
    CategoryTag,
    Sequence,
    Description,
    Revision,
    Ext,
    Label,
    Year,
}

impl TemplateSlot {
    pub fn name(self) -> &'static str {
        match self {
            TemplateSlot::ProjectCode => "project_code",
            TemplateSlot::CategoryTag => "category_tag",
            TemplateSlot::Sequence => "sequence",
            TemplateSlot::Description => "description",
            TemplateSlot::Revision => "revision",
            TemplateSlot::Ext => "ext",
            TemplateSlot::Label => "label",
            TemplateSlot::Year => "year",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "project_code" => TemplateSlot::ProjectCode,
            "category_tag" => TemplateSlot::CategoryTag,
            "sequence" => TemplateSlot::Sequence,
            "description" => TemplateSlot::Description,
            "revision" => TemplateSlot::Revision,
            "ext" => TemplateSlot::Ext,
            "label" => TemplateSlot::Label,
            "year" => TemplateSlot::Year,
            _ => return None,
        })
    }
}

/// Slots of a filename template.
pub const FILENAME_SLOTS: &[TemplateSlot] = &[
    TemplateSlot::ProjectCode,
    TemplateSlot::CategoryTag,
    TemplateSlot::Sequence,
    TemplateSlot::Description,
    TemplateSlot::Revision,
    TemplateSlot::Ext,
];

/// Slots a filename template cannot do without.
pub const FILENAME_REQUIRED: &[TemplateSlot] = &[
    TemplateSlot::ProjectCode,
    TemplateSlot::Sequence,
    TemplateSlot::Ext,
];

/// Slots of a project folder template.
pub const FOLDER_SLOTS: &[TemplateSlot] = &[
    TemplateSlot::ProjectCode,
    TemplateSlot::Label,
    TemplateSlot::Year,
];

pub const FOLDER_REQUIRED: &[TemplateSlot] = &[TemplateSlot::ProjectCode];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(TemplateSlot),
}

/// Values to render a template with. Unset slots render empty.
#[derive(Debug, Clone, Default)]
pub struct SlotValues {
    pub project_code: String,
    pub category_tag: String,
    pub sequence: String,
    pub description: String,
    pub revision: String,
    pub ext: String,
    pub label: String,
    pub year: String,
}

impl SlotValues {
    fn get(&self, slot: TemplateSlot) -> &str {
        match slot {
            TemplateSlot::ProjectCode => &self.project_code,
            TemplateSlot::CategoryTag => &self.category_tag,
            TemplateSlot::Sequence => &self.sequence,
            TemplateSlot::Description => &self.description,
            TemplateSlot::Revision => &self.revision,
            TemplateSlot::Ext => &self.ext,
            TemplateSlot::Label => &self.label,
            TemplateSlot::Year => &self.year,
        }
    }
}

/// A parsed naming template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl NamingTemplate {
    /// Parse a template, accepting only `allowed` slots and demanding every
    /// `required` slot.
    pub fn parse(
        template: &str,
        allowed: &[TemplateSlot],
        required: &[TemplateSlot],
    ) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        match n {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => break,
                            other => name.push(other),
                        }
                    }
                    if !closed {
                        return Err(ModernizerError::rule(format!(
                            "unbalanced '{{' in template '{}'",
                            template
                        )));
                    }
                    let slot = TemplateSlot::from_name(&name)
                        .filter(|s| allowed.contains(s))
                        .ok_or_else(|| {
                            ModernizerError::rule(format!(
                                "unknown slot '{{{}}}' in template '{}'",
                                name, template
                            ))
                        })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot(slot));
                }
                '}' => {
                    return Err(ModernizerError::rule(format!(
                        "unbalanced '}}' in template '{}'",
                        template
                    )))
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let parsed = Self {
            source: template.to_string(),
            segments,
        };
        for slot in required {
            if !parsed.has(*slot) {
                return Err(ModernizerError::rule(format!(
                    "template '{}' is missing required slot {{{}}}",
                    template,
                    slot.name()
                )));
            }
        }
        Ok(parsed)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn has(&self, slot: TemplateSlot) -> bool {
        self.segments.contains(&Segment::Slot(slot))
    }

    /// Literal text of the template.
    pub fn literals(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Literal(l) => Some(l.as_str()),
            Segment::Slot(_) => None,
        })
    }

    pub fn render(&self, values: &SlotValues) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(l) => out.push_str(l),
                Segment::Slot(s) => out.push_str(values.get(*s)),
            }
        }
        out
    }

    /// Regex that reads a rendered name back, with named groups for the
    /// numeric slots (`sequence`, `revision`).
    ///
    /// `revision_format` is the rule's revision format, e.g. `R{number}`.
    pub fn parser(&self, revision_format: &str) -> Result<Regex> {
        let mut pattern = String::from("^");
        let mut seen_sequence = false;
        let mut seen_revision = false;
        for segment in &self.segments {
            match segment {
                Segment::Literal(l) => pattern.push_str(&regex::escape(l)),
                Segment::Slot(TemplateSlot::Sequence) if !seen_sequence => {
                    seen_sequence = true;
                    pattern.push_str(r"(?P<sequence>\d+)");
                }
                Segment::Slot(TemplateSlot::Revision) if !seen_revision => {
                    seen_revision = true;
                    let (before, after) = revision_format
                        .split_once("{number}")
                        .unwrap_or((revision_format, ""));
                    pattern.push_str(&regex::escape(before));
                    pattern.push_str(r"(?P<revision>\d+)");
                    pattern.push_str(&regex::escape(after));
                }
                Segment::Slot(TemplateSlot::Ext) => pattern.push_str(r"[^.]*"),
                Segment::Slot(_) => pattern.push_str(".+?"),
            }
        }
        pattern.push('$');
        Regex::new(&pattern).map_err(|e| {
            ModernizerError::rule(format!(
                "cannot build parser for template '{}': {}",
                self.source, e
            ))
        })
    }
}

impl fmt::Display for NamingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: &str = "{project_code}-{category_tag}-{sequence}_{description}_{revision}.{ext}";

    fn filename(template: &str) -> Result<NamingTemplate> {
        NamingTemplate::parse(template, FILENAME_SLOTS, FILENAME_REQUIRED)
    }

    #[test]
    fn test_render_default_template() {
        let template = filename(DEFAULT).unwrap();
        let values = SlotValues {
            project_code: "P002".into(),
            category_tag: "ASM".into(),
            sequence: "001".into(),
            description: "MainAssembly".into(),
            revision: "R1".into(),
            ext: "dwg".into(),
            ..Default::default()
        };
        assert_eq!(template.render(&values), "P002-ASM-001_MainAssembly_R1.dwg");
    }

    #[test]
    fn test_parser_reads_numbers_back() {
        let template = filename(DEFAULT).unwrap();
        let parser = template.parser("R{number}").unwrap();
        let caps = parser.captures("P002-ASM-002_Main_Frame_R12.dwg").unwrap();
        assert_eq!(&caps["sequence"], "002");
        assert_eq!(&caps["revision"], "12");
        assert!(parser.captures("notes.txt").is_none());
    }

    #[test]
    fn test_missing_required_slot() {
        let err = filename("{project_code}_{description}.{ext}").unwrap_err();
        assert!(err.to_string().contains("{sequence}"));
    }

    #[test]
    fn test_unknown_slot() {
        let err = filename("{project_code}-{sequence}-{owner}.{ext}").unwrap_err();
        assert!(err.to_string().contains("owner"));
        // Folder-only slots are unknown in filenames.
        assert!(filename("{project_code}-{sequence}-{label}.{ext}").is_err());
    }

    #[test]
    fn test_unbalanced_braces() {
        assert!(filename("{project_code-{sequence}.{ext}").is_err());
        assert!(filename("{project_code}}-{sequence}.{ext}").is_err());
        assert!(filename("{project_code}-{sequence}.{ext").is_err());
    }

    #[test]
    fn test_folder_template() {
        let template = NamingTemplate::parse(
            "{project_code}_{label}_{year}",
            FOLDER_SLOTS,
            FOLDER_REQUIRED,
        )
        .unwrap();
        assert!(template.has(TemplateSlot::Year));
        assert!(!template.has(TemplateSlot::Revision));
        let values = SlotValues {
            project_code: "P001".into(),
            label: "Alpha".into(),
            year: "2015".into(),
            ..Default::default()
        };
        assert_eq!(template.render(&values), "P001_Alpha_2015");
    }
}
