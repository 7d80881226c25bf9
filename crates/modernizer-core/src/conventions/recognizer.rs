//! Convention pattern inference.
//!
//! Files are grouped per folder cohort by their token-type signature. A
//! signature that covers enough of its cohort becomes a template; each
//! position gets a semantic role, and constant positions keep their literal.
//! Identical templates from different cohorts merge into one pattern.

use super::tokenizer::{self, Token, TokenType};
use crate::catalog::{Catalog, FileId};
use crate::config::RecognitionConfig;
use crate::context::RunContext;
use crate::error::Warning;
use crate::naming;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// Constant words that mark a document type rather than a project.
const DOCUMENT_TYPE_WORDS: &[&str] = &[
    "dwg", "drw", "asm", "prt", "part", "bom", "spec", "specs", "doc", "pdf", "xls", "xlsx",
];

/// Thresholds for registering a template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognizerConfig {
    /// Minimum number of cohort files a template must cover.
    pub min_support: usize,
    /// Minimum share of its cohort a template must cover, in `[0, 1]`.
    pub min_coverage: f64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            min_support: RecognitionConfig::MIN_SUPPORT,
            min_coverage: RecognitionConfig::MIN_COVERAGE,
        }
    }
}

impl RecognizerConfig {
    pub fn with_min_support(mut self, min_support: usize) -> Self {
        self.min_support = min_support.max(1);
        self
    }

    pub fn with_min_coverage(mut self, min_coverage: f64) -> Self {
        self.min_coverage = min_coverage.clamp(0.0, 1.0);
        self
    }
}

/// Semantic role of a template slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotRole {
    Prefix,
    ProjectId,
    Sequence,
    Date,
    Revision,
    Description,
}

impl SlotRole {
    fn placeholder(self) -> &'static str {
        match self {
            SlotRole::Prefix => "{prefix}",
            SlotRole::ProjectId => "{project_id}",
            SlotRole::Sequence => "{sequence}",
            SlotRole::Date => "{date}",
            SlotRole::Revision => "{revision}",
            SlotRole::Description => "{description}",
        }
    }
}

/// One position of a template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub token_type: TokenType,
    pub role: SlotRole,
    /// Constant value at this position; matching files must carry it.
    pub literal: Option<String>,
}

impl Slot {
    fn accepts(&self, token: &Token) -> bool {
        token.token_type == self.token_type
            && self
                .literal
                .as_ref()
                .map_or(true, |lit| lit.eq_ignore_ascii_case(&token.text))
    }

    fn merge_key(&self) -> (TokenType, SlotRole, Option<String>) {
        (
            self.token_type,
            self.role,
            self.literal.as_ref().map(|l| l.to_lowercase()),
        )
    }
}

/// Registration index of a pattern; lower was registered earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(pub usize);

/// A registered naming convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConventionPattern {
    pub id: PatternId,
    /// Human-readable template, e.g. `DEL_PRT_{sequence}_{description}`.
    pub name: String,
    pub slots: Vec<Slot>,
    /// Files that produced the template, summed over merged cohorts.
    pub support: usize,
    /// Files in the contributing cohorts.
    pub cohort_size: usize,
    pub cohorts: Vec<PathBuf>,
}

impl ConventionPattern {
    /// `support / cohort_size`.
    pub fn confidence(&self) -> f64 {
        if self.cohort_size == 0 {
            0.0
        } else {
            self.support as f64 / self.cohort_size as f64
        }
    }

    /// Exact comparison of confidences, free of float rounding.
    fn cmp_confidence(&self, other: &Self) -> Ordering {
        let lhs = self.support as u128 * other.cohort_size as u128;
        let rhs = other.support as u128 * self.cohort_size as u128;
        lhs.cmp(&rhs)
    }

    pub fn matches(&self, tokens: &[Token]) -> bool {
        tokens.len() == self.slots.len()
            && self.slots.iter().zip(tokens).all(|(s, t)| s.accepts(t))
    }

    /// Position of the first slot with a role.
    pub fn position_of(&self, role: SlotRole) -> Option<usize> {
        self.slots.iter().position(|s| s.role == role)
    }
}

impl fmt::Display for ConventionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (support {}/{}, confidence {:.2})",
            self.name,
            self.support,
            self.cohort_size,
            self.confidence()
        )
    }
}

/// The best pattern for a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: PatternId,
    pub confidence: f64,
    /// Other patterns that tied on confidence.
    pub tied_with: Vec<PatternId>,
}

/// Output of recognition: registered patterns and per-file results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recognition {
    patterns: Vec<ConventionPattern>,
    tokens: Vec<Vec<Token>>,
    matches: Vec<Option<PatternMatch>>,
}

impl Recognition {
    pub fn patterns(&self) -> &[ConventionPattern] {
        &self.patterns
    }

    pub fn pattern(&self, id: PatternId) -> Option<&ConventionPattern> {
        self.patterns.get(id.0)
    }

    pub fn tokens(&self, file: FileId) -> &[Token] {
        self.tokens.get(file.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn match_for(&self, file: FileId) -> Option<&PatternMatch> {
        self.matches.get(file.0).and_then(Option::as_ref)
    }

    /// The token at a role of the file's best pattern.
    pub fn role_token(&self, file: FileId, role: SlotRole) -> Option<&Token> {
        let m = self.match_for(file)?;
        let position = self.pattern(m.pattern)?.position_of(role)?;
        self.tokens(file).get(position)
    }

    /// Normalized PROJECT_ID of the file's best pattern.
    pub fn project_identifier(&self, file: FileId) -> Option<String> {
        self.role_token(file, SlotRole::ProjectId)
            .and_then(|t| naming::normalize_identifier(&t.text))
    }

    /// Revision carried by the file name, if any.
    pub fn revision(&self, file: FileId) -> Option<tokenizer::Revision> {
        if let Some(token) = self.role_token(file, SlotRole::Revision) {
            return tokenizer::parse_revision(&token.text);
        }
        self.tokens(file)
            .iter()
            .rev()
            .find_map(|t| tokenizer::parse_revision(&t.text))
    }

    /// Number of files resolved to each pattern, in registration order.
    pub fn distribution(&self) -> Vec<(PatternId, usize)> {
        let mut counts = vec![0usize; self.patterns.len()];
        for m in self.matches.iter().flatten() {
            counts[m.pattern.0] += 1;
        }
        counts
            .into_iter()
            .enumerate()
            .map(|(i, c)| (PatternId(i), c))
            .collect()
    }

    pub fn unmatched_count(&self) -> usize {
        self.matches.iter().filter(|m| m.is_none()).count()
    }
}

/// Infers convention patterns from a catalog.
#[derive(Debug, Clone, Default)]
pub struct Recognizer {
    config: RecognizerConfig,
}

impl Recognizer {
    pub fn new(config: RecognizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    pub fn recognize(&self, catalog: &Catalog, ctx: &mut RunContext) -> Recognition {
        let tokens: Vec<Vec<Token>> = catalog
            .iter()
            .map(|r| tokenizer::tokenize(&r.stem))
            .collect();

        // Cohorts in first-seen order.
        let mut cohort_order: Vec<PathBuf> = Vec::new();
        let mut cohorts: HashMap<PathBuf, Vec<FileId>> = HashMap::new();
        for record in catalog.iter() {
            cohorts
                .entry(record.folder.clone())
                .or_insert_with(|| {
                    cohort_order.push(record.folder.clone());
                    Vec::new()
                })
                .push(record.id);
        }

        let mut patterns: Vec<ConventionPattern> = Vec::new();
        let mut by_key: HashMap<Vec<(TokenType, SlotRole, Option<String>)>, usize> =
            HashMap::new();

        for folder in &cohort_order {
            let members = &cohorts[folder];
            for (slots, support) in self.cohort_templates(members, &tokens) {
                let key: Vec<_> = slots.iter().map(Slot::merge_key).collect();
                match by_key.get(&key) {
                    Some(&index) => {
                        let pattern = &mut patterns[index];
                        pattern.support += support;
                        pattern.cohort_size += members.len();
                        pattern.cohorts.push(folder.clone());
                    }
                    None => {
                        let id = PatternId(patterns.len());
                        by_key.insert(key, id.0);
                        patterns.push(ConventionPattern {
                            id,
                            name: template_name(&slots),
                            slots,
                            support,
                            cohort_size: members.len(),
                            cohorts: vec![folder.clone()],
                        });
                    }
                }
            }
        }

        for pattern in &patterns {
            debug!("Registered pattern {}", pattern);
        }

        let mut matches = Vec::with_capacity(tokens.len());
        for record in catalog.iter() {
            let file_tokens = &tokens[record.id.0];
            let mut best: Vec<&ConventionPattern> = Vec::new();
            for pattern in patterns.iter().filter(|p| p.matches(file_tokens)) {
                match best.first().map(|b| pattern.cmp_confidence(b)) {
                    None | Some(Ordering::Equal) => best.push(pattern),
                    Some(Ordering::Greater) => best = vec![pattern],
                    Some(Ordering::Less) => {}
                }
            }

            let Some(chosen) = best.first() else {
                matches.push(None);
                continue;
            };
            if best.len() > 1 {
                ctx.warn(Warning::PatternAmbiguity {
                    path: record.source_path.clone(),
                    candidates: best.iter().map(|p| p.name.clone()).collect(),
                    chosen: chosen.name.clone(),
                });
            }
            matches.push(Some(PatternMatch {
                pattern: chosen.id,
                confidence: chosen.confidence(),
                tied_with: best[1..].iter().map(|p| p.id).collect(),
            }));
        }

        let recognition = Recognition {
            patterns,
            tokens,
            matches,
        };
        info!(
            "Recognized {} patterns; {} of {} files unmatched",
            recognition.patterns.len(),
            recognition.unmatched_count(),
            catalog.len()
        );
        recognition
    }

    /// Templates registered by one cohort, with their support.
    fn cohort_templates(&self, members: &[FileId], tokens: &[Vec<Token>]) -> Vec<(Vec<Slot>, usize)> {
        let mut order: Vec<Vec<TokenType>> = Vec::new();
        let mut groups: HashMap<Vec<TokenType>, Vec<FileId>> = HashMap::new();
        for &id in members {
            let signature: Vec<TokenType> = tokens[id.0].iter().map(|t| t.token_type).collect();
            if signature.is_empty() {
                continue;
            }
            groups
                .entry(signature.clone())
                .or_insert_with(|| {
                    order.push(signature);
                    Vec::new()
                })
                .push(id);
        }

        let mut templates = Vec::new();
        for signature in order {
            let group = &groups[&signature];
            let coverage = group.len() as f64 / members.len() as f64;
            if group.len() < self.config.min_support || coverage < self.config.min_coverage {
                continue;
            }
            let rows: Vec<&[Token]> = group.iter().map(|id| tokens[id.0].as_slice()).collect();
            templates.push((derive_slots(&signature, &rows), group.len()));
        }
        templates
    }
}

/// Assign roles to each position of a signature group.
fn derive_slots(signature: &[TokenType], rows: &[&[Token]]) -> Vec<Slot> {
    let mut slots = Vec::with_capacity(signature.len());
    let mut have_project_id = false;

    for (position, &token_type) in signature.iter().enumerate() {
        let column: Vec<&Token> = rows.iter().map(|row| &row[position]).collect();
        let first = &column[0].text;
        let constant = column.iter().all(|t| t.text.eq_ignore_ascii_case(first));
        let all_revisions = column
            .iter()
            .all(|t| tokenizer::parse_revision(&t.text).is_some());

        let (role, literal) = if all_revisions {
            (SlotRole::Revision, None)
        } else if token_type == TokenType::DateLike {
            (SlotRole::Date, None)
        } else if constant && DOCUMENT_TYPE_WORDS.contains(&first.to_lowercase().as_str()) {
            (SlotRole::Prefix, Some(first.clone()))
        } else if constant && !have_project_id && naming::normalize_identifier(first).is_some() {
            have_project_id = true;
            (SlotRole::ProjectId, Some(first.clone()))
        } else if constant {
            (SlotRole::Description, Some(first.clone()))
        } else if token_type == TokenType::Numeric {
            (SlotRole::Sequence, None)
        } else {
            (SlotRole::Description, None)
        };

        slots.push(Slot {
            token_type,
            role,
            literal,
        });
    }
    slots
}

fn template_name(slots: &[Slot]) -> String {
    slots
        .iter()
        .map(|s| match &s.literal {
            Some(lit) => lit.clone(),
            None => s.role.placeholder().to_string(),
        })
        .collect::<Vec<_>>()
        .join("_")
}
