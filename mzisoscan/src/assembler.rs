//! Materialize accepted pattern matches into a new, annotated feature table
use std::collections::btree_map::{BTreeMap, Entry};

use tracing::debug;

use crate::feature::{FeatureRow, Polarity, RowId, RowIndex};
use crate::isotopic_model::{round_half_up, TheoreticalPattern};
use crate::resolver::PatternMatch;
use crate::scorer::{DetectedPeak, ScoreType};
use crate::tolerance::ppm_error;

/// Append `addition` to `comment` separated by a space, unless it is already present
pub fn append_comment(comment: &mut Option<String>, addition: &str) {
    match comment {
        Some(existing) if existing.contains(addition) => {}
        Some(existing) if !existing.is_empty() => {
            existing.push(' ');
            existing.push_str(addition);
        }
        _ => *comment = Some(addition.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RowRole {
    Parent,
    Child,
}

/// A copy of an input row carrying the isotope pattern it was assigned to
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnnotatedRow {
    pub row: FeatureRow,
    pub role: RowRole,
    /// The pivot row of the pattern this row was first assigned to
    pub parent: RowId,
    pub theoretical: TheoreticalPattern,
    pub detected: Vec<DetectedPeak>,
    pub score: ScoreType,
}

/// The output of a scan run. The input table is never modified.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnnotatedFeatureTable {
    pub name: String,
    pub polarity: Polarity,
    #[cfg_attr(feature = "serde", serde(default))]
    pub raw_files: Vec<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub applied_methods: Vec<String>,
    /// Rows in ascending id order
    pub rows: Vec<AnnotatedRow>,
}

impl AnnotatedFeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: RowId) -> Option<&AnnotatedRow> {
        self.rows
            .binary_search_by(|r| r.row.id.cmp(&id))
            .ok()
            .map(|i| &self.rows[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AnnotatedRow> {
        self.rows.iter()
    }

    pub fn parents(&self) -> impl Iterator<Item = &AnnotatedRow> {
        self.rows.iter().filter(|r| r.role == RowRole::Parent)
    }
}

/// What the assembler needs to know about the run that produced the matches
#[derive(Debug, Clone, Default)]
pub struct AssemblyContext {
    pub name: String,
    pub polarity: Polarity,
    pub raw_files: Vec<String>,
    pub applied_methods: Vec<String>,
    /// Whether more than one composition was tried, adding a `BestPattern` note to parents
    pub multiple_compositions: bool,
}

fn parent_comments(m: &PatternMatch, multiple_compositions: bool) -> Vec<String> {
    let mut notes = vec![format!("{}--IS PARENT--", m.pivot)];
    if multiple_compositions {
        notes.push(format!("BestPattern: {}", m.pattern));
    }
    notes.push(format!("Intensity ratios: {}", m.pattern.intensity_ratios()));
    let score = round_half_up(m.score, 3);
    if m.averaged {
        notes.push(format!("Avg pattern rating: {score:.3}"));
    } else {
        notes.push(format!("pattern rating: {score:.3}"));
    }
    notes
}

fn child_comment(m: &PatternMatch, slot: usize) -> Option<String> {
    let candidate = m.candidates.iter().find(|c| c.slot == slot)?;
    let expected = m.mz + m.pattern.slots.get(slot)?.offset;
    let shift = round_half_up(ppm_error(candidate.mz, expected), 2);
    let ratio = if m.intensity > 0.0 {
        round_half_up(candidate.intensity / m.intensity, 2)
    } else {
        0.0
    };
    let mut note = format!(
        "{}-Parent ID m/z-shift(ppm): {shift:.2} I(c)/I(p): {ratio:.2} Identity: {} {} Rating: {:.3}",
        m.pivot,
        m.pattern.composition,
        m.pattern.slots[slot].label,
        round_half_up(candidate.rating, 3),
    );
    if let Some(avg) = candidate.average_rating {
        note.push_str(&format!(" AvgRating: {:.3}", round_half_up(avg, 3)));
    }
    Some(note)
}

fn upsert(
    rows: &mut BTreeMap<RowId, AnnotatedRow>,
    source: &FeatureRow,
    role: RowRole,
    m: &PatternMatch,
    notes: &[String],
) {
    let entry = match rows.entry(source.id) {
        Entry::Vacant(e) => e.insert(AnnotatedRow {
            row: source.clone(),
            role,
            parent: m.pivot,
            theoretical: m.pattern.as_ref().clone(),
            detected: m.detected.clone(),
            score: m.score,
        }),
        Entry::Occupied(e) => {
            let row = e.into_mut();
            if role == RowRole::Parent {
                row.role = RowRole::Parent;
            }
            row
        }
    };
    for note in notes {
        append_comment(&mut entry.row.comment, note);
    }
}

/// Build the output table from `matches`, in order.
///
/// A row assigned to several matches keeps the pattern of the first and accumulates the
/// comments of all of them.
pub fn assemble(matches: &[PatternMatch], index: &RowIndex<'_>, context: &AssemblyContext) -> AnnotatedFeatureTable {
    let mut rows: BTreeMap<RowId, AnnotatedRow> = BTreeMap::new();
    for m in matches {
        let Some(pivot) = index.get(m.pivot) else {
            continue;
        };
        upsert(&mut rows, pivot, RowRole::Parent, m, &parent_comments(m, context.multiple_compositions));
        for c in m.candidates.iter() {
            if c.row == m.pivot {
                continue;
            }
            let Some(child) = index.get(c.row) else {
                continue;
            };
            let notes: Vec<String> = child_comment(m, c.slot).into_iter().collect();
            upsert(&mut rows, child, RowRole::Child, m, &notes);
        }
    }
    debug!("Assembled {} rows from {} matches", rows.len(), matches.len());
    AnnotatedFeatureTable {
        name: context.name.clone(),
        polarity: context.polarity,
        raw_files: context.raw_files.clone(),
        applied_methods: context.applied_methods.clone(),
        rows: rows.into_values().collect(),
    }
}
