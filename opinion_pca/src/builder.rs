use std::collections::{HashMap, HashSet};

use log::debug;

pub use crate::config::*;

/// A builder that folds per-question response series into one
/// [ResponseTable] by outer join on responder identity.
///
/// Until [TableBuilder::finalize] is called, rows are keyed by the
/// composite (responder id, responder name) pair. Each call to
/// [TableBuilder::add_question] is atomic: it validates the whole series
/// before touching the accumulated state, so a page that fails midway
/// commits nothing.
///
/// ```
/// use opinion_pca::builder::TableBuilder;
/// use opinion_pca::{Question, Response};
/// # use opinion_pca::AnalysisErrors;
///
/// let mut builder = TableBuilder::new();
/// let q = Question {
///     sequence_index: 1,
///     display_text: "(001) Question text".to_string(),
///     url_suffix: "SV_abc".to_string(),
/// };
/// builder.add_question(
///     &q,
///     &[Response {
///         responder_id: "17".to_string(),
///         responder_name: "Anna".to_string(),
///         question_sequence_index: 1,
///         raw_label: "Agree".to_string(),
///     }],
/// )?;
/// let table = builder.finalize();
/// assert_eq!(table.responder_names, vec!["Anna".to_string()]);
///
/// # Ok::<(), AnalysisErrors>(())
/// ```
pub struct TableBuilder {
    questions: Vec<Question>,
    row_keys: Vec<(String, String)>,
    row_index: HashMap<(String, String), usize>,
    cells: Vec<Vec<Option<String>>>,
}

impl TableBuilder {
    pub fn new() -> TableBuilder {
        TableBuilder {
            questions: Vec::new(),
            row_keys: Vec::new(),
            row_index: HashMap::new(),
            cells: Vec::new(),
        }
    }

    /// Outer-joins one sub-question's response series onto the table.
    ///
    /// Existing responders gain a new cell (null if absent from this
    /// series); responders seen for the first time are appended as new
    /// rows with nulls for all previously existing columns.
    pub fn add_question(
        &mut self,
        question: &Question,
        responses: &[Response],
    ) -> Result<(), AnalysisErrors> {
        // All validation happens before any mutation.
        let expected = self.questions.len() as u32 + 1;
        if question.sequence_index != expected {
            return Err(AnalysisErrors::NonContiguousQuestion {
                expected,
                actual: question.sequence_index,
            });
        }
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        for r in responses.iter() {
            if r.question_sequence_index != question.sequence_index {
                return Err(AnalysisErrors::MismatchedQuestion {
                    question: question.sequence_index,
                    response: r.question_sequence_index,
                });
            }
            // Identity is the (id, name) pair, same as the join key.
            if !seen.insert((r.responder_id.as_str(), r.responder_name.as_str())) {
                return Err(AnalysisErrors::DuplicateResponder {
                    question: question.sequence_index,
                    name: r.responder_name.clone(),
                });
            }
        }

        let col = self.questions.len();
        self.questions.push(question.clone());
        for row in self.cells.iter_mut() {
            row.push(None);
        }
        for r in responses.iter() {
            let key = (r.responder_id.clone(), r.responder_name.clone());
            let row = match self.row_index.get(&key) {
                Some(idx) => *idx,
                None => {
                    let idx = self.row_keys.len();
                    self.row_keys.push(key.clone());
                    self.row_index.insert(key, idx);
                    self.cells.push(vec![None; col + 1]);
                    idx
                }
            };
            self.cells[row][col] = Some(r.raw_label.clone());
        }
        debug!(
            "add_question: seq {} -> {} rows, {} columns",
            question.sequence_index,
            self.cells.len(),
            self.questions.len()
        );
        Ok(())
    }

    /// Splits the responder id out of the composite row key and returns
    /// the assembled table. The row key becomes the display name alone.
    pub fn finalize(self) -> ResponseTable {
        let responder_ids: Vec<String> = self.row_keys.iter().map(|(id, _)| id.clone()).collect();
        let responder_names: Vec<String> =
            self.row_keys.iter().map(|(_, name)| name.clone()).collect();
        ResponseTable {
            responder_names,
            responder_ids,
            questions: self.questions,
            cells: self.cells,
        }
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}
