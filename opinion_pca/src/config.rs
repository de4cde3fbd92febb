// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;

use nalgebra::DMatrix;

/// One scorable statement extracted from a survey page.
///
/// A page may group several related statements (A, B, C...) under one
/// survey; each of them is a separate `Question`.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Question {
    /// Global position of this sub-question within the dataset, starting
    /// at 1. Strictly increasing and gap-free across all pages.
    pub sequence_index: u32,
    /// Cleaned display text, already carrying the "(NNN) " numbering prefix.
    pub display_text: String,
    /// The query suffix of the page this sub-question was found on.
    pub url_suffix: String,
}

/// One response as found on a page: a responder and the label they picked
/// for a single sub-question.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Response {
    pub responder_id: String,
    pub responder_name: String,
    pub question_sequence_index: u32,
    pub raw_label: String,
}

// ******** Intermediate data structures *********

/// The responder x question table of raw category labels, as assembled by
/// the [crate::builder::TableBuilder].
///
/// Rows are keyed by responder display name; the external responder id has
/// been split into its own column. A `None` cell means the responder was
/// not seen on the page that carried that sub-question.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ResponseTable {
    pub responder_names: Vec<String>,
    pub responder_ids: Vec<String>,
    pub questions: Vec<Question>,
    /// cells[row][col], in the same order as `responder_names` / `questions`.
    pub cells: Vec<Vec<Option<String>>>,
}

/// Dense numeric matrix after ordinal mapping, completion filtering and
/// mean imputation. No missing cells remain.
#[derive(PartialEq, Debug, Clone)]
pub struct OpinionMatrix {
    pub responder_names: Vec<String>,
    pub responder_ids: Vec<String>,
    pub questions: Vec<Question>,
    /// responders x questions.
    pub values: DMatrix<f64>,
}

/// Eigenpairs of the column covariance matrix, sorted by descending
/// eigenvalue. Vectors are unit-norm and pairwise orthogonal.
#[derive(PartialEq, Debug, Clone)]
pub struct EigenDecomposition {
    /// One eigenvector per column, column k matching `values[k]`.
    pub vectors: DMatrix<f64>,
    /// Descending.
    pub values: Vec<f64>,
}

// ******** Output data structures *********

/// One point of the 2D ideology map.
#[derive(PartialEq, Debug, Clone)]
pub struct MapPoint {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub responder_id: String,
    /// 0-based rank of `x` in ascending order. `None` only for the
    /// synthetic "You" entry.
    pub pc1_rank: Option<usize>,
}

/// The full assembled analysis bundle for one dataset.
///
/// The matrix snapshot, correlation matrix and band vectors are kept as
/// fixed 2-decimal strings; coordinates and weights stay full precision.
#[derive(PartialEq, Debug, Clone)]
pub struct OpinionMap {
    /// The synthetic origin point ("You") first, then one point per
    /// retained responder in matrix row order.
    pub points: Vec<MapPoint>,
    /// Display texts with the zero padding stripped from the numbering
    /// prefix ("(001)" becomes "(1)").
    pub questions: Vec<String>,
    pub q_url_suffixes: Vec<String>,
    /// First principal axis weights, sign-canonicalized.
    pub xweights: Vec<f64>,
    /// Second principal axis weights, sign-canonicalized.
    pub yweights: Vec<f64>,
    /// Column-centered opinion matrix, formatted.
    pub matrix: Vec<Vec<String>>,
    /// Responder x responder Pearson correlation of the raw rows, with
    /// rows and columns ordered by pc1 rank, formatted.
    pub corr_mat: Vec<Vec<String>>,
    /// Per-question mean + 2 standard deviations, formatted.
    pub top_range: Vec<String>,
    /// Per-question mean - 2 standard deviations, formatted.
    pub bot_range: Vec<String>,
}

/// Errors that prevent the analysis from completing successfully.
///
/// All of them are fatal for the dataset being processed: no partial
/// bundle is produced, and retrying cannot change the outcome.
#[derive(PartialEq, Debug, Clone)]
pub enum AnalysisErrors {
    /// A raw label is not covered by the fixed ordinal mapping table.
    UnknownLabel { label: String },
    /// The sign canonicalization vector does not have one entry per axis.
    SignVectorLength { expected: usize, actual: usize },
    /// A sign canonicalization entry is not +1 or -1.
    SignVectorValue { value: f64 },
    /// A question was added out of sequence order.
    NonContiguousQuestion { expected: u32, actual: u32 },
    /// A response record does not belong to the question it was added with.
    MismatchedQuestion { question: u32, response: u32 },
    /// The same responder appears twice within one response series.
    DuplicateResponder { question: u32, name: String },
    /// Too few responders survived the completion filter to compute a
    /// meaningful covariance.
    InsufficientData { responders: usize, questions: usize },
    /// A question column has no numeric values among the retained rows,
    /// so no imputation mean exists for it.
    EmptyQuestionColumn { column: usize },
    /// A question column has zero variance; the covariance matrix is
    /// singular along that axis.
    ZeroVarianceColumn { column: usize },
    /// A responder answered every question identically; the correlation
    /// with that row is undefined.
    ZeroVarianceRow { row: usize },
    /// The covariance matrix lost its symmetry beyond numerical noise;
    /// this indicates a correctness bug upstream.
    AsymmetricCovariance { residual: f64 },
}

impl Error for AnalysisErrors {}

impl Display for AnalysisErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisErrors::UnknownLabel { label } => {
                write!(f, "label not covered by the ordinal mapping: {:?}", label)
            }
            AnalysisErrors::SignVectorLength { expected, actual } => {
                write!(f, "sign vector has {} entries, expected {}", actual, expected)
            }
            AnalysisErrors::SignVectorValue { value } => {
                write!(f, "sign vector entry {} is not +1 or -1", value)
            }
            AnalysisErrors::NonContiguousQuestion { expected, actual } => {
                write!(
                    f,
                    "question sequence {} added where {} was expected",
                    actual, expected
                )
            }
            AnalysisErrors::MismatchedQuestion { question, response } => {
                write!(
                    f,
                    "response for sequence {} added under question {}",
                    response, question
                )
            }
            AnalysisErrors::DuplicateResponder { question, name } => {
                write!(
                    f,
                    "responder {:?} appears twice for question {}",
                    name, question
                )
            }
            AnalysisErrors::InsufficientData {
                responders,
                questions,
            } => {
                write!(
                    f,
                    "{} responders left after filtering for {} questions",
                    responders, questions
                )
            }
            AnalysisErrors::EmptyQuestionColumn { column } => {
                write!(f, "question column {} has no numeric responses", column)
            }
            AnalysisErrors::ZeroVarianceColumn { column } => {
                write!(f, "question column {} has zero variance", column)
            }
            AnalysisErrors::ZeroVarianceRow { row } => {
                write!(f, "responder row {} has zero variance", row)
            }
            AnalysisErrors::AsymmetricCovariance { residual } => {
                write!(f, "covariance matrix asymmetric (residual {:e})", residual)
            }
        }
    }
}

// ********* Configuration **********

/// Options governing one analysis run.
#[derive(PartialEq, Debug, Clone)]
pub struct AnalysisOptions {
    /// A responder is retained only if their answered fraction is
    /// strictly greater than this threshold.
    pub completion_threshold: f64,
    /// Per-axis sign multipliers (+1 or -1), one per projection axis.
    /// Eigenvector sign is mathematically arbitrary; this external value
    /// pins the output orientation. It is never derived from the data.
    pub axis_signs: Vec<f64>,
}

impl Default for AnalysisOptions {
    fn default() -> AnalysisOptions {
        AnalysisOptions {
            completion_threshold: 0.75,
            // Flip both axes so that physically left reads as politically left.
            axis_signs: vec![-1.0, -1.0],
        }
    }
}
