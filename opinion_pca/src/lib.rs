mod config;
pub mod builder;

use log::{debug, info};

use nalgebra::{DMatrix, DVector, SymmetricEigen};

pub use crate::config::*;

// Tolerance under which a variance is considered zero.
const VARIANCE_EPS: f64 = 1e-12;
// Largest acceptable |cov - cov^T| entry before the decomposition is
// considered meaningless.
const SYMMETRY_TOL: f64 = 1e-9;

/// Runs the full analysis on an assembled response table: ordinal mapping,
/// completion filtering, imputation, PCA and the 2D projection bundle.
///
/// Arguments:
/// * `table` the finalized response table for one dataset
/// * `options` completion threshold and per-axis sign canonicalization
pub fn run_opinion_analysis(
    table: &ResponseTable,
    options: &AnalysisOptions,
) -> Result<OpinionMap, AnalysisErrors> {
    info!(
        "run_opinion_analysis: {} responders, {} questions",
        table.responder_names.len(),
        table.questions.len()
    );
    check_axis_signs(&options.axis_signs)?;

    let matrix = preprocess(table, options.completion_threshold)?;
    info!(
        "run_opinion_analysis: {} responders retained after completion filter",
        matrix.values.nrows()
    );

    // Column-centering: PCA operates on zero-mean variables (questions).
    // This is distinct from the per-row centering a display layer might
    // apply and must not be conflated with it.
    let centered = center_columns(&matrix.values);
    let cov = covariance(&centered)?;
    let eig = eigen_sorted(cov)?;
    debug!(
        "run_opinion_analysis: leading eigenvalues: {:?}",
        &eig.values[..eig.values.len().min(2)]
    );

    let map = assemble_map(&matrix, &centered, &eig, &options.axis_signs)?;

    // Questions ordered by their first-axis weight, for inspection.
    let mut by_weight: Vec<usize> = (0..map.xweights.len()).collect();
    by_weight.sort_by(|&a, &b| map.xweights[a].total_cmp(&map.xweights[b]));
    for idx in by_weight {
        info!("pc1 weight {:+.4}: {}", map.xweights[idx], map.questions[idx]);
    }
    Ok(map)
}

fn check_axis_signs(signs: &[f64]) -> Result<(), AnalysisErrors> {
    if signs.len() != 2 {
        return Err(AnalysisErrors::SignVectorLength {
            expected: 2,
            actual: signs.len(),
        });
    }
    for &s in signs.iter() {
        if s != 1.0 && s != -1.0 {
            return Err(AnalysisErrors::SignVectorValue { value: s });
        }
    }
    Ok(())
}

// **** Preprocessing ****

/// The fixed ordinal mapping table. `Ok(None)` is a known-missing label:
/// it counts as a given response for the completion filter but carries no
/// numeric value and stays out of all arithmetic until imputed.
fn ordinal_value(label: &str) -> Result<Option<f64>, AnalysisErrors> {
    match label.trim() {
        "Strongly Disagree" => Ok(Some(-1.5)),
        "Disagree" => Ok(Some(-1.0)),
        "Uncertain" => Ok(Some(0.0)),
        "Agree" => Ok(Some(1.0)),
        "Strongly Agree" => Ok(Some(1.5)),
        "No Opinion" | "Did Not Answer" | "Did Not Vote" | "Did not answer" => Ok(None),
        other => Err(AnalysisErrors::UnknownLabel {
            label: other.to_string(),
        }),
    }
}

/// Maps labels to ordinals, drops low-completion responders and imputes
/// the remaining gaps with per-question means over the retained rows.
fn preprocess(
    table: &ResponseTable,
    completion_threshold: f64,
) -> Result<OpinionMatrix, AnalysisErrors> {
    let num_questions = table.questions.len();

    // Ordinal mapping first: an unknown label is a configuration error
    // even on a row that the completion filter would drop.
    let mut numeric: Vec<Vec<Option<f64>>> = Vec::with_capacity(table.cells.len());
    let mut present: Vec<usize> = Vec::with_capacity(table.cells.len());
    for row in table.cells.iter() {
        let mut num_row: Vec<Option<f64>> = Vec::with_capacity(num_questions);
        let mut count = 0usize;
        for cell in row.iter() {
            match cell {
                Some(label) => {
                    num_row.push(ordinal_value(label)?);
                    count += 1;
                }
                None => num_row.push(None),
            }
        }
        numeric.push(num_row);
        present.push(count);
    }

    // Strictly greater: a responder at exactly the threshold is dropped.
    let min_present = completion_threshold * num_questions as f64;
    let retained: Vec<usize> = (0..numeric.len())
        .filter(|&i| present[i] as f64 > min_present)
        .collect();
    debug!(
        "preprocess: {} of {} responders above the completion threshold",
        retained.len(),
        numeric.len()
    );
    if retained.len() < 2 || retained.len() < num_questions || num_questions < 2 {
        return Err(AnalysisErrors::InsufficientData {
            responders: retained.len(),
            questions: num_questions,
        });
    }

    // Imputation means come from the retained rows only.
    let mut means: Vec<f64> = Vec::with_capacity(num_questions);
    for j in 0..num_questions {
        let mut sum = 0.0;
        let mut count = 0usize;
        for &i in retained.iter() {
            if let Some(v) = numeric[i][j] {
                sum += v;
                count += 1;
            }
        }
        if count == 0 {
            return Err(AnalysisErrors::EmptyQuestionColumn { column: j });
        }
        means.push(sum / count as f64);
    }

    let values = DMatrix::from_fn(retained.len(), num_questions, |i, j| {
        numeric[retained[i]][j].unwrap_or(means[j])
    });
    Ok(OpinionMatrix {
        responder_names: retained
            .iter()
            .map(|&i| table.responder_names[i].clone())
            .collect(),
        responder_ids: retained
            .iter()
            .map(|&i| table.responder_ids[i].clone())
            .collect(),
        questions: table.questions.clone(),
        values,
    })
}

// **** PCA engine ****

fn center_columns(x: &DMatrix<f64>) -> DMatrix<f64> {
    let mut centered = x.clone();
    for j in 0..x.ncols() {
        let mean = x.column(j).mean();
        for i in 0..x.nrows() {
            centered[(i, j)] -= mean;
        }
    }
    centered
}

/// Sample covariance over columns, unbiased (N-1) normalization.
/// The input must already be column-centered.
fn covariance(centered: &DMatrix<f64>) -> Result<DMatrix<f64>, AnalysisErrors> {
    let n = centered.nrows();
    let cov = (centered.transpose() * centered) / (n as f64 - 1.0);
    for j in 0..cov.ncols() {
        if cov[(j, j)] <= VARIANCE_EPS {
            return Err(AnalysisErrors::ZeroVarianceColumn { column: j });
        }
    }
    Ok(cov)
}

/// Eigendecomposition of the covariance matrix, eigenpairs sorted by
/// descending eigenvalue.
///
/// A symmetric real matrix has a real decomposition; the symmetry check
/// is what guards against the garbage a numerically broken covariance
/// would otherwise produce.
fn eigen_sorted(cov: DMatrix<f64>) -> Result<EigenDecomposition, AnalysisErrors> {
    let residual = (&cov - cov.transpose()).abs().max();
    if residual > SYMMETRY_TOL {
        return Err(AnalysisErrors::AsymmetricCovariance { residual });
    }
    let se = SymmetricEigen::new(cov);
    let k = se.eigenvalues.len();
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| se.eigenvalues[b].total_cmp(&se.eigenvalues[a]));
    let values: Vec<f64> = order.iter().map(|&i| se.eigenvalues[i]).collect();
    let cols: Vec<DVector<f64>> = order
        .iter()
        .map(|&i| se.eigenvectors.column(i).into_owned())
        .collect();
    Ok(EigenDecomposition {
        vectors: DMatrix::from_columns(&cols),
        values,
    })
}

// **** Projection assembly ****

/// Pearson correlation of two observation vectors. `None` when either
/// vector has no variance.
fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len() as f64;
    let ma = a.iter().sum::<f64>() / n;
    let mb = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        cov += (x - ma) * (y - mb);
        va += (x - ma) * (x - ma);
        vb += (y - mb) * (y - mb);
    }
    if va <= VARIANCE_EPS || vb <= VARIANCE_EPS {
        return None;
    }
    Some(cov / (va * vb).sqrt())
}

fn fmt2(v: f64) -> String {
    format!("{:.2}", v)
}

/// Drops the zero padding from the "(NNN) " numbering prefix.
fn strip_numbering_zeros(text: &str) -> String {
    match text.strip_prefix("(0") {
        Some(rest) => format!("({}", rest.trim_start_matches('0')),
        None => text.to_string(),
    }
}

fn assemble_map(
    matrix: &OpinionMatrix,
    centered: &DMatrix<f64>,
    eig: &EigenDecomposition,
    signs: &[f64],
) -> Result<OpinionMap, AnalysisErrors> {
    let n = matrix.values.nrows();

    // Sign canonicalization happens on the axes themselves, so that the
    // published weight vectors and the projection agree.
    let axes = DMatrix::from_columns(&[
        eig.vectors.column(0).into_owned() * signs[0],
        eig.vectors.column(1).into_owned() * signs[1],
    ]);
    let proj = centered * &axes;

    let xs: Vec<f64> = (0..n).map(|i| proj[(i, 0)]).collect();
    let mut pc1_order: Vec<usize> = (0..n).collect();
    pc1_order.sort_by(|&a, &b| xs[a].total_cmp(&xs[b]));
    let mut pc1_rank = vec![0usize; n];
    for (rank, &i) in pc1_order.iter().enumerate() {
        pc1_rank[i] = rank;
    }

    // Correlation over the raw (uncentered) observation vectors, rows and
    // columns in pc1 rank order.
    let raw_rows: Vec<Vec<f64>> = (0..n)
        .map(|i| matrix.values.row(i).iter().cloned().collect())
        .collect();
    let mut corr_mat: Vec<Vec<String>> = Vec::with_capacity(n);
    for &i in pc1_order.iter() {
        let mut row: Vec<String> = Vec::with_capacity(n);
        for &j in pc1_order.iter() {
            match pearson(&raw_rows[i], &raw_rows[j]) {
                Some(r) => row.push(fmt2(r)),
                None => {
                    let bad = if row_variance(&raw_rows[i]) <= VARIANCE_EPS {
                        i
                    } else {
                        j
                    };
                    return Err(AnalysisErrors::ZeroVarianceRow { row: bad });
                }
            }
        }
        corr_mat.push(row);
    }

    // Mean and +/- 2 sigma band per question, over the raw matrix.
    let k = matrix.values.ncols();
    let mut top_range: Vec<String> = Vec::with_capacity(k);
    let mut bot_range: Vec<String> = Vec::with_capacity(k);
    for j in 0..k {
        let col = matrix.values.column(j);
        let mean = col.mean();
        let var = col.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
        let sd = var.sqrt();
        top_range.push(fmt2(mean + 2.0 * sd));
        bot_range.push(fmt2(mean - 2.0 * sd));
    }

    let mut points: Vec<MapPoint> = Vec::with_capacity(n + 1);
    // The analysis consumer sits at the origin, always first.
    points.push(MapPoint {
        name: "You".to_string(),
        x: 0.0,
        y: 0.0,
        responder_id: "0".to_string(),
        pc1_rank: None,
    });
    for i in 0..n {
        points.push(MapPoint {
            name: matrix.responder_names[i].clone(),
            x: proj[(i, 0)],
            y: proj[(i, 1)],
            responder_id: matrix.responder_ids[i].clone(),
            pc1_rank: Some(pc1_rank[i]),
        });
    }

    Ok(OpinionMap {
        points,
        questions: matrix
            .questions
            .iter()
            .map(|q| strip_numbering_zeros(&q.display_text))
            .collect(),
        q_url_suffixes: matrix.questions.iter().map(|q| q.url_suffix.clone()).collect(),
        xweights: axes.column(0).iter().cloned().collect(),
        yweights: axes.column(1).iter().cloned().collect(),
        matrix: (0..n)
            .map(|i| (0..k).map(|j| fmt2(centered[(i, j)])).collect())
            .collect(),
        corr_mat,
        top_range,
        bot_range,
    })
}

fn row_variance(row: &[f64]) -> f64 {
    let n = row.len() as f64;
    let mean = row.iter().sum::<f64>() / n;
    row.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
}
