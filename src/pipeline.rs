use log::{debug, info, warn};

use opinion_pca::builder::TableBuilder;
use opinion_pca::*;
use snafu::{prelude::*, Snafu};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::Args;
use crate::pipeline::config_reader::*;
use crate::pipeline::page_reader::*;

pub mod page_reader;

#[derive(Debug, Snafu)]
pub enum MapError {
    #[snafu(display("page {page}: missing expected structural markers"))]
    PageParse { page: String },
    #[snafu(display(
        "page {page}: {responses} response rows do not divide evenly over {questions} sub-questions"
    ))]
    StructuralMismatch {
        page: String,
        responses: usize,
        questions: usize,
    },
    #[snafu(display("Error opening page file {path}"))]
    OpeningPage {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display(""))]
    OpeningJson { source: std::io::Error },
    #[snafu(display(""))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Error writing bundle {path}"))]
    WritingBundle {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("dataset {dataset}: {source}"))]
    Analysis {
        source: AnalysisErrors,
        dataset: i32,
    },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type MapResult<T> = Result<T, MapError>;

pub mod config_reader {
    use crate::pipeline::*;

    #[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        pub year: i32,
        /// Per-axis sign multipliers pinning the map orientation for this
        /// dataset. External configuration, never derived from the data.
        #[serde(rename = "axisSigns")]
        pub axis_signs: Vec<f64>,
    }

    #[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
    pub struct MapConfig {
        #[serde(rename = "completionThreshold")]
        pub completion_threshold: Option<f64>,
        #[serde(default)]
        pub datasets: Vec<DatasetConfig>,
    }

    impl MapConfig {
        pub fn options_for(&self, year: i32) -> AnalysisOptions {
            let mut options = AnalysisOptions::default();
            if let Some(t) = self.completion_threshold {
                options.completion_threshold = t;
            }
            if let Some(ds) = self.datasets.iter().find(|d| d.year == year) {
                options.axis_signs = ds.axis_signs.clone();
            }
            options
        }
    }

    pub fn read_config(path: &str) -> MapResult<MapConfig> {
        let contents = fs::read_to_string(path).context(OpeningJsonSnafu {})?;
        let config: MapConfig = serde_json::from_str(&contents).context(ParsingJsonSnafu {})?;
        debug!("read_config: {:?}", config);
        Ok(config)
    }
}

/// Accumulated state for one dataset (one survey year).
struct DatasetState {
    builder: TableBuilder,
    /// Global sub-question counter for this dataset, in page order.
    sequence: u32,
    /// Set on the first page failure; the dataset is then abandoned and
    /// no bundle is written for it.
    failed: Option<MapError>,
}

impl DatasetState {
    fn new() -> DatasetState {
        DatasetState {
            builder: TableBuilder::new(),
            sequence: 0,
            failed: None,
        }
    }
}

/// Folds one parsed page into the dataset's table. Each sub-question gets
/// the next global sequence index and its slice of the response rows.
fn fold_page(state: &mut DatasetState, page: &ParsedPage) -> MapResult<()> {
    let per_question = page.rows.len() / page.questions.len();
    for (i, text) in page.questions.iter().enumerate() {
        state.sequence += 1;
        let question = Question {
            sequence_index: state.sequence,
            display_text: format!("({:03}) {}", state.sequence, text),
            url_suffix: page.url_suffix.clone(),
        };
        let responses: Vec<Response> = page.rows[i * per_question..(i + 1) * per_question]
            .iter()
            .map(|(id, name, label)| Response {
                responder_id: id.clone(),
                responder_name: name.clone(),
                question_sequence_index: state.sequence,
                raw_label: label.clone(),
            })
            .collect();
        state
            .builder
            .add_question(&question, &responses)
            .context(AnalysisSnafu { dataset: page.year })?;
    }
    Ok(())
}

/// Turns the analysis bundle into the output document. Field ordering and
/// the 2-decimal string matrices are part of the consumer contract.
fn map_to_json(map: &OpinionMap) -> JSValue {
    let mut points: Vec<JSValue> = Vec::new();
    for p in map.points.iter() {
        let mut point: JSMap<String, JSValue> = JSMap::new();
        point.insert("name".to_string(), json!(p.name));
        point.insert("x".to_string(), json!(p.x));
        point.insert("y".to_string(), json!(p.y));
        point.insert("responder_id".to_string(), json!(p.responder_id));
        // The synthetic "You" entry carries no rank.
        if let Some(rank) = p.pc1_rank {
            point.insert("pc1_rank".to_string(), json!(rank));
        }
        points.push(JSValue::Object(point));
    }
    json!({
        "points": points,
        "questions": map.questions,
        "q_url_suffixes": map.q_url_suffixes,
        "xweights": map.xweights,
        "yweights": map.yweights,
        "X": map.matrix,
        "corr_mat": map.corr_mat,
        "top_range": map.top_range,
        "bot_range": map.bot_range,
    })
}

fn read_reference(path: &str) -> MapResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu {})?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(js)
}

/// Reads all saved pages, buckets them into per-year datasets and runs the
/// analysis for each. A failing dataset is surfaced but does not block the
/// others; no bundle is written for it.
pub fn run_analysis(args: &Args) -> MapResult<()> {
    if let Some(index_path) = &args.list_index {
        let contents = fs::read_to_string(index_path).context(OpeningPageSnafu {
            path: index_path.clone(),
        })?;
        for link in PageSchema::new().extract_result_links(&contents) {
            println!("{}", link);
        }
        return Ok(());
    }

    let pages_dir = match &args.pages {
        Some(p) => p.clone(),
        None => whatever!("No --pages directory provided"),
    };
    let config = match &args.config {
        Some(p) => read_config(p)?,
        None => MapConfig::default(),
    };

    // Deterministic fold order: sorted file names stand in for publication
    // order. Fetch-completion order must never drive sequence assignment.
    let mut paths: Vec<String> = fs::read_dir(&pages_dir)
        .context(OpeningPageSnafu {
            path: pages_dir.clone(),
        })?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.path().display().to_string())
        .collect();
    paths.sort();
    info!("run_analysis: {} page files under {}", paths.len(), pages_dir);

    let schema = PageSchema::new();
    let mut datasets: BTreeMap<i32, DatasetState> = BTreeMap::new();
    for path in paths.iter() {
        let contents = fs::read_to_string(path).context(OpeningPageSnafu { path: path.clone() })?;
        // The year must be readable even when the rest of the page is not,
        // otherwise the failure cannot be pinned on a dataset.
        let year = schema.page_year(path, &contents)?;
        if let Some(filter) = args.dataset {
            if year != filter {
                continue;
            }
        }
        let state = datasets.entry(year).or_insert_with(DatasetState::new);
        if state.failed.is_some() {
            continue;
        }
        let folded = schema
            .parse_page(path, &contents)
            .and_then(|page| fold_page(state, &page));
        if let Err(e) = folded {
            warn!("dataset {}: abandoned after page {}: {}", year, path, e);
            state.failed = Some(e);
        }
    }

    let out_dir = args.out.clone().unwrap_or_else(|| ".".to_string());
    let mut first_failure: Option<MapError> = None;
    for (year, state) in datasets.into_iter() {
        if let Some(e) = state.failed {
            first_failure.get_or_insert(e);
            continue;
        }
        let table = state.builder.finalize();
        let options = config.options_for(year);
        let outcome = run_opinion_analysis(&table, &options)
            .context(AnalysisSnafu { dataset: year })
            .and_then(|map| write_bundle(args, &out_dir, year, &map));
        if let Err(e) = outcome {
            warn!("dataset {}: {}", year, e);
            first_failure.get_or_insert(e);
        }
    }
    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn write_bundle(args: &Args, out_dir: &str, year: i32, map: &OpinionMap) -> MapResult<()> {
    let bundle = map_to_json(map);
    let pretty = serde_json::to_string_pretty(&bundle).context(ParsingJsonSnafu {})?;

    let out_path = Path::new(out_dir).join(format!("opinion_map_{}.json", year));
    let out_str = out_path.display().to_string();
    fs::write(&out_path, &pretty).context(WritingBundleSnafu { path: out_str.clone() })?;
    info!(
        "dataset {}: wrote {} points and {} questions to {}",
        year,
        map.points.len(),
        map.questions.len(),
        out_str
    );

    // The reference bundle, if provided for comparison.
    if let (Some(reference), Some(filter)) = (&args.reference, args.dataset) {
        if filter == year {
            let reference_js = read_reference(reference)?;
            let pretty_ref =
                serde_json::to_string_pretty(&reference_js).context(ParsingJsonSnafu {})?;
            if pretty_ref != pretty {
                warn!("Found differences with the reference bundle");
                print_diff(pretty_ref.as_str(), pretty.as_str(), "\n");
                whatever!(
                    "Difference detected between dataset {} bundle and reference bundle",
                    year
                )
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::page_reader::tests::{page_fixture, PAGE_TWO_QUESTIONS};
    use super::*;

    #[test]
    fn folding_two_pages_keeps_one_global_sequence() {
        let schema = PageSchema::new();
        let mut state = DatasetState::new();
        let first = schema.parse_page("p1", PAGE_TWO_QUESTIONS).unwrap();
        let second = schema
            .parse_page(
                "p2",
                &page_fixture(
                    "SV_77",
                    &["Another question."],
                    &[("101", "Alice Adams", "Agree"), ("102", "Bob Brown", "Uncertain")],
                ),
            )
            .unwrap();
        fold_page(&mut state, &first).unwrap();
        fold_page(&mut state, &second).unwrap();

        let table = state.builder.finalize();
        let seqs: Vec<u32> = table.questions.iter().map(|q| q.sequence_index).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(table.questions[0].display_text.starts_with("(001) "));
        assert!(table.questions[2].display_text.starts_with("(003) "));
        assert_eq!(table.questions[2].url_suffix, "SV_77");
        // Outer join: every responder present on both pages has 3 cells.
        assert_eq!(table.responder_names.len(), 3);
        assert_eq!(table.cells[0].len(), 3);
    }

    #[test]
    fn a_bad_page_abandons_only_its_dataset() {
        let schema = PageSchema::new();
        let mut state = DatasetState::new();
        let good = schema.parse_page("p1", PAGE_TWO_QUESTIONS).unwrap();
        fold_page(&mut state, &good).unwrap();
        // A second page whose responses do not divide over its questions
        // never reaches fold_page; the builder still holds page one only.
        let bad = schema.parse_page(
            "p2",
            &page_fixture(
                "SV_88",
                &["First.", "Second."],
                &[
                    ("1", "A B", "Agree"),
                    ("2", "C D", "Agree"),
                    ("3", "E F", "Agree"),
                ],
            ),
        );
        assert!(matches!(
            bad,
            Err(MapError::StructuralMismatch {
                responses: 3,
                questions: 2,
                ..
            })
        ));
        let table = state.builder.finalize();
        assert_eq!(table.questions.len(), 2);
    }

    #[test]
    fn bundle_json_puts_you_first_without_a_rank() {
        let map = OpinionMap {
            points: vec![
                MapPoint {
                    name: "You".to_string(),
                    x: 0.0,
                    y: 0.0,
                    responder_id: "0".to_string(),
                    pc1_rank: None,
                },
                MapPoint {
                    name: "Alice Adams".to_string(),
                    x: -1.25,
                    y: 0.5,
                    responder_id: "101".to_string(),
                    pc1_rank: Some(0),
                },
            ],
            questions: vec!["(1) Question 1".to_string()],
            q_url_suffixes: vec!["SV_1".to_string()],
            xweights: vec![1.0],
            yweights: vec![0.0],
            matrix: vec![vec!["-1.25".to_string()]],
            corr_mat: vec![vec!["1.00".to_string()]],
            top_range: vec!["1.00".to_string()],
            bot_range: vec!["-1.00".to_string()],
        };
        let js = map_to_json(&map);
        let points = js["points"].as_array().unwrap();
        assert_eq!(points[0]["name"], "You");
        assert!(points[0].get("pc1_rank").is_none());
        assert_eq!(points[1]["pc1_rank"], 0);
        assert_eq!(js["X"][0][0], "-1.25");
        assert_eq!(js["q_url_suffixes"][0], "SV_1");
    }

    #[test]
    fn config_selects_options_per_dataset() {
        let config: MapConfig = serde_json::from_str(
            r#"{
                "completionThreshold": 0.8,
                "datasets": [
                    { "year": 2014, "axisSigns": [1.0, -1.0] }
                ]
            }"#,
        )
        .unwrap();
        let options = config.options_for(2014);
        assert_eq!(options.completion_threshold, 0.8);
        assert_eq!(options.axis_signs, vec![1.0, -1.0]);
        // Unconfigured years keep the default signs.
        let fallback = config.options_for(2015);
        assert_eq!(fallback.axis_signs, vec![-1.0, -1.0]);
        assert_eq!(fallback.completion_threshold, 0.8);
    }
}
