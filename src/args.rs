use clap::Parser;

/// This is a survey extraction and ideology-map analysis program.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (directory path) The directory holding the saved survey result pages, one
    /// file per page. Files are folded in sorted name order, which must match the
    /// publication order of the surveys.
    #[clap(short, long, value_parser)]
    pub pages: Option<String>,

    /// (file path) A JSON analysis configuration carrying the per-dataset axis
    /// signs and the completion threshold. Defaults apply when omitted.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (directory path) Where the per-dataset output bundles are written.
    /// Defaults to the current directory.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference bundle in JSON format. If provided together with
    /// --dataset, opmap will check that the produced bundle matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (year) If specified, only the dataset for this year is analyzed.
    #[clap(short, long, value_parser)]
    pub dataset: Option<i32>,

    /// (file path) If specified, prints the survey result links found on the given
    /// saved index page and exits. Useful to drive an external fetcher.
    #[clap(long, value_parser)]
    pub list_index: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
