use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "askdata", about = "Ask natural-language questions about a tabular dataset", version)]
#[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
pub struct Cli {
    /// The question to ask about the dataset.
    #[arg(value_name = "QUESTION")]
    pub prompt: Option<String>,

    /// Delimited tabular file to analyze.
    #[arg(long = "data", value_name = "FILE")]
    pub data: PathBuf,

    /// Large language model to use.
    #[arg(long)]
    pub model: Option<String>,

    /// Randomness of generated output.
    #[arg(long, default_value_t = 0.5, value_parser = clap::value_parser!(f32))]
    pub temperature: f32,

    /// Limits highest probable tokens (words).
    #[arg(long = "top-p", default_value_t = 0.95, value_parser = clap::value_parser!(f32))]
    pub top_p: f32,

    /// Ask for an initial dataset summary instead of a question.
    #[arg(long)]
    pub summarize: bool,

    /// Start an interactive analysis session.
    #[arg(long)]
    pub repl: bool,

    /// Prettify Markdown output (buffer then render at end).
    #[arg(long)]
    pub md: bool,
    /// Disable Markdown prettifying.
    #[arg(long = "no-md")]
    pub no_md: bool,

    /// Print the full structured response as JSON.
    #[arg(long)]
    pub json: bool,

    /// Write the chart specification of the answer to a file.
    #[arg(long = "plot-out", value_name = "FILE")]
    pub plot_out: Option<PathBuf>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
