//! livestatus-dump - run a request file against the in-process mock table
//! and print the rendered response, or (`--pretty`/`--json`) a summary of
//! how the request was parsed.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;

use livestatus_core::executor::{self, DEFAULT_MAX_RESPONSE_SIZE};
use livestatus_core::mock::MockTable;
use livestatus_core::render::OutputFormat;
use livestatus_core::request::{self, ResponseHeaderMode};
use livestatus_core::table::{Table, TableRegistry};
use livestatus_core::wait::TriggerRegistry;

/// Runs a request file against the bundled mock fixtures and prints the
/// rendered response.
#[derive(Parser)]
#[command(name = "livestatus-dump", about = "Inspect a livestatus-style request", version)]
struct Cli {
    /// Path to a request file (the `GET table\n...\n\n` text). Reads
    /// stdin when omitted.
    path: Option<PathBuf>,

    /// Print a summary of the parsed request instead of executing it.
    #[arg(long)]
    pretty: bool,

    /// Print the parsed-request summary as JSON instead of the
    /// human-readable `--pretty` form. Implies `--pretty`.
    #[arg(long)]
    json: bool,
}

/// The fixed mock table registry this tool runs requests against — the
/// same `hosts` fixture `livestatus-core`'s own tests use.
struct Registry {
    hosts: MockTable,
}

impl Registry {
    fn new() -> Self {
        Registry {
            hosts: MockTable::typical_hosts(),
        }
    }
}

impl TableRegistry for Registry {
    fn table(&self, name: &str) -> Option<&dyn Table> {
        match name {
            "hosts" => Some(&self.hosts),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct RequestSummary {
    table: String,
    has_filter: bool,
    columns: Vec<String>,
    stats_count: usize,
    row_limit: Option<u64>,
    time_limit_secs: Option<u64>,
    output_format: &'static str,
    response_header: &'static str,
    keepalive: bool,
    waits: bool,
    show_column_headers: bool,
}

fn format_name(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Csv => "csv",
        OutputFormat::Json => "json",
        OutputFormat::Python => "python",
    }
}

fn response_header_name(mode: ResponseHeaderMode) -> &'static str {
    match mode {
        ResponseHeaderMode::Off => "off",
        ResponseHeaderMode::Fixed16 => "fixed16",
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let request_text = match &cli.path {
        Some(path) => match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("failed to read {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => {
            use std::io::Read;
            let mut text = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut text) {
                eprintln!("failed to read stdin: {}", e);
                return ExitCode::FAILURE;
            }
            text
        }
    };

    let registry = Registry::new();
    let query = match request::parse(&request_text, &registry) {
        Ok(q) => q,
        Err(e) => {
            eprintln!("invalid request: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.pretty || cli.json {
        let summary = RequestSummary {
            table: query.table_name.clone(),
            has_filter: query.filter.is_some(),
            columns: query.columns.iter().map(|c| c.name().to_string()).collect(),
            stats_count: query.stats.len(),
            row_limit: query.limits.row_limit,
            time_limit_secs: query.limits.time_limit.map(|d| d.as_secs()),
            output_format: format_name(query.output_format),
            response_header: response_header_name(query.response_header),
            keepalive: query.keepalive,
            waits: !query.wait.is_empty(),
            show_column_headers: query.show_column_headers,
        };
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&summary).expect("summary serializes"));
        } else {
            print_pretty(&summary);
        }
        return ExitCode::SUCCESS;
    }

    let table = registry
        .table(&query.table_name)
        .expect("table name validated during parse");
    let triggers = TriggerRegistry::new();
    let result = executor::execute(query, table, &triggers, DEFAULT_MAX_RESPONSE_SIZE);
    use std::io::Write;
    if let Err(e) = std::io::stdout().write_all(&result.body) {
        eprintln!("failed to write output: {}", e);
        return ExitCode::FAILURE;
    }
    if result.truncated {
        eprintln!("(response truncated: limit or soft size cap reached)");
    }
    ExitCode::SUCCESS
}

fn print_pretty(summary: &RequestSummary) {
    println!("table:            {}", summary.table);
    println!("has_filter:       {}", summary.has_filter);
    println!("columns:          {}", summary.columns.join(", "));
    println!("stats_count:      {}", summary.stats_count);
    println!("row_limit:        {:?}", summary.row_limit);
    println!("time_limit_secs:  {:?}", summary.time_limit_secs);
    println!("output_format:    {}", summary.output_format);
    println!("response_header:  {}", summary.response_header);
    println!("keepalive:        {}", summary.keepalive);
    println!("waits:            {}", summary.waits);
    println!("show_headers:     {}", summary.show_column_headers);
}
