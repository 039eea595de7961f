// Flowscope: Real-Time Analysis of the Data Planes Induced by BGP Routing Updates
// Copyright (C) 2024-2025 The flowscope developers
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Logically analyze the data planes induced by BMP messages.
//!
//! Reads a stream of JSON documents (BMP messages and analyzer commands)
//! from stdin, e.g. `gobmpd | flowscope --verbosity 3 rdns.json`, and
//! emits one JSON result object per processed route.

use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::Context;
use clap::Parser;
use itertools::Itertools;

use flowscope::{
    analysis::{Analysis, AnalysisError},
    bmp::{Command, StreamItem},
    rdns::NodeTable,
    report::{ReportOptions, Reporter},
    Span, MAX_NODES,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON file mapping each router name to its interface addresses
    rdns: PathBuf,

    /// Output results to FILE instead of stdout
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Print node identifiers in the JSON output
    #[arg(long)]
    node_ids: bool,

    /// Comma-separated list of sliding-window spans for the temporal
    /// summaries
    #[arg(long, value_name = "SPANS", value_delimiter = ',')]
    network_summary: Vec<Span>,

    /// With exactly two spans, report only reachability edges whose ranks
    /// differ by at least this distance (between 0.0 and 1.0)
    #[arg(long, value_name = "DISTANCE", default_value_t = 0.0)]
    rank_threshold: f64,

    /// Verbosity: 0 silent, 1 forwarding loops, 4 affected flows, 5 their
    /// summary, 6 all flows, 7 their summary
    #[arg(long, default_value_t = 1)]
    verbosity: u8,
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.rank_threshold),
        "--rank-threshold must be between 0.0 and 1.0"
    );

    let mut spans = args.network_summary.clone();
    spans.sort_unstable();

    let rdns = File::open(&args.rdns)
        .with_context(|| format!("cannot open rDNS file {:?}", args.rdns))?;
    let nodes = NodeTable::from_reader(io::BufReader::new(rdns))?;
    anyhow::ensure!(
        nodes.len() <= MAX_NODES,
        "rDNS maps {} routers, at most {MAX_NODES} are supported",
        nodes.len()
    );

    eprintln!(
        "flowscope version: {}\n\
         node ids: {}\n\
         log file: {}\n\
         summary spans: {}\n\
         rank threshold: {}\n\
         verbosity level: {}",
        env!("CARGO_PKG_VERSION"),
        if args.node_ids { "yes" } else { "no" },
        args.log
            .as_ref()
            .map_or_else(|| "stdout".to_string(), |p| p.display().to_string()),
        if spans.is_empty() {
            "<empty>".to_string()
        } else {
            spans.iter().join(",")
        },
        args.rank_threshold,
        args.verbosity,
    );

    let out: Box<dyn Write> = match &args.log {
        Some(path) => Box::new(io::BufWriter::new(
            File::create(path).with_context(|| format!("cannot create log file {path:?}"))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    let mut analysis = Analysis::with_spans(spans.clone(), nodes.len());
    let mut reporter = Reporter::new(
        out,
        &nodes,
        ReportOptions {
            verbosity: args.verbosity,
            node_ids: args.node_ids,
            rank_threshold: args.rank_threshold,
            spans,
        },
    );

    let stdin = io::stdin().lock();
    let stream = serde_json::Deserializer::from_reader(stdin).into_iter::<StreamItem>();
    for item in stream {
        match item.context("malformed JSON document in the BMP stream")? {
            StreamItem::Command { command } => match Command::try_from(command) {
                Ok(Command::ResetReachSummary) => analysis.reset_reach_summary(),
                Ok(Command::EmitLog) => reporter.emit(&analysis, true)?,
                Err(unknown) => log::error!("unsupported analyzer command: {unknown}"),
            },
            StreamItem::Message(message) => {
                let Some(update) = message.route_update(&nodes)? else {
                    continue;
                };
                log::trace!(
                    "route update from node {} at {}: {} announced, {} withdrawn",
                    update.source,
                    update.timestamp,
                    update.announced.len(),
                    update.withdrawn.len(),
                );
                for &(prefix, target) in &update.announced {
                    run(analysis.insert_or_assign(
                        prefix,
                        update.source,
                        &[target],
                        update.timestamp,
                    ));
                    reporter.emit(&analysis, false)?;
                }
                for &prefix in &update.withdrawn {
                    run(analysis.erase(prefix, update.source, update.timestamp));
                    reporter.emit(&analysis, false)?;
                }
            }
        }
    }
    Ok(())
}

/// Engine precondition violations are fatal: report and exit with the
/// error's distinct code.
fn run<T>(result: Result<T, AnalysisError>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            log::error!("{error}");
            eprintln!("fatal: {error}");
            std::process::exit(error.exit_code());
        }
    }
}
