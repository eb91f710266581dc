//! Model converter merge-pass CLI.
//!
//! Provides the `opmerge` binary. `convert` loads a conversion graph and a
//! kind-mapping table from JSON, registers the table as one rule package and
//! runs a merge pass over the graph, reporting what converted and what did
//! not.

mod graph_file;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde_json::json;

use opmerge_rewrite::{register_mappings, KindMapping, MergePass, PassConfig, RuleRegistry};

use crate::graph_file::GraphFile;

/// Model converter graph tools.
#[derive(Parser)]
#[command(name = "opmerge", about = "Model converter graph merge passes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run one rule package over a graph until it converges.
    Convert {
        /// Path to the graph JSON file.
        #[arg(short, long)]
        graph: PathBuf,

        /// Path to the kind-mapping table (JSON array).
        #[arg(short, long)]
        rules: PathBuf,

        /// Package name to register the table under and run.
        #[arg(short, long)]
        package: String,

        /// Maximum number of scans that rewrite something (default: 100).
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Keep producers left without consumers after a replacement.
        #[arg(long)]
        keep_orphans: bool,

        /// Write the converted graph here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Options for one `convert` run.
struct ConvertArgs {
    graph: PathBuf,
    rules: PathBuf,
    package: String,
    config: PassConfig,
    output: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            graph,
            rules,
            package,
            max_iterations,
            keep_orphans,
            output,
        } => {
            let defaults = PassConfig::default();
            let args = ConvertArgs {
                graph,
                rules,
                package,
                config: PassConfig {
                    max_iterations: max_iterations.unwrap_or(defaults.max_iterations),
                    reclaim_orphans: !keep_orphans,
                },
                output,
            };
            let exit_code = run_convert(&args);
            process::exit(exit_code);
        }
    }
}

/// Execute the convert subcommand.
///
/// Returns exit code: 0 = every node converted, 1 = some nodes did not
/// convert, 2 = the pass aborted, 3 = I/O or parse error.
fn run_convert(args: &ConvertArgs) -> i32 {
    let file: GraphFile = match read_json(&args.graph) {
        Ok(file) => file,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return 3;
        }
    };
    let mut graph = match file.into_graph() {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("Error: invalid graph '{}': {}", args.graph.display(), e);
            return 3;
        }
    };
    let mappings: Vec<KindMapping> = match read_json(&args.rules) {
        Ok(mappings) => mappings,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return 3;
        }
    };

    let registry = RuleRegistry::new();
    let count = register_mappings(&registry, &args.package, mappings);
    tracing::info!(package = %args.package, rules = count, "loaded kind mappings");

    let report = match MergePass::new(&registry)
        .with_config(args.config.clone())
        .run(&args.package, &mut graph)
    {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Merge pass error: {}", e);
            return 2;
        }
    };

    let converted = match GraphFile::from_graph(&graph) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error: failed to export converted graph: {}", e);
            return 3;
        }
    };

    let stdout = match &args.output {
        Some(path) => {
            if let Err(msg) = write_json(path, &converted) {
                eprintln!("Error: {}", msg);
                return 3;
            }
            json!({ "report": report })
        }
        None => json!({ "report": report, "graph": converted }),
    };
    let text = serde_json::to_string_pretty(&stdout)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize result: {}\"}}", e));
    println!("{}", text);

    if report.is_success() {
        0
    } else {
        eprintln!(
            "{} node(s) did not convert in package '{}':",
            report.diagnostics.len(),
            report.package
        );
        for diag in &report.diagnostics {
            eprintln!("  - {}", diag);
        }
        1
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("failed to parse '{}': {}", path.display(), e))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("failed to serialize '{}': {}", path.display(), e))?;
    fs::write(path, text).map_err(|e| format!("failed to write '{}': {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(graph: serde_json::Value, rules: serde_json::Value) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("graph.json"), graph.to_string()).unwrap();
            fs::write(dir.path().join("rules.json"), rules.to_string()).unwrap();
            Fixture { dir }
        }

        fn args(&self, max_iterations: usize) -> ConvertArgs {
            ConvertArgs {
                graph: self.dir.path().join("graph.json"),
                rules: self.dir.path().join("rules.json"),
                package: "TFExtra".into(),
                config: PassConfig {
                    max_iterations,
                    ..PassConfig::default()
                },
                output: Some(self.dir.path().join("out.json")),
            }
        }

        fn output(&self) -> GraphFile {
            read_json(&self.dir.path().join("out.json")).unwrap()
        }
    }

    fn graph() -> serde_json::Value {
        json!({
            "nodes": [
                { "name": "x", "kind": "Input" },
                { "name": "shape", "kind": "Input" },
                { "name": "r", "kind": "Extra:Tensorflow:Reshape", "inputs": ["x", "shape"] },
                { "name": "act", "kind": "Extra:Tensorflow:Relu6", "inputs": ["r"] }
            ],
            "outputs": ["act"]
        })
    }

    #[test]
    fn converted_graph_is_written_and_exit_is_zero() {
        let fixture = Fixture::new(
            graph(),
            json!([
                { "from": "Extra:Tensorflow:Reshape", "to": "Reshape" },
                { "from": "Extra:Tensorflow:Relu6", "to": "ReLU6" }
            ]),
        );
        assert_eq!(run_convert(&fixture.args(100)), 0);

        let out = fixture.output();
        let kinds: Vec<&str> = out.nodes.iter().map(|n| n.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Input", "Input", "Reshape", "ReLU6"]);
        assert_eq!(out.nodes[3].inputs, vec!["r"]);
        assert_eq!(out.outputs, vec!["act"]);
    }

    #[test]
    fn declined_nodes_exit_one() {
        let fixture = Fixture::new(
            graph(),
            json!([
                { "from": "Extra:Tensorflow:Reshape", "to": "Reshape", "require_const_inputs": [1] }
            ]),
        );
        assert_eq!(run_convert(&fixture.args(100)), 1);
        assert_eq!(fixture.output().nodes[2].kind.as_str(), "Extra:Tensorflow:Reshape");
    }

    #[test]
    fn non_termination_exits_two() {
        let fixture = Fixture::new(
            graph(),
            json!([{ "from": "Extra:Tensorflow:Relu6", "to": "Extra:Tensorflow:Relu6" }]),
        );
        assert_eq!(run_convert(&fixture.args(5)), 2);
    }

    #[test]
    fn unreadable_inputs_exit_three() {
        let fixture = Fixture::new(graph(), json!({ "not": "a table" }));
        assert_eq!(run_convert(&fixture.args(100)), 3);

        let mut args = fixture.args(100);
        args.graph = fixture.dir.path().join("missing.json");
        assert_eq!(run_convert(&args), 3);
    }
}
