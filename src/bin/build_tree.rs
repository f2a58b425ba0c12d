//! Build a single decision tree with the phase-based scheduler.
//!
//! The demo path runs entirely in-process: a synthetic dataset feeds a
//! variance-reduction evaluator, and the "distributed" expansion phases
//! run on the bundled local job service. Swap in real implementations
//! of `SplitEvaluator` and `JobService` to run against a cluster.
//!
//! Examples:
//! - Synthetic data, durable output:
//!   `cargo run --bin build_tree -- --threshold 500 --height 6 --output /tmp/tree --synthetic 100000 8`
//!
//! - With a dataset descriptor:
//!   `cargo run --bin build_tree -- --dataset schema.json --threshold 1000 --output /tmp/tree`

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use planet::testing::{InMemoryDataset, VarianceEvaluator};
use planet::{BuildConfig, LocalJobService, Schema, SubsetRef, TreeBuilder};

#[derive(Debug)]
struct Args {
	data: Option<PathBuf>,
	dataset: Option<PathBuf>,
	output: Option<PathBuf>,
	resume: bool,
	threshold: u64,
	height: Option<u32>,
	threads: usize,
	rows: usize,
	cols: usize,
	seed: u64,
}

fn parse_args() -> Args {
	let mut data: Option<PathBuf> = None;
	let mut dataset: Option<PathBuf> = None;
	let mut output: Option<PathBuf> = None;
	let mut resume = false;
	let mut threshold: Option<u64> = None;
	let mut height: Option<u32> = None;
	let mut threads = 0usize;
	let mut rows = 10_000usize;
	let mut cols = 8usize;
	let mut seed = 42u64;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--data" => data = Some(PathBuf::from(it.next().expect("--data path"))),
			"--dataset" => dataset = Some(PathBuf::from(it.next().expect("--dataset path"))),
			"--output" => output = Some(PathBuf::from(it.next().expect("--output path"))),
			"--resume" => resume = true,
			"--threshold" => threshold = Some(it.next().expect("--threshold value").parse().expect("--threshold must be an integer")),
			"--height" => height = Some(it.next().expect("--height value").parse().expect("--height must be an integer")),
			"--threads" => threads = it.next().expect("--threads value").parse().expect("--threads must be an integer"),
			"--synthetic" => {
				rows = it.next().expect("--synthetic rows").parse().unwrap();
				cols = it.next().expect("--synthetic cols").parse().unwrap();
			}
			"--seed" => seed = it.next().expect("--seed value").parse().unwrap(),
			"--help" => print_help_and_exit(),
			other => usage_error(&format!("unknown arg: {other}")),
		}
	}

	let Some(threshold) = threshold else {
		usage_error("--threshold is required");
	};
	if resume && output.is_none() {
		usage_error("--resume requires --output");
	}

	Args {
		data,
		dataset,
		output,
		resume,
		threshold,
		height,
		threads,
		rows,
		cols,
		seed,
	}
}

fn print_help_and_exit() -> ! {
	eprintln!(
		"build_tree\n\n  Data:\n    --data <rows.csv> (headerless numeric CSV, last column is the target)\n    --synthetic <rows> <cols> (default: 10000 8)\n    --dataset <schema.json> (descriptor; validated, binds the root subset)\n    --seed <u64>\n\n  Tree:\n    --threshold <n> (required; minimum subset size for a distributed pass)\n    --height <h> (maximum tree height)\n\n  Run:\n    --output <dir> (durable store + exported tree; must not exist)\n    --resume (continue an interrupted run at --output)\n    --threads <n> (0 = auto)\n"
	);
	exit(0)
}

fn usage_error(msg: &str) -> ! {
	eprintln!("build_tree: {msg}\nRun with --help for usage.");
	exit(2)
}

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.init();

	let args = parse_args();

	let schema = args.dataset.as_ref().map(|path| match Schema::load(path) {
		Ok(schema) => schema,
		Err(err) => {
			eprintln!("build_tree: failed to load dataset descriptor: {err}");
			exit(1);
		}
	});

	let data = match &args.data {
		Some(path) => match InMemoryDataset::from_csv(path) {
			Ok(data) => data,
			Err(err) => {
				eprintln!("build_tree: failed to load data: {err}");
				exit(1);
			}
		},
		None => {
			let (rows, cols) = match &schema {
				Some(schema) => (schema.num_rows as usize, schema.num_features()),
				None => (args.rows, args.cols),
			};
			InMemoryDataset::synthetic(rows, cols, args.seed)
		}
	};

	if let Some(schema) = &schema {
		if schema.num_rows != data.num_rows() || schema.num_features() != data.num_features() {
			eprintln!(
				"build_tree: dataset descriptor ({} rows, {} features) does not match the data ({} rows, {} features)",
				schema.num_rows,
				schema.num_features(),
				data.num_rows(),
				data.num_features()
			);
			exit(1);
		}
	}
	let root = SubsetRef::root(data.num_rows());
	let evaluator = Arc::new(VarianceEvaluator::new(data));
	let service = LocalJobService::new(evaluator.clone());

	let mut config = BuildConfig::new(args.threshold).with_threads(args.threads);
	if let Some(height) = args.height {
		config = config.with_height(height);
	}
	let builder = TreeBuilder::new(config, &*evaluator, &service);

	let result = match (&args.output, args.resume) {
		(Some(output), false) => builder.build_at(root, output),
		(Some(output), true) => builder.resume(output),
		(None, _) => builder.build(root),
	};

	match result {
		Ok(tree) => {
			println!(
				"tree complete: {} nodes, {} leaves, depth {}, {} expansion jobs",
				tree.len(),
				tree.num_leaves(),
				tree.max_depth(),
				service.submissions()
			);
		}
		Err(err) => {
			eprintln!("build_tree: {err}");
			exit(1);
		}
	}
}
