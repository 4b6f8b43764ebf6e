//! The routemap command-line compiler.

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use routemap::compile::{self, CompiledRoute, RouteWithParents};
use routemap::filter::TagExpr;
use routemap::routes::{parse_route_files, sort_route_errors, CasePolicy};
use routemap::Options;

#[derive(Parser)]
#[command(name = "routemap")]
#[command(version)]
#[command(about = "Compile a route catalogue into a single-dispatch regex artifact")]
struct Cli {
    /// Input route file; repeatable, stdin when absent. Files ending in
    /// .json use the JSON route grammar.
    #[arg(long = "input", value_name = "PATH")]
    inputs: Vec<PathBuf>,

    /// Output file (stdout when absent).
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Separator between nested route names.
    #[arg(long, value_name = "STR", default_value = "/")]
    name_separator: String,

    /// Keep only routes matching this tag expression
    /// (e.g. "api & ![DELETE]").
    #[arg(long, value_name = "EXPR")]
    filter: Option<String>,

    /// Text prepended to the output (e.g. "export ROUTES=").
    #[arg(long, value_name = "STR", default_value = "")]
    output_prefix: String,

    /// Allow upper case characters in routes.
    #[arg(long)]
    allow_upper_case: bool,

    /// Print diagnostic information.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    // Warnings (big overlap-check groups) surface only in verbose mode.
    let default_filter = if cli.verbose {
        "routemap=warn"
    } else {
        "routemap=error"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let filter = match &cli.filter {
        None => None,
        Some(expr) => match TagExpr::parse(expr) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("--filter: {e}");
                return 1;
            }
        },
    };

    let inputs = match read_inputs(&cli.inputs) {
        Ok(inputs) => inputs,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    let filenames: Vec<String> = inputs.iter().map(|(name, _)| name.clone()).collect();

    let options = Options {
        name_separator: cli.name_separator.clone(),
        case_policy: if cli.allow_upper_case {
            CasePolicy::AllowUpperCase
        } else {
            CasePolicy::DisallowUpperCase
        },
        ..Options::default()
    };

    let (files, mut errors) = parse_route_files(&inputs, options.case_policy);
    if !errors.is_empty() {
        sort_route_errors(&mut errors);
        for e in &errors {
            eprintln!("{e}");
        }
        return 1;
    }

    let (mut routes, mut errors) =
        compile::process_route_file(&files, &filenames, &options, &mut warn_about_big_group);
    if !errors.is_empty() {
        sort_route_errors(&mut errors);
        for e in &errors {
            eprintln!("{e}");
        }
        return 1;
    }

    let rrs = compile::get_route_regexps(&mut routes, filter.as_ref());
    let (json, n_routes) = compile::route_regexps_to_json(&rrs);

    let mut output = Vec::with_capacity(cli.output_prefix.len() + json.len());
    output.extend_from_slice(cli.output_prefix.as_bytes());
    output.extend_from_slice(&json);

    let destination = match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &output) {
                eprintln!("{}: {e}", path.display());
                return 1;
            }
            path.display().to_string()
        }
        None => {
            use std::io::Write;
            let mut stdout = std::io::stdout();
            if let Err(e) = stdout.write_all(&output) {
                eprintln!("{e}");
                return 1;
            }
            "stdout".to_string()
        }
    };

    let routes_word = if n_routes == 1 { "route" } else { "routes" };
    // When the artifact goes to stdout, the summary must not.
    if cli.output.is_some() {
        println!("{n_routes} {routes_word} written to {destination}");
    } else {
        eprintln!();
        eprintln!("{n_routes} {routes_word} written to {destination}");
    }

    0
}

/// Read every input up front; parsing then runs on in-memory buffers.
fn read_inputs(paths: &[PathBuf]) -> Result<Vec<(String, String)>, String> {
    if paths.is_empty() {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| format!("stdin: {e}"))?;
        return Ok(vec![(String::new(), text)]);
    }

    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("{}: {e}", path.display()))?;
        inputs.push((path.display().to_string(), text));
    }
    Ok(inputs)
}

/// Routes in a big group share no distinguishing constant affix, which
/// forces slow pairwise overlap checks.
fn warn_about_big_group(routes: &[CompiledRoute], group: &[RouteWithParents]) {
    let mut members: Vec<&CompiledRoute> = group.iter().map(|rwp| &routes[rwp.route]).collect();
    members.sort_by(|a, b| {
        a.filename
            .cmp(&b.filename)
            .then_with(|| a.line.cmp(&b.line))
    });
    let listing: Vec<String> = members
        .iter()
        .map(|r| format!("{}:{} {}", display_filename(&r.filename), r.line, r.name))
        .collect();
    tracing::warn!(
        group_size = group.len(),
        routes = %listing.join(", "),
        "group of routes must be checked pairwise for overlaps; they share no unique constant prefix or suffix"
    );
}

fn display_filename(name: &str) -> &str {
    if name.is_empty() {
        "stdin"
    } else {
        name
    }
}
