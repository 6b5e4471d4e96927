use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use owo_colors::{OwoColorize, Stream};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

/// Stands in for captured output when the subject cannot be launched, so the
/// comparison still runs and the fixture reliably reports as a mismatch.
const LAUNCH_ERROR_SENTINEL: &str = "ERROR: Could not execute program";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Run a program over .in fixtures and compare against .out golden files",
    long_about = None,
    after_help = "Examples:\n  iojudge ./solver tests/in tests/out\n  iojudge ./solver tests/in tests/out --first-line-only\n  iojudge ./solver tests/in tests/out --verbose"
)]
struct Cli {
    /// Program under test, run once per fixture with the fixture on stdin
    subject: PathBuf,
    /// Directory scanned (non-recursively) for <case>.in fixture inputs
    input_dir: PathBuf,
    /// Directory holding the <case>.out expected outputs
    output_dir: PathBuf,
    /// Compare only the first line of expected and actual output
    #[arg(short = '1', long)]
    first_line_only: bool,
    /// Print fixture input, full expected/actual output and match detail
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
    /// Only run fixtures whose name contains this filter
    #[arg(short, long)]
    filter: Option<String>,
}

static VERBOSE: AtomicBool = AtomicBool::new(false);

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => exit_usage(err),
    };
    VERBOSE.store(cli.verbose, Ordering::Relaxed);

    let results = run_fixtures(&cli);
    if !results.is_empty() {
        print_summary(&results, &cli);
    }
}

/// Usage problems print to stdout and exit 1; the run itself always exits 0,
/// whatever the fixtures did.
fn exit_usage(err: clap::Error) -> ! {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            print!("{err}");
            std::process::exit(0);
        }
        _ => {
            println!("{err}");
            std::process::exit(1);
        }
    }
}

// --------------------- Data model -----------------------------------------
/// One <case>.in / <case>.out pairing found during discovery.
struct FixturePair {
    name: String,
    input: PathBuf,
    expected: PathBuf,
}

/// Outcome of running the subject once against a fixture.
struct ExecutionResult {
    name: String,
    expected: String,
    actual: String,
    passed: bool,
}

// --------------------- Test runner ----------------------------------------
fn run_fixtures(cli: &Cli) -> Vec<ExecutionResult> {
    let subject = match resolve_subject(&cli.subject) {
        Ok(path) => path,
        Err(err) => {
            report_precondition(&format!("{err:#}"));
            return Vec::new();
        }
    };
    for (dir, what) in [(&cli.input_dir, "input"), (&cli.output_dir, "output")] {
        if !dir.is_dir() {
            report_precondition(&format!(
                "{what} directory '{}' does not exist or is not a directory",
                dir.display()
            ));
            return Vec::new();
        }
    }

    let mut results = Vec::new();
    for pair in discover_fixtures(&cli.input_dir, &cli.output_dir) {
        if let Some(filter) = &cli.filter {
            if !pair.name.contains(filter.as_str()) {
                continue;
            }
        }
        let input = match fs::read(&pair.input) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!(
                    "{} {}: {err}",
                    "[READ]".if_supports_color(Stream::Stderr, |t| t.red()),
                    pair.input.display()
                );
                continue;
            }
        };
        if cli.verbose {
            println!(
                "{}",
                format!("=== {} ===", pair.name).if_supports_color(Stream::Stdout, |t| t.cyan())
            );
            println!("Input:\n{}", String::from_utf8_lossy(&input));
        }
        let actual = run_subject(&subject, &input);
        let expected = read_expected(&pair.expected);
        let passed = outputs_match(&expected, &actual, cli.first_line_only);
        let result = ExecutionResult {
            name: pair.name,
            expected,
            actual,
            passed,
        };
        report_fixture(&result, cli.first_line_only);
        results.push(result);
    }
    results
}

fn report_precondition(msg: &str) {
    eprintln!(
        "{} {msg}",
        "error:".if_supports_color(Stream::Stderr, |t| t.red())
    );
}

/// The subject may be a path or a bare command name; bare names fall back to
/// a PATH lookup so system programs can serve as subjects.
fn resolve_subject(subject: &Path) -> Result<PathBuf> {
    if subject.is_file() {
        // A bare name that happens to exist locally must not turn into a
        // PATH lookup at spawn time.
        return fs::canonicalize(subject)
            .with_context(|| format!("resolving subject program '{}'", subject.display()));
    }
    if subject.components().count() == 1 {
        if let Ok(found) = which::which(subject) {
            return Ok(found);
        }
    }
    bail!("subject program '{}' does not exist", subject.display())
}

// --------------------- Fixture discovery ----------------------------------
/// Flat scan of the input directory for *.in files, lexicographically sorted
/// so runs are reproducible. Inputs without a matching .out are noted and
/// contribute no results.
fn discover_fixtures(input_dir: &Path, output_dir: &Path) -> Vec<FixturePair> {
    let mut pairs = Vec::new();
    for entry in WalkDir::new(input_dir)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|s| s.to_str()) != Some("in") {
            continue;
        }
        let Some(name) = entry.path().file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let expected = output_dir.join(format!("{name}.out"));
        if !expected.is_file() {
            println!(
                "{} {name} - no matching .out file",
                "[SKIP]".if_supports_color(Stream::Stdout, |t| t.yellow())
            );
            continue;
        }
        pairs.push(FixturePair {
            name: name.to_string(),
            input: entry.into_path(),
            expected,
        });
    }
    pairs
}

// --------------------- Process invocation ---------------------------------
/// Runs the subject once with the fixture bytes on stdin and drains stdout.
/// Launch failures surface as the sentinel string so the run keeps going.
fn run_subject(subject: &Path, stdin_data: &[u8]) -> String {
    match try_run_subject(subject, stdin_data) {
        Ok(stdout) => stdout,
        Err(err) => {
            eprintln!(
                "{} {err:#}",
                "[EXEC]".if_supports_color(Stream::Stderr, |t| t.red())
            );
            LAUNCH_ERROR_SENTINEL.to_string()
        }
    }
}

fn try_run_subject(subject: &Path, stdin_data: &[u8]) -> Result<String> {
    let mut command = Command::new(subject);
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    let mut child = command
        .spawn()
        .with_context(|| format!("spawning {subject:?}"))?;
    let mut stdin = child.stdin.take().context("child stdin not captured")?;
    let owned = stdin_data.to_vec();
    let writer = std::thread::spawn(move || {
        // The subject is free to exit without draining its stdin; a broken
        // pipe here must not fail the fixture.
        let _ = stdin.write_all(&owned);
    });
    let output = child
        .wait_with_output()
        .with_context(|| format!("waiting for {subject:?}"))?;
    let _ = writer.join();
    if VERBOSE.load(Ordering::Relaxed) {
        println!(
            "[CMD ] {:?} -> status {:?}, stdout {}B",
            subject,
            output.status.code(),
            output.stdout.len()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn read_expected(path: &Path) -> String {
    match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            eprintln!(
                "{} {}: {err}",
                "[READ]".if_supports_color(Stream::Stderr, |t| t.red()),
                path.display()
            );
            String::new()
        }
    }
}

// --------------------- Output comparison ----------------------------------
/// Leading/trailing whitespace is formatting noise; interior whitespace is
/// significant.
fn trim_outer(text: &str) -> &str {
    text.trim_matches([' ', '\t', '\n', '\r'])
}

/// Text up to but excluding the first newline, or the whole string if none.
fn first_line(text: &str) -> &str {
    match text.find('\n') {
        Some(pos) => &text[..pos],
        None => text,
    }
}

fn outputs_match(expected: &str, actual: &str, first_line_only: bool) -> bool {
    if first_line_only {
        trim_outer(first_line(expected)) == trim_outer(first_line(actual))
    } else {
        trim_outer(expected) == trim_outer(actual)
    }
}

// --------------------- Reporting ------------------------------------------
fn report_fixture(result: &ExecutionResult, first_line_only: bool) {
    if VERBOSE.load(Ordering::Relaxed) {
        print_fixture_detail(result, first_line_only);
    }
    if result.passed {
        println!(
            "{} {}",
            "[PASS]".if_supports_color(Stream::Stdout, |t| t.green()),
            result.name
        );
    } else {
        println!(
            "{} {}",
            "[FAIL]".if_supports_color(Stream::Stdout, |t| t.red()),
            result.name
        );
    }
}

fn print_fixture_detail(result: &ExecutionResult, first_line_only: bool) {
    if first_line_only {
        println!("Expected output (full):\n{}", result.expected);
        println!("Actual output (full):\n{}", result.actual);
        println!("First line comparison:");
        println!("  Expected: '{}'", trim_outer(first_line(&result.expected)));
        println!("  Actual:   '{}'", trim_outer(first_line(&result.actual)));
        if result.passed {
            println!(
                "  Match: {}",
                "YES".if_supports_color(Stream::Stdout, |t| t.green())
            );
        } else {
            println!(
                "  Match: {}",
                "NO".if_supports_color(Stream::Stdout, |t| t.red())
            );
        }
    } else {
        println!("Expected output:\n{}", result.expected);
        println!("Actual output:\n{}", result.actual);
    }
}

fn print_summary(results: &[ExecutionResult], cli: &Cli) {
    let total = results.len();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = total - passed;

    println!(
        "\n{}",
        "=== SUMMARY ===".if_supports_color(Stream::Stdout, |t| t.blue())
    );
    println!(
        "Tests passed: {}",
        passed.if_supports_color(Stream::Stdout, |n| n.green())
    );
    println!(
        "Tests failed: {}",
        failed.if_supports_color(Stream::Stdout, |n| n.red())
    );
    println!("Total tests: {total}");
    let mode = if cli.first_line_only {
        "First line only"
    } else {
        "Full output"
    };
    println!(
        "Comparison mode: {}",
        mode.if_supports_color(Stream::Stdout, |t| t.yellow())
    );
    if cli.verbose {
        println!(
            "{}",
            "Detailed output shown".if_supports_color(Stream::Stdout, |t| t.yellow())
        );
    }
}
