use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the race engine workspace",
    long_about = "A unified CLI for running the demo race, benchmarks,\n\
                  load tests, and CI checks in the race engine workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo race from demos/sample_race.json
    Run {
        /// Itinerary file passed to the demo
        #[arg(long, default_value = "demos/sample_race.json")]
        itinerary: String,
        /// Number of bots racing the user
        #[arg(long, default_value_t = 3)]
        bots: usize,
        /// Cancel the race after this many seconds
        #[arg(long)]
        cancel_after: Option<u64>,
        /// Track buses and trains through the Seoul open APIs
        #[arg(long)]
        live: bool,
    },
    /// Run Criterion benchmarks
    Bench,
    /// Compare benchmarks: stash changes, create baseline, restore, compare
    BenchCompare,
    /// Run CI checks (fmt, clippy, tests, examples, benchmarks)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Run load tests (ignored tests in race_core)
    LoadTest,
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Build and run the demo race
    Examples,
    /// Run benchmarks
    Bench,
    /// Run check + examples + bench
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn git(args: &[&str]) -> ExitStatus {
    eprintln!("+ git {}", args.join(" "));
    Command::new("git")
        .args(args)
        .status()
        .expect("failed to execute git")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_git(args: &[&str]) {
    let status = git(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_demo(itinerary: &str, bots: usize, cancel_after: Option<u64>, live: bool) {
    let bots = bots.to_string();
    let cancel_after = cancel_after.map(|secs| secs.to_string());

    let mut args = vec!["run", "-p", "race_core", "--example", "race_run", "--release"];
    if live {
        args.extend(["--features", "seoul-api"]);
    }
    args.extend(["--", "--itinerary", itinerary, "--bots", &bots]);
    if let Some(secs) = cancel_after.as_deref() {
        args.extend(["--cancel-after", secs]);
    }
    if live {
        args.push("--live");
    }
    run_cargo(&args);
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test race_core");
    run_cargo(&["test", "-p", "race_core"]);

    step("Test race_core with the Seoul providers");
    run_cargo(&["test", "-p", "race_core", "--features", "seoul-api"]);
}

fn ci_examples() {
    step("Run race_run (three bots, fallback tracking)");
    run_demo("demos/sample_race.json", 3, None, false);

    step("Run race_run (canceled after ten minutes)");
    run_demo("demos/sample_race.json", 3, Some(600), false);
}

fn ci_bench() {
    step("Run benchmarks");
    run_cargo(&["bench", "--package", "race_core", "--bench", "performance"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            itinerary,
            bots,
            cancel_after,
            live,
        } => {
            run_demo(&itinerary, bots, cancel_after, live);
        }
        Commands::Bench => {
            run_cargo(&["bench", "--package", "race_core", "--bench", "performance"]);
        }
        Commands::BenchCompare => {
            step("Stashing current changes");
            run_git(&[
                "stash",
                "push",
                "-m",
                "Temporary stash for benchmark comparison",
            ]);

            step("Running benchmark to create baseline");
            run_cargo(&[
                "bench",
                "--package",
                "race_core",
                "--bench",
                "performance",
                "--",
                "--save-baseline",
                "main",
            ]);

            step("Reapplying changes");
            run_git(&["stash", "pop"]);

            step("Running benchmark comparing against baseline");
            run_cargo(&[
                "bench",
                "--package",
                "race_core",
                "--bench",
                "performance",
                "--",
                "--baseline",
                "main",
            ]);

            eprintln!("\nDone! Check the output above to see performance comparison.");
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Examples => ci_examples(),
                CiJob::Bench => ci_bench(),
                CiJob::All => {
                    ci_check();
                    ci_examples();
                    ci_bench();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::LoadTest => {
            run_cargo(&[
                "test",
                "-p",
                "race_core",
                "--test",
                "load_tests",
                "--",
                "--ignored",
            ]);
        }
    }
}
