use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use pbind::allocator::SystemAllocator;
use pbind::config::{debug_level_from, HarnessConfig, DEBUG_ENV};
use pbind::demos::DemoKind;
use pbind::diag::Diagnostic;
use pbind::harness::{describe_buffer, DemoHarness, Outcome};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Emit {
    Describe,
    Json,
    Header,
    Fingerprint,
}

#[derive(Parser, Debug)]
#[command(
    name = "pbind",
    version,
    about = "Pipeline parameter binding: declaration signatures and the demo harness"
)]
struct Cli {
    /// Log verbosity: -v info, -vv debug, -vvv trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the demo pipelines headless through the request harness
    Run {
        /// JSON harness configuration
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        width: Option<i32>,

        #[arg(long)]
        height: Option<i32>,

        /// Worker threads, 1 to 32
        #[arg(long)]
        threads: Option<usize>,

        /// Frames per demo
        #[arg(long)]
        frames: Option<usize>,

        /// Demo indices to run in order (default: 0,1,2,3)
        #[arg(long, value_delimiter = ',')]
        demos: Vec<i32>,
    },
    /// Materialize a declaration file and print its signature
    Signature {
        /// Input .psig declaration file
        source: PathBuf,

        #[arg(long, value_enum, default_value_t = Emit::Describe)]
        emit: Emit,
    },
}

fn init_logging(level: u8) {
    let level = match level {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// 1-based line and column of a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let col = before.len() - before.rfind('\n').map_or(0, |i| i + 1) + 1;
    (line, col)
}

fn report(path: &Path, source: &str, diag: &Diagnostic) {
    match diag.span {
        Some(span) => {
            let (line, col) = line_col(source, span.start);
            eprintln!("{}:{}:{}: {}", path.display(), line, col, diag);
        }
        None => eprintln!("{}: {}", path.display(), diag),
    }
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Signature { source, emit } => {
            let level = if cli.verbose > 0 {
                cli.verbose
            } else {
                debug_level_from(std::env::var(DEBUG_ENV).ok().as_deref()).unwrap_or(0)
            };
            init_logging(level);
            signature(&source, emit)
        }
        Command::Run {
            config,
            width,
            height,
            threads,
            frames,
            demos,
        } => {
            let mut cfg = match config {
                Some(path) => match HarnessConfig::load(&path) {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        eprintln!("pbind: error: {e}");
                        std::process::exit(2);
                    }
                },
                None => HarnessConfig::default(),
            };
            cfg.width = width.unwrap_or(cfg.width);
            cfg.height = height.unwrap_or(cfg.height);
            cfg.threads = threads.unwrap_or(cfg.threads);
            cfg.frames = frames.unwrap_or(cfg.frames);
            if let Err(e) = cfg.validate() {
                eprintln!("pbind: error: {e}");
                std::process::exit(2);
            }
            init_logging(if cli.verbose > 0 {
                cli.verbose
            } else {
                cfg.effective_debug_level()
            });
            let demos = if demos.is_empty() {
                DemoKind::ALL.iter().map(|k| k.index() as i32).collect()
            } else {
                demos
            };
            run(&cfg, &demos)
        }
    };
    std::process::exit(code);
}

fn signature(path: &Path, emit: Emit) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("pbind: error: {}: {}", path.display(), e);
            return 2;
        }
    };
    let decl = match pbind::signature::load(&source) {
        Ok(decl) => decl,
        Err(errors) => {
            for diag in &errors {
                report(path, &source, diag);
            }
            return 1;
        }
    };
    for warning in &decl.warnings {
        report(path, &source, warning);
    }
    match emit {
        Emit::Describe => print!("{}", pbind::header::describe(&decl)),
        Emit::Json => println!("{}", decl.signature.canonical_json()),
        Emit::Header => print!("{}", pbind::header::emit_header(&decl)),
        Emit::Fingerprint => println!("{}", decl.signature.fingerprint_hex()),
    }
    0
}

fn run(cfg: &HarnessConfig, demos: &[i32]) -> i32 {
    let mut harness = match DemoHarness::new(cfg, SystemAllocator) {
        Ok(h) => h,
        Err(diag) => {
            eprintln!("pbind: {diag}");
            return 1;
        }
    };
    for &demo in demos {
        let message = format!("{}:{}", demo, cfg.threads);
        let mut status = None;
        let mut presented = 0;
        for frame in 0..cfg.frames {
            if frame % 25 == 0 {
                harness.set_mouse(cfg.width / 2, cfg.height / 2);
            }
            match harness.handle(&message) {
                Outcome::Frame(report) => {
                    presented += 1;
                    status = Some(report.status_line());
                    report.completion.complete();
                }
                Outcome::Rejected(msg) => {
                    eprintln!("pbind: {msg}: {demo}");
                    return 1;
                }
                Outcome::Failed(diag) => {
                    eprintln!("pbind: {diag}");
                    return 1;
                }
                Outcome::Suppressed => break,
                Outcome::Busy => {
                    eprintln!("pbind: {}", Outcome::busy_diagnostic());
                    return 1;
                }
            }
        }
        let name = harness.current_demo().map_or("?", DemoKind::name);
        println!(
            "{}: {} frames, {}",
            name,
            presented,
            status.unwrap_or_else(|| "no frames".to_string())
        );
        tracing::debug!("{}", describe_buffer(harness.state()));
    }
    0
}
