//! Viper CLI
//!
//! Thin driver over the IL library and the VM: verify, format, optimize,
//! and run textual IL modules.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;
use viper_il::{Module, parse_module, verify};
use viper_vm::{RunState, Runner, RtValue, TraceSink, VmConfig};

#[derive(ClapParser)]
#[command(name = "viper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Viper IL toolchain - verify, optimize and run IL modules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify, optionally optimize, and execute an IL module
    Run {
        /// Input .vil module
        input: PathBuf,

        /// Entry function name
        #[arg(long, default_value = "main")]
        entry: String,

        /// Emit a per-instruction trace to stderr
        #[arg(long)]
        trace: bool,

        /// Breakpoint as FILE:LINE (repeatable)
        #[arg(long = "break", value_name = "FILE:LINE")]
        breakpoints: Vec<String>,

        /// Halt after this many instruction retirements
        #[arg(long)]
        max_steps: Option<u64>,

        /// Skip the optimization pipeline
        #[arg(long)]
        no_opt: bool,

        /// Print wall time to stderr when done
        #[arg(long)]
        time: bool,
    },

    /// Verify a module and report diagnostics
    Verify {
        /// Input .vil module
        input: PathBuf,
    },

    /// Parse and re-emit a module in canonical form
    Fmt {
        /// Input .vil module
        input: PathBuf,

        /// Output path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the optimization pipeline and emit the result
    Opt {
        /// Input .vil module
        input: PathBuf,

        /// Output path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VIPER_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run {
            input,
            entry,
            trace,
            breakpoints,
            max_steps,
            no_opt,
            time,
        } => cmd_run(&input, &entry, trace, &breakpoints, max_steps, no_opt, time),
        Commands::Verify { input } => cmd_verify(&input),
        Commands::Fmt { input, output } => cmd_fmt(&input, output.as_deref(), false),
        Commands::Opt { input, output } => cmd_fmt(&input, output.as_deref(), true),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "viper", &mut std::io::stdout());
            0
        }
    };
    process::exit(code);
}

fn load(input: &Path) -> Result<Module, i32> {
    let source = match std::fs::read_to_string(input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", input.display(), e);
            return Err(1);
        }
    };
    match parse_module(&source, &input.display().to_string()) {
        Ok(m) => Ok(m),
        Err(diags) => {
            for d in diags {
                eprintln!("{}", d);
            }
            Err(1)
        }
    }
}

fn cmd_verify(input: &Path) -> i32 {
    let module = match load(input) {
        Ok(m) => m,
        Err(code) => return code,
    };
    match verify(&module) {
        Ok(_) => {
            println!("{}: ok", input.display());
            0
        }
        Err(diags) => {
            for d in diags {
                eprintln!("{}", d);
            }
            1
        }
    }
}

fn cmd_fmt(input: &Path, output: Option<&Path>, optimize: bool) -> i32 {
    let mut module = match load(input) {
        Ok(m) => m,
        Err(code) => return code,
    };
    if verify(&module).is_err() && optimize {
        eprintln!("error: module does not verify; refusing to optimize");
        return 1;
    }
    if optimize {
        if let Err(diags) = viper_il::transform::Pipeline::standard().run(&mut module) {
            for d in diags {
                eprintln!("{}", d);
            }
            return 1;
        }
    }
    let text = viper_il::module_text(&module);
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("error: cannot write {}: {}", path.display(), e);
                return 1;
            }
        }
        None => print!("{}", text),
    }
    0
}

fn parse_breakpoint(spec: &str) -> Option<(String, u32)> {
    let (file, line) = spec.rsplit_once(':')?;
    Some((file.to_string(), line.parse().ok()?))
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    input: &Path,
    entry: &str,
    trace: bool,
    breakpoints: &[String],
    max_steps: Option<u64>,
    no_opt: bool,
    time: bool,
) -> i32 {
    let mut module = match load(input) {
        Ok(m) => m,
        Err(code) => return code,
    };
    let cert = match verify(&module) {
        Ok(cert) => cert,
        Err(diags) => {
            for d in diags {
                eprintln!("{}", d);
            }
            return 1;
        }
    };
    let cert = if no_opt {
        cert
    } else {
        if let Err(diags) = viper_il::transform::Pipeline::standard().run(&mut module) {
            for d in diags {
                eprintln!("{}", d);
            }
            return 1;
        }
        match verify(&module) {
            Ok(cert) => cert,
            Err(diags) => {
                for d in diags {
                    eprintln!("{}", d);
                }
                return 1;
            }
        }
    };

    let config = VmConfig::from_env();
    viper_runtime::runtime_init(None, config.rc_debug);
    let report_json = config.report_json;
    let mut runner = match Runner::new(&module, cert, config, entry, Vec::new()) {
        Ok(r) => r,
        Err(t) => {
            eprintln!("{}", t);
            return 1;
        }
    };
    if trace {
        runner.set_trace(TraceSink::to_stderr());
    }
    for spec in breakpoints {
        match parse_breakpoint(spec) {
            Some((file, line)) => runner.add_breakpoint(&file, line),
            None => {
                eprintln!("error: bad breakpoint '{}' (expected FILE:LINE)", spec);
                return 1;
            }
        }
    }
    if let Some(max) = max_steps {
        runner.set_max_steps(max);
    }

    let started = std::time::Instant::now();
    loop {
        let state = runner.continue_run().clone();
        match state {
            RunState::Breakpoint => {
                eprintln!("breakpoint hit after {} steps", runner.steps_retired());
            }
            RunState::Paused => {
                eprintln!("paused after {} steps", runner.steps_retired());
            }
            _ => break,
        }
    }
    let wall = started.elapsed();
    if time {
        eprintln!("wall time: {} ms", wall.as_millis());
    }
    if report_json {
        viper_vm::report::RunReport::new(runner.state(), runner.steps_retired(), wall.as_millis())
            .emit();
    }
    match runner.state() {
        RunState::Halted(RtValue::I64(n)) => (*n & 0xff) as i32,
        RunState::Halted(_) => 0,
        RunState::Trapped(t) => {
            eprintln!("{}", t);
            1
        }
        RunState::StepLimit => {
            eprintln!("{}", Runner::step_limit_trap());
            2
        }
        _ => 0,
    }
}
