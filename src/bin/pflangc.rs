//! The filter compiler's command-line front end. Takes an expression,
//! compiles it, and prints either the raw cBPF instruction array or (with
//! `-d`) its disassembly.
//!
//! Run with `--help` for more info.

use clap::Parser;

use pflang::back;
use pflang::registry::Registry;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the filter expression to compile
    #[arg(short, long)]
    expr: String,
    /// print the disassembled program instead of raw instructions
    #[arg(short, long, default_value_t = false)]
    dump: bool,
    /// turn off constant folding and dead-store elimination
    #[arg(short = 'O', long = "no-optimize", default_value_t = false)]
    no_optimize: bool,
    /// raise the logging verbosity
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if args.verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = Registry::with_builtins();
    let program = match pflang::compile(&args.expr, !args.no_optimize, &registry) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    if args.dump {
        for line in back::disassemble(&program) {
            println!("{line}");
        }
    } else {
        for f in &program {
            println!("{{ {:#06x}, {}, {}, {:#010x} }},", f.code, f.jt, f.jf, f.k);
        }
    }
}
