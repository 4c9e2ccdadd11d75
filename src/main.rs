use std::convert::TryFrom;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::process;

use anyhow::{Context, Result};
use argh::FromArgs;
use bfcomp::{
    emit, execute, loops, parse, peephole, CodegenOptions, ExecutionConfig, Instruction, Outcome,
    Target, Warning, WordWidth,
};
use colored::Colorize;

/// An optimizing BF compiler. Generates QBE IL by default.
#[derive(FromArgs)]
struct Arguments {
    /// the BF source file to compile
    #[argh(positional)]
    file: String,

    /// the target to generate: qbe, c, js, ll, bf or tokens
    #[argh(option, short = 'g', default = "Target::Qbe")]
    target: Target,

    /// run the program with the interpreter instead of generating code
    #[argh(switch, short = 'i')]
    interpret: bool,

    /// run the peephole and loop optimizers
    #[argh(switch, short = 'o')]
    optimize: bool,

    /// precede generated code with comments naming the source positions
    #[argh(switch, short = 'c')]
    comments: bool,

    /// print optimizer statistics to stderr
    #[argh(switch, short = 'd')]
    debug: bool,

    /// number of cells on the tape
    #[argh(option, short = 'm', default = "30000")]
    memory: usize,

    /// cell width in bits: 8, 16 or 32
    #[argh(option, short = 'w', default = "8")]
    width: u32,

    /// the file to write to, `-` or nothing for stdout
    #[argh(option)]
    out: Option<String>,
}

fn open_output(name: Option<&str>) -> Result<Box<dyn Write>> {
    match name {
        Some(name) if name != "-" => {
            let file = File::create(name)
                .with_context(|| format!("could not create output file {}", name))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        _ => Ok(Box::new(io::stdout())),
    }
}

fn print_warnings(warnings: &[Warning]) {
    for warning in warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
}

fn optimize(instrs: Vec<Instruction>, args: &Arguments) -> Result<Vec<Instruction>> {
    if !args.optimize {
        return Ok(instrs);
    }

    let before = instrs.len();
    let instrs = peephole::optimize_to_fixpoint(&instrs);
    if args.debug {
        eprintln!("peephole: {} -> {} instructions", before, instrs.len());
    }
    if !args.target.accepts_loop_rewrites() {
        return Ok(instrs);
    }

    let before = instrs.len();
    let (instrs, stats) = loops::optimize_with_stats(&instrs, args.target)?;
    if args.debug {
        eprintln!("loops: {} -> {} instructions", before, instrs.len());
        eprintln!("  dead loops removed:  {}", stats.dead_loops);
        eprintln!("  clear loops:         {}", stats.clear_loops);
        eprintln!("  multiply loops:      {}", stats.multiply_loops);
        eprintln!("  divisions:           {}", stats.divisions);
        eprintln!("  folded stores:       {}", stats.folded_stores);
        eprintln!("  removed stores:      {}", stats.removed_stores);
        eprintln!("  scans:               {}", stats.scans);
        eprintln!("  prints:              {}", stats.prints);
    }
    Ok(instrs)
}

fn run(args: &Arguments) -> Result<()> {
    let word_width = WordWidth::try_from(args.width)?;
    let source = fs::read_to_string(&args.file)
        .with_context(|| format!("could not read {}", args.file))?;

    let instrs = parse(&source).with_context(|| format!("could not parse {}", args.file))?;
    let instrs = optimize(instrs, args)?;

    let mut output = open_output(args.out.as_deref())?;
    if args.interpret {
        let config = ExecutionConfig {
            tape_size: args.memory,
            word_width,
            max_steps: None,
        };
        let stdin = io::stdin();
        let state = execute(&instrs, &config, &mut stdin.lock(), &mut output)?;
        output.flush().context("could not flush output")?;
        print_warnings(&state.warnings);
        if args.debug {
            eprintln!("executed {} steps", state.steps);
        }
        if state.outcome == Outcome::OutOfSteps {
            eprintln!("{} step budget exhausted", "warning:".yellow().bold());
        }
        return Ok(());
    }

    let options = CodegenOptions {
        comments: args.comments,
        memory_size: args.memory,
        word_width,
        source_name: args.file.clone(),
    };
    let warnings = emit(args.target, &instrs, &options, &mut output)?;
    output.flush().context("could not flush output")?;
    print_warnings(&warnings);
    Ok(())
}

fn main() {
    let args: Arguments = argh::from_env();

    if let Err(err) = run(&args) {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        process::exit(1);
    }
}
