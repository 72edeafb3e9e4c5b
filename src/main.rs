use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// Run a NotScheme (.ns) program.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the .ns file to run.
    file: PathBuf,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the linked bytecode image before running it.
    #[arg(long)]
    dump_bytecode: bool,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    simple_logger::init_with_level(level).ok();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.file.extension().and_then(|e| e.to_str()) {
        Some("ns") => {}
        _ => {
            eprintln!("Error: File to run must be a .ns file. Got: {}", cli.file.display());
            return ExitCode::FAILURE;
        }
    }
    if !cli.file.exists() {
        eprintln!("Error: File not found: {}", cli.file.display());
        return ExitCode::FAILURE;
    }

    log::info!("linking {}", cli.file.display());
    let image = match notscheme::linker::link_program(&cli.file) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Error during execution: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.dump_bytecode {
        for element in &image {
            match element {
                notscheme::opcode::Element::Label(name) => println!("{}:", name),
                notscheme::opcode::Element::Instr(instr) => println!("    {}", instr.mnemonic()),
            }
        }
    }

    log::info!("loading bytecode image ({} elements)", image.len());
    let mut vm = match notscheme::vm::Vm::load(image) {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("Error during execution: {}", e);
            return ExitCode::FAILURE;
        }
    };

    vm.run();
    ExitCode::SUCCESS
}
