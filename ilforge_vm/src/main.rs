use clap::Parser as ClapParser;
use std::process;

use ilforge::{BuildOptions, SymbolGenerator};
use ilforge_vm::demo::{self, Scenario};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenarios to build and run, all of them when omitted
    #[arg(long, value_enum, help = "Scenario to run (repeatable)")]
    scenario: Vec<Scenario>,

    /// Largest dense switch table
    #[arg(long, default_value_t = 256)]
    max_switch_cases: usize,

    /// Emit plain calls in tail position
    #[arg(long, help = "Disable the tail. prefix")]
    no_tail_calls: bool,

    /// Print the step order and the built program before running it
    #[arg(long, help = "Dump compile steps and instructions")]
    dump: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let options = BuildOptions {
        max_switch_cases: cli.max_switch_cases,
        tail_calls: !cli.no_tail_calls,
        symbols: SymbolGenerator::global(),
    };
    let scenarios = if cli.scenario.is_empty() {
        Scenario::ALL.to_vec()
    } else {
        cli.scenario.clone()
    };

    let mut failed = false;
    for scenario in scenarios {
        println!("== {scenario:?} ==");
        if cli.dump {
            match demo::build(&scenario.module(&options.symbols), &options) {
                Ok((program, steps)) => {
                    for (i, step) in steps.iter().enumerate() {
                        println!("{i:>4}  {step}");
                    }
                    print!("{program}");
                }
                Err(err) => {
                    eprintln!("Error building {scenario:?}: {err}");
                    failed = true;
                    continue;
                }
            }
        }
        match demo::run(scenario, &options, true) {
            Ok(outcome) => println!("=> {:?}", outcome.result),
            Err(err) => {
                eprintln!("Error in {scenario:?}: {err}");
                failed = true;
            }
        }
    }
    if failed {
        process::exit(1);
    }
}
