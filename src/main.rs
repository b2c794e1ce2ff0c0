use clap::Parser;

use vaultmount::{
    cli::{report_error, run, Cli},
    namespace::{namespace_args, normalize_spellings},
};

fn main() {
    let raw_args = std::env::args().collect::<Vec<_>>();
    let cli = Cli::parse_from(normalize_spellings(namespace_args(raw_args)));
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            report_error(&error);
            std::process::exit(1);
        }
    }
}
