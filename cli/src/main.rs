mod commands;
mod terminal;

use commands::{CommandLine, Commands, modules, presets, scan};
use terminal::{logging, print};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();

    logging::init_logging(commands.verbose, commands.silent);
    print::initialize();

    match commands.command {
        Commands::Scan(args) => {
            print::header("starting scan");
            scan::scan(args).await
        }
        Commands::Modules(args) => {
            print::header("available modules");
            modules::modules(&args)
        }
        Commands::Presets(args) => {
            print::header("available presets");
            presets::presets(&args)
        }
    }
}
