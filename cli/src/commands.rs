pub mod modules;
pub mod presets;
pub mod scan;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "spyglass")]
#[command(about = "A recursive, preset-driven recon engine.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only show errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve a preset and run a scan
    #[command(alias = "s")]
    Scan(ScanArgs),
    /// List known modules
    #[command(alias = "m")]
    Modules(ModulesArgs),
    /// List presets found in the preset directories
    #[command(alias = "p")]
    Presets(PresetsArgs),
}

#[derive(Args, Debug, Default)]
pub struct ScanArgs {
    /// Targets: domains, IP addresses or networks
    #[arg(short, long = "targets", num_args = 1.., value_name = "TARGET")]
    pub targets: Vec<String>,

    /// Limit scope to these hosts instead of the targets
    #[arg(short, long, num_args = 1..)]
    pub whitelist: Vec<String>,

    /// Never touch these hosts
    #[arg(short, long, num_args = 1..)]
    pub blacklist: Vec<String>,

    /// Don't consider subdomains of targets in scope
    #[arg(long)]
    pub strict_scope: bool,

    /// Presets to include, by name or path
    #[arg(short, long = "preset", num_args = 1.., value_name = "PRESET")]
    pub presets: Vec<String>,

    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    pub modules: Vec<String>,

    #[arg(long, visible_alias = "em", num_args = 1.., value_delimiter = ',')]
    pub exclude_modules: Vec<String>,

    /// Enable modules carrying any of these flags
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    pub flags: Vec<String>,

    /// Only enable modules carrying all of these flags
    #[arg(long, visible_alias = "rf", num_args = 1.., value_delimiter = ',')]
    pub require_flags: Vec<String>,

    /// Disable modules carrying any of these flags
    #[arg(long, visible_alias = "ef", num_args = 1.., value_delimiter = ',')]
    pub exclude_flags: Vec<String>,

    /// Replace the default output modules
    #[arg(long, visible_alias = "om", num_args = 1.., value_delimiter = ',')]
    pub output_modules: Vec<String>,

    /// Config overrides
    #[arg(short, long = "config", num_args = 1.., value_name = "KEY=VALUE")]
    pub config: Vec<String>,

    #[arg(long, num_args = 1..)]
    pub module_dir: Vec<PathBuf>,

    #[arg(long, num_args = 1..)]
    pub preset_dir: Vec<PathBuf>,

    /// Scan name (random by default)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Write output here instead of <home>/scans/<name>
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Resolve everything and show the plan without scanning
    #[arg(long)]
    pub dry_run: bool,

    /// Print the fully expanded preset and exit
    #[arg(long)]
    pub current_preset: bool,
}

#[derive(Args, Debug, Default)]
pub struct ModulesArgs {
    /// Only modules carrying one of these flags
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    pub flags: Vec<String>,

    #[arg(long, num_args = 1..)]
    pub module_dir: Vec<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct PresetsArgs {
    #[arg(long, num_args = 1..)]
    pub preset_dir: Vec<PathBuf>,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_line_is_consistent() {
        CommandLine::command().debug_assert();
    }

    #[test]
    fn scan_arguments() {
        let cli = CommandLine::try_parse_from([
            "spyglass", "scan", "-t", "evilcorp.com", "1.2.3.0/24", "-f", "subdomain-enum,passive",
            "--em", "httpx", "-c", "modules.speculate.max_hosts=16", "--strict-scope", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.targets, vec!["evilcorp.com", "1.2.3.0/24"]);
        assert_eq!(args.flags, vec!["subdomain-enum", "passive"]);
        assert_eq!(args.exclude_modules, vec!["httpx"]);
        assert_eq!(args.config, vec!["modules.speculate.max_hosts=16"]);
        assert!(args.strict_scope);
    }
}
