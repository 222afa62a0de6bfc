pub mod handlers;

use clap::{Arg, ArgMatches, Command};

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}

pub fn build_command() -> Command {
    Command::new("benchlink")
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("run")
                .long("run")
                .short('r')
                .help("Execute a sequence JSON file against a DUT profile")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("profile")
                .long("profile")
                .short('p')
                .help("DUT profile name to run against")
                .value_name("NAME")
                .default_value("mock"),
        )
        .arg(
            Arg::new("profiles-dir")
                .long("profiles-dir")
                .help("Directory holding DUT profile JSON files (default: ~/.benchlink/profiles)")
                .value_name("DIR"),
        )
        .arg(
            Arg::new("results-dir")
                .long("results-dir")
                .help("Directory to write run results into (default: ~/.benchlink/results)")
                .value_name("DIR"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .help("Result file format: json or csv")
                .value_name("FORMAT")
                .default_value("json"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Print the run summary as JSON on stdout")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-profiles")
                .long("list-profiles")
                .help("List stored DUT profiles and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("init-profiles")
                .long("init-profiles")
                .help("Create the profiles directory (and the default 'mock' profile) and exit")
                .action(clap::ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parse() {
        let matches = build_command().get_matches_from([
            "benchlink",
            "--run",
            "smoke.json",
            "--profile",
            "nucleo",
            "--format",
            "csv",
        ]);
        assert_eq!(
            matches.get_one::<String>("run").map(String::as_str),
            Some("smoke.json")
        );
        assert_eq!(
            matches.get_one::<String>("profile").map(String::as_str),
            Some("nucleo")
        );
        assert_eq!(
            matches.get_one::<String>("format").map(String::as_str),
            Some("csv")
        );
    }

    #[test]
    fn test_profile_defaults_to_mock() {
        let matches = build_command().get_matches_from(["benchlink", "--list-profiles"]);
        assert_eq!(
            matches.get_one::<String>("profile").map(String::as_str),
            Some("mock")
        );
        assert!(matches.get_flag("list-profiles"));
    }
}
