use clap::{error::ErrorKind, Parser};
use nycdbuddy::{Cli, Commands};

#[test]
fn help_exits_without_error() {
    let err = Cli::try_parse_from(["nycdbuddy", "--help"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    // `--help` is printed to stdout and exits with 0
    assert!(!err.use_stderr());
    assert_eq!(err.exit_code(), 0);
}

#[test]
fn unrecognized_subcommands_exit_with_error() {
    let err = Cli::try_parse_from(["nycdbuddy", "boogywoogy"]).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn unrecognized_options_exit_with_error() {
    let err = Cli::try_parse_from(["nycdbuddy", "start", "--boogywoogy"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn a_subcommand_is_required() {
    assert!(Cli::try_parse_from(["nycdbuddy"]).is_err());
}

#[test]
fn every_subcommand_parses() {
    for (args, expected) in [
        (vec!["create"], Commands::Create),
        (vec!["remove"], Commands::Remove),
        (vec!["start"], Commands::Start),
        (vec!["stop"], Commands::Stop),
        (vec!["wipe"], Commands::Wipe),
        (vec!["hello-world"], Commands::HelloWorld),
        (vec!["populate"], Commands::Populate {
            use_test_data: false,
        }),
        (vec!["populate:status"], Commands::PopulateStatus),
    ] {
        let cli = Cli::try_parse_from(["nycdbuddy"].into_iter().chain(args)).unwrap();
        assert_eq!(cli.command, expected);
    }
}
