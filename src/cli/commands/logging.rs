use clap::{builder::ValueParser, Arg, ArgAction, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Accept either a count or a level name from `LEADGATE_LOG_LEVEL`. Counts
/// above 4 mean TRACE.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            return Ok(parsed);
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err(format!("invalid log level: {level}")),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("LEADGATE_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_from_env(level: Option<&str>) -> Option<u8> {
        temp_env::with_var("LEADGATE_LOG_LEVEL", level, || {
            with_args(Command::new("leadgate"))
                .try_get_matches_from(["leadgate"])
                .ok()
                .and_then(|matches| matches.get_one::<u8>(ARG_VERBOSITY).copied())
        })
    }

    #[test]
    fn level_names_and_numbers_from_env() {
        for (index, &level) in ["error", "warn", "info", "debug", "trace"].iter().enumerate() {
            assert_eq!(level_from_env(Some(level)), u8::try_from(index).ok());
        }
        assert_eq!(level_from_env(Some("INFO")), Some(2));
        assert_eq!(level_from_env(Some("3")), Some(3));
    }

    #[test]
    fn unknown_level_is_rejected() {
        temp_env::with_var("LEADGATE_LOG_LEVEL", Some("loud"), || {
            assert!(with_args(Command::new("leadgate"))
                .try_get_matches_from(["leadgate"])
                .is_err());
        });
    }

    #[test]
    fn repeated_flag_counts() {
        temp_env::with_var("LEADGATE_LOG_LEVEL", None::<&str>, || {
            let matches = with_args(Command::new("leadgate")).get_matches_from(["leadgate", "-vvv"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
    }
}
