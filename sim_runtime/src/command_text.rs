use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

use crate::{DriverCommand, ReportRequest};

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error("invalid float '{value}' for {context}: {source}")]
    InvalidFloat {
        value: String,
        context: &'static str,
        source: ParseFloatError,
    },
    #[error("invalid duration '{0}'")]
    InvalidDuration(String),
    #[error("invalid report kind '{0}'")]
    InvalidReport(String),
}

pub fn parse_command_line(input: &str) -> Result<DriverCommand, CommandParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let mut parts = trimmed.split_whitespace();
    let verb = parts
        .next()
        .map(|v| v.to_ascii_lowercase())
        .ok_or(CommandParseError::Empty)?;

    match verb.as_str() {
        "simulate" | "sim" | "run" => {
            let duration_str = parts.next().unwrap_or("10m");
            let seconds = parse_duration(duration_str)?;
            Ok(DriverCommand::Simulate { seconds })
        }
        "save" => Ok(DriverCommand::Save {
            name: parts.next().map(str::to_string),
        }),
        "status" | "st" => Ok(DriverCommand::Status),
        "cancel" => {
            let unit_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("unit"))?;
            let task_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("task"))?;
            let unit = parse_u64(unit_str, "cancel unit")?;
            let task = parse_u64(task_str, "cancel task")?;
            Ok(DriverCommand::Cancel { unit, task })
        }
        "codeword" | "cw" => {
            let side = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("side"))?;
            let word = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("word"))?;
            Ok(DriverCommand::Codeword {
                side: side.to_string(),
                word: word.to_string(),
            })
        }
        "report" => {
            let unit_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("unit"))?;
            let unit = parse_u64(unit_str, "report unit")?;
            let kind = match parts.next().unwrap_or("sitrep").to_ascii_lowercase().as_str() {
                "sitrep" => ReportRequest::Sitrep,
                "intsum" => ReportRequest::Intsum,
                other => return Err(CommandParseError::InvalidReport(other.to_string())),
            };
            Ok(DriverCommand::Report { unit, kind })
        }
        "quit" | "exit" | "q" => Ok(DriverCommand::Quit),
        other => Err(CommandParseError::UnknownCommand(other.to_string())),
    }
}

/// Parse `"2h"`, `"30m"`, `"1h30m"`, `"90s"`, `"1d"` or a bare number of
/// minutes into seconds.
pub fn parse_duration(text: &str) -> Result<i64, CommandParseError> {
    let trimmed = text.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return Err(CommandParseError::InvalidDuration(text.to_string()));
    }
    if trimmed.chars().all(|c| c.is_ascii_digit() || c == '.') {
        let minutes = parse_f64(&trimmed, "duration minutes")?;
        return Ok((minutes * 60.0).round() as i64);
    }

    let mut total = 0.0;
    let mut number = String::new();
    for c in trimmed.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let scale = match c {
            'd' => 86_400.0,
            'h' => 3_600.0,
            'm' => 60.0,
            's' => 1.0,
            _ => return Err(CommandParseError::InvalidDuration(text.to_string())),
        };
        if number.is_empty() {
            return Err(CommandParseError::InvalidDuration(text.to_string()));
        }
        total += parse_f64(&number, "duration")? * scale;
        number.clear();
    }
    if !number.is_empty() {
        return Err(CommandParseError::InvalidDuration(text.to_string()));
    }
    Ok(total.round() as i64)
}

fn parse_u64(value: &str, context: &'static str) -> Result<u64, CommandParseError> {
    value
        .parse::<u64>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

fn parse_f64(value: &str, context: &'static str) -> Result<f64, CommandParseError> {
    value
        .parse::<f64>()
        .map_err(|source| CommandParseError::InvalidFloat {
            value: value.to_string(),
            context,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_accept_compound_units() {
        assert_eq!(parse_duration("2h").unwrap(), 7_200);
        assert_eq!(parse_duration("1h30m").unwrap(), 5_400);
        assert_eq!(parse_duration("90s").unwrap(), 90);
        assert_eq!(parse_duration("15").unwrap(), 900);
        assert!(matches!(
            parse_duration("h"),
            Err(CommandParseError::InvalidDuration(_))
        ));
        assert!(matches!(
            parse_duration("3w"),
            Err(CommandParseError::InvalidDuration(_))
        ));
    }

    #[test]
    fn parses_driver_verbs() {
        assert_eq!(
            parse_command_line("simulate 2h").unwrap(),
            DriverCommand::Simulate { seconds: 7_200 }
        );
        assert_eq!(
            parse_command_line("cancel 3 12").unwrap(),
            DriverCommand::Cancel { unit: 3, task: 12 }
        );
        assert_eq!(
            parse_command_line("codeword blue FALCON").unwrap(),
            DriverCommand::Codeword {
                side: "blue".into(),
                word: "FALCON".into()
            }
        );
        assert_eq!(
            parse_command_line("report 7 intsum").unwrap(),
            DriverCommand::Report {
                unit: 7,
                kind: ReportRequest::Intsum
            }
        );
        assert_eq!(parse_command_line("QUIT").unwrap(), DriverCommand::Quit);
    }

    #[test]
    fn reports_argument_errors() {
        assert!(matches!(
            parse_command_line("   "),
            Err(CommandParseError::Empty)
        ));
        assert!(matches!(
            parse_command_line("cancel 3"),
            Err(CommandParseError::MissingArgument("task"))
        ));
        assert!(matches!(
            parse_command_line("cancel x 1"),
            Err(CommandParseError::InvalidInteger { .. })
        ));
        assert!(matches!(
            parse_command_line("launch"),
            Err(CommandParseError::UnknownCommand(_))
        ));
    }
}
