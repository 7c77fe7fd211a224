use std::time::Duration;

use time::{OffsetDateTime, UtcOffset};

use pgbar_core::config::Config;
use pgbar_core::format::builder::Builder;

use crate::error::Result;
use crate::modules::formatter::Formatter;
use crate::modules::{Discipline, ModuleParts, Producer};

/// A parsed `%`-pattern: literal chunks interleaved with tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    Literal(String),
    Token(Token),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Token {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    WeekDay,
    MonthName,
}

fn parse_pattern(pattern: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            literal.push(ch);
            continue;
        }
        let token = match chars.next() {
            Some('Y') => Some(Token::Year),
            Some('m') => Some(Token::Month),
            Some('d') => Some(Token::Day),
            Some('H') => Some(Token::Hour),
            Some('M') => Some(Token::Minute),
            Some('S') => Some(Token::Second),
            Some('a') => Some(Token::WeekDay),
            Some('b') => Some(Token::MonthName),
            Some('%') => {
                literal.push('%');
                None
            }
            Some(other) => {
                log::warn!(target: "module", "Unknown date token %{other}");
                None
            }
            None => None,
        };
        if let Some(token) = token {
            if !literal.is_empty() {
                chunks.push(Chunk::Literal(core::mem::take(&mut literal)));
            }
            chunks.push(Chunk::Token(token));
        }
    }
    if !literal.is_empty() {
        chunks.push(Chunk::Literal(literal));
    }
    chunks
}

fn format_chunks(chunks: &[Chunk], dt: OffsetDateTime) -> String {
    use core::fmt::Write;
    let mut out = String::new();
    for chunk in chunks {
        match chunk {
            Chunk::Literal(text) => out.push_str(text),
            Chunk::Token(Token::Year) => {
                let _ = write!(out, "{}", dt.year());
            }
            Chunk::Token(Token::Month) => {
                let _ = write!(out, "{:02}", u8::from(dt.month()));
            }
            Chunk::Token(Token::Day) => {
                let _ = write!(out, "{:02}", dt.day());
            }
            Chunk::Token(Token::Hour) => {
                let _ = write!(out, "{:02}", dt.hour());
            }
            Chunk::Token(Token::Minute) => {
                let _ = write!(out, "{:02}", dt.minute());
            }
            Chunk::Token(Token::Second) => {
                let _ = write!(out, "{:02}", dt.second());
            }
            Chunk::Token(Token::WeekDay) => {
                let name = match dt.weekday() {
                    time::Weekday::Monday => "Mon",
                    time::Weekday::Tuesday => "Tue",
                    time::Weekday::Wednesday => "Wed",
                    time::Weekday::Thursday => "Thu",
                    time::Weekday::Friday => "Fri",
                    time::Weekday::Saturday => "Sat",
                    time::Weekday::Sunday => "Sun",
                };
                out.push_str(name);
            }
            Chunk::Token(Token::MonthName) => {
                let name = match dt.month() {
                    time::Month::January => "Jan",
                    time::Month::February => "Feb",
                    time::Month::March => "Mar",
                    time::Month::April => "Apr",
                    time::Month::May => "May",
                    time::Month::June => "Jun",
                    time::Month::July => "Jul",
                    time::Month::August => "Aug",
                    time::Month::September => "Sep",
                    time::Month::October => "Oct",
                    time::Month::November => "Nov",
                    time::Month::December => "Dec",
                };
                out.push_str(name);
            }
        }
    }
    out
}

/// `internal/date`: formats the wall clock every `interval` seconds.
struct DateProducer {
    chunks: Vec<Chunk>,
    utc_offset: UtcOffset,
    current: String,
}

impl Producer for DateProducer {
    fn update(&mut self) -> bool {
        let now = OffsetDateTime::now_utc().to_offset(self.utc_offset);
        let formatted = format_chunks(&self.chunks, now);
        if formatted == self.current {
            false
        } else {
            self.current = formatted;
            true
        }
    }

    fn build(&self, builder: &mut Builder, token: &str) -> bool {
        if token == "<date>" {
            builder.append(&self.current);
            true
        } else {
            false
        }
    }
}

pub(crate) fn create(cfg: &Config, section: &str, name: &str) -> Result<ModuleParts> {
    let pattern = cfg.get_or(section, "date", "%H:%M")?;
    let interval = cfg.get_int(section, "interval", 1)?.max(1) as u64;
    // Resolved before any worker exists; multithreaded offset lookups are
    // not sound on unix
    let utc_offset = UtcOffset::current_local_offset().unwrap_or_else(|_| {
        log::warn!(target: "module", "Could not determine local UTC offset, using UTC");
        UtcOffset::UTC
    });
    let mut formatter = Formatter::new(name);
    formatter.add(cfg, section, "format", "<date>", &["<date>"])?;
    Ok(ModuleParts {
        producer: Box::new(DateProducer {
            chunks: parse_pattern(&pattern),
            utc_offset,
            current: String::new(),
        }),
        formatter,
        discipline: Discipline::Timer {
            interval: Duration::from_secs(interval),
        },
        hooks: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_parses_into_chunks() {
        assert_eq!(
            parse_pattern("%H:%M x"),
            vec![
                Chunk::Token(Token::Hour),
                Chunk::Literal(":".into()),
                Chunk::Token(Token::Minute),
                Chunk::Literal(" x".into()),
            ]
        );
    }

    #[test]
    fn formats_a_known_timestamp() {
        let dt = OffsetDateTime::from_unix_timestamp(1_666_551_103).unwrap();
        let chunks = parse_pattern("%Y-%m-%d %a %H:%M:%S");
        assert_eq!(format_chunks(&chunks, dt), "2022-10-23 Sun 18:51:43");
    }

    #[test]
    fn escaped_percent_is_literal() {
        let dt = OffsetDateTime::from_unix_timestamp(0).unwrap();
        assert_eq!(format_chunks(&parse_pattern("100%%"), dt), "100%");
    }
}
