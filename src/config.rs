//! Destination configuration and command line parsing.
//!
//! Options are positional in effect: each one applies to the destinations
//! that follow it, and `--comment` only to the very next destination.
//! ```text
//! authping -i 0.5 a.example --comment "edge" -6 b.example c.example
//!          └──── a: 0.5s ───┘
//!          └────────────── b: 0.5s, IPv6, "edge" ───────┘
//!          └────────────── c: 0.5s, IPv6 ────────────────────────────┘
//! ```
//! clap does the tokenizing; the order is rebuilt from the per-value indices
//! it records.

use std::net::IpAddr;
use std::time::Duration;

use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};

use crate::core::{
    ConfigError, DEFAULT_INTERVAL, DEFAULT_PROBE_SIZE, MAX_PROBE_SIZE, MIN_INTERVAL, MIN_PROBE_SIZE,
};

/// Address families a destination is probed over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProtocolPreference {
    /// Both families; IPv6 addresses are tried first.
    #[default]
    Auto,
    /// IPv4 / ICMP only.
    V4Only,
    /// IPv6 / ICMPv6 only.
    V6Only,
}

/// Static configuration of one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationConfig {
    /// Free-form comment, emitted as the `comment` tag.
    pub comment: String,
    /// Source address to send from.
    pub source: Option<IpAddr>,
    /// Host name or address literal to probe.
    pub destination: String,
    /// Extra `host` tag.
    pub host_tag: String,
    /// Time between probes.
    pub interval: Duration,
    /// Address families to probe over.
    pub protocol: ProtocolPreference,
    /// Echo body size in bytes.
    pub size: u16,
}

impl DestinationConfig {
    /// Configuration with default settings for `destination`.
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            comment: String::new(),
            source: None,
            destination: destination.into(),
            host_tag: String::new(),
            interval: DEFAULT_INTERVAL,
            protocol: ProtocolPreference::Auto,
            size: DEFAULT_PROBE_SIZE,
        }
    }

    /// Check the interval and size bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval < MIN_INTERVAL {
            return Err(ConfigError::InvalidInterval(format!(
                "{}",
                self.interval.as_secs_f64()
            )));
        }
        if !(MIN_PROBE_SIZE..=MAX_PROBE_SIZE).contains(&usize::from(self.size)) {
            return Err(ConfigError::InvalidSize(self.size.to_string()));
        }
        Ok(())
    }
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Destinations in command line order.
    pub destinations: Vec<DestinationConfig>,
    /// Number of `-v` flags.
    pub verbose: u8,
}

/// Authenticated ICMP ping emitting InfluxDB line protocol.
#[derive(Parser, Debug)]
#[command(name = "authping")]
#[command(version)]
#[command(override_usage = "authping {[OPTIONS] [--dest] DESTINATION}...")]
#[command(after_help = "All options, except for --comment, only affect the destinations followed by.\n\
The option --comment only affects the single destination followed by.\n\
The last command line argument must be a destination.")]
pub struct Args {
    /// The destination address to send packets to.
    #[arg(value_name = "DESTINATION", action = ArgAction::Append)]
    pub positional: Vec<String>,

    /// The destination address to send packets to.
    #[arg(long = "dest", value_name = "DESTINATION", action = ArgAction::Append)]
    pub dest: Vec<String>,

    /// Comment of the following destination.
    #[arg(long, value_name = "COMMENT", action = ArgAction::Append)]
    pub comment: Vec<String>,

    /// Add an extra "host" tag to the InfluxDB entries.
    #[arg(long = "host-tag", value_name = "TAG", action = ArgAction::Append)]
    pub host_tag: Vec<String>,

    /// Prefer IPv6 / ICMPv6, fall back to IPv4 / ICMP. The default mode.
    #[arg(
        long = "prefer-ipv6",
        action = ArgAction::Append,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        hide_possible_values = true
    )]
    pub prefer_ipv6: Vec<bool>,

    /// Use IPv4 / ICMP.
    #[arg(
        short = '4',
        action = ArgAction::Append,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        hide_possible_values = true
    )]
    pub ipv4: Vec<bool>,

    /// Use IPv6 / ICMPv6.
    #[arg(
        short = '6',
        action = ArgAction::Append,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        hide_possible_values = true
    )]
    pub ipv6: Vec<bool>,

    /// The source address to send packets from.
    #[arg(short = 'I', value_name = "SOURCE", action = ArgAction::Append)]
    pub source: Vec<String>,

    /// Wait INTERVAL seconds between sending each packet (at least 0.002).
    #[arg(short = 'i', value_name = "INTERVAL", action = ArgAction::Append)]
    pub interval: Vec<String>,

    /// The number of data bytes to be sent, between 40 and 65528.
    #[arg(short = 's', value_name = "SIZE", action = ArgAction::Append)]
    pub size: Vec<String>,

    /// Log more details to stderr (repeat for more).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// One command line item, in the order it appeared.
#[derive(Debug)]
enum Item {
    Destination(String),
    Comment(String),
    HostTag(String),
    Protocol(ProtocolPreference),
    Source(String),
    Interval(String),
    Size(String),
}

impl Args {
    /// Parse the process arguments.
    pub fn parse_invocation() -> Result<Invocation, ParseFailure> {
        Self::try_parse_invocation(std::env::args_os())
    }

    /// Parse an explicit argument list (first item is the program name).
    pub fn try_parse_invocation<I, T>(args: I) -> Result<Invocation, ParseFailure>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        Self::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Result<Invocation, ParseFailure> {
        let args = Self::from_arg_matches(matches)?;

        let mut items: Vec<(usize, Item)> = Vec::new();
        collect(matches, "positional", &args.positional, &mut items, |v| {
            Item::Destination(v.clone())
        });
        collect(matches, "dest", &args.dest, &mut items, |v| Item::Destination(v.clone()));
        collect(matches, "comment", &args.comment, &mut items, |v| Item::Comment(v.clone()));
        collect(matches, "host_tag", &args.host_tag, &mut items, |v| Item::HostTag(v.clone()));
        collect(matches, "prefer_ipv6", &args.prefer_ipv6, &mut items, |_| {
            Item::Protocol(ProtocolPreference::Auto)
        });
        collect(matches, "ipv4", &args.ipv4, &mut items, |_| {
            Item::Protocol(ProtocolPreference::V4Only)
        });
        collect(matches, "ipv6", &args.ipv6, &mut items, |_| {
            Item::Protocol(ProtocolPreference::V6Only)
        });
        collect(matches, "source", &args.source, &mut items, |v| Item::Source(v.clone()));
        collect(matches, "interval", &args.interval, &mut items, |v| Item::Interval(v.clone()));
        collect(matches, "size", &args.size, &mut items, |v| Item::Size(v.clone()));
        items.sort_by_key(|(index, _)| *index);

        Ok(Invocation {
            destinations: build_destinations(items.into_iter().map(|(_, item)| item))?,
            verbose: args.verbose,
        })
    }
}

/// Failure of [`Args::try_parse_invocation`].
#[derive(Debug, thiserror::Error)]
pub enum ParseFailure {
    /// clap rejected the arguments (or `--help` / `--version` was given).
    #[error(transparent)]
    Clap(#[from] clap::Error),
    /// The arguments parsed but do not form a valid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn collect<T>(
    matches: &ArgMatches,
    id: &str,
    values: &[T],
    items: &mut Vec<(usize, Item)>,
    to_item: impl Fn(&T) -> Item,
) {
    if let Some(indices) = matches.indices_of(id) {
        items.extend(indices.zip(values).map(|(index, value)| (index, to_item(value))));
    }
}

fn build_destinations(items: impl IntoIterator<Item = Item>) -> Result<Vec<DestinationConfig>, ConfigError> {
    let mut destinations = Vec::new();
    let mut next = DestinationConfig::new("");
    let mut pending = false;

    for item in items {
        match item {
            Item::Destination(destination) => {
                next.destination = destination;
                destinations.push(next.clone());
                next.comment.clear();
                next.destination.clear();
                pending = false;
                continue;
            }
            Item::Comment(comment) => next.comment = comment,
            Item::HostTag(tag) => next.host_tag = tag,
            Item::Protocol(protocol) => next.protocol = protocol,
            Item::Source(source) => next.source = Some(parse_source(&source)?),
            Item::Interval(interval) => next.interval = parse_interval(&interval)?,
            Item::Size(size) => next.size = parse_size(&size)?,
        }
        pending = true;
    }

    if pending {
        return Err(ConfigError::TrailingOptions);
    }
    if destinations.is_empty() {
        return Err(ConfigError::NoDestinations);
    }
    Ok(destinations)
}

/// Parse an interval in (fractional) seconds, rounded up to whole nanoseconds.
pub fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidInterval(value.to_string());
    let secs: f64 = value.trim().parse().map_err(|_| invalid())?;
    if !secs.is_finite() || secs < MIN_INTERVAL.as_secs_f64() {
        return Err(invalid());
    }
    let nanos = (secs * 1e9).ceil();
    if nanos >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(nanos as u64))
}

/// Parse an echo body size.
pub fn parse_size(value: &str) -> Result<u16, ConfigError> {
    value
        .parse::<u16>()
        .ok()
        .filter(|size| (MIN_PROBE_SIZE..=MAX_PROBE_SIZE).contains(&usize::from(*size)))
        .ok_or_else(|| ConfigError::InvalidSize(value.to_string()))
}

/// Parse a source address literal.
pub fn parse_source(value: &str) -> Result<IpAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidSource(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Invocation, ParseFailure> {
        Args::try_parse_invocation(std::iter::once("authping").chain(args.iter().copied()))
    }

    fn destinations(args: &[&str]) -> Vec<DestinationConfig> {
        parse(args).unwrap().destinations
    }

    #[test]
    fn test_defaults() {
        let dests = destinations(&["example.com"]);
        assert_eq!(dests, vec![DestinationConfig::new("example.com")]);
        assert_eq!(dests[0].interval, Duration::from_secs(1));
        assert_eq!(dests[0].size, 56);
    }

    #[test]
    fn test_options_are_sticky() {
        let dests = destinations(&["-i", "0.5", "a", "-s", "100", "b", "--dest", "c"]);
        assert_eq!(dests.len(), 3);
        assert_eq!(dests[0].interval, Duration::from_millis(500));
        assert_eq!(dests[0].size, 56);
        assert_eq!(dests[1].size, 100);
        assert_eq!(dests[2].size, 100);
        assert_eq!(dests[2].interval, Duration::from_millis(500));
        assert_eq!(dests[2].destination, "c");
    }

    #[test]
    fn test_comment_applies_once() {
        let dests = destinations(&["--comment", "edge", "--host-tag=probe1", "a", "b"]);
        assert_eq!(dests[0].comment, "edge");
        assert_eq!(dests[1].comment, "");
        assert_eq!(dests[0].host_tag, "probe1");
        assert_eq!(dests[1].host_tag, "probe1");
    }

    #[test]
    fn test_protocol_flags_follow_order() {
        let dests = destinations(&["-4", "a", "-6", "b", "-4", "c", "--prefer-ipv6", "d"]);
        let protocols: Vec<_> = dests.iter().map(|d| d.protocol).collect();
        assert_eq!(
            protocols,
            vec![
                ProtocolPreference::V4Only,
                ProtocolPreference::V6Only,
                ProtocolPreference::V4Only,
                ProtocolPreference::Auto,
            ]
        );
    }

    #[test]
    fn test_source_address() {
        let dests = destinations(&["-I", "192.0.2.1", "a"]);
        assert_eq!(dests[0].source, Some("192.0.2.1".parse().unwrap()));
        assert!(matches!(
            parse(&["-I", "not-an-ip", "a"]),
            Err(ParseFailure::Config(ConfigError::InvalidSource(_)))
        ));
    }

    #[test]
    fn test_trailing_options_rejected() {
        assert!(matches!(
            parse(&["a", "-i", "2"]),
            Err(ParseFailure::Config(ConfigError::TrailingOptions))
        ));
    }

    #[test]
    fn test_no_destinations() {
        assert!(matches!(
            parse(&[]),
            Err(ParseFailure::Config(ConfigError::NoDestinations))
        ));
    }

    #[test]
    fn test_verbose_count() {
        assert_eq!(parse(&["-vv", "a"]).unwrap().verbose, 2);
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("0.002").unwrap(), Duration::from_millis(2));
        assert_eq!(parse_interval("1").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_interval("1e-9").ok(), None);
        assert_eq!(parse_interval("0.0019").ok(), None);
        assert_eq!(parse_interval("-1").ok(), None);
        assert_eq!(parse_interval("NaN").ok(), None);
        assert_eq!(parse_interval("inf").ok(), None);
        assert_eq!(parse_interval("abc").ok(), None);
    }

    #[test]
    fn test_parse_interval_rounds_up() {
        assert_eq!(
            parse_interval("0.0020000001").unwrap(),
            Duration::from_nanos(2_000_001)
        );
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("40").unwrap(), 40);
        assert_eq!(parse_size("65528").unwrap(), 65528);
        assert!(parse_size("39").is_err());
        assert!(parse_size("65529").is_err());
        assert!(parse_size("70000").is_err());
        assert!(parse_size("-1").is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = DestinationConfig::new("a");
        assert!(config.validate().is_ok());
        config.interval = Duration::from_millis(1);
        assert!(config.validate().is_err());
        config.interval = Duration::from_secs(1);
        config.size = 20;
        assert!(config.validate().is_err());
    }
}
