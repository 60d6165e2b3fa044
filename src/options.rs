//! Parsing Options.
//! `--net {kind}` or `-k` picks the demo net, see `pn-run --help`.

use clap::{Arg, ArgAction, Command, value_parser};
use std::error::Error;
use std::path::PathBuf;

use crate::demo::NetKind;
use crate::net::Weight;

/// Largest arc weight accepted on the command line.
pub const MAX_WEIGHT: Weight = 10_000;

fn make_options_parser() -> clap::Command {
    Command::new("pn-run")
        .no_binary_name(true)
        .version("v0.1.0")
        .about("Runs a place/transition net until it terminates")
        .args_override_self(true)
        .arg(
            Arg::new("net")
                .short('k')
                .long("net")
                .help("The demo net to run")
                .default_value("n-tester")
                .value_parser(["n-tester", "two-input", "drain"]),
        )
        .arg(
            Arg::new("size")
                .short('n')
                .long("size")
                .help("Size parameter of the n-tester net")
                .default_value("2")
                .value_parser(value_parser!(u64).range(2..)),
        )
        .arg(
            Arg::new("weights")
                .short('w')
                .long("weights")
                .value_name("W1,W2,W3")
                .help("Arc weights of the two-input net, each in 1..=10000")
                .default_value("1,1,1"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .default_value("pn-run.toml"),
        )
        .arg(
            Arg::new("graph")
                .short('g')
                .long("graph")
                .value_name("FILE")
                .help("Write the graphviz description of the net"),
        )
        .arg(
            Arg::new("topology")
                .long("topology")
                .value_name("FILE")
                .help("Write the structured topology (.ron for RON, JSON otherwise)"),
        )
        .arg(
            Arg::new("records")
                .short('r')
                .long("records")
                .value_name("FILE")
                .help("Write merged observer records (.ron for RON, JSON otherwise)"),
        )
        .arg(
            Arg::new("slow-motion")
                .long("slow-motion")
                .action(ArgAction::SetTrue)
                .help("Sleep between turns"),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout-ms")
                .value_name("MS")
                .help("Terminate the run after this many milliseconds")
                .value_parser(value_parser!(u64)),
        )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub net: NetKind,
    pub size: Weight,
    pub weights: [Weight; 3],
    pub config: PathBuf,
    pub graph: Option<PathBuf>,
    pub topology: Option<PathBuf>,
    pub records: Option<PathBuf>,
    pub slow_motion: bool,
    pub timeout_ms: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            net: NetKind::NTester,
            size: 2,
            weights: [1, 1, 1],
            config: PathBuf::from("pn-run.toml"),
            graph: None,
            topology: None,
            records: None,
            slow_motion: false,
            timeout_ms: None,
        }
    }
}

impl Options {
    pub fn parse_from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        let flags = shellwords::split(s)?;
        Self::parse_from_args(&flags)
    }

    /// Parses `flags`; when an option is repeated the last occurrence wins.
    pub fn parse_from_args(flags: &[String]) -> Result<Self, Box<dyn Error>> {
        let app = make_options_parser();
        let matches = app.try_get_matches_from(flags.iter())?;
        let net = match matches.get_one::<String>("net").map(String::as_str) {
            Some("n-tester") => NetKind::NTester,
            Some("two-input") => NetKind::TwoInput,
            Some("drain") => NetKind::Drain,
            _ => return Err("UnsupportedNetKind")?,
        };

        let size = matches.get_one::<u64>("size").copied().unwrap_or(2);
        let weights = match matches.get_one::<String>("weights") {
            Some(raw) => parse_weights(raw)?,
            None => [1, 1, 1],
        };
        let config = matches
            .get_one::<String>("config")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("pn-run.toml"));

        Ok(Options {
            net,
            size,
            weights,
            config,
            graph: matches.get_one::<String>("graph").map(PathBuf::from),
            topology: matches.get_one::<String>("topology").map(PathBuf::from),
            records: matches.get_one::<String>("records").map(PathBuf::from),
            slow_motion: matches.get_flag("slow-motion"),
            timeout_ms: matches.get_one::<u64>("timeout").copied(),
        })
    }
}

fn parse_weights(raw: &str) -> Result<[Weight; 3], Box<dyn Error>> {
    let weights = raw
        .split(',')
        .map(|w| w.trim().parse::<Weight>())
        .collect::<Result<Vec<_>, _>>()?;
    match weights.as_slice() {
        [w1, w2, w3] if weights.iter().all(|w| (1..=MAX_WEIGHT).contains(w)) => {
            Ok([*w1, *w2, *w3])
        }
        _ => Err(format!(
            "expected three weights in 1..={MAX_WEIGHT}, got {raw:?}"
        ))?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_from_str_defaults() {
        let options = Options::parse_from_str("").unwrap();
        assert_eq!(options, Options::default());
    }

    #[test]
    fn test_parse_from_str() {
        let options = Options::parse_from_str(
            "-k two-input -w '2, 1,3' --slow-motion -t 250 -r out/records.ron -g net.gv \
             --topology net.json",
        )
        .unwrap();
        assert_eq!(options.net, NetKind::TwoInput);
        assert_eq!(options.weights, [2, 1, 3]);
        assert!(options.slow_motion);
        assert_eq!(options.timeout_ms, Some(250));
        assert_eq!(options.records, Some(PathBuf::from("out/records.ron")));
        assert_eq!(options.graph, Some(PathBuf::from("net.gv")));
        assert_eq!(options.topology, Some(PathBuf::from("net.json")));
    }

    #[test]
    fn test_later_flags_win() {
        let flags: Vec<String> = ["-k", "drain", "-n", "3", "-k", "n-tester"]
            .into_iter()
            .map(String::from)
            .collect();
        let options = Options::parse_from_args(&flags).unwrap();
        assert_eq!(options.net, NetKind::NTester);
        assert_eq!(options.size, 3);
    }

    #[test]
    fn test_parse_from_str_err() {
        assert!(Options::parse_from_str("-k unknown").is_err());
        assert!(Options::parse_from_str("-n 1").is_err());
        assert!(Options::parse_from_str("-w 1,0,2").is_err());
        assert!(Options::parse_from_str("-w 1,2").is_err());
    }

    #[test]
    fn test_weights_are_bounded() {
        let options = Options::parse_from_str("-w 10000,1,1").unwrap();
        assert_eq!(options.weights, [MAX_WEIGHT, 1, 1]);
        assert!(Options::parse_from_str("-w 10001,1,1").is_err());
        assert!(Options::parse_from_str("-w 4294967296,4294967296,10").is_err());
        assert!(Options::parse_from_str("-w 18446744073709551615,1,1").is_err());
    }
}
