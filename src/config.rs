//! Configuration file parsing.
//!
//! Grammar (see spec §6 / SPEC_FULL §9): line-oriented `key value` pairs,
//! `#` comments and blank lines ignored. The format has no nesting and no
//! repeated structure beyond "one `run` line per stage", so a hand-rolled
//! line parser is the idiomatic choice here rather than pulling in serde
//! for five flat keys — the teacher crate takes the same "no framework
//! where none is warranted" stance with its `repr(C)` structs.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddrV4;
use std::path::PathBuf;

use crate::error::invalid;

/// The five pipeline stages, as named in the config grammar and used to
/// tag log lines and child processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Clear,
    Crypto,
    Encrypt,
    Decrypt,
    Keying,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Clear,
        Stage::Crypto,
        Stage::Encrypt,
        Stage::Decrypt,
        Stage::Keying,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Clear => "clear",
            Stage::Crypto => "crypto",
            Stage::Encrypt => "encrypt",
            Stage::Decrypt => "decrypt",
            Stage::Keying => "keying",
        }
    }

    fn parse(s: &str) -> Option<Stage> {
        match s {
            "clear" => Some(Stage::Clear),
            "crypto" => Some(Stage::Crypto),
            "encrypt" => Some(Stage::Encrypt),
            "decrypt" => Some(Stage::Decrypt),
            "keying" => Some(Stage::Keying),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether an idle stage worker spins (`perf`) or sleeps briefly between
/// sweeps (`balanced`, the default) — see spec §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePolicy {
    Balanced,
    Perf,
}

/// Parsed configuration, the object every stage and the supervisor are
/// handed explicitly at startup (no global/singleton, per spec §9).
#[derive(Debug, Clone)]
pub struct Config {
    pub peer: SocketAddrV4,
    pub local: SocketAddrV4,
    pub run_as: HashMap<Stage, String>,
    pub keying_path: PathBuf,
    pub keying_uid: Option<u32>,
    pub keying_gid: Option<u32>,
    pub control_path: PathBuf,
    pub instance: Option<String>,
    pub idle_policy: IdlePolicy,
}

impl Config {
    /// Parse a config file from its path.
    pub fn load(path: &std::path::Path) -> std::io::Result<Config> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse a config file already read into memory. Split out for unit
    /// testing without touching the filesystem.
    pub fn parse(text: &str) -> std::io::Result<Config> {
        let mut peer = None;
        let mut local = None;
        let mut run_as = HashMap::new();
        let mut keying_path = PathBuf::from("/var/run/signsky/keying.sock");
        let mut keying_uid = None;
        let mut keying_gid = None;
        let mut control_path = PathBuf::from("/var/run/signsky/control.sock");
        let mut instance = None;
        let mut idle_policy = IdlePolicy::Balanced;

        for (lineno, raw) in text.lines().enumerate() {
            let lineno = lineno + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut words = line.split_whitespace();
            let key = words
                .next()
                .ok_or_else(|| invalid(format!("line {lineno}: empty key")))?;

            match key {
                "peer" => {
                    let val = expect_value(&mut words, lineno, "peer")?;
                    peer = Some(parse_addr(val, lineno)?);
                }
                "local" => {
                    let val = expect_value(&mut words, lineno, "local")?;
                    local = Some(parse_addr(val, lineno)?);
                }
                "run" => {
                    let stage_str = expect_value(&mut words, lineno, "run")?;
                    let as_word = words
                        .next()
                        .filter(|w| *w == "as")
                        .ok_or_else(|| invalid(format!("line {lineno}: expected `as` after stage name")))?;
                    let _ = as_word;
                    let user = expect_value(&mut words, lineno, "run ... as")?;
                    let stage = Stage::parse(stage_str).ok_or_else(|| {
                        invalid(format!("line {lineno}: unknown stage `{stage_str}`"))
                    })?;
                    run_as.insert(stage, user.to_string());
                }
                "keying" => {
                    keying_path = PathBuf::from(expect_value(&mut words, lineno, "keying")?);
                }
                "keying_uid" => {
                    keying_uid = Some(parse_u32(expect_value(&mut words, lineno, "keying_uid")?, lineno)?);
                }
                "keying_gid" => {
                    keying_gid = Some(parse_u32(expect_value(&mut words, lineno, "keying_gid")?, lineno)?);
                }
                "control" => {
                    control_path = PathBuf::from(expect_value(&mut words, lineno, "control")?);
                }
                "instance" => {
                    instance = Some(expect_value(&mut words, lineno, "instance")?.to_string());
                }
                "mode" => {
                    let val = expect_value(&mut words, lineno, "mode")?;
                    idle_policy = match val {
                        "balanced" => IdlePolicy::Balanced,
                        "perf" => IdlePolicy::Perf,
                        other => {
                            return Err(invalid(format!(
                                "line {lineno}: unknown mode `{other}`, expected balanced|perf"
                            )))
                        }
                    };
                }
                other => {
                    return Err(invalid(format!("line {lineno}: unknown config key `{other}`")));
                }
            }
        }

        Ok(Config {
            peer: peer.ok_or_else(|| invalid("missing required `peer` directive"))?,
            local: local.ok_or_else(|| invalid("missing required `local` directive"))?,
            run_as,
            keying_path,
            keying_uid,
            keying_gid,
            control_path,
            instance,
            idle_policy,
        })
    }

    pub fn user_for(&self, stage: Stage) -> Option<&str> {
        self.run_as.get(&stage).map(String::as_str)
    }
}

fn expect_value<'a>(
    words: &mut impl Iterator<Item = &'a str>,
    lineno: usize,
    key: &str,
) -> std::io::Result<&'a str> {
    words
        .next()
        .ok_or_else(|| invalid(format!("line {lineno}: `{key}` requires a value")))
}

/// IPv6 is an explicit non-goal (spec.md §1), so addresses parse as
/// IPv4 only rather than the more permissive `SocketAddr`.
fn parse_addr(text: &str, lineno: usize) -> std::io::Result<SocketAddrV4> {
    text.parse()
        .map_err(|_| invalid(format!("line {lineno}: invalid ipv4:port `{text}`")))
}

fn parse_u32(text: &str, lineno: usize) -> std::io::Result<u32> {
    text.parse()
        .map_err(|_| invalid(format!("line {lineno}: invalid integer `{text}`")))
}
