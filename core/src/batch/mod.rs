//! Command batch loading and validation: the JSON schema for a replayable
//! script of commands, and the checks that run once at load time (non-empty
//! version/commands, well-formed `expect` blocks, strictly positive
//! timeouts) so a malformed batch is rejected before the sequencer ever
//! sees it. [`sequencer`] is the execution half.

pub mod sequencer;

pub use sequencer::Sequencer;

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::job::ExecSpec;

#[derive(Debug, Clone, Deserialize)]
struct RawBatchFile {
    version: String,
    #[serde(default)]
    #[allow(dead_code)]
    metadata: serde_json::Value,
    commands: Vec<RawCommandDef>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawExec {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(rename = "workingDir", default)]
    working_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawExpect {
    mode: Option<String>,
    code: Option<i32>,
    codes: Option<Vec<i32>>,
    min: Option<i32>,
    max: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCommandDef {
    name: Option<String>,
    #[allow(dead_code)]
    description: Option<String>,
    #[serde(rename = "async", default)]
    is_async: bool,
    exec: RawExec,
    #[serde(default)]
    expect: RawExpect,
    #[serde(rename = "timeoutSeconds")]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    env: HashMap<String, String>,
    stdin: Option<String>,
}

/// How the batch sequencer interprets a predecessor's return code before
/// starting the next command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    Any,
    Eq(i32),
    Ne(i32),
    In(Vec<i32>),
    NotIn(Vec<i32>),
    Range(i32, i32),
}

impl Expectation {
    pub fn matches(&self, code: i32) -> bool {
        match self {
            Expectation::Any => true,
            Expectation::Eq(want) => code == *want,
            Expectation::Ne(want) => code != *want,
            Expectation::In(codes) => codes.contains(&code),
            Expectation::NotIn(codes) => !codes.contains(&code),
            Expectation::Range(min, max) => *min <= code && code <= *max,
        }
    }

    fn from_raw(raw: RawExpect) -> Result<Self> {
        let mode = raw.mode.as_deref().unwrap_or("eq");
        match mode {
            "any" => Ok(Expectation::Any),
            "eq" => Ok(Expectation::Eq(raw.code.unwrap_or(0))),
            "ne" => Ok(Expectation::Ne(raw.code.unwrap_or(0))),
            "in" => {
                let codes = raw
                    .codes
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| Error::MalformedBatch("expect.mode \"in\" requires non-empty codes".into()))?;
                Ok(Expectation::In(codes))
            }
            "notin" => {
                let codes = raw
                    .codes
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| Error::MalformedBatch("expect.mode \"notin\" requires non-empty codes".into()))?;
                Ok(Expectation::NotIn(codes))
            }
            "range" => {
                let min = raw
                    .min
                    .ok_or_else(|| Error::MalformedBatch("expect.mode \"range\" requires min".into()))?;
                let max = raw
                    .max
                    .ok_or_else(|| Error::MalformedBatch("expect.mode \"range\" requires max".into()))?;
                if min > max {
                    return Err(Error::MalformedBatch(format!(
                        "expect.mode \"range\" requires min <= max, got {min} > {max}"
                    )));
                }
                Ok(Expectation::Range(min, max))
            }
            other => Err(Error::MalformedBatch(format!("unknown expect.mode {other:?}"))),
        }
    }
}

/// One validated entry in a command batch.
#[derive(Debug, Clone)]
pub struct CommandDef {
    pub name: String,
    pub is_async: bool,
    pub exec: ExecSpec,
    pub expectation: Expectation,
    pub timeout: Option<Duration>,
    pub stdin: Option<Vec<u8>>,
}

impl CommandDef {
    fn from_raw(raw: RawCommandDef) -> Result<Self> {
        if raw.exec.command.is_empty() {
            return Err(Error::MalformedBatch("exec.command must not be empty".into()));
        }
        if let Some(secs) = raw.timeout_seconds {
            if secs == 0 {
                return Err(Error::MalformedBatch(
                    "timeoutSeconds must be strictly positive".into(),
                ));
            }
        }

        let name = raw.name.unwrap_or_else(|| raw.exec.command.clone());
        let mut exec = ExecSpec::new(raw.exec.command, raw.exec.args);
        exec.working_dir = raw.exec.working_dir;
        exec.env = raw.env;

        Ok(CommandDef {
            name,
            is_async: raw.is_async,
            exec,
            expectation: Expectation::from_raw(raw.expect)?,
            timeout: raw.timeout_seconds.map(Duration::from_secs),
            stdin: raw.stdin.map(|s| s.into_bytes()),
        })
    }
}

/// A fully validated command batch, ready for the sequencer.
#[derive(Debug, Clone)]
pub struct Batch {
    pub version: String,
    pub commands: Vec<CommandDef>,
}

impl Batch {
    pub fn parse(json: &str) -> Result<Self> {
        let raw: RawBatchFile = serde_json::from_str(json)?;
        if raw.version.is_empty() {
            return Err(Error::MalformedBatch("version must not be empty".into()));
        }
        if raw.commands.is_empty() {
            return Err(Error::MalformedBatch("commands must not be empty".into()));
        }
        let commands = raw
            .commands
            .into_iter()
            .map(CommandDef::from_raw)
            .collect::<Result<Vec<_>>>()?;
        Ok(Batch {
            version: raw.version,
            commands,
        })
    }

    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_always_matches() {
        assert!(Expectation::Any.matches(0));
        assert!(Expectation::Any.matches(-2));
        assert!(Expectation::Any.matches(255));
    }

    #[test]
    fn eq_default_zero() {
        let e = Expectation::Eq(0);
        assert!(e.matches(0));
        assert!(!e.matches(1));
    }

    #[test]
    fn in_requires_nonempty_codes() {
        let raw = RawExpect {
            mode: Some("in".into()),
            codes: Some(vec![]),
            ..Default::default()
        };
        assert!(Expectation::from_raw(raw).is_err());
    }

    #[test]
    fn range_requires_min_le_max() {
        let raw = RawExpect {
            mode: Some("range".into()),
            min: Some(5),
            max: Some(1),
            ..Default::default()
        };
        assert!(Expectation::from_raw(raw).is_err());
    }

    #[test]
    fn parses_minimal_batch() {
        let json = r#"{
            "version": "1",
            "commands": [
                {"exec": {"command": "echo", "args": ["hi"]}}
            ]
        }"#;
        let batch = Batch::parse(json).unwrap();
        assert_eq!(batch.commands.len(), 1);
        assert_eq!(batch.commands[0].name, "echo");
        assert_eq!(batch.commands[0].expectation, Expectation::Eq(0));
    }

    #[test]
    fn rejects_empty_commands() {
        let json = r#"{"version": "1", "commands": []}"#;
        assert!(Batch::parse(json).is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let json = r#"{
            "version": "1",
            "commands": [
                {"exec": {"command": "echo"}, "timeoutSeconds": 0}
            ]
        }"#;
        assert!(Batch::parse(json).is_err());
    }

    #[test]
    fn carries_stdin_and_env() {
        let json = r#"{
            "version": "1",
            "commands": [
                {"exec": {"command": "cat"}, "stdin": "hello", "env": {"FOO": "bar"}}
            ]
        }"#;
        let batch = Batch::parse(json).unwrap();
        assert_eq!(batch.commands[0].stdin, Some(b"hello".to_vec()));
        assert_eq!(batch.commands[0].exec.env.get("FOO"), Some(&"bar".to_string()));
    }
}
