//! Capability dump parsing.
//!
//! `aplay`/`arecord --dump-hw-params` print one or more report blocks fenced
//! by a line of twenty dashes:
//!
//! ```text
//! HW Params of device "hw:1,0":
//! --------------------
//! ACCESS:  MMAP_INTERLEAVED RW_INTERLEAVED
//! FORMAT:  S16_LE S24_3LE
//! CHANNELS: 2
//! RATE: [44100 96000]
//! PERIOD_SIZE: [16 48000]
//! --------------------
//! ```

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::CapabilityEnvelope;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeParseError {
    #[error("no capability report in tool output")]
    NoReport,

    #[error("unparsable {key} value: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

fn report_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)--------------------\n(.*?)\n--------------------")
            .expect("report pattern is valid")
    })
}

fn trailing_int_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+$").expect("trailing integer pattern is valid"))
}

fn strip_brackets(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '(' | ')' | '{' | '}'))
        .collect()
}

fn parse_int(key: &'static str, token: &str) -> Result<u32, ProbeParseError> {
    token.parse().map_err(|_| ProbeParseError::InvalidValue {
        key,
        value: token.to_string(),
    })
}

/// Parse a `min max` pair. A single token is both bounds.
fn parse_range(key: &'static str, value: &str) -> Result<(u32, u32), ProbeParseError> {
    let cleaned = strip_brackets(value);
    let mut tokens = cleaned.split_whitespace();
    let min = match tokens.next() {
        Some(token) => parse_int(key, token)?,
        None => {
            return Err(ProbeParseError::InvalidValue {
                key,
                value: value.to_string(),
            })
        }
    };
    let max = match tokens.next() {
        Some(token) => parse_int(key, token)?,
        None => min,
    };
    Ok((min, max))
}

/// Parse combined stdout/stderr of a capability dump into an envelope.
///
/// Only `FORMAT`, `CHANNELS`, `RATE` and `PERIOD` are read (`PERIOD_SIZE`
/// stands in for `PERIOD`, which is how the real tool spells it). When
/// several blocks are present, later blocks overwrite earlier values.
pub fn parse_hw_params(output: &str) -> Result<CapabilityEnvelope, ProbeParseError> {
    // Reports from the tool may come with CRLF when piped through some shells
    let normalized = output.replace("\r\n", "\n");

    let mut blocks = report_re().captures_iter(&normalized).peekable();
    if blocks.peek().is_none() {
        return Err(ProbeParseError::NoReport);
    }

    let mut envelope = CapabilityEnvelope::default();

    for block in blocks {
        for line in block[1].lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            if value.contains(':') {
                continue;
            }
            let value = value.trim();

            match key.trim() {
                "FORMAT" => {
                    envelope.formats = value.split_whitespace().map(str::to_string).collect();
                }
                "CHANNELS" => {
                    let cleaned = strip_brackets(value);
                    let trailing = trailing_int_re()
                        .find(cleaned.trim_end())
                        .ok_or_else(|| ProbeParseError::InvalidValue {
                            key: "CHANNELS",
                            value: value.to_string(),
                        })?;
                    envelope.max_channels = parse_int("CHANNELS", trailing.as_str())?;
                }
                "RATE" => {
                    let (min, max) = parse_range("RATE", value)?;
                    envelope.rate_min = min;
                    envelope.rate_max = max;
                }
                "PERIOD" | "PERIOD_SIZE" => {
                    let (min, max) = parse_range("PERIOD", value)?;
                    envelope.period_min = min;
                    envelope.period_max = max;
                }
                _ => {}
            }
        }
    }

    Ok(envelope)
}
