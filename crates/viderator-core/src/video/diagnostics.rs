//! Frame-rate recovery from the decoder's stderr log.
//!
//! The log is free text whose exact shape varies between decoder versions,
//! e.g.
//!
//! ```text
//! Stream #0:0: Video: mpeg4, yuv420p, 1280x720 [SAR 1:1 DAR 16:9], 29.97 fps, 29.97 tbr, 29.97 tbn
//! ```
//!
//! Each line is run through [`RULES`] in order and the first rule with an
//! opinion decides the outcome.

use std::io::BufRead;

use tracing::{debug, error, info};

use crate::error::{ExtractError, Result};

/// What a rule concluded about one line.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Verdict {
    Rate(f64),
    Fatal,
}

struct Rule {
    name: &'static str,
    apply: fn(&str) -> Option<Verdict>,
}

const MISSING_INPUT: &str = "No such file or directory";
const MUXER_RATE_LIMIT: &str = "Frame rate very high for a muxer not efficiently supporting it";

const RULES: &[Rule] = &[
    Rule {
        name: "missing-input",
        apply: |line| line.contains(MISSING_INPUT).then_some(Verdict::Fatal),
    },
    Rule {
        name: "muxer-rate-limit",
        apply: |line| line.contains(MUXER_RATE_LIMIT).then_some(Verdict::Fatal),
    },
    Rule {
        name: "stream-tbr",
        apply: |line| stream_rate(line, "tbr").map(Verdict::Rate),
    },
    Rule {
        name: "stream-fps",
        apply: |line| stream_rate(line, "fps").map(Verdict::Rate),
    },
];

/// Read lines until one yields a frame rate or a fatal condition.
///
/// Takes the stream by value: it is closed on return and never read again.
pub fn read_fps<R: BufRead>(mut diagnostics: R) -> Result<f64> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if diagnostics.read_until(b'\n', &mut buf)? == 0 {
            error!("decoder diagnostics ended before a frame rate was reported");
            return Err(ExtractError::FpsParse { line: None });
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end();
        debug!(line, "decoder diagnostic");

        for rule in RULES {
            match (rule.apply)(line) {
                Some(Verdict::Rate(fps)) => {
                    info!(fps, rule = rule.name, "frame rate found");
                    return Ok(fps);
                }
                Some(Verdict::Fatal) => {
                    error!(line, rule = rule.name, "decoder reported a fatal condition");
                    return Err(ExtractError::FpsParse {
                        line: Some(line.to_string()),
                    });
                }
                None => {}
            }
        }
    }
}

/// Extract `<decimal> <unit>` from a video stream description line.
///
/// The last occurrence of the unit wins, matching a greedy scan over the
/// stream details.
fn stream_rate(line: &str, unit: &str) -> Option<f64> {
    let stream = line.find("Stream #")?;
    let details = &line[stream..];
    let video = details.find(" Video: ")?;
    let details = &details[video + " Video: ".len()..];

    details
        .rmatch_indices(unit)
        .filter_map(|(at, _)| details[..at].strip_suffix(' '))
        .filter_map(|before| before.rsplit(' ').next())
        .find_map(parse_rate)
}

fn parse_rate(token: &str) -> Option<f64> {
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    token
        .parse::<f64>()
        .ok()
        .filter(|fps| fps.is_finite() && *fps > 0.0)
}
