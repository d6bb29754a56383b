//! Test-output parsing for the testwatch daemon.
//!
//! This module converts the raw text captured from a test run into a
//! [`TestResultRecord`]. Two line shapes matter, both part of the wire
//! contract with the test framework's console output:
//!
//! - timing lines containing `Finished tests in <float>s,`: the reported
//!   seconds are summed across every such line, since each test file
//!   prints its own block;
//! - results lines matching `<int> assertions, <int> failures`: from each
//!   one, the ordered run of integers on the line maps positionally to
//!   tests, assertions, failures, errors, pendings, omissions and
//!   notifications, and the counters accumulate across lines.
//!
//! An output with no results line at all parses to the all-zero record,
//! which classifies as failure. That distinguishes a runner that crashed
//! before printing its summary from a run that genuinely reported zero
//! failures.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::TestResultRecord;

/// Number of positional counters on a results line.
const COUNTER_POSITIONS: usize = 7;

/// Matches a results line anywhere within a line of output.
fn results_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+ assertions, \d+ failures").expect("results line pattern"))
}

/// Matches the reported elapsed seconds on a timing line.
fn timing_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Finished tests in (.+)s, ").expect("timing pattern"))
}

/// Parses raw captured output into a result record.
///
/// Pure and idempotent: identical input yields an identical record.
#[must_use]
pub fn parse(raw_output: &str) -> TestResultRecord {
    let mut record = TestResultRecord::default();

    for line in raw_output.lines() {
        if let Some(caps) = timing_pattern().captures(line) {
            record.elapsed_secs += leading_float(&caps[1]);
        }

        if results_line_pattern().is_match(line) {
            let counters = positional_counters(line);
            record.tests += counters[0];
            record.assertions += counters[1];
            record.failures += counters[2];
            record.errors += counters[3];
            record.pendings += counters[4];
            record.omissions += counters[5];
            record.notifications += counters[6];
        }
    }

    record
}

/// Extracts the ordered integers from a results line.
///
/// Runs of non-digit characters act as delimiters; positions past the end
/// of the line default to 0. Counters too large for `u64` saturate rather
/// than fail, since a summary line that long is already garbage.
fn positional_counters(line: &str) -> [u64; COUNTER_POSITIONS] {
    let mut counters = [0u64; COUNTER_POSITIONS];
    let digits = line
        .split(|c: char| !c.is_ascii_digit())
        .filter(|chunk| !chunk.is_empty());

    for (slot, chunk) in counters.iter_mut().zip(digits) {
        *slot = chunk.parse::<u64>().unwrap_or(u64::MAX);
    }

    counters
}

/// Parses the longest numeric prefix of a string as a float, yielding 0.0
/// when there is none.
///
/// The timing capture is greedy, so on verbose timing lines it can drag in
/// trailing rate figures; only the leading number is the elapsed time.
fn leading_float(text: &str) -> f64 {
    let text = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;

    for (idx, c) in text.char_indices() {
        match c {
            '0'..='9' => end = idx + 1,
            '.' if !seen_dot => {
                seen_dot = true;
                end = idx + 1;
            }
            _ => break,
        }
    }

    text[..end].trim_end_matches('.').parse::<f64>().unwrap_or(0.0)
}
