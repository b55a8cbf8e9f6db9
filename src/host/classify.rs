//! Iteration classification
//!
//! A non-`Ok` status in the reply wins over the payload comparison.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::protocol::{Criterion, Status, TestReply, DATA_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Match,
    Mismatch,
    Timeout,
    RoutineError,
    InterruptError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Match => "match",
            Outcome::Mismatch => "mismatch",
            Outcome::Timeout => "timeout",
            Outcome::RoutineError => "routine-error",
            Outcome::InterruptError => "interrupt-error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One iteration of one sub-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestResult {
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// `echoed` lies in `[sent - range, sent + range]`.
pub fn within_tolerance(sent: u8, echoed: u8, range: u8) -> bool {
    let (sent, echoed, range) = (i16::from(sent), i16::from(echoed), i16::from(range));
    sent - range <= echoed && echoed <= sent + range
}

pub fn classify(criterion: Criterion, tolerance: u8, sent: &[u8; DATA_LEN], reply: &TestReply) -> Outcome {
    match reply.status {
        Status::Ok => {}
        Status::RoutineError => return Outcome::RoutineError,
        Status::InterruptError => return Outcome::InterruptError,
        Status::OverTime => return Outcome::Timeout,
        // The request sentinel came back untouched.
        Status::Mismatch => return Outcome::Mismatch,
    }
    let matched = match criterion {
        Criterion::ExactMatch => reply.data == *sent,
        Criterion::Tolerance => within_tolerance(sent[0], reply.data[0], tolerance),
    };
    if matched {
        Outcome::Match
    } else {
        Outcome::Mismatch
    }
}
