//! Segment plans
//!
//! A segment is the fixed ordered group of bloc steps executed by one
//! externally-triggered invocation:
//! - A: 1, 2, 3, 4A (ends on the keyword gate)
//! - B: 4B, 5, 6, 7A (ends on the competitor gate)
//! - C: 7B (completes the audit)

use serde::{Deserialize, Serialize};
use std::fmt;

use super::bloc::{BlocName, BlocPhase};

/// One bloc phase inside a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlocStep {
    pub bloc: BlocName,
    pub phase: BlocPhase,
    /// A successful run pauses the segment in AWAITING_VALIDATION
    pub opens_gate: bool,
}

impl BlocStep {
    const fn single(bloc: BlocName) -> Self {
        Self {
            bloc,
            phase: BlocPhase::Single,
            opens_gate: false,
        }
    }

    const fn gate(bloc: BlocName) -> Self {
        Self {
            bloc,
            phase: BlocPhase::A,
            opens_gate: true,
        }
    }

    const fn resume(bloc: BlocName) -> Self {
        Self {
            bloc,
            phase: BlocPhase::B,
            opens_gate: false,
        }
    }

    pub fn ledger_key(&self) -> String {
        self.bloc.ledger_key(self.phase)
    }
}

const SEGMENT_A: [BlocStep; 4] = [
    BlocStep::single(BlocName::Positioning),
    BlocStep::single(BlocName::DigitalPresence),
    BlocStep::single(BlocName::SeoVisibility),
    BlocStep::gate(BlocName::KeywordOpportunities),
];

const SEGMENT_B: [BlocStep; 4] = [
    BlocStep::resume(BlocName::KeywordOpportunities),
    BlocStep::single(BlocName::AccommodationStock),
    BlocStep::single(BlocName::ActivityOffer),
    BlocStep::gate(BlocName::Competitors),
];

const SEGMENT_C: [BlocStep; 1] = [BlocStep::resume(BlocName::Competitors)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    A,
    B,
    C,
}

impl Segment {
    pub fn steps(self) -> &'static [BlocStep] {
        match self {
            Segment::A => &SEGMENT_A,
            Segment::B => &SEGMENT_B,
            Segment::C => &SEGMENT_C,
        }
    }

    /// Bloc whose gate must be open for this segment to start
    pub fn entry_gate(self) -> Option<BlocName> {
        match self {
            Segment::A => None,
            Segment::B => Some(BlocName::KeywordOpportunities),
            Segment::C => Some(BlocName::Competitors),
        }
    }

    /// Bloc whose gate this segment opens, if any
    pub fn exit_gate(self) -> Option<BlocName> {
        self.steps()
            .iter()
            .find(|step| step.opens_gate)
            .map(|step| step.bloc)
    }

    /// The final segment marks the audit complete
    pub fn completes_audit(self) -> bool {
        self == Segment::C
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::A => f.write_str("A"),
            Segment::B => f.write_str("B"),
            Segment::C => f.write_str("C"),
        }
    }
}
