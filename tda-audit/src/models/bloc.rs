//! Bloc identity and lifecycle state machine
//!
//! Each audit runs seven blocs. Every bloc moves through:
//! PENDING → RUNNING → {DONE, ERROR, AWAITING_VALIDATION}
//!
//! AWAITING_VALIDATION is terminal for the segment but not for the bloc: the
//! next segment moves it back to RUNNING through the validation gate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The seven audit blocs, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlocName {
    /// 1: positioning synthesis and official domain detection
    Positioning,
    /// 2: domain metrics and social insights
    DigitalPresence,
    /// 3: ranked keywords of the destination domain
    SeoVisibility,
    /// 4: keyword candidates (gate 1) then live SERP verification
    KeywordOpportunities,
    /// 5: accommodation listings counted by geographic partitioning
    AccommodationStock,
    /// 6: activity listings and offer synthesis
    ActivityOffer,
    /// 7: competitor candidates (gate 2) then comparative synthesis
    Competitors,
}

impl BlocName {
    pub const ALL: [BlocName; 7] = [
        BlocName::Positioning,
        BlocName::DigitalPresence,
        BlocName::SeoVisibility,
        BlocName::KeywordOpportunities,
        BlocName::AccommodationStock,
        BlocName::ActivityOffer,
        BlocName::Competitors,
    ];

    /// Wire/storage key
    pub fn as_str(self) -> &'static str {
        match self {
            BlocName::Positioning => "positioning",
            BlocName::DigitalPresence => "digital_presence",
            BlocName::SeoVisibility => "seo_visibility",
            BlocName::KeywordOpportunities => "keyword_opportunities",
            BlocName::AccommodationStock => "accommodation_stock",
            BlocName::ActivityOffer => "activity_offer",
            BlocName::Competitors => "competitors",
        }
    }

    /// 1-based position in the pipeline
    pub fn number(self) -> u8 {
        match self {
            BlocName::Positioning => 1,
            BlocName::DigitalPresence => 2,
            BlocName::SeoVisibility => 3,
            BlocName::KeywordOpportunities => 4,
            BlocName::AccommodationStock => 5,
            BlocName::ActivityOffer => 6,
            BlocName::Competitors => 7,
        }
    }

    /// Cost ledger key for one phase of this bloc
    ///
    /// Phased blocs get one key per phase so a Phase B write never replaces
    /// the Phase A entry.
    pub fn ledger_key(self, phase: BlocPhase) -> String {
        match phase {
            BlocPhase::Single => self.as_str().to_string(),
            BlocPhase::A => format!("{}.a", self.as_str()),
            BlocPhase::B => format!("{}.b", self.as_str()),
        }
    }
}

impl fmt::Display for BlocName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlocName {
    type Err = UnknownBloc;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlocName::ALL
            .into_iter()
            .find(|bloc| bloc.as_str() == s)
            .ok_or_else(|| UnknownBloc(s.to_string()))
    }
}

/// Unrecognized bloc key (corrupted row or typo in a request)
#[derive(Debug, Error)]
#[error("Unknown bloc: {0}")]
pub struct UnknownBloc(pub String);

/// Phase of a bloc executed by one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlocPhase {
    Single,
    A,
    B,
}

impl fmt::Display for BlocPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlocPhase::Single => f.write_str("single"),
            BlocPhase::A => f.write_str("a"),
            BlocPhase::B => f.write_str("b"),
        }
    }
}

/// Per-audit bloc status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlocStatus {
    Pending,
    Running,
    Done,
    Error,
    AwaitingValidation,
}

impl BlocStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BlocStatus::Pending => "pending",
            BlocStatus::Running => "running",
            BlocStatus::Done => "done",
            BlocStatus::Error => "error",
            BlocStatus::AwaitingValidation => "awaiting_validation",
        }
    }

    /// Whether `self → next` is a legal lifecycle transition
    ///
    /// Returning to PENDING is not a transition: it only happens through an
    /// explicit audit reset.
    pub fn can_transition_to(self, next: BlocStatus) -> bool {
        use BlocStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Done)
                | (Running, Error)
                | (Running, AwaitingValidation)
                | (AwaitingValidation, Running)
        )
    }

    /// Validate a transition, producing a conflict error when illegal
    pub fn check_transition(
        self,
        bloc: BlocName,
        next: BlocStatus,
    ) -> Result<(), IllegalTransition> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(IllegalTransition {
                bloc,
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for BlocStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlocStatus {
    type Err = UnknownBloc;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BlocStatus::Pending),
            "running" => Ok(BlocStatus::Running),
            "done" => Ok(BlocStatus::Done),
            "error" => Ok(BlocStatus::Error),
            "awaiting_validation" => Ok(BlocStatus::AwaitingValidation),
            other => Err(UnknownBloc(format!("status {}", other))),
        }
    }
}

/// Rejected bloc status transition
#[derive(Debug, Clone, Error)]
#[error("Bloc {bloc} cannot move from {from} to {to}")]
pub struct IllegalTransition {
    pub bloc: BlocName,
    pub from: BlocStatus,
    pub to: BlocStatus,
}

impl From<IllegalTransition> for tda_common::Error {
    fn from(err: IllegalTransition) -> Self {
        tda_common::Error::Conflict(err.to_string())
    }
}
