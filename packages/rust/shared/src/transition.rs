//! Page-transition codec.
//!
//! The history format stores how a navigation started as a 32-bit bitmask:
//! the base kind in the low byte, qualifier and redirect-chain flags above
//! it. Everything outside the storage layer works with [`Transition`] and
//! [`TransitionKind`]; the mask exists only at the database boundary.

use serde::{Deserialize, Serialize};

use crate::error::HistoryError;

/// Mask selecting the base transition kind; everything above it is
/// qualifier and chain flags.
const CORE_MASK: u32 = 0xFF;
/// Flag marking the first navigation in a redirect chain.
const CHAIN_START: u32 = 0x1000_0000;
/// Flag marking the last navigation in a redirect chain.
const CHAIN_END: u32 = 0x2000_0000;

/// How a navigation was initiated.
///
/// Discriminants match the stored base values, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Link,
    Typed,
    AutoBookmark,
    AutoSubframe,
    ManualSubframe,
    Generated,
    AutoToplevel,
    FormSubmit,
    Reload,
    Keyword,
    KeywordGenerated,
}

impl TransitionKind {
    /// Every kind, in stored-value order.
    pub const ALL: [TransitionKind; 11] = [
        TransitionKind::Link,
        TransitionKind::Typed,
        TransitionKind::AutoBookmark,
        TransitionKind::AutoSubframe,
        TransitionKind::ManualSubframe,
        TransitionKind::Generated,
        TransitionKind::AutoToplevel,
        TransitionKind::FormSubmit,
        TransitionKind::Reload,
        TransitionKind::Keyword,
        TransitionKind::KeywordGenerated,
    ];

    /// Stable string name used in DTOs and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::Link => "link",
            TransitionKind::Typed => "typed",
            TransitionKind::AutoBookmark => "auto_bookmark",
            TransitionKind::AutoSubframe => "auto_subframe",
            TransitionKind::ManualSubframe => "manual_subframe",
            TransitionKind::Generated => "generated",
            TransitionKind::AutoToplevel => "auto_toplevel",
            TransitionKind::FormSubmit => "form_submit",
            TransitionKind::Reload => "reload",
            TransitionKind::Keyword => "keyword",
            TransitionKind::KeywordGenerated => "keyword_generated",
        }
    }

    fn core_value(self) -> u32 {
        self as u32
    }

    fn from_core_value(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.core_value() == value)
    }
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransitionKind {
    type Err = HistoryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| HistoryError::invalid_argument(format!("unknown transition kind: {s}")))
    }
}

/// A decoded transition: base kind plus redirect-chain flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub kind: TransitionKind,
    pub chain_start: bool,
    pub chain_end: bool,
}

impl Transition {
    /// A complete single-hop navigation: chain start and end both set.
    /// Every visit written by the history service is stamped this way.
    pub fn navigation(kind: TransitionKind) -> Self {
        Self {
            kind,
            chain_start: true,
            chain_end: true,
        }
    }

    /// Serialize to the legacy storage bitmask.
    pub fn to_mask(self) -> u32 {
        let mut mask = self.kind.core_value();
        if self.chain_start {
            mask |= CHAIN_START;
        }
        if self.chain_end {
            mask |= CHAIN_END;
        }
        mask
    }

    /// Decode a stored bitmask, masking qualifier bits off the base kind.
    /// Returns `None` for an unrecognized base value.
    pub fn from_mask(mask: u32) -> Option<Self> {
        let kind = TransitionKind::from_core_value(mask & CORE_MASK)?;
        Some(Self {
            kind,
            chain_start: mask & CHAIN_START != 0,
            chain_end: mask & CHAIN_END != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_round_trip_recovers_every_base_kind() {
        for kind in TransitionKind::ALL {
            let mask = Transition::navigation(kind).to_mask();
            let decoded = Transition::from_mask(mask).expect("decode");
            assert_eq!(decoded.kind, kind);
            assert!(decoded.chain_start);
            assert!(decoded.chain_end);
        }
    }

    #[test]
    fn qualifier_bits_do_not_leak_into_the_kind() {
        // A typed navigation with an unrelated qualifier flag set.
        let mask = TransitionKind::Typed.core_value() | 0x0100_0000;
        let decoded = Transition::from_mask(mask).expect("decode");
        assert_eq!(decoded.kind, TransitionKind::Typed);
        assert!(!decoded.chain_start);
        assert!(!decoded.chain_end);
    }

    #[test]
    fn unknown_base_value_is_rejected() {
        assert!(Transition::from_mask(0xAB).is_none());
    }

    #[test]
    fn string_vocabulary_round_trips() {
        for kind in TransitionKind::ALL {
            let parsed: TransitionKind = kind.as_str().parse().expect("parse");
            assert_eq!(parsed, kind);
        }
        assert!("middle_click".parse::<TransitionKind>().is_err());
    }

    #[test]
    fn navigation_mask_matches_the_legacy_layout() {
        let mask = Transition::navigation(TransitionKind::Link).to_mask();
        assert_eq!(mask, 0x3000_0000);
    }
}
