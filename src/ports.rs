//! Port allocation for managed servers.
//!
//! Every server on a host gets one game port and one admin console port,
//! drawn from two disjoint configurable ranges. Selection is deterministic
//! (lowest free wins) so freed ports are reused promptly and test
//! expectations stay stable.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default game port range, starting at the well-known game port.
pub const DEFAULT_GAME_RANGE: PortRange = PortRange {
    start: 25565,
    end: 25864,
};

/// Default admin console port range, disjoint from the game range.
pub const DEFAULT_CONSOLE_RANGE: PortRange = PortRange {
    start: 26565,
    end: 26864,
};

/// An inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port in the range
    pub start: u16,
    /// Last port in the range (inclusive)
    pub end: u16,
}

impl PortRange {
    /// Returns true if `port` falls inside the range.
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// Number of ports in the range.
    pub fn len(&self) -> usize {
        (self.end as usize).saturating_sub(self.start as usize) + 1
    }

    /// True when the range holds no ports.
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Lowest port of the range not present in `used`.
    fn first_free(&self, used: &HashSet<u16>) -> Option<u16> {
        (self.start..=self.end).find(|p| !used.contains(p))
    }
}

/// The two ports assigned to one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    /// Public game port
    pub game: u16,
    /// Admin console port
    pub console: u16,
}

/// Allocates port pairs against a host's current assignments.
///
/// The allocator itself is pure; callers collect the in-use sets from the
/// state store and pass them in. Uniqueness per host ultimately rests on
/// the store insert running under the same view it validated against.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    game_range: PortRange,
    console_range: PortRange,
}

impl PortAllocator {
    /// Creates an allocator over the two ranges. The ranges must be
    /// disjoint.
    pub fn new(game_range: PortRange, console_range: PortRange) -> Result<Self> {
        if game_range.is_empty() || console_range.is_empty() {
            return Err(Error::Configuration("port range is empty".into()));
        }
        let overlap = game_range.start <= console_range.end && console_range.start <= game_range.end;
        if overlap {
            return Err(Error::Configuration(format!(
                "game range {}-{} overlaps console range {}-{}",
                game_range.start, game_range.end, console_range.start, console_range.end
            )));
        }
        Ok(Self {
            game_range,
            console_range,
        })
    }

    /// Picks the lowest free game and console ports on a host.
    ///
    /// `used_game` and `used_console` are the ports already assigned to
    /// servers on that host; `host` only labels the error.
    pub fn allocate(
        &self,
        host: &str,
        used_game: &HashSet<u16>,
        used_console: &HashSet<u16>,
    ) -> Result<PortPair> {
        let game = self
            .game_range
            .first_free(used_game)
            .ok_or_else(|| Error::PortsExhausted {
                kind: "game",
                host: host.to_string(),
            })?;
        let console = self
            .console_range
            .first_free(used_console)
            .ok_or_else(|| Error::PortsExhausted {
                kind: "console",
                host: host.to_string(),
            })?;
        Ok(PortPair { game, console })
    }

    /// Validates a user-requested pair: both ports inside their ranges,
    /// distinct, and free on the host.
    pub fn validate_explicit(
        &self,
        pair: PortPair,
        used_game: &HashSet<u16>,
        used_console: &HashSet<u16>,
    ) -> Result<PortPair> {
        if !self.game_range.contains(pair.game) {
            return Err(Error::Configuration(format!(
                "game port {} outside allowed range {}-{}",
                pair.game, self.game_range.start, self.game_range.end
            )));
        }
        if !self.console_range.contains(pair.console) {
            return Err(Error::Configuration(format!(
                "console port {} outside allowed range {}-{}",
                pair.console, self.console_range.start, self.console_range.end
            )));
        }
        if pair.game == pair.console {
            return Err(Error::Configuration(format!(
                "game and console port are both {}",
                pair.game
            )));
        }
        if used_game.contains(&pair.game) {
            return Err(Error::Configuration(format!(
                "game port {} already assigned on this host",
                pair.game
            )));
        }
        if used_console.contains(&pair.console) {
            return Err(Error::Configuration(format!(
                "console port {} already assigned on this host",
                pair.console
            )));
        }
        Ok(pair)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            game_range: DEFAULT_GAME_RANGE,
            console_range: DEFAULT_CONSOLE_RANGE,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
