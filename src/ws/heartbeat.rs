//! Heartbeat negotiation.
//!
//! The client offers `heart-beat:<cx>,<cy>` on CONNECT and the broker
//! answers `heart-beat:<sx>,<sy>` on CONNECTED. Each direction is enabled
//! only when both sides agree, at the slower of the two rates.

use std::time::Duration;

/// The peer is declared dead after this many silent incoming intervals.
pub const LIVENESS_TOLERANCE: u32 = 2;

/// Heartbeat intervals in force for one connection. Zero means disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiatedHeartbeat {
    /// How often the client must send something.
    pub outgoing: Duration,
    /// How often the broker promised to send something.
    pub incoming: Duration,
}

impl NegotiatedHeartbeat {
    /// Window of silence after which the connection is considered dead,
    /// or `None` when incoming heartbeats are disabled.
    #[must_use]
    pub fn liveness_window(&self) -> Option<Duration> {
        (!self.incoming.is_zero()).then(|| self.incoming.saturating_mul(LIVENESS_TOLERANCE))
    }
}

/// Formats the client offer for a symmetric interval.
#[must_use]
pub fn offer(interval: Duration) -> String {
    let ms = interval.as_millis();
    format!("{ms},{ms}")
}

/// Parses a `heart-beat` header value into `(x, y)` milliseconds.
#[must_use]
pub fn parse_header(value: &str) -> Option<(u64, u64)> {
    let (x, y) = value.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// Combines the client offer with the broker's answer.
///
/// A missing or unparsable broker header disables heartbeats, as the
/// protocol treats an absent header as `0,0`.
#[must_use]
pub fn negotiate(client: Duration, server_header: Option<&str>) -> NegotiatedHeartbeat {
    let cx = u64::try_from(client.as_millis()).unwrap_or(u64::MAX);
    let cy = cx;
    let (sx, sy) = server_header.and_then(parse_header).unwrap_or((0, 0));

    let pick = |mine: u64, theirs: u64| {
        if mine == 0 || theirs == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(mine.max(theirs))
        }
    };

    NegotiatedHeartbeat {
        outgoing: pick(cx, sy),
        incoming: pick(cy, sx),
    }
}
