//! Heartbeat negotiation
//!
//! Each side advertises `heart-beat:<cx>,<cy>` in milliseconds: `cx` is the
//! smallest interval it can send at, `cy` the interval it would like to
//! receive at. Zero means "cannot" / "do not want".

use crate::error::{RealtimeError, Result};
use std::time::Duration;

/// Missing inbound traffic is tolerated for this many incoming intervals
pub const INCOMING_TOLERANCE: u32 = 2;

/// Heart-beat header value as advertised by one side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing: Duration,
    pub incoming: Duration,
}

/// Intervals both sides agreed on; `None` disables that direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    pub send_every: Option<Duration>,
    pub expect_within: Option<Duration>,
}

impl HeartBeat {
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || RealtimeError::Protocol(format!("invalid heart-beat header {:?}", value));

        let (out, inc) = value.split_once(',').ok_or_else(invalid)?;
        let out: u64 = out.trim().parse().map_err(|_| invalid())?;
        let inc: u64 = inc.trim().parse().map_err(|_| invalid())?;

        Ok(Self::new(Duration::from_millis(out), Duration::from_millis(inc)))
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing.as_millis(), self.incoming.as_millis())
    }

    /// Combine our advertisement with the server's
    pub fn negotiate(&self, server: &HeartBeat) -> Negotiated {
        let pick = |ours: Duration, theirs: Duration| {
            if ours.is_zero() || theirs.is_zero() {
                None
            } else {
                Some(ours.max(theirs))
            }
        };

        Negotiated {
            send_every: pick(self.outgoing, server.incoming),
            expect_within: pick(self.incoming, server.outgoing),
        }
    }
}

impl Negotiated {
    /// How long inbound silence may last before the connection counts as lost
    pub fn silence_limit(&self) -> Option<Duration> {
        self.expect_within.map(|d| d * INCOMING_TOLERANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_parse_and_format() {
        let hb = HeartBeat::parse("4000, 10000").unwrap();
        assert_eq!(hb, HeartBeat::new(ms(4000), ms(10000)));
        assert_eq!(hb.header_value(), "4000,10000");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(HeartBeat::parse("4000").is_err());
        assert!(HeartBeat::parse("a,b").is_err());
        assert!(HeartBeat::parse("").is_err());
    }

    #[test]
    fn test_negotiate_takes_larger_interval() {
        let client = HeartBeat::new(ms(4000), ms(4000));
        let server = HeartBeat::new(ms(10000), ms(1000));

        let negotiated = client.negotiate(&server);
        assert_eq!(negotiated.send_every, Some(ms(4000)));
        assert_eq!(negotiated.expect_within, Some(ms(10000)));
        assert_eq!(negotiated.silence_limit(), Some(ms(20000)));
    }

    #[test]
    fn test_negotiate_zero_disables() {
        let client = HeartBeat::new(ms(4000), ms(4000));
        let server = HeartBeat::new(ms(0), ms(0));

        let negotiated = client.negotiate(&server);
        assert_eq!(negotiated, Negotiated::default());
        assert_eq!(negotiated.silence_limit(), None);

        let client = HeartBeat::new(ms(0), ms(4000));
        let server = HeartBeat::new(ms(5000), ms(5000));
        let negotiated = client.negotiate(&server);
        assert_eq!(negotiated.send_every, None);
        assert_eq!(negotiated.expect_within, Some(ms(5000)));
    }
}
