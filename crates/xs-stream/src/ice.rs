//! Remote ICE candidate rewriting.
//!
//! The gssv service hands back candidates that browsers accept but that need
//! massaging for the player: Teredo addresses are unwrapped into their embedded
//! IPv4 endpoint, IPv6 can be preferred, and everything is renumbered so the
//! first candidate wins.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::debug;

use crate::errors::{Result, StreamError};
use crate::models::IceCandidate;

pub const END_OF_CANDIDATES: &str = "a=end-of-candidates";

const CANDIDATE_PREFIX: &str = "a=candidate:";
const TEREDO_PREFIX: &str = "2001";
const TEREDO_FIXED_PORT: u16 = 9002;
const FIRST_PRIORITY: u64 = 2130706431;

/// A parsed `a=candidate:<foundation> <component> UDP <priority> <ip> <port> <rest>` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLine {
    pub foundation: u64,
    pub component: u32,
    pub priority: u64,
    pub ip: String,
    pub port: u16,
    pub rest: String,
}

impl CandidateLine {
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = || StreamError::MalformedCandidate(line.to_string());

        let body = line.strip_prefix(CANDIDATE_PREFIX).ok_or_else(malformed)?;
        let mut fields = body.splitn(7, ' ');
        let mut next = || fields.next().filter(|field| !field.is_empty());

        let foundation = next().and_then(|f| f.parse().ok()).ok_or_else(malformed)?;
        let component = next().and_then(|c| c.parse().ok()).ok_or_else(malformed)?;
        if next() != Some("UDP") {
            return Err(malformed());
        }
        let priority = next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let ip = next().ok_or_else(malformed)?.to_string();
        let port = next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        // `rest` may be empty but the separating space is required
        let rest = fields.next().ok_or_else(malformed)?.to_string();

        Ok(Self {
            foundation,
            component,
            priority,
            ip,
            port,
            rest,
        })
    }

    pub fn is_ipv6(&self) -> bool {
        self.ip.contains(':')
    }
}

impl fmt::Display for CandidateLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {} UDP {} {} {} {}",
            CANDIDATE_PREFIX, self.foundation, self.component, self.priority, self.ip, self.port, self.rest
        )
    }
}

/// Client endpoint embedded in a Teredo address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeredoEndpoint {
    pub client4: Ipv4Addr,
    pub udp_port: u16,
}

impl TeredoEndpoint {
    /// Decode the obfuscated client address and port of a `2001::/32` address
    pub fn from_address(ip: &str) -> Option<Self> {
        if !ip.starts_with(TEREDO_PREFIX) {
            return None;
        }
        let address: Ipv6Addr = ip.parse().ok()?;
        let segments = address.segments();

        let client = (u32::from(segments[6]) << 16) | u32::from(segments[7]);
        Some(Self {
            client4: Ipv4Addr::from(!client),
            udp_port: !segments[5],
        })
    }

    fn candidates(&self) -> [IceCandidate; 2] {
        [
            IceCandidate::new(format!(
                "{CANDIDATE_PREFIX}10 1 UDP 1 {} {TEREDO_FIXED_PORT} typ host ",
                self.client4
            )),
            IceCandidate::new(format!(
                "{CANDIDATE_PREFIX}11 1 UDP 1 {} {} typ host ",
                self.client4, self.udp_port
            )),
        ]
    }
}

fn candidate_ip(candidate: &str) -> Option<&str> {
    candidate.split(' ').nth(4)
}

/// Rewrite remote candidates for the player.
///
/// Teredo candidates are preceded by two host candidates for their IPv4
/// endpoint, `a=end-of-candidates` markers are dropped, IPv6 is moved to the
/// front when `prefer_ipv6` is set, and the list is renumbered: the first
/// candidate gets foundation 1 with the top priority, the rest priority 1.
/// A single `a=end-of-candidates` terminates the result.
pub fn rewrite_candidates(remote: Vec<IceCandidate>, prefer_ipv6: bool) -> Result<Vec<IceCandidate>> {
    let mut expanded = Vec::with_capacity(remote.len());
    for candidate in remote {
        if let Some(teredo) = candidate_ip(&candidate.candidate).and_then(TeredoEndpoint::from_address) {
            debug!(client4 = %teredo.client4, port = teredo.udp_port, "Expanding Teredo candidate");
            expanded.extend(teredo.candidates());
        }
        expanded.push(candidate);
    }

    let mut lines = expanded
        .iter()
        .filter(|candidate| candidate.candidate != END_OF_CANDIDATES)
        .map(|candidate| CandidateLine::parse(&candidate.candidate))
        .collect::<Result<Vec<_>>>()?;

    if prefer_ipv6 {
        lines.sort_by_key(|line| !line.is_ipv6());
    }

    let mut rewritten: Vec<IceCandidate> = lines
        .into_iter()
        .zip(1u64..)
        .map(|(mut line, foundation)| {
            line.foundation = foundation;
            line.component = 1;
            line.priority = if foundation == 1 { FIRST_PRIORITY } else { 1 };
            IceCandidate::new(line.to_string())
        })
        .collect();
    rewritten.push(IceCandidate::new(END_OF_CANDIDATES));

    Ok(rewritten)
}
