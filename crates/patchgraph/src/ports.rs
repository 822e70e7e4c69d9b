//! Live port graph, parsed from the daemon's port listings.
//!
//! Only ports following the `<id>_in:capture_<n>` / `<id>_out:playback_<n>`
//! convention are considered; everything else (system ports, other
//! applications) is skipped.

use regex::Regex;
use std::sync::OnceLock;

use crate::types::{Direction, PatchGroup, PortRef};

fn port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-z0-9]+)_(in:capture|out:playback)_(\d+)$").expect("port pattern is valid")
    })
}

/// Parse a single port name.
pub fn parse_port_name(name: &str) -> Option<PortRef> {
    let caps = port_re().captures(name.trim())?;
    let channel = caps[3].parse().ok()?;
    Some(PortRef::new(&caps[1], Direction::from_token(&caps[2]), channel))
}

/// Parse a plain port listing, one port name per line.
pub fn parse_port_listing(listing: &str) -> Vec<PortRef> {
    listing
        .lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .filter_map(parse_port_name)
        .collect()
}

/// Parse a verbose listing where each port is followed by its indented peers.
///
/// A capture port at zero indentation opens a group; indented playback ports
/// after it are its destinations. Any other zero-indent line closes the
/// group. Groups with no destinations are dropped.
pub fn parse_connection_listing(listing: &str) -> Vec<PatchGroup> {
    let mut groups = Vec::new();
    let mut current: Option<PatchGroup> = None;

    for line in listing.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            if let (Some(group), Some(peer)) = (current.as_mut(), parse_port_name(line)) {
                if peer.direction == Direction::Playback {
                    group.destinations.push(peer);
                }
            }
            continue;
        }

        if let Some(group) = current.take() {
            if !group.destinations.is_empty() {
                groups.push(group);
            }
        }

        current = parse_port_name(line)
            .filter(|port| port.direction == Direction::Capture)
            .map(|source| PatchGroup {
                source,
                destinations: Vec::new(),
            });
    }

    if let Some(group) = current {
        if !group.destinations.is_empty() {
            groups.push(group);
        }
    }
    groups
}
