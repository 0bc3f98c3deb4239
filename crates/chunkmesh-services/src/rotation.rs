//! Peer rotation shared by the distributor and the collector.
//!
//! A rotation visits every index of a peer list exactly once, starting at
//! `start` and wrapping around.

use rand::Rng;

use chunkmesh_core::PeerLocation;

/// Indices `start, start+1, .., len-1, 0, .., start-1`. Empty if `len == 0`.
pub fn rotation(len: usize, start: usize) -> impl Iterator<Item = usize> {
    let start = if len == 0 { 0 } else { start % len };
    (0..len).map(move |i| (start + i) % len)
}

/// Uniform start index for `len` peers. 0 for an empty list.
pub fn random_start(len: usize) -> usize {
    if len == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Peers in rotation order from `start`.
pub fn rotate<'a>(peers: &'a [PeerLocation], start: usize) -> impl Iterator<Item = &'a PeerLocation> {
    rotation(peers.len(), start).map(move |i| &peers[i])
}

/// Drop our own listener from a peer list. Duplicates are removed as well,
/// since one location must never be tried twice for the same chunk.
pub fn without_self(peers: &[PeerLocation], me: Option<PeerLocation>) -> Vec<PeerLocation> {
    let mut out: Vec<PeerLocation> = Vec::with_capacity(peers.len());
    for peer in peers {
        if Some(*peer) == me || out.contains(peer) {
            continue;
        }
        out.push(*peer);
    }
    out
}
