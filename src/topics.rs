//! Push notification topics used by Electrum servers.
//!
//! The node does not interpret these; they are the names collaborators pass
//! to [`Node::subscribe`](crate::Node::subscribe) and use as the method of
//! the matching subscribe request.

/// Chain tip updates.
pub const HEADERS: &str = "blockchain.headers.subscribe";

/// Status changes of a script hash (protocol 1.2 and later).
pub const SCRIPTHASH: &str = "blockchain.scripthash.subscribe";

/// Status changes of an address (legacy servers).
pub const ADDRESS: &str = "blockchain.address.subscribe";
