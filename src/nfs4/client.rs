//! `ClientRecord` (§4.F): the v4.0 SETCLIENTID/SETCLIENTID_CONFIRM and v4.1
//! EXCHANGE_ID/CREATE_SESSION lifecycles both converge on this one shape --
//! the two paths differ only in how a record starts out unconfirmed.

use std::time::Instant;

use crate::callback::CallbackTarget;

use super::session::SessionId;

pub type ClientId = Vec<u8>;

#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub client_id: ClientId,
    /// The client-chosen long-form identifier: v4.0's `nfs_client_id4.id`,
    /// or v4.1's `client_owner4.owner`. Used to detect "same client,
    /// reconnecting" across a `client_id` that may have changed.
    pub nfs_client_id: Vec<u8>,
    pub verifier: [u8; 8],
    pub callback: Option<CallbackTarget>,
    pub confirmed: bool,
    pub cb_path_up: bool,
    pub lease_expiry: Instant,
    pub sessions: Vec<SessionId>,
}

/// A v4.0 SETCLIENTID record awaiting SETCLIENTID_CONFIRM. A second
/// SETCLIENTID with the same `nfs_client_id` simply overwrites this (keyed
/// by `nfs_client_id` in the pending map), which is the "supersedes prior
/// unconfirmed records" rule from §4.F.
#[derive(Debug, Clone)]
pub struct PendingClient {
    pub client_id: ClientId,
    pub nfs_client_id: Vec<u8>,
    pub confirm_verifier: [u8; 8],
    pub callback: Option<CallbackTarget>,
}
