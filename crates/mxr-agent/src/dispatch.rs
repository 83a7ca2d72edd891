use mxr_proto::AgentID;

/// Handler for inbound requests delivered through the router.
///
/// The returned payload becomes the reply sent back to the requester. An
/// agent created without a dispatcher answers every request with an absent
/// payload, acknowledging receipt without content.
pub trait Dispatcher: Send + Sync + 'static {
    /// Handle one request from `from` and produce the reply payload.
    fn dispatch(&self, from: AgentID, payload: Option<Vec<u8>>) -> Option<Vec<u8>>;
}

impl<F> Dispatcher for F
where
    F: Fn(AgentID, Option<Vec<u8>>) -> Option<Vec<u8>> + Send + Sync + 'static,
{
    fn dispatch(&self, from: AgentID, payload: Option<Vec<u8>>) -> Option<Vec<u8>> {
        self(from, payload)
    }
}
