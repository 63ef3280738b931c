//! Stream endpoint resolution.

use vm_session_core::{ClientContext, EndpointCandidate, SessionId, TransportKind};

/// Path prefix the backend and the reverse proxy route VM traffic under.
pub const STREAM_PATH_PREFIX: &str = "/vm";

/// Candidate stream endpoints for a session, in attempt order.
///
/// The direct candidate targets the backend's well-known port on the
/// client's host; the proxied one goes through the client's own origin.
/// Both share the scheme implied by `ctx.secure`.
#[must_use]
pub fn resolve_endpoints(
    session_id: &SessionId,
    ctx: &ClientContext,
    backend_port: u16,
) -> [EndpointCandidate; 2] {
    let scheme = ctx.ws_scheme();
    let path = format!("{STREAM_PATH_PREFIX}/{session_id}/stream");

    [
        EndpointCandidate {
            kind: TransportKind::Direct,
            url: format!("{scheme}://{}:{backend_port}{path}", ctx.hostname),
        },
        EndpointCandidate {
            kind: TransportKind::Proxied,
            url: format!("{scheme}://{}{path}", ctx.host()),
        },
    ]
}
