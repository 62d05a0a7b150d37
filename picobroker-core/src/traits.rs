//! Seams between the broker core and the runtime hosting it.

/// Time source trait
///
/// Abstracts the clock so session expiry can be driven deterministically in tests.
pub trait TimeSource: Send + Sync + 'static {
    /// Get current time in seconds since Unix epoch
    fn now_secs(&self) -> u64;
}

/// Handle the broker keeps on a live connection.
///
/// The broker never performs I/O. It queues packets on the session and uses
/// this handle to make the task that owns the transport act on them.
pub trait ClientLink: Send + Sync {
    /// New packets are waiting in the session's outbound queue.
    fn wake(&self);

    /// The connection must be shut down: the client id was taken over by a
    /// newer connection, or the client stopped draining its queue.
    fn close(&self);
}

/// Outcome of an authorization check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
}

/// Pluggable authentication and authorization hook.
///
/// Every method allows by default, so implementors only override the checks
/// they care about.
pub trait Authorizer: Send + Sync {
    /// Called for every CONNECT before a session is created or resumed.
    fn authorize(&self, _client_id: &str, _username: Option<&str>, _password: Option<&[u8]>) -> Access {
        Access::Allow
    }

    fn authorize_publish(&self, _client_id: &str, _topic: &str) -> Access {
        Access::Allow
    }

    fn authorize_subscribe(&self, _client_id: &str, _filter: &str) -> Access {
        Access::Allow
    }
}

/// Authorizer that lets everyone in.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authorizer for AllowAll {}
