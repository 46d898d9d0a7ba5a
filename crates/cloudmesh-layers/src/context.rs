//! Caller session carried across task and node boundaries.
//!
//! Work started on behalf of a remote caller runs inside
//! [`with_session`]; anything it sends reads the session back with
//! [`current_session`] and stamps it on outgoing invocations.

use std::future::Future;

tokio::task_local! {
    static SESSION: String;
}

/// Run `future` with `session` as the current caller session.
pub async fn with_session<F>(session: impl Into<String>, future: F) -> F::Output
where
    F: Future,
{
    SESSION.scope(session.into(), future).await
}

/// Run `future` inside `session` when one is given, plainly otherwise.
pub async fn maybe_with_session<F>(session: Option<String>, future: F) -> F::Output
where
    F: Future,
{
    match session {
        Some(session) => with_session(session, future).await,
        None => future.await,
    }
}

pub fn current_session() -> Option<String> {
    SESSION.try_with(|s| s.clone()).ok()
}

/// Spawn `future` on the runtime, carrying over the current session.
pub fn spawn_in_session<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let session = current_session();
    tokio::spawn(maybe_with_session(session, future))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_session_outside_scope() {
        assert_eq!(current_session(), None);
    }

    #[tokio::test]
    async fn test_session_visible_inside_scope() {
        let seen = with_session("alice", async { current_session() }).await;
        assert_eq!(seen.as_deref(), Some("alice"));
        assert_eq!(current_session(), None);
    }

    #[tokio::test]
    async fn test_spawn_carries_session() {
        let seen = with_session("bob", async {
            spawn_in_session(async { current_session() }).await.unwrap()
        })
        .await;
        assert_eq!(seen.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_nested_scope_shadows() {
        let seen = with_session("outer", async {
            with_session("inner", async { current_session() }).await
        })
        .await;
        assert_eq!(seen.as_deref(), Some("inner"));
    }
}
