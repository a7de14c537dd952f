//! Plain-HTTP request policy.
//!
//! When HTTP is disabled, every plain request is rejected or redirected,
//! with one scoped exception: a path under the acme-challenge prefix whose
//! token is currently staged. The exception covers exactly that token and
//! only while its proof is staged, so domain validation works while the
//! rest of the HTTP-disable rule stays intact.

use std::sync::Arc;

use tracing::debug;

use crate::acme::ChallengeResponder;

/// What to do with a plain-HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpDecision {
    Allow,
    RedirectToHttps,
    Reject,
}

/// Policy evaluated ahead of any other plain-HTTP handling.
#[derive(Debug, Clone)]
pub struct HttpPolicy {
    enabled: bool,
    redirect_to_https: bool,
    responder: Arc<ChallengeResponder>,
}

impl HttpPolicy {
    pub fn new(enabled: bool, redirect_to_https: bool, responder: Arc<ChallengeResponder>) -> Self {
        Self {
            enabled,
            redirect_to_https,
            responder,
        }
    }

    /// Decide how to handle a plain-HTTP request for `path`.
    pub fn evaluate(&self, path: &str) -> HttpDecision {
        if let Some(token) = ChallengeResponder::extract_token(path) {
            if self.responder.has_staged_token(token) {
                debug!(token = %token, "Allowing plain HTTP for staged challenge");
                return HttpDecision::Allow;
            }
        }

        if self.enabled {
            HttpDecision::Allow
        } else if self.redirect_to_https {
            HttpDecision::RedirectToHttps
        } else {
            HttpDecision::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::ChallengeProof;

    async fn responder_with_token(token: &str) -> Arc<ChallengeResponder> {
        let responder = Arc::new(ChallengeResponder::default());
        let proof = ChallengeProof::Http {
            token: token.to_string(),
            key_authorization: "auth".to_string(),
        };
        responder.stage(&proof).await.unwrap();
        responder
    }

    #[test]
    fn test_http_enabled_allows_everything() {
        let policy = HttpPolicy::new(true, false, Arc::new(ChallengeResponder::default()));

        assert_eq!(policy.evaluate("/any/path"), HttpDecision::Allow);
        assert_eq!(
            policy.evaluate("/.well-known/acme-challenge/unknown"),
            HttpDecision::Allow
        );
    }

    #[test]
    fn test_http_disabled_rejects() {
        let policy = HttpPolicy::new(false, false, Arc::new(ChallengeResponder::default()));

        assert_eq!(policy.evaluate("/any/path"), HttpDecision::Reject);
    }

    #[test]
    fn test_http_disabled_redirects_when_configured() {
        let policy = HttpPolicy::new(false, true, Arc::new(ChallengeResponder::default()));

        assert_eq!(policy.evaluate("/any/path"), HttpDecision::RedirectToHttps);
    }

    #[tokio::test]
    async fn test_staged_token_is_the_only_exception() {
        let responder = responder_with_token("staged-token").await;
        let policy = HttpPolicy::new(false, false, Arc::clone(&responder));

        // Exactly the staged token's path is allowed.
        assert_eq!(
            policy.evaluate("/.well-known/acme-challenge/staged-token"),
            HttpDecision::Allow
        );

        // A different token is not.
        assert_eq!(
            policy.evaluate("/.well-known/acme-challenge/other-token"),
            HttpDecision::Reject
        );

        // Nor is anything else.
        assert_eq!(policy.evaluate("/"), HttpDecision::Reject);
        assert_eq!(policy.evaluate("/.well-known/other"), HttpDecision::Reject);
    }

    #[tokio::test]
    async fn test_exception_ends_when_proof_unstaged() {
        let responder = responder_with_token("staged-token").await;
        let policy = HttpPolicy::new(false, false, Arc::clone(&responder));

        assert_eq!(
            policy.evaluate("/.well-known/acme-challenge/staged-token"),
            HttpDecision::Allow
        );

        let proof = ChallengeProof::Http {
            token: "staged-token".to_string(),
            key_authorization: "auth".to_string(),
        };
        responder.unstage(&proof).await;

        assert_eq!(
            policy.evaluate("/.well-known/acme-challenge/staged-token"),
            HttpDecision::Reject
        );
    }
}
