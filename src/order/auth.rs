use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    acc::AccountInner,
    api,
    error::*,
    poll::{poll_until, Poll, PollPolicy},
    solver::{ChallengeContext, ChallengeSolver},
};

/// An authorization ([ownership proof]) for an identifier of an order.
///
/// Each authorization for an order much be progressed to a valid state before the ACME API
/// will issue a certificate.
///
/// Authorizations may or may not be required depending on previous orders against the same
/// ACME account. The ACME API decides if the authorization is needed.
///
/// [ownership proof]: crate#domain-ownership
#[derive(Debug, Clone)]
pub struct Auth {
    inner: Arc<AccountInner>,
    api_auth: api::Authorization,
    auth_url: String,
}

impl Auth {
    pub(crate) fn new(
        inner: &Arc<AccountInner>,
        api_auth: api::Authorization,
        auth_url: &str,
    ) -> Self {
        Auth {
            inner: Arc::clone(inner),
            api_auth,
            auth_url: auth_url.to_owned(),
        }
    }

    /// The authorization URL.
    pub fn url(&self) -> &str {
        &self.auth_url
    }

    /// Identifier for this authorization.
    ///
    /// For wildcard orders this is the base domain, without the `*.` prefix.
    pub fn identifier(&self) -> &api::Identifier {
        &self.api_auth.identifier
    }

    pub fn status(&self) -> api::AuthorizationStatus {
        self.api_auth.status
    }

    /// Whether we actually need to do the authorization. This might not be needed if we have
    /// proven ownership of the domain recently in a previous order.
    pub fn need_challenge(&self) -> bool {
        self.api_auth.status == api::AuthorizationStatus::Pending
    }

    /// Returns the offered challenge of the given type, e.g. `dns-01`.
    pub fn challenge(&self, challenge_type: &str) -> Option<Challenge> {
        self.api_auth
            .challenge(challenge_type)
            .map(|c| Challenge::new(self, c.clone()))
    }

    /// Returns a reference to the authorization's API object.
    ///
    /// This is a snapshot; use [`refresh`](Self::refresh) to see changes.
    pub fn api_auth(&self) -> &api::Authorization {
        &self.api_auth
    }

    /// Re-reads the authorization from the CA (POST-as-GET).
    pub async fn refresh(&mut self) -> Result<&api::Authorization> {
        let res = self.inner.post_as_get(&self.auth_url).await?;
        self.api_auth = res.json()?;
        Ok(&self.api_auth)
    }

    /// Name used when reporting this authorization, with the wildcard prefix restored.
    pub(crate) fn display_identifier(&self) -> String {
        if self.api_auth.is_wildcard() {
            format!("*.{}", self.api_auth.identifier.value)
        } else {
            self.api_auth.identifier.value.clone()
        }
    }

    pub(crate) fn invalid_error(&self) -> Error {
        Error::AuthorizationInvalid {
            identifier: self.display_identifier(),
            problem: self.api_auth.challenge_error().cloned(),
        }
    }

    /// Drives a pending authorization to `valid` using `solver`.
    ///
    /// A challenge already `processing` from an earlier attempt is only polled, not provisioned
    /// and activated again. The solver's cleanup runs whatever the outcome. While the attempt is
    /// in flight its context is listed in `outstanding`, so that whoever aborts the task can
    /// clean up instead.
    pub(crate) async fn resolve(
        mut self,
        solver: &dyn ChallengeSolver,
        outstanding: &Outstanding,
        policy: &PollPolicy,
        deadline: Instant,
    ) -> Result<()> {
        let identifier = self.display_identifier();

        let selected = self
            .api_auth
            .challenges
            .iter()
            .find(|c| c.status == api::ChallengeStatus::Processing)
            .or_else(|| solver.select(&self.api_auth))
            .cloned();

        let Some(api_challenge) = selected else {
            let offered = self
                .api_auth
                .challenges
                .iter()
                .map(|c| c._type.as_str())
                .collect::<Vec<_>>();

            return Err(Error::Solver {
                identifier,
                source: format!("no supported challenge among {offered:?}").into(),
            });
        };

        let mut challenge = Challenge::new(&self, api_challenge);
        let ctx = challenge.context()?;

        outstanding.lock().push(ctx.clone());

        let outcome = self
            .attempt(&mut challenge, &ctx, solver, policy, deadline)
            .await;

        cleanup(solver, &ctx).await;
        outstanding.lock().retain(|c| c != &ctx);

        outcome
    }

    async fn attempt(
        &mut self,
        challenge: &mut Challenge,
        ctx: &ChallengeContext,
        solver: &dyn ChallengeSolver,
        policy: &PollPolicy,
        deadline: Instant,
    ) -> Result<()> {
        if challenge.need_validate() {
            log::debug!(
                "Presenting {} challenge for {}",
                ctx.challenge_type,
                challenge.reported_identifier,
            );

            solver.present(ctx).await.map_err(|source| Error::Solver {
                identifier: challenge.reported_identifier.clone(),
                source,
            })?;
        }

        challenge.validate_until(policy, deadline).await?;
        self.wait_until_terminal(policy, deadline).await
    }

    /// Polls until the authorization leaves `pending`, failing on anything but `valid`.
    async fn wait_until_terminal(&mut self, policy: &PollPolicy, deadline: Instant) -> Result<()> {
        let inner = &self.inner;
        let url = self.auth_url.as_str();

        let api_auth = poll_until(policy, deadline, "authorization", url, move || async move {
            let res = inner.post_as_get(url).await?;
            let retry_after = res.retry_after();
            let api_auth = res.json::<api::Authorization>()?;

            Ok(if api_auth.status.is_terminal() {
                Poll::Done(api_auth)
            } else {
                Poll::Pending(retry_after)
            })
        })
        .await?;

        self.api_auth = api_auth;

        if self.api_auth.status == api::AuthorizationStatus::Valid {
            log::debug!("Authorization for {} is valid", self.display_identifier());
            Ok(())
        } else {
            Err(self.invalid_error())
        }
    }
}

/// Challenge proofs currently provisioned by in-flight authorizations.
pub(crate) type Outstanding = Mutex<Vec<ChallengeContext>>;

/// Removes a provisioned proof. Failures are only logged; the outcome of the challenge stands.
pub(crate) async fn cleanup(solver: &dyn ChallengeSolver, ctx: &ChallengeContext) {
    if let Err(err) = solver.cleanup(ctx).await {
        log::warn!(
            "Challenge cleanup for {} failed: {err}",
            ctx.identifier.value,
        );
    }
}

/// A challenge as obtained from an [`Auth`].
///
/// The CA is told to validate a challenge at most once per handle, however often
/// [`validate`](Self::validate) is called.
#[derive(Debug)]
pub struct Challenge {
    inner: Arc<AccountInner>,
    api_challenge: api::Challenge,
    identifier: api::Identifier,
    reported_identifier: String,
    activated: bool,
}

impl Challenge {
    fn new(auth: &Auth, api_challenge: api::Challenge) -> Self {
        Challenge {
            inner: Arc::clone(&auth.inner),
            api_challenge,
            identifier: auth.api_auth.identifier.clone(),
            reported_identifier: auth.display_identifier(),
            activated: false,
        }
    }

    /// Challenge type, e.g. `http-01`.
    pub fn challenge_type(&self) -> &str {
        &self.api_challenge._type
    }

    /// Returns the token, a unique identifier of the challenge.
    pub fn token(&self) -> &str {
        &self.api_challenge.token
    }

    /// Returns true if this challenge needs validation.
    ///
    /// It might already been done in a previous order for the same account.
    pub fn need_validate(&self) -> bool {
        self.api_challenge.status == api::ChallengeStatus::Pending
    }

    /// Everything a [`ChallengeSolver`] needs to provision the proof.
    pub fn context(&self) -> Result<ChallengeContext> {
        Ok(ChallengeContext {
            challenge_type: self.api_challenge._type.clone(),
            token: self.api_challenge.token.clone(),
            account_key_thumbprint: self.inner.key().thumbprint()?,
            identifier: self.identifier.clone(),
        })
    }

    /// Key authorization for this challenge, the HTTP-01 proof.
    pub fn key_authorization(&self) -> Result<String> {
        Ok(self.context()?.key_authorization())
    }

    /// Returns a reference to the challenge's API object.
    pub fn api_challenge(&self) -> &api::Challenge {
        &self.api_challenge
    }

    /// Tells the CA the proof is in place, unless that already happened.
    ///
    /// Only a `pending` challenge is activated.
    pub async fn activate(&mut self) -> Result<()> {
        if self.activated || !self.need_validate() {
            log::trace!("Challenge {} needs no activation", self.api_challenge.url);
            return Ok(());
        }

        // marked before sending; an activation that failed in flight is not resent
        self.activated = true;

        let res = self
            .inner
            .call(&self.api_challenge.url, &api::EmptyObject)
            .await?;
        self.api_challenge = res.json()?;

        log::debug!("Activated challenge {}", self.api_challenge.url);
        Ok(())
    }

    /// Activates the challenge and polls it until the CA reached a verdict.
    ///
    /// The proof must be put in place before this call. Either by: placing it in a DNS
    /// record, updating a web server, or passing it to TLS connection for ALPN exchange.
    pub async fn validate(&mut self, policy: &PollPolicy) -> Result<()> {
        self.validate_until(policy, policy.deadline()).await
    }

    pub(crate) async fn validate_until(
        &mut self,
        policy: &PollPolicy,
        deadline: Instant,
    ) -> Result<()> {
        self.activate().await?;

        if !self.api_challenge.status.is_terminal() {
            let inner = &self.inner;
            let url = self.api_challenge.url.as_str();

            let api_challenge = poll_until(policy, deadline, "challenge", url, move || async move {
                let res = inner.post_as_get(url).await?;
                let retry_after = res.retry_after();
                let api_challenge = res.json::<api::Challenge>()?;

                Ok(if api_challenge.status.is_terminal() {
                    Poll::Done(api_challenge)
                } else {
                    Poll::Pending(retry_after)
                })
            })
            .await?;

            self.api_challenge = api_challenge;
        }

        match self.api_challenge.status {
            api::ChallengeStatus::Valid => Ok(()),
            _ => Err(Error::AuthorizationInvalid {
                identifier: self.reported_identifier.clone(),
                problem: self.api_challenge.error.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::test::{mock_session, MockCa};

    fn authz_body(status: &str, challenge_status: &str) -> String {
        format!(
            r#"{{
                "identifier": {{"type": "dns", "value": "a.example"}},
                "status": "{status}",
                "challenges": [
                    {{"type": "http-01", "status": "{challenge_status}", "url": "https://ca.test/acme/chall/a/http", "token": "tok-http"}},
                    {{"type": "dns-01", "status": "{challenge_status}", "url": "https://ca.test/acme/chall/a/dns", "token": "tok-dns"}}
                ]
            }}"#,
        )
    }

    #[tokio::test]
    async fn test_get_challenges() {
        let server = crate::test::with_directory_server();
        let url = crate::DirectoryUrl::Other(&server.dir_url);
        let dir = crate::Directory::fetch(url).await.unwrap();
        let acc = dir
            .register_account(
                Arc::new(crate::AcmeKey::generate()),
                vec!["mailto:foo@bar.com".to_owned()],
                true,
            )
            .await
            .unwrap();
        let ord = acc.new_order("acme-test.example.com", &[]).await.unwrap();
        let authz = ord.authorizations().await.unwrap();
        assert_eq!(authz.len(), 1);
        let auth = &authz[0];
        assert!(auth.need_challenge());

        let http = auth.challenge("http-01").unwrap();
        assert!(http.need_validate());

        let dns = auth.challenge("dns-01").unwrap();
        assert!(dns.need_validate());
        assert_eq!(dns.context().unwrap().dns_proof().len(), 43);
    }

    #[tokio::test(start_paused = true)]
    async fn challenge_is_activated_exactly_once() {
        let polls = AtomicUsize::new(0);

        let (ca, acc) = mock_session(move |req| match req.path.as_str() {
            "/acme/authz/a" => Some(MockCa::json(200, &authz_body("pending", "pending"))),
            "/acme/chall/a/http" if req.payload == "{}" => Some(MockCa::json(
                200,
                r#"{"type": "http-01", "status": "processing", "url": "https://ca.test/acme/chall/a/http", "token": "tok-http"}"#,
            )),
            "/acme/chall/a/http" => {
                let status = if polls.fetch_add(1, Ordering::SeqCst) < 3 {
                    "processing"
                } else {
                    "valid"
                };
                Some(MockCa::json(
                    200,
                    &format!(
                        r#"{{"type": "http-01", "status": "{status}", "url": "https://ca.test/acme/chall/a/http", "token": "tok-http"}}"#,
                    ),
                ))
            }
            _ => None,
        })
        .await;

        let res = acc.inner().post_as_get(&ca.url("/acme/authz/a")).await.unwrap();
        let auth = Auth::new(acc.inner(), res.json().unwrap(), &ca.url("/acme/authz/a"));

        let mut challenge = auth.challenge("http-01").unwrap();
        let policy = PollPolicy::default();

        challenge.validate(&policy).await.unwrap();
        // a second call must not re-trigger validation either
        challenge.validate(&policy).await.unwrap();

        let requests = ca.requests("/acme/chall/a/http");
        let activations = requests.iter().filter(|r| r.payload == "{}").count();
        let polls = requests.iter().filter(|r| r.payload.is_empty()).count();

        assert_eq!(activations, 1);
        assert_eq!(polls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn processing_challenge_is_not_activated() {
        let (ca, acc) = mock_session(|req| match req.path.as_str() {
            "/acme/chall/a/dns" => Some(MockCa::json(
                200,
                r#"{"type": "dns-01", "status": "valid", "url": "https://ca.test/acme/chall/a/dns", "token": "tok-dns"}"#,
            )),
            "/acme/authz/a" => Some(MockCa::json(200, &authz_body("valid", "valid"))),
            _ => None,
        })
        .await;

        // resumed after the dns-01 challenge was already activated
        let api_auth = serde_json::from_str(
            r#"{
                "identifier": {"type": "dns", "value": "a.example"},
                "status": "pending",
                "challenges": [
                    {"type": "http-01", "status": "pending", "url": "https://ca.test/acme/chall/a/http", "token": "tok-http"},
                    {"type": "dns-01", "status": "processing", "url": "https://ca.test/acme/chall/a/dns", "token": "tok-dns"}
                ]
            }"#,
        )
        .unwrap();
        let auth = Auth::new(acc.inner(), api_auth, &ca.url("/acme/authz/a"));

        struct Refuses;

        #[async_trait::async_trait]
        impl ChallengeSolver for Refuses {
            fn supported_types(&self) -> &[&str] {
                &["dns-01"]
            }

            async fn present(
                &self,
                _ctx: &ChallengeContext,
            ) -> Result<(), crate::solver::SolverError> {
                Err("must not be asked".into())
            }
        }

        let policy = PollPolicy::default();
        let outstanding = Outstanding::default();
        auth.resolve(&Refuses, &outstanding, &policy, policy.deadline())
            .await
            .unwrap();
        assert!(outstanding.lock().is_empty());

        assert!(ca
            .requests("/acme/chall/a/dns")
            .iter()
            .all(|r| r.payload.is_empty()));
    }

    #[tokio::test]
    async fn invalid_challenge_reports_problem() {
        let (ca, acc) = mock_session(|req| match req.path.as_str() {
            "/acme/chall/a/dns" => Some(MockCa::json(
                200,
                r#"{
                    "type": "dns-01",
                    "status": "invalid",
                    "url": "https://ca.test/acme/chall/a/dns",
                    "token": "tok-dns",
                    "error": {"type": "urn:ietf:params:acme:error:dns", "detail": "no TXT record"}
                }"#,
            )),
            _ => None,
        })
        .await;

        let api_auth = serde_json::from_str(&authz_body("pending", "pending")).unwrap();
        let auth = Auth::new(acc.inner(), api_auth, &ca.url("/acme/authz/a"));

        let mut challenge = auth.challenge("dns-01").unwrap();
        let err = challenge.validate(&PollPolicy::default()).await.unwrap_err();

        assert_eq!(err.identifier(), Some("a.example"));
        assert_eq!(err.problem().unwrap().kind(), "dns");
    }

    #[tokio::test]
    async fn wildcard_failure_reports_wildcard_name() {
        let (ca, acc) = mock_session(|req| match req.path.as_str() {
            "/acme/chall/a/dns" => Some(MockCa::json(
                200,
                r#"{
                    "type": "dns-01",
                    "status": "invalid",
                    "url": "https://ca.test/acme/chall/a/dns",
                    "token": "tok-dns",
                    "error": {"type": "urn:ietf:params:acme:error:unauthorized"}
                }"#,
            )),
            _ => None,
        })
        .await;

        let api_auth = serde_json::from_str(
            r#"{
                "identifier": {"type": "dns", "value": "a.example"},
                "status": "pending",
                "wildcard": true,
                "challenges": [
                    {"type": "dns-01", "status": "pending", "url": "https://ca.test/acme/chall/a/dns", "token": "tok-dns"}
                ]
            }"#,
        )
        .unwrap();
        let auth = Auth::new(acc.inner(), api_auth, &ca.url("/acme/authz/a"));
        assert_eq!(auth.invalid_error().identifier(), Some("*.a.example"));

        let mut challenge = auth.challenge("dns-01").unwrap();
        let err = challenge.validate(&PollPolicy::default()).await.unwrap_err();
        assert_eq!(err.identifier(), Some("*.a.example"));
    }
}
