//! Challenge handling across schemes, driven through the interceptor with
//! scripted negotiation engines.

use http::header::{AUTHORIZATION, PROXY_AUTHORIZATION};
use http::{HeaderMap, StatusCode};
use relaynet::base::loadstate::ChannelState;
use relaynet::base::neterror::NetError;
use relaynet::http::auth::{
    AuthAction, AuthInterceptor, AuthScheme, NtlmEngine, Realm, SpnegoEngine, UnavailableSpnegoEngine,
};
use relaynet::http::{Exchange, HttpRequest, HttpResponse};
use std::sync::Arc;

struct ScriptedNtlm;

impl NtlmEngine for ScriptedNtlm {
    fn type1_message(&self) -> String {
        "T1".to_string()
    }

    fn type3_message(
        &self,
        principal: &str,
        _secret: &str,
        domain: Option<&str>,
        _host: Option<&str>,
        challenge: &str,
    ) -> Result<String, NetError> {
        Ok(format!("T3-{}-{}-{}", domain.unwrap_or("none"), principal, challenge))
    }
}

struct FailingNtlm;

impl NtlmEngine for FailingNtlm {
    fn type1_message(&self) -> String {
        "T1".to_string()
    }

    fn type3_message(&self, _: &str, _: &str, _: Option<&str>, _: Option<&str>, _: &str) -> Result<String, NetError> {
        Err(NetError::negotiation("bad type-2"))
    }
}

struct ScriptedSpnego;

impl SpnegoEngine for ScriptedSpnego {
    fn generate_token(&self, realm: &Realm, host: &str) -> Result<String, NetError> {
        Ok(format!("tok-{}-{}", realm.principal(), host))
    }
}

fn interceptor(spnego_works: bool) -> AuthInterceptor {
    let spnego: Arc<dyn SpnegoEngine> = if spnego_works {
        Arc::new(ScriptedSpnego)
    } else {
        Arc::new(UnavailableSpnegoEngine)
    };
    AuthInterceptor::new(Arc::new(ScriptedNtlm), spnego)
}

fn response(status: u16, challenges: &[&str]) -> HttpResponse {
    let mut resp = HttpResponse::from_head(StatusCode::from_u16(status).unwrap(), HeaderMap::new());
    let name = if status == 407 { "proxy-authenticate" } else { "www-authenticate" };
    for c in challenges {
        resp = resp.with_header(name, c).unwrap();
    }
    resp
}

fn resend(action: AuthAction) -> (HttpRequest, bool) {
    match action {
        AuthAction::Resend { request, reuse_connection } => (request, reuse_connection),
        AuthAction::Decline => panic!("expected a resend"),
    }
}

/// Apply the interceptor's decision the way the sender does.
fn answer(interceptor: &AuthInterceptor, exchange: &mut Exchange, resp: &HttpResponse) -> Option<String> {
    match interceptor.intercept(exchange, resp).unwrap() {
        AuthAction::Resend { request, .. } => {
            let header = request
                .headers()
                .get(AUTHORIZATION)
                .map(|v| v.to_str().unwrap().to_string());
            exchange.set_current_request(request);
            header
        }
        AuthAction::Decline => None,
    }
}

#[test]
fn test_ntlm_two_step_handshake() {
    let interceptor = interceptor(false);
    let realm = Realm::ntlm("alice", "pw").to_builder().ntlm_domain("CORP").build();
    let mut exchange = Exchange::new(HttpRequest::get("http://intranet/").unwrap()).with_realm(realm);

    let first = answer(&interceptor, &mut exchange, &response(401, &["NTLM"]));
    assert_eq!(first.as_deref(), Some("NTLM T1"));
    assert!(!exchange.is_auth_attempted(), "type-1 round must not consume the attempt");

    let second = answer(&interceptor, &mut exchange, &response(401, &["NTLM  c2VydmVy "]));
    assert_eq!(second.as_deref(), Some("NTLM T3-CORP-alice-c2VydmVy"));
    assert!(exchange.is_auth_attempted());
    assert!(exchange.realm().unwrap().is_preemptive());

    // Rejected credentials surface to the caller
    assert_eq!(answer(&interceptor, &mut exchange, &response(401, &["NTLM c2VydmVy"])), None);
}

#[test]
fn test_ntlm_type3_failure_is_fatal() {
    let interceptor = AuthInterceptor::new(Arc::new(FailingNtlm), Arc::new(UnavailableSpnegoEngine));
    let mut exchange = Exchange::new(HttpRequest::get("http://intranet/").unwrap()).with_realm(Realm::ntlm("u", "p"));

    let err = interceptor.intercept(&mut exchange, &response(401, &["NTLM abc"])).unwrap_err();
    assert!(matches!(err, NetError::Negotiation(_)));
    assert!(err.is_fatal_auth());
}

#[test]
fn test_spnego_token_uses_virtual_host() {
    let interceptor = interceptor(true);
    let mut request = HttpRequest::get("http://10.1.2.3/").unwrap();
    request.set_virtual_host("web.corp.example");
    let realm = Realm::builder(AuthScheme::Kerberos, "svc", "").build();
    let mut exchange = Exchange::new(request).with_realm(realm);

    let header = answer(&interceptor, &mut exchange, &response(401, &["Negotiate"]));
    assert_eq!(header.as_deref(), Some("Negotiate tok-svc-web.corp.example"));
}

#[test]
fn test_spnego_failure_falls_back_to_ntlm() {
    let interceptor = interceptor(false);
    let realm = Realm::builder(AuthScheme::Spnego, "bob", "pw").build();
    let mut exchange = Exchange::new(HttpRequest::get("http://intranet/").unwrap()).with_realm(realm);

    let header = answer(&interceptor, &mut exchange, &response(401, &["Negotiate", "NTLM"]));
    assert_eq!(header.as_deref(), Some("NTLM T1"));
    let realm = exchange.realm().unwrap();
    assert_eq!(realm.scheme(), AuthScheme::Ntlm);
    assert!(realm.is_preemptive());

    // The follow-up challenge is answered as plain NTLM
    let header = answer(&interceptor, &mut exchange, &response(401, &["NTLM xyz"]));
    assert_eq!(header.as_deref(), Some("NTLM T3-none-bob-xyz"));
}

#[test]
fn test_spnego_failure_without_ntlm_aborts() {
    let interceptor = interceptor(false);
    let realm = Realm::builder(AuthScheme::Kerberos, "bob", "pw").build();
    let mut exchange = Exchange::new(HttpRequest::get("http://intranet/").unwrap()).with_realm(realm);

    let err = interceptor
        .intercept(&mut exchange, &response(401, &["Negotiate", "Basic realm=\"x\""]))
        .unwrap_err();
    assert!(matches!(err, NetError::Negotiation(_)));

    // The sender terminates the exchange with this cause
    assert_eq!(exchange.terminate(err.clone()), err);
    assert!(exchange.connection().is_none());
}

#[test]
fn test_kerberos_realm_needs_negotiate_challenge() {
    let interceptor = interceptor(true);
    let realm = Realm::builder(AuthScheme::Kerberos, "bob", "pw").build();
    let mut exchange = Exchange::new(HttpRequest::get("http://intranet/").unwrap()).with_realm(realm);

    let action = interceptor.intercept(&mut exchange, &response(401, &["NTLM"])).unwrap();
    assert!(matches!(action, AuthAction::Decline));
}

#[test]
fn test_proxy_digest_challenge() {
    let interceptor = interceptor(false);
    let mut exchange = Exchange::new(HttpRequest::get("http://example.com/data").unwrap())
        .with_realm(Realm::basic("origin", "pw"))
        .with_proxy_realm(Realm::digest("proxyuser", "pw"));

    let (request, reuse) = resend(
        interceptor
            .intercept(&mut exchange, &response(407, &["Digest realm=\"proxy\", nonce=\"n1\", qop=\"auth\""]))
            .unwrap(),
    );
    let value = request.headers()[PROXY_AUTHORIZATION].to_str().unwrap();
    assert!(value.starts_with("Digest username=\"proxyuser\""));
    assert!(value.contains("realm=\"proxy\""));
    assert!(!request.headers().contains_key(AUTHORIZATION));
    assert!(reuse);

    // Origin auth is untouched by the proxy round
    assert!(exchange.is_proxy_auth_attempted());
    assert!(!exchange.is_auth_attempted());
    assert!(!exchange.realm().unwrap().is_preemptive());
}

#[test]
fn test_challenge_resets_channel_state() {
    let interceptor = interceptor(false);
    let mut exchange = Exchange::new(HttpRequest::get("http://example.com/").unwrap()).with_realm(Realm::basic("u", "p"));
    exchange.set_channel_state(ChannelState::Pooled);

    let _ = resend(interceptor.intercept(&mut exchange, &response(401, &["basic realm=\"r\""])).unwrap());
    assert_eq!(exchange.channel_state(), ChannelState::New);
}

#[test]
fn test_original_request_is_not_mutated() {
    let interceptor = interceptor(false);
    let mut exchange = Exchange::new(HttpRequest::get("http://example.com/").unwrap()).with_realm(Realm::basic("u", "p"));

    let _ = answer(&interceptor, &mut exchange, &response(401, &["Basic realm=\"r\""]));
    assert!(!exchange.original_request().headers().contains_key(AUTHORIZATION));
    assert!(exchange.current_request().headers().contains_key(AUTHORIZATION));
}
