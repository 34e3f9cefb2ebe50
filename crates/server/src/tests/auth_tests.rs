use super::*;

#[test]
fn token_round_trips_subject_email() {
    let cfg = AuthConfig {
        token_secret: "devsecret".into(),
        token_ttl_seconds: 60,
    };
    let token = mint_token(&cfg, "alice@example.com").expect("token");
    let subject = verify_token(&cfg, &token).expect("verify");
    assert_eq!(subject, "alice@example.com");
}

#[test]
fn token_signed_with_other_secret_is_rejected() {
    let cfg = AuthConfig {
        token_secret: "devsecret".into(),
        token_ttl_seconds: 60,
    };
    let other = AuthConfig {
        token_secret: "other".into(),
        token_ttl_seconds: 60,
    };
    let token = mint_token(&other, "alice@example.com").expect("token");
    assert!(verify_token(&cfg, &token).is_err());
}

#[test]
fn expired_token_is_rejected() {
    let cfg = AuthConfig {
        token_secret: "devsecret".into(),
        // Already in the past, beyond the default decode leeway.
        token_ttl_seconds: -120,
    };
    let token = mint_token(&cfg, "alice@example.com").expect("token");
    assert!(verify_token(&cfg, &token).is_err());
}

#[test]
fn session_cookie_carries_the_browser_attributes() {
    let cookie = session_cookie("opaque-token".into());
    assert_eq!(cookie.name(), SESSION_COOKIE);
    assert_eq!(cookie.value(), "opaque-token");
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.secure(), Some(true));
    assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    assert_eq!(cookie.path(), Some("/"));
    assert_eq!(
        cookie.max_age(),
        Some(time::Duration::seconds(SESSION_COOKIE_TTL_SECONDS))
    );
}

#[test]
fn clear_cookie_expires_immediately() {
    let cookie = clear_session_cookie();
    assert_eq!(cookie.name(), SESSION_COOKIE);
    assert_eq!(cookie.value(), "");
    assert_eq!(cookie.max_age(), Some(time::Duration::seconds(0)));
    assert_eq!(cookie.same_site(), Some(SameSite::None));
}
