use super::auth::{sign_token, token_from_cookies, validate_token};

const SECRET: &str = "test-secret";

#[test]
fn sign_and_validate_round_trip() {
    let token = sign_token(SECRET, "user-1", false, chrono::Duration::minutes(10)).unwrap();
    let claims = validate_token(SECRET, &token).unwrap();
    assert_eq!(claims.user_id, "user-1");
    assert!(!claims.is_refresh);
}

#[test]
fn refresh_flag_survives_the_round_trip() {
    let token = sign_token(SECRET, "user-1", true, chrono::Duration::minutes(10)).unwrap();
    let claims = validate_token(SECRET, &token).unwrap();
    assert!(claims.is_refresh);
}

#[test]
fn wrong_secret_is_rejected() {
    let token = sign_token(SECRET, "user-1", false, chrono::Duration::minutes(10)).unwrap();
    assert!(validate_token("other-secret", &token).is_err());
}

#[test]
fn expired_token_is_rejected() {
    // jsonwebtoken allows 60s of leeway, so expire well past it.
    let token = sign_token(SECRET, "user-1", false, chrono::Duration::minutes(-5)).unwrap();
    assert!(validate_token(SECRET, &token).is_err());
}

#[test]
fn garbage_token_is_rejected() {
    assert!(validate_token(SECRET, "not.a.token").is_err());
}

#[test]
fn cookie_parsing_finds_the_access_token() {
    assert_eq!(
        token_from_cookies("access_token=abc.def.ghi"),
        Some("abc.def.ghi")
    );
    assert_eq!(
        token_from_cookies("theme=dark; access_token=tok123; lang=en"),
        Some("tok123")
    );
}

#[test]
fn cookie_parsing_handles_missing_or_empty_tokens() {
    assert_eq!(token_from_cookies(""), None);
    assert_eq!(token_from_cookies("theme=dark"), None);
    assert_eq!(token_from_cookies("access_token="), None);
    // No substring confusion with other cookie names
    assert_eq!(token_from_cookies("old_access_token=zzz"), None);
}
