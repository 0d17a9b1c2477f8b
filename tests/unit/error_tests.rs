//! `AppError` display prefixes and conversions.

use session_broker::AppError;

#[test]
fn every_variant_has_its_own_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Io("x".into()), "io: x"),
        (AppError::Ipc("x".into()), "ipc: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::BadState("x".into()), "bad state: x"),
        (AppError::NotFound("x".into()), "not found: x"),
        (AppError::Spawn("x".into()), "spawn: x"),
        (AppError::Power("x".into()), "power: x"),
        (AppError::Session("x".into()), "session: x"),
        (AppError::Failsafe("x".into()), "failsafe: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn messages_have_no_trailing_period() {
    let err = AppError::BadState("session manager must be idle to request a checkpoint".into());
    assert!(!err.to_string().ends_with('.'));
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("denied")));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let parse = toml::from_str::<toml::Table>("= nope").unwrap_err();
    let err: AppError = parse.into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn implements_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&AppError::Power("no logind".into()));
}
