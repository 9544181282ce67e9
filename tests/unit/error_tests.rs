//! Unit tests for error display.

use agent_relay::AppError;

#[test]
fn display_prefixes_the_category() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Io("disk".into()), "io: disk"),
        (AppError::Lock("held".into()), "lock: held"),
        (AppError::Spawn("no binary".into()), "spawn: no binary"),
        (AppError::Transport("pipe closed".into()), "transport: pipe closed"),
        (AppError::Alert("timeout".into()), "alert: timeout"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn toml_errors_become_config_errors() {
    let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
    let err = AppError::from(toml_err);

    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn errors_are_std_errors() {
    let err: Box<dyn std::error::Error> = Box::new(AppError::Io("x".into()));
    assert_eq!(err.to_string(), "io: x");
}
