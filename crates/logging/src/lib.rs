//! Logging setup shared by the dynamic models tests, benches, and any binary embedding them.
use time::format_description::well_known::Rfc3339;

/// Log to stderr, at the level given by `RUST_LOG` (`warn` if unset).
///
/// Each line is `LEVEL message time=<rfc 3339> target=<module>`.  If called multiple times in the same process, only
/// applies once, so every test can call it.
pub fn log_to_stderr() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let result = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("warn"),
        )
        .format(|buf, record| {
            use std::io::Write;

            let now = time::OffsetDateTime::now_utc();
            let now = now.format(&Rfc3339).unwrap_or_else(|_| now.to_string());

            writeln!(
                buf,
                "{} {} time={} target={}",
                record.level(),
                record.args(),
                now,
                record.target()
            )
        })
        .is_test(cfg!(test))
        .try_init();

        if let Err(e) = result {
            log::warn!("A logger was already installed: {}", e);
        }
    });
}
