use std::sync::OnceLock;

static QUIET: OnceLock<bool> = OnceLock::new();

/// Set `MYSQLITE_QUIET=1` (or `true`) to drop banners and summaries from CLI output
pub fn is_quiet() -> bool {
    *QUIET.get_or_init(|| {
        std::env::var("MYSQLITE_QUIET")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    })
}
