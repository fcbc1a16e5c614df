use evlog::Logger;
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<Logger> = OnceCell::new();

/// Returns false if a logger was already installed.
pub fn set_logger(logger: Logger) -> bool {
    LOGGER.set(logger).is_ok()
}

pub fn get_logger() -> &'static Logger {
    // A default logger has no printers registered, so library consumers that
    // never call set_logger get a silent logger rather than a panic.
    LOGGER.get_or_init(Logger::default)
}
