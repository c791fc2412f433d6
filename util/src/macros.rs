/// Print a line to stderr, tagged with the calling package, before the tracing subscriber
/// exists.
#[macro_export]
macro_rules! bootstrap {
    ($x:expr $( , $xs:expr )* $(,)?) => {
        eprintln!(concat!("[", env!("CARGO_PKG_NAME"), "] ", $x) $( , $xs )*)
    };
}

/// Log an `Err` at the given level (`ERROR`, `WARN`, ...) without consuming the result.
/// Evaluates to whether anything was logged.
#[macro_export]
macro_rules! catch {
    ($level:ident, $val:expr, $($rest:tt)*) => {
        match &$val {
            Err(e) => {
                $crate::__tracing::event!($crate::__tracing::Level::$level, error = %e, $($rest)*);
                true
            },
            Ok(_) => false,
        }
    };
}

#[cfg(test)]
mod test {
    #[test]
    fn catch_leaves_value_intact() {
        let result: Result<u8, String> = Err("boom".to_owned());

        assert!(crate::catch!(ERROR, result, "testing"));
        assert!(crate::catch!(WARN, result, attempt = 2, "testing"));
        assert_eq!(result, Err("boom".to_owned()));
    }

    #[test]
    fn catch_ignores_ok() {
        let result: Result<u8, String> = Ok(3);

        assert!(!crate::catch!(ERROR, result, "testing"));
    }
}
