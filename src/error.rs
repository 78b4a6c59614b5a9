use thiserror::Error;

/// Errors the mutator-facing API can return. Anything that goes wrong
/// while a collection is running is fatal instead, see [`lose!`].
#[derive(Debug, Error)]
pub enum GcError {
    #[error("failed to map a {bytes}-byte heap region")]
    Map {
        bytes: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("allocation requested while a collection is in progress")]
    AllocationDuringGc,

    #[error("no room for {words} words in {space} space")]
    SpaceExhausted { space: &'static str, words: u64 },

    #[error("invalid object: {0}")]
    InvalidObject(String),
}

/// Report a heap-integrity failure and abort the collection.
///
/// The collector never recovers from these: the message is logged at
/// error level and the thread panics.
#[macro_export]
macro_rules! lose {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        log::error!("fatal error encountered in GC: {}", msg);
        panic!("fatal error encountered: {}", msg)
    }};
}

/// Check an invariant, losing with the given message if it fails.
#[macro_export]
macro_rules! gc_assert {
    ($cond:expr) => {
        if !$cond {
            $crate::lose!("gc invariant violated: {}", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::lose!($($arg)*);
        }
    };
}

/// Warn about corruption that a racing mutator could have caused. With
/// `lose_on_corruption` set the warning escalates to a fatal error.
pub fn corruption_warning_and_maybe_lose(lose_on_corruption: bool, msg: &str) {
    log::warn!("CORRUPTION WARNING: {msg}");
    if lose_on_corruption {
        crate::lose!("{msg} (lose_on_corruption is set)");
    }
    log::warn!("The integrity of the heap is possibly compromised. Continuing.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "fatal error encountered: bad tag 0x3")]
    fn lose_panics_with_the_message() {
        lose!("bad tag {:#x}", 3);
    }

    #[test]
    fn corruption_warning_continues_by_default() {
        corruption_warning_and_maybe_lose(false, "no pointer in hash table");
    }

    #[test]
    #[should_panic(expected = "lose_on_corruption")]
    fn corruption_warning_escalates_when_asked() {
        corruption_warning_and_maybe_lose(true, "no pointer in hash table");
    }

    #[test]
    fn map_error_keeps_its_source() {
        let err = GcError::Map {
            bytes: 4096,
            source: std::io::Error::other("denied"),
        };
        assert_eq!(err.to_string(), "failed to map a 4096-byte heap region");
        assert!(std::error::Error::source(&err).is_some());
    }
}
