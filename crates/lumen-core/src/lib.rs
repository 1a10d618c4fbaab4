// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fmt::Display;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// The one way out of the process for unrecoverable setup failures.
///
/// Debug builds trap (panic) so the failure lands in a debugger with a
/// backtrace; release builds log and exit with status 1.
#[cold]
pub fn fatal(what: &str, err: &anyhow::Error) -> ! {
    tracing::error!("fatal: {what}: {err:#}");
    if cfg!(debug_assertions) {
        panic!("fatal: {what}: {err:#}");
    }
    std::process::exit(1)
}

/// Escalates a failed setup result through [`fatal`].
pub trait OrFatal<T> {
    fn or_fatal(self, what: &str) -> T;
}

impl<T, E> OrFatal<T> for Result<T, E>
where
    E: Into<anyhow::Error> + Display,
{
    fn or_fatal(self, what: &str) -> T {
        match self {
            Ok(v) => v,
            Err(e) => fatal(what, &e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_fatal_passes_ok_through() {
        let r: Result<u32, anyhow::Error> = Ok(7);
        assert_eq!(r.or_fatal("never"), 7);
    }

    #[test]
    #[should_panic(expected = "fatal: device setup")]
    fn or_fatal_traps_in_debug() {
        let r: Result<u32, anyhow::Error> = Err(anyhow::anyhow!("no gpu"));
        let _ = r.or_fatal("device setup");
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
