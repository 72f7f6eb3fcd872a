//! Step-by-step teardown that keeps going after a failure

use txfixture_core::{Result, TxFixtureError};

/// Runs teardown steps in order and remembers the first failure.
///
/// A failing step is logged and the remaining steps still run.
#[derive(Default)]
pub(crate) struct TeardownLog {
    first_error: Option<TxFixtureError>,
    failures: usize,
}

impl TeardownLog {
    pub fn step(&mut self, step: &'static str, result: Result<()>) {
        match result {
            Ok(()) => tracing::trace!(step, "teardown step done"),
            Err(error) => {
                tracing::error!(step, %error, "teardown step failed");
                self.failures += 1;
                self.first_error.get_or_insert(error);
            }
        }
    }

    pub fn finish(self) -> Result<()> {
        if self.failures > 1 {
            tracing::error!(failures = self.failures, "teardown finished with failures");
        }
        self.first_error.map_or(Ok(()), Err)
    }
}
