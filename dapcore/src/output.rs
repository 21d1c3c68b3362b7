//! Output sink (component I): where `output` events go.

use std::sync::Arc;

/// Receives text produced by the debuggee. `category` is the DAP-defined
/// string (`"stdout"`, `"stderr"`, or an adapter-specific extension).
pub trait OutputSink: Send + Sync {
    fn output(&self, category: &str, text: &str);
}

/// Routes `stdout` to standard output and everything else (`stderr` and any
/// unrecognized category) to standard error, mirroring each line through
/// `log` at a level matching its severity.
#[derive(Default)]
pub struct DefaultOutputSink;

impl OutputSink for DefaultOutputSink {
    fn output(&self, category: &str, text: &str) {
        match category {
            "stdout" => {
                print!("{text}");
                log::info!(target: "dapcore::debuggee", "{}", text.trim_end());
            }
            _ => {
                eprint!("{text}");
                log::warn!(target: "dapcore::debuggee", "{}", text.trim_end());
            }
        }
    }
}

pub(crate) fn boxed_default() -> Arc<dyn OutputSink> {
    Arc::new(DefaultOutputSink)
}
