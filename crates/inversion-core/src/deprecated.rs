//! Names removed from the public API and what replaced them.
//!
//! Config-driven construction resolves every user-supplied name through
//! [`ensure_supported`] first, so a stale config fails with a message that
//! names the replacement instead of a generic "unknown directive".

use inversion_types::error::{InversionError, InversionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedName {
    pub name: &'static str,
    pub replacement: &'static str,
    pub removed_in: &'static str,
}

const REMOVED_IN: &str = "0.16.0";

const fn removed(name: &'static str, replacement: &'static str) -> RemovedName {
    RemovedName {
        name,
        replacement,
        removed_in: REMOVED_IN,
    }
}

pub const REMOVED_NAMES: [RemovedName; 9] = [
    removed("memProfileWrapper", "create_wrapper_from_class"),
    removed("setKwargs", "set_kwargs"),
    removed("printTitles", "print_titles"),
    removed("printLine", "print_line"),
    removed("printStoppers", "print_stoppers"),
    removed("checkStoppers", "check_stoppers"),
    removed("printDone", "print_done"),
    removed("callHooks", "call_hooks"),
    removed("dependentProperty", "dependent_property"),
];

pub fn lookup(name: &str) -> Option<&'static RemovedName> {
    REMOVED_NAMES.iter().find(|r| r.name == name)
}

/// `Err(RemovedApi)` if `name` was removed, `Ok(())` otherwise.
pub fn ensure_supported(name: &str) -> InversionResult<()> {
    match lookup(name) {
        Some(r) => Err(InversionError::RemovedApi {
            name: r.name.to_string(),
            replacement: r.replacement.to_string(),
            removed_in: r.removed_in.to_string(),
        }),
        None => Ok(()),
    }
}
