//! Module allowlist checker (spec §4.2 "module-level sandboxing").
//!
//! Provides two public functions:
//! - [`check_module_allowed`] — verifies a module name against an allowlist `HashSet`.
//! - [`build_allowed_set`] — converts a configured module list into a
//!   `HashSet<String>` for O(1) per-import lookup.
//!
//! ## Special case: `os` / `os.path`
//!
//! Python's `os.path` is a submodule of `os`; importing `os.path` causes Python to
//! first load the `os` parent module.  To permit `import os.path` (which is in the
//! default allowlist) without also permitting a bare `import os`, the check grants
//! `"os"` whenever `"os.path"` is present in the allowlist.

use std::collections::HashSet;

/// A denied import. Carries only the module name — `vm.rs` re-derives the
/// full `VmError::ModuleNotAllowed` from the Python import error itself, so
/// this type exists only to give `check_module_allowed` a non-`()` error arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNotAllowed {
    pub module_name: String,
}

/// Checks whether `module_name` is permitted by the given allowlist.
///
/// # Special case
///
/// If `module_name` is `"os"` and `"os.path"` is present in `allowed_set`, the
/// function returns `Ok(())`.  This is required because Python automatically loads
/// the `os` parent when `import os.path` is executed.
pub fn check_module_allowed(
    module_name: &str,
    allowed_set: &HashSet<String>,
) -> Result<(), ModuleNotAllowed> {
    if allowed_set.contains(module_name) {
        return Ok(());
    }

    // Special case: allow bare "os" import when "os.path" is in the allowlist,
    // because Python's import machinery loads "os" as a side-effect of "os.path".
    if module_name == "os" && allowed_set.contains("os.path") {
        return Ok(());
    }

    Err(ModuleNotAllowed {
        module_name: module_name.to_string(),
    })
}

/// Builds a `HashSet<String>` from a configured allowed-module list for O(1)
/// per-import lookup during Python execution.
pub fn build_allowed_set(allowed_modules: &[String]) -> HashSet<String> {
    allowed_modules.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_ALLOWED_MODULES;

    fn default_allowed_modules() -> Vec<String> {
        DEFAULT_ALLOWED_MODULES.iter().map(|s| s.to_string()).collect()
    }

    // ── check_module_allowed: basic allow/deny ─────────────────────────────────

    #[test]
    fn test_allowed_module_returns_ok() {
        let mut set = HashSet::new();
        set.insert("json".to_string());
        assert_eq!(check_module_allowed("json", &set), Ok(()));
    }

    #[test]
    fn test_denied_module_returns_err_with_correct_name() {
        let set = build_allowed_set(&default_allowed_modules());
        let result = check_module_allowed("socket", &set);
        assert_eq!(
            result,
            Err(ModuleNotAllowed {
                module_name: "socket".to_string()
            })
        );
    }

    // ── os / os.path special case ──────────────────────────────────────────────

    #[test]
    fn test_os_allowed_when_os_path_in_set() {
        let mut set = HashSet::new();
        set.insert("os.path".to_string());
        assert_eq!(
            check_module_allowed("os", &set),
            Ok(()),
            "'os' should be permitted when 'os.path' is in the allowlist"
        );
    }

    #[test]
    fn test_os_denied_when_os_path_not_in_set() {
        let mut set = HashSet::new();
        set.insert("math".to_string());
        assert_eq!(
            check_module_allowed("os", &set),
            Err(ModuleNotAllowed {
                module_name: "os".to_string()
            }),
            "'os' should be denied when 'os.path' is not in the allowlist"
        );
    }

    // ── empty allowlist ────────────────────────────────────────────────────────

    #[test]
    fn test_empty_allowlist_denies_everything() {
        let empty: HashSet<String> = HashSet::new();
        assert_eq!(
            check_module_allowed("json", &empty),
            Err(ModuleNotAllowed {
                module_name: "json".to_string()
            })
        );
        assert_eq!(
            check_module_allowed("os", &empty),
            Err(ModuleNotAllowed {
                module_name: "os".to_string()
            })
        );
    }

    // ── build_allowed_set ──────────────────────────────────────────────────────

    #[test]
    fn test_build_allowed_set_from_default_settings_has_11_entries() {
        let set = build_allowed_set(&default_allowed_modules());
        assert_eq!(
            set.len(),
            DEFAULT_ALLOWED_MODULES.len(),
            "build_allowed_set should contain all {} DEFAULT_ALLOWED_MODULES entries",
            DEFAULT_ALLOWED_MODULES.len()
        );
    }

    #[test]
    fn test_build_allowed_set_from_default_settings_contains_all_defaults() {
        let set = build_allowed_set(&default_allowed_modules());
        for module in DEFAULT_ALLOWED_MODULES {
            assert!(
                set.contains(*module),
                "Expected '{}' in the set built from default settings",
                module
            );
        }
    }

    #[test]
    fn test_build_allowed_set_from_custom_list_has_only_those_entries() {
        let modules = vec!["math".to_string(), "json".to_string()];
        let set = build_allowed_set(&modules);
        assert_eq!(set.len(), 2);
        assert!(set.contains("math"));
        assert!(set.contains("json"));
        assert!(!set.contains("re"));
    }
}
