// SPDX-License-Identifier: Apache-2.0

//! `${env:NAME:-default}` resolution (§6).

use crate::error::ConfigError;
use regex::Regex;
use std::sync::OnceLock;

/// Matches `${env:NAME}` or `${env:NAME:-default}`. `NAME` is
/// `[A-Za-z_][A-Za-z0-9_]*`; `default` may contain anything but `}`.
fn ref_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{env:([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").expect("valid regex")
    })
}

/// Resolves every `${env:NAME}`/`${env:NAME:-default}` reference in `text`
/// against the process environment (or the supplied `lookup` in tests).
///
/// Unresolved required references (no default, variable unset) are fatal
/// (§6: "unresolved required references are fatal at startup").
pub fn resolve_env_refs(
    text: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let re = ref_pattern();
    let mut err: Option<ConfigError> = None;
    let resolved = re.replace_all(text, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        let default = caps.get(3).map(|m| m.as_str());
        match lookup(name).or_else(|| default.map(str::to_string)) {
            Some(value) => value,
            None => {
                if err.is_none() {
                    err = Some(ConfigError::UnresolvedEnvVar {
                        name: name.to_string(),
                    });
                }
                String::new()
            }
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(resolved.into_owned())
}

/// Resolves against the real process environment.
pub fn resolve_env_refs_process(text: &str) -> Result<String, ConfigError> {
    resolve_env_refs(text, &|name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(map: &HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> + '_ {
        move |name| map.get(name).map(|v| v.to_string())
    }

    #[test]
    fn resolves_set_variable() {
        let mut map = HashMap::new();
        let _ = map.insert("HOST", "db.internal");
        let resolved = resolve_env_refs("host: ${env:HOST}", &lookup(&map)).unwrap();
        assert_eq!(resolved, "host: db.internal");
    }

    #[test]
    fn falls_back_to_default() {
        let map = HashMap::new();
        let resolved =
            resolve_env_refs("port: ${env:PORT:-5432}", &lookup(&map)).unwrap();
        assert_eq!(resolved, "port: 5432");
    }

    #[test]
    fn unresolved_required_is_fatal() {
        let map = HashMap::new();
        let err = resolve_env_refs("k: ${env:MISSING}", &lookup(&map)).unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedEnvVar { name } if name == "MISSING"));
    }
}
