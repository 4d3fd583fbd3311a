//! Default permission template settings.

use std::collections::HashMap;
use std::ffi::OsString;

use serde::{Deserialize, Deserializer};

const ENV_PREFIX: &str = "WARDEN_PERMISSION_TEMPLATE_";
const ENV_DEFAULT_SUFFIX: &str = "DEFAULT";

/// Which template a newly provisioned resource gets when no key pattern picks
/// one.
///
/// Deserializable so hosts can embed it in their own configuration; the
/// environment is read only by [`PermissionSettings::from_env`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PermissionSettings {
    /// Template key used when nothing more specific applies.
    pub default_template: Option<String>,
    /// Template key per resource qualifier (e.g. `"TRK"`), keyed lower-case.
    #[serde(deserialize_with = "lowercase_keys")]
    pub qualifier_defaults: HashMap<String, String>,
}

fn lowercase_keys<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, String>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(qualifier, key)| (qualifier.to_lowercase(), key))
        .collect())
}

fn utf8_vars<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
}

impl PermissionSettings {
    /// Read settings from the process environment:
    ///
    /// - `WARDEN_PERMISSION_TEMPLATE_DEFAULT`
    /// - `WARDEN_PERMISSION_TEMPLATE_<QUALIFIER>_DEFAULT`
    ///
    /// Blank values and variables that are not valid UTF-8 are ignored.
    pub fn from_env() -> Self {
        Self::from_vars(utf8_vars(std::env::vars_os()))
    }

    pub(crate) fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = Self::default();
        for (name, value) in vars {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if rest == ENV_DEFAULT_SUFFIX {
                settings.default_template = Some(value.to_string());
            } else if let Some(qualifier) = rest
                .strip_suffix(ENV_DEFAULT_SUFFIX)
                .and_then(|q| q.strip_suffix('_'))
                .filter(|q| !q.is_empty())
            {
                settings
                    .qualifier_defaults
                    .insert(qualifier.to_lowercase(), value.to_string());
            }
        }
        settings
    }

    pub fn with_default_template(mut self, key: impl Into<String>) -> Self {
        self.default_template = Some(key.into());
        self
    }

    pub fn with_qualifier_default(mut self, qualifier: &str, key: impl Into<String>) -> Self {
        self.qualifier_defaults
            .insert(qualifier.to_lowercase(), key.into());
        self
    }

    /// Configured template for `qualifier`, falling back to the global default.
    pub fn template_for(&self, qualifier: &str) -> Option<&str> {
        self.qualifier_defaults
            .get(&qualifier.to_lowercase())
            .or(self.default_template.as_ref())
            .map(String::as_str)
    }
}
