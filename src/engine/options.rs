//! Validated creation options.
//!
//! Requests arrive as string-keyed maps. [`VolumeOptions`] is produced by a
//! single parsing pass so malformed input becomes an [`OptionsError`]
//! before the decision table runs.

use serde_json::{Map, Value};
use thiserror::Error;

/// Option keys accepted by `create`.
pub const OPTION_KEYS: [&str; 9] = [
    "type",
    "filesystem",
    "fileset",
    "directory",
    "quota",
    "uid",
    "gid",
    "inode-space",
    "inode-limit",
];

/// Errors raised while validating creation options.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OptionsError {
    /// Raised for a key outside [`OPTION_KEYS`].
    #[error("unknown option {0}")]
    UnknownOption(String),
    /// Raised when a value cannot be used for its key.
    #[error("invalid value {value:?} for option {key}: {reason}")]
    InvalidValue {
        /// Option key.
        key: String,
        /// Offending value as received.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Raised when the same key is given twice.
    #[error("option {0} given more than once")]
    Duplicate(String),
    /// Raised when `type` is neither `fileset` nor `lightweight`.
    #[error("unknown type {0}: expected fileset or lightweight")]
    UnknownType(String),
    /// Raised when ownership is requested for an imported resource.
    #[error("uid and gid cannot be set when importing an existing {resource}")]
    OwnershipWithImport {
        /// Kind of imported resource.
        resource: &'static str,
    },
    /// Raised when a required option is absent.
    #[error("{context} requires the {key} option")]
    Missing {
        /// Option key.
        key: &'static str,
        /// Request shape that needs it.
        context: &'static str,
    },
    /// Raised when a quota is given for a lightweight volume.
    #[error("quota is only supported for fileset volumes")]
    QuotaNotAllowed,
}

/// Requested volume kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestedType {
    /// `type=fileset`.
    Fileset,
    /// `type=lightweight`.
    Lightweight,
}

/// Creation options after validation. Absent keys are `None`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeOptions {
    /// Requested kind.
    pub volume_type: Option<RequestedType>,
    /// Filesystem name.
    pub filesystem: Option<String>,
    /// Existing fileset to import or to hold a lightweight directory.
    pub fileset: Option<String>,
    /// Existing directory to import as a lightweight volume.
    pub directory: Option<String>,
    /// Block quota token.
    pub quota: Option<String>,
    /// Owner user id.
    pub uid: Option<u32>,
    /// Owner group id.
    pub gid: Option<u32>,
    /// Inode space for a new fileset.
    pub inode_space: Option<String>,
    /// Inode limit for a new fileset.
    pub inode_limit: Option<String>,
}

impl VolumeOptions {
    /// Returns `true` when no option was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns `true` when both uid and gid were supplied.
    #[must_use]
    pub const fn has_ownership(&self) -> bool {
        self.uid.is_some() && self.gid.is_some()
    }

    /// Parses `key=value` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] for unknown or repeated keys, empty values,
    /// unparsable ids and unknown types.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, OptionsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            options.set(key.as_ref(), value.as_ref())?;
        }
        Ok(options)
    }

    /// Parses `key=value` strings as given on the command line.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::InvalidValue`] for an argument without `=`
    /// and any error from [`VolumeOptions::from_pairs`].
    pub fn from_assignments<S: AsRef<str>>(assignments: &[S]) -> Result<Self, OptionsError> {
        let mut pairs = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let text = assignment.as_ref();
            let (key, value) = text.split_once('=').ok_or_else(|| OptionsError::InvalidValue {
                key: text.to_owned(),
                value: String::new(),
                reason: String::from("expected key=value"),
            })?;
            pairs.push((key.trim(), value.trim()));
        }
        Self::from_pairs(pairs)
    }

    /// Parses a JSON object whose values are strings, numbers or booleans.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::InvalidValue`] for nested or null values and
    /// any error from [`VolumeOptions::from_pairs`].
    pub fn from_json(object: &Map<String, Value>) -> Result<Self, OptionsError> {
        let mut pairs = Vec::with_capacity(object.len());
        for (key, value) in object {
            let text = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                other => {
                    return Err(OptionsError::InvalidValue {
                        key: key.clone(),
                        value: other.to_string(),
                        reason: String::from("expected a string or number"),
                    });
                }
            };
            pairs.push((key.clone(), text));
        }
        Self::from_pairs(pairs)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), OptionsError> {
        if value.trim().is_empty() {
            return Err(invalid(key, value, "value is empty"));
        }
        let text = value.trim().to_owned();
        match key {
            "type" => {
                let requested = match text.as_str() {
                    "fileset" => RequestedType::Fileset,
                    "lightweight" => RequestedType::Lightweight,
                    _ => return Err(OptionsError::UnknownType(text)),
                };
                store(&mut self.volume_type, key, requested)
            }
            "filesystem" => store(&mut self.filesystem, key, text),
            "fileset" => store(&mut self.fileset, key, text),
            "directory" => {
                if text.contains('/') || text == "." || text == ".." {
                    return Err(invalid(key, value, "must be a single path component"));
                }
                store(&mut self.directory, key, text)
            }
            "quota" => store(&mut self.quota, key, text),
            "uid" => store(&mut self.uid, key, parse_id(key, &text)?),
            "gid" => store(&mut self.gid, key, parse_id(key, &text)?),
            "inode-space" => store(&mut self.inode_space, key, text),
            "inode-limit" => store(&mut self.inode_limit, key, text),
            other => Err(OptionsError::UnknownOption(other.to_owned())),
        }
    }
}

fn store<T>(slot: &mut Option<T>, key: &str, value: T) -> Result<(), OptionsError> {
    if slot.is_some() {
        return Err(OptionsError::Duplicate(key.to_owned()));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_id(key: &str, text: &str) -> Result<u32, OptionsError> {
    text.parse::<u32>()
        .map_err(|err| invalid(key, text, &err.to_string()))
}

fn invalid(key: &str, value: &str, reason: &str) -> OptionsError {
    OptionsError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
        reason: reason.to_owned(),
    }
}
