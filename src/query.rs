//! Credential lookup requests and their canonical query strings.
//!
//! The Central Credential Provider accepts lookups on
//! `/AIMWebService/api/Accounts`. `AppID` and `Safe` are always required and
//! exactly one identity selector must be present: an object name, a user
//! name, or (in dual-accounts mode) a virtual user name, which is sent as the
//! structured filter `Query=VirtualUsername=<name>` instead of `UserName`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Relative path of the account lookup endpoint.
pub const ACCOUNTS_PATH: &str = "/AIMWebService/api/Accounts";

/// A required request field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredField {
    AppId,
    Safe,
    /// One of object name, user name or dual-accounts virtual user name.
    IdentitySelector,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequiredField::AppId => write!(f, "AppID"),
            RequiredField::Safe => write!(f, "Safe"),
            RequiredField::IdentitySelector => {
                write!(f, "one of Object, UserName or VirtualUsername (dual accounts)")
            }
        }
    }
}

/// Why a request cannot be turned into a lookup path.
///
/// Raised before any network call; a request that fails validation never
/// consumes a concurrency slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is a required parameter")]
    MissingRequiredField(RequiredField),

    #[error("conflicting identity selectors: {first} and {second} cannot be combined")]
    ConflictingIdentitySelectors {
        first: &'static str,
        second: &'static str,
    },
}

/// The field a request uses to pick the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySelector<'a> {
    Object(&'a str),
    Username(&'a str),
    VirtualUsername(&'a str),
}

impl<'a> IdentitySelector<'a> {
    fn label(&self) -> &'static str {
        match self {
            IdentitySelector::Object(_) => "Object",
            IdentitySelector::Username(_) => "UserName",
            IdentitySelector::VirtualUsername(_) => "VirtualUsername",
        }
    }

    /// The selector value itself.
    pub fn value(&self) -> &'a str {
        match self {
            IdentitySelector::Object(v)
            | IdentitySelector::Username(v)
            | IdentitySelector::VirtualUsername(v) => *v,
        }
    }
}

/// A logical credential lookup.
///
/// Empty strings are treated exactly like absent fields: they are neither
/// validated as present nor sent on the wire.
///
/// When `dual_accounts` is set, `username` is interpreted as a virtual user
/// name and is sent only as `Query=VirtualUsername=<username>`; the plain
/// `UserName` parameter is never emitted alongside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialRequest {
    pub app_id: Option<String>,
    pub safe: Option<String>,
    pub object: Option<String>,
    pub username: Option<String>,
    pub dual_accounts: bool,
    pub folder: Option<String>,
    pub address: Option<String>,
    pub database: Option<String>,
    pub policy_id: Option<String>,
    pub reason: Option<String>,
    pub query_format: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl CredentialRequest {
    /// Start a request for `app_id` against `safe`.
    pub fn new(app_id: impl Into<String>, safe: impl Into<String>) -> Self {
        Self {
            app_id: Some(app_id.into()),
            safe: Some(safe.into()),
            ..Self::default()
        }
    }

    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Look the account up by its virtual user name (dual accounts).
    pub fn with_virtual_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.dual_accounts = true;
        self
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_policy_id(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_query_format(mut self, query_format: impl Into<String>) -> Self {
        self.query_format = Some(query_format.into());
        self
    }

    /// Resolve which identity selector this request uses.
    pub fn selector(&self) -> Result<IdentitySelector<'_>, ValidationError> {
        let object = present(&self.object).map(IdentitySelector::Object);
        let user = present(&self.username).map(|name| {
            if self.dual_accounts {
                IdentitySelector::VirtualUsername(name)
            } else {
                IdentitySelector::Username(name)
            }
        });

        match (object, user) {
            (Some(selector), None) | (None, Some(selector)) => Ok(selector),
            (Some(first), Some(second)) => Err(ValidationError::ConflictingIdentitySelectors {
                first: first.label(),
                second: second.label(),
            }),
            (None, None) => Err(ValidationError::MissingRequiredField(
                RequiredField::IdentitySelector,
            )),
        }
    }

    /// Check the request in vault order: AppID, then Safe, then the
    /// identity selector. The first failing check wins.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if present(&self.app_id).is_none() {
            return Err(ValidationError::MissingRequiredField(RequiredField::AppId));
        }
        if present(&self.safe).is_none() {
            return Err(ValidationError::MissingRequiredField(RequiredField::Safe));
        }
        self.selector().map(|_| ())
    }

    /// The query parameters that will be sent, in canonical order, unencoded.
    pub fn query_params(&self) -> Result<Vec<(&'static str, String)>, ValidationError> {
        self.validate()?;

        let mut params: Vec<(&'static str, String)> = Vec::new();
        let mut push = |name: &'static str, value: Option<&str>| {
            if let Some(value) = value {
                params.push((name, value.to_string()));
            }
        };

        push("AppID", present(&self.app_id));
        push("Safe", present(&self.safe));
        push("Folder", present(&self.folder));
        match self.selector()? {
            IdentitySelector::Object(object) => push("Object", Some(object)),
            IdentitySelector::Username(user) => push("UserName", Some(user)),
            IdentitySelector::VirtualUsername(user) => {
                push("Query", Some(format!("VirtualUsername={user}").as_str()))
            }
        }
        push("Address", present(&self.address));
        push("Database", present(&self.database));
        push("PolicyID", present(&self.policy_id));
        push("Reason", present(&self.reason));
        push("QueryFormat", present(&self.query_format));

        Ok(params)
    }

    /// Build the relative lookup path with a percent-encoded query string.
    pub fn build_path(&self) -> Result<String, ValidationError> {
        let query = self
            .query_params()?
            .into_iter()
            .map(|(name, value)| format!("{name}={}", urlencoding::encode(&value)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(format!("{ACCOUNTS_PATH}?{query}"))
    }

    /// The identifier a batch result is keyed by: the selector value if the
    /// request has exactly one, otherwise `None`.
    pub fn lookup_key(&self) -> Option<&str> {
        self.selector().ok().map(|selector| selector.value())
    }
}
