//! Wholesale validation of untrusted request fields.
//!
//! Every query is described by a declarative table entry: its name, the
//! permission level it requires, and the exact parameters it takes. Incoming
//! fields are matched against that entry and nothing else: a missing
//! parameter, a malformed value or a superfluous field rejects the whole
//! request. Authentication fields (`username`, `password`, `authToken`) are
//! split off before query parameters are checked, so credentials never leak
//! into handler arguments.

use emuprot_core::auth::PermissionLevel;
use emuprot_core::{EmuError, EmuResult};
use std::collections::HashMap;

/// The value classes a query parameter may have.
///
/// These are syntactic classes only; semantic checks (does the database
/// exist?) belong to the handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// `[A-Za-z0-9_-]+`
    Plain,
    /// Like [`ParamType::Plain`], or the empty string ("no archive label").
    PlainOrEmpty,
    /// Like [`ParamType::Plain`] but dots allowed (editor names, usernames).
    PlainDot,
    /// Lowercase hex, as git prints object IDs.
    Hex,
    /// The string `"true"` means true; any other value means false.
    Bool,
    /// A string that parses as a JSON array. Kept as the raw string.
    JsonArray,
}

#[derive(Debug, Clone)]
pub enum ParamValue {
    Text(String),
    Flag(bool),
}

#[derive(Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
}

const fn p(name: &'static str, kind: ParamType) -> ParamSpec {
    ParamSpec { name, kind }
}

/// One queryable operation: its wire name, the permission level required on
/// the `project` parameter (`None` for queries that take no project), and its
/// parameter list.
#[derive(Debug)]
pub struct QuerySpec {
    pub name: &'static str,
    pub required: Option<PermissionLevel>,
    pub params: &'static [ParamSpec],
}

const RO: Option<PermissionLevel> = Some(PermissionLevel::ReadOnly);
const RW: Option<PermissionLevel> = Some(PermissionLevel::ReadWrite);

pub const QUERIES: &[QuerySpec] = &[
    QuerySpec {
        name: "projectInfo",
        required: RO,
        params: &[p("project", ParamType::Plain)],
    },
    QuerySpec {
        name: "listProjects",
        required: None,
        params: &[],
    },
    QuerySpec {
        name: "login",
        required: RO,
        params: &[p("project", ParamType::Plain)],
    },
    QuerySpec {
        name: "listCommits",
        required: RO,
        params: &[
            p("project", ParamType::Plain),
            p("databaseName", ParamType::Plain),
        ],
    },
    QuerySpec {
        name: "listTags",
        required: RO,
        params: &[
            p("project", ParamType::Plain),
            p("databaseName", ParamType::Plain),
        ],
    },
    QuerySpec {
        name: "addTag",
        required: RW,
        params: &[
            p("project", ParamType::Plain),
            p("databaseName", ParamType::Plain),
            p("gitCommitID", ParamType::Hex),
            p("gitTagLabel", ParamType::Plain),
        ],
    },
    QuerySpec {
        name: "renameDatabase",
        required: RW,
        params: &[
            p("project", ParamType::Plain),
            p("oldDatabaseName", ParamType::Plain),
            p("newDatabaseName", ParamType::Plain),
        ],
    },
    QuerySpec {
        name: "editBundleList",
        required: RW,
        params: &[
            p("project", ParamType::Plain),
            p("databaseName", ParamType::Plain),
            p("oldArchiveLabel", ParamType::PlainOrEmpty),
            p("oldBundleListName", ParamType::PlainDot),
            p("newArchiveLabel", ParamType::PlainOrEmpty),
            p("newBundleListName", ParamType::PlainDot),
        ],
    },
    QuerySpec {
        name: "deleteBundleList",
        required: RW,
        params: &[
            p("project", ParamType::Plain),
            p("databaseName", ParamType::Plain),
            p("archiveLabel", ParamType::PlainOrEmpty),
            p("bundleListName", ParamType::PlainDot),
        ],
    },
    QuerySpec {
        name: "setDatabaseConfiguration",
        required: RW,
        params: &[
            p("project", ParamType::Plain),
            p("databaseName", ParamType::Plain),
            p("bundleComments", ParamType::Bool),
            p("bundleFinishedEditing", ParamType::Bool),
        ],
    },
];

/// A request that passed validation. Parameter accessors fail with an
/// internal error on names the query table does not declare; that is a
/// handler bug, not user input.
#[derive(Debug)]
pub struct ValidatedRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_token: Option<String>,
    pub query: &'static QuerySpec,
    params: HashMap<&'static str, ParamValue>,
}

impl ValidatedRequest {
    pub fn text(&self, name: &str) -> EmuResult<&str> {
        match self.params.get(name) {
            Some(ParamValue::Text(value)) => Ok(value),
            _ => Err(undeclared(self.query.name, name)),
        }
    }

    pub fn flag(&self, name: &str) -> EmuResult<bool> {
        match self.params.get(name) {
            Some(ParamValue::Flag(value)) => Ok(*value),
            _ => Err(undeclared(self.query.name, name)),
        }
    }

    /// A `PlainOrEmpty` parameter, with the empty string mapped to `None`.
    pub fn optional_text(&self, name: &str) -> EmuResult<Option<&str>> {
        let value = self.text(name)?;
        Ok(if value.is_empty() { None } else { Some(value) })
    }
}

fn undeclared(query: &str, name: &str) -> EmuError {
    EmuError::Internal(format!("query {query} does not declare parameter {name}"))
}

fn is_plain_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn matches_type(value: &str, kind: ParamType) -> bool {
    match kind {
        ParamType::Plain => !value.is_empty() && value.chars().all(is_plain_char),
        ParamType::PlainOrEmpty => value.chars().all(is_plain_char),
        ParamType::PlainDot => {
            !value.is_empty() && value.chars().all(|c| is_plain_char(c) || c == '.')
        }
        ParamType::Hex => {
            !value.is_empty()
                && value
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        }
        ParamType::Bool => true,
        ParamType::JsonArray => serde_json::from_str::<serde_json::Value>(value)
            .map(|v| v.is_array())
            .unwrap_or(false),
    }
}

fn convert(value: String, kind: ParamType, name: &str) -> EmuResult<ParamValue> {
    if !matches_type(&value, kind) {
        return Err(EmuError::UserInput(name.to_string()));
    }
    Ok(match kind {
        ParamType::Bool => ParamValue::Flag(value == "true"),
        _ => ParamValue::Text(value),
    })
}

/// Validate one request's fields against the query table.
///
/// Consumes the field map; on success every field has been accounted for as
/// either an authentication parameter or a declared query parameter.
pub fn validate(mut fields: HashMap<String, String>) -> EmuResult<ValidatedRequest> {
    let username = match fields.remove("username") {
        Some(value) => match convert(value, ParamType::PlainDot, "username")? {
            ParamValue::Text(value) => Some(value),
            ParamValue::Flag(_) => None,
        },
        None => None,
    };
    // Passwords may contain anything.
    let password = fields.remove("password");
    let auth_token = match fields.remove("authToken") {
        Some(value) => match convert(value, ParamType::Hex, "authToken")? {
            ParamValue::Text(value) => Some(value),
            ParamValue::Flag(_) => None,
        },
        None => None,
    };

    let query_name = fields
        .remove("query")
        .ok_or_else(|| EmuError::UserInput("query".to_string()))?;
    if !matches_type(&query_name, ParamType::Plain) {
        return Err(EmuError::UserInput("query".to_string()));
    }
    let query = QUERIES
        .iter()
        .find(|q| q.name == query_name)
        .ok_or(EmuError::InvalidQuery)?;

    let mut params = HashMap::new();
    for spec in query.params {
        let raw = fields
            .remove(spec.name)
            .ok_or_else(|| EmuError::UserInput(spec.name.to_string()))?;
        params.insert(spec.name, convert(raw, spec.kind, spec.name)?);
    }

    // Anything left over was never asked for.
    if let Some(extra) = fields.keys().min() {
        return Err(EmuError::UserInput(extra.clone()));
    }

    Ok(ValidatedRequest {
        username,
        password,
        auth_token,
        query,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn auth_fields_are_separated_from_query_parameters() {
        let request = validate(fields(&[
            ("username", "alice.m"),
            ("password", "s3cret!with spaces"),
            ("query", "projectInfo"),
            ("project", "demo"),
        ]))
        .unwrap();
        assert_eq!(request.username.as_deref(), Some("alice.m"));
        assert_eq!(request.password.as_deref(), Some("s3cret!with spaces"));
        assert_eq!(request.query.name, "projectInfo");
        assert_eq!(request.text("project").unwrap(), "demo");
        // Credentials are not reachable as query parameters.
        assert!(request.text("username").is_err());
    }

    #[test]
    fn unknown_query_is_rejected() {
        let err = validate(fields(&[("query", "dropAllTables")])).unwrap_err();
        assert_eq!(err.code(), "E_INVALID_QUERY");
    }

    #[test]
    fn missing_and_superfluous_parameters_name_the_field() {
        let err = validate(fields(&[("query", "listCommits"), ("project", "demo")])).unwrap_err();
        assert!(err.to_string().contains("databaseName"));

        let err = validate(fields(&[
            ("query", "projectInfo"),
            ("project", "demo"),
            ("surprise", "1"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("surprise"));
    }

    #[test]
    fn hex_parameters_are_lowercase_hex_only() {
        let ok = validate(fields(&[
            ("query", "addTag"),
            ("project", "demo"),
            ("databaseName", "ae"),
            ("gitCommitID", "deadbeef0123"),
            ("gitTagLabel", "v1"),
        ]));
        assert!(ok.is_ok());

        let err = validate(fields(&[
            ("query", "addTag"),
            ("project", "demo"),
            ("databaseName", "ae"),
            ("gitCommitID", "DEADBEEF"),
            ("gitTagLabel", "v1"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("gitCommitID"));
    }

    #[test]
    fn bool_parameters_convert_and_default_to_false() {
        let request = validate(fields(&[
            ("query", "setDatabaseConfiguration"),
            ("project", "demo"),
            ("databaseName", "ae"),
            ("bundleComments", "true"),
            ("bundleFinishedEditing", "yes"),
        ]))
        .unwrap();
        assert!(request.flag("bundleComments").unwrap());
        assert!(!request.flag("bundleFinishedEditing").unwrap());
    }

    #[test]
    fn empty_archive_label_means_none() {
        let request = validate(fields(&[
            ("query", "deleteBundleList"),
            ("project", "demo"),
            ("databaseName", "ae"),
            ("archiveLabel", ""),
            ("bundleListName", "alice"),
        ]))
        .unwrap();
        assert_eq!(request.optional_text("archiveLabel").unwrap(), None);
        assert_eq!(request.text("bundleListName").unwrap(), "alice");
    }

    #[test]
    fn json_array_type_accepts_only_arrays() {
        assert!(matches_type("[1,2,3]", ParamType::JsonArray));
        assert!(!matches_type(r#"{"a":1}"#, ParamType::JsonArray));
        assert!(!matches_type("not json", ParamType::JsonArray));
    }

    #[test]
    fn plain_rejects_path_traversal_characters() {
        for bad in ["../etc", "a/b", "a b", ""] {
            assert!(!matches_type(bad, ParamType::Plain), "accepted {bad:?}");
        }
        assert!(matches_type("ae_2024-v1", ParamType::Plain));
    }
}
