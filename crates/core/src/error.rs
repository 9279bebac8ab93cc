//! The emuprot error taxonomy.
//!
//! Every error that can cross a subsystem boundary is a variant of
//! [`EmuError`]. Each variant carries three pieces of policy alongside its
//! message:
//!
//! - a machine-readable wire code (`E_*`) sent to clients,
//! - whether the error may be shown to a client at all, and
//! - whether it must be written to the log.
//!
//! Domain-state errors (no such database, database exists, bad config, lock
//! contention) are client-visible and carry the identifying parameters for
//! diagnosis. Infrastructure errors are logged always; git errors are shown to
//! clients (they usually reflect a recoverable precondition such as "file not
//! tracked yet") while I/O and serialization failures are not.

#[derive(Debug, thiserror::Error)]
pub enum EmuError {
    #[error("invalid value for parameter: {0}")]
    UserInput(String),

    #[error("unknown query")]
    InvalidQuery,

    #[error("authentication failed")]
    Authentication,

    #[error("not authorized")]
    Authorization,

    #[error("no database {database} in project {project}")]
    NoDatabase { project: String, database: String },

    #[error("database {database} already exists in project {project}")]
    DatabaseExists { project: String, database: String },

    #[error(
        "no bundle list {bundle_list} (archive label {label}) in {project}/{database}",
        label = archive_label.as_deref().unwrap_or("none")
    )]
    NoBundleList {
        project: String,
        database: String,
        bundle_list: String,
        archive_label: Option<String>,
    },

    #[error(
        "bundle list {bundle_list} (archive label {label}) already exists in {project}/{database}",
        label = archive_label.as_deref().unwrap_or("none")
    )]
    BundleListExists {
        project: String,
        database: String,
        bundle_list: String,
        archive_label: Option<String>,
    },

    #[error("bundle list has no entry for bundle {name} in session {session}")]
    NoBundleListEntry { name: String, session: String },

    #[error("invalid database configuration for {project}/{database}")]
    InvalidDbConfig { project: String, database: String },

    #[error("resource is locked")]
    Lock,

    #[error("git operation failed: {0}")]
    Git(#[source] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EmuError {
    /// The machine-readable code included in client-facing replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserInput(_) => "E_USER_INPUT",
            Self::InvalidQuery => "E_INVALID_QUERY",
            Self::Authentication => "E_AUTHENTICATION",
            Self::Authorization => "E_AUTHORIZATION",
            Self::NoDatabase { .. } => "E_NO_DATABASE",
            Self::DatabaseExists { .. } => "E_DATABASE_EXISTS",
            Self::NoBundleList { .. } => "E_NO_BUNDLE_LIST",
            Self::BundleListExists { .. } => "E_BUNDLE_LIST_EXISTS",
            Self::NoBundleListEntry { .. } => "E_NO_BUNDLE_LIST_ENTRY",
            Self::InvalidDbConfig { .. } => "E_INVALID_DBCONFIG",
            Self::Lock => "E_LOCK",
            Self::Git(_) => "E_GIT",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "E_INTERNAL_SERVER_ERROR",
        }
    }

    /// Whether the error message itself may be sent to a client.
    ///
    /// Clients always receive at least the code; invisible errors degrade to
    /// a generic internal-server-error reply.
    pub fn visible_to_client(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Json(_) | Self::Internal(_))
    }

    /// Whether the error must be written to the log when it reaches the
    /// topmost failure boundary.
    pub fn log_always(&self) -> bool {
        // Authentication rejections are expected traffic.
        !matches!(self, Self::Authentication)
    }

    /// The message a client is allowed to see.
    pub fn client_message(&self) -> String {
        if self.visible_to_client() {
            self.to_string()
        } else {
            "internal server error".to_string()
        }
    }
}

pub type EmuResult<T> = std::result::Result<T, EmuError>;
