use thiserror::Error;

/// Pipeline step a provider deployment reached when it failed.
///
/// Version-based providers create remote resources step by step; callers need
/// to know which step failed so a retry can resume instead of restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStage {
    ResolveProject,
    CreateVersion,
    StageContent,
    Finalize,
    Release,
}

impl std::fmt::Display for DeployStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ResolveProject => "resolve-project",
            Self::CreateVersion => "create-version",
            Self::StageContent => "stage-content",
            Self::Finalize => "finalize",
            Self::Release => "release",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("subdomain '{0}' is already taken")]
    SubdomainTaken(String),

    #[error("reauthentication required: {0}")]
    AuthRequired(String),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("unexpected provider response shape: {0}")]
    ProviderShape(String),

    #[error("deployment failed at {stage}: {source}")]
    Pipeline {
        stage: DeployStage,
        #[source]
        source: Box<ForgeError>,
    },

    #[error("reconciliation failed: {0}")]
    Reconcile(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ForgeError {
    /// Whether the shared retry policy may re-attempt the failed call.
    ///
    /// Only transport failures and 5xx/429 provider responses qualify;
    /// authentication and validation failures never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => !err.is_builder() && !err.is_decode(),
            Self::Provider { status, .. } => *status >= 500 || *status == 429,
            Self::Pipeline { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Wrap this error with the pipeline stage it occurred in.
    pub fn at_stage(self, stage: DeployStage) -> Self {
        Self::Pipeline {
            stage,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;
