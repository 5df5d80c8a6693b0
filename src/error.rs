use sea_orm::DbErr;
use thiserror::Error;

/// External collaborators the pipeline talks to over the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    MapMatching,
    RoadGeometry,
}

impl std::fmt::Display for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Upstream::MapMatching => write!(f, "map-matching service"),
            Upstream::RoadGeometry => write!(f, "road-geometry source"),
        }
    }
}

/// Failure kinds surfaced by the survey matching pipeline.
///
/// Upstream variants carry the identifier that failed (a way id or a survey
/// id) so the import layer can decide between retrying and skipping.
#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("{service} timed out while resolving {subject}")]
    UpstreamTimeout { service: Upstream, subject: String },

    #[error("{service} failed for {subject}: {message}")]
    Upstream {
        service: Upstream,
        subject: String,
        message: String,
    },

    #[error("road-geometry source returned no way for external id {external_id}")]
    NotFound { external_id: i64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("map matching produced no usable result")]
    NoMatch,

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl SurveyError {
    pub(crate) fn upstream(
        service: Upstream,
        subject: impl ToString,
        message: impl ToString,
    ) -> Self {
        SurveyError::Upstream {
            service,
            subject: subject.to_string(),
            message: message.to_string(),
        }
    }

    /// External id of the way a road-geometry failure is about
    pub fn failed_way(&self) -> Option<i64> {
        match self {
            SurveyError::NotFound { external_id } => Some(*external_id),
            SurveyError::UpstreamTimeout {
                service: Upstream::RoadGeometry,
                subject,
            }
            | SurveyError::Upstream {
                service: Upstream::RoadGeometry,
                subject,
                ..
            } => subject.parse().ok(),
            _ => None,
        }
    }

    /// Whether re-running the failed operation later can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SurveyError::UpstreamTimeout { .. }
                | SurveyError::Upstream { .. }
                | SurveyError::Database(_)
        )
    }
}
