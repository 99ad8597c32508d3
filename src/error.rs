use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed image name {image:?}")]
    MalformedReference { image: String },

    #[error("could not get credentials for {registry}")]
    MissingCredentials { registry: String },

    #[error("could not get a bearer token for {registry}: {reason}")]
    AuthenticationFailed { registry: String, reason: String },

    #[error("unexpected response code {status} from {url}")]
    UnexpectedStatus { url: String, status: StatusCode },

    #[error("failed to parse response from {url}")]
    MalformedBody {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}
